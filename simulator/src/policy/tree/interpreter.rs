// Decision-tree interpreter.
//
// Evaluates typed expressions and walks compiled trees to an action
// node. Evaluation is pure: the only outputs are the action, and any
// warnings collected when a condition failed to evaluate (the branch
// then falls through to on_false, per the error-handling contract).

use crate::policy::tree::context::{ContextError, EvalContext};
use crate::policy::tree::types::{ComputeDef, ExprDef, Scalar, ValueDef};
use crate::policy::tree::validation::{CompiledTree, Node};
use crate::policy::{BankAction, CollateralAction, PaymentAction};
use crate::models::agent::StateValue;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur during tree evaluation.
///
/// None of these are fatal at runtime: a failing condition coerces its
/// branch to `on_false`, and a failing action build demotes the action
/// to the tree's safe default (`Hold` / `NoAction` / `HoldCollateral`).
#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Parameter not found: {0}")]
    ParameterNotFound(String),

    #[error("Type mismatch in '{op}': {left} vs {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("Arithmetic on string operand")]
    StringArithmetic,

    #[error("Division by zero in computation")]
    DivisionByZero,

    #[error("Empty value list for min/max computation")]
    EmptyValueList,

    #[error("Missing required action parameter: {0}")]
    MissingActionParameter(String),

    #[error("Invalid action parameter '{0}': {1}")]
    InvalidActionParameter(String, String),

    #[error("Action '{0}' is not valid for this tree")]
    InvalidActionKind(&'static str),
}

impl From<ContextError> for EvalError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::FieldNotFound(name) => EvalError::FieldNotFound(name),
        }
    }
}

/// A non-fatal evaluation problem, surfaced as a
/// `PolicyEvaluationWarning` event by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalWarning {
    pub node_id: String,
    pub message: String,
}

// ============================================================================
// VALUE EVALUATION
// ============================================================================

/// Evaluate a value to a scalar.
pub fn evaluate_value(
    value: &ValueDef,
    context: &EvalContext,
    params: &BTreeMap<String, Scalar>,
) -> Result<Scalar, EvalError> {
    match value {
        ValueDef::Field { field } => Ok(context.get_field(field)?),
        ValueDef::Param { param } => params
            .get(param)
            .cloned()
            .ok_or_else(|| EvalError::ParameterNotFound(param.clone())),
        ValueDef::Literal { value } => Ok(value.clone()),
        ValueDef::Compute { compute } => evaluate_compute(compute, context, params),
    }
}

// ============================================================================
// COMPUTATION EVALUATION
// ============================================================================

fn numeric_binop(
    op: &'static str,
    left: Scalar,
    right: Scalar,
    int_op: impl Fn(i64, i64) -> Result<i64, EvalError>,
    float_op: impl Fn(f64, f64) -> Result<f64, EvalError>,
) -> Result<Scalar, EvalError> {
    match (left, right) {
        (Scalar::Int(a), Scalar::Int(b)) => Ok(Scalar::Int(int_op(a, b)?)),
        (Scalar::Float(a), Scalar::Float(b)) => Ok(Scalar::Float(float_op(a, b)?)),
        (Scalar::Str(_), _) | (_, Scalar::Str(_)) => Err(EvalError::StringArithmetic),
        (l, r) => Err(EvalError::TypeMismatch {
            op,
            left: l.type_name(),
            right: r.type_name(),
        }),
    }
}

/// Evaluate an arithmetic computation.
///
/// Integer division truncates toward zero; division by zero is an error
/// except for `safediv`, which yields a zero of the operand type.
pub fn evaluate_compute(
    compute: &ComputeDef,
    context: &EvalContext,
    params: &BTreeMap<String, Scalar>,
) -> Result<Scalar, EvalError> {
    match compute {
        ComputeDef::Add { left, right } => numeric_binop(
            "+",
            evaluate_value(left, context, params)?,
            evaluate_value(right, context, params)?,
            |a, b| Ok(a.saturating_add(b)),
            |a, b| Ok(a + b),
        ),

        ComputeDef::Sub { left, right } => numeric_binop(
            "-",
            evaluate_value(left, context, params)?,
            evaluate_value(right, context, params)?,
            |a, b| Ok(a.saturating_sub(b)),
            |a, b| Ok(a - b),
        ),

        ComputeDef::Mul { left, right } => numeric_binop(
            "*",
            evaluate_value(left, context, params)?,
            evaluate_value(right, context, params)?,
            |a, b| Ok(a.saturating_mul(b)),
            |a, b| Ok(a * b),
        ),

        ComputeDef::Div { left, right } => numeric_binop(
            "/",
            evaluate_value(left, context, params)?,
            evaluate_value(right, context, params)?,
            |a, b| {
                if b == 0 {
                    Err(EvalError::DivisionByZero)
                } else {
                    Ok(a / b)
                }
            },
            |a, b| {
                if b == 0.0 {
                    Err(EvalError::DivisionByZero)
                } else {
                    Ok(a / b)
                }
            },
        ),

        ComputeDef::SafeDiv { left, right } => numeric_binop(
            "safediv",
            evaluate_value(left, context, params)?,
            evaluate_value(right, context, params)?,
            |a, b| Ok(if b == 0 { 0 } else { a / b }),
            |a, b| Ok(if b == 0.0 { 0.0 } else { a / b }),
        ),

        ComputeDef::Min { values } => fold_extremum("min", values, context, params, true),
        ComputeDef::Max { values } => fold_extremum("max", values, context, params, false),
    }
}

fn fold_extremum(
    op: &'static str,
    values: &[ValueDef],
    context: &EvalContext,
    params: &BTreeMap<String, Scalar>,
    take_min: bool,
) -> Result<Scalar, EvalError> {
    let mut iter = values.iter();
    let first = iter.next().ok_or(EvalError::EmptyValueList)?;
    let mut acc = evaluate_value(first, context, params)?;

    for value in iter {
        let next = evaluate_value(value, context, params)?;
        acc = match (acc, next) {
            (Scalar::Int(a), Scalar::Int(b)) => {
                Scalar::Int(if take_min { a.min(b) } else { a.max(b) })
            }
            (Scalar::Float(a), Scalar::Float(b)) => {
                Scalar::Float(if take_min { a.min(b) } else { a.max(b) })
            }
            (Scalar::Str(_), _) | (_, Scalar::Str(_)) => return Err(EvalError::StringArithmetic),
            (l, r) => {
                return Err(EvalError::TypeMismatch {
                    op,
                    left: l.type_name(),
                    right: r.type_name(),
                })
            }
        };
    }
    Ok(acc)
}

// ============================================================================
// EXPRESSION EVALUATION
// ============================================================================

fn compare(
    op: &'static str,
    left: Scalar,
    right: Scalar,
    int_cmp: impl Fn(i64, i64) -> bool,
    float_cmp: impl Fn(f64, f64) -> bool,
    str_cmp: impl Fn(&str, &str) -> bool,
) -> Result<bool, EvalError> {
    match (left, right) {
        (Scalar::Int(a), Scalar::Int(b)) => Ok(int_cmp(a, b)),
        (Scalar::Float(a), Scalar::Float(b)) => Ok(float_cmp(a, b)),
        (Scalar::Str(a), Scalar::Str(b)) => Ok(str_cmp(&a, &b)),
        (l, r) => Err(EvalError::TypeMismatch {
            op,
            left: l.type_name(),
            right: r.type_name(),
        }),
    }
}

/// Evaluate a boolean expression.
///
/// Comparisons require both operands to share a type; logical operators
/// short-circuit left to right (an error in a skipped operand never
/// surfaces).
pub fn evaluate_expression(
    expr: &ExprDef,
    context: &EvalContext,
    params: &BTreeMap<String, Scalar>,
) -> Result<bool, EvalError> {
    match expr {
        ExprDef::Eq { left, right } => compare(
            "==",
            evaluate_value(left, context, params)?,
            evaluate_value(right, context, params)?,
            |a, b| a == b,
            |a, b| a == b,
            |a, b| a == b,
        ),
        ExprDef::Ne { left, right } => compare(
            "!=",
            evaluate_value(left, context, params)?,
            evaluate_value(right, context, params)?,
            |a, b| a != b,
            |a, b| a != b,
            |a, b| a != b,
        ),
        ExprDef::Lt { left, right } => compare(
            "<",
            evaluate_value(left, context, params)?,
            evaluate_value(right, context, params)?,
            |a, b| a < b,
            |a, b| a < b,
            |a, b| a < b,
        ),
        ExprDef::Le { left, right } => compare(
            "<=",
            evaluate_value(left, context, params)?,
            evaluate_value(right, context, params)?,
            |a, b| a <= b,
            |a, b| a <= b,
            |a, b| a <= b,
        ),
        ExprDef::Gt { left, right } => compare(
            ">",
            evaluate_value(left, context, params)?,
            evaluate_value(right, context, params)?,
            |a, b| a > b,
            |a, b| a > b,
            |a, b| a > b,
        ),
        ExprDef::Ge { left, right } => compare(
            ">=",
            evaluate_value(left, context, params)?,
            evaluate_value(right, context, params)?,
            |a, b| a >= b,
            |a, b| a >= b,
            |a, b| a >= b,
        ),

        ExprDef::And { conditions } => {
            for condition in conditions {
                if !evaluate_expression(condition, context, params)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }

        ExprDef::Or { conditions } => {
            for condition in conditions {
                if evaluate_expression(condition, context, params)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }

        ExprDef::Not { condition } => Ok(!evaluate_expression(condition, context, params)?),
    }
}

// ============================================================================
// TREE TRAVERSAL
// ============================================================================

/// Walk a compiled tree to its action node.
///
/// A condition that fails to evaluate takes its `on_false` branch and
/// records a warning. Termination is guaranteed: the arena is built
/// from a finite definition whose leaves are all action nodes.
pub fn traverse<'t>(
    tree: &'t CompiledTree,
    context: &EvalContext,
    params: &BTreeMap<String, Scalar>,
) -> (&'t Node, Vec<EvalWarning>) {
    let mut warnings = Vec::new();
    let mut index = tree.root();

    loop {
        match tree.node(index) {
            Node::Action { .. } => return (tree.node(index), warnings),
            Node::Condition {
                node_id,
                condition,
                on_true,
                on_false,
            } => {
                index = match evaluate_expression(condition, context, params) {
                    Ok(true) => *on_true,
                    Ok(false) => *on_false,
                    Err(err) => {
                        warnings.push(EvalWarning {
                            node_id: node_id.clone(),
                            message: err.to_string(),
                        });
                        *on_false
                    }
                };
            }
        }
    }
}

// ============================================================================
// ACTION BUILDING
// ============================================================================

fn required_param(
    action_params: &BTreeMap<String, ValueDef>,
    name: &str,
    context: &EvalContext,
    params: &BTreeMap<String, Scalar>,
) -> Result<Scalar, EvalError> {
    let value = action_params
        .get(name)
        .ok_or_else(|| EvalError::MissingActionParameter(name.to_string()))?;
    evaluate_value(value, context, params)
}

fn int_param(
    action_params: &BTreeMap<String, ValueDef>,
    name: &str,
    context: &EvalContext,
    params: &BTreeMap<String, Scalar>,
) -> Result<i64, EvalError> {
    match required_param(action_params, name, context, params)? {
        Scalar::Int(v) => Ok(v),
        other => Err(EvalError::InvalidActionParameter(
            name.to_string(),
            format!("expected integer, got {}", other.type_name()),
        )),
    }
}

fn str_param(
    action_params: &BTreeMap<String, ValueDef>,
    name: &str,
    context: &EvalContext,
    params: &BTreeMap<String, Scalar>,
) -> Result<String, EvalError> {
    match required_param(action_params, name, context, params)? {
        Scalar::Str(s) => Ok(s),
        other => Err(EvalError::InvalidActionParameter(
            name.to_string(),
            format!("expected string, got {}", other.type_name()),
        )),
    }
}

fn count_param(
    action_params: &BTreeMap<String, ValueDef>,
    name: &str,
    context: &EvalContext,
    params: &BTreeMap<String, Scalar>,
) -> Result<usize, EvalError> {
    let value = int_param(action_params, name, context, params)?;
    usize::try_from(value).map_err(|_| {
        EvalError::InvalidActionParameter(name.to_string(), "must be non-negative".to_string())
    })
}

/// Build a payment action from an action node.
pub fn build_payment_action(
    node: &Node,
    context: &EvalContext,
    params: &BTreeMap<String, Scalar>,
) -> Result<PaymentAction, EvalError> {
    use crate::policy::tree::types::ActionKind;

    let (action, action_params) = match node {
        Node::Action {
            action, parameters, ..
        } => (action, parameters),
        Node::Condition { .. } => return Err(EvalError::InvalidActionKind("condition")),
    };

    match action {
        ActionKind::Release => Ok(PaymentAction::Release),
        ActionKind::Hold => Ok(PaymentAction::Hold),
        ActionKind::Drop => Ok(PaymentAction::Drop),

        ActionKind::Split => Ok(PaymentAction::Split {
            num_splits: count_param(action_params, "num_splits", context, params)?,
        }),

        ActionKind::StaggerSplit => {
            let num_splits = count_param(action_params, "num_splits", context, params)?;
            let interval = int_param(action_params, "interval_ticks", context, params)?;
            let interval_ticks = u64::try_from(interval).map_err(|_| {
                EvalError::InvalidActionParameter(
                    "interval_ticks".to_string(),
                    "must be non-negative".to_string(),
                )
            })?;
            Ok(PaymentAction::StaggerSplit {
                num_splits,
                interval_ticks,
            })
        }

        ActionKind::PaceAndRelease => Ok(PaymentAction::PaceAndRelease {
            num_splits: count_param(action_params, "num_splits", context, params)?,
        }),

        ActionKind::Reprioritize => {
            let new_priority = int_param(action_params, "new_priority", context, params)?;
            Ok(PaymentAction::Reprioritize {
                new_priority: new_priority.clamp(0, 10) as u8,
            })
        }

        other => Err(EvalError::InvalidActionKind(other.name())),
    }
}

/// Build a bank-level action from an action node.
pub fn build_bank_action(
    node: &Node,
    context: &EvalContext,
    params: &BTreeMap<String, Scalar>,
) -> Result<BankAction, EvalError> {
    use crate::policy::tree::types::ActionKind;

    let (action, action_params) = match node {
        Node::Action {
            action, parameters, ..
        } => (action, parameters),
        Node::Condition { .. } => return Err(EvalError::InvalidActionKind("condition")),
    };

    match action {
        ActionKind::SetReleaseBudget => Ok(BankAction::SetReleaseBudget {
            budget: int_param(action_params, "budget", context, params)?,
        }),

        ActionKind::SetState => {
            let key = str_param(action_params, "key", context, params)?;
            let value = match required_param(action_params, "value", context, params)? {
                Scalar::Int(v) => StateValue::Int(v),
                Scalar::Str(s) => StateValue::Str(s),
                Scalar::Float(_) => {
                    return Err(EvalError::InvalidActionParameter(
                        "value".to_string(),
                        "registers hold integers or strings".to_string(),
                    ))
                }
            };
            Ok(BankAction::SetState { key, value })
        }

        ActionKind::AddState => Ok(BankAction::AddState {
            key: str_param(action_params, "key", context, params)?,
            delta: int_param(action_params, "delta", context, params)?,
        }),

        ActionKind::NoAction => Ok(BankAction::NoAction),

        other => Err(EvalError::InvalidActionKind(other.name())),
    }
}

/// Build a collateral action from an action node.
///
/// Non-positive amounts degrade to `Hold` rather than erroring; they
/// are valid "do nothing" outcomes of computed amounts.
pub fn build_collateral_action(
    node: &Node,
    context: &EvalContext,
    params: &BTreeMap<String, Scalar>,
) -> Result<CollateralAction, EvalError> {
    use crate::policy::tree::types::ActionKind;

    let (action, action_params) = match node {
        Node::Action {
            action, parameters, ..
        } => (action, parameters),
        Node::Condition { .. } => return Err(EvalError::InvalidActionKind("condition")),
    };

    match action {
        ActionKind::PostCollateral => {
            let amount = int_param(action_params, "amount", context, params)?;
            if amount <= 0 {
                return Ok(CollateralAction::Hold);
            }
            let reason = if action_params.contains_key("reason") {
                str_param(action_params, "reason", context, params)?
            } else {
                "LiquidityNeed".to_string()
            };
            Ok(CollateralAction::Post { amount, reason })
        }

        ActionKind::WithdrawCollateral => {
            let amount = int_param(action_params, "amount", context, params)?;
            if amount <= 0 {
                return Ok(CollateralAction::Hold);
            }
            Ok(CollateralAction::Withdraw { amount })
        }

        ActionKind::HoldCollateral => Ok(CollateralAction::Hold),

        other => Err(EvalError::InvalidActionKind(other.name())),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::TimeManager;
    use crate::costs::CostRates;
    use crate::models::{Agent, SystemState, Transaction};

    fn test_context() -> (EvalContext, BTreeMap<String, Scalar>) {
        let agents = vec![Agent::new("BANK_A".to_string(), 500_000, 200_000, 0)];
        let state = SystemState::new(agents, "test".to_string());
        let time = TimeManager::new(100, 1);
        let tx = Transaction::new(
            "tx_00000001".to_string(),
            "BANK_A".to_string(),
            "BANK_B".to_string(),
            100_000,
            0,
            50,
        );
        let agent = state.get_agent("BANK_A").unwrap();
        let ctx = EvalContext::for_transaction(
            &tx,
            agent,
            &state,
            &time,
            &CostRates::default(),
            0,
            0,
        );

        let mut params = BTreeMap::new();
        params.insert("threshold".to_string(), Scalar::Int(100_000));
        params.insert("fraction".to_string(), Scalar::Float(0.5));
        (ctx, params)
    }

    fn lit(v: i64) -> ValueDef {
        ValueDef::Literal {
            value: Scalar::Int(v),
        }
    }

    fn field(name: &str) -> ValueDef {
        ValueDef::Field {
            field: name.to_string(),
        }
    }

    #[test]
    fn test_eval_field_and_param() {
        let (ctx, params) = test_context();
        assert_eq!(
            evaluate_value(&field("balance"), &ctx, &params).unwrap(),
            Scalar::Int(500_000)
        );
        assert_eq!(
            evaluate_value(
                &ValueDef::Param {
                    param: "threshold".to_string()
                },
                &ctx,
                &params
            )
            .unwrap(),
            Scalar::Int(100_000)
        );
    }

    #[test]
    fn test_missing_field_and_param_errors() {
        let (ctx, params) = test_context();
        assert_eq!(
            evaluate_value(&field("nope"), &ctx, &params),
            Err(EvalError::FieldNotFound("nope".to_string()))
        );
        assert_eq!(
            evaluate_value(
                &ValueDef::Param {
                    param: "nope".to_string()
                },
                &ctx,
                &params
            ),
            Err(EvalError::ParameterNotFound("nope".to_string()))
        );
    }

    #[test]
    fn test_integer_division_truncates() {
        let (ctx, params) = test_context();
        let compute = ComputeDef::Div {
            left: lit(-7),
            right: lit(2),
        };
        assert_eq!(
            evaluate_compute(&compute, &ctx, &params).unwrap(),
            Scalar::Int(-3),
            "integer division truncates toward zero"
        );
    }

    #[test]
    fn test_division_by_zero_is_error_safediv_is_zero() {
        let (ctx, params) = test_context();
        assert_eq!(
            evaluate_compute(
                &ComputeDef::Div {
                    left: lit(1),
                    right: lit(0)
                },
                &ctx,
                &params
            ),
            Err(EvalError::DivisionByZero)
        );
        assert_eq!(
            evaluate_compute(
                &ComputeDef::SafeDiv {
                    left: lit(1),
                    right: lit(0)
                },
                &ctx,
                &params
            )
            .unwrap(),
            Scalar::Int(0)
        );
    }

    #[test]
    fn test_cross_type_arithmetic_is_error() {
        let (ctx, params) = test_context();
        let compute = ComputeDef::Mul {
            left: field("balance"),
            right: ValueDef::Param {
                param: "fraction".to_string(),
            },
        };
        assert!(matches!(
            evaluate_compute(&compute, &ctx, &params),
            Err(EvalError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_min_max() {
        let (ctx, params) = test_context();
        assert_eq!(
            evaluate_compute(
                &ComputeDef::Min {
                    values: vec![lit(10), lit(50), lit(30)]
                },
                &ctx,
                &params
            )
            .unwrap(),
            Scalar::Int(10)
        );
        assert_eq!(
            evaluate_compute(
                &ComputeDef::Max {
                    values: vec![lit(10), lit(50), lit(30)]
                },
                &ctx,
                &params
            )
            .unwrap(),
            Scalar::Int(50)
        );
        assert_eq!(
            evaluate_compute(&ComputeDef::Max { values: vec![] }, &ctx, &params),
            Err(EvalError::EmptyValueList)
        );
    }

    #[test]
    fn test_comparisons_same_type() {
        let (ctx, params) = test_context();
        let expr = ExprDef::Gt {
            left: field("balance"),
            right: field("amount"),
        };
        assert!(evaluate_expression(&expr, &ctx, &params).unwrap());

        let expr = ExprDef::Eq {
            left: ValueDef::Literal {
                value: Scalar::Str("a".to_string()),
            },
            right: ValueDef::Literal {
                value: Scalar::Str("a".to_string()),
            },
        };
        assert!(evaluate_expression(&expr, &ctx, &params).unwrap());
    }

    #[test]
    fn test_cross_type_comparison_is_error() {
        let (ctx, params) = test_context();
        let expr = ExprDef::Lt {
            left: field("balance"),
            right: ValueDef::Param {
                param: "fraction".to_string(),
            },
        };
        assert!(matches!(
            evaluate_expression(&expr, &ctx, &params),
            Err(EvalError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_short_circuit_skips_errors() {
        let (ctx, params) = test_context();

        // First operand false: the erroring second operand is never reached
        let and_expr = ExprDef::And {
            conditions: vec![
                ExprDef::Lt {
                    left: field("balance"),
                    right: lit(0),
                },
                ExprDef::Gt {
                    left: field("nonexistent"),
                    right: lit(0),
                },
            ],
        };
        assert_eq!(evaluate_expression(&and_expr, &ctx, &params), Ok(false));

        let or_expr = ExprDef::Or {
            conditions: vec![
                ExprDef::Gt {
                    left: field("balance"),
                    right: lit(0),
                },
                ExprDef::Gt {
                    left: field("nonexistent"),
                    right: lit(0),
                },
            ],
        };
        assert_eq!(evaluate_expression(&or_expr, &ctx, &params), Ok(true));
    }

    #[test]
    fn test_traverse_coerces_failed_condition_to_on_false() {
        use crate::policy::tree::types::{ActionKind, NodeDef};
        use crate::policy::tree::validation::{compile_tree, TreeKind};

        let (ctx, params) = test_context();

        let def = NodeDef::Condition {
            node_id: "N1".to_string(),
            condition: ExprDef::Gt {
                left: field("nonexistent"),
                right: lit(0),
            },
            on_true: Box::new(NodeDef::Action {
                node_id: "A1".to_string(),
                action: ActionKind::Release,
                parameters: BTreeMap::new(),
            }),
            on_false: Box::new(NodeDef::Action {
                node_id: "A2".to_string(),
                action: ActionKind::Hold,
                parameters: BTreeMap::new(),
            }),
        };
        let tree = compile_tree(&def, TreeKind::Payment, &params).unwrap();

        let (node, warnings) = traverse(&tree, &ctx, &params);
        assert_eq!(node.node_id(), "A2", "failed condition takes on_false");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].node_id, "N1");
    }

    #[test]
    fn test_build_split_action() {
        use crate::policy::tree::types::ActionKind;

        let (ctx, params) = test_context();
        let mut action_params = BTreeMap::new();
        action_params.insert("num_splits".to_string(), lit(4));
        let node = Node::Action {
            node_id: "A1".to_string(),
            action: ActionKind::Split,
            parameters: action_params,
        };

        let action = build_payment_action(&node, &ctx, &params).unwrap();
        assert_eq!(action, PaymentAction::Split { num_splits: 4 });
    }

    #[test]
    fn test_build_reprioritize_clamps() {
        use crate::policy::tree::types::ActionKind;

        let (ctx, params) = test_context();
        let mut action_params = BTreeMap::new();
        action_params.insert("new_priority".to_string(), lit(99));
        let node = Node::Action {
            node_id: "A1".to_string(),
            action: ActionKind::Reprioritize,
            parameters: action_params,
        };

        assert_eq!(
            build_payment_action(&node, &ctx, &params).unwrap(),
            PaymentAction::Reprioritize { new_priority: 10 }
        );
    }

    #[test]
    fn test_build_collateral_nonpositive_amount_holds() {
        use crate::policy::tree::types::ActionKind;

        let (ctx, params) = test_context();
        let mut action_params = BTreeMap::new();
        action_params.insert("amount".to_string(), lit(0));
        let node = Node::Action {
            node_id: "A1".to_string(),
            action: ActionKind::PostCollateral,
            parameters: action_params,
        };

        assert_eq!(
            build_collateral_action(&node, &ctx, &params).unwrap(),
            CollateralAction::Hold
        );
    }

    #[test]
    fn test_build_missing_parameter_errors() {
        use crate::policy::tree::types::ActionKind;

        let (ctx, params) = test_context();
        let node = Node::Action {
            node_id: "A1".to_string(),
            action: ActionKind::Split,
            parameters: BTreeMap::new(),
        };
        assert_eq!(
            build_payment_action(&node, &ctx, &params),
            Err(EvalError::MissingActionParameter("num_splits".to_string()))
        );
    }
}
