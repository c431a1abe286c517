// Policy DSL type definitions.
//
// JSON decision-tree format for machine-editable policies. All types
// deserialize from JSON and are validated before use (see validation.rs);
// nothing here is trusted until it has been compiled.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// SCALARS
// ============================================================================

/// A typed scalar: the value domain of the policy language.
///
/// Comparisons and arithmetic require both operands to share a type;
/// cross-type operations are evaluation errors, not silent coercions.
/// Monetary fields are always `Int` cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    /// Type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::Int(_) => "integer",
            Scalar::Float(_) => "float",
            Scalar::Str(_) => "string",
        }
    }
}

// ============================================================================
// POLICY DEFINITION
// ============================================================================

/// Complete policy definition for one agent.
///
/// Up to four decision trees, all optional:
/// - `payment_tree`: per-transaction release decisions
/// - `bank_tree`: once-per-tick bank-level decisions (budgets, registers)
/// - `strategic_collateral_tree`: day-start collateral positioning
/// - `end_of_tick_collateral_tree`: reactive collateral cleanup
///
/// plus a flat map of named parameters referenced via `{"param": name}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDef {
    #[serde(default)]
    pub payment_tree: Option<NodeDef>,

    #[serde(default)]
    pub bank_tree: Option<NodeDef>,

    #[serde(default)]
    pub strategic_collateral_tree: Option<NodeDef>,

    #[serde(default)]
    pub end_of_tick_collateral_tree: Option<NodeDef>,

    #[serde(default)]
    pub parameters: BTreeMap<String, Scalar>,
}

// ============================================================================
// TREE NODES
// ============================================================================

/// A node in a decision tree definition.
///
/// Two variants:
/// - Condition: evaluate an expression, branch on the result
/// - Action: terminal node naming the decision
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeDef {
    /// Conditional branch node
    Condition {
        /// Unique node identifier (within the tree)
        node_id: String,

        /// Boolean expression to evaluate
        condition: ExprDef,

        /// Node to visit if the condition is true
        on_true: Box<NodeDef>,

        /// Node to visit if the condition is false (also the fallback
        /// when the condition fails to evaluate)
        on_false: Box<NodeDef>,
    },

    /// Terminal action node
    Action {
        /// Unique node identifier (within the tree)
        node_id: String,

        /// Action to take
        action: ActionKind,

        /// Action parameters, evaluated against the context
        #[serde(default)]
        parameters: BTreeMap<String, ValueDef>,
    },
}

impl NodeDef {
    pub fn node_id(&self) -> &str {
        match self {
            NodeDef::Condition { node_id, .. } => node_id,
            NodeDef::Action { node_id, .. } => node_id,
        }
    }

    pub fn is_action(&self) -> bool {
        matches!(self, NodeDef::Action { .. })
    }
}

// ============================================================================
// EXPRESSIONS
// ============================================================================

/// Boolean expression over typed scalar values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum ExprDef {
    #[serde(rename = "==")]
    Eq { left: ValueDef, right: ValueDef },

    #[serde(rename = "!=")]
    Ne { left: ValueDef, right: ValueDef },

    #[serde(rename = "<")]
    Lt { left: ValueDef, right: ValueDef },

    #[serde(rename = "<=")]
    Le { left: ValueDef, right: ValueDef },

    #[serde(rename = ">")]
    Gt { left: ValueDef, right: ValueDef },

    #[serde(rename = ">=")]
    Ge { left: ValueDef, right: ValueDef },

    /// Logical AND, short-circuit left to right
    #[serde(rename = "and")]
    And { conditions: Vec<ExprDef> },

    /// Logical OR, short-circuit left to right
    #[serde(rename = "or")]
    Or { conditions: Vec<ExprDef> },

    #[serde(rename = "not")]
    Not { condition: Box<ExprDef> },
}

// ============================================================================
// VALUES
// ============================================================================

/// A value in an expression or action parameter: a context field, a
/// named parameter, a literal, or a computed value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueDef {
    /// Reference to a field in the evaluation context,
    /// e.g. `{"field": "balance"}`
    Field { field: String },

    /// Reference to a named policy parameter,
    /// e.g. `{"param": "urgency_threshold"}`
    Param { param: String },

    /// Literal scalar, e.g. `{"value": 100000}`
    Literal { value: Scalar },

    /// Arithmetic computation
    Compute { compute: Box<ComputeDef> },
}

// ============================================================================
// COMPUTATIONS
// ============================================================================

/// Arithmetic computation over typed scalars.
///
/// Integer division truncates toward zero and errors on a zero divisor;
/// `safediv` yields zero instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum ComputeDef {
    #[serde(rename = "+")]
    Add { left: ValueDef, right: ValueDef },

    #[serde(rename = "-")]
    Sub { left: ValueDef, right: ValueDef },

    #[serde(rename = "*")]
    Mul { left: ValueDef, right: ValueDef },

    #[serde(rename = "/")]
    Div { left: ValueDef, right: ValueDef },

    #[serde(rename = "min")]
    Min { values: Vec<ValueDef> },

    #[serde(rename = "max")]
    Max { values: Vec<ValueDef> },

    #[serde(rename = "safediv")]
    SafeDiv { left: ValueDef, right: ValueDef },
}

// ============================================================================
// ACTIONS
// ============================================================================

/// Action kinds, across all tree types.
///
/// Each tree type accepts only its own subset; an action in the wrong
/// tree is rejected at load (see `validation::TreeKind::allows`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    // payment_tree
    /// Release the transaction for settlement this tick
    Release,
    /// Keep the transaction in queue1
    Hold,
    /// Terminate the transaction without settlement
    Drop,
    /// Split into `num_splits` children, all released now
    Split,
    /// Split into children released every `interval_ticks` ticks
    StaggerSplit,
    /// StaggerSplit with a one-tick interval
    PaceAndRelease,
    /// Change the transaction's priority and re-evaluate once
    Reprioritize,

    // bank_tree
    /// Cap the value this agent may release this tick
    SetReleaseBudget,
    /// Write a scratch register
    SetState,
    /// Add a delta to an integer scratch register
    AddState,
    /// Do nothing this tick
    NoAction,

    // collateral trees
    /// Post collateral (clamped to capacity)
    PostCollateral,
    /// Withdraw collateral (clamped to what is not backing overdraft)
    WithdrawCollateral,
    /// Leave collateral unchanged
    HoldCollateral,
}

impl ActionKind {
    /// Name used in events and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Release => "Release",
            ActionKind::Hold => "Hold",
            ActionKind::Drop => "Drop",
            ActionKind::Split => "Split",
            ActionKind::StaggerSplit => "StaggerSplit",
            ActionKind::PaceAndRelease => "PaceAndRelease",
            ActionKind::Reprioritize => "Reprioritize",
            ActionKind::SetReleaseBudget => "SetReleaseBudget",
            ActionKind::SetState => "SetState",
            ActionKind::AddState => "AddState",
            ActionKind::NoAction => "NoAction",
            ActionKind::PostCollateral => "PostCollateral",
            ActionKind::WithdrawCollateral => "WithdrawCollateral",
            ActionKind::HoldCollateral => "HoldCollateral",
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
