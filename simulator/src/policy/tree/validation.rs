// Decision-tree validation and compilation.
//
// Trees are checked once at load and compiled into a flat node arena.
// Runtime traversal then never chases owned references: nodes link by
// index. Checks performed here are fatal ConfigErrors; anything that
// depends on the evaluation context (unknown fields, type mismatches)
// is deferred to evaluation time where it demotes to a warning.

use crate::policy::tree::types::{ActionKind, ComputeDef, ExprDef, NodeDef, Scalar, ValueDef};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Maximum allowed tree depth.
pub const MAX_TREE_DEPTH: usize = 100;

/// Which of the four policy trees a definition is being compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeKind {
    Payment,
    Bank,
    StrategicCollateral,
    EndOfTickCollateral,
}

impl TreeKind {
    pub fn name(&self) -> &'static str {
        match self {
            TreeKind::Payment => "payment_tree",
            TreeKind::Bank => "bank_tree",
            TreeKind::StrategicCollateral => "strategic_collateral_tree",
            TreeKind::EndOfTickCollateral => "end_of_tick_collateral_tree",
        }
    }

    /// Whether an action kind is legal in this tree.
    pub fn allows(&self, action: ActionKind) -> bool {
        use ActionKind::*;
        match self {
            TreeKind::Payment => matches!(
                action,
                Release | Hold | Drop | Split | StaggerSplit | PaceAndRelease | Reprioritize
            ),
            TreeKind::Bank => matches!(action, SetReleaseBudget | SetState | AddState | NoAction),
            TreeKind::StrategicCollateral | TreeKind::EndOfTickCollateral => {
                matches!(action, PostCollateral | WithdrawCollateral | HoldCollateral)
            }
        }
    }
}

/// Tree validation errors. All fatal at load.
#[derive(Debug, Error, PartialEq)]
pub enum TreeError {
    #[error("{tree}: duplicate node ID '{node_id}'")]
    DuplicateNodeId { tree: &'static str, node_id: String },

    #[error("{tree}: depth {depth} exceeds maximum {max}")]
    DepthExceeded {
        tree: &'static str,
        depth: usize,
        max: usize,
    },

    #[error("{tree}: action '{action}' not allowed at node '{node_id}'")]
    ActionNotAllowed {
        tree: &'static str,
        node_id: String,
        action: &'static str,
    },

    #[error("{tree}: reference to undefined parameter '{name}'")]
    UnknownParameter { tree: &'static str, name: String },
}

/// A node in the compiled arena. Children link by index.
#[derive(Debug, Clone)]
pub enum Node {
    Condition {
        node_id: String,
        condition: ExprDef,
        on_true: usize,
        on_false: usize,
    },
    Action {
        node_id: String,
        action: ActionKind,
        parameters: BTreeMap<String, ValueDef>,
    },
}

impl Node {
    pub fn node_id(&self) -> &str {
        match self {
            Node::Condition { node_id, .. } => node_id,
            Node::Action { node_id, .. } => node_id,
        }
    }
}

/// A validated decision tree: flat arena of nodes plus the root index.
#[derive(Debug, Clone)]
pub struct CompiledTree {
    nodes: Vec<Node>,
    root: usize,
}

impl CompiledTree {
    pub fn root(&self) -> usize {
        self.root
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Validate a tree definition and compile it into an arena.
pub fn compile_tree(
    def: &NodeDef,
    kind: TreeKind,
    parameters: &BTreeMap<String, Scalar>,
) -> Result<CompiledTree, TreeError> {
    let mut nodes = Vec::new();
    let mut seen_ids = HashSet::new();
    let root = compile_node(def, kind, parameters, &mut nodes, &mut seen_ids, 0)?;
    Ok(CompiledTree { nodes, root })
}

fn compile_node(
    def: &NodeDef,
    kind: TreeKind,
    parameters: &BTreeMap<String, Scalar>,
    nodes: &mut Vec<Node>,
    seen_ids: &mut HashSet<String>,
    depth: usize,
) -> Result<usize, TreeError> {
    if depth > MAX_TREE_DEPTH {
        return Err(TreeError::DepthExceeded {
            tree: kind.name(),
            depth,
            max: MAX_TREE_DEPTH,
        });
    }

    if !seen_ids.insert(def.node_id().to_string()) {
        return Err(TreeError::DuplicateNodeId {
            tree: kind.name(),
            node_id: def.node_id().to_string(),
        });
    }

    match def {
        NodeDef::Condition {
            node_id,
            condition,
            on_true,
            on_false,
        } => {
            check_expr_params(condition, kind, parameters)?;
            let true_idx = compile_node(on_true, kind, parameters, nodes, seen_ids, depth + 1)?;
            let false_idx = compile_node(on_false, kind, parameters, nodes, seen_ids, depth + 1)?;
            nodes.push(Node::Condition {
                node_id: node_id.clone(),
                condition: condition.clone(),
                on_true: true_idx,
                on_false: false_idx,
            });
            Ok(nodes.len() - 1)
        }
        NodeDef::Action {
            node_id,
            action,
            parameters: action_params,
        } => {
            if !kind.allows(*action) {
                return Err(TreeError::ActionNotAllowed {
                    tree: kind.name(),
                    node_id: node_id.clone(),
                    action: action.name(),
                });
            }
            for value in action_params.values() {
                check_value_params(value, kind, parameters)?;
            }
            nodes.push(Node::Action {
                node_id: node_id.clone(),
                action: *action,
                parameters: action_params.clone(),
            });
            Ok(nodes.len() - 1)
        }
    }
}

fn check_expr_params(
    expr: &ExprDef,
    kind: TreeKind,
    parameters: &BTreeMap<String, Scalar>,
) -> Result<(), TreeError> {
    match expr {
        ExprDef::Eq { left, right }
        | ExprDef::Ne { left, right }
        | ExprDef::Lt { left, right }
        | ExprDef::Le { left, right }
        | ExprDef::Gt { left, right }
        | ExprDef::Ge { left, right } => {
            check_value_params(left, kind, parameters)?;
            check_value_params(right, kind, parameters)
        }
        ExprDef::And { conditions } | ExprDef::Or { conditions } => {
            for c in conditions {
                check_expr_params(c, kind, parameters)?;
            }
            Ok(())
        }
        ExprDef::Not { condition } => check_expr_params(condition, kind, parameters),
    }
}

fn check_value_params(
    value: &ValueDef,
    kind: TreeKind,
    parameters: &BTreeMap<String, Scalar>,
) -> Result<(), TreeError> {
    match value {
        ValueDef::Param { param } => {
            if parameters.contains_key(param) {
                Ok(())
            } else {
                Err(TreeError::UnknownParameter {
                    tree: kind.name(),
                    name: param.clone(),
                })
            }
        }
        ValueDef::Compute { compute } => check_compute_params(compute, kind, parameters),
        ValueDef::Field { .. } | ValueDef::Literal { .. } => Ok(()),
    }
}

fn check_compute_params(
    compute: &ComputeDef,
    kind: TreeKind,
    parameters: &BTreeMap<String, Scalar>,
) -> Result<(), TreeError> {
    match compute {
        ComputeDef::Add { left, right }
        | ComputeDef::Sub { left, right }
        | ComputeDef::Mul { left, right }
        | ComputeDef::Div { left, right }
        | ComputeDef::SafeDiv { left, right } => {
            check_value_params(left, kind, parameters)?;
            check_value_params(right, kind, parameters)
        }
        ComputeDef::Min { values } | ComputeDef::Max { values } => {
            for v in values {
                check_value_params(v, kind, parameters)?;
            }
            Ok(())
        }
    }
}
