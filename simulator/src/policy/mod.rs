//! Agent policies.
//!
//! Each agent carries a [`Policy`]: up to four compiled decision trees
//! (payment, bank, strategic collateral, end-of-tick collateral) plus a
//! flat parameter map. Evaluation is pure; the engine applies the
//! returned actions and is the only thing that mutates state.
//!
//! Missing trees fall back to safe defaults: release every payment,
//! take no bank action, hold collateral.

use crate::core::money::Cents;
use crate::core::time::Tick;
use crate::models::agent::StateValue;
use std::collections::BTreeMap;

pub mod tree;

use tree::interpreter::{
    build_bank_action, build_collateral_action, build_payment_action, traverse,
};
use tree::{CompiledTree, EvalContext, EvalWarning, PolicyDef, Scalar, TreeError, TreeKind};

/// Decision returned by the payment tree for one queued transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentAction {
    /// Release the transaction for settlement this tick
    Release,

    /// Keep the transaction in queue1
    Hold,

    /// Terminate the transaction (only honored when overdue or when the
    /// scenario permits early drops; otherwise coerced to Hold)
    Drop,

    /// Replace the transaction with `num_splits` children, all released
    /// this tick
    Split { num_splits: usize },

    /// Split, releasing child `i` no earlier than
    /// `current_tick + i * interval_ticks`
    StaggerSplit {
        num_splits: usize,
        interval_ticks: Tick,
    },

    /// StaggerSplit with a one-tick interval
    PaceAndRelease { num_splits: usize },

    /// Change the transaction's priority, then re-evaluate once
    Reprioritize { new_priority: u8 },
}

/// Decision returned by the bank tree, once per agent per tick.
#[derive(Debug, Clone, PartialEq)]
pub enum BankAction {
    /// Cap the total value this agent may release this tick
    SetReleaseBudget { budget: Cents },

    /// Write a scratch register
    SetState { key: String, value: StateValue },

    /// Add a delta to an integer scratch register
    AddState { key: String, delta: i64 },

    /// Do nothing this tick
    NoAction,
}

/// Decision returned by a collateral tree.
#[derive(Debug, Clone, PartialEq)]
pub enum CollateralAction {
    /// Post collateral (clamped to remaining capacity)
    Post { amount: Cents, reason: String },

    /// Withdraw collateral (clamped to what is not backing overdraft)
    Withdraw { amount: Cents },

    /// Leave collateral unchanged
    Hold,
}

/// Which collateral tree to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollateralPhase {
    /// Day-start positioning (tick 0 of each day)
    Strategic,
    /// Reactive cleanup at the end of every tick
    EndOfTick,
}

/// A compiled, validated policy bundle for one agent.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    payment_tree: Option<CompiledTree>,
    bank_tree: Option<CompiledTree>,
    strategic_collateral_tree: Option<CompiledTree>,
    end_of_tick_collateral_tree: Option<CompiledTree>,
    parameters: BTreeMap<String, Scalar>,
}

impl Policy {
    /// Compile and validate a policy definition.
    ///
    /// Rejects duplicate node ids, excessive depth, actions outside
    /// their tree, and references to undefined parameters.
    pub fn compile(def: &PolicyDef) -> Result<Self, TreeError> {
        let compile_opt = |node: &Option<tree::NodeDef>, kind: TreeKind| {
            node.as_ref()
                .map(|n| tree::validation::compile_tree(n, kind, &def.parameters))
                .transpose()
        };

        Ok(Self {
            payment_tree: compile_opt(&def.payment_tree, TreeKind::Payment)?,
            bank_tree: compile_opt(&def.bank_tree, TreeKind::Bank)?,
            strategic_collateral_tree: compile_opt(
                &def.strategic_collateral_tree,
                TreeKind::StrategicCollateral,
            )?,
            end_of_tick_collateral_tree: compile_opt(
                &def.end_of_tick_collateral_tree,
                TreeKind::EndOfTickCollateral,
            )?,
            parameters: def.parameters.clone(),
        })
    }

    /// Policy with no trees: release everything, never touch collateral.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_payment_tree(&self) -> bool {
        self.payment_tree.is_some()
    }

    pub fn has_bank_tree(&self) -> bool {
        self.bank_tree.is_some()
    }

    pub fn has_collateral_tree(&self, phase: CollateralPhase) -> bool {
        match phase {
            CollateralPhase::Strategic => self.strategic_collateral_tree.is_some(),
            CollateralPhase::EndOfTick => self.end_of_tick_collateral_tree.is_some(),
        }
    }

    /// Evaluate the payment tree for one transaction.
    ///
    /// Evaluation problems never escape: a failed condition falls
    /// through to `on_false`, and a failed action build demotes the
    /// decision to `Hold`. Both surface as warnings.
    pub fn decide_payment(&self, context: &EvalContext) -> (PaymentAction, Vec<EvalWarning>) {
        let Some(tree) = &self.payment_tree else {
            return (PaymentAction::Release, Vec::new());
        };
        let (node, mut warnings) = traverse(tree, context, &self.parameters);
        match build_payment_action(node, context, &self.parameters) {
            Ok(action) => (action, warnings),
            Err(err) => {
                warnings.push(EvalWarning {
                    node_id: node.node_id().to_string(),
                    message: err.to_string(),
                });
                (PaymentAction::Hold, warnings)
            }
        }
    }

    /// Evaluate the bank tree, once per tick.
    pub fn decide_bank(&self, context: &EvalContext) -> (BankAction, Vec<EvalWarning>) {
        let Some(tree) = &self.bank_tree else {
            return (BankAction::NoAction, Vec::new());
        };
        let (node, mut warnings) = traverse(tree, context, &self.parameters);
        match build_bank_action(node, context, &self.parameters) {
            Ok(action) => (action, warnings),
            Err(err) => {
                warnings.push(EvalWarning {
                    node_id: node.node_id().to_string(),
                    message: err.to_string(),
                });
                (BankAction::NoAction, warnings)
            }
        }
    }

    /// Evaluate a collateral tree.
    pub fn decide_collateral(
        &self,
        phase: CollateralPhase,
        context: &EvalContext,
    ) -> (CollateralAction, Vec<EvalWarning>) {
        let tree = match phase {
            CollateralPhase::Strategic => &self.strategic_collateral_tree,
            CollateralPhase::EndOfTick => &self.end_of_tick_collateral_tree,
        };
        let Some(tree) = tree else {
            return (CollateralAction::Hold, Vec::new());
        };
        let (node, mut warnings) = traverse(tree, context, &self.parameters);
        match build_collateral_action(node, context, &self.parameters) {
            Ok(action) => (action, warnings),
            Err(err) => {
                warnings.push(EvalWarning {
                    node_id: node.node_id().to_string(),
                    message: err.to_string(),
                });
                (CollateralAction::Hold, warnings)
            }
        }
    }
}
