//! Agent (Bank) model
//!
//! Represents a bank participating in the payment system. Each agent
//! has a settlement balance, an unsecured overdraft cap, posted
//! collateral (bounded by a capacity), an internal outgoing queue
//! (queue1), and a scratch key/value store that bank-level policies may
//! read and write across ticks.
//!
//! CRITICAL: All money values are i64 (cents)

use crate::core::money::Cents;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur during agent operations
#[derive(Debug, Error, PartialEq)]
pub enum AgentError {
    #[error("Insufficient liquidity: required {required}, available {available}")]
    InsufficientLiquidity { required: Cents, available: Cents },
}

/// A scalar value in an agent's scratch store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Int(i64),
    Str(String),
}

/// A bank (agent) in the payment system
///
/// # Example
/// ```
/// use rtgs_sim_core::models::Agent;
///
/// let mut agent = Agent::new("BANK_A".to_string(), 1_000_000, 500_000, 0);
/// assert_eq!(agent.balance(), 1_000_000);
///
/// agent.debit(300_000).unwrap();
/// assert_eq!(agent.balance(), 700_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique agent identifier (e.g., "BANK_A")
    id: String,

    /// Settlement account balance (cents). May go negative down to
    /// `-(unsecured_cap + posted_collateral)`.
    balance: Cents,

    /// Unsecured intraday overdraft cap (cents, >= 0)
    unsecured_cap: Cents,

    /// Collateral currently posted (cents, 0..=max_collateral_capacity)
    posted_collateral: Cents,

    /// Maximum collateral the agent can post (cents)
    max_collateral_capacity: Cents,

    /// Internal outgoing queue (queue1): pending transaction ids
    outgoing_queue: Vec<String>,

    /// Scratch key/value store for bank-level policies
    bank_state: BTreeMap<String, StateValue>,

    /// Remaining release budget for the current tick, if the bank tree
    /// set one. Cleared at the start of every tick.
    release_budget: Option<Cents>,
}

impl Agent {
    /// Create a new agent.
    ///
    /// # Panics
    /// Panics if `unsecured_cap` or `max_collateral_capacity` is negative.
    pub fn new(
        id: String,
        opening_balance: Cents,
        unsecured_cap: Cents,
        max_collateral_capacity: Cents,
    ) -> Self {
        assert!(unsecured_cap >= 0, "unsecured_cap must be non-negative");
        assert!(
            max_collateral_capacity >= 0,
            "max_collateral_capacity must be non-negative"
        );
        Self {
            id,
            balance: opening_balance,
            unsecured_cap,
            posted_collateral: 0,
            max_collateral_capacity,
            outgoing_queue: Vec::new(),
            bank_state: BTreeMap::new(),
            release_budget: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn balance(&self) -> Cents {
        self.balance
    }

    pub fn unsecured_cap(&self) -> Cents {
        self.unsecured_cap
    }

    pub fn posted_collateral(&self) -> Cents {
        self.posted_collateral
    }

    pub fn max_collateral_capacity(&self) -> Cents {
        self.max_collateral_capacity
    }

    /// Collateral headroom: `max_collateral_capacity - posted_collateral`.
    pub fn remaining_collateral_capacity(&self) -> Cents {
        self.max_collateral_capacity - self.posted_collateral
    }

    /// Deepest allowed overdraft: `unsecured_cap + posted_collateral`.
    pub fn overdraft_limit(&self) -> Cents {
        self.unsecured_cap + self.posted_collateral
    }

    /// Spendable envelope: `balance + unsecured_cap + posted_collateral`.
    pub fn effective_liquidity(&self) -> Cents {
        self.balance + self.overdraft_limit()
    }

    /// Check whether paying `amount` keeps the balance within the
    /// overdraft limit. A post-payment balance of exactly
    /// `-(unsecured_cap + posted_collateral)` is allowed.
    pub fn can_pay(&self, amount: Cents) -> bool {
        self.balance - amount >= -self.overdraft_limit()
    }

    /// Debit (decrease) the balance.
    ///
    /// # Panics
    /// Panics if `amount` is negative.
    pub fn debit(&mut self, amount: Cents) -> Result<(), AgentError> {
        assert!(amount >= 0, "amount must be non-negative");
        if !self.can_pay(amount) {
            return Err(AgentError::InsufficientLiquidity {
                required: amount,
                available: self.effective_liquidity(),
            });
        }
        self.balance -= amount;
        Ok(())
    }

    /// Credit (increase) the balance.
    ///
    /// # Panics
    /// Panics if `amount` is negative.
    pub fn credit(&mut self, amount: Cents) {
        assert!(amount >= 0, "amount must be non-negative");
        self.balance += amount;
    }

    /// Overdraft currently in use: `max(-balance, 0)`.
    pub fn overdraft_in_use(&self) -> Cents {
        (-self.balance).max(0)
    }

    // ========================================================================
    // Collateral
    // ========================================================================

    /// Post collateral, clamped to the remaining capacity.
    ///
    /// Returns the amount actually posted (0 if no headroom).
    pub fn post_collateral(&mut self, amount: Cents) -> Cents {
        let posted = amount.max(0).min(self.remaining_collateral_capacity());
        self.posted_collateral += posted;
        posted
    }

    /// Withdraw collateral, clamped so that (a) posted collateral never
    /// goes negative and (b) collateral currently backing an overdraft
    /// stays posted: `balance >= -(unsecured_cap + posted_collateral)`
    /// must keep holding.
    ///
    /// Returns the amount actually withdrawn.
    pub fn withdraw_collateral(&mut self, amount: Cents) -> Cents {
        let backing_needed = (-self.balance - self.unsecured_cap).max(0);
        let max_withdrawable = (self.posted_collateral - backing_needed).max(0);
        let withdrawn = amount.max(0).min(max_withdrawable);
        self.posted_collateral -= withdrawn;
        withdrawn
    }

    // ========================================================================
    // Queue 1 (internal outgoing queue)
    // ========================================================================

    pub fn outgoing_queue(&self) -> &[String] {
        &self.outgoing_queue
    }

    pub fn outgoing_queue_mut(&mut self) -> &mut Vec<String> {
        &mut self.outgoing_queue
    }

    pub fn outgoing_queue_size(&self) -> usize {
        self.outgoing_queue.len()
    }

    /// Append a transaction id to queue1.
    pub fn queue_outgoing(&mut self, tx_id: String) {
        self.outgoing_queue.push(tx_id);
    }

    /// Remove a transaction id from queue1. Returns true if present.
    pub fn remove_from_queue(&mut self, tx_id: &str) -> bool {
        if let Some(pos) = self.outgoing_queue.iter().position(|id| id == tx_id) {
            self.outgoing_queue.remove(pos);
            true
        } else {
            false
        }
    }

    // ========================================================================
    // Bank scratch state
    // ========================================================================

    pub fn bank_state(&self) -> &BTreeMap<String, StateValue> {
        &self.bank_state
    }

    pub fn state_value(&self, key: &str) -> Option<&StateValue> {
        self.bank_state.get(key)
    }

    pub fn set_state(&mut self, key: String, value: StateValue) {
        self.bank_state.insert(key, value);
    }

    /// Add a delta to an integer register; missing keys start at 0.
    ///
    /// Returns false (no-op) if the register holds a string.
    pub fn add_state(&mut self, key: &str, delta: i64) -> bool {
        match self.bank_state.get_mut(key) {
            Some(StateValue::Int(v)) => {
                *v = v.saturating_add(delta);
                true
            }
            Some(StateValue::Str(_)) => false,
            None => {
                self.bank_state
                    .insert(key.to_string(), StateValue::Int(delta));
                true
            }
        }
    }

    // ========================================================================
    // Per-tick release budget
    // ========================================================================

    /// Clear the release budget at the start of a tick.
    pub fn reset_release_budget(&mut self) {
        self.release_budget = None;
    }

    /// Cap the value this agent may release for the rest of the tick.
    pub fn set_release_budget(&mut self, budget: Cents) {
        self.release_budget = Some(budget.max(0));
    }

    pub fn release_budget(&self) -> Option<Cents> {
        self.release_budget
    }

    /// Consume budget for a release. Returns false (and consumes
    /// nothing) if the remaining budget does not cover `amount`.
    /// Always true when no budget is set.
    pub fn try_consume_budget(&mut self, amount: Cents) -> bool {
        match self.release_budget {
            None => true,
            Some(remaining) if amount <= remaining => {
                self.release_budget = Some(remaining - amount);
                true
            }
            Some(_) => false,
        }
    }
}
