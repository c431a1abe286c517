//! Transaction model
//!
//! Represents a payment between two agents. Identity fields (ids,
//! original amount, arrival/deadline ticks, priority, divisibility,
//! parent link) are immutable after construction; settlement state
//! (remaining amount, status, release ticks) mutates as the simulation
//! progresses.
//!
//! CRITICAL: All money values are i64 (cents)

use crate::core::money::Cents;
use crate::core::time::Tick;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transaction status
///
/// Tracks the lifecycle of a payment through the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Waiting to be settled
    Pending,

    /// Partially settled; remainder still outstanding
    PartiallySettled {
        /// Tick when the first partial settlement occurred
        first_settlement_tick: Tick,
    },

    /// Past its deadline with value still outstanding
    Overdue {
        /// Tick when the transaction became overdue
        since_tick: Tick,
    },

    /// Fully settled
    Settled {
        /// Tick when the final settlement occurred
        tick: Tick,
    },

    /// Terminated without (full) settlement
    Dropped {
        /// Tick when the transaction was dropped
        tick: Tick,
    },
}

/// Errors that can occur during transaction operations
#[derive(Debug, Error, PartialEq)]
pub enum TransactionError {
    #[error("Cannot partially settle indivisible transaction")]
    IndivisibleTransaction,

    #[error("Settlement amount {amount} exceeds remaining amount {remaining}")]
    AmountExceedsRemaining { amount: Cents, remaining: Cents },

    #[error("Transaction already fully settled")]
    AlreadySettled,

    #[error("Cannot settle dropped transaction")]
    TransactionDropped,

    #[error("Settlement amount must be positive")]
    InvalidAmount,
}

/// A payment transaction between two agents
///
/// # Example
/// ```
/// use rtgs_sim_core::models::Transaction;
///
/// let tx = Transaction::new(
///     "tx_00000001".to_string(),
///     "BANK_A".to_string(),
///     "BANK_B".to_string(),
///     100_000, // $1,000.00 in cents
///     10,      // arrival_tick
///     50,      // deadline_tick
/// )
/// .with_priority(8)
/// .divisible();
///
/// assert_eq!(tx.remaining_amount(), 100_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Stable transaction identifier (counter-derived, never random)
    id: String,

    sender_id: String,

    receiver_id: String,

    /// Original transaction amount (cents)
    amount: Cents,

    /// Remaining amount to be settled (cents)
    remaining_amount: Cents,

    /// Tick when the transaction arrived in the system
    arrival_tick: Tick,

    /// Tick by which the transaction must be settled
    deadline_tick: Tick,

    /// Priority level 0-10 (higher = more urgent); default 5
    priority: u8,

    /// Whether the transaction may be split into parts
    is_divisible: bool,

    /// Parent transaction id, set on split children
    parent_id: Option<String>,

    /// Child transaction ids, set on the parent when it is split
    child_ids: Vec<String>,

    /// Earliest tick a staggered child may be released; None = no gate
    earliest_release_tick: Option<Tick>,

    /// Tick of the first Release decision for this transaction
    first_release_tick: Option<Tick>,

    status: TransactionStatus,
}

impl Transaction {
    /// Create a new pending transaction.
    ///
    /// # Panics
    /// Panics if `amount <= 0` or `deadline_tick < arrival_tick`.
    pub fn new(
        id: String,
        sender_id: String,
        receiver_id: String,
        amount: Cents,
        arrival_tick: Tick,
        deadline_tick: Tick,
    ) -> Self {
        assert!(amount > 0, "amount must be positive");
        assert!(
            deadline_tick >= arrival_tick,
            "deadline must not precede arrival"
        );

        Self {
            id,
            sender_id,
            receiver_id,
            amount,
            remaining_amount: amount,
            arrival_tick,
            deadline_tick,
            priority: 5,
            is_divisible: false,
            parent_id: None,
            child_ids: Vec::new(),
            earliest_release_tick: None,
            first_release_tick: None,
            status: TransactionStatus::Pending,
        }
    }

    /// Set priority (builder pattern); capped at 10.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(10);
        self
    }

    /// Mark the transaction as divisible (builder pattern).
    pub fn divisible(mut self) -> Self {
        self.is_divisible = true;
        self
    }

    /// Set divisibility from a flag (builder pattern).
    pub fn with_divisible(mut self, divisible: bool) -> Self {
        self.is_divisible = divisible;
        self
    }

    /// Link this transaction to its split parent (builder pattern).
    pub fn with_parent(mut self, parent_id: String) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Gate release until the given tick (builder pattern).
    pub fn with_earliest_release(mut self, tick: Tick) -> Self {
        self.earliest_release_tick = Some(tick);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn receiver_id(&self) -> &str {
        &self.receiver_id
    }

    /// Original transaction amount (cents)
    pub fn amount(&self) -> Cents {
        self.amount
    }

    /// Remaining amount to be settled (cents)
    pub fn remaining_amount(&self) -> Cents {
        self.remaining_amount
    }

    /// Amount already settled (cents)
    pub fn settled_amount(&self) -> Cents {
        self.amount - self.remaining_amount
    }

    pub fn arrival_tick(&self) -> Tick {
        self.arrival_tick
    }

    pub fn deadline_tick(&self) -> Tick {
        self.deadline_tick
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn is_divisible(&self) -> bool {
        self.is_divisible
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn child_ids(&self) -> &[String] {
        &self.child_ids
    }

    /// Whether this transaction has been split into children.
    ///
    /// A split parent never settles directly; its state follows its
    /// children.
    pub fn is_split_parent(&self) -> bool {
        !self.child_ids.is_empty()
    }

    /// Record the children created when this transaction was split.
    pub fn set_children(&mut self, child_ids: Vec<String>) {
        self.child_ids = child_ids;
    }

    pub fn earliest_release_tick(&self) -> Option<Tick> {
        self.earliest_release_tick
    }

    /// Whether the release gate (if any) has opened at `tick`.
    pub fn is_release_eligible(&self, tick: Tick) -> bool {
        self.earliest_release_tick.map_or(true, |t| tick >= t)
    }

    pub fn first_release_tick(&self) -> Option<Tick> {
        self.first_release_tick
    }

    /// Record the first Release decision tick; later calls are no-ops.
    pub fn record_first_release(&mut self, tick: Tick) {
        if self.first_release_tick.is_none() {
            self.first_release_tick = Some(tick);
        }
    }

    pub fn status(&self) -> &TransactionStatus {
        &self.status
    }

    /// Settlement tick, if fully settled.
    pub fn settlement_tick(&self) -> Option<Tick> {
        match self.status {
            TransactionStatus::Settled { tick } => Some(tick),
            _ => None,
        }
    }

    /// Whether value is still outstanding and the transaction is live.
    pub fn is_outstanding(&self) -> bool {
        !matches!(
            self.status,
            TransactionStatus::Settled { .. } | TransactionStatus::Dropped { .. }
        )
    }

    pub fn is_fully_settled(&self) -> bool {
        self.remaining_amount == 0
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self.status, TransactionStatus::Dropped { .. })
    }

    /// Whether the transaction is marked overdue.
    pub fn is_overdue(&self) -> bool {
        matches!(self.status, TransactionStatus::Overdue { .. })
    }

    /// Tick the transaction became overdue, if it is.
    pub fn overdue_since(&self) -> Option<Tick> {
        match self.status {
            TransactionStatus::Overdue { since_tick } => Some(since_tick),
            _ => None,
        }
    }

    /// Mutate priority in place (Reprioritize action); capped at 10.
    pub fn set_priority(&mut self, priority: u8) {
        self.priority = priority.min(10);
    }

    /// Settle value against this transaction (full or partial).
    ///
    /// Partial settlement requires `is_divisible`. Split parents must
    /// not be settled through this method; their state is updated as
    /// their children settle (see `apply_child_settlement`).
    pub fn settle(&mut self, amount: Cents, tick: Tick) -> Result<(), TransactionError> {
        if amount > 0 && amount < self.remaining_amount && !self.is_divisible {
            return Err(TransactionError::IndivisibleTransaction);
        }
        self.settle_netted(amount, tick)
    }

    /// Settle value without the divisibility check.
    ///
    /// LSM netting settles net amounts against queued transactions
    /// regardless of divisibility; netting is a settlement mechanism,
    /// not a split.
    pub fn settle_netted(&mut self, amount: Cents, tick: Tick) -> Result<(), TransactionError> {
        if amount <= 0 {
            return Err(TransactionError::InvalidAmount);
        }
        if self.remaining_amount == 0 {
            return Err(TransactionError::AlreadySettled);
        }
        if self.is_dropped() {
            return Err(TransactionError::TransactionDropped);
        }
        if amount > self.remaining_amount {
            return Err(TransactionError::AmountExceedsRemaining {
                amount,
                remaining: self.remaining_amount,
            });
        }

        self.remaining_amount -= amount;

        if self.remaining_amount == 0 {
            self.status = TransactionStatus::Settled { tick };
        } else if matches!(self.status, TransactionStatus::Pending) {
            self.status = TransactionStatus::PartiallySettled {
                first_settlement_tick: tick,
            };
        }
        // PartiallySettled keeps its first tick; Overdue stays Overdue
        // until the remainder clears.

        Ok(())
    }

    /// Propagate a child's settlement into this (parent) transaction.
    pub fn apply_child_settlement(
        &mut self,
        amount: Cents,
        tick: Tick,
    ) -> Result<(), TransactionError> {
        self.settle_netted(amount, tick)
    }

    /// Mark the transaction overdue. Returns true if newly marked.
    pub fn mark_overdue(&mut self, tick: Tick) -> bool {
        match self.status {
            TransactionStatus::Pending | TransactionStatus::PartiallySettled { .. } => {
                self.status = TransactionStatus::Overdue { since_tick: tick };
                true
            }
            _ => false,
        }
    }

    /// Drop the transaction (deadline policy, explicit Drop action).
    pub fn drop_transaction(&mut self, tick: Tick) {
        self.status = TransactionStatus::Dropped { tick };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(amount: Cents) -> Transaction {
        Transaction::new(
            "tx_00000001".to_string(),
            "BANK_A".to_string(),
            "BANK_B".to_string(),
            amount,
            0,
            10,
        )
    }

    #[test]
    fn test_priority_capped_at_10() {
        let t = tx(100_000).with_priority(255);
        assert_eq!(t.priority(), 10);
    }

    #[test]
    fn test_full_settlement() {
        let mut t = tx(100_000);
        t.settle(100_000, 5).unwrap();
        assert!(t.is_fully_settled());
        assert_eq!(t.settlement_tick(), Some(5));
        assert_eq!(t.settled_amount() + t.remaining_amount(), t.amount());
    }

    #[test]
    fn test_partial_settlement_requires_divisible() {
        let mut t = tx(100_000);
        assert_eq!(
            t.settle(40_000, 5),
            Err(TransactionError::IndivisibleTransaction)
        );

        let mut t = tx(100_000).divisible();
        t.settle(40_000, 5).unwrap();
        assert_eq!(t.remaining_amount(), 60_000);
        assert_eq!(
            t.status(),
            &TransactionStatus::PartiallySettled {
                first_settlement_tick: 5
            }
        );
    }

    #[test]
    fn test_netted_partial_ignores_divisibility() {
        let mut t = tx(8_000);
        t.settle_netted(6_000, 5).unwrap();
        assert_eq!(t.remaining_amount(), 2_000);
    }

    #[test]
    fn test_settle_exceeding_remaining_rejected() {
        let mut t = tx(100_000).divisible();
        assert!(matches!(
            t.settle(100_001, 5),
            Err(TransactionError::AmountExceedsRemaining { .. })
        ));
    }

    #[test]
    fn test_overdue_then_settled() {
        let mut t = tx(1_000);
        assert!(t.mark_overdue(3));
        assert!(!t.mark_overdue(4), "overdue marking is idempotent");
        assert_eq!(t.overdue_since(), Some(3));

        t.settle(1_000, 6).unwrap();
        assert_eq!(t.status(), &TransactionStatus::Settled { tick: 6 });
    }

    #[test]
    fn test_dropped_cannot_settle() {
        let mut t = tx(1_000);
        t.drop_transaction(2);
        assert_eq!(t.settle(1_000, 3), Err(TransactionError::TransactionDropped));
    }

    #[test]
    fn test_release_eligibility_gate() {
        let t = tx(1_000).with_earliest_release(7);
        assert!(!t.is_release_eligible(6));
        assert!(t.is_release_eligible(7));
        assert!(t.is_release_eligible(8));
    }

    #[test]
    fn test_deadline_equal_to_arrival_allowed() {
        let t = Transaction::new(
            "tx_00000002".to_string(),
            "BANK_A".to_string(),
            "BANK_B".to_string(),
            500,
            4,
            4,
        );
        assert_eq!(t.deadline_tick(), 4);
    }
}
