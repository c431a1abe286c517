//! RTGS (Real-Time Gross Settlement) engine.
//!
//! Settles one payment at a time against central-bank balances:
//!
//! 1. Check the sender's liquidity envelope (balance + unsecured cap +
//!    posted collateral).
//! 2. Debit the sender.
//! 3. Credit the receiver, either immediately or into the deferred
//!    buffer when deferred crediting is enabled.
//! 4. Mark the transaction settled and propagate through split parents.
//!
//! # Critical Invariants
//!
//! - Debit and credit happen together or not at all; a rejected
//!   settlement changes no state.
//! - Total balance is conserved (deferred credits land within the tick).
//! - A settlement that would push the sender below
//!   `-(unsecured_cap + posted_collateral)` is rejected, never clamped.

use crate::core::money::Cents;
use crate::core::time::Tick;
use crate::models::state::SystemState;
use crate::models::transaction::TransactionError;
use crate::settlement::deferred::DeferredCredits;
use thiserror::Error;

/// Errors that can occur during RTGS settlement
#[derive(Debug, Error, PartialEq)]
pub enum SettlementError {
    #[error("Insufficient liquidity: required {required}, available {available}")]
    InsufficientLiquidity { required: Cents, available: Cents },

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
}

/// Attempt to settle the full remaining amount of a transaction.
///
/// On success returns the settled amount. On rejection no state
/// changes; the caller keeps the transaction pending and emits a
/// `SettlementRejected` event.
///
/// When `deferred` is provided, the receiver's credit is buffered and
/// applied at end of tick instead of immediately.
///
/// # Panics
/// Panics if the transaction or either agent is missing from the state;
/// the orchestrator only settles ids it has just looked up.
pub fn try_settle(
    state: &mut SystemState,
    tx_id: &str,
    tick: Tick,
    mut deferred: Option<&mut DeferredCredits>,
) -> Result<Cents, SettlementError> {
    let (sender_id, receiver_id, amount) = {
        let tx = state
            .get_transaction(tx_id)
            .expect("settling unknown transaction");
        (
            tx.sender_id().to_string(),
            tx.receiver_id().to_string(),
            tx.remaining_amount(),
        )
    };

    {
        let sender = state
            .get_agent_mut(&sender_id)
            .expect("settling for unknown sender");
        if !sender.can_pay(amount) {
            return Err(SettlementError::InsufficientLiquidity {
                required: amount,
                available: sender.effective_liquidity(),
            });
        }
        sender
            .debit(amount)
            .expect("debit follows a successful can_pay");
    }

    match deferred.as_deref_mut() {
        Some(buffer) => buffer.accumulate(&receiver_id, amount, tx_id),
        None => state
            .get_agent_mut(&receiver_id)
            .expect("settling for unknown receiver")
            .credit(amount),
    }

    state.record_settlement(tx_id, amount, tick, false)?;
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Agent, Transaction};

    fn state_with(balance_a: Cents, cap_a: Cents) -> SystemState {
        let agents = vec![
            Agent::new("BANK_A".to_string(), balance_a, cap_a, 0),
            Agent::new("BANK_B".to_string(), 0, 0, 0),
        ];
        SystemState::new(agents, "test".to_string())
    }

    fn add_tx(state: &mut SystemState, id: &str, amount: Cents) {
        state.add_transaction(Transaction::new(
            id.to_string(),
            "BANK_A".to_string(),
            "BANK_B".to_string(),
            amount,
            0,
            100,
        ));
    }

    #[test]
    fn test_settle_basic() {
        let mut state = state_with(1_000_000, 0);
        add_tx(&mut state, "tx_1", 500_000);

        let settled = try_settle(&mut state, "tx_1", 5, None).unwrap();
        assert_eq!(settled, 500_000);
        assert_eq!(state.get_agent("BANK_A").unwrap().balance(), 500_000);
        assert_eq!(state.get_agent("BANK_B").unwrap().balance(), 500_000);
        assert!(state.get_transaction("tx_1").unwrap().is_fully_settled());
    }

    #[test]
    fn test_settle_into_overdraft() {
        let mut state = state_with(300_000, 500_000);
        add_tx(&mut state, "tx_1", 600_000);

        try_settle(&mut state, "tx_1", 5, None).unwrap();
        assert_eq!(state.get_agent("BANK_A").unwrap().balance(), -300_000);
        assert_eq!(state.get_agent("BANK_B").unwrap().balance(), 600_000);
    }

    #[test]
    fn test_rejection_leaves_state_unchanged() {
        let mut state = state_with(300_000, 500_000);
        add_tx(&mut state, "tx_1", 900_000);

        let err = try_settle(&mut state, "tx_1", 5, None).unwrap_err();
        assert_eq!(
            err,
            SettlementError::InsufficientLiquidity {
                required: 900_000,
                available: 800_000
            }
        );
        assert_eq!(state.get_agent("BANK_A").unwrap().balance(), 300_000);
        assert_eq!(state.get_agent("BANK_B").unwrap().balance(), 0);
        assert!(state.get_transaction("tx_1").unwrap().is_outstanding());
    }

    #[test]
    fn test_exact_limit_boundary() {
        let mut state = state_with(0, 500);
        add_tx(&mut state, "tx_1", 500);
        add_tx(&mut state, "tx_2", 1);

        try_settle(&mut state, "tx_1", 5, None).unwrap();
        assert_eq!(state.get_agent("BANK_A").unwrap().balance(), -500);

        // One cent past the limit is rejected
        assert!(try_settle(&mut state, "tx_2", 5, None).is_err());
    }

    #[test]
    fn test_deferred_credit_buffers_receiver() {
        let mut state = state_with(1_000_000, 0);
        add_tx(&mut state, "tx_1", 400_000);
        let mut buffer = DeferredCredits::new();

        try_settle(&mut state, "tx_1", 5, Some(&mut buffer)).unwrap();
        assert_eq!(state.get_agent("BANK_A").unwrap().balance(), 600_000);
        assert_eq!(
            state.get_agent("BANK_B").unwrap().balance(),
            0,
            "credit deferred to end of tick"
        );
        assert_eq!(buffer.total_for_agent("BANK_B"), 400_000);
    }
}
