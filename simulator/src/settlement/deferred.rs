//! Deferred crediting.
//!
//! In standard RTGS a settled payment credits the receiver immediately,
//! so incoming funds can be recycled into outgoing payments within the
//! same tick. With deferred crediting enabled, credits accumulate in
//! this buffer during the tick and land on receiver balances only at
//! end of tick: funds received in period t become usable in t+1.

use crate::core::money::Cents;
use crate::models::event::EventBody;
use crate::models::state::SystemState;
use std::collections::BTreeMap;

/// Accumulates credits during a tick for an atomic end-of-tick flush.
#[derive(Debug, Default)]
pub struct DeferredCredits {
    /// agent_id -> (total amount, source transaction ids).
    /// BTreeMap so the flush order is deterministic.
    pending: BTreeMap<String, (Cents, Vec<String>)>,
}

impl DeferredCredits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a credit for an agent.
    pub fn accumulate(&mut self, agent_id: &str, amount: Cents, tx_id: &str) {
        let entry = self
            .pending
            .entry(agent_id.to_string())
            .or_insert((0, Vec::new()));
        entry.0 = entry.0.saturating_add(amount);
        entry.1.push(tx_id.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Total buffered credit for an agent (0 if none).
    pub fn total_for_agent(&self, agent_id: &str) -> Cents {
        self.pending.get(agent_id).map_or(0, |(amount, _)| *amount)
    }

    /// Apply all buffered credits in sorted agent order and clear the
    /// buffer. Returns one event body per credited agent.
    pub fn apply_all(&mut self, state: &mut SystemState) -> Vec<EventBody> {
        let mut events = Vec::new();

        for (agent_id, (amount, tx_ids)) in std::mem::take(&mut self.pending) {
            if let Some(agent) = state.get_agent_mut(&agent_id) {
                agent.credit(amount);
                events.push(EventBody::DeferredCreditApplied {
                    agent_id,
                    amount,
                    source_transactions: tx_ids,
                });
            }
        }

        events
    }
}
