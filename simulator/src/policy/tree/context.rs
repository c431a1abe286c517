// Evaluation context.
//
// Builds the typed field table a decision tree evaluates against. Agent
// and time fields are available to every tree; transaction fields only
// to the payment tree. Monetary fields are Int cents throughout; no
// money value passes through f64 on its way into a policy.

use crate::core::money::{scale_by_bps, Cents};
use crate::core::time::TimeManager;
use crate::costs::CostRates;
use crate::models::agent::{Agent, StateValue};
use crate::models::state::SystemState;
use crate::models::transaction::Transaction;
use crate::policy::tree::types::Scalar;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised when resolving a context field
#[derive(Debug, Error, PartialEq)]
pub enum ContextError {
    #[error("Field '{0}' not found in evaluation context")]
    FieldNotFound(String),
}

/// Field table for one policy evaluation.
///
/// # Field Categories
///
/// **Agent/time fields (all trees)**: `balance`, `effective_liquidity`,
/// `credit_limit`, `unsecured_cap`, `posted_collateral`,
/// `max_collateral_capacity`, `remaining_collateral_capacity`,
/// `queue1_size`, `queue1_value`, `queue1_total_value`, `queue2_size`,
/// `queue2_value`, `outgoing_queue_size`, `current_tick`,
/// `ticks_per_day`, `ticks_to_eod`, `system_tick_in_day`,
/// `ticks_remaining_in_day`.
///
/// **Transaction fields (payment tree only)**: `amount`,
/// `remaining_amount`, `priority`, `ticks_to_deadline`, `is_overdue`,
/// `ticks_overdue`, `is_divisible`, `arrival_tick`, `deadline_tick`,
/// `cost_delay_this_tx_one_tick`, `cost_overdraft_this_amount_one_tick`,
/// `cost_deadline_penalty`.
///
/// **Bank scratch**: `bank_state_<key>`; missing registers read as 0.
#[derive(Debug, Clone)]
pub struct EvalContext {
    fields: BTreeMap<String, Scalar>,
}

impl EvalContext {
    /// Build the agent/time context shared by all trees.
    ///
    /// `staged_count`/`staged_value` describe the release set already
    /// assembled this tick (queue2): zero during strategic collateral
    /// evaluation, growing during payment evaluation.
    pub fn bank_level(
        agent: &Agent,
        state: &SystemState,
        time: &TimeManager,
        staged_count: usize,
        staged_value: Cents,
    ) -> Self {
        let mut fields = BTreeMap::new();
        let int = Scalar::Int;

        // Agent balance sheet
        fields.insert("balance".to_string(), int(agent.balance()));
        fields.insert(
            "effective_liquidity".to_string(),
            int(agent.effective_liquidity()),
        );
        fields.insert("credit_limit".to_string(), int(agent.unsecured_cap()));
        fields.insert("unsecured_cap".to_string(), int(agent.unsecured_cap()));
        fields.insert(
            "posted_collateral".to_string(),
            int(agent.posted_collateral()),
        );
        fields.insert(
            "max_collateral_capacity".to_string(),
            int(agent.max_collateral_capacity()),
        );
        fields.insert(
            "remaining_collateral_capacity".to_string(),
            int(agent.remaining_collateral_capacity()),
        );

        // Queues
        let queue1_size = agent.outgoing_queue_size();
        fields.insert("queue1_size".to_string(), int(queue1_size as i64));
        fields.insert(
            "outgoing_queue_size".to_string(),
            int(queue1_size as i64),
        );
        fields.insert(
            "queue1_value".to_string(),
            int(state.agent_queue_value(agent.id())),
        );
        fields.insert(
            "queue1_total_value".to_string(),
            int(state.total_queue1_value()),
        );
        fields.insert("queue2_size".to_string(), int(staged_count as i64));
        fields.insert("queue2_value".to_string(), int(staged_value));

        // Time
        fields.insert("current_tick".to_string(), int(time.current_tick() as i64));
        fields.insert(
            "ticks_per_day".to_string(),
            int(time.ticks_per_day() as i64),
        );
        fields.insert("ticks_to_eod".to_string(), int(time.ticks_to_eod() as i64));
        fields.insert(
            "system_tick_in_day".to_string(),
            int(time.tick_in_day() as i64),
        );
        fields.insert(
            "ticks_remaining_in_day".to_string(),
            int(time.ticks_remaining_in_day() as i64),
        );

        // Bank scratch registers
        for (key, value) in agent.bank_state() {
            let scalar = match value {
                StateValue::Int(v) => Scalar::Int(*v),
                StateValue::Str(s) => Scalar::Str(s.clone()),
            };
            fields.insert(format!("bank_state_{}", key), scalar);
        }

        Self { fields }
    }

    /// Build the payment-tree context: the bank-level fields plus the
    /// transaction under evaluation.
    pub fn for_transaction(
        tx: &Transaction,
        agent: &Agent,
        state: &SystemState,
        time: &TimeManager,
        rates: &CostRates,
        staged_count: usize,
        staged_value: Cents,
    ) -> Self {
        let mut ctx = Self::bank_level(agent, state, time, staged_count, staged_value);
        let fields = &mut ctx.fields;
        let int = Scalar::Int;
        let tick = time.current_tick();

        fields.insert("amount".to_string(), int(tx.amount()));
        fields.insert("remaining_amount".to_string(), int(tx.remaining_amount()));
        fields.insert("priority".to_string(), int(tx.priority() as i64));
        fields.insert("arrival_tick".to_string(), int(tx.arrival_tick() as i64));
        fields.insert("deadline_tick".to_string(), int(tx.deadline_tick() as i64));
        fields.insert(
            "is_divisible".to_string(),
            int(if tx.is_divisible() { 1 } else { 0 }),
        );

        // A transaction is overdue from its deadline tick onward
        let ticks_to_deadline = tx.deadline_tick() as i64 - tick as i64;
        fields.insert("ticks_to_deadline".to_string(), int(ticks_to_deadline));
        let overdue = tick >= tx.deadline_tick() && !tx.is_fully_settled();
        fields.insert("is_overdue".to_string(), int(if overdue { 1 } else { 0 }));
        let ticks_overdue = if overdue {
            (tick - tx.deadline_tick()) as i64
        } else {
            0
        };
        fields.insert("ticks_overdue".to_string(), int(ticks_overdue));

        // One-tick cost previews for cost-aware policies
        fields.insert(
            "cost_delay_this_tx_one_tick".to_string(),
            int(scale_by_bps(
                tx.remaining_amount(),
                rates.delay_cost_per_tick_bps,
            )),
        );
        fields.insert(
            "cost_overdraft_this_amount_one_tick".to_string(),
            int(scale_by_bps(
                tx.remaining_amount(),
                rates.overdraft_cost_per_tick_bps,
            )),
        );
        fields.insert(
            "cost_deadline_penalty".to_string(),
            int(scale_by_bps(
                tx.remaining_amount(),
                rates.deadline_penalty_bps,
            )),
        );

        ctx
    }

    /// Resolve a field by name.
    ///
    /// Unknown `bank_state_*` names resolve to integer 0 (reading an
    /// unwritten register); any other unknown name is an error.
    pub fn get_field(&self, name: &str) -> Result<Scalar, ContextError> {
        if let Some(value) = self.fields.get(name) {
            return Ok(value.clone());
        }
        if name.starts_with("bank_state_") {
            return Ok(Scalar::Int(0));
        }
        Err(ContextError::FieldNotFound(name.to_string()))
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// All field names, sorted (for debugging).
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(|s| s.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Agent;

    fn fixture() -> (SystemState, TimeManager, CostRates) {
        let agents = vec![
            Agent::new("BANK_A".to_string(), 500_000, 200_000, 50_000),
            Agent::new("BANK_B".to_string(), 0, 0, 0),
        ];
        let state = SystemState::new(agents, "test".to_string());
        let time = TimeManager::new(100, 1);
        (state, time, CostRates::default())
    }

    #[test]
    fn test_bank_level_fields() {
        let (state, time, _rates) = fixture();
        let agent = state.get_agent("BANK_A").unwrap();
        let ctx = EvalContext::bank_level(agent, &state, &time, 0, 0);

        assert_eq!(ctx.get_field("balance").unwrap(), Scalar::Int(500_000));
        assert_eq!(ctx.get_field("credit_limit").unwrap(), Scalar::Int(200_000));
        assert_eq!(
            ctx.get_field("effective_liquidity").unwrap(),
            Scalar::Int(700_000)
        );
        assert_eq!(
            ctx.get_field("remaining_collateral_capacity").unwrap(),
            Scalar::Int(50_000)
        );
        assert_eq!(ctx.get_field("ticks_per_day").unwrap(), Scalar::Int(100));
        assert_eq!(ctx.get_field("ticks_to_eod").unwrap(), Scalar::Int(100));
        assert!(!ctx.has_field("amount"), "tx fields absent at bank level");
    }

    #[test]
    fn test_transaction_fields() {
        let (mut state, time, rates) = fixture();
        let tx = Transaction::new(
            "tx_00000001".to_string(),
            "BANK_A".to_string(),
            "BANK_B".to_string(),
            100_000,
            0,
            50,
        );
        state.add_transaction(tx.clone());
        let agent = state.get_agent("BANK_A").unwrap();
        let ctx = EvalContext::for_transaction(&tx, agent, &state, &time, &rates, 0, 0);

        assert_eq!(ctx.get_field("amount").unwrap(), Scalar::Int(100_000));
        assert_eq!(ctx.get_field("ticks_to_deadline").unwrap(), Scalar::Int(50));
        assert_eq!(ctx.get_field("is_overdue").unwrap(), Scalar::Int(0));
        // default rates: delay 1 bps of 100_000 = 10
        assert_eq!(
            ctx.get_field("cost_delay_this_tx_one_tick").unwrap(),
            Scalar::Int(10)
        );
    }

    #[test]
    fn test_overdue_at_deadline_tick() {
        let (state, mut time, rates) = fixture();
        let tx = Transaction::new(
            "tx_00000001".to_string(),
            "BANK_A".to_string(),
            "BANK_B".to_string(),
            1_000,
            0,
            3,
        );
        for _ in 0..3 {
            time.advance_tick();
        }
        let agent = state.get_agent("BANK_A").unwrap();
        let ctx = EvalContext::for_transaction(&tx, agent, &state, &time, &rates, 0, 0);

        assert_eq!(ctx.get_field("is_overdue").unwrap(), Scalar::Int(1));
        assert_eq!(ctx.get_field("ticks_overdue").unwrap(), Scalar::Int(0));
        assert_eq!(ctx.get_field("ticks_to_deadline").unwrap(), Scalar::Int(0));
    }

    #[test]
    fn test_bank_state_registers() {
        let (mut state, time, _rates) = fixture();
        state
            .get_agent_mut("BANK_A")
            .unwrap()
            .set_state("regime".to_string(), StateValue::Str("tight".to_string()));
        state.get_agent_mut("BANK_A").unwrap().add_state("count", 3);

        let agent = state.get_agent("BANK_A").unwrap();
        let ctx = EvalContext::bank_level(agent, &state, &time, 0, 0);

        assert_eq!(
            ctx.get_field("bank_state_regime").unwrap(),
            Scalar::Str("tight".to_string())
        );
        assert_eq!(ctx.get_field("bank_state_count").unwrap(), Scalar::Int(3));
        // unwritten registers read as zero
        assert_eq!(ctx.get_field("bank_state_other").unwrap(), Scalar::Int(0));
    }

    #[test]
    fn test_unknown_field_is_error() {
        let (state, time, _rates) = fixture();
        let agent = state.get_agent("BANK_A").unwrap();
        let ctx = EvalContext::bank_level(agent, &state, &time, 0, 0);
        assert_eq!(
            ctx.get_field("nonexistent"),
            Err(ContextError::FieldNotFound("nonexistent".to_string()))
        );
    }
}
