//! System State
//!
//! `SystemState` exclusively owns every agent and transaction record.
//! Queues and parent/child links hold transaction ids only; the
//! transaction store is authoritative. All containers iterated during a
//! tick are BTreeMaps or sorted vectors, so iteration order is
//! deterministic.
//!
//! # Critical Invariants
//!
//! 1. Sum of balances changes only through externally injected liquidity
//!    (opening balances); settlements and netting conserve it.
//! 2. For every transaction: settled + remaining = original.
//! 3. Every agent stays within `-(unsecured_cap + posted_collateral)`.
//! 4. Posted collateral stays within `[0, max_collateral_capacity]`.

use crate::core::money::Cents;
use crate::core::time::Tick;
use crate::models::agent::Agent;
use crate::models::event::EventLog;
use crate::models::transaction::{Transaction, TransactionError};
use std::collections::BTreeMap;

/// Complete simulation state: agents, transactions, and the event log.
#[derive(Debug, Clone)]
pub struct SystemState {
    /// All agents, indexed by id (sorted iteration)
    agents: BTreeMap<String, Agent>,

    /// All transactions, indexed by id (sorted iteration)
    transactions: BTreeMap<String, Transaction>,

    /// Append-only event log
    event_log: EventLog,

    /// Sum of opening balances, fixed at construction; the conservation
    /// baseline for invariant checks
    opening_total_balance: Cents,
}

impl SystemState {
    /// Create a state owning the given agents.
    pub fn new(agents: Vec<Agent>, simulation_id: String) -> Self {
        let opening_total_balance = agents.iter().map(|a| a.balance()).sum();
        let agents_map = agents
            .into_iter()
            .map(|agent| (agent.id().to_string(), agent))
            .collect();

        Self {
            agents: agents_map,
            transactions: BTreeMap::new(),
            event_log: EventLog::new(simulation_id),
            opening_total_balance,
        }
    }

    // ========================================================================
    // Agents
    // ========================================================================

    pub fn get_agent(&self, id: &str) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn get_agent_mut(&mut self, id: &str) -> Option<&mut Agent> {
        self.agents.get_mut(id)
    }

    pub fn agents(&self) -> &BTreeMap<String, Agent> {
        &self.agents
    }

    /// All agent ids in lexicographic order (the canonical tie-breaker).
    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    pub fn get_transaction(&self, id: &str) -> Option<&Transaction> {
        self.transactions.get(id)
    }

    pub fn get_transaction_mut(&mut self, id: &str) -> Option<&mut Transaction> {
        self.transactions.get_mut(id)
    }

    pub fn transactions(&self) -> &BTreeMap<String, Transaction> {
        &self.transactions
    }

    pub fn num_transactions(&self) -> usize {
        self.transactions.len()
    }

    /// Add a transaction to the store.
    ///
    /// # Panics
    /// Panics on a duplicate id; ids are minted from a counter and must
    /// never collide.
    pub fn add_transaction(&mut self, transaction: Transaction) {
        let id = transaction.id().to_string();
        assert!(
            !self.transactions.contains_key(&id),
            "Transaction ID {} already exists",
            id
        );
        self.transactions.insert(id, transaction);
    }

    /// Settle value against a transaction and propagate it up the split
    /// parent chain, so a parent's settled amount always mirrors its
    /// children's.
    pub fn record_settlement(
        &mut self,
        tx_id: &str,
        amount: Cents,
        tick: Tick,
        netted: bool,
    ) -> Result<(), TransactionError> {
        let parent_id = {
            let tx = self
                .transactions
                .get_mut(tx_id)
                .expect("settling unknown transaction");
            if netted {
                tx.settle_netted(amount, tick)?;
            } else {
                tx.settle(amount, tick)?;
            }
            tx.parent_id().map(str::to_string)
        };

        let mut current = parent_id;
        while let Some(pid) = current {
            let parent = self
                .transactions
                .get_mut(&pid)
                .expect("split parent missing from store");
            parent.apply_child_settlement(amount, tick)?;
            current = parent.parent_id().map(str::to_string);
        }
        Ok(())
    }

    /// Recursive settlement check: a transaction is effectively settled
    /// iff it is fully settled itself, or it was split and every child
    /// is effectively settled.
    pub fn effectively_settled(&self, tx_id: &str) -> bool {
        let Some(tx) = self.transactions.get(tx_id) else {
            return false;
        };
        if tx.is_split_parent() {
            tx.child_ids().iter().all(|c| self.effectively_settled(c))
        } else {
            tx.is_fully_settled()
        }
    }

    // ========================================================================
    // Aggregates
    // ========================================================================

    /// Sum of all agent balances.
    pub fn total_balance(&self) -> Cents {
        self.agents.values().map(|a| a.balance()).sum()
    }

    /// Sum of all posted collateral.
    pub fn total_posted_collateral(&self) -> Cents {
        self.agents.values().map(|a| a.posted_collateral()).sum()
    }

    /// Opening total balance (conservation baseline).
    pub fn opening_total_balance(&self) -> Cents {
        self.opening_total_balance
    }

    /// Remaining value in one agent's queue1.
    pub fn agent_queue_value(&self, agent_id: &str) -> Cents {
        self.agents.get(agent_id).map_or(0, |agent| {
            agent
                .outgoing_queue()
                .iter()
                .filter_map(|tx_id| self.transactions.get(tx_id))
                .map(|tx| tx.remaining_amount())
                .sum()
        })
    }

    /// Number of transactions across all queue1s.
    pub fn total_queue1_size(&self) -> usize {
        self.agents.values().map(|a| a.outgoing_queue_size()).sum()
    }

    /// Remaining value across all queue1s.
    pub fn total_queue1_value(&self) -> Cents {
        self.agents
            .keys()
            .map(|id| self.agent_queue_value(id))
            .sum()
    }

    // ========================================================================
    // Event log
    // ========================================================================

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn event_log_mut(&mut self) -> &mut EventLog {
        &mut self.event_log
    }

    // ========================================================================
    // Invariant checking (debug builds)
    // ========================================================================

    /// Abort on any violated invariant. Silent corruption is worse than
    /// crashing in a research tool; the engine runs this after every
    /// tick in debug builds.
    pub fn assert_invariants(&self) {
        assert_eq!(
            self.total_balance(),
            self.opening_total_balance,
            "balance conservation violated"
        );

        for (id, agent) in &self.agents {
            assert!(
                agent.balance() >= -agent.overdraft_limit(),
                "agent {} breached overdraft limit: balance {} < -{}",
                id,
                agent.balance(),
                agent.overdraft_limit()
            );
            assert!(
                agent.posted_collateral() >= 0
                    && agent.posted_collateral() <= agent.max_collateral_capacity(),
                "agent {} collateral out of range",
                id
            );
            for tx_id in agent.outgoing_queue() {
                assert!(
                    self.transactions.contains_key(tx_id),
                    "queue1 of {} references unknown transaction {}",
                    id,
                    tx_id
                );
            }
        }

        for (id, tx) in &self.transactions {
            assert_eq!(
                tx.settled_amount() + tx.remaining_amount(),
                tx.amount(),
                "transaction {} amount partition violated",
                id
            );
            assert!(
                tx.remaining_amount() >= 0,
                "transaction {} negative remaining",
                id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_agents() -> SystemState {
        let agents = vec![
            Agent::new("BANK_A".to_string(), 1_000_000, 0, 0),
            Agent::new("BANK_B".to_string(), 2_000_000, 0, 0),
        ];
        SystemState::new(agents, "test".to_string())
    }

    fn tx(id: &str, amount: Cents) -> Transaction {
        Transaction::new(
            id.to_string(),
            "BANK_A".to_string(),
            "BANK_B".to_string(),
            amount,
            0,
            100,
        )
    }

    #[test]
    fn test_new_state() {
        let state = state_with_agents();
        assert_eq!(state.num_agents(), 2);
        assert_eq!(state.num_transactions(), 0);
        assert_eq!(state.total_balance(), 3_000_000);
        assert_eq!(state.opening_total_balance(), 3_000_000);
    }

    #[test]
    fn test_agent_ids_sorted() {
        let agents = vec![
            Agent::new("BANK_C".to_string(), 0, 0, 0),
            Agent::new("BANK_A".to_string(), 0, 0, 0),
            Agent::new("BANK_B".to_string(), 0, 0, 0),
        ];
        let state = SystemState::new(agents, "test".to_string());
        assert_eq!(state.agent_ids(), vec!["BANK_A", "BANK_B", "BANK_C"]);
    }

    #[test]
    #[should_panic(expected = "already exists")]
    fn test_duplicate_transaction_panics() {
        let mut state = state_with_agents();
        state.add_transaction(tx("tx_1", 100));
        state.add_transaction(tx("tx_1", 200));
    }

    #[test]
    fn test_queue_value() {
        let mut state = state_with_agents();
        state.add_transaction(tx("tx_1", 1_000_000));
        state.add_transaction(tx("tx_2", 2_000_000));
        let agent = state.get_agent_mut("BANK_A").unwrap();
        agent.queue_outgoing("tx_1".to_string());
        agent.queue_outgoing("tx_2".to_string());

        assert_eq!(state.agent_queue_value("BANK_A"), 3_000_000);
        assert_eq!(state.total_queue1_size(), 2);
        assert_eq!(state.total_queue1_value(), 3_000_000);
    }

    #[test]
    fn test_effectively_settled_through_splits() {
        let mut state = state_with_agents();
        let mut parent = tx("tx_parent", 10_000);
        parent.set_children(vec!["tx_c1".to_string(), "tx_c2".to_string()]);
        state.add_transaction(parent);
        state.add_transaction(tx("tx_c1", 6_000).with_parent("tx_parent".to_string()));
        state.add_transaction(tx("tx_c2", 4_000).with_parent("tx_parent".to_string()));

        assert!(!state.effectively_settled("tx_parent"));

        state.record_settlement("tx_c1", 6_000, 3, false).unwrap();
        assert!(!state.effectively_settled("tx_parent"));
        assert_eq!(
            state.get_transaction("tx_parent").unwrap().settled_amount(),
            6_000
        );

        state.record_settlement("tx_c2", 4_000, 4, false).unwrap();
        assert!(state.effectively_settled("tx_parent"));
        assert!(state.get_transaction("tx_parent").unwrap().is_fully_settled());
    }

    #[test]
    fn test_invariants_pass_on_fresh_state() {
        let state = state_with_agents();
        state.assert_invariants();
    }
}
