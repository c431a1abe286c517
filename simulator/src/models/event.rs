//! Event logging for simulation replay and auditing.
//!
//! Every state-changing step of a tick appends a typed event. The log is
//! append-only and totally ordered by `event_id`, which is assigned in
//! emission order and doubles as the logical timestamp. Given identical
//! scenario bytes and seed, two runs produce byte-identical logs; the
//! SHA-256 digest makes that cheap to verify.
//!
//! # Event Types
//!
//! Events are grouped by tick phase: arrivals, policy decisions (release,
//! hold, drop, split, reprioritize, coercions, warnings), collateral
//! changes, LSM outcomes, settlements and rejections, deferred credits,
//! deadline misses, cost accrual, and day/tick boundaries.

use crate::core::money::Cents;
use crate::core::time::{Day, Tick};
use crate::costs::CostBreakdown;
use crate::models::agent::StateValue;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A simulation event: common header plus a typed body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Emission index; doubles as the logical timestamp
    pub event_id: u64,

    /// Simulation this event belongs to (from the scenario config)
    pub simulation_id: String,

    pub tick: Tick,

    pub day: Day,

    #[serde(flatten)]
    pub body: EventBody,
}

/// Typed event bodies. The serialized form carries the variant name in
/// an `event_type` field, fixing the per-type schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum EventBody {
    /// New transaction entered the sender's queue1
    Arrival {
        tx_id: String,
        sender_id: String,
        receiver_id: String,
        amount: Cents,
        deadline_tick: Tick,
        priority: u8,
        is_divisible: bool,
    },

    /// Payment tree released a transaction for settlement this tick
    PolicyRelease { agent_id: String, tx_id: String },

    /// Payment tree held a transaction in queue1
    PolicyHold { agent_id: String, tx_id: String },

    /// Payment tree dropped a transaction
    PolicyDrop {
        agent_id: String,
        tx_id: String,
        reason: String,
    },

    /// Payment tree split a transaction into children
    PolicySplit {
        agent_id: String,
        parent_id: String,
        num_splits: usize,
        child_ids: Vec<String>,
    },

    /// Payment tree changed a transaction's priority
    Reprioritized {
        agent_id: String,
        tx_id: String,
        old_priority: u8,
        new_priority: u8,
    },

    /// An action was rejected by state and demoted to a safe one
    ActionCoerced {
        agent_id: String,
        tx_id: Option<String>,
        requested: String,
        coerced_to: String,
        reason: String,
    },

    /// A policy expression failed to evaluate; the branch fell through
    /// to `on_false`
    PolicyEvaluationWarning {
        agent_id: String,
        tx_id: Option<String>,
        node_id: String,
        message: String,
    },

    /// Bank tree capped the value the agent may release this tick
    BankBudgetSet { agent_id: String, budget: Cents },

    /// Bank tree wrote a scratch register
    BankStateUpdated {
        agent_id: String,
        key: String,
        value: StateValue,
    },

    /// Agent posted collateral
    CollateralPosted {
        agent_id: String,
        amount: Cents,
        reason: String,
        new_total: Cents,
    },

    /// Agent withdrew collateral
    CollateralWithdrawn {
        agent_id: String,
        amount: Cents,
        new_total: Cents,
    },

    /// Gross settlement (full or partial) applied against balances
    Settlement {
        tx_id: String,
        sender_id: String,
        receiver_id: String,
        amount: Cents,
    },

    /// Settlement refused: it would breach the sender's overdraft limit
    SettlementRejected {
        tx_id: String,
        sender_id: String,
        required: Cents,
        available: Cents,
    },

    /// Opposing flows between two agents netted against each other
    LsmBilateralOffset {
        agent_a: String,
        agent_b: String,
        amount_a: Cents,
        amount_b: Cents,
        netted: Cents,
        tx_ids_a: Vec<String>,
        tx_ids_b: Vec<String>,
    },

    /// A payment cycle settled atomically
    LsmCycleSettlement {
        agents: Vec<String>,
        tx_ids: Vec<String>,
        tx_amounts: Vec<Cents>,
        net_positions: BTreeMap<String, Cents>,
        max_net_outflow: Cents,
        max_net_outflow_agent: String,
        total_value: Cents,
    },

    /// Buffered credits applied at end of tick (deferred crediting)
    DeferredCreditApplied {
        agent_id: String,
        amount: Cents,
        source_transactions: Vec<String>,
    },

    /// Transaction passed its deadline with value outstanding
    DeadlineMissed {
        agent_id: String,
        tx_id: String,
        penalty: Cents,
    },

    /// Costs accrued for an agent this tick
    CostAccrual {
        agent_id: String,
        costs: CostBreakdown,
    },

    /// End-of-day processing ran
    EndOfDay {
        unsettled_count: usize,
        total_penalties: Cents,
    },

    /// Tick boundary marker
    TickCompleted {
        arrivals: usize,
        settlements: usize,
        settled_value: Cents,
    },
}

impl Event {
    /// Short name of the event type.
    pub fn event_type(&self) -> &'static str {
        match &self.body {
            EventBody::Arrival { .. } => "Arrival",
            EventBody::PolicyRelease { .. } => "PolicyRelease",
            EventBody::PolicyHold { .. } => "PolicyHold",
            EventBody::PolicyDrop { .. } => "PolicyDrop",
            EventBody::PolicySplit { .. } => "PolicySplit",
            EventBody::Reprioritized { .. } => "Reprioritized",
            EventBody::ActionCoerced { .. } => "ActionCoerced",
            EventBody::PolicyEvaluationWarning { .. } => "PolicyEvaluationWarning",
            EventBody::BankBudgetSet { .. } => "BankBudgetSet",
            EventBody::BankStateUpdated { .. } => "BankStateUpdated",
            EventBody::CollateralPosted { .. } => "CollateralPosted",
            EventBody::CollateralWithdrawn { .. } => "CollateralWithdrawn",
            EventBody::Settlement { .. } => "Settlement",
            EventBody::SettlementRejected { .. } => "SettlementRejected",
            EventBody::LsmBilateralOffset { .. } => "LsmBilateralOffset",
            EventBody::LsmCycleSettlement { .. } => "LsmCycleSettlement",
            EventBody::DeferredCreditApplied { .. } => "DeferredCreditApplied",
            EventBody::DeadlineMissed { .. } => "DeadlineMissed",
            EventBody::CostAccrual { .. } => "CostAccrual",
            EventBody::EndOfDay { .. } => "EndOfDay",
            EventBody::TickCompleted { .. } => "TickCompleted",
        }
    }

    /// Transaction id, if the event concerns a single transaction.
    pub fn tx_id(&self) -> Option<&str> {
        match &self.body {
            EventBody::Arrival { tx_id, .. }
            | EventBody::PolicyRelease { tx_id, .. }
            | EventBody::PolicyHold { tx_id, .. }
            | EventBody::PolicyDrop { tx_id, .. }
            | EventBody::Reprioritized { tx_id, .. }
            | EventBody::Settlement { tx_id, .. }
            | EventBody::SettlementRejected { tx_id, .. }
            | EventBody::DeadlineMissed { tx_id, .. } => Some(tx_id),
            EventBody::PolicySplit { parent_id, .. } => Some(parent_id),
            EventBody::ActionCoerced { tx_id, .. }
            | EventBody::PolicyEvaluationWarning { tx_id, .. } => tx_id.as_deref(),
            _ => None,
        }
    }

    /// Agent id, if the event concerns a single agent.
    pub fn agent_id(&self) -> Option<&str> {
        match &self.body {
            EventBody::Arrival { sender_id, .. }
            | EventBody::Settlement { sender_id, .. }
            | EventBody::SettlementRejected { sender_id, .. } => Some(sender_id),
            EventBody::PolicyRelease { agent_id, .. }
            | EventBody::PolicyHold { agent_id, .. }
            | EventBody::PolicyDrop { agent_id, .. }
            | EventBody::PolicySplit { agent_id, .. }
            | EventBody::Reprioritized { agent_id, .. }
            | EventBody::ActionCoerced { agent_id, .. }
            | EventBody::PolicyEvaluationWarning { agent_id, .. }
            | EventBody::BankBudgetSet { agent_id, .. }
            | EventBody::BankStateUpdated { agent_id, .. }
            | EventBody::CollateralPosted { agent_id, .. }
            | EventBody::CollateralWithdrawn { agent_id, .. }
            | EventBody::DeferredCreditApplied { agent_id, .. }
            | EventBody::DeadlineMissed { agent_id, .. }
            | EventBody::CostAccrual { agent_id, .. } => Some(agent_id),
            _ => None,
        }
    }
}

/// Append-only, totally ordered event log.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    simulation_id: String,
    events: Vec<Event>,
    next_event_id: u64,
}

impl EventLog {
    pub fn new(simulation_id: String) -> Self {
        Self {
            simulation_id,
            events: Vec::new(),
            next_event_id: 0,
        }
    }

    pub fn simulation_id(&self) -> &str {
        &self.simulation_id
    }

    /// Append an event body, assigning the next emission index.
    pub fn append(&mut self, tick: Tick, day: Day, body: EventBody) {
        let event = Event {
            event_id: self.next_event_id,
            simulation_id: self.simulation_id.clone(),
            tick,
            day,
            body,
        };
        self.next_event_id += 1;
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn events_at_tick(&self, tick: Tick) -> Vec<&Event> {
        self.events.iter().filter(|e| e.tick == tick).collect()
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    pub fn events_for_tx(&self, tx_id: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.tx_id() == Some(tx_id))
            .collect()
    }

    pub fn events_for_agent(&self, agent_id: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.agent_id() == Some(agent_id))
            .collect()
    }

    /// SHA-256 hex digest of the serialized event stream.
    ///
    /// Two runs of the same scenario and seed produce equal digests.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for event in &self.events {
            let line = serde_json::to_string(event).expect("events serialize");
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}
