//! Cost accounting and metrics aggregation.
//!
//! All rates are integer basis points of integer cents; every product
//! truncates toward zero via `core::money::scale_by_bps`. No cost path
//! touches floating point.

use crate::core::money::Cents;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cost rate configuration.
///
/// Rates are basis points per tick applied to the relevant cent base
/// (queued value, overdraft, posted collateral, remaining amount), plus
/// a flat friction charge per split part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRates {
    /// Delay cost in bps of remaining amount, per pending tick
    #[serde(default)]
    pub delay_cost_per_tick_bps: i64,

    /// Overdraft cost in bps of the overdraft in use, per tick
    #[serde(default)]
    pub overdraft_cost_per_tick_bps: i64,

    /// Collateral opportunity cost in bps of posted collateral, per tick
    #[serde(default)]
    pub collateral_cost_per_tick_bps: i64,

    /// One-off penalty in bps of remaining amount when a transaction
    /// becomes overdue
    #[serde(default)]
    pub deadline_penalty_bps: i64,

    /// End-of-day penalty in bps of remaining amount for transactions
    /// still unsettled at the day boundary
    #[serde(default)]
    pub eod_penalty_bps: i64,

    /// Flat friction cost per additional split part (cents)
    #[serde(default)]
    pub split_friction: Cents,
}

impl Default for CostRates {
    fn default() -> Self {
        Self {
            delay_cost_per_tick_bps: 1,
            overdraft_cost_per_tick_bps: 10,
            collateral_cost_per_tick_bps: 2,
            deadline_penalty_bps: 500,
            eod_penalty_bps: 1_000,
            split_friction: 1_000,
        }
    }
}

/// Cost breakdown for a single tick and agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub delay_cost: Cents,
    pub overdraft_cost: Cents,
    pub collateral_cost: Cents,
    pub deadline_penalty_cost: Cents,
    pub eod_penalty_cost: Cents,
    pub split_friction_cost: Cents,
}

impl CostBreakdown {
    /// Total cost across all categories.
    pub fn total(&self) -> Cents {
        self.delay_cost
            + self.overdraft_cost
            + self.collateral_cost
            + self.deadline_penalty_cost
            + self.eod_penalty_cost
            + self.split_friction_cost
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }
}

/// Accumulated costs for one agent over the whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostAccumulator {
    pub total_delay_cost: Cents,
    pub total_overdraft_cost: Cents,
    pub total_collateral_cost: Cents,
    pub total_deadline_penalty_cost: Cents,
    pub total_eod_penalty_cost: Cents,
    pub total_split_friction_cost: Cents,

    /// Most negative balance observed (0 if never negative)
    pub peak_net_debit: Cents,
}

impl CostAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a tick's breakdown into the running totals.
    pub fn add(&mut self, costs: &CostBreakdown) {
        self.total_delay_cost = self.total_delay_cost.saturating_add(costs.delay_cost);
        self.total_overdraft_cost = self.total_overdraft_cost.saturating_add(costs.overdraft_cost);
        self.total_collateral_cost = self
            .total_collateral_cost
            .saturating_add(costs.collateral_cost);
        self.total_deadline_penalty_cost = self
            .total_deadline_penalty_cost
            .saturating_add(costs.deadline_penalty_cost);
        self.total_eod_penalty_cost = self
            .total_eod_penalty_cost
            .saturating_add(costs.eod_penalty_cost);
        self.total_split_friction_cost = self
            .total_split_friction_cost
            .saturating_add(costs.split_friction_cost);
    }

    /// Track the deepest overdraft observed.
    pub fn update_peak_debit(&mut self, balance: Cents) {
        if balance < self.peak_net_debit {
            self.peak_net_debit = balance;
        }
    }

    /// Total cost across all categories.
    pub fn total(&self) -> Cents {
        self.total_delay_cost
            + self.total_overdraft_cost
            + self.total_collateral_cost
            + self.total_deadline_penalty_cost
            + self.total_eod_penalty_cost
            + self.total_split_friction_cost
    }
}

/// Point-in-time metrics snapshot returned by `current_metrics()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    /// Per-agent accumulated costs, keyed by agent id
    pub per_agent: BTreeMap<String, CostAccumulator>,

    /// Sum of all per-agent totals
    pub system_total_cost: Cents,

    /// Transactions that arrived with no parent (split children excluded)
    pub original_arrivals: u64,

    /// Originals that are effectively settled (recursively through splits)
    pub effectively_settled_originals: u64,

    /// `effectively_settled_originals / original_arrivals`; 0 when no
    /// originals have arrived. Always <= 1.0.
    pub settlement_rate: f64,
}

impl MetricsReport {
    pub fn agent_total(&self, agent_id: &str) -> Cents {
        self.per_agent.get(agent_id).map_or(0, |acc| acc.total())
    }
}
