//! Scenario configuration.
//!
//! The declarative input a client hands to [`Orchestrator::new`]: time
//! horizon, seed, cost rates, agents with their policies, scheduled and
//! stochastic arrivals, and LSM settings. Validation here is fatal; a
//! scenario that loads runs to completion.
//!
//! [`Orchestrator::new`]: crate::orchestrator::Orchestrator::new

use crate::arrivals::{AmountDistribution, ScheduledEvent, StochasticFlow};
use crate::core::money::{allocate_fraction, Cents};
use crate::costs::CostRates;
use crate::models::Agent;
use crate::policy::tree::{PolicyDef, TreeError};
use crate::settlement::lsm::LsmConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Configuration errors. All fatal at load; no tick runs after one.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ticks_per_day must be > 0")]
    ZeroTicksPerDay,

    #[error("num_days must be > 0")]
    ZeroNumDays,

    #[error("at least one agent is required")]
    NoAgents,

    #[error("agent ids must be non-empty")]
    EmptyAgentId,

    #[error("duplicate agent ID: {0}")]
    DuplicateAgentId(String),

    #[error("agent {0}: unsecured_cap must be non-negative")]
    NegativeUnsecuredCap(String),

    #[error("agent {0}: max_collateral_capacity must be non-negative")]
    NegativeCollateralCapacity(String),

    #[error("agent {0}: liquidity_pool must be non-negative")]
    NegativeLiquidityPool(String),

    #[error("agent {0}: liquidity_allocation_fraction must be within [0, 1]")]
    InvalidAllocationFraction(String),

    #[error("agent {0}: opening balance exceeds the unsecured overdraft cap")]
    OpeningBalanceBeyondCap(String),

    #[error("{context} references unknown agent '{agent}'")]
    UnknownAgent { context: &'static str, agent: String },

    #[error("{context}: sender and receiver must differ")]
    SelfPayment { context: &'static str },

    #[error("scheduled event amount must be positive")]
    NonPositiveAmount,

    #[error("scheduled event deadline precedes arrival")]
    DeadlineBeforeArrival,

    #[error("priority must be within 0..=10")]
    PriorityOutOfRange,

    #[error("stochastic flow rate_per_tick must be finite and non-negative")]
    InvalidArrivalRate,

    #[error("uniform amount range requires 0 < min <= max")]
    InvalidAmountRange,

    #[error("uniform_set requires at least one positive value")]
    InvalidAmountSet,

    #[error("deadline_offset requires min <= max")]
    InvalidDeadlineOffset,

    #[error("policy for agent {agent}: {source}")]
    Policy {
        agent: String,
        #[source]
        source: TreeError,
    },
}

/// Per-agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,

    /// Opening balance in the settlement account (cents)
    pub opening_balance: Cents,

    /// Unsecured intraday overdraft cap (cents)
    #[serde(default)]
    pub unsecured_cap: Cents,

    /// Maximum collateral the agent can post. Absent means 0: the
    /// config value is authoritative, there is no derived fallback.
    #[serde(default)]
    pub max_collateral_capacity: Option<Cents>,

    /// External liquidity pool the agent may allocate from at start
    #[serde(default)]
    pub liquidity_pool: Option<Cents>,

    /// Fraction of the pool allocated into the opening balance,
    /// truncated to cents. Absent with a pool means the whole pool.
    #[serde(default)]
    pub liquidity_allocation_fraction: Option<f64>,

    #[serde(default)]
    pub policy: PolicyDef,
}

/// The effective configuration of one agent.
///
/// This is the single extractor every consumer routes through: direct
/// simulation, resampling, and batch evaluation all see the same
/// opening balance, credit limit, and collateral capacity. Divergent
/// extraction is how cost-mismatch bugs happen.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentProfile {
    pub id: String,
    pub opening_balance: Cents,
    pub unsecured_cap: Cents,
    pub max_collateral_capacity: Cents,
}

impl AgentProfile {
    /// Resolve an agent's effective configuration.
    pub fn from_config(config: &AgentConfig) -> Self {
        let allocated = match (config.liquidity_pool, config.liquidity_allocation_fraction) {
            (Some(pool), Some(fraction)) => allocate_fraction(fraction, pool),
            (Some(pool), None) => pool,
            (None, _) => 0,
        };

        Self {
            id: config.id.clone(),
            opening_balance: config.opening_balance + allocated,
            unsecured_cap: config.unsecured_cap,
            max_collateral_capacity: config.max_collateral_capacity.unwrap_or(0),
        }
    }

    /// Build the runtime agent for this profile.
    pub fn build_agent(&self) -> Agent {
        Agent::new(
            self.id.clone(),
            self.opening_balance,
            self.unsecured_cap,
            self.max_collateral_capacity,
        )
    }
}

/// Complete scenario configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub ticks_per_day: u32,
    pub num_days: u32,
    pub rng_seed: u64,

    /// Stable identifier stamped on every event. Defaults to a value
    /// derived from the seed so replays stay byte-identical.
    #[serde(default)]
    pub simulation_id: Option<String>,

    /// Credits land at end of tick instead of immediately
    #[serde(default)]
    pub deferred_crediting: bool,

    /// Drop overdue transactions at the end-of-day boundary
    #[serde(default)]
    pub deadline_cap_at_eod: bool,

    /// Honor Drop decisions on transactions that are not yet overdue
    #[serde(default)]
    pub allow_early_drop: bool,

    #[serde(default)]
    pub cost_rates: CostRates,

    pub agents: Vec<AgentConfig>,

    #[serde(default)]
    pub scenario_events: Vec<ScheduledEvent>,

    #[serde(default)]
    pub arrivals: Vec<StochasticFlow>,

    #[serde(default)]
    pub lsm_config: LsmConfig,
}

impl ScenarioConfig {
    /// The simulation id stamped on events.
    pub fn effective_simulation_id(&self) -> String {
        self.simulation_id
            .clone()
            .unwrap_or_else(|| format!("sim-{:016x}", self.rng_seed))
    }

    /// Validate the scenario. Policy trees are compiled separately by
    /// the orchestrator; everything structural is checked here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ticks_per_day == 0 {
            return Err(ConfigError::ZeroTicksPerDay);
        }
        if self.num_days == 0 {
            return Err(ConfigError::ZeroNumDays);
        }
        if self.agents.is_empty() {
            return Err(ConfigError::NoAgents);
        }

        let mut ids = HashSet::new();
        for agent in &self.agents {
            if agent.id.is_empty() {
                return Err(ConfigError::EmptyAgentId);
            }
            if !ids.insert(agent.id.as_str()) {
                return Err(ConfigError::DuplicateAgentId(agent.id.clone()));
            }
            if agent.unsecured_cap < 0 {
                return Err(ConfigError::NegativeUnsecuredCap(agent.id.clone()));
            }
            if agent.max_collateral_capacity.is_some_and(|c| c < 0) {
                return Err(ConfigError::NegativeCollateralCapacity(agent.id.clone()));
            }
            if agent.liquidity_pool.is_some_and(|p| p < 0) {
                return Err(ConfigError::NegativeLiquidityPool(agent.id.clone()));
            }
            if agent
                .liquidity_allocation_fraction
                .is_some_and(|f| !(0.0..=1.0).contains(&f) || f.is_nan())
            {
                return Err(ConfigError::InvalidAllocationFraction(agent.id.clone()));
            }

            // An agent may open in overdraft, but never beyond the cap
            // it could ever be backed by
            let profile = AgentProfile::from_config(agent);
            if profile.opening_balance < -profile.unsecured_cap {
                return Err(ConfigError::OpeningBalanceBeyondCap(agent.id.clone()));
            }
        }

        for event in &self.scenario_events {
            let known = |id: &str| ids.contains(id);
            if !known(&event.from_agent) {
                return Err(ConfigError::UnknownAgent {
                    context: "scenario_events",
                    agent: event.from_agent.clone(),
                });
            }
            if !known(&event.to_agent) {
                return Err(ConfigError::UnknownAgent {
                    context: "scenario_events",
                    agent: event.to_agent.clone(),
                });
            }
            if event.from_agent == event.to_agent {
                return Err(ConfigError::SelfPayment {
                    context: "scenario_events",
                });
            }
            if event.amount <= 0 {
                return Err(ConfigError::NonPositiveAmount);
            }
            if event.deadline_tick < event.arrival_tick {
                return Err(ConfigError::DeadlineBeforeArrival);
            }
            if event.priority > 10 {
                return Err(ConfigError::PriorityOutOfRange);
            }
        }

        for flow in &self.arrivals {
            if !ids.contains(flow.sender.as_str()) {
                return Err(ConfigError::UnknownAgent {
                    context: "arrivals",
                    agent: flow.sender.clone(),
                });
            }
            if !ids.contains(flow.receiver.as_str()) {
                return Err(ConfigError::UnknownAgent {
                    context: "arrivals",
                    agent: flow.receiver.clone(),
                });
            }
            if flow.sender == flow.receiver {
                return Err(ConfigError::SelfPayment { context: "arrivals" });
            }
            if !flow.rate_per_tick.is_finite() || flow.rate_per_tick < 0.0 {
                return Err(ConfigError::InvalidArrivalRate);
            }
            if flow.priority > 10 {
                return Err(ConfigError::PriorityOutOfRange);
            }
            let (lo, hi) = flow.deadline_offset;
            if lo > hi {
                return Err(ConfigError::InvalidDeadlineOffset);
            }
            match &flow.amount {
                AmountDistribution::Uniform { min, max } => {
                    if *min <= 0 || min > max {
                        return Err(ConfigError::InvalidAmountRange);
                    }
                }
                AmountDistribution::UniformSet { values } => {
                    if values.is_empty() || values.iter().any(|v| *v <= 0) {
                        return Err(ConfigError::InvalidAmountSet);
                    }
                }
                AmountDistribution::LogNormal { .. } => {}
            }
        }

        Ok(())
    }
}
