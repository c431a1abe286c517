//! RTGS Simulator Core
//!
//! Deterministic, tick-driven simulator of a real-time gross settlement
//! system with liquidity-saving mechanisms, built for research into bank
//! liquidity-management policies.
//!
//! # Architecture
//!
//! - **core**: integer-cent money and tick/day time primitives
//! - **rng**: seeded, splittable PCG streams
//! - **models**: domain types (Agent, Transaction, SystemState, events)
//! - **policy**: JSON decision trees compiled and interpreted over typed
//!   contexts
//! - **arrivals**: scheduled and stochastic transaction generation
//! - **settlement**: RTGS engine, deferred crediting, LSM netting
//! - **costs**: integer-cent cost accounting and metrics
//! - **orchestrator**: scenario configuration and the tick loop
//!
//! # Critical Invariants
//!
//! 1. All money values are i64 cents; no floating point touches money
//! 2. All randomness is seeded and replayable per (seed, stream)
//! 3. Identical scenario bytes and seed produce byte-identical event
//!    logs and metrics

pub mod arrivals;
pub mod core;
pub mod costs;
pub mod models;
pub mod orchestrator;
pub mod policy;
pub mod rng;
pub mod settlement;

pub use self::core::money::Cents;
pub use self::core::time::{Day, Tick, TimeManager};
pub use costs::{CostAccumulator, CostBreakdown, CostRates, MetricsReport};
pub use models::{
    agent::{Agent, AgentError, StateValue},
    event::{Event, EventBody, EventLog},
    state::SystemState,
    transaction::{Transaction, TransactionError, TransactionStatus},
};
pub use orchestrator::{AgentConfig, AgentProfile, ConfigError, Orchestrator, ScenarioConfig, TickResult};
pub use rng::{PcgRng, RngManager};
pub use settlement::{try_settle, SettlementError};
