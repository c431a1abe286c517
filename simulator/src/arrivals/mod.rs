//! Arrival generation: scheduled events and stochastic flows.
//!
//! Scheduled events inject exact transactions at fixed ticks.
//! Stochastic flows draw per-tick counts from a Poisson distribution and
//! amounts/deadlines from configured distributions. Every flow owns PCG
//! streams addressed by `(master_seed, stream_id)` with stream ids
//! derived from `(sender, receiver, distribution_name)`, so a generator
//! rebuilt from the same seed replays byte-identical arrivals.
//!
//! Transaction ids are counter-derived (`tx_00000000`, ...) in emission
//! order; the zero-padded form sorts in creation order, which the queue
//! comparators rely on as the final tie-breaker.

use crate::core::money::Cents;
use crate::core::time::Tick;
use crate::models::Transaction;
use crate::rng::{derive_stream_id, PcgRng, RngManager};
use serde::{Deserialize, Serialize};

fn default_priority() -> u8 {
    5
}

/// An exact transaction injected at a fixed tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub from_agent: String,
    pub to_agent: String,
    pub amount: Cents,
    #[serde(default = "default_priority")]
    pub priority: u8,
    pub arrival_tick: Tick,
    pub deadline_tick: Tick,
    #[serde(default)]
    pub is_divisible: bool,
}

/// Amount distribution for stochastic flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "distribution", rename_all = "snake_case")]
pub enum AmountDistribution {
    /// Uniform over `[min, max]` cents
    Uniform { min: Cents, max: Cents },

    /// Log-normal in log space; sampled values truncate to cents
    LogNormal { mu: f64, sigma: f64 },

    /// Uniform over an enumerated set of amounts
    UniformSet { values: Vec<Cents> },
}

impl AmountDistribution {
    /// Stable name used in stream-id derivation.
    pub fn name(&self) -> &'static str {
        match self {
            AmountDistribution::Uniform { .. } => "uniform",
            AmountDistribution::LogNormal { .. } => "lognormal",
            AmountDistribution::UniformSet { .. } => "uniform_set",
        }
    }
}

/// A stochastic payment flow from one agent to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StochasticFlow {
    pub sender: String,
    pub receiver: String,

    /// Poisson rate: expected arrivals per tick
    pub rate_per_tick: f64,

    pub amount: AmountDistribution,

    #[serde(default = "default_priority")]
    pub priority: u8,

    /// Deadline offset from arrival, sampled uniformly from this
    /// inclusive range
    pub deadline_offset: (u64, u64),

    #[serde(default)]
    pub divisible: bool,
}

/// Per-flow RNG streams.
#[derive(Debug, Clone)]
struct FlowState {
    spec: StochasticFlow,
    count_rng: PcgRng,
    amount_rng: PcgRng,
    deadline_rng: PcgRng,
}

/// Produces the transactions arriving at each tick.
#[derive(Debug, Clone)]
pub struct ArrivalGenerator {
    scheduled: Vec<ScheduledEvent>,
    flows: Vec<FlowState>,

    /// Last tick of the simulation; sampled deadlines are capped here
    final_tick: Tick,

    next_tx_id: u64,
}

impl ArrivalGenerator {
    /// Build a generator from the scenario's arrival specification.
    pub fn new(
        scheduled: Vec<ScheduledEvent>,
        flows: Vec<StochasticFlow>,
        rng: &RngManager,
        final_tick: Tick,
    ) -> Self {
        let flows = flows
            .into_iter()
            .map(|spec| {
                let count_id = derive_stream_id(&[&spec.sender, &spec.receiver, "poisson"]);
                let amount_id =
                    derive_stream_id(&[&spec.sender, &spec.receiver, spec.amount.name()]);
                let deadline_id = derive_stream_id(&[&spec.sender, &spec.receiver, "deadline"]);
                FlowState {
                    count_rng: rng.stream(count_id),
                    amount_rng: rng.stream(amount_id),
                    deadline_rng: rng.stream(deadline_id),
                    spec,
                }
            })
            .collect();

        Self {
            scheduled,
            flows,
            final_tick,
            next_tx_id: 0,
        }
    }

    fn mint_id(&mut self) -> String {
        let id = format!("tx_{:08}", self.next_tx_id);
        self.next_tx_id += 1;
        id
    }

    /// Produce all transactions whose arrival tick is `tick`: scheduled
    /// events first (config order), then stochastic flows (config
    /// order).
    pub fn generate(&mut self, tick: Tick) -> Vec<Transaction> {
        let mut transactions = Vec::new();

        let due: Vec<ScheduledEvent> = self
            .scheduled
            .iter()
            .filter(|e| e.arrival_tick == tick)
            .cloned()
            .collect();
        for event in due {
            let id = self.mint_id();
            transactions.push(
                Transaction::new(
                    id,
                    event.from_agent.clone(),
                    event.to_agent.clone(),
                    event.amount,
                    event.arrival_tick,
                    event.deadline_tick,
                )
                .with_priority(event.priority)
                .with_divisible(event.is_divisible),
            );
        }

        for flow_idx in 0..self.flows.len() {
            let count = {
                let flow = &mut self.flows[flow_idx];
                flow.count_rng.poisson(flow.spec.rate_per_tick)
            };
            for _ in 0..count {
                let id = self.mint_id();
                let flow = &mut self.flows[flow_idx];
                let amount = sample_amount(&flow.spec.amount, &mut flow.amount_rng);
                let (lo, hi) = flow.spec.deadline_offset;
                let offset = flow.deadline_rng.range(lo as i64, hi as i64 + 1) as u64;
                let deadline = (tick + offset).min(self.final_tick);

                transactions.push(
                    Transaction::new(
                        id,
                        flow.spec.sender.clone(),
                        flow.spec.receiver.clone(),
                        amount,
                        tick,
                        deadline,
                    )
                    .with_priority(flow.spec.priority)
                    .with_divisible(flow.spec.divisible),
                );
            }
        }

        transactions
    }

    /// Mint an id for a transaction created outside arrival generation
    /// (split children share the same counter space).
    pub fn mint_child_id(&mut self) -> String {
        self.mint_id()
    }
}

/// Sample an amount in cents. Log-normal draws truncate toward zero;
/// every distribution is floored at one cent.
fn sample_amount(distribution: &AmountDistribution, rng: &mut PcgRng) -> Cents {
    match distribution {
        AmountDistribution::Uniform { min, max } => rng.range(*min, *max + 1).max(1),
        AmountDistribution::LogNormal { mu, sigma } => {
            (rng.log_normal(*mu, *sigma).trunc() as Cents).max(1)
        }
        AmountDistribution::UniformSet { values } => {
            assert!(!values.is_empty(), "uniform_set requires values");
            let idx = rng.range(0, values.len() as i64) as usize;
            values[idx].max(1)
        }
    }
}
