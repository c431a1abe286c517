//! Tick orchestrator.
//!
//! Drives one tick deterministically through the fixed step sequence:
//!
//! ```text
//! 1. Arrivals into sender queues (queue1)
//! 2. Strategic collateral trees (day start only)
//! 3. Bank trees (budgets, scratch registers)
//! 4. Payment trees per queued transaction (release / hold / drop /
//!    split / stagger / reprioritize)
//! 5. LSM pass (bilateral offsets, cycle netting)
//! 6. Conventional settlement of the residual release set
//! 7. End-of-tick collateral trees
//! 8. Deferred credit flush
//! 9. Overdue sweep, cost accrual, end-of-day handling
//! ```
//!
//! `tick()` cannot fail: configuration problems are rejected before the
//! first tick, and every runtime problem (evaluation errors, coerced
//! actions, rejected settlements, missed deadlines) folds into events
//! and costs. Agent iteration is lexicographic everywhere; container
//! iteration never goes through a hash-randomized order.

use crate::arrivals::ArrivalGenerator;
use crate::core::money::{scale_by_bps, Cents};
use crate::core::time::{Day, Tick, TimeManager};
use crate::costs::{CostAccumulator, CostBreakdown, CostRates, MetricsReport};
use crate::models::event::{EventBody, EventLog};
use crate::models::state::SystemState;
use crate::policy::tree::EvalContext;
use crate::policy::{BankAction, CollateralAction, CollateralPhase, PaymentAction, Policy};
use crate::rng::RngManager;
use crate::settlement::lsm::{run_lsm_pass, sort_for_settlement, LsmConfig};
use crate::settlement::rtgs::{try_settle, SettlementError};
use crate::settlement::DeferredCredits;
use std::collections::BTreeMap;

use super::config::{AgentProfile, ConfigError, ScenarioConfig};

/// Summary of one executed tick.
#[derive(Debug, Clone, Default)]
pub struct TickResult {
    pub tick: Tick,
    pub day: Day,

    /// New transactions injected this tick
    pub arrivals: usize,

    /// Conventional (gross) settlements applied
    pub settlements: usize,

    /// Settlements refused on the overdraft guard
    pub rejections: usize,

    pub lsm_bilateral_offsets: usize,

    pub lsm_cycles_settled: usize,

    /// Total value marked settled this tick (gross + netted)
    pub settled_value: Cents,

    /// Cost accrued by the end-of-tick sweep (carrying costs and
    /// penalties; split friction is charged at decision time)
    pub cost_accrued: Cents,
}

/// Main orchestrator: owns the system state and drives the tick loop.
///
/// # Determinism
///
/// Given identical scenario bytes and seed, two runs emit byte-identical
/// event logs and metrics. Everything stochastic draws from seeded PCG
/// streams; every container iterated during a tick has a stable order.
pub struct Orchestrator {
    state: SystemState,
    time: TimeManager,
    policies: BTreeMap<String, Policy>,
    arrivals: ArrivalGenerator,
    cost_rates: CostRates,
    lsm_config: LsmConfig,
    deferred_crediting: bool,
    deadline_cap_at_eod: bool,
    allow_early_drop: bool,
    costs: BTreeMap<String, CostAccumulator>,
}

impl Orchestrator {
    /// Build an orchestrator from a scenario.
    ///
    /// Validates the scenario and compiles every policy tree; any
    /// problem is fatal here, before the first tick.
    pub fn new(config: ScenarioConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let profiles: Vec<AgentProfile> =
            config.agents.iter().map(AgentProfile::from_config).collect();
        let agents = profiles.iter().map(AgentProfile::build_agent).collect();

        let mut policies = BTreeMap::new();
        let mut costs = BTreeMap::new();
        for agent_config in &config.agents {
            let policy = Policy::compile(&agent_config.policy).map_err(|source| {
                ConfigError::Policy {
                    agent: agent_config.id.clone(),
                    source,
                }
            })?;
            policies.insert(agent_config.id.clone(), policy);
            costs.insert(agent_config.id.clone(), CostAccumulator::new());
        }

        let time = TimeManager::new(config.ticks_per_day as u64, config.num_days as u64);
        let final_tick = time.horizon_tick() - 1;
        let rng = RngManager::new(config.rng_seed);
        let arrivals = ArrivalGenerator::new(
            config.scenario_events.clone(),
            config.arrivals.clone(),
            &rng,
            final_tick,
        );

        Ok(Self {
            state: SystemState::new(agents, config.effective_simulation_id()),
            time,
            policies,
            arrivals,
            cost_rates: config.cost_rates.clone(),
            lsm_config: config.lsm_config.clone(),
            deferred_crediting: config.deferred_crediting,
            deadline_cap_at_eod: config.deadline_cap_at_eod,
            allow_early_drop: config.allow_early_drop,
            costs,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn current_tick(&self) -> Tick {
        self.time.current_tick()
    }

    pub fn current_day(&self) -> Day {
        self.time.current_day()
    }

    pub fn is_finished(&self) -> bool {
        self.time.is_finished()
    }

    pub fn state(&self) -> &SystemState {
        &self.state
    }

    pub fn event_log(&self) -> &EventLog {
        self.state.event_log()
    }

    /// Running cost and settlement metrics.
    pub fn current_metrics(&self) -> MetricsReport {
        let per_agent = self.costs.clone();
        let system_total_cost = per_agent.values().map(|acc| acc.total()).sum();

        let original_ids: Vec<&String> = self
            .state
            .transactions()
            .iter()
            .filter(|(_, tx)| tx.parent_id().is_none())
            .map(|(id, _)| id)
            .collect();
        let original_arrivals = original_ids.len() as u64;
        let effectively_settled_originals = original_ids
            .iter()
            .filter(|id| self.state.effectively_settled(id))
            .count() as u64;

        let settlement_rate = if original_arrivals == 0 {
            0.0
        } else {
            effectively_settled_originals as f64 / original_arrivals as f64
        };

        MetricsReport {
            per_agent,
            system_total_cost,
            original_arrivals,
            effectively_settled_originals,
            settlement_rate,
        }
    }

    fn emit(&mut self, body: EventBody) {
        let tick = self.time.current_tick();
        let day = self.time.current_day();
        self.state.event_log_mut().append(tick, day, body);
    }

    fn policy(&self, agent_id: &str) -> &Policy {
        self.policies
            .get(agent_id)
            .expect("every agent has a compiled policy")
    }

    // ========================================================================
    // Tick loop
    // ========================================================================

    /// Run every remaining tick to the configured horizon.
    pub fn run(&mut self) -> Vec<TickResult> {
        let mut results = Vec::new();
        while !self.time.is_finished() {
            results.push(self.tick());
        }
        results
    }

    /// Execute one tick.
    pub fn tick(&mut self) -> TickResult {
        let tick = self.time.current_tick();
        let mut result = TickResult {
            tick,
            day: self.time.current_day(),
            ..TickResult::default()
        };

        // STEP 1: ARRIVALS
        self.inject_arrivals(tick, &mut result);

        // STEP 2: STRATEGIC COLLATERAL (day start only)
        if self.time.is_start_of_day() {
            self.run_collateral_phase(CollateralPhase::Strategic);
        }

        // STEP 3: BANK TREES (budgets, scratch registers)
        self.run_bank_trees();

        // STEP 4: PAYMENT EVALUATION
        let mut released: Vec<String> = Vec::new();
        let mut released_value: Cents = 0;
        for agent_id in self.state.agent_ids() {
            let queue: Vec<String> = self
                .state
                .get_agent(&agent_id)
                .expect("iterating known agent")
                .outgoing_queue()
                .to_vec();
            for tx_id in queue {
                let eligible = self
                    .state
                    .get_transaction(&tx_id)
                    .map(|tx| tx.is_outstanding() && tx.is_release_eligible(tick))
                    .unwrap_or(false);
                if !eligible {
                    // stagger-gated children stay held without a decision
                    continue;
                }
                self.evaluate_payment(&agent_id, &tx_id, 0, &mut released, &mut released_value);
            }
        }

        // STEP 5: LSM PASS
        let lsm_result = run_lsm_pass(&mut self.state, &released, &self.lsm_config, tick);
        result.lsm_bilateral_offsets = lsm_result.bilateral_offsets;
        result.lsm_cycles_settled = lsm_result.cycles_settled;
        result.settled_value += lsm_result.settled_value;
        for body in lsm_result.events {
            self.emit(body);
        }

        // STEP 6: CONVENTIONAL SETTLEMENT of the residual release set
        let mut deferred = DeferredCredits::new();
        self.settle_released(&released, tick, &mut deferred, &mut result);

        // STEP 7: END-OF-TICK COLLATERAL
        self.run_collateral_phase(CollateralPhase::EndOfTick);

        // STEP 8: DEFERRED CREDIT FLUSH
        if self.deferred_crediting {
            for body in deferred.apply_all(&mut self.state) {
                self.emit(body);
            }
        }

        // STEP 9: OVERDUE SWEEP, COSTS, END OF DAY
        self.sweep_and_accrue(tick, &mut result);

        self.emit(EventBody::TickCompleted {
            arrivals: result.arrivals,
            settlements: result.settlements,
            settled_value: result.settled_value,
        });

        self.time.advance_tick();

        #[cfg(debug_assertions)]
        self.state.assert_invariants();

        result
    }

    // ========================================================================
    // Step 1: arrivals
    // ========================================================================

    fn inject_arrivals(&mut self, tick: Tick, result: &mut TickResult) {
        let new_transactions = self.arrivals.generate(tick);
        result.arrivals = new_transactions.len();

        for tx in new_transactions {
            let body = EventBody::Arrival {
                tx_id: tx.id().to_string(),
                sender_id: tx.sender_id().to_string(),
                receiver_id: tx.receiver_id().to_string(),
                amount: tx.amount(),
                deadline_tick: tx.deadline_tick(),
                priority: tx.priority(),
                is_divisible: tx.is_divisible(),
            };
            let sender_id = tx.sender_id().to_string();
            let tx_id = tx.id().to_string();
            self.state.add_transaction(tx);
            self.state
                .get_agent_mut(&sender_id)
                .expect("arrivals validated against agents")
                .queue_outgoing(tx_id);
            self.emit(body);
        }

        self.sort_queues();
    }

    /// Restore the canonical queue1 order for every agent:
    /// `(arrival_tick asc, priority desc, tx_id asc)`.
    fn sort_queues(&mut self) {
        for agent_id in self.state.agent_ids() {
            let mut ids = self
                .state
                .get_agent(&agent_id)
                .expect("iterating known agent")
                .outgoing_queue()
                .to_vec();
            ids.sort_by(|a, b| {
                let ta = self
                    .state
                    .get_transaction(a)
                    .expect("queued transaction exists");
                let tb = self
                    .state
                    .get_transaction(b)
                    .expect("queued transaction exists");
                ta.arrival_tick()
                    .cmp(&tb.arrival_tick())
                    .then(tb.priority().cmp(&ta.priority()))
                    .then(a.cmp(b))
            });
            *self
                .state
                .get_agent_mut(&agent_id)
                .expect("iterating known agent")
                .outgoing_queue_mut() = ids;
        }
    }

    // ========================================================================
    // Steps 2 and 7: collateral trees
    // ========================================================================

    fn run_collateral_phase(&mut self, phase: CollateralPhase) {
        for agent_id in self.state.agent_ids() {
            if !self.policy(&agent_id).has_collateral_tree(phase) {
                continue;
            }

            let (action, warnings) = {
                let agent = self.state.get_agent(&agent_id).expect("known agent");
                let ctx = EvalContext::bank_level(agent, &self.state, &self.time, 0, 0);
                self.policy(&agent_id).decide_collateral(phase, &ctx)
            };

            for warning in warnings {
                self.emit(EventBody::PolicyEvaluationWarning {
                    agent_id: agent_id.clone(),
                    tx_id: None,
                    node_id: warning.node_id,
                    message: warning.message,
                });
            }

            match action {
                CollateralAction::Post { amount, reason } => {
                    let agent = self.state.get_agent_mut(&agent_id).expect("known agent");
                    let posted = agent.post_collateral(amount);
                    let new_total = agent.posted_collateral();
                    if posted > 0 {
                        self.emit(EventBody::CollateralPosted {
                            agent_id: agent_id.clone(),
                            amount: posted,
                            reason,
                            new_total,
                        });
                    } else {
                        self.emit(EventBody::ActionCoerced {
                            agent_id: agent_id.clone(),
                            tx_id: None,
                            requested: "PostCollateral".to_string(),
                            coerced_to: "HoldCollateral".to_string(),
                            reason: "no remaining collateral capacity".to_string(),
                        });
                    }
                }
                CollateralAction::Withdraw { amount } => {
                    let agent = self.state.get_agent_mut(&agent_id).expect("known agent");
                    let withdrawn = agent.withdraw_collateral(amount);
                    let new_total = agent.posted_collateral();
                    if withdrawn > 0 {
                        self.emit(EventBody::CollateralWithdrawn {
                            agent_id: agent_id.clone(),
                            amount: withdrawn,
                            new_total,
                        });
                    } else {
                        self.emit(EventBody::ActionCoerced {
                            agent_id: agent_id.clone(),
                            tx_id: None,
                            requested: "WithdrawCollateral".to_string(),
                            coerced_to: "HoldCollateral".to_string(),
                            reason: "posted collateral is backing overdraft".to_string(),
                        });
                    }
                }
                CollateralAction::Hold => {}
            }
        }
    }

    // ========================================================================
    // Step 3: bank trees
    // ========================================================================

    fn run_bank_trees(&mut self) {
        for agent_id in self.state.agent_ids() {
            self.state
                .get_agent_mut(&agent_id)
                .expect("known agent")
                .reset_release_budget();

            if !self.policy(&agent_id).has_bank_tree() {
                continue;
            }

            let (action, warnings) = {
                let agent = self.state.get_agent(&agent_id).expect("known agent");
                let ctx = EvalContext::bank_level(agent, &self.state, &self.time, 0, 0);
                self.policy(&agent_id).decide_bank(&ctx)
            };

            for warning in warnings {
                self.emit(EventBody::PolicyEvaluationWarning {
                    agent_id: agent_id.clone(),
                    tx_id: None,
                    node_id: warning.node_id,
                    message: warning.message,
                });
            }

            match action {
                BankAction::SetReleaseBudget { budget } => {
                    let budget = budget.max(0);
                    self.state
                        .get_agent_mut(&agent_id)
                        .expect("known agent")
                        .set_release_budget(budget);
                    self.emit(EventBody::BankBudgetSet {
                        agent_id: agent_id.clone(),
                        budget,
                    });
                }
                BankAction::SetState { key, value } => {
                    self.state
                        .get_agent_mut(&agent_id)
                        .expect("known agent")
                        .set_state(key.clone(), value.clone());
                    self.emit(EventBody::BankStateUpdated {
                        agent_id: agent_id.clone(),
                        key,
                        value,
                    });
                }
                BankAction::AddState { key, delta } => {
                    let agent = self.state.get_agent_mut(&agent_id).expect("known agent");
                    if agent.add_state(&key, delta) {
                        let value = agent
                            .state_value(&key)
                            .cloned()
                            .expect("register written by add_state");
                        self.emit(EventBody::BankStateUpdated {
                            agent_id: agent_id.clone(),
                            key,
                            value,
                        });
                    } else {
                        self.emit(EventBody::ActionCoerced {
                            agent_id: agent_id.clone(),
                            tx_id: None,
                            requested: "AddState".to_string(),
                            coerced_to: "NoAction".to_string(),
                            reason: "register holds a string".to_string(),
                        });
                    }
                }
                BankAction::NoAction => {}
            }
        }
    }

    // ========================================================================
    // Step 4: payment evaluation
    // ========================================================================

    /// Evaluate the payment tree for one queued transaction and apply
    /// the decision. `depth` guards the single allowed re-evaluation
    /// after a Reprioritize.
    fn evaluate_payment(
        &mut self,
        agent_id: &str,
        tx_id: &str,
        depth: usize,
        released: &mut Vec<String>,
        released_value: &mut Cents,
    ) {
        let tick = self.time.current_tick();

        let (action, warnings) = {
            let agent = self.state.get_agent(agent_id).expect("known agent");
            let tx = self.state.get_transaction(tx_id).expect("queued tx exists");
            let ctx = EvalContext::for_transaction(
                tx,
                agent,
                &self.state,
                &self.time,
                &self.cost_rates,
                released.len(),
                *released_value,
            );
            self.policy(agent_id).decide_payment(&ctx)
        };

        for warning in warnings {
            self.emit(EventBody::PolicyEvaluationWarning {
                agent_id: agent_id.to_string(),
                tx_id: Some(tx_id.to_string()),
                node_id: warning.node_id,
                message: warning.message,
            });
        }

        match action {
            PaymentAction::Release => {
                let remaining = self
                    .state
                    .get_transaction(tx_id)
                    .expect("queued tx exists")
                    .remaining_amount();
                let within_budget = self
                    .state
                    .get_agent_mut(agent_id)
                    .expect("known agent")
                    .try_consume_budget(remaining);
                if !within_budget {
                    self.emit(EventBody::ActionCoerced {
                        agent_id: agent_id.to_string(),
                        tx_id: Some(tx_id.to_string()),
                        requested: "Release".to_string(),
                        coerced_to: "Hold".to_string(),
                        reason: "release budget exhausted".to_string(),
                    });
                    return;
                }
                self.state
                    .get_agent_mut(agent_id)
                    .expect("known agent")
                    .remove_from_queue(tx_id);
                self.state
                    .get_transaction_mut(tx_id)
                    .expect("queued tx exists")
                    .record_first_release(tick);
                released.push(tx_id.to_string());
                *released_value += remaining;
                self.emit(EventBody::PolicyRelease {
                    agent_id: agent_id.to_string(),
                    tx_id: tx_id.to_string(),
                });
            }

            PaymentAction::Hold => {
                self.emit(EventBody::PolicyHold {
                    agent_id: agent_id.to_string(),
                    tx_id: tx_id.to_string(),
                });
            }

            PaymentAction::Drop => {
                let overdue = {
                    let tx = self.state.get_transaction(tx_id).expect("queued tx exists");
                    tick >= tx.deadline_tick()
                };
                if overdue || self.allow_early_drop {
                    self.state
                        .get_agent_mut(agent_id)
                        .expect("known agent")
                        .remove_from_queue(tx_id);
                    self.state
                        .get_transaction_mut(tx_id)
                        .expect("queued tx exists")
                        .drop_transaction(tick);
                    self.emit(EventBody::PolicyDrop {
                        agent_id: agent_id.to_string(),
                        tx_id: tx_id.to_string(),
                        reason: if overdue {
                            "transaction overdue".to_string()
                        } else {
                            "early drop permitted by scenario".to_string()
                        },
                    });
                } else {
                    self.emit(EventBody::ActionCoerced {
                        agent_id: agent_id.to_string(),
                        tx_id: Some(tx_id.to_string()),
                        requested: "Drop".to_string(),
                        coerced_to: "Hold".to_string(),
                        reason: "transaction is not overdue".to_string(),
                    });
                }
            }

            PaymentAction::Split { num_splits } => {
                self.apply_split(agent_id, tx_id, num_splits, 0, "Split", released, released_value);
            }

            PaymentAction::StaggerSplit {
                num_splits,
                interval_ticks,
            } => {
                self.apply_split(
                    agent_id,
                    tx_id,
                    num_splits,
                    interval_ticks,
                    "StaggerSplit",
                    released,
                    released_value,
                );
            }

            PaymentAction::PaceAndRelease { num_splits } => {
                self.apply_split(
                    agent_id,
                    tx_id,
                    num_splits,
                    1,
                    "PaceAndRelease",
                    released,
                    released_value,
                );
            }

            PaymentAction::Reprioritize { new_priority } => {
                if depth >= 1 {
                    self.emit(EventBody::ActionCoerced {
                        agent_id: agent_id.to_string(),
                        tx_id: Some(tx_id.to_string()),
                        requested: "Reprioritize".to_string(),
                        coerced_to: "Hold".to_string(),
                        reason: "reprioritize loop".to_string(),
                    });
                    return;
                }
                let old_priority = {
                    let tx = self
                        .state
                        .get_transaction_mut(tx_id)
                        .expect("queued tx exists");
                    let old = tx.priority();
                    tx.set_priority(new_priority);
                    old
                };
                self.emit(EventBody::Reprioritized {
                    agent_id: agent_id.to_string(),
                    tx_id: tx_id.to_string(),
                    old_priority,
                    new_priority,
                });
                // Re-evaluate once with the new priority in context
                self.evaluate_payment(agent_id, tx_id, depth + 1, released, released_value);
            }
        }
    }

    /// Replace a transaction with children partitioning its remaining
    /// amount. Children with a release-eligibility of this tick join
    /// the release set immediately; later ones are held in queue1.
    #[allow(clippy::too_many_arguments)]
    fn apply_split(
        &mut self,
        agent_id: &str,
        tx_id: &str,
        num_splits: usize,
        interval_ticks: Tick,
        requested: &str,
        released: &mut Vec<String>,
        released_value: &mut Cents,
    ) {
        let tick = self.time.current_tick();

        let (divisible, remaining) = {
            let tx = self.state.get_transaction(tx_id).expect("queued tx exists");
            (tx.is_divisible(), tx.remaining_amount())
        };

        if !divisible || num_splits < 2 || remaining < num_splits as Cents {
            let reason = if !divisible {
                "transaction is not divisible"
            } else if num_splits < 2 {
                "num_splits must be at least 2"
            } else {
                "remaining amount smaller than num_splits"
            };
            self.emit(EventBody::ActionCoerced {
                agent_id: agent_id.to_string(),
                tx_id: Some(tx_id.to_string()),
                requested: requested.to_string(),
                coerced_to: "Hold".to_string(),
                reason: reason.to_string(),
            });
            return;
        }

        let (sender, receiver, priority, arrival, deadline) = {
            let tx = self.state.get_transaction(tx_id).expect("queued tx exists");
            (
                tx.sender_id().to_string(),
                tx.receiver_id().to_string(),
                tx.priority(),
                tx.arrival_tick(),
                tx.deadline_tick(),
            )
        };

        self.state
            .get_agent_mut(agent_id)
            .expect("known agent")
            .remove_from_queue(tx_id);

        // First `remaining % num_splits` children carry one extra cent
        let base = remaining / num_splits as Cents;
        let extra = remaining % num_splits as Cents;

        let mut child_ids = Vec::with_capacity(num_splits);
        let mut immediate = Vec::new();
        for i in 0..num_splits {
            let amount = base + if (i as Cents) < extra { 1 } else { 0 };
            let child_id = self.arrivals.mint_child_id();
            let eligibility = tick + i as Tick * interval_ticks;

            let mut child = crate::models::Transaction::new(
                child_id.clone(),
                sender.clone(),
                receiver.clone(),
                amount,
                arrival,
                deadline,
            )
            .with_priority(priority)
            .divisible()
            .with_parent(tx_id.to_string());
            if eligibility > tick {
                child = child.with_earliest_release(eligibility);
            } else {
                immediate.push((child_id.clone(), amount));
            }

            self.state.add_transaction(child);
            if eligibility > tick {
                self.state
                    .get_agent_mut(agent_id)
                    .expect("known agent")
                    .queue_outgoing(child_id.clone());
            }
            child_ids.push(child_id);
        }

        self.state
            .get_transaction_mut(tx_id)
            .expect("queued tx exists")
            .set_children(child_ids.clone());

        self.emit(EventBody::PolicySplit {
            agent_id: agent_id.to_string(),
            parent_id: tx_id.to_string(),
            num_splits,
            child_ids,
        });

        // Split friction: flat charge per additional part
        let friction = self
            .cost_rates
            .split_friction
            .saturating_mul(num_splits as Cents - 1);
        if friction > 0 {
            if let Some(accumulator) = self.costs.get_mut(agent_id) {
                accumulator.total_split_friction_cost += friction;
            }
            self.emit(EventBody::CostAccrual {
                agent_id: agent_id.to_string(),
                costs: CostBreakdown {
                    split_friction_cost: friction,
                    ..CostBreakdown::default()
                },
            });
        }

        for (child_id, amount) in immediate {
            self.state
                .get_transaction_mut(&child_id)
                .expect("child just added")
                .record_first_release(tick);
            released.push(child_id.clone());
            *released_value += amount;
            self.emit(EventBody::PolicyRelease {
                agent_id: agent_id.to_string(),
                tx_id: child_id,
            });
        }
    }

    // ========================================================================
    // Step 6: conventional settlement
    // ========================================================================

    fn settle_released(
        &mut self,
        released: &[String],
        tick: Tick,
        deferred: &mut DeferredCredits,
        result: &mut TickResult,
    ) {
        let mut to_settle: Vec<String> = released
            .iter()
            .filter(|id| {
                self.state
                    .get_transaction(id)
                    .map(|tx| tx.is_outstanding() && tx.remaining_amount() > 0)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        sort_for_settlement(&self.state, &mut to_settle);

        for tx_id in to_settle {
            let (sender_id, receiver_id) = {
                let tx = self.state.get_transaction(&tx_id).expect("released tx exists");
                (tx.sender_id().to_string(), tx.receiver_id().to_string())
            };

            let buffer = self.deferred_crediting.then_some(&mut *deferred);
            match try_settle(&mut self.state, &tx_id, tick, buffer) {
                Ok(amount) => {
                    result.settlements += 1;
                    result.settled_value += amount;
                    self.emit(EventBody::Settlement {
                        tx_id,
                        sender_id,
                        receiver_id,
                        amount,
                    });
                }
                Err(SettlementError::InsufficientLiquidity {
                    required,
                    available,
                }) => {
                    result.rejections += 1;
                    // The transaction stays pending in queue1
                    self.state
                        .get_agent_mut(&sender_id)
                        .expect("known agent")
                        .queue_outgoing(tx_id.clone());
                    self.emit(EventBody::SettlementRejected {
                        tx_id,
                        sender_id,
                        required,
                        available,
                    });
                }
                Err(SettlementError::Transaction(_)) => {
                    // Filtered above: released entries are outstanding
                    // with positive remaining value
                    debug_assert!(false, "settlement of terminal transaction");
                }
            }
        }
    }

    // ========================================================================
    // Step 9: overdue sweep, costs, end of day
    // ========================================================================

    fn sweep_and_accrue(&mut self, tick: Tick, result: &mut TickResult) {
        let mut breakdowns: BTreeMap<String, CostBreakdown> = self
            .state
            .agent_ids()
            .into_iter()
            .map(|id| (id, CostBreakdown::default()))
            .collect();

        // Overdue sweep: the deadline tick itself counts as overdue.
        // Split parents are excluded; their children carry the penalty.
        let newly_overdue: Vec<(String, String, Cents)> = self
            .state
            .transactions()
            .iter()
            .filter(|(_, tx)| {
                tx.is_outstanding()
                    && !tx.is_overdue()
                    && !tx.is_split_parent()
                    && tick >= tx.deadline_tick()
            })
            .map(|(id, tx)| {
                (
                    id.clone(),
                    tx.sender_id().to_string(),
                    tx.remaining_amount(),
                )
            })
            .collect();

        for (tx_id, sender_id, remaining) in newly_overdue {
            self.state
                .get_transaction_mut(&tx_id)
                .expect("swept tx exists")
                .mark_overdue(tick);
            let penalty = scale_by_bps(remaining, self.cost_rates.deadline_penalty_bps);
            if let Some(breakdown) = breakdowns.get_mut(&sender_id) {
                breakdown.deadline_penalty_cost += penalty;
            }
            self.emit(EventBody::DeadlineMissed {
                agent_id: sender_id,
                tx_id,
                penalty,
            });
        }

        // Per-tick carrying costs
        for agent_id in self.state.agent_ids() {
            let agent = self.state.get_agent(&agent_id).expect("known agent");
            let overdraft_cost = scale_by_bps(
                agent.overdraft_in_use(),
                self.cost_rates.overdraft_cost_per_tick_bps,
            );
            let collateral_cost = scale_by_bps(
                agent.posted_collateral(),
                self.cost_rates.collateral_cost_per_tick_bps,
            );

            // Delay accrues once a transaction has been pending past its
            // arrival tick
            let delay_cost: Cents = agent
                .outgoing_queue()
                .iter()
                .filter_map(|tx_id| self.state.get_transaction(tx_id))
                .filter(|tx| tx.arrival_tick() < tick)
                .map(|tx| scale_by_bps(tx.remaining_amount(), self.cost_rates.delay_cost_per_tick_bps))
                .sum();

            let breakdown = breakdowns.get_mut(&agent_id).expect("breakdown per agent");
            breakdown.overdraft_cost = overdraft_cost;
            breakdown.collateral_cost = collateral_cost;
            breakdown.delay_cost = delay_cost;
        }

        // End-of-day penalties on whatever queue1 still holds
        let end_of_day = self.time.is_end_of_day();
        let mut eod_penalties: Cents = 0;
        if end_of_day {
            for agent_id in self.state.agent_ids() {
                let penalty: Cents = self
                    .state
                    .get_agent(&agent_id)
                    .expect("known agent")
                    .outgoing_queue()
                    .iter()
                    .filter_map(|tx_id| self.state.get_transaction(tx_id))
                    .map(|tx| scale_by_bps(tx.remaining_amount(), self.cost_rates.eod_penalty_bps))
                    .sum();
                if penalty > 0 {
                    breakdowns
                        .get_mut(&agent_id)
                        .expect("breakdown per agent")
                        .eod_penalty_cost = penalty;
                    eod_penalties += penalty;
                }
            }
        }

        // Fold breakdowns into the accumulators and emit per-agent events
        for (agent_id, breakdown) in &breakdowns {
            let balance = self
                .state
                .get_agent(agent_id)
                .expect("known agent")
                .balance();
            let accumulator = self.costs.get_mut(agent_id).expect("accumulator per agent");
            accumulator.add(breakdown);
            accumulator.update_peak_debit(balance);
            result.cost_accrued += breakdown.total();
            if !breakdown.is_zero() {
                self.emit(EventBody::CostAccrual {
                    agent_id: agent_id.clone(),
                    costs: breakdown.clone(),
                });
            }
        }

        if end_of_day {
            if self.deadline_cap_at_eod {
                self.drop_overdue_at_eod(tick);
            }
            self.emit(EventBody::EndOfDay {
                unsettled_count: self.state.total_queue1_size(),
                total_penalties: eod_penalties,
            });
        }
    }

    /// Drop every overdue transaction still queued at the day boundary.
    /// The deadline penalty was already assessed when it became overdue.
    fn drop_overdue_at_eod(&mut self, tick: Tick) {
        for agent_id in self.state.agent_ids() {
            let overdue: Vec<String> = self
                .state
                .get_agent(&agent_id)
                .expect("known agent")
                .outgoing_queue()
                .iter()
                .filter(|tx_id| {
                    self.state
                        .get_transaction(tx_id)
                        .map(|tx| tx.is_overdue())
                        .unwrap_or(false)
                })
                .cloned()
                .collect();

            for tx_id in overdue {
                self.state
                    .get_agent_mut(&agent_id)
                    .expect("known agent")
                    .remove_from_queue(&tx_id);
                self.state
                    .get_transaction_mut(&tx_id)
                    .expect("queued tx exists")
                    .drop_transaction(tick);
                self.emit(EventBody::PolicyDrop {
                    agent_id: agent_id.clone(),
                    tx_id,
                    reason: "deadline cap at end of day".to_string(),
                });
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("current_tick", &self.current_tick())
            .field("current_day", &self.current_day())
            .field("num_agents", &self.state.num_agents())
            .field("num_transactions", &self.state.num_transactions())
            .field("events", &self.state.event_log().len())
            .finish()
    }
}
