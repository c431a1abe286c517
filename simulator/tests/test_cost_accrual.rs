//! Cost accrual through the tick loop: overdraft, delay, collateral
//! carrying, and end-of-day penalties, all in truncating integer bps.

use rtgs_sim_core::arrivals::ScheduledEvent;
use rtgs_sim_core::costs::CostRates;
use rtgs_sim_core::orchestrator::{AgentConfig, Orchestrator, ScenarioConfig};
use rtgs_sim_core::policy::tree::PolicyDef;
use rtgs_sim_core::settlement::lsm::LsmConfig;

fn agent(id: &str, balance: i64) -> AgentConfig {
    AgentConfig {
        id: id.to_string(),
        opening_balance: balance,
        unsecured_cap: 0,
        max_collateral_capacity: None,
        liquidity_pool: None,
        liquidity_allocation_fraction: None,
        policy: PolicyDef::default(),
    }
}

fn payment(from: &str, to: &str, amount: i64, arrival: u64, deadline: u64) -> ScheduledEvent {
    ScheduledEvent {
        from_agent: from.to_string(),
        to_agent: to.to_string(),
        amount,
        priority: 5,
        arrival_tick: arrival,
        deadline_tick: deadline,
        is_divisible: false,
    }
}

fn zero_rates() -> CostRates {
    CostRates {
        delay_cost_per_tick_bps: 0,
        overdraft_cost_per_tick_bps: 0,
        collateral_cost_per_tick_bps: 0,
        deadline_penalty_bps: 0,
        eod_penalty_bps: 0,
        split_friction: 0,
    }
}

fn scenario(
    agents: Vec<AgentConfig>,
    events: Vec<ScheduledEvent>,
    rates: CostRates,
    ticks_per_day: u32,
) -> ScenarioConfig {
    ScenarioConfig {
        ticks_per_day,
        num_days: 1,
        rng_seed: 5,
        simulation_id: None,
        deferred_crediting: false,
        deadline_cap_at_eod: false,
        allow_early_drop: false,
        cost_rates: rates,
        agents,
        scenario_events: events,
        arrivals: vec![],
        lsm_config: LsmConfig::default(),
    }
}

#[test]
fn test_overdraft_cost_per_tick_on_negative_balance() {
    let mut bank_a = agent("BANK_A", 0);
    bank_a.unsecured_cap = 10_000;

    let config = scenario(
        vec![bank_a, agent("BANK_B", 0)],
        vec![payment("BANK_A", "BANK_B", 5_000, 0, 9)],
        CostRates {
            overdraft_cost_per_tick_bps: 10,
            ..zero_rates()
        },
        10,
    );
    let mut orchestrator = Orchestrator::new(config).unwrap();
    for _ in 0..3 {
        orchestrator.tick();
    }

    let costs = &orchestrator.current_metrics().per_agent["BANK_A"];
    // 10 bps of the 5_000c overdraft, three ticks
    assert_eq!(costs.total_overdraft_cost, 15);
    assert_eq!(costs.peak_net_debit, -5_000);
    // receiver accrues nothing
    assert_eq!(
        orchestrator.current_metrics().per_agent["BANK_B"].total(),
        0
    );
}

#[test]
fn test_delay_and_eod_penalty_for_held_payment() {
    let mut bank_a = agent("BANK_A", 1_000_000);
    bank_a.policy = serde_json::from_str(
        r#"{"payment_tree": {"node_id": "A1", "type": "action", "action": "Hold"}}"#,
    )
    .unwrap();

    let config = scenario(
        vec![bank_a, agent("BANK_B", 0)],
        vec![payment("BANK_A", "BANK_B", 100_000, 0, 50)],
        CostRates {
            delay_cost_per_tick_bps: 1,
            eod_penalty_bps: 1_000,
            ..zero_rates()
        },
        5,
    );
    let mut orchestrator = Orchestrator::new(config).unwrap();
    orchestrator.run();

    let costs = &orchestrator.current_metrics().per_agent["BANK_A"];
    // 1 bp of 100_000c = 10c per pending tick after arrival: ticks 1..=4
    assert_eq!(costs.total_delay_cost, 40);
    // 10% of the remaining amount at the day boundary
    assert_eq!(costs.total_eod_penalty_cost, 10_000);
}

#[test]
fn test_collateral_carrying_cost() {
    let mut bank_a = agent("BANK_A", 0);
    bank_a.max_collateral_capacity = Some(50_000);
    bank_a.policy = serde_json::from_str(
        r#"{
            "strategic_collateral_tree": {
                "node_id": "C1",
                "type": "action",
                "action": "PostCollateral",
                "parameters": {"amount": {"value": 50000}}
            }
        }"#,
    )
    .unwrap();

    let config = scenario(
        vec![bank_a, agent("BANK_B", 0)],
        vec![],
        CostRates {
            collateral_cost_per_tick_bps: 2,
            ..zero_rates()
        },
        4,
    );
    let mut orchestrator = Orchestrator::new(config).unwrap();
    orchestrator.run();

    // 2 bps of 50_000c = 10c per tick, four ticks
    let costs = &orchestrator.current_metrics().per_agent["BANK_A"];
    assert_eq!(costs.total_collateral_cost, 40);
}

#[test]
fn test_truncating_bps_products() {
    // 1 bp of 9_999c truncates to 0: tiny queued values accrue nothing
    let mut bank_a = agent("BANK_A", 1_000_000);
    bank_a.policy = serde_json::from_str(
        r#"{"payment_tree": {"node_id": "A1", "type": "action", "action": "Hold"}}"#,
    )
    .unwrap();

    let config = scenario(
        vec![bank_a, agent("BANK_B", 0)],
        vec![payment("BANK_A", "BANK_B", 9_999, 0, 50)],
        CostRates {
            delay_cost_per_tick_bps: 1,
            ..zero_rates()
        },
        5,
    );
    let mut orchestrator = Orchestrator::new(config).unwrap();
    orchestrator.run();

    assert_eq!(
        orchestrator.current_metrics().per_agent["BANK_A"].total_delay_cost,
        0
    );
}

#[test]
fn test_cost_accrual_events_match_accumulators() {
    let mut bank_a = agent("BANK_A", 0);
    bank_a.unsecured_cap = 10_000;

    let config = scenario(
        vec![bank_a, agent("BANK_B", 0)],
        vec![payment("BANK_A", "BANK_B", 5_000, 0, 9)],
        CostRates {
            overdraft_cost_per_tick_bps: 10,
            ..zero_rates()
        },
        10,
    );
    let mut orchestrator = Orchestrator::new(config).unwrap();
    orchestrator.run();

    let logged: i64 = orchestrator
        .event_log()
        .events_of_type("CostAccrual")
        .iter()
        .map(|event| match &event.body {
            rtgs_sim_core::models::event::EventBody::CostAccrual { costs, .. } => costs.total(),
            _ => unreachable!(),
        })
        .sum();
    assert_eq!(logged, orchestrator.current_metrics().system_total_cost);
}
