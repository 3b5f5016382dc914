//! End-to-end training loop against the mock simulator.
use parkrl_core::agent::{Agent, AgentConfig, BaselineOptimizer, UpdateConfig, UpdateUnit};
use parkrl_core::record::BufferedRecorder;
use parkrl_core::{
    EstimateAdvantage, Horizon, MemoryConfig, MemoryKind, Parameter, ReturnConfig, ScheduleUnit,
    Trainer, TrainerConfig,
};
use parkrl_linear_agent::{
    LinearBaseline, LinearBaselineConfig, LinearPolicyConfig, LinearSoftmaxPolicy,
};
use parkrl_netlogo_env::{
    FeeActionSet, MockSimulator, MockSimulatorConfig, ParkingEnv, ParkingEnvConfig, ParkingObs,
    RewardFunction,
};

const OBS_DIM: usize = 11;

fn env_config() -> ParkingEnvConfig<MockSimulator> {
    // Two simulated hours per episode keeps the test fast: four steps at
    // resolution 24.
    ParkingEnvConfig::<MockSimulator>::new(MockSimulatorConfig::default())
        .reward(RewardFunction::Occupancy)
        .action_set(FeeActionSet::SmallDelta)
        .episode_hours(2.0)
}

#[test]
fn trains_against_the_mock_simulator() {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = env_config();
    let spec = config.action_set.action_spec(&config.zones);

    let agent_config = AgentConfig::new(
        UpdateConfig::new(UpdateUnit::Episodes, 2),
        ReturnConfig::default()
            .horizon(Horizon::Episode)
            .discount(0.99)
            .estimate_advantage(EstimateAdvantage::Late),
    )
    .max_episode_timesteps(8)
    .memory(MemoryConfig::default().kind(MemoryKind::Recent))
    .baseline_optimizer(BaselineOptimizer::Separate)
    .exploration(Parameter::Linear {
        unit: ScheduleUnit::Episodes,
        num_steps: 4,
        initial_value: 0.3,
        final_value: 0.0,
    })
    .learning_rate(0.01)
    .seed(11);

    let policy = LinearSoftmaxPolicy::build(&LinearPolicyConfig::new(OBS_DIM), spec.clone());
    let baseline = LinearBaseline::build(&LinearBaselineConfig::new(OBS_DIM));
    let mut agent = Agent::build(agent_config, spec, policy, Some(baseline)).unwrap();

    let trainer_config = TrainerConfig::default()
        .max_episodes(6)
        .max_episode_steps(8)
        .seed(3);
    let mut trainer = Trainer::<ParkingEnv<MockSimulator>>::build(trainer_config, config);

    let mut recorder = BufferedRecorder::new();
    trainer.train(&mut agent, &mut recorder).unwrap();

    let episode_records: Vec<f32> = recorder
        .iter()
        .filter_map(|r| r.get_scalar("episode_return").ok())
        .collect();
    assert_eq!(episode_records.len(), 6);
    // The occupancy reward is bounded by 1 per step, four steps per episode.
    assert!(episode_records.iter().all(|&r| r > 0.0 && r <= 4.0));

    let update_records: Vec<_> = recorder
        .iter()
        .filter(|r| r.get_scalar("policy_loss").is_ok())
        .collect();
    assert_eq!(update_records.len(), 3);
    for record in &update_records {
        assert!(record.get_scalar("baseline_loss").is_ok());
        assert!(record.get_scalar("entropy").unwrap() > 0.0);
        assert!(record.get_scalar("update_advantage").is_ok());
    }

    assert_eq!(agent.clock().episodes, 6);
    assert_eq!(agent.clock().timesteps, 24);
    assert_eq!(agent.clock().updates, 3);
}

#[test]
fn evaluation_runs_deterministically() {
    let config = env_config();
    let spec = config.action_set.action_spec(&config.zones);
    let policy = LinearSoftmaxPolicy::build(&LinearPolicyConfig::new(OBS_DIM), spec.clone());

    let agent_config = AgentConfig::new(
        UpdateConfig::new(UpdateUnit::Episodes, 1),
        ReturnConfig::default().discount(0.99),
    )
    .max_episode_timesteps(8)
    .seed(5);
    let mut agent =
        Agent::<ParkingObs, LinearSoftmaxPolicy>::build(agent_config, spec, policy, None).unwrap();

    let mut env = <ParkingEnv<MockSimulator> as parkrl_core::Env>::build(&config, 9).unwrap();
    let returns = parkrl_core::evaluate(&mut env, &mut agent, 2).unwrap();
    assert_eq!(returns.len(), 2);
    assert!(returns.iter().all(|&r| r.is_finite()));
}
