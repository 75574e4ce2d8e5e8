use anyhow::Result;
use candle_core::Device;
use rlx_agents::{OffPolicyAgent, OffPolicyConfig, common::TrainingState};
use rlx_api::test_utils::{ActionSource, ConstantRewardEnv, RecordingLogger, SpyLearner};
use rlx_core::{
    agents::Agent,
    buffers::{ReplayBuffer, Storage},
    config::AgentConfig,
    env::sequential_vec_env::SequentialVecEnv,
};
use std::path::Path;

type SpyAgent = OffPolicyAgent<SequentialVecEnv<ConstantRewardEnv>, SpyLearner<ReplayBuffer>>;

fn vec_env(num_envs: usize, episode_length: usize) -> Result<SequentialVecEnv<ConstantRewardEnv>> {
    let envs = (0..num_envs)
        .map(|_| ConstantRewardEnv::new(episode_length))
        .collect();
    Ok(SequentialVecEnv::new(envs)?)
}

fn config(work_dir: &Path, num_train_steps: usize, num_init_steps: usize) -> OffPolicyConfig {
    OffPolicyConfig {
        common: AgentConfig {
            num_train_steps,
            log_interval: 10,
            eval_interval: 10,
            num_eval_episodes: 2,
            work_dir: Some(work_dir.to_path_buf()),
            ..Default::default()
        },
        num_init_steps,
        storage_size: 10_000,
        ..Default::default()
    }
}

fn spy_agent(
    config: &OffPolicyConfig,
    num_envs: usize,
    with_eval: bool,
    logger: RecordingLogger,
) -> Result<SpyAgent> {
    let eval_env = if with_eval {
        Some(vec_env(1, 5)?)
    } else {
        None
    };
    let storage = ReplayBuffer::new(config.storage_size, 8, Device::Cpu)?;
    Ok(OffPolicyAgent::new(
        vec_env(num_envs, 5)?,
        eval_env,
        SpyLearner::default(),
        storage,
        config,
        Box::new(logger),
    )?)
}

#[test]
fn warm_up_explores_then_hands_over_to_policy() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(dir.path(), 2001, 2000);
    let mut agent = spy_agent(&config, 1, false, RecordingLogger::default())?;
    agent.train()?;

    let calls = agent.learner.policy.calls();
    assert_eq!(calls.len(), 2002);
    assert_eq!(calls[0], ActionSource::Explore);
    assert!(calls[..=2000].iter().all(|c| *c == ActionSource::Explore));
    assert_eq!(
        calls[2001],
        ActionSource::Policy {
            step: 2001,
            training: true
        }
    );
    // Updates start once the counter reaches the warm-up length.
    assert_eq!(agent.learner.updates(), vec![2000, 2001, 2002]);
    Ok(())
}

#[test]
fn global_step_grows_by_num_envs() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(dir.path(), 40, 0);
    let mut agent = spy_agent(&config, 4, false, RecordingLogger::default())?;
    agent.train()?;

    assert_eq!(agent.global_step(), 44);
    let steps: Vec<usize> = agent
        .learner
        .policy
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            ActionSource::Policy { step, .. } => Some(step),
            ActionSource::Explore => None,
        })
        .collect();
    assert_eq!(steps, (1..=10).map(|i| i * 4).collect::<Vec<_>>());
    assert_eq!(agent.storage.len(), 44);
    Ok(())
}

#[test]
fn finished_episodes_are_counted_and_logged() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let logger = RecordingLogger::default();
    let config = config(dir.path(), 30, 0);
    let mut agent = spy_agent(&config, 2, false, logger.clone())?;
    agent.train()?;

    assert_eq!(agent.global_episode(), 6);
    let record = logger.snapshot();
    let logged_steps: Vec<f64> = record
        .train
        .iter()
        .filter_map(|metrics| metrics.get("step"))
        .collect();
    assert_eq!(logged_steps, vec![10., 20., 30.]);
    for metrics in &record.train {
        assert_eq!(metrics.get("episode_reward"), Some(5.));
        assert_eq!(metrics.get("episode_length"), Some(5.));
    }
    assert!(record.info.iter().any(|msg| msg == "Training Accomplished!"));
    Ok(())
}

#[test]
fn evaluation_leaves_counters_and_storage_alone() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let logger = RecordingLogger::default();
    let config = config(dir.path(), 30, 0);
    let mut agent = spy_agent(&config, 2, true, logger.clone())?;

    let metrics = agent.eval()?;
    assert_eq!(agent.global_step(), 0);
    assert!(agent.storage.is_empty());
    assert_eq!(metrics.get("episode_reward"), Some(5.));
    assert!(
        agent
            .learner
            .policy
            .calls()
            .iter()
            .all(|call| matches!(call, ActionSource::Policy { training: false, .. }))
    );

    agent.train()?;
    let eval_steps: Vec<f64> = logger
        .snapshot()
        .eval
        .iter()
        .filter_map(|metrics| metrics.get("step"))
        .collect();
    assert_eq!(eval_steps, vec![0., 10., 20., 30.]);
    Ok(())
}

#[test]
fn eval_without_environment_fails() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(dir.path(), 10, 0);
    let mut agent = spy_agent(&config, 1, false, RecordingLogger::default())?;
    assert!(agent.eval().is_err());
    Ok(())
}

#[test]
fn pretraining_zeroes_rewards_and_saves_separately() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = config(dir.path(), 20, 0);
    config.common.pretraining = true;
    let mut agent = spy_agent(&config, 2, false, RecordingLogger::default())?;
    agent.train()?;

    assert!(agent.storage.rewards().iter().all(|r| *r == 0.));
    let out_dir = dir.path().join("pretrained");
    assert!(out_dir.join("pretrained.safetensors").exists());
    assert!(!dir.path().join("model").exists());
    let state = TrainingState::load(&out_dir)?;
    assert_eq!(state.global_step, 22);
    Ok(())
}

#[test]
fn invalid_config_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = config(dir.path(), 10, 0);
    config.update_every = 0;
    assert!(spy_agent(&config, 1, false, RecordingLogger::default()).is_err());
    Ok(())
}
