use crate::common::{AgentCore, mean};
use rlx_core::{env::VecEnv, error::Result, metrics::Metrics, policies::Policy};

/// Plays `num_eval_episodes` complete episodes with deterministic actions. Neither the
/// step counters nor any storage are touched.
pub fn evaluate<E: VecEnv, P: Policy>(
    env: &mut E,
    policy: &P,
    core: &AgentCore,
) -> Result<Metrics> {
    let num_episodes = core.config.num_eval_episodes;
    let (mut observations, _) = env.reset(core.config.seed)?;
    let mut rewards = Vec::with_capacity(num_episodes);
    let mut lengths = Vec::with_capacity(num_episodes);
    while rewards.len() < num_episodes {
        let action = policy.act(&observations, false, core.global_step)?;
        let snapshot = env.step(&action.actions)?;
        if let Some(episode) = snapshot.info.episode {
            rewards.extend(episode.rewards);
            lengths.extend(episode.lengths);
        }
        observations = snapshot.observations;
    }
    Ok(Metrics::new()
        .with("step", core.global_step as f64)
        .with("episode", core.global_episode as f64)
        .with("episode_length", mean(lengths.iter().map(|l| *l as f64)))
        .with("episode_reward", mean(rewards.iter().map(|r| *r as f64)))
        .with("total_time", core.timer.total_time()))
}
