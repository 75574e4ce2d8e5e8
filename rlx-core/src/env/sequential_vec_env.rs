use super::{Env, EnvironmentDescription, EpisodeInfo, StepInfo, VecEnv, VecSnapShot};
use crate::{
    error::{Error, Result},
    rng,
};
use candle_core::{IndexOp, Tensor};

#[derive(Debug, Default, Clone, Copy)]
struct EpisodeTracker {
    reward: f32,
    length: usize,
}

pub struct SequentialVecEnv<E: Env> {
    pub envs: Vec<E>,
    pub env_description: EnvironmentDescription,
    trackers: Vec<EpisodeTracker>,
}

impl<E: Env> SequentialVecEnv<E> {
    pub fn new(envs: Vec<E>) -> Result<Self> {
        let Some(first) = envs.first() else {
            return Err(Error::MissingComponent(
                "a vectorized environment needs at least one sub-environment".into(),
            ));
        };
        let env_description = first.env_description();
        let trackers = vec![EpisodeTracker::default(); envs.len()];
        Ok(Self {
            envs,
            env_description,
            trackers,
        })
    }
}

impl<E: Env> VecEnv for SequentialVecEnv<E> {
    fn num_envs(&self) -> usize {
        self.envs.len()
    }

    fn env_description(&self) -> EnvironmentDescription {
        self.env_description.clone()
    }

    fn reset(&mut self, seed: u64) -> Result<(Tensor, StepInfo)> {
        let states = self
            .envs
            .iter_mut()
            .enumerate()
            .map(|(idx, env)| env.reset(seed.wrapping_add(idx as u64)))
            .collect::<Result<Vec<_>>>()?;
        self.trackers.fill(EpisodeTracker::default());
        let info = StepInfo {
            episode: None,
            final_observations: vec![None; self.envs.len()],
        };
        Ok((Tensor::stack(&states, 0)?, info))
    }

    fn step(&mut self, actions: &Tensor) -> Result<VecSnapShot> {
        let num_envs = self.envs.len();
        let mut states = Vec::with_capacity(num_envs);
        let mut rewards = Vec::with_capacity(num_envs);
        let mut terminateds = Vec::with_capacity(num_envs);
        let mut truncateds = Vec::with_capacity(num_envs);
        let mut final_observations = vec![None; num_envs];
        let mut episode = EpisodeInfo::default();
        for (idx, env) in self.envs.iter_mut().enumerate() {
            let action = actions.i(idx)?;
            let snapshot = env.step(&action)?;
            let tracker = &mut self.trackers[idx];
            tracker.reward += snapshot.reward;
            tracker.length += 1;
            let state = if snapshot.terminated || snapshot.truncated {
                episode.rewards.push(tracker.reward);
                episode.lengths.push(tracker.length);
                *tracker = EpisodeTracker::default();
                final_observations[idx] = Some(snapshot.state);
                env.reset(rng::next_seed())?
            } else {
                snapshot.state
            };
            states.push(state);
            rewards.push(snapshot.reward);
            terminateds.push(snapshot.terminated);
            truncateds.push(snapshot.truncated);
        }
        let info = StepInfo {
            episode: (!episode.is_empty()).then_some(episode),
            final_observations,
        };
        Ok(VecSnapShot {
            observations: Tensor::stack(&states, 0)?,
            rewards,
            terminateds,
            truncateds,
            info,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::env::{SnapShot, Space};
    use candle_core::Device;

    struct Countdown {
        horizon: usize,
        t: usize,
    }

    impl Env for Countdown {
        fn reset(&mut self, _seed: u64) -> Result<Tensor> {
            self.t = 0;
            Ok(Tensor::new(&[0f32], &Device::Cpu)?)
        }

        fn step(&mut self, _action: &Tensor) -> Result<SnapShot> {
            self.t += 1;
            Ok(SnapShot {
                state: Tensor::new(&[self.t as f32], &Device::Cpu)?,
                reward: 1.,
                terminated: self.t == self.horizon,
                truncated: false,
            })
        }

        fn env_description(&self) -> EnvironmentDescription {
            EnvironmentDescription::new(Space::continous_from_dims(vec![1]), Space::Discrete(2))
        }
    }

    #[test]
    fn test_auto_reset_reports_final_observation() -> Result<()> {
        let envs = vec![
            Countdown { horizon: 2, t: 0 },
            Countdown { horizon: 3, t: 0 },
        ];
        let mut vec_env = SequentialVecEnv::new(envs)?;
        let (obs, _) = vec_env.reset(7)?;
        assert_eq!(obs.dims(), &[2, 1]);
        let actions = Tensor::new(&[0u32, 1], &Device::Cpu)?;

        let first = vec_env.step(&actions)?;
        assert!(first.info.episode.is_none());

        let second = vec_env.step(&actions)?;
        assert_eq!(second.terminateds, vec![true, false]);
        let episode = second.info.episode.clone().expect("first env finished");
        assert_eq!(episode.rewards, vec![2.]);
        assert_eq!(episode.lengths, vec![2]);
        let final_obs = second.info.final_observations[0]
            .as_ref()
            .expect("final observation recorded");
        assert_eq!(final_obs.to_vec1::<f32>()?, vec![2.]);
        assert!(second.info.final_observations[1].is_none());
        // The finished env already started over.
        assert_eq!(second.observations.to_vec2::<f32>()?, vec![vec![0.], vec![2.]]);
        Ok(())
    }

    #[test]
    fn test_empty_env_list_rejected() {
        assert!(SequentialVecEnv::<Countdown>::new(vec![]).is_err());
    }
}
