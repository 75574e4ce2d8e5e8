use candle_core::Device;
use rlx_core::{
    config::AgentConfig,
    env::StepInfo,
    error::{Error, Result},
    logger::Logger,
    metrics::Metrics,
    policies::Policy,
    rng,
    timer::Timer,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
};

pub const EPISODE_WINDOW: usize = 10;
pub const TRAINING_STATE_FILE: &str = "state.bin";

#[derive(Debug, Clone)]
pub struct EpisodeWindow {
    capacity: usize,
    rewards: VecDeque<f32>,
    lengths: VecDeque<usize>,
}

impl Default for EpisodeWindow {
    fn default() -> Self {
        Self::new(EPISODE_WINDOW)
    }
}

impl EpisodeWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            rewards: VecDeque::with_capacity(capacity),
            lengths: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, reward: f32, length: usize) {
        if self.capacity == 0 {
            return;
        }
        if self.rewards.len() == self.capacity {
            self.rewards.pop_front();
            self.lengths.pop_front();
        }
        self.rewards.push_back(reward);
        self.lengths.push_back(length);
    }

    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }

    pub fn mean_reward(&self) -> f64 {
        mean(self.rewards.iter().map(|r| *r as f64))
    }

    pub fn mean_length(&self) -> f64 {
        mean(self.lengths.iter().map(|l| *l as f64))
    }
}

pub(crate) fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let count = values.len();
    if count == 0 {
        return 0.0;
    }
    values.sum::<f64>() / count as f64
}

/// Fires once every time the step counter reaches or passes the next multiple of
/// the interval. The first firing is at step zero.
#[derive(Debug, Clone)]
pub struct IntervalTrigger {
    interval: usize,
    next: usize,
}

impl IntervalTrigger {
    pub fn new(interval: usize) -> Self {
        Self {
            interval: interval.max(1),
            next: 0,
        }
    }

    pub fn is_due(&mut self, step: usize) -> bool {
        if step < self.next {
            return false;
        }
        self.next = (step / self.interval + 1) * self.interval;
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingState {
    pub global_step: usize,
    pub global_episode: usize,
}

impl TrainingState {
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(TRAINING_STATE_FILE);
        let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())?;
        fs::write(&path, bytes).map_err(|err| Error::io(&path, err))?;
        Ok(path)
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(TRAINING_STATE_FILE);
        let bytes = fs::read(&path).map_err(|err| Error::io(&path, err))?;
        let (state, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
        Ok(state)
    }
}

pub struct AgentCore {
    pub config: AgentConfig,
    pub device: Device,
    pub global_step: usize,
    pub global_episode: usize,
    pub episodes: EpisodeWindow,
    pub logger: Box<dyn Logger>,
    pub timer: Timer,
    log_trigger: IntervalTrigger,
    eval_trigger: IntervalTrigger,
}

impl AgentCore {
    pub fn new(config: AgentConfig, logger: Box<dyn Logger>) -> Result<Self> {
        config.validate()?;
        rng::seed(config.seed);
        let device = config.device.to_device()?;
        Ok(Self {
            device,
            global_step: 0,
            global_episode: 0,
            episodes: EpisodeWindow::default(),
            logger,
            timer: Timer::new(),
            log_trigger: IntervalTrigger::new(config.log_interval),
            eval_trigger: IntervalTrigger::new(config.eval_interval),
            config,
        })
    }

    pub fn eval_due(&mut self) -> bool {
        self.eval_trigger.is_due(self.global_step)
    }

    pub fn record_episodes(&mut self, info: &StepInfo) {
        let Some(episode) = info.episode.as_ref() else {
            return;
        };
        for (reward, length) in episode.rewards.iter().zip(episode.lengths.iter()) {
            self.episodes.push(*reward, *length);
        }
        self.global_episode += episode.len();
    }

    pub fn maybe_log_train(&mut self, update_metrics: &Metrics) {
        if !self.log_trigger.is_due(self.global_step) || self.episodes.is_empty() {
            return;
        }
        let total_time = self.timer.total_time();
        let mut metrics = Metrics::new()
            .with("step", self.global_step as f64)
            .with("episode", self.global_episode as f64)
            .with("episode_length", self.episodes.mean_length())
            .with("episode_reward", self.episodes.mean_reward())
            .with("fps", self.global_step as f64 / total_time.max(f64::EPSILON))
            .with("total_time", total_time);
        for (name, value) in update_metrics.iter() {
            metrics.insert(name, value);
        }
        self.logger.train(&metrics);
    }

    pub fn training_state(&self) -> TrainingState {
        TrainingState {
            global_step: self.global_step,
            global_episode: self.global_episode,
        }
    }

    pub fn save_checkpoint(&mut self, policy: &impl Policy) -> Result<PathBuf> {
        let dir = self.config.output_dir();
        policy.save(&dir, self.config.pretraining)?;
        self.training_state().save(&dir)?;
        self.logger
            .info(&format!("Model saved at: {}", dir.display()));
        Ok(dir)
    }

    pub fn load_initial_model(&mut self, policy: &mut impl Policy) -> Result<()> {
        let Some(path) = self.config.init_model_path.clone() else {
            return Ok(());
        };
        policy.load(&path)?;
        self.logger
            .info(&format!("Initial model loaded from: {}", path.display()));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rlx_core::env::EpisodeInfo;

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut window = EpisodeWindow::default();
        for idx in 0..25 {
            window.push(idx as f32, idx);
            assert!(window.len() <= EPISODE_WINDOW);
        }
        // Episodes 15..25 remain.
        assert_eq!(window.mean_reward(), 19.5);
        assert_eq!(window.mean_length(), 19.5);
    }

    #[test]
    fn test_empty_window_means_are_zero() {
        let window = EpisodeWindow::default();
        assert_eq!(window.mean_reward(), 0.0);
        assert!(window.is_empty());
    }

    #[test]
    fn test_interval_crossing() {
        let mut trigger = IntervalTrigger::new(10);
        assert!(trigger.is_due(0));
        assert!(!trigger.is_due(4));
        assert!(!trigger.is_due(8));
        // 12 crosses 10 even though it is not a multiple of it.
        assert!(trigger.is_due(12));
        assert!(!trigger.is_due(16));
        assert!(trigger.is_due(20));
        assert!(trigger.is_due(35));
        assert!(!trigger.is_due(39));
    }

    #[test]
    fn test_training_state_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir().map_err(|err| Error::io("tempdir", err))?;
        let state = TrainingState {
            global_step: 4096,
            global_episode: 17,
        };
        state.save(dir.path())?;
        assert_eq!(TrainingState::load(dir.path())?, state);
        Ok(())
    }

    #[test]
    fn test_record_episodes_counts() -> Result<()> {
        let mut core = AgentCore::new(
            AgentConfig::default(),
            Box::new(rlx_core::logger::TracingLogger::new("test")),
        )?;
        let info = StepInfo {
            episode: Some(EpisodeInfo {
                rewards: vec![1., 3.],
                lengths: vec![5, 7],
            }),
            final_observations: vec![],
        };
        core.record_episodes(&info);
        core.record_episodes(&StepInfo::default());
        assert_eq!(core.global_episode, 2);
        assert_eq!(core.episodes.mean_reward(), 2.0);
        Ok(())
    }
}
