//! PPO training loop: collect, update, checkpoint

use std::error::Error;
use std::fmt;

use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::sim::{Simulator, SimulatorError, SimulatorGuard};

use super::checkpoint::{BestScoreTracker, CheckpointError, CheckpointKind, Checkpointer};
use super::collector::{RolloutCollector, StopSignal};
use super::metrics::{MovingAverage, ScalarLogger, TrainingMetrics};
use super::policy::{ActorCritic, PolicyConfig};
use super::update::{PPOUpdater, UpdateConfig, UpdateStats};

/// Training configuration
#[derive(Debug, Config)]
pub struct TrainConfig {
    /// Number of collect/update iterations
    #[config(default = 1000)]
    pub num_iterations: usize,
    /// Simulator ticks per collection
    #[config(default = 2048)]
    pub horizon: usize,
    /// Discount factor
    #[config(default = 0.99)]
    pub gamma: f32,
    /// GAE smoothing factor
    #[config(default = 0.95)]
    pub gae_lambda: f32,
    /// Seed for weight initialisation, action sampling and mini-batch shuffling
    #[config(default = 42)]
    pub seed: u64,
    /// Episodes kept in the score history
    #[config(default = 100)]
    pub score_window: usize,
    /// Completed episodes required before a "best" checkpoint is considered
    #[config(default = 10)]
    pub min_episodes_for_checkpoint: usize,
    #[config(default = "PolicyConfig::new()")]
    pub policy: PolicyConfig,
    #[config(default = "UpdateConfig::new()")]
    pub update: UpdateConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub enum TrainError {
    Simulator(SimulatorError),
    Checkpoint(CheckpointError),
}

impl fmt::Display for TrainError {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TrainError::Simulator(err) => write!(formatter, "training aborted: {}", err),
            TrainError::Checkpoint(err) => write!(formatter, "training aborted: {}", err),
        }
    }
}

impl Error for TrainError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainError::Simulator(err) => Some(err),
            TrainError::Checkpoint(err) => Some(err),
        }
    }
}

impl From<SimulatorError> for TrainError {
    fn from(err: SimulatorError) -> Self {
        TrainError::Simulator(err)
    }
}

impl From<CheckpointError> for TrainError {
    fn from(err: CheckpointError) -> Self {
        TrainError::Checkpoint(err)
    }
}

/// How a training run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainOutcome {
    /// All iterations ran and the final checkpoint was written
    Completed,
    /// Stopped on request; no final checkpoint
    Interrupted,
}

/// PPO Trainer - collects rollouts and performs PPO updates
pub struct PPOTrainer<B: AutodiffBackend> {
    model: ActorCritic<B>,
    updater: PPOUpdater<B>,
    collector: RolloutCollector,
    scores: MovingAverage,
    best: BestScoreTracker,
    metrics: TrainingMetrics,
    scalar_log: Option<ScalarLogger>,
    rng: StdRng,
    obs_dim: usize,
    action_dim: usize,
    config: TrainConfig,
}

impl<B: AutodiffBackend> PPOTrainer<B> {
    /// Seeds the backend RNG (shared process-wide) before initialising the model
    pub fn new(device: B::Device, obs_dim: usize, action_dim: usize, config: TrainConfig) -> Self {
        B::seed(config.seed);
        let model = ActorCritic::new(&device, obs_dim, action_dim, &config.policy);
        let updater = PPOUpdater::new(device, config.update.clone());

        Self {
            model,
            updater,
            collector: RolloutCollector::new(config.gamma, config.gae_lambda),
            scores: MovingAverage::new(config.score_window),
            best: BestScoreTracker::new(config.min_episodes_for_checkpoint),
            metrics: TrainingMetrics::new(config.score_window),
            scalar_log: None,
            rng: StdRng::seed_from_u64(config.seed),
            obs_dim,
            action_dim,
            config,
        }
    }

    /// Also append per-iteration scalars as CSV
    pub fn with_scalar_log(mut self, logger: ScalarLogger) -> Self {
        self.scalar_log = Some(logger);
        self
    }

    pub fn model(&self) -> &ActorCritic<B> {
        &self.model
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Score history of completed episodes
    pub fn scores(&self) -> &MovingAverage {
        &self.scores
    }

    pub fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }

    /// Run the training loop. The simulator is closed on every exit path.
    pub fn train<S, C>(
        &mut self,
        simulator: S,
        checkpointer: &mut C,
        stop: &StopSignal,
    ) -> Result<TrainOutcome, TrainError>
    where
        S: Simulator,
        C: Checkpointer<B> + ?Sized,
    {
        let mut sim = SimulatorGuard::new(simulator);
        let outcome = self.run(&mut *sim, checkpointer, stop)?;
        sim.close()?;
        Ok(outcome)
    }

    fn run<S, C>(
        &mut self,
        sim: &mut S,
        checkpointer: &mut C,
        stop: &StopSignal,
    ) -> Result<TrainOutcome, TrainError>
    where
        S: Simulator + ?Sized,
        C: Checkpointer<B> + ?Sized,
    {
        if sim.observation_size() != self.obs_dim || sim.action_size() != self.action_dim {
            return Err(SimulatorError::Other {
                message: format!(
                    "simulator reports obs/action sizes {}/{}, policy expects {}/{}",
                    sim.observation_size(),
                    sim.action_size(),
                    self.obs_dim,
                    self.action_dim
                ),
            }
            .into());
        }

        tracing::info!(
            "Starting training for {} iterations (horizon {})",
            self.config.num_iterations,
            self.config.horizon
        );

        for iteration in 1..=self.config.num_iterations {
            let policy = self.model.valid();
            let rollout = self.collector.collect(
                sim,
                &policy,
                self.config.horizon,
                &mut self.scores,
                stop,
            )?;

            if rollout.interrupted {
                tracing::info!("Training interrupted during iteration {}", iteration);
                return Ok(TrainOutcome::Interrupted);
            }

            for episode in &rollout.episodes {
                self.metrics.record_episode(episode.length);
            }
            self.metrics
                .update_iteration(iteration, rollout.ticks, rollout.decisions);

            let (model, stats) = self
                .updater
                .update(self.model.clone(), &rollout.pool, &mut self.rng);
            self.model = model;

            match stats {
                Some(stats) => {
                    self.report(stats);
                    if let Some(score) = self.best.check(&self.scores) {
                        tracing::info!("New best average score {:.3}", score);
                        checkpointer.save(CheckpointKind::Best, &self.model)?;
                    }
                }
                None => tracing::info!(
                    "Iteration {}: collecting data ({} samples, need more than {})",
                    iteration,
                    rollout.pool.len(),
                    self.updater.config().mini_batch_size
                ),
            }

            if stop.is_stop_requested() {
                tracing::info!("Training interrupted after iteration {}", iteration);
                return Ok(TrainOutcome::Interrupted);
            }
        }

        checkpointer.save(CheckpointKind::Final, &self.model)?;
        tracing::info!("Training complete!");
        Ok(TrainOutcome::Completed)
    }

    fn report(&mut self, stats: UpdateStats) {
        self.metrics
            .record_losses(stats.policy_loss, stats.value_loss, stats.entropy);
        tracing::debug!("Update ran {} mini-batches", stats.minibatches);

        let score = self.scores.average();
        self.metrics.log_to_console(score);

        if let Some(logger) = self.scalar_log.as_mut() {
            if let Err(err) = logger.log_metrics(&self.metrics, score) {
                tracing::warn!("Failed to write scalar log: {}", err);
            }
        }
    }
}
