//! Score history, training metrics and CSV scalar logging

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Bounded FIFO of values with a running mean
#[derive(Debug, Clone)]
pub struct MovingAverage {
    values: VecDeque<f32>,
    window_size: usize,
}

impl MovingAverage {
    pub fn new(window_size: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    pub fn push(&mut self, value: f32) {
        if self.values.len() >= self.window_size {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Mean of the retained values (0 when empty)
    pub fn average(&self) -> f32 {
        if self.values.is_empty() {
            0.0
        } else {
            self.values.iter().sum::<f32>() / self.values.len() as f32
        }
    }

    /// Retained values, oldest first
    pub fn values(&self) -> Vec<f32> {
        self.values.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Training metrics tracker
#[derive(Debug)]
pub struct TrainingMetrics {
    /// Episode lengths
    pub episode_lengths: MovingAverage,
    /// Policy loss
    pub policy_loss: MovingAverage,
    /// Value loss
    pub value_loss: MovingAverage,
    /// Entropy
    pub entropy: MovingAverage,
    /// Current iteration
    pub iteration: usize,
    /// Total simulator ticks
    pub total_ticks: usize,
    /// Total agent decisions
    pub total_decisions: usize,
    /// Completed episodes
    pub total_episodes: usize,
    /// Training start time
    start_time: Instant,
}

impl TrainingMetrics {
    pub fn new(window_size: usize) -> Self {
        Self {
            episode_lengths: MovingAverage::new(window_size),
            policy_loss: MovingAverage::new(window_size),
            value_loss: MovingAverage::new(window_size),
            entropy: MovingAverage::new(window_size),
            iteration: 0,
            total_ticks: 0,
            total_decisions: 0,
            total_episodes: 0,
            start_time: Instant::now(),
        }
    }

    /// Record episode completion
    pub fn record_episode(&mut self, length: usize) {
        self.episode_lengths.push(length as f32);
        self.total_episodes += 1;
    }

    /// Record training losses
    pub fn record_losses(&mut self, policy_loss: f32, value_loss: f32, entropy: f32) {
        self.policy_loss.push(policy_loss);
        self.value_loss.push(value_loss);
        self.entropy.push(entropy);
    }

    /// Update iteration counter
    pub fn update_iteration(&mut self, iteration: usize, ticks: usize, decisions: usize) {
        self.iteration = iteration;
        self.total_ticks += ticks;
        self.total_decisions += decisions;
    }

    /// Get training duration in seconds
    pub fn training_duration_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Agent decisions per second
    pub fn steps_per_second(&self) -> f64 {
        let duration = self.training_duration_secs();
        if duration > 0.0 {
            self.total_decisions as f64 / duration
        } else {
            0.0
        }
    }

    /// Log current metrics to console
    pub fn log_to_console(&self, score: f32) {
        tracing::info!(
            "Iteration {} | Ticks {} | Episodes {} | SPS {:.1}",
            self.iteration,
            self.total_ticks,
            self.total_episodes,
            self.steps_per_second()
        );
        tracing::info!(
            "  Episode: score={:.2}, length={:.1}",
            score,
            self.episode_lengths.average()
        );
        tracing::info!(
            "  Losses: policy={:.4}, value={:.4}, entropy={:.4}",
            self.policy_loss.average(),
            self.value_loss.average(),
            self.entropy.average()
        );
    }
}

impl Default for TrainingMetrics {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Appends `step,value` rows to one CSV file per tag
pub struct ScalarLogger {
    log_dir: PathBuf,
}

impl ScalarLogger {
    pub fn new(log_dir: impl AsRef<Path>) -> io::Result<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&log_dir)?;
        Ok(Self { log_dir })
    }

    /// Path of the CSV file backing a tag
    pub fn path_for(&self, tag: &str) -> PathBuf {
        self.log_dir.join(format!("{}.csv", tag.replace('/', "_")))
    }

    /// Log a scalar value
    pub fn log_scalar(&mut self, tag: &str, value: f32, step: usize) -> io::Result<()> {
        let csv_path = self.path_for(tag);
        let file_exists = csv_path.exists();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&csv_path)?;
        if !file_exists {
            writeln!(file, "step,value")?;
        }
        writeln!(file, "{},{}", step, value)
    }

    /// Log the tracked metrics for the current iteration
    pub fn log_metrics(&mut self, metrics: &TrainingMetrics, score: f32) -> io::Result<()> {
        let step = metrics.iteration;

        self.log_scalar("episode/score", score, step)?;
        self.log_scalar("episode/length", metrics.episode_lengths.average(), step)?;

        self.log_scalar("losses/policy", metrics.policy_loss.average(), step)?;
        self.log_scalar("losses/value", metrics.value_loss.average(), step)?;
        self.log_scalar("losses/entropy", metrics.entropy.average(), step)?;

        self.log_scalar("performance/ticks", metrics.total_ticks as f32, step)?;
        self.log_scalar("performance/sps", metrics.steps_per_second() as f32, step)
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

/// Evaluation metrics for a trained policy
#[derive(Debug, Clone, Default)]
pub struct EvaluationMetrics {
    /// Number of evaluation episodes
    pub num_episodes: usize,
    /// Total reward across all episodes
    pub total_reward: f32,
    /// Total decisions across all episodes
    pub total_steps: usize,
    /// Best single-episode reward
    pub best_reward: Option<f32>,
}

impl EvaluationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an evaluation episode
    pub fn record_episode(&mut self, reward: f32, steps: usize) {
        self.num_episodes += 1;
        self.total_reward += reward;
        self.total_steps += steps;
        self.best_reward = Some(self.best_reward.map_or(reward, |best| best.max(reward)));
    }

    /// Get average reward
    pub fn avg_reward(&self) -> f32 {
        if self.num_episodes > 0 {
            self.total_reward / self.num_episodes as f32
        } else {
            0.0
        }
    }

    /// Get average episode length
    pub fn avg_steps(&self) -> f32 {
        if self.num_episodes > 0 {
            self.total_steps as f32 / self.num_episodes as f32
        } else {
            0.0
        }
    }

    /// Print summary
    pub fn print_summary(&self) {
        tracing::info!("=== Evaluation Summary ===");
        tracing::info!("Episodes: {}", self.num_episodes);
        tracing::info!("Avg Reward: {:.2}", self.avg_reward());
        tracing::info!("Best Reward: {:.2}", self.best_reward.unwrap_or(0.0));
        tracing::info!("Avg Steps: {:.1}", self.avg_steps());
    }
}
