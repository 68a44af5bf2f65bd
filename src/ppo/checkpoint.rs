//! Policy checkpoints: "best" on score improvement, "final" at the end of a run

use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, RecorderError};

use super::metrics::MovingAverage;
use super::policy::ActorCritic;

/// Logical checkpoint names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckpointKind {
    /// Overwritten whenever the moving score average improves
    Best,
    /// Written once when training completes
    Final,
}

impl CheckpointKind {
    pub fn name(self) -> &'static str {
        match self {
            CheckpointKind::Best => "best",
            CheckpointKind::Final => "final",
        }
    }
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

#[derive(Debug)]
pub enum CheckpointError {
    Io { path: PathBuf, source: std::io::Error },
    Record { path: PathBuf, source: RecorderError },
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CheckpointError::Io { path, source } => {
                write!(formatter, "checkpoint directory {}: {}", path.display(), source)
            }
            CheckpointError::Record { path, source } => {
                write!(formatter, "checkpoint {}: {:?}", path.display(), source)
            }
        }
    }
}

impl Error for CheckpointError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CheckpointError::Io { source, .. } => Some(source),
            CheckpointError::Record { .. } => None,
        }
    }
}

/// Persists policy snapshots under a logical name
pub trait Checkpointer<B: Backend> {
    fn save(&mut self, kind: CheckpointKind, model: &ActorCritic<B>) -> Result<(), CheckpointError>;
}

/// Writes `<dir>/<name>.mpk` with Burn's named MessagePack recorder
#[derive(Debug, Clone)]
pub struct FileCheckpointer {
    dir: PathBuf,
}

impl FileCheckpointer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path without extension; the recorder appends `.mpk`
    pub fn path_for(&self, kind: CheckpointKind) -> PathBuf {
        self.dir.join(kind.name())
    }

    /// Load a checkpoint into a freshly constructed model
    pub fn load<B: Backend>(
        &self,
        kind: CheckpointKind,
        model: ActorCritic<B>,
        device: &B::Device,
    ) -> Result<ActorCritic<B>, CheckpointError> {
        let path = self.path_for(kind);
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let model = model
            .load_file(path.clone(), &recorder, device)
            .map_err(|source| CheckpointError::Record { path: path.clone(), source })?;
        tracing::info!("Loaded checkpoint from {}", path.display());
        Ok(model)
    }
}

impl<B: Backend> Checkpointer<B> for FileCheckpointer {
    fn save(&mut self, kind: CheckpointKind, model: &ActorCritic<B>) -> Result<(), CheckpointError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| CheckpointError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.path_for(kind);
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        model
            .clone()
            .save_file(path.clone(), &recorder)
            .map_err(|source| CheckpointError::Record { path: path.clone(), source })?;
        tracing::info!("Saved {} checkpoint to {}", kind, path.display());
        Ok(())
    }
}

/// Decides when the moving score average warrants a new "best" checkpoint
#[derive(Debug, Clone)]
pub struct BestScoreTracker {
    best: f32,
    min_episodes: usize,
}

impl BestScoreTracker {
    pub fn new(min_episodes: usize) -> Self {
        Self {
            best: f32::NEG_INFINITY,
            min_episodes,
        }
    }

    /// Best average seen so far (−∞ until the first improvement)
    pub fn best(&self) -> f32 {
        self.best
    }

    /// Returns the new best average if `scores` strictly beats every previous
    /// one and holds at least `min_episodes` entries
    pub fn check(&mut self, scores: &MovingAverage) -> Option<f32> {
        if scores.len() < self.min_episodes {
            return None;
        }
        let average = scores.average();
        if average > self.best {
            self.best = average;
            Some(average)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ppo::policy::{PolicyConfig, PolicyValue, tensor_to_vec};
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn history(values: &[f32]) -> MovingAverage {
        let mut scores = MovingAverage::new(100);
        values.iter().for_each(|&v| scores.push(v));
        scores
    }

    #[test]
    fn test_checkpoint_names() {
        assert_eq!(CheckpointKind::Best.name(), "best");
        assert_eq!(CheckpointKind::Final.to_string(), "final");
    }

    #[test]
    fn test_no_checkpoint_before_min_episodes() {
        let mut tracker = BestScoreTracker::new(10);
        assert_eq!(tracker.check(&history(&[100.0; 9])), None);
        assert_eq!(tracker.best(), f32::NEG_INFINITY);
        assert_eq!(tracker.check(&history(&[100.0; 10])), Some(100.0));
    }

    #[test]
    fn test_best_only_on_strict_improvement() {
        let mut tracker = BestScoreTracker::new(10);

        assert_eq!(tracker.check(&history(&[1.0; 10])), Some(1.0));
        // Equal is not an improvement
        assert_eq!(tracker.check(&history(&[1.0; 20])), None);
        assert_eq!(tracker.check(&history(&[0.5; 20])), None);
        assert_eq!(tracker.check(&history(&[2.0; 20])), Some(2.0));
        assert_eq!(tracker.check(&history(&[1.5; 20])), None);
        assert_eq!(tracker.best(), 2.0);
    }

    #[test]
    fn test_negative_scores_still_checkpoint() {
        let mut tracker = BestScoreTracker::new(10);
        assert_eq!(tracker.check(&history(&[-5.0; 10])), Some(-5.0));
    }

    #[test]
    fn test_file_checkpoint_round_trip() {
        let device = Default::default();
        let dir = std::env::temp_dir().join(format!("ppo_checkpoint_{}", std::process::id()));
        let mut checkpointer = FileCheckpointer::new(&dir);

        let model = ActorCritic::<TestBackend>::new(&device, 3, 2, &PolicyConfig::default());
        checkpointer.save(CheckpointKind::Best, &model).unwrap();

        let fresh = ActorCritic::<TestBackend>::new(&device, 3, 2, &PolicyConfig::default());
        let loaded = checkpointer
            .load(CheckpointKind::Best, fresh, &device)
            .unwrap();

        let observations = vec![vec![0.3, -0.2, 0.9]];
        assert_eq!(model.mean_actions(&observations), loaded.mean_actions(&observations));
        assert_eq!(
            tensor_to_vec(model.log_std.val()),
            tensor_to_vec(loaded.log_std.val())
        );

        std::fs::remove_dir_all(&dir).ok();
    }
}
