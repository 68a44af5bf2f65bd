//! Proximal Policy Optimization for continuous-action, multi-agent simulators
//!
//! # Architecture
//!
//! ```text
//! Simulator (reset / step / decisions / terminals)
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  RolloutCollector                                           │
//! │  - One batched policy query per tick                        │
//! │  - Per-agent trajectories with back-filled rewards          │
//! │  - GAE on every completed episode → BatchPool               │
//! └─────────────────────────────────────────────────────────────┘
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  PPOUpdater                                                 │
//! │  - Normalized advantages, shuffled full mini-batches        │
//! │  - Clipped surrogate + value MSE − entropy bonus, Adam      │
//! └─────────────────────────────────────────────────────────────┘
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  PPOTrainer                                                 │
//! │  - Score history, "best" / "final" checkpoints              │
//! └─────────────────────────────────────────────────────────────┘
//! ```

// Core modules that don't depend on Burn
pub mod collector;
pub mod eval;
pub mod gae;
pub mod metrics;
pub mod trajectory;

// Burn-dependent modules
pub mod checkpoint;
pub mod policy;
pub mod train;
pub mod update;

// Re-export commonly used types
pub use checkpoint::{BestScoreTracker, CheckpointError, CheckpointKind, Checkpointer, FileCheckpointer};
pub use collector::{BatchPool, EpisodeSummary, Rollout, RolloutCollector, StopSignal};
pub use eval::evaluate;
pub use gae::{AdvantageEstimate, estimate_advantages};
pub use metrics::{EvaluationMetrics, MovingAverage, ScalarLogger, TrainingMetrics};
pub use policy::{ActorCritic, PolicyConfig, PolicyOutput, PolicyValue};
pub use train::{PPOTrainer, TrainConfig, TrainError, TrainOutcome};
pub use trajectory::{PendingStep, StepRecord, Trajectory, TrajectoryBuffer};
pub use update::{PPOUpdater, UpdateConfig, UpdateStats};
