pub mod ppo;
pub mod sim;

// Re-export commonly used types for convenience
pub use ppo::{PPOTrainer, PolicyValue, StopSignal, TrainConfig};
pub use sim::{RollerBallArena, Simulator, SimulatorGuard};
