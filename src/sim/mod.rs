//! Simulator interface consumed by the rollout collector
//!
//! The trainer never talks to a simulator transport directly. Anything that
//! can report which agents are waiting for a decision, which episodes ended,
//! and accept a batch of continuous actions can be driven by the collector.

use std::error::Error;
use std::fmt;
use std::ops::{Deref, DerefMut};

pub mod roller_ball;

pub use roller_ball::{ArenaConfig, RollerBallArena};

/// Opaque agent key, valid for one episode. The simulator may hand the same
/// id out again for a later, unrelated episode.
pub type AgentId = u32;

/// An agent waiting for an action this tick
#[derive(Debug, Clone)]
pub struct DecisionStep {
    pub agent_id: AgentId,
    /// Observation vector [obs_dim]
    pub observation: Vec<f32>,
    /// Reward produced by the agent's previous action (0 on the first decision)
    pub reward: f32,
}

/// An agent whose episode ended this tick
#[derive(Debug, Clone)]
pub struct TerminalStep {
    pub agent_id: AgentId,
    /// Reward produced by the agent's last action
    pub reward: f32,
}

#[derive(Debug)]
pub enum SimulatorError {
    Disconnected,
    InvalidAction { agent_id: AgentId, expected: usize, actual: usize },
    UnknownAgent { agent_id: AgentId },
    Other { message: String },
}

impl fmt::Display for SimulatorError {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SimulatorError::Disconnected => write!(formatter, "simulator disconnected"),
            SimulatorError::InvalidAction {
                agent_id,
                expected,
                actual,
            } => write!(
                formatter,
                "action for agent {} has {} dimensions, expected {}",
                agent_id, actual, expected
            ),
            SimulatorError::UnknownAgent { agent_id } => {
                write!(formatter, "agent {} is not awaiting a decision", agent_id)
            }
            SimulatorError::Other { message } => write!(formatter, "simulator error: {}", message),
        }
    }
}

impl Error for SimulatorError {}

/// Vectorized step/observation exchange with a multi-agent simulator
pub trait Simulator {
    /// Observation dimension, fixed for the lifetime of a run
    fn observation_size(&self) -> usize;

    /// Action dimension, fixed for the lifetime of a run
    fn action_size(&self) -> usize;

    /// Start fresh episodes for every agent
    fn reset(&mut self) -> Result<(), SimulatorError>;

    /// Advance by one tick, blocking until the next observations are ready
    fn step(&mut self) -> Result<(), SimulatorError>;

    /// Agents awaiting a decision after the last reset/step
    fn active_agents(&self) -> Vec<DecisionStep>;

    /// Agents whose episode ended during the last step
    fn terminated_agents(&self) -> Vec<TerminalStep>;

    /// Queue actions for the next step
    fn submit_actions(&mut self, actions: &[(AgentId, Vec<f32>)]) -> Result<(), SimulatorError>;

    /// Release simulator resources
    fn close(&mut self) -> Result<(), SimulatorError>;
}

/// Owns a simulator and closes it when dropped, whichever way the owner exits
pub struct SimulatorGuard<S: Simulator> {
    simulator: S,
    closed: bool,
}

impl<S: Simulator> SimulatorGuard<S> {
    pub fn new(simulator: S) -> Self {
        Self {
            simulator,
            closed: false,
        }
    }

    /// Close now and report the result instead of deferring to drop
    pub fn close(mut self) -> Result<(), SimulatorError> {
        self.closed = true;
        let result = self.simulator.close();
        if result.is_ok() {
            tracing::info!("Simulator connection closed");
        }
        result
    }
}

impl<S: Simulator> Deref for SimulatorGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.simulator
    }
}

impl<S: Simulator> DerefMut for SimulatorGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.simulator
    }
}

impl<S: Simulator> Drop for SimulatorGuard<S> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        match self.simulator.close() {
            Ok(()) => tracing::info!("Simulator connection closed"),
            Err(err) => tracing::warn!("Failed to close simulator: {}", err),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted simulator used by collector and trainer tests

    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    /// One agent's scripted episode: decisions on `0..length` ticks after
    /// reset, terminal signal after the `length`-th step.
    #[derive(Debug, Clone)]
    pub struct ScriptedEpisode {
        pub agent_id: AgentId,
        pub length: usize,
        /// Reward attached to every decision after the first
        pub step_reward: f32,
        pub terminal_reward: f32,
    }

    pub struct ScriptedSimulator {
        pub episodes: Vec<ScriptedEpisode>,
        /// Restart an agent's episode right after it terminates
        pub repeat: bool,
        pub fail_on_step: Option<usize>,
        /// Terminal signals emitted on the first step for agents that never decided
        pub orphan_terminals: Vec<TerminalStep>,
        pub closed: Rc<Cell<bool>>,
        pub resets: usize,
        pub submitted: Vec<Vec<(AgentId, Vec<f32>)>>,
        tick: usize,
        /// Ticks elapsed in each agent's current episode
        progress: Vec<usize>,
        terminated: Vec<TerminalStep>,
    }

    impl ScriptedSimulator {
        pub fn new(episodes: Vec<ScriptedEpisode>) -> Self {
            let progress = vec![0; episodes.len()];
            Self {
                episodes,
                repeat: false,
                fail_on_step: None,
                orphan_terminals: Vec::new(),
                closed: Rc::new(Cell::new(false)),
                resets: 0,
                submitted: Vec::new(),
                tick: 0,
                progress,
                terminated: Vec::new(),
            }
        }

        /// Three agents with unit rewards: A ends after 4 ticks, B and C after 6
        pub fn three_agents() -> Self {
            let episode = |agent_id, length| ScriptedEpisode {
                agent_id,
                length,
                step_reward: 1.0,
                terminal_reward: 0.0,
            };
            Self::new(vec![episode(0, 4), episode(1, 6), episode(2, 6)])
        }
    }

    impl Simulator for ScriptedSimulator {
        fn observation_size(&self) -> usize {
            2
        }

        fn action_size(&self) -> usize {
            1
        }

        fn reset(&mut self) -> Result<(), SimulatorError> {
            self.resets += 1;
            self.tick = 0;
            self.progress.iter_mut().for_each(|p| *p = 0);
            self.terminated.clear();
            Ok(())
        }

        fn step(&mut self) -> Result<(), SimulatorError> {
            if self.fail_on_step == Some(self.tick) {
                return Err(SimulatorError::Disconnected);
            }
            self.tick += 1;
            self.terminated.clear();
            if self.tick == 1 {
                self.terminated.extend(self.orphan_terminals.iter().cloned());
            }
            for (episode, progress) in self.episodes.iter().zip(self.progress.iter_mut()) {
                if *progress >= episode.length {
                    continue;
                }
                *progress += 1;
                if *progress == episode.length {
                    self.terminated.push(TerminalStep {
                        agent_id: episode.agent_id,
                        reward: episode.terminal_reward,
                    });
                    if self.repeat {
                        *progress = 0;
                    }
                }
            }
            Ok(())
        }

        fn active_agents(&self) -> Vec<DecisionStep> {
            self.episodes
                .iter()
                .zip(self.progress.iter())
                .filter(|(episode, progress)| **progress < episode.length)
                .map(|(episode, &progress)| DecisionStep {
                    agent_id: episode.agent_id,
                    observation: vec![progress as f32, episode.agent_id as f32],
                    reward: if progress == 0 { 0.0 } else { episode.step_reward },
                })
                .collect()
        }

        fn terminated_agents(&self) -> Vec<TerminalStep> {
            self.terminated.clone()
        }

        fn submit_actions(
            &mut self,
            actions: &[(AgentId, Vec<f32>)],
        ) -> Result<(), SimulatorError> {
            self.submitted.push(actions.to_vec());
            Ok(())
        }

        fn close(&mut self) -> Result<(), SimulatorError> {
            self.closed.set(true);
            Ok(())
        }
    }
}
