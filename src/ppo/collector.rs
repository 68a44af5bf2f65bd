//! Rollout collection - drives the simulator for one horizon and turns
//! completed episodes into a pool of training samples

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::sim::{AgentId, Simulator, SimulatorError};

use super::gae::estimate_trajectory;
use super::metrics::MovingAverage;
use super::policy::PolicyValue;
use super::trajectory::{PendingStep, StepRecord, TrajectoryBuffer};

/// Shared flag raised by an interrupt handler, polled once per tick
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Flat pool of training samples gathered over one horizon
#[derive(Debug, Clone, Default)]
pub struct BatchPool {
    /// Observations [N, obs_dim]
    pub states: Vec<Vec<f32>>,
    /// Actions taken [N, action_dim]
    pub actions: Vec<Vec<f32>>,
    /// Log probs at collection time [N]
    pub log_probs: Vec<f32>,
    /// GAE advantages [N]
    pub advantages: Vec<f32>,
    /// Return targets [N]
    pub returns: Vec<f32>,
    /// Length of each trajectory added, in completion order
    pub trajectory_lengths: Vec<usize>,
}

impl BatchPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.log_probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log_probs.is_empty()
    }

    /// Append a completed trajectory with its advantage estimates
    pub fn extend_trajectory(&mut self, steps: Vec<StepRecord>, gamma: f32, gae_lambda: f32) {
        let estimate = estimate_trajectory(&steps, gamma, gae_lambda);

        self.trajectory_lengths.push(steps.len());
        self.advantages.extend(estimate.advantages);
        self.returns.extend(estimate.returns);

        for step in steps {
            self.states.push(step.state);
            self.actions.push(step.action);
            self.log_probs.push(step.log_prob);
        }
    }

    pub fn clear(&mut self) {
        self.states.clear();
        self.actions.clear();
        self.log_probs.clear();
        self.advantages.clear();
        self.returns.clear();
        self.trajectory_lengths.clear();
    }
}

/// Summary of one finished episode
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeSummary {
    pub agent_id: AgentId,
    /// Sum of all rewards, terminal reward included
    pub reward: f32,
    /// Number of decisions recorded
    pub length: usize,
}

/// Output of one collection horizon
#[derive(Debug, Default)]
pub struct Rollout {
    pub pool: BatchPool,
    pub episodes: Vec<EpisodeSummary>,
    /// Simulator ticks executed
    pub ticks: usize,
    /// Decisions made across all agents
    pub decisions: usize,
    /// Collection stopped early on an interrupt request
    pub interrupted: bool,
}

/// Drives the simulator and owns the per-agent bookkeeping
#[derive(Debug)]
pub struct RolloutCollector {
    gamma: f32,
    gae_lambda: f32,
    trajectories: TrajectoryBuffer,
    /// Running reward per agent for the current episode
    episode_rewards: HashMap<AgentId, f32>,
}

impl RolloutCollector {
    pub fn new(gamma: f32, gae_lambda: f32) -> Self {
        Self {
            gamma,
            gae_lambda,
            trajectories: TrajectoryBuffer::new(),
            episode_rewards: HashMap::new(),
        }
    }

    /// Collect `horizon` ticks. Completed episodes go into the returned pool
    /// and their summed rewards into `scores`.
    pub fn collect<S, P>(
        &mut self,
        sim: &mut S,
        policy: &P,
        horizon: usize,
        scores: &mut MovingAverage,
        stop: &StopSignal,
    ) -> Result<Rollout, SimulatorError>
    where
        S: Simulator + ?Sized,
        P: PolicyValue + ?Sized,
    {
        let discarded = self.trajectories.clear();
        if discarded > 0 {
            tracing::debug!("Dropped {} steps from unfinished episodes", discarded);
        }
        self.episode_rewards.clear();

        sim.reset()?;

        let mut rollout = Rollout::default();
        let mut decisions = sim.active_agents();

        for _ in 0..horizon {
            if stop.is_stop_requested() {
                rollout.interrupted = true;
                break;
            }

            if !decisions.is_empty() {
                let observations: Vec<Vec<f32>> =
                    decisions.iter().map(|d| d.observation.clone()).collect();
                let output = policy.act(&observations);

                let submitted: Vec<(AgentId, Vec<f32>)> = decisions
                    .iter()
                    .zip(output.actions.iter())
                    .map(|(d, action)| (d.agent_id, action.clone()))
                    .collect();
                sim.submit_actions(&submitted)?;

                let steps = observations
                    .into_iter()
                    .zip(output.actions)
                    .zip(output.log_probs)
                    .zip(output.values);
                for (decision, (((state, action), log_prob), value)) in decisions.iter().zip(steps)
                {
                    *self.episode_rewards.entry(decision.agent_id).or_insert(0.0) +=
                        decision.reward;
                    self.trajectories.record_decision(
                        decision.agent_id,
                        decision.reward,
                        PendingStep {
                            state,
                            action,
                            log_prob,
                            value,
                        },
                    );
                    rollout.decisions += 1;
                }
            }

            sim.step()?;
            rollout.ticks += 1;

            for terminal in sim.terminated_agents() {
                let episode_reward =
                    self.episode_rewards.remove(&terminal.agent_id).unwrap_or(0.0) + terminal.reward;
                scores.push(episode_reward);

                let steps = self
                    .trajectories
                    .finish(terminal.agent_id, terminal.reward)
                    .unwrap_or_default();

                rollout.episodes.push(EpisodeSummary {
                    agent_id: terminal.agent_id,
                    reward: episode_reward,
                    length: steps.len(),
                });

                if steps.is_empty() {
                    continue;
                }
                rollout
                    .pool
                    .extend_trajectory(steps, self.gamma, self.gae_lambda);
            }

            decisions = sim.active_agents();
        }

        tracing::debug!(
            "Collected {} ticks, {} episodes, {} samples ({} agents still running)",
            rollout.ticks,
            rollout.episodes.len(),
            rollout.pool.len(),
            self.trajectories.open_count()
        );

        Ok(rollout)
    }
}
