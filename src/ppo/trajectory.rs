//! Per-agent trajectory buffer
//!
//! The reward for the action taken at step t only arrives with the agent's
//! next decision (or its terminal signal). Each open trajectory therefore
//! keeps its newest step in a pending slot; the slot is finalized with the
//! reward that arrives next, and only finalized records are ever handed to
//! the advantage estimator.

use std::collections::HashMap;

use crate::sim::AgentId;

/// A step whose reward has not been observed yet
#[derive(Debug, Clone)]
pub struct PendingStep {
    pub state: Vec<f32>,
    pub action: Vec<f32>,
    pub log_prob: f32,
    pub value: f32,
}

impl PendingStep {
    fn finalize(self, reward: f32) -> StepRecord {
        StepRecord {
            state: self.state,
            action: self.action,
            log_prob: self.log_prob,
            value: self.value,
            reward,
        }
    }
}

/// A fully observed step: (state, action, log_prob, value, reward)
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub state: Vec<f32>,
    pub action: Vec<f32>,
    pub log_prob: f32,
    pub value: f32,
    pub reward: f32,
}

/// Ordered steps of one agent's open episode
#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    steps: Vec<StepRecord>,
    pending: Option<PendingStep>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of decisions recorded, including the pending one
    pub fn len(&self) -> usize {
        self.steps.len() + usize::from(self.pending.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a new decision. `reward` is what the previous action earned and
    /// finalizes the pending step, if any.
    pub fn push(&mut self, reward: f32, step: PendingStep) {
        if let Some(previous) = self.pending.take() {
            self.steps.push(previous.finalize(reward));
        }
        self.pending = Some(step);
    }

    /// Finalize the last step with the terminal reward and hand out the records
    pub fn finish(mut self, final_reward: f32) -> Vec<StepRecord> {
        if let Some(last) = self.pending.take() {
            self.steps.push(last.finalize(final_reward));
        }
        self.steps
    }
}

/// Open trajectories keyed by agent id
#[derive(Debug, Default)]
pub struct TrajectoryBuffer {
    open: HashMap<AgentId, Trajectory>,
}

impl TrajectoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a decision to the agent's trajectory, starting a fresh one on
    /// first sight of the id
    pub fn record_decision(&mut self, agent_id: AgentId, reward: f32, step: PendingStep) {
        self.open
            .entry(agent_id)
            .or_insert_with(Trajectory::new)
            .push(reward, step);
    }

    /// End the agent's episode. Ownership of every record under the id ends
    /// here; the next decision for the same id starts an empty trajectory.
    pub fn finish(&mut self, agent_id: AgentId, final_reward: f32) -> Option<Vec<StepRecord>> {
        self.open
            .remove(&agent_id)
            .map(|trajectory| trajectory.finish(final_reward))
    }

    /// Length of the agent's open trajectory (0 if none)
    pub fn len_of(&self, agent_id: AgentId) -> usize {
        self.open.get(&agent_id).map_or(0, Trajectory::len)
    }

    /// Number of agents with an open trajectory
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Drop all open trajectories, returning how many steps were discarded
    pub fn clear(&mut self) -> usize {
        let discarded = self.open.values().map(Trajectory::len).sum();
        self.open.clear();
        discarded
    }
}
