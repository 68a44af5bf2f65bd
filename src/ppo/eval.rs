//! Deterministic evaluation of a trained policy

use std::collections::HashMap;

use crate::sim::{AgentId, Simulator, SimulatorError};

use super::collector::StopSignal;
use super::metrics::EvaluationMetrics;
use super::policy::PolicyValue;

/// Run the policy's mean action until `episodes` episodes finish or
/// `max_ticks` ticks elapse, whichever comes first.
pub fn evaluate<S, P>(
    sim: &mut S,
    policy: &P,
    episodes: usize,
    max_ticks: usize,
    stop: &StopSignal,
) -> Result<EvaluationMetrics, SimulatorError>
where
    S: Simulator + ?Sized,
    P: PolicyValue + ?Sized,
{
    let mut metrics = EvaluationMetrics::new();
    let mut running: HashMap<AgentId, (f32, usize)> = HashMap::new();

    sim.reset()?;
    let mut decisions = sim.active_agents();

    for _ in 0..max_ticks {
        if metrics.num_episodes >= episodes || stop.is_stop_requested() {
            break;
        }

        if !decisions.is_empty() {
            let observations: Vec<Vec<f32>> =
                decisions.iter().map(|d| d.observation.clone()).collect();
            let actions = policy.mean_actions(&observations);

            let submitted: Vec<(AgentId, Vec<f32>)> = decisions
                .iter()
                .zip(actions)
                .map(|(d, action)| (d.agent_id, action))
                .collect();
            sim.submit_actions(&submitted)?;

            for decision in &decisions {
                let entry = running.entry(decision.agent_id).or_insert((0.0, 0));
                entry.0 += decision.reward;
                entry.1 += 1;
            }
        }

        sim.step()?;

        for terminal in sim.terminated_agents() {
            let (reward, steps) = running.remove(&terminal.agent_id).unwrap_or((0.0, 0));
            if metrics.num_episodes < episodes {
                metrics.record_episode(reward + terminal.reward, steps);
                tracing::debug!(
                    "Evaluation episode {}: reward {:.2}, {} steps",
                    metrics.num_episodes,
                    reward + terminal.reward,
                    steps
                );
            }
        }

        decisions = sim.active_agents();
    }

    if metrics.num_episodes < episodes {
        tracing::warn!(
            "Evaluation stopped after {} of {} episodes",
            metrics.num_episodes,
            episodes
        );
    }

    Ok(metrics)
}
