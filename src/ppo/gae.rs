//! Generalized Advantage Estimation over one completed trajectory

use super::trajectory::StepRecord;

/// Per-step advantage and return estimates, in trajectory order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdvantageEstimate {
    pub advantages: Vec<f32>,
    pub returns: Vec<f32>,
}

/// Compute GAE advantages and returns by backward recursion.
///
/// The step after the last one is treated as terminal, so the bootstrap value
/// is always 0. `returns[i] == advantages[i] + values[i]`.
pub fn estimate_advantages(
    rewards: &[f32],
    values: &[f32],
    gamma: f32,
    gae_lambda: f32,
) -> AdvantageEstimate {
    debug_assert_eq!(rewards.len(), values.len());

    let n = rewards.len();
    let mut advantages = vec![0.0; n];
    let mut returns = vec![0.0; n];

    let mut gae = 0.0;
    let mut next_value = 0.0;

    for t in (0..n).rev() {
        let delta = rewards[t] + gamma * next_value - values[t];
        gae = delta + gamma * gae_lambda * gae;
        advantages[t] = gae;
        returns[t] = gae + values[t];
        next_value = values[t];
    }

    AdvantageEstimate {
        advantages,
        returns,
    }
}

/// Convenience wrapper over finalized step records
pub fn estimate_trajectory(steps: &[StepRecord], gamma: f32, gae_lambda: f32) -> AdvantageEstimate {
    let rewards: Vec<f32> = steps.iter().map(|s| s.reward).collect();
    let values: Vec<f32> = steps.iter().map(|s| s.value).collect();
    estimate_advantages(&rewards, &values, gamma, gae_lambda)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAMMA: f32 = 0.99;
    const LAMBDA: f32 = 0.95;

    #[test]
    fn test_three_step_oracle() {
        let estimate = estimate_advantages(&[1.0, 0.0, 2.0], &[0.5, 0.4, 0.3], GAMMA, LAMBDA);

        // Hand-computed:
        //   t=2: δ = 2 − 0.3 = 1.7
        //   t=1: δ = 0.99·0.3 − 0.4 = −0.103,   A = −0.103 + 0.9405·1.7
        //   t=0: δ = 1 + 0.99·0.4 − 0.5 = 0.896, A = 0.896 + 0.9405·A₁
        let expected = [2.302_846_9, 1.495_85, 1.7];
        for (a, e) in estimate.advantages.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "{} vs {}", a, e);
        }
    }

    #[test]
    fn test_matches_scalar_recurrence_exactly() {
        let rewards = [1.0f32, 0.0, 2.0];
        let values = [0.5f32, 0.4, 0.3];

        let a2 = rewards[2] + GAMMA * 0.0 - values[2];
        let a2 = a2 + GAMMA * LAMBDA * 0.0;
        let a1 = (rewards[1] + GAMMA * values[2] - values[1]) + GAMMA * LAMBDA * a2;
        let a0 = (rewards[0] + GAMMA * values[1] - values[0]) + GAMMA * LAMBDA * a1;

        let estimate = estimate_advantages(&rewards, &values, GAMMA, LAMBDA);
        assert_eq!(estimate.advantages[0].to_bits(), a0.to_bits());
        assert_eq!(estimate.advantages[1].to_bits(), a1.to_bits());
        assert_eq!(estimate.advantages[2].to_bits(), a2.to_bits());
    }

    #[test]
    fn test_constant_reward_final_step() {
        let r = 0.7;
        let v = 0.25;
        let estimate = estimate_advantages(&[r; 10], &[v; 10], GAMMA, LAMBDA);
        assert_eq!(estimate.advantages[9], r - v);
    }

    #[test]
    fn test_return_identity() {
        let rewards = [0.3, -1.0, 0.0, 4.0, 1.5];
        let values = [1.0, 0.2, -0.4, 2.0, 0.1];
        let estimate = estimate_advantages(&rewards, &values, GAMMA, LAMBDA);

        assert_eq!(estimate.advantages.len(), rewards.len());
        assert_eq!(estimate.returns.len(), rewards.len());
        for i in 0..rewards.len() {
            assert!((estimate.returns[i] - (estimate.advantages[i] + values[i])).abs() < 1e-6);
        }
    }

    #[test]
    fn test_empty_trajectory() {
        let estimate = estimate_advantages(&[], &[], GAMMA, LAMBDA);
        assert!(estimate.advantages.is_empty());
        assert!(estimate.returns.is_empty());
    }

    #[test]
    fn test_estimate_trajectory_uses_records() {
        let steps: Vec<StepRecord> = [(1.0, 0.5), (0.0, 0.4), (2.0, 0.3)]
            .iter()
            .map(|&(reward, value)| StepRecord {
                state: vec![],
                action: vec![],
                log_prob: 0.0,
                value,
                reward,
            })
            .collect();

        let from_records = estimate_trajectory(&steps, GAMMA, LAMBDA);
        let direct = estimate_advantages(&[1.0, 0.0, 2.0], &[0.5, 0.4, 0.3], GAMMA, LAMBDA);
        assert_eq!(from_records, direct);
    }
}
