//! PPO update engine - clipped surrogate optimisation over a pooled batch

use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::ElementConversion;
use burn::tensor::backend::AutodiffBackend;
use rand::Rng;
use rand::seq::SliceRandom;

use super::collector::BatchPool;
use super::policy::{ActorCritic, rows_to_tensor};

/// Added to the advantage standard deviation before dividing
pub const ADVANTAGE_EPSILON: f32 = 1e-8;

/// Configuration for the PPO update phase
#[derive(Debug, Config)]
pub struct UpdateConfig {
    /// Adam learning rate
    #[config(default = 3e-4)]
    pub learning_rate: f64,
    /// Number of passes over the pool per update
    #[config(default = 3)]
    pub epochs: usize,
    /// Mini-batch size; also the minimum pool size for an update
    #[config(default = 64)]
    pub mini_batch_size: usize,
    /// PPO clip parameter
    #[config(default = 0.2)]
    pub clip_epsilon: f32,
    /// Value loss coefficient
    #[config(default = 0.5)]
    pub value_coef: f32,
    /// Entropy bonus coefficient
    #[config(default = 0.01)]
    pub entropy_coef: f32,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Averaged losses of one update phase
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UpdateStats {
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    pub minibatches: usize,
}

/// Normalize to zero mean and unit sample standard deviation
pub fn normalize_advantages(advantages: &[f32]) -> Vec<f32> {
    let n = advantages.len();
    if n == 0 {
        return Vec::new();
    }

    let mean = advantages.iter().sum::<f32>() / n as f32;
    let variance = if n > 1 {
        advantages.iter().map(|a| (a - mean).powi(2)).sum::<f32>() / (n - 1) as f32
    } else {
        0.0
    };
    let std = variance.sqrt();

    advantages
        .iter()
        .map(|a| (a - mean) / (std + ADVANTAGE_EPSILON))
        .collect()
}

/// Shuffle `0..n` and split into full mini-batches; a shorter tail is dropped
pub fn minibatch_indices<R: Rng + ?Sized>(
    n: usize,
    mini_batch_size: usize,
    rng: &mut R,
) -> Vec<Vec<usize>> {
    if mini_batch_size == 0 {
        return Vec::new();
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);

    indices
        .chunks_exact(mini_batch_size)
        .map(<[usize]>::to_vec)
        .collect()
}

/// Negated clipped surrogate objective, averaged over the batch
pub fn clipped_surrogate_loss<B: Backend>(
    ratio: Tensor<B, 1>,
    advantages: Tensor<B, 1>,
    clip_epsilon: f32,
) -> Tensor<B, 1> {
    let clipped_ratio = ratio.clone().clamp(1.0 - clip_epsilon, 1.0 + clip_epsilon);

    let surr1 = ratio * advantages.clone();
    let surr2 = clipped_ratio * advantages;
    -surr1.min_pair(surr2).mean()
}

/// Mean squared error between value estimates and return targets
pub fn mean_squared_error<B: Backend>(values: Tensor<B, 1>, returns: Tensor<B, 1>) -> Tensor<B, 1> {
    (values - returns).powf_scalar(2.0).mean()
}

/// Runs K epochs of mini-batch gradient steps on an actor-critic
pub struct PPOUpdater<B: AutodiffBackend> {
    config: UpdateConfig,
    optimizer: OptimizerAdaptor<Adam, ActorCritic<B>, B>,
    device: B::Device,
}

impl<B: AutodiffBackend> PPOUpdater<B> {
    pub fn new(device: B::Device, config: UpdateConfig) -> Self {
        let optimizer = AdamConfig::new().init::<B, ActorCritic<B>>();

        Self {
            config,
            optimizer,
            device,
        }
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Whether a pool holds enough samples for an update
    pub fn has_enough_samples(&self, pool: &BatchPool) -> bool {
        pool.len() > self.config.mini_batch_size
    }

    /// Optimise the model on the pool. Returns the updated model and, when the
    /// pool was large enough to update at all, the averaged losses.
    pub fn update<R: Rng + ?Sized>(
        &mut self,
        mut model: ActorCritic<B>,
        pool: &BatchPool,
        rng: &mut R,
    ) -> (ActorCritic<B>, Option<UpdateStats>) {
        if !self.has_enough_samples(pool) {
            return (model, None);
        }

        let advantages = normalize_advantages(&pool.advantages);

        let mut total_policy_loss = 0.0f32;
        let mut total_value_loss = 0.0f32;
        let mut total_entropy = 0.0f32;
        let mut num_updates = 0usize;

        for epoch in 0..self.config.epochs {
            let batches = minibatch_indices(pool.len(), self.config.mini_batch_size, rng);
            tracing::trace!("Epoch {}: {} mini-batches", epoch, batches.len());

            for batch_indices in batches {
                let batch_states: Vec<Vec<f32>> = batch_indices
                    .iter()
                    .map(|&i| pool.states[i].clone())
                    .collect();
                let batch_actions: Vec<Vec<f32>> = batch_indices
                    .iter()
                    .map(|&i| pool.actions[i].clone())
                    .collect();
                let batch_old_log_probs: Vec<f32> =
                    batch_indices.iter().map(|&i| pool.log_probs[i]).collect();
                let batch_advantages: Vec<f32> =
                    batch_indices.iter().map(|&i| advantages[i]).collect();
                let batch_returns: Vec<f32> =
                    batch_indices.iter().map(|&i| pool.returns[i]).collect();

                let states_tensor = rows_to_tensor::<B>(&batch_states, &self.device);
                let actions_tensor = rows_to_tensor::<B>(&batch_actions, &self.device);
                let old_log_probs_tensor =
                    Tensor::<B, 1>::from_floats(batch_old_log_probs.as_slice(), &self.device);
                let advantages_tensor =
                    Tensor::<B, 1>::from_floats(batch_advantages.as_slice(), &self.device);
                let returns_tensor =
                    Tensor::<B, 1>::from_floats(batch_returns.as_slice(), &self.device);

                // Evaluate taken actions with the current parameters
                let (new_log_probs, entropy, values) =
                    model.evaluate_actions(states_tensor, actions_tensor);

                let ratio = (new_log_probs - old_log_probs_tensor).exp();
                let policy_loss =
                    clipped_surrogate_loss(ratio, advantages_tensor, self.config.clip_epsilon);
                let value_loss =
                    mean_squared_error(values, returns_tensor).mul_scalar(self.config.value_coef);
                let entropy_mean = entropy.mean();

                let loss = policy_loss.clone() + value_loss.clone()
                    - entropy_mean.clone().mul_scalar(self.config.entropy_coef);

                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                model = self.optimizer.step(self.config.learning_rate, model, grads);

                total_policy_loss += policy_loss.into_scalar().elem::<f32>();
                total_value_loss += value_loss.into_scalar().elem::<f32>();
                total_entropy += entropy_mean.into_scalar().elem::<f32>();
                num_updates += 1;
            }
        }

        if num_updates == 0 {
            return (model, None);
        }

        let n = num_updates as f32;
        let stats = UpdateStats {
            policy_loss: total_policy_loss / n,
            value_loss: total_value_loss / n,
            entropy: total_entropy / n,
            minibatches: num_updates,
        };

        (model, Some(stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ppo::policy::{PolicyConfig, tensor_to_vec};
    use burn::backend::{Autodiff, NdArray};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    type TestBackend = NdArray;
    type TestAutodiffBackend = Autodiff<NdArray>;

    fn tensor(values: &[f32]) -> Tensor<TestBackend, 1> {
        Tensor::from_floats(values, &Default::default())
    }

    fn scalar(t: Tensor<TestBackend, 1>) -> f32 {
        tensor_to_vec(t)[0]
    }

    #[test]
    fn test_update_config_default() {
        let config = UpdateConfig::default();
        assert_eq!(config.epochs, 3);
        assert_eq!(config.mini_batch_size, 64);
        assert!((config.clip_epsilon - 0.2).abs() < 1e-6);
        assert!((config.entropy_coef - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_advantages() {
        let normalized = normalize_advantages(&[1.0, 2.0, 3.0, 4.0]);
        let mean: f32 = normalized.iter().sum::<f32>() / 4.0;
        let var: f32 = normalized.iter().map(|a| (a - mean).powi(2)).sum::<f32>() / 3.0;

        assert!(mean.abs() < 1e-6);
        assert!((var.sqrt() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_normalize_constant_advantages() {
        let normalized = normalize_advantages(&[2.5; 8]);
        assert!(normalized.iter().all(|a| a.is_finite() && a.abs() < 1e-6));
    }

    #[test]
    fn test_minibatch_completeness() {
        let mut rng = StdRng::seed_from_u64(3);
        let batches = minibatch_indices(150, 64, &mut rng);

        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 64));

        let mut seen = HashSet::new();
        for &index in batches.iter().flatten() {
            assert!(index < 150);
            assert!(seen.insert(index), "index {} appears twice", index);
        }
        assert_eq!(seen.len(), 128);
    }

    #[test]
    fn test_minibatch_permutation_is_seeded() {
        let a = minibatch_indices(100, 10, &mut StdRng::seed_from_u64(11));
        let b = minibatch_indices(100, 10, &mut StdRng::seed_from_u64(11));
        let c = minibatch_indices(100, 10, &mut StdRng::seed_from_u64(12));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_unit_ratio_loss_is_negative_mean_advantage() {
        let advantages = [0.5, -1.0, 2.0, 0.25];
        let ratio = tensor(&[1.0; 4]);

        let loss = scalar(clipped_surrogate_loss(ratio, tensor(&advantages), 0.2));
        let expected = -(advantages.iter().sum::<f32>() / 4.0);
        assert!((loss - expected).abs() < 1e-6);
    }

    #[test]
    fn test_clipping_positive_advantage() {
        // ratio above 1 + ε is capped at (1 + ε)·A
        let loss = scalar(clipped_surrogate_loss(tensor(&[1.5]), tensor(&[2.0]), 0.2));
        assert!((loss - (-(1.2 * 2.0))).abs() < 1e-6);

        // ratio below 1 − ε is not clipped for A > 0 (min picks the smaller term)
        let loss = scalar(clipped_surrogate_loss(tensor(&[0.5]), tensor(&[2.0]), 0.2));
        assert!((loss - (-(0.5 * 2.0))).abs() < 1e-6);
    }

    #[test]
    fn test_clipping_negative_advantage() {
        // ratio below 1 − ε is capped at (1 − ε)·A
        let loss = scalar(clipped_surrogate_loss(tensor(&[0.5]), tensor(&[-2.0]), 0.2));
        assert!((loss - (0.8 * 2.0)).abs() < 1e-6);

        // ratio above 1 + ε keeps the unclipped, more pessimistic term
        let loss = scalar(clipped_surrogate_loss(tensor(&[1.5]), tensor(&[-2.0]), 0.2));
        assert!((loss - (1.5 * 2.0)).abs() < 1e-6);
    }

    #[test]
    fn test_mean_squared_error() {
        let loss = scalar(mean_squared_error(tensor(&[1.0, 2.0]), tensor(&[0.0, 4.0])));
        // (1 + 4) / 2
        assert!((loss - 2.5).abs() < 1e-6);
    }

    fn random_pool(n: usize, rng: &mut StdRng) -> BatchPool {
        let mut pool = BatchPool::new();
        for _ in 0..n {
            pool.states
                .push((0..4).map(|_| rng.random_range(-1.0..1.0)).collect());
            pool.actions
                .push((0..2).map(|_| rng.random_range(-1.0..1.0)).collect());
            pool.log_probs.push(-2.0);
            pool.advantages.push(rng.random_range(-1.0..1.0));
            pool.returns.push(rng.random_range(0.0..1.0));
        }
        pool.trajectory_lengths.push(n);
        pool
    }

    #[test]
    fn test_update_skipped_when_pool_too_small() {
        let device = Default::default();
        let model = ActorCritic::<TestAutodiffBackend>::new(&device, 4, 2, &PolicyConfig::default());
        let mut updater = PPOUpdater::new(device, UpdateConfig::new().with_mini_batch_size(16));
        let mut rng = StdRng::seed_from_u64(0);

        let pool = random_pool(16, &mut rng);
        let (_, stats) = updater.update(model, &pool, &mut rng);
        assert!(stats.is_none());
    }

    #[test]
    fn test_update_runs_full_minibatches_and_changes_parameters() {
        let device = Default::default();
        let model = ActorCritic::<TestAutodiffBackend>::new(&device, 4, 2, &PolicyConfig::default());
        let config = UpdateConfig::new()
            .with_mini_batch_size(16)
            .with_epochs(2)
            .with_learning_rate(1e-2);
        let mut updater = PPOUpdater::new(device, config);
        let mut rng = StdRng::seed_from_u64(5);

        let pool = random_pool(40, &mut rng);
        let log_std_before = tensor_to_vec(model.log_std.val());

        let (model, stats) = updater.update(model, &pool, &mut rng);
        let stats = stats.unwrap();

        // 40 samples → 2 full batches of 16 per epoch, 8 dropped
        assert_eq!(stats.minibatches, 4);
        assert!(stats.policy_loss.is_finite());
        assert!(stats.value_loss.is_finite());
        assert!(stats.entropy.is_finite());

        let log_std_after = tensor_to_vec(model.log_std.val());
        assert_ne!(log_std_before, log_std_after);
    }
}
