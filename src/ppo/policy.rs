//! Gaussian actor-critic policy using Burn framework

use burn::module::{Module, Param};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::Distribution;
use burn::tensor::activation::tanh;

/// ½·ln(2π)
const HALF_LN_2PI: f32 = 0.918_938_5;

/// Configuration for the actor-critic networks
#[derive(Debug, Config)]
pub struct PolicyConfig {
    /// Hidden layer size shared by actor and critic
    #[config(default = 64)]
    pub hidden_size: usize,
    /// Number of hidden layers per network
    #[config(default = 2)]
    pub num_layers: usize,
    /// Initial value of the state-independent log standard deviation
    #[config(default = 0.0)]
    pub initial_log_std: f32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of querying the policy for a batch of agents
#[derive(Debug, Clone, Default)]
pub struct PolicyOutput {
    /// Sampled actions [batch_size, action_dim]
    pub actions: Vec<Vec<f32>>,
    /// Log probability of each sampled action [batch_size]
    pub log_probs: Vec<f32>,
    /// State value estimates [batch_size]
    pub values: Vec<f32>,
}

/// Policy-value capability consumed by the rollout collector and evaluator
pub trait PolicyValue {
    /// Sample one action per observation, with log-probabilities and values
    fn act(&self, observations: &[Vec<f32>]) -> PolicyOutput;

    /// Deterministic mean action per observation
    fn mean_actions(&self, observations: &[Vec<f32>]) -> Vec<Vec<f32>>;
}

/// Tanh MLP trunk followed by a linear head
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    hidden: Vec<Linear<B>>,
    output: Linear<B>,
}

impl<B: Backend> Mlp<B> {
    pub fn new(
        device: &B::Device,
        input_size: usize,
        output_size: usize,
        config: &PolicyConfig,
    ) -> Self {
        let mut hidden = Vec::with_capacity(config.num_layers);
        let mut in_size = input_size;
        for _ in 0..config.num_layers {
            hidden.push(LinearConfig::new(in_size, config.hidden_size).init(device));
            in_size = config.hidden_size;
        }

        let output = LinearConfig::new(in_size, output_size).init(device);

        Self { hidden, output }
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = input;
        for layer in &self.hidden {
            x = tanh(layer.forward(x));
        }
        self.output.forward(x)
    }
}

/// Actor-critic with a diagonal Normal policy.
///
/// The actor maps observations to the action mean; the standard deviation is a
/// learned parameter shared by all states. The critic is a separate network.
#[derive(Module, Debug)]
pub struct ActorCritic<B: Backend> {
    /// Observation -> action mean
    pub actor: Mlp<B>,
    /// Log standard deviation [1, action_dim]
    pub log_std: Param<Tensor<B, 2>>,
    /// Observation -> state value
    pub critic: Mlp<B>,
}

impl<B: Backend> ActorCritic<B> {
    pub fn new(
        device: &B::Device,
        obs_dim: usize,
        action_dim: usize,
        config: &PolicyConfig,
    ) -> Self {
        let log_std = Tensor::<B, 2>::full([1, action_dim], config.initial_log_std, device);

        Self {
            actor: Mlp::new(device, obs_dim, action_dim, config),
            log_std: Param::from_tensor(log_std),
            critic: Mlp::new(device, obs_dim, 1, config),
        }
    }

    pub fn action_dim(&self) -> usize {
        self.log_std.val().dims()[1]
    }

    pub fn device(&self) -> B::Device {
        self.log_std.val().device()
    }

    /// Action mean [batch_size, action_dim]
    pub fn mean(&self, obs: Tensor<B, 2>) -> Tensor<B, 2> {
        self.actor.forward(obs)
    }

    /// State value [batch_size]
    pub fn value(&self, obs: Tensor<B, 2>) -> Tensor<B, 1> {
        self.critic.forward(obs).squeeze::<1>(1)
    }

    /// Log standard deviation broadcast to [batch_size, action_dim]
    fn log_std_for(&self, batch_size: usize) -> Tensor<B, 2> {
        let action_dim = self.action_dim();
        self.log_std.val().expand([batch_size, action_dim])
    }

    /// Sample actions from the policy.
    /// Returns (actions [batch, action_dim], log_probs [batch], values [batch])
    pub fn sample(&self, obs: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 1>, Tensor<B, 1>) {
        let [batch_size, _] = obs.dims();
        let mean = self.mean(obs.clone());
        let log_std = self.log_std_for(batch_size);

        let noise = Tensor::<B, 2>::random(
            mean.shape(),
            Distribution::Normal(0.0, 1.0),
            &mean.device(),
        );
        let actions = mean.clone() + noise * log_std.clone().exp();

        let log_probs = gaussian_log_prob(actions.clone(), mean, log_std);
        let values = self.value(obs);

        (actions, log_probs, values)
    }

    /// Evaluate already-taken actions under the current parameters.
    /// Returns (log_probs [batch], entropy [batch], values [batch])
    pub fn evaluate_actions(
        &self,
        obs: Tensor<B, 2>,
        actions: Tensor<B, 2>,
    ) -> (Tensor<B, 1>, Tensor<B, 1>, Tensor<B, 1>) {
        let [batch_size, _] = obs.dims();
        let mean = self.mean(obs.clone());
        let log_std = self.log_std_for(batch_size);

        let log_probs = gaussian_log_prob(actions, mean, log_std.clone());
        let entropy = gaussian_entropy(log_std);
        let values = self.value(obs);

        (log_probs, entropy, values)
    }
}

/// Log density of a diagonal Normal, summed over action dimensions
pub fn gaussian_log_prob<B: Backend>(
    actions: Tensor<B, 2>,
    mean: Tensor<B, 2>,
    log_std: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let variance = log_std.clone().mul_scalar(2.0).exp();
    let squared = (actions - mean).powf_scalar(2.0);

    let per_dim = -(squared / variance.mul_scalar(2.0)) - log_std;
    per_dim.sub_scalar(HALF_LN_2PI).sum_dim(1).squeeze::<1>(1)
}

/// Entropy of a diagonal Normal, summed over action dimensions
pub fn gaussian_entropy<B: Backend>(log_std: Tensor<B, 2>) -> Tensor<B, 1> {
    log_std
        .add_scalar(0.5 + HALF_LN_2PI)
        .sum_dim(1)
        .squeeze::<1>(1)
}

/// Flatten row vectors into a [rows, cols] tensor
pub fn rows_to_tensor<B: Backend>(rows: &[Vec<f32>], device: &B::Device) -> Tensor<B, 2> {
    let num_rows = rows.len();
    let num_cols = rows.first().map_or(0, Vec::len);
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Tensor::<B, 1>::from_floats(flat.as_slice(), device).reshape([num_rows, num_cols])
}

/// Read a tensor back as a flat f32 vector
pub fn tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor.into_data().iter::<f32>().collect()
}

fn tensor_to_rows<B: Backend>(tensor: Tensor<B, 2>) -> Vec<Vec<f32>> {
    let [_, num_cols] = tensor.dims();
    let flat = tensor_to_vec(tensor);
    if num_cols == 0 {
        return Vec::new();
    }
    flat.chunks(num_cols).map(<[f32]>::to_vec).collect()
}

impl<B: Backend> PolicyValue for ActorCritic<B> {
    fn act(&self, observations: &[Vec<f32>]) -> PolicyOutput {
        if observations.is_empty() {
            return PolicyOutput::default();
        }

        let obs = rows_to_tensor::<B>(observations, &self.device());
        let (actions, log_probs, values) = self.sample(obs);

        PolicyOutput {
            actions: tensor_to_rows(actions),
            log_probs: tensor_to_vec(log_probs),
            values: tensor_to_vec(values),
        }
    }

    fn mean_actions(&self, observations: &[Vec<f32>]) -> Vec<Vec<f32>> {
        if observations.is_empty() {
            return Vec::new();
        }

        let obs = rows_to_tensor::<B>(observations, &self.device());
        tensor_to_rows(self.mean(obs))
    }
}
