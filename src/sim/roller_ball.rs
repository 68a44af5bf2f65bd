//! RollerBall arena - a local multi-agent simulator for training without Unity
//!
//! Each agent pushes a ball around its own square platform towards a target
//! cube. Episodes end when the ball touches the target (reward 1.0), rolls off
//! the edge, or runs out of steps. A terminated agent starts a new episode on
//! the next tick under the same agent id.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{AgentId, DecisionStep, Simulator, SimulatorError, TerminalStep};

pub const OBSERVATION_SIZE: usize = 8;
pub const ACTION_SIZE: usize = 2;

/// Arena configuration
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Number of independent agents
    pub num_agents: usize,
    /// Half the platform edge length
    pub platform_half_extent: f32,
    /// Distance at which the target counts as reached
    pub target_radius: f32,
    /// Force multiplier applied to actions
    pub force_multiplier: f32,
    /// Integration time step in seconds
    pub dt: f32,
    /// Velocity damping per tick
    pub drag: f32,
    /// Episode truncation (0 disables)
    pub max_episode_steps: usize,
    /// Reward for reaching the target
    pub target_reward: f32,
    /// RNG seed for spawn and target placement
    pub seed: u64,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            num_agents: 12,
            platform_half_extent: 5.0,
            target_radius: 1.42,
            force_multiplier: 10.0,
            dt: 0.02,
            drag: 0.02,
            max_episode_steps: 1000,
            target_reward: 1.0,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Ball {
    position: [f32; 3],
    velocity: [f32; 3],
    target: [f32; 3],
    steps: usize,
    /// Reward earned since the last decision
    pending_reward: f32,
    /// Action to apply on the next step
    action: [f32; ACTION_SIZE],
}

/// Multi-agent RollerBall simulator
pub struct RollerBallArena {
    config: ArenaConfig,
    balls: Vec<Ball>,
    terminated: Vec<TerminalStep>,
    rng: StdRng,
    open: bool,
}

impl RollerBallArena {
    pub fn new(config: ArenaConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        let balls = vec![Ball::default(); config.num_agents];

        Self {
            config,
            balls,
            terminated: Vec::new(),
            rng,
            open: true,
        }
    }

    /// Number of agents in the arena
    pub fn num_agents(&self) -> usize {
        self.balls.len()
    }

    fn respawn(&mut self, index: usize) {
        let extent = self.config.platform_half_extent - 1.0;
        let target = [
            self.rng.random_range(-extent..extent),
            0.5,
            self.rng.random_range(-extent..extent),
        ];

        let ball = &mut self.balls[index];
        // The ball only returns to the centre after falling off
        if ball.position[1] < 0.0 || ball.steps == 0 {
            ball.position = [0.0, 0.5, 0.0];
            ball.velocity = [0.0; 3];
        }
        ball.target = target;
        ball.steps = 0;
        ball.pending_reward = 0.0;
        ball.action = [0.0; ACTION_SIZE];
    }

    fn observe(ball: &Ball) -> Vec<f32> {
        vec![
            ball.target[0],
            ball.target[1],
            ball.target[2],
            ball.position[0],
            ball.position[1],
            ball.position[2],
            ball.velocity[0],
            ball.velocity[2],
        ]
    }

    fn distance_to_target(ball: &Ball) -> f32 {
        ball.position
            .iter()
            .zip(ball.target.iter())
            .map(|(p, t)| (p - t).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    fn ensure_open(&self) -> Result<(), SimulatorError> {
        if self.open {
            Ok(())
        } else {
            Err(SimulatorError::Disconnected)
        }
    }
}

impl Simulator for RollerBallArena {
    fn observation_size(&self) -> usize {
        OBSERVATION_SIZE
    }

    fn action_size(&self) -> usize {
        ACTION_SIZE
    }

    fn reset(&mut self) -> Result<(), SimulatorError> {
        self.ensure_open()?;
        self.terminated.clear();
        for index in 0..self.balls.len() {
            self.balls[index].steps = 0;
            self.respawn(index);
        }
        Ok(())
    }

    fn step(&mut self) -> Result<(), SimulatorError> {
        self.ensure_open()?;
        self.terminated.clear();

        let half = self.config.platform_half_extent;
        let mut ended = Vec::new();

        for (index, ball) in self.balls.iter_mut().enumerate() {
            let force_x = ball.action[0] * self.config.force_multiplier;
            let force_z = ball.action[1] * self.config.force_multiplier;

            ball.velocity[0] = (ball.velocity[0] + force_x * self.config.dt) * (1.0 - self.config.drag);
            ball.velocity[2] = (ball.velocity[2] + force_z * self.config.dt) * (1.0 - self.config.drag);
            ball.position[0] += ball.velocity[0] * self.config.dt;
            ball.position[2] += ball.velocity[2] * self.config.dt;
            ball.steps += 1;

            let off_platform = ball.position[0].abs() > half || ball.position[2].abs() > half;
            if off_platform {
                ball.position[1] = -1.0;
            }

            let reached = !off_platform && Self::distance_to_target(ball) < self.config.target_radius;
            let truncated = self.config.max_episode_steps > 0
                && ball.steps >= self.config.max_episode_steps;

            if reached {
                ball.pending_reward += self.config.target_reward;
            }

            if reached || off_platform || truncated {
                self.terminated.push(TerminalStep {
                    agent_id: index as AgentId,
                    reward: ball.pending_reward,
                });
                ended.push(index);
            }
        }

        for index in ended {
            self.respawn(index);
        }

        Ok(())
    }

    fn active_agents(&self) -> Vec<DecisionStep> {
        if !self.open {
            return Vec::new();
        }
        self.balls
            .iter()
            .enumerate()
            .map(|(index, ball)| DecisionStep {
                agent_id: index as AgentId,
                observation: Self::observe(ball),
                reward: ball.pending_reward,
            })
            .collect()
    }

    fn terminated_agents(&self) -> Vec<TerminalStep> {
        self.terminated.clone()
    }

    fn submit_actions(&mut self, actions: &[(AgentId, Vec<f32>)]) -> Result<(), SimulatorError> {
        self.ensure_open()?;
        for (agent_id, action) in actions {
            if action.len() != ACTION_SIZE {
                return Err(SimulatorError::InvalidAction {
                    agent_id: *agent_id,
                    expected: ACTION_SIZE,
                    actual: action.len(),
                });
            }
            let ball = self
                .balls
                .get_mut(*agent_id as usize)
                .ok_or(SimulatorError::UnknownAgent {
                    agent_id: *agent_id,
                })?;
            ball.action = [action[0].clamp(-1.0, 1.0), action[1].clamp(-1.0, 1.0)];
            // Reward reported with this decision has now been consumed
            ball.pending_reward = 0.0;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SimulatorError> {
        self.open = false;
        Ok(())
    }
}
