use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use burn::config::Config;
use burn::tensor::backend::AutodiffBackend;
use dotenv::dotenv;
use rollerball_ppo::ppo::{
    ActorCritic, CheckpointKind, FileCheckpointer, PPOTrainer, ScalarLogger, StopSignal,
    TrainConfig, TrainOutcome, evaluate,
};
use rollerball_ppo::sim::{ArenaConfig, RollerBallArena, Simulator, SimulatorGuard};
use time::OffsetDateTime;
use time::format_description;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[cfg(feature = "metal")]
type TrainBackend = burn::backend::Autodiff<burn::backend::Metal>;
#[cfg(not(feature = "metal"))]
type TrainBackend = burn::backend::Autodiff<burn::backend::NdArray>;

type InferenceBackend = <TrainBackend as AutodiffBackend>::InnerBackend;

const CONFIG_FILE: &str = "config.json";

fn get_env_var<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|val| val.parse::<T>().ok())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rollerball_ppo=debug,info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

/// Raise the stop signal on Ctrl-C
fn spawn_interrupt_handler(stop: StopSignal) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping after the current tick");
            stop.request_stop();
        }
    });
}

fn run_timestamp() -> Result<String, Box<dyn std::error::Error>> {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let format = format_description::parse("[year][month][day]-[hour][minute][second]")?;
    Ok(now.format(&format)?)
}

fn load_config(path: &Path) -> Result<TrainConfig, Box<dyn std::error::Error>> {
    TrainConfig::load(path)
        .map_err(|err| format!("failed to load config {}: {}", path.display(), err).into())
}

/// Config file from `PPO_CONFIG` (or `fallback` if it exists), then env overrides
fn resolve_config(fallback: Option<&Path>) -> Result<TrainConfig, Box<dyn std::error::Error>> {
    let mut config = match env::var("PPO_CONFIG").ok() {
        Some(path) => load_config(Path::new(&path))?,
        None => match fallback.filter(|path| path.exists()) {
            Some(path) => load_config(path)?,
            None => TrainConfig::new(),
        },
    };

    if let Some(iterations) = get_env_var("PPO_ITERATIONS") {
        config.num_iterations = iterations;
    }
    if let Some(horizon) = get_env_var("PPO_HORIZON") {
        config.horizon = horizon;
    }
    if let Some(seed) = get_env_var("PPO_SEED") {
        config.seed = seed;
    }
    Ok(config)
}

fn arena_config(seed: u64) -> ArenaConfig {
    ArenaConfig {
        num_agents: get_env_var("PPO_NUM_AGENTS").unwrap_or(ArenaConfig::default().num_agents),
        seed,
        ..ArenaConfig::default()
    }
}

async fn run_training(stop: StopSignal) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(None)?;
    let timestamp = run_timestamp()?;

    let checkpoint_root: PathBuf = env::var("PPO_CHECKPOINT_DIR")
        .unwrap_or_else(|_| "checkpoints".to_string())
        .into();
    let log_root: PathBuf = env::var("PPO_LOG_DIR")
        .unwrap_or_else(|_| "logs".to_string())
        .into();
    let run_dir = checkpoint_root.join(&timestamp);

    std::fs::create_dir_all(&run_dir)?;
    config.save(run_dir.join(CONFIG_FILE))?;
    let scalar_log = ScalarLogger::new(log_root.join(&timestamp))?;

    let arena = RollerBallArena::new(arena_config(config.seed));
    tracing::info!(
        "Training on {} agents, checkpoints in {}",
        arena.num_agents(),
        run_dir.display()
    );

    let handle = tokio::task::spawn_blocking(move || {
        let device = Default::default();
        let mut trainer = PPOTrainer::<TrainBackend>::new(
            device,
            arena.observation_size(),
            arena.action_size(),
            config,
        )
        .with_scalar_log(scalar_log);
        let mut checkpointer = FileCheckpointer::new(run_dir);
        trainer.train(arena, &mut checkpointer, &stop)
    });

    match handle.await?? {
        TrainOutcome::Completed => tracing::info!("Training finished"),
        TrainOutcome::Interrupted => tracing::info!("Training interrupted, final checkpoint skipped"),
    }
    Ok(())
}

async fn run_evaluation(stop: StopSignal) -> Result<(), Box<dyn std::error::Error>> {
    let run_dir: PathBuf = env::var("PPO_CHECKPOINT_DIR")
        .map_err(|_| "PPO_CHECKPOINT_DIR must name a training run directory for evaluation")?
        .into();
    let episodes: usize = get_env_var("PPO_EVAL_EPISODES").unwrap_or(10);
    let config = resolve_config(Some(&run_dir.join(CONFIG_FILE)))?;

    let handle = tokio::task::spawn_blocking(move || -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let arena_config = arena_config(config.seed);
        let max_ticks = episodes * arena_config.max_episode_steps.max(1);
        let arena = RollerBallArena::new(arena_config);

        let device = Default::default();
        let model = ActorCritic::<InferenceBackend>::new(
            &device,
            arena.observation_size(),
            arena.action_size(),
            &config.policy,
        );
        let checkpointer = FileCheckpointer::new(&run_dir);
        let model = match checkpointer.load(CheckpointKind::Best, model.clone(), &device) {
            Ok(model) => model,
            Err(err) => {
                tracing::warn!("No best checkpoint ({}), trying final", err);
                checkpointer.load(CheckpointKind::Final, model, &device)?
            }
        };

        let mut sim = SimulatorGuard::new(arena);
        let metrics = evaluate(&mut *sim, &model, episodes, max_ticks, &stop)?;
        sim.close()?;
        metrics.print_summary();
        Ok(())
    });

    handle.await?.map_err(|err| err.to_string())?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_logging();

    let stop = StopSignal::new();
    spawn_interrupt_handler(stop.clone());

    let mode = env::var("PPO_MODE").unwrap_or_else(|_| "train".to_string());
    tracing::info!("Mode: {}", mode);

    match mode.as_str() {
        "train" => run_training(stop).await,
        "eval" => run_evaluation(stop).await,
        other => Err(format!("unknown PPO_MODE '{}', expected train or eval", other).into()),
    }
}
