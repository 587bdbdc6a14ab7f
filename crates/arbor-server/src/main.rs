use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arbor_runtime::ModelRegistry;
use arbor_server::{run_server, AppState, GenerationParams, ServerConfig};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Branch-aware streaming text continuation server.
#[derive(Parser)]
#[command(name = "arbor-server", version)]
struct Args {
    /// Address to bind.
    #[arg(long, env = "ARBOR_HOST", default_value = "127.0.0.1")]
    host: std::net::IpAddr,

    /// Port to listen on.
    #[arg(short, long, env = "ARBOR_PORT", default_value_t = 8080)]
    port: u16,

    /// Maximum concurrent WebSocket sessions.
    #[arg(long, env = "ARBOR_MAX_SESSIONS", default_value_t = 16)]
    max_sessions: usize,

    /// JSON file the branch store is loaded from and saved to.
    #[arg(long, env = "ARBOR_BRANCH_SNAPSHOT")]
    branch_snapshot: Option<PathBuf>,

    /// Default sampling temperature (must be > 0).
    #[arg(short, long, default_value_t = 1.0)]
    temperature: f32,

    /// Default number of steps per generation.
    #[arg(long, default_value_t = 50)]
    max_new_tokens: usize,

    /// Alternatives drawn per step.
    #[arg(short, long, default_value_t = 10)]
    k: usize,

    /// Probability floor below which tokens are never drawn.
    #[arg(long, default_value_t = 0.001)]
    min_prob: f32,

    /// Fixed sampler seed for every session.
    #[arg(long)]
    seed: Option<u64>,

    /// Wall-clock limit per generation, in seconds.
    #[arg(long, env = "ARBOR_TURN_TIMEOUT_SECS")]
    turn_timeout_secs: Option<u64>,

    /// Artificial delay per step of the reference model, in milliseconds.
    #[arg(long, default_value_t = 0)]
    step_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut defaults = GenerationParams::default()
        .with_temperature(args.temperature)
        .with_max_new_tokens(args.max_new_tokens)
        .with_k(args.k)
        .with_min_prob(args.min_prob);
    if let Some(seed) = args.seed {
        defaults = defaults.with_seed(seed);
    }
    if let Some(secs) = args.turn_timeout_secs {
        defaults = defaults.with_turn_timeout(Duration::from_secs(secs));
    }
    defaults.validate()?;

    let mut config = ServerConfig::default()
        .with_bind_addr(SocketAddr::new(args.host, args.port))
        .with_max_concurrent_sessions(args.max_sessions)
        .with_defaults(defaults);
    if let Some(path) = args.branch_snapshot {
        config = config.with_branch_snapshot(path);
    }

    let mut registry = ModelRegistry::with_defaults();
    if args.step_delay_ms > 0 {
        registry = registry.with_step_delay(Duration::from_millis(args.step_delay_ms));
    }
    for (id, entry) in registry.entries() {
        tracing::info!(id, name = %entry.name, "model available");
    }

    let state = AppState::new(Arc::new(registry), config)?;
    run_server(state).await?;
    Ok(())
}
