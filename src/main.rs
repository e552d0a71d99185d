//! CLI entry point (§6): `corehttpd <port> [-c <web-root>] [--stats] [--workers N] [-v]`.
//!
//! This binary owns everything outside the library's core: argument
//! parsing, log initialization, and turning parsed flags into the
//! `*Limits`/`ServerContextConfig` structs the library's builder accepts.
//! The library itself has no CLI or config-file awareness.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use corehttpd::context::{ServerContext, ServerContextConfig};
use corehttpd::limits::{
    ArenaLimits, CacheLimits, ConnLimits, PathLimits, RateLimits, ReqLimits, RespLimits, ServerLimits,
};
use corehttpd::{bind, Server};

/// Unifies every way the binary's startup path can fail, distinct from the
/// library's `errors::ErrorKind` (which stays scoped to HTTP request
/// parsing, §4.5/§7, and is never surfaced here).
#[derive(Debug, thiserror::Error)]
enum ServeError {
    #[error("failed to start tokio runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("invalid web root: {0}")]
    WebRoot(#[source] std::io::Error),

    #[error("failed to bind port {port}: {source}")]
    Bind { port: u16, #[source] source: std::io::Error },
}

/// High-concurrency static-file HTTP server.
#[derive(Parser, Debug)]
#[command(name = "corehttpd", version, about)]
struct Args {
    /// TCP port to listen on.
    port: u16,

    /// Directory to serve files from (default: current directory).
    #[arg(short = 'c', long = "root", value_name = "PATH")]
    web_root: Option<PathBuf>,

    /// Print periodic throughput/cache statistics via the log.
    #[arg(long)]
    stats: bool,

    /// Interval between stats lines, in milliseconds (default: 5000).
    #[arg(long = "stats-interval-ms", value_name = "MS", default_value_t = 5000)]
    stats_interval_ms: u64,

    /// Number of accept-slot pairs to post (default: available parallelism).
    #[arg(long)]
    workers: Option<usize>,

    /// Raise log verbosity; repeat for more (-v, -vv, -vvv).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(ServeError::Runtime)
    {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!(%error, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), ServeError> {
    let web_root = resolve_web_root(args.web_root).map_err(ServeError::WebRoot)?;

    let listener = bind(
        ([0, 0, 0, 0], args.port).into(),
        ServerLimits::default().max_pending_connections,
    )
    .map_err(|source| ServeError::Bind { port: args.port, source })?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let ctx = ServerContext::new(
        ServerContextConfig {
            web_root,
            server_limits: ServerLimits::default(),
            conn_limits: ConnLimits::default(),
            req_limits: ReqLimits::default(),
            resp_limits: RespLimits::default(),
            path_limits: PathLimits::default(),
            cache_limits: CacheLimits::default(),
            rate_limits: RateLimits::default(),
            arena_limits: ArenaLimits::default(),
        },
        shutdown_rx,
    );

    if args.stats {
        tokio::spawn(stats_loop(ctx.clone(), Duration::from_millis(args.stats_interval_ms)));
    }

    let mut builder = Server::builder().listener(listener).context(ctx);
    if let Some(workers) = args.workers {
        builder = builder.workers(workers);
    }
    let server = builder.build();

    tracing::info!(port = args.port, "listening");

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, draining connections");
        let _ = shutdown_tx.send(true);
    });

    server.launch().await;
    Ok(())
}

fn resolve_web_root(web_root: Option<PathBuf>) -> std::io::Result<PathBuf> {
    let root = web_root.unwrap_or(std::env::current_dir()?);
    std::fs::canonicalize(root)
}

/// Periodically logs the relaxed-ordering counters surfaced by the metrics
/// endpoint, on an interval independent of the on-demand `/metrics` route.
async fn stats_loop(ctx: std::sync::Arc<ServerContext>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(100)));
    loop {
        ticker.tick().await;
        tracing::info!(stats = %ctx.stats_json(), "periodic stats");
    }
}

fn init_logging(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let default_level = match verbose {
        0 => "corehttpd=info",
        1 => "corehttpd=debug",
        _ => "corehttpd=trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();
}
