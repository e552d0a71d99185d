//! Shared, immutable-after-startup server state.
//!
//! Every connection task holds one `Arc<ServerContext>` clone. There is no
//! process-wide global or `static` anywhere in the crate — the `Arc` is the
//! entire sharing mechanism (§9 "Global server singleton" decision).

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::arena::ArenaPool;
use crate::cache::FileCache;
use crate::limits::{ArenaLimits, CacheLimits, ConnLimits, PathLimits, RateLimits, ReqLimits, RespLimits, ServerLimits};
use crate::pool::ConnPool;
use crate::rate_limit::RateLimiter;

/// Monotonic, relaxed-ordering counters surfaced on the metrics endpoint.
///
/// Exact cross-counter consistency is not guaranteed or required (§9
/// "Atomic statistics" decision) — a metrics snapshot is a best-effort
/// point-in-time read, not a transaction.
#[derive(Default)]
pub(crate) struct Stats {
    pub(crate) connections_accepted: AtomicU64,
    pub(crate) connections_rejected_rate_limit: AtomicU64,
    pub(crate) connections_rejected_pool_full: AtomicU64,
    pub(crate) requests_served: AtomicU64,
    pub(crate) bytes_served: AtomicU64,
    pub(crate) status_2xx: AtomicU64,
    pub(crate) status_3xx: AtomicU64,
    pub(crate) status_4xx: AtomicU64,
    pub(crate) status_5xx: AtomicU64,
}

impl Stats {
    pub(crate) fn record_status(&self, status: u16) {
        let counter = match status {
            200..=299 => &self.status_2xx,
            300..=399 => &self.status_3xx,
            400..=499 => &self.status_4xx,
            _ => &self.status_5xx,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Renders a hand-built JSON status body for the `/metrics`/`/stats`
    /// endpoint — matching the teacher's existing hand-built JSON in
    /// `errors.rs` rather than pulling in `serde` for one response body.
    pub(crate) fn to_json(&self, cache: &FileCache, arena: &ArenaPool) -> String {
        format!(
            "{{\"connections_accepted\":{},\"connections_rejected_rate_limit\":{},\
             \"connections_rejected_pool_full\":{},\"requests_served\":{},\
             \"bytes_served\":{},\"status_2xx\":{},\"status_3xx\":{},\"status_4xx\":{},\
             \"status_5xx\":{},\"cache_hits\":{},\"cache_misses\":{},\"cache_bytes\":{},\
             \"arena_fast_path_allocs\":{},\"arena_large_allocs\":{},\"arena_blocks_grown\":{}}}",
            self.connections_accepted.load(Ordering::Relaxed),
            self.connections_rejected_rate_limit.load(Ordering::Relaxed),
            self.connections_rejected_pool_full.load(Ordering::Relaxed),
            self.requests_served.load(Ordering::Relaxed),
            self.bytes_served.load(Ordering::Relaxed),
            self.status_2xx.load(Ordering::Relaxed),
            self.status_3xx.load(Ordering::Relaxed),
            self.status_4xx.load(Ordering::Relaxed),
            self.status_5xx.load(Ordering::Relaxed),
            cache.hits(),
            cache.misses(),
            cache.total_bytes(),
            arena.stats().fast_path_allocs.load(Ordering::Relaxed),
            arena.stats().large_allocs.load(Ordering::Relaxed),
            arena.stats().blocks_grown.load(Ordering::Relaxed),
        )
    }
}

/// Resolved configuration plus every shared subsystem a connection task
/// needs, in one `Arc`.
pub struct ServerContext {
    pub(crate) web_root: PathBuf,
    pub(crate) server_limits: ServerLimits,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
    pub(crate) resp_limits: RespLimits,
    pub(crate) path_limits: PathLimits,

    pub(crate) cache: FileCache,
    pub(crate) rate_limiter: RateLimiter,
    pub(crate) arena: ArenaPool,
    pub(crate) pool: ConnPool,
    pub(crate) stats: Stats,

    pub(crate) shutdown: watch::Receiver<bool>,
}

/// Everything [`ServerContext::new`] needs to build every shared subsystem.
/// Constructed directly by `main.rs` from parsed CLI arguments.
#[allow(clippy::too_many_arguments)]
pub struct ServerContextConfig {
    pub web_root: PathBuf,
    pub server_limits: ServerLimits,
    pub conn_limits: ConnLimits,
    pub req_limits: ReqLimits,
    pub resp_limits: RespLimits,
    pub path_limits: PathLimits,
    pub cache_limits: CacheLimits,
    pub rate_limits: RateLimits,
    pub arena_limits: ArenaLimits,
}

impl ServerContext {
    pub fn new(config: ServerContextConfig, shutdown: watch::Receiver<bool>) -> Arc<Self> {
        let pool_capacity = config.server_limits.max_connections;
        // `ReqLimits`'s buffer-size fields are a cached derivation of its
        // public fields (§"Memory Allocation Strategy" above); every consumer
        // downstream of this constructor assumes `precalc` is already
        // populated, so it happens exactly once here.
        let req_limits = config.req_limits.precalculate();

        Arc::new(Self {
            web_root: config.web_root,
            cache: FileCache::new(&config.cache_limits),
            rate_limiter: RateLimiter::new(&config.rate_limits),
            arena: ArenaPool::new(&config.arena_limits),
            pool: ConnPool::new(pool_capacity, &req_limits, &config.resp_limits),
            stats: Stats::default(),
            server_limits: config.server_limits,
            conn_limits: config.conn_limits,
            req_limits,
            resp_limits: config.resp_limits,
            path_limits: config.path_limits,
            shutdown,
        })
    }

    /// A snapshot of the atomic counters as the same JSON body the
    /// `/metrics`/`/stats` endpoint serves, for the binary's periodic stats
    /// log.
    pub fn stats_json(&self) -> String {
        self.stats.to_json(&self.cache, &self.arena)
    }
}
