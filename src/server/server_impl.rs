//! TCP accept loop and reactor (C7, §4.7).
//!
//! Native completion ports aren't portably available from safe, idiomatic
//! Rust, so the reactor contract is realized on tokio's multi-threaded
//! runtime (§1): pre-posted accept slots become `2 × worker_count` tasks
//! each blocked in [`TcpListener::accept`], re-issuing `accept()` the moment
//! they hand a socket off; `post_recv`/`post_send`/`post_transmit_file`
//! become plain `async fn`s awaited on the connection's own task instead of
//! queued completions. Every accepted connection still passes through the
//! same admission chain as the original — rate limiter, then connection
//! pool — before a task is spawned for it.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::context::ServerContext;

/// Builds a listener with `SO_REUSEADDR` set and the backlog sized from
/// [`crate::limits::ServerLimits::max_pending_connections`], then hands it
/// to tokio. `socket2` is used only for the options tokio's `TcpListener`
/// doesn't expose a knob for; everything past `bind`/`listen` is plain
/// tokio I/O.
pub fn bind(addr: SocketAddr, backlog: usize) -> Result<TcpListener, std::io::Error> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.clamp(1, i32::MAX as usize) as i32)?;

    TcpListener::from_std(socket.into())
}

/// Number of pre-posted accept tasks: `2 × worker_count`, clamped `[2, 64]`
/// per §4.7's scheduling model — independent of how many tokio runtime
/// worker threads actually exist, since tokio freely migrates any of these
/// tasks across its thread pool.
fn accept_slot_count(workers: usize) -> usize {
    (2 * workers.max(1)).clamp(2, 64)
}

/// Owns the bound listener and shared server state; `launch` runs the
/// accept loop to completion (until the shutdown signal fires).
pub struct Server {
    listener: Arc<TcpListener>,
    ctx: Arc<ServerContext>,
    workers: usize,
}

pub struct ServerBuilder {
    listener: Option<TcpListener>,
    ctx: Option<Arc<ServerContext>>,
    workers: usize,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            listener: None,
            ctx: None,
            workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2),
        }
    }

    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn context(mut self, ctx: Arc<ServerContext>) -> Self {
        self.ctx = Some(ctx);
        self
    }

    /// Overrides the worker count used to size the accept-slot pool
    /// (default: the machine's available parallelism).
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn build(self) -> Server {
        Server {
            listener: Arc::new(self.listener.expect("Server requires a listener")),
            ctx: self.ctx.expect("Server requires a context"),
            workers: self.workers,
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Runs the accept loop until the context's shutdown watch fires, then
    /// waits for every in-flight connection task to finish on its own (no
    /// forced aborts — a connection mid-response is allowed to complete it).
    pub async fn launch(self) {
        let slots = accept_slot_count(self.workers);
        tracing::info!(slots, web_root = %self.ctx.web_root.display(), "accept loop starting");

        let tracker = TaskTracker::new();

        let mut accept_handles = Vec::with_capacity(slots);
        for slot in 0..slots {
            let listener = self.listener.clone();
            let ctx = self.ctx.clone();
            let mut shutdown = self.ctx.shutdown.clone();
            let tracker = tracker.clone();

            accept_handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;

                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                        accepted = listener.accept() => {
                            match accepted {
                                Ok((stream, peer)) => accept_one(ctx.clone(), stream, peer, &tracker),
                                Err(error) => tracing::warn!(slot, %error, "accept failed"),
                            }
                        }
                    }
                }
            }));
        }

        for handle in accept_handles {
            let _ = handle.await;
        }

        tracker.join_all().await;
        tracing::info!("accept loop drained, all connections closed");
    }
}

/// Admits one freshly accepted socket: per-IP rate limit, then a connection
/// pool slot, sending an immediate response and closing for either failure
/// rather than queueing the overflow (§4.7, `ServerLimits::count_503_handlers`).
/// On success, spawns the connection's own task, which is the reactor's
/// "one completion-drain loop per live connection" realized on tokio.
fn accept_one(ctx: Arc<ServerContext>, stream: TcpStream, peer: SocketAddr, tracker: &TaskTracker) {
    let _ = stream.set_nodelay(true);

    tracker.spawn(async move {
        let mut stream = stream;
        let local_addr = stream.local_addr().unwrap_or(peer);

        if !ctx.rate_limiter.try_acquire(peer.ip()) {
            // §7 "Rate-limit": silent close, no response — a response here
            // would itself spend the resources the limiter exists to save.
            ctx.stats.connections_rejected_rate_limit.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%peer, "rate limit rejected connection");
            return;
        }

        let Some(mut guard) = ctx.pool.try_acquire().await else {
            ctx.stats.connections_rejected_pool_full.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%peer, "connection pool exhausted");
            if ctx.server_limits.count_503_handlers > 0 {
                let _ = send_service_unavailable(&mut stream).await;
            }
            ctx.rate_limiter.release(peer.ip());
            return;
        };

        ctx.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%peer, "connection accepted");

        if let Err(error) = guard.run(&mut stream, peer, local_addr, &ctx).await {
            tracing::debug!(%peer, %error, "connection closed with error");
        }

        ctx.rate_limiter.release(peer.ip());
    });
}

/// A fixed `503 Service Unavailable` sent with no keep-alive before a
/// connection is ever handed to the per-connection state machine — the
/// admission-layer equivalent of §4.9's 503 response, used when the rate
/// limiter or connection pool has no room.
async fn send_service_unavailable(stream: &mut TcpStream) -> Result<(), std::io::Error> {
    use tokio::io::AsyncWriteExt;
    const BODY: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\nconnection: close\r\ncontent-length: 0\r\n\r\n";
    stream.write_all(BODY).await
}

/// Tracks every spawned connection task so `launch` can wait for them all
/// to drain before returning, without pulling in `tokio-util` for a single
/// `TaskTracker`-shaped need.
#[derive(Clone)]
struct TaskTracker {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TaskTracker {
    fn new() -> Self {
        Self { handles: Arc::new(Mutex::new(Vec::new())) }
    }

    fn spawn<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        self.handles.lock().expect("task tracker poisoned").push(handle);
    }

    async fn join_all(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().expect("task tracker poisoned"));
        for handle in handles {
            let _ = handle.await;
        }
    }
}
