use crate::{
    context::ServerContext,
    dispatch::{self, Dispatched},
    errors::ErrorKind,
    http::{
        request::{Parser, Request},
        response::Response,
        types::Version,
    },
    limits::{ConnLimits, ReqLimits, RespLimits},
};
use std::{io, net::SocketAddr, sync::Arc, time::Instant};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::sleep,
};

/// One pooled connection record: parser/request/response buffers plus the
/// per-TCP-connection bookkeeping in [`Connection`].
///
/// This struct is the connection pool's slot type directly (see
/// [`crate::pool::ConnPool`]) — a single pool slot is reused across many
/// different TCP connections over the process lifetime, with [`Connection`]
/// reset fresh every time [`run`](Self::run) starts serving a new socket.
pub(crate) struct HttpConnection {
    connection: Connection,
    pub(crate) parser: Parser,
    pub(crate) request: Request,
    pub(crate) response: Response,

    pub(crate) req_limits: ReqLimits,
    pub(crate) resp_limits: RespLimits,
}

impl HttpConnection {
    #[inline]
    pub(crate) fn new(req_limits: &ReqLimits, resp_limits: &RespLimits) -> Self {
        Self {
            connection: Connection::new(),
            parser: Parser::new(req_limits),
            request: Request::new(req_limits),
            response: Response::new(resp_limits),

            req_limits: req_limits.clone(),
            resp_limits: resp_limits.clone(),
        }
    }

    #[inline]
    fn reset_request_response(&mut self) {
        self.parser.reset();
        self.request.reset();
        self.response.reset(&self.resp_limits);
    }
}

impl HttpConnection {
    /// Serves one accepted TCP connection to completion: parses and
    /// dispatches requests until the peer closes, a keep-alive limit is hit,
    /// or a fatal parse error forces the connection shut.
    #[inline]
    pub(crate) async fn run(
        &mut self,
        stream: &mut TcpStream,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        ctx: &Arc<ServerContext>,
    ) -> Result<(), io::Error> {
        self.request.client_addr = client_addr;
        self.request.server_addr = server_addr;

        match self.impl_run(stream, ctx).await {
            Ok(()) => Ok(()),
            Err(ErrorKind::Io(e)) => Err(e.0),
            Err(error) => {
                ctx.conn_limits
                    .send_error(
                        stream,
                        error,
                        self.request.version(),
                        ctx.server_limits.json_errors,
                    )
                    .await
            }
        }
    }

    #[inline]
    pub(crate) async fn impl_run(
        &mut self,
        stream: &mut TcpStream,
        ctx: &Arc<ServerContext>,
    ) -> Result<(), ErrorKind> {
        self.connection.reset();

        while !self.is_expired(&ctx.conn_limits) {
            self.reset_request_response();

            let awaiting_first_request = self.connection.request_count == 0;
            let read_timeout = if awaiting_first_request {
                ctx.conn_limits.request_timeout
            } else {
                ctx.conn_limits.keep_alive_timeout
            };

            match self.parser.fill_buffer(stream, read_timeout).await {
                Ok(0) => break,
                Ok(_) => {}
                // §4.8/§7: a read timeout before any request has arrived gets a
                // 408; a timeout waiting out an idle keep-alive connection closes
                // silently (the client already got what it asked for).
                Err(e) if e.kind() == io::ErrorKind::TimedOut && awaiting_first_request => {
                    ctx.conn_limits
                        .write_bytes(stream, request_timeout_response(self.response.version))
                        .await?;
                    break;
                }
                Err(e) => return Err(ErrorKind::from(e)),
            }
            self.response.version = self.parse()?;

            let dispatched = dispatch::dispatch(ctx, &self.request, &mut self.response).await;
            self.record_response_stats(ctx);

            match dispatched {
                Dispatched::Complete => {}
                Dispatched::Stream { mut file, start, len } => {
                    ctx.conn_limits
                        .write_bytes(stream, self.response.buffer())
                        .await?;

                    if self.request.method() != crate::Method::Head {
                        stream_file_range(stream, &mut file, start, len, &ctx.conn_limits).await?;
                    }
                    ctx.stats.bytes_served.fetch_add(len, std::sync::atomic::Ordering::Relaxed);

                    if !self.response.keep_alive() {
                        break;
                    }
                    self.connection.request_count += 1;
                    continue;
                }
            }

            ctx.conn_limits
                .write_bytes(stream, self.response.buffer())
                .await?;

            if !self.response.keep_alive() {
                break;
            }

            self.connection.request_count += 1;
        }

        Ok(())
    }

    /// Bumps the shared request/byte/status counters for one completed
    /// response (§9 "Atomic statistics"). Called once dispatch has finished
    /// building the response buffer, before it's written to the socket —
    /// the buffer's length already reflects the full header block plus any
    /// inline body, and `Dispatched::Stream`'s file bytes are added by the
    /// caller once the range/whole-file length is known.
    #[inline]
    fn record_response_stats(&self, ctx: &Arc<ServerContext>) {
        ctx.stats.requests_served.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        ctx.stats.bytes_served.fetch_add(self.response.buffer().len() as u64, std::sync::atomic::Ordering::Relaxed);
        ctx.stats.record_status(self.response.status_code());
    }

    #[inline]
    fn is_expired(&self, limits: &ConnLimits) -> bool {
        !self.response.keep_alive()
            || self.connection.request_count >= limits.max_requests_per_connection
            || self.connection.created.elapsed() > limits.connection_lifetime
    }
}

/// A fixed `408 Request Timeout` response, sent when a freshly accepted
/// connection never finishes sending its first request within
/// `ConnLimits::request_timeout` (§4.8, §7).
fn request_timeout_response(version: Version) -> &'static [u8] {
    match version {
        Version::Http11 => b"HTTP/1.1 408 Request Timeout\r\nconnection: close\r\ncontent-length: 0\r\n\r\n",
        Version::Http10 => b"HTTP/1.0 408 Request Timeout\r\nconnection: close\r\ncontent-length: 0\r\n\r\n",
    }
}

/// Seeks to `start` and copies exactly `len` bytes of `file` onto `stream`,
/// realizing `post_transmit_file` (§4.7) as a plain `tokio::io::copy` rather
/// than a literal `sendfile` syscall — tokio has no portable zero-copy
/// primitive, so this is the idiomatic equivalent: the kernel still avoids
/// an extra userspace buffer copy on platforms where `tokio::fs::File`'s
/// read path is backed by `io_uring` or a thread-pool `pread`, but the
/// *logical* single-completion behavior the spec requires is preserved by
/// awaiting the whole copy before returning.
async fn stream_file_range(
    stream: &mut TcpStream,
    file: &mut tokio::fs::File,
    start: u64,
    len: u64,
    conn_limits: &ConnLimits,
) -> Result<(), ErrorKind> {
    use tokio::io::AsyncSeekExt;

    file.seek(io::SeekFrom::Start(start))
        .await
        .map_err(ErrorKind::from)?;

    let mut take = file.take(len);
    tokio::select! {
        biased;

        result = tokio::io::copy(&mut take, stream) => { result.map_err(ErrorKind::from)?; },
        _ = sleep(conn_limits.socket_write_timeout) => {
            return Err(ErrorKind::from(io::Error::new(io::ErrorKind::TimedOut, "write timeout")));
        },
    }

    Ok(())
}

impl ConnLimits {
    #[inline]
    pub(crate) async fn send_error(
        &self,
        stream: &mut TcpStream,
        error: ErrorKind,
        version: Version,
        json_errors: bool,
    ) -> Result<(), io::Error> {
        self.write_bytes(stream, error.as_http(version, json_errors))
            .await
    }

    #[inline]
    pub(crate) async fn write_bytes(
        &self,
        stream: &mut TcpStream,
        response: &[u8],
    ) -> Result<(), io::Error> {
        tokio::select! {
            biased;

            result = stream.write_all(response) => result,
            _ = sleep(self.socket_write_timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout"))
            },
        }
    }
}

#[derive(Debug)]
pub(crate) struct Connection {
    created: Instant,
    request_count: usize,
}

impl Connection {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            created: Instant::now(),
            request_count: 0,
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.created = Instant::now();
        self.request_count = 0;
    }
}

#[cfg(test)]
impl HttpConnection {
    #[inline]
    pub(crate) fn from_req<V: AsRef<[u8]>>(value: V) -> Self {
        let req_limits = ReqLimits::default().precalculate();
        let resp_limits = RespLimits::default();

        Self {
            connection: Connection::new(),
            parser: Parser::from(&req_limits, value),
            request: Request::new(&req_limits),
            response: Response::new(&resp_limits),

            req_limits,
            resp_limits,
        }
    }
}
