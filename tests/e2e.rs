//! End-to-end scenarios driven against a real `TcpListener` bound to an
//! ephemeral port, with a temporary directory as web root. Each test starts
//! its own server instance; no shared global state, no fixed port.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use corehttpd::context::{ServerContext, ServerContextConfig};
use corehttpd::limits::{
    ArenaLimits, CacheLimits, ConnLimits, PathLimits, RateLimits, ReqLimits, RespLimits, ServerLimits,
};
use corehttpd::{bind, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn unique_dir(label: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut dir = std::env::temp_dir();
    dir.push(format!("corehttpd-e2e-{label}-{}-{n}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp web root");
    dir
}

async fn spawn_server(web_root: PathBuf, conn_limits: ConnLimits) -> SocketAddr {
    let listener = bind(([127, 0, 0, 1], 0).into(), 128).expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let ctx = ServerContext::new(
        ServerContextConfig {
            web_root,
            server_limits: ServerLimits::default(),
            conn_limits,
            req_limits: ReqLimits::default(),
            resp_limits: RespLimits::default(),
            path_limits: PathLimits::default(),
            cache_limits: CacheLimits::default(),
            rate_limits: RateLimits::default(),
            arena_limits: ArenaLimits::default(),
        },
        shutdown_rx,
    );

    let server = Server::builder().listener(listener).context(ctx).workers(2).build();
    tokio::spawn(server.launch());
    addr
}

/// A parsed response: status line, header map (lower-cased names), and body.
struct ParsedResponse {
    status_line: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl ParsedResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn status_code(&self) -> u16 {
        self.status_line
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .expect("status line has a numeric code")
    }
}

/// Reads one HTTP response off `stream`: headers up to the blank line, then
/// exactly `Content-Length` body bytes (no chunked transfer in this server).
async fn read_response(stream: &mut TcpStream) -> ParsedResponse {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        let n = stream.read(&mut chunk).await.expect("read response headers");
        assert!(n > 0, "connection closed before a full response was received");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = std::str::from_utf8(&buf[..header_end]).expect("headers are ASCII");
    let mut lines = head.split("\r\n");
    let status_line = lines.next().expect("status line").to_string();
    let headers: Vec<(String, String)> = lines
        .filter(|l| !l.is_empty())
        .filter_map(|l| l.split_once(": "))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let content_length: usize = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0);

    let body_start = header_end + 4;
    while buf.len() < body_start + content_length {
        let n = stream.read(&mut chunk).await.expect("read response body");
        assert!(n > 0, "connection closed mid-body");
        buf.extend_from_slice(&chunk[..n]);
    }

    let body = buf[body_start..body_start + content_length].to_vec();
    ParsedResponse { status_line, headers, body }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn write_file(root: &Path, name: &str, contents: &[u8]) {
    std::fs::write(root.join(name), contents).expect("write fixture file");
}

#[tokio::test]
async fn whole_file_get_returns_200_with_exact_body() {
    let root = unique_dir("whole-file");
    write_file(&root, "index.html", b"hello world");
    let addr = spawn_server(root, ConnLimits::default()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /index.html HTTP/1.1\r\nHost: h\r\n\r\n")
        .await
        .unwrap();

    let resp = read_response(&mut stream).await;
    assert!(resp.status_line.starts_with("HTTP/1.1 200"));
    assert_eq!(resp.header("content-length"), Some("11"));
    assert_eq!(resp.body, b"hello world");

    let etag = resp.header("etag").expect("etag present").to_string();
    assert!(etag.starts_with("\"b-"), "unexpected etag {etag}");
}

#[tokio::test]
async fn conditional_get_with_matching_etag_returns_304() {
    let root = unique_dir("conditional-get");
    write_file(&root, "index.html", b"hello world");
    let addr = spawn_server(root, ConnLimits::default()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /index.html HTTP/1.1\r\nHost: h\r\n\r\n")
        .await
        .unwrap();
    let first = read_response(&mut stream).await;
    let etag = first.header("etag").unwrap().to_string();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET /index.html HTTP/1.1\r\nHost: h\r\nIf-None-Match: {etag}\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let second = read_response(&mut stream).await;
    assert!(second.status_line.starts_with("HTTP/1.1 304"));
    assert!(second.body.is_empty());
    assert_eq!(second.header("etag"), Some(etag.as_str()));
}

#[tokio::test]
async fn range_request_returns_206_with_requested_span() {
    let root = unique_dir("range");
    let body: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
    write_file(&root, "big.bin", &body);
    let addr = spawn_server(root, ConnLimits::default()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /big.bin HTTP/1.1\r\nHost: h\r\nRange: bytes=100-199\r\n\r\n")
        .await
        .unwrap();

    let resp = read_response(&mut stream).await;
    assert!(resp.status_line.starts_with("HTTP/1.1 206"));
    assert_eq!(resp.header("content-range"), Some("bytes 100-199/10000"));
    assert_eq!(resp.header("content-length"), Some("100"));
    assert_eq!(resp.body, body[100..200]);
}

#[tokio::test]
async fn path_traversal_is_rejected_with_403() {
    let root = unique_dir("traversal");
    write_file(&root, "index.html", b"hello world");
    let addr = spawn_server(root, ConnLimits::default()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /../etc/hosts HTTP/1.1\r\nHost: h\r\n\r\n")
        .await
        .unwrap();

    let resp = read_response(&mut stream).await;
    assert!(resp.status_line.starts_with("HTTP/1.1 403"));
    assert!(!resp.body.is_empty());
}

#[tokio::test]
async fn unsupported_method_returns_405_with_allow_header() {
    let root = unique_dir("method-not-allowed");
    write_file(&root, "index.html", b"hello world");
    let addr = spawn_server(root, ConnLimits::default()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"DELETE /x HTTP/1.1\r\nHost: h\r\n\r\n").await.unwrap();

    let resp = read_response(&mut stream).await;
    assert!(resp.status_line.starts_with("HTTP/1.1 405"));
    assert_eq!(resp.header("allow"), Some("GET, HEAD, OPTIONS"));
}

#[tokio::test]
async fn connection_closes_once_request_cap_is_reached() {
    let root = unique_dir("request-cap");
    write_file(&root, "index.html", b"hello world");
    let conn_limits = ConnLimits {
        max_requests_per_connection: 3,
        ..ConnLimits::default()
    };
    let addr = spawn_server(root, conn_limits).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    for _ in 0..3 {
        stream
            .write_all(b"GET /index.html HTTP/1.1\r\nHost: h\r\nConnection: keep-alive\r\n\r\n")
            .await
            .unwrap();
        let resp = read_response(&mut stream).await;
        assert!(resp.status_line.starts_with("HTTP/1.1 200"));
    }

    // The cap has been reached; the connection is now closed even though
    // every response so far said keep-alive. A further write may or may not
    // error depending on how quickly the peer's FIN arrives, but the next
    // read must observe EOF rather than a fourth response.
    let _ = stream
        .write_all(b"GET /index.html HTTP/1.1\r\nHost: h\r\nConnection: keep-alive\r\n\r\n")
        .await;

    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("peer did not close in time")
        .expect("read after close should not error, just return 0");
    assert_eq!(n, 0, "expected EOF, got data past the request cap");
}

#[tokio::test]
async fn head_request_has_no_body_but_reports_content_length() {
    let root = unique_dir("head");
    write_file(&root, "index.html", b"hello world");
    let addr = spawn_server(root, ConnLimits::default()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"HEAD /index.html HTTP/1.1\r\nHost: h\r\n\r\n")
        .await
        .unwrap();

    let resp = read_response(&mut stream).await;
    assert!(resp.status_line.starts_with("HTTP/1.1 200"));
    assert_eq!(resp.header("content-length"), Some("11"));
    assert!(resp.body.is_empty());
}

#[tokio::test]
async fn missing_file_returns_404() {
    let root = unique_dir("missing");
    let addr = spawn_server(root, ConnLimits::default()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /does-not-exist.html HTTP/1.1\r\nHost: h\r\n\r\n")
        .await
        .unwrap();

    let resp = read_response(&mut stream).await;
    assert!(resp.status_line.starts_with("HTTP/1.1 404"));
}

#[tokio::test]
async fn head_with_range_returns_206_with_suppressed_body() {
    let root = unique_dir("head-range");
    let body: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
    write_file(&root, "big.bin", &body);
    let addr = spawn_server(root, ConnLimits::default()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"HEAD /big.bin HTTP/1.1\r\nHost: h\r\nRange: bytes=100-199\r\n\r\n")
        .await
        .unwrap();

    let resp = read_response(&mut stream).await;
    assert!(resp.status_line.starts_with("HTTP/1.1 206"));
    assert_eq!(resp.header("content-range"), Some("bytes 100-199/10000"));
    assert_eq!(resp.header("content-length"), Some("100"));
    assert!(resp.body.is_empty());
}

#[tokio::test]
async fn keep_alive_response_advertises_timeout_and_max() {
    let root = unique_dir("keep-alive-header");
    write_file(&root, "index.html", b"hello world");
    let conn_limits = ConnLimits {
        keep_alive_timeout: Duration::from_secs(45),
        max_requests_per_connection: 500,
        ..ConnLimits::default()
    };
    let addr = spawn_server(root, conn_limits).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /index.html HTTP/1.1\r\nHost: h\r\n\r\n")
        .await
        .unwrap();

    let resp = read_response(&mut stream).await;
    assert!(resp.status_line.starts_with("HTTP/1.1 200"));
    assert_eq!(resp.header("connection"), Some("keep-alive"));
    assert_eq!(resp.header("keep-alive"), Some("timeout=45, max=500"));
}
