//! Response builder / dispatch chain (C9, §4.9).
//!
//! `dispatch()` is the single entry point the connection state machine calls
//! once a request has been parsed. It owns the method policy, the metrics
//! endpoint, path sanitization, cache consultation, the in-memory gzip fast
//! path, conditional-GET, and Range handling — everything between "we have a
//! `Request`" and "we have a complete (or header-only, file-streamed)
//! `Response`".

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::fs::File;

use crate::context::ServerContext;
use crate::http::request::{RangeOutcome, Request};
use crate::http::response::{Handled, Response};
use crate::http::types::{Method, StatusCode};
use crate::mime;
use crate::path;
use crate::util::http_date;

const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
const SERVER_HEADER: &str = "corehttpd/0.1.0";

/// What the dispatcher produced: a fully-buffered response ready to write as
/// one `write_all`, or headers only with the body to stream separately from
/// an open file (the zero-copy `post_transmit_file` path, §4.7).
pub(crate) enum Dispatched {
    Complete,
    Stream { file: File, start: u64, len: u64 },
}

pub(crate) async fn dispatch(ctx: &Arc<ServerContext>, request: &Request, response: &mut Response) -> Dispatched {
    response.configure_keep_alive(
        ctx.conn_limits.keep_alive_timeout.as_secs(),
        ctx.conn_limits.max_requests_per_connection,
    );

    match request.method() {
        Method::Options => {
            security_headers(
                response
                    .status(StatusCode::Ok)
                    .header("server", SERVER_HEADER)
                    .header("allow", "GET, HEAD, OPTIONS")
                    .header("access-control-allow-origin", "*")
                    .header("access-control-allow-methods", "GET, HEAD, OPTIONS"),
            )
            .empty();
            return Dispatched::Complete;
        }
        Method::Post | Method::Unknown => {
            security_headers(
                response
                    .status(StatusCode::MethodNotAllowed)
                    .header("server", SERVER_HEADER)
                    .header("allow", "GET, HEAD, OPTIONS"),
            )
            .body("405 Method Not Allowed");
            return Dispatched::Complete;
        }
        Method::Get | Method::Head => {}
    }

    let raw_path = match std::str::from_utf8(request.url().path()) {
        Ok(path) => path,
        Err(_) => {
            forbidden(response);
            return Dispatched::Complete;
        }
    };

    if raw_path == "/metrics" || raw_path == "/stats" {
        let body = ctx.stats.to_json(&ctx.cache, &ctx.arena);
        security_headers(
            response
                .status(StatusCode::Ok)
                .header("server", SERVER_HEADER)
                .header("content-type", "application/json; charset=utf-8"),
        )
        .body(body);
        return Dispatched::Complete;
    }

    let fs_path = match path::sanitize(raw_path, &ctx.web_root, &ctx.path_limits) {
        Ok(fs_path) => fs_path,
        Err(_) => {
            forbidden(response);
            return Dispatched::Complete;
        }
    };

    let resolved = match resolve_target(&fs_path).await {
        Some(resolved) => resolved,
        None => {
            not_found(response);
            return Dispatched::Complete;
        }
    };

    let metadata = match tokio::fs::metadata(&resolved).await {
        Ok(metadata) => metadata,
        Err(_) => {
            not_found(response);
            return Dispatched::Complete;
        }
    };

    let size = metadata.len();
    if size > MAX_FILE_SIZE {
        payload_too_large(response);
        return Dispatched::Complete;
    }

    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let extension = resolved
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("");
    let content_type = mime::content_type_for_extension(extension);

    let etag = format!("\"{size:x}-{mtime:x}\"");
    let last_modified = http_date(SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(mtime));

    if conditional_hit(request, &etag, &last_modified) {
        security_headers(
            response
                .status(StatusCode::NotModified)
                .header("server", SERVER_HEADER)
                .header("etag", &etag)
                .header("last-modified", &last_modified),
        )
        .empty();
        return Dispatched::Complete;
    }

    let range = matches!(request.method(), Method::Get | Method::Head)
        .then(|| request.range(size))
        .flatten();

    if range.is_none() && request.method() == Method::Get && ctx.cache.is_eligible(size) {
        if let Some((header, body)) = ctx.cache.get(raw_path, size, mtime).await {
            response
                .status(StatusCode::Ok)
                .header("server", SERVER_HEADER)
                .header_raw(&header)
                .body(body);
            return Dispatched::Complete;
        }

        if let Ok((header, body)) = ctx
            .cache
            .insert(raw_path, &resolved, content_type, size, mtime)
            .await
        {
            response
                .status(StatusCode::Ok)
                .header("server", SERVER_HEADER)
                .header_raw(&header)
                .body(body);
            return Dispatched::Complete;
        }
    }

    if range.is_none()
        && request.method() == Method::Get
        && mime::is_compressible(content_type)
        && size <= response_half_capacity(ctx)
        && accepts_gzip(request)
    {
        if let Ok(contents) = tokio::fs::read(&resolved).await {
            let compressed = crate::util::gzip_compress(&contents);
            security_headers(
                response
                    .status(StatusCode::Ok)
                    .header("server", SERVER_HEADER)
                    .header("content-type", content_type)
                    .header("content-encoding", "gzip")
                    .header("etag", &etag)
                    .header("last-modified", &last_modified)
                    .header("cache-control", "public, max-age=3600"),
            )
            .body(compressed);
            return Dispatched::Complete;
        }
    }

    match range {
        Some(RangeOutcome::Satisfiable { start, end }) => {
            let len = end - start + 1;
            security_headers(
                response
                    .status(StatusCode::PartialContent)
                    .header("server", SERVER_HEADER)
                    .header("content-type", content_type)
                    .header("content-range", format!("bytes {start}-{end}/{size}"))
                    .header("etag", &etag)
                    .header("last-modified", &last_modified),
            );

            if request.method() == Method::Head {
                response.declared_body(len as usize);
                return Dispatched::Complete;
            }

            let file = match File::open(&resolved).await {
                Ok(file) => file,
                Err(_) => {
                    not_found(response);
                    return Dispatched::Complete;
                }
            };
            response.declared_body(len as usize);
            Dispatched::Stream { file, start, len }
        }
        Some(RangeOutcome::Unsatisfiable) => {
            security_headers(
                response
                    .status(StatusCode::RangeNotSatisfiable)
                    .header("server", SERVER_HEADER)
                    .header("content-range", format!("bytes */{size}")),
            )
            .empty();
            Dispatched::Complete
        }
        None => {
            security_headers(
                response
                    .status(StatusCode::Ok)
                    .header("server", SERVER_HEADER)
                    .header("content-type", content_type)
                    .header("etag", &etag)
                    .header("last-modified", &last_modified)
                    .header("cache-control", "public, max-age=3600"),
            );

            if request.method() == Method::Head {
                response.declared_body(size as usize);
                return Dispatched::Complete;
            }

            let file = match File::open(&resolved).await {
                Ok(file) => file,
                Err(_) => {
                    not_found(response);
                    return Dispatched::Complete;
                }
            };
            response.declared_body(size as usize);
            Dispatched::Stream { file, start: 0, len: size }
        }
    }
}

/// Resolves a sanitized filesystem path to the actual file to serve: itself
/// if it's a regular file, `<path>/index.html` if it's a directory and that
/// exists, or `None` (→ 404) otherwise.
async fn resolve_target(fs_path: &std::path::Path) -> Option<PathBuf> {
    let metadata = tokio::fs::metadata(fs_path).await.ok()?;

    if metadata.is_dir() {
        let index = fs_path.join("index.html");
        tokio::fs::metadata(&index).await.ok()?;
        Some(index)
    } else {
        Some(fs_path.to_path_buf())
    }
}

fn conditional_hit(request: &Request, etag: &str, last_modified: &str) -> bool {
    if let Some(if_none_match) = request.if_none_match() {
        if if_none_match == etag.as_bytes() {
            return true;
        }
    }
    if let Some(if_modified_since) = request.if_modified_since() {
        if if_modified_since == last_modified.as_bytes() {
            return true;
        }
    }
    false
}

fn accepts_gzip(request: &Request) -> bool {
    request
        .accept_encoding()
        .map(|value| {
            value
                .split(|&b| b == b',')
                .any(|tok| tok.trim_ascii().eq_ignore_ascii_case(b"gzip"))
        })
        .unwrap_or(false)
}

fn response_half_capacity(ctx: &Arc<ServerContext>) -> u64 {
    // Half of the response buffer's max capacity (§4.9 step 8): files larger
    // than this would force the buffer to grow past its steady-state size
    // for a compression pass that may not even shrink them much.
    (ctx.resp_limits.max_capacity / 2) as u64
}

fn security_headers(response: &mut Response) -> &mut Response {
    response
        .header("x-content-type-options", "nosniff")
        .header("x-frame-options", "DENY")
        .header("content-security-policy", "default-src 'self'")
        .header("referrer-policy", "strict-origin-when-cross-origin")
        .header("permissions-policy", "geolocation=(), microphone=(), camera=()")
}

fn forbidden(response: &mut Response) -> Handled {
    security_headers(
        response
            .status(StatusCode::Forbidden)
            .header("server", SERVER_HEADER),
    )
    .body("403 Forbidden")
}

fn not_found(response: &mut Response) -> Handled {
    security_headers(
        response
            .status(StatusCode::NotFound)
            .header("server", SERVER_HEADER),
    )
    .body("404 Not Found")
}

fn payload_too_large(response: &mut Response) -> Handled {
    security_headers(
        response
            .status(StatusCode::PayloadTooLarge)
            .header("server", SERVER_HEADER),
    )
    .body("413 Payload Too Large")
}
