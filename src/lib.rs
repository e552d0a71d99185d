//! corehttpd - a high-concurrency static-file HTTP server core.
//!
//! Four tightly coupled subsystems make up the "hard part": a completion-
//! port-style reactor realized on tokio (`server::server_impl`), a
//! per-connection HTTP/1.1 state machine with keep-alive, conditional GET,
//! Range, and HEAD support (`server::connection`), a bounded small-file
//! response cache with LRU eviction ([`cache`]), and arena-based memory and
//! connection pools plus a per-source-IP rate limiter ([`arena`], [`pool`],
//! [`rate_limit`]). [`dispatch`] ties them together: it is the single entry
//! point the connection state machine calls once a request has been
//! parsed, and it owns method policy, path sanitization, the cache lookup,
//! the gzip fast path, and Range handling.
//!
//! # Protocol support
//!
//! - **HTTP/1.1**: persistent connections, conditional GET, byte-range
//!   requests, fixed-length (non-chunked) bodies.
//! - **HTTP/1.0**: basic protocol support, closing after each response
//!   unless `Connection: keep-alive` is explicit.
//!
//! # Security
//!
//! - Percent-decoding, `..`/backslash/NUL rejection, a character whitelist,
//!   and Windows reserved-device-name/alternate-data-stream rejection in
//!   the path sanitizer ([`path`]) before any filesystem call is made.
//! - A bounded connection pool and a per-IP concurrency ceiling provide
//!   graceful overload behavior (503) instead of unbounded resource growth.
//!
//! This is a library crate with a thin binary front end; see `src/main.rs`
//! for the CLI surface (`corehttpd <port> [--stats] [-c <web-root>]`).

pub(crate) mod arena;
pub(crate) mod cache;
pub mod context;
pub(crate) mod dispatch;
pub(crate) mod errors;
pub(crate) mod http {
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub mod limits;
pub(crate) mod mime;
pub(crate) mod path;
pub(crate) mod pool;
pub(crate) mod rate_limit;
pub(crate) mod server {
    pub(crate) mod connection;
    pub mod server_impl;
}
pub(crate) mod util;

pub use crate::{
    context::{ServerContext, ServerContextConfig},
    http::{
        request::Request,
        response::{write::WriteBuffer, Handled, Response},
        types::{Method, StatusCode, Version},
    },
    server::server_impl::{bind, Server, ServerBuilder},
};

/// Builds a throwaway [`Request`]/[`Response`] pair and runs `f` against
/// them, for doctests that exercise [`Response`]'s builder API without
/// standing up a real connection.
#[doc(hidden)]
pub fn run_test<F: FnOnce(&Request, &mut Response) -> Handled>(f: F) {
    f(
        &Request::new(&crate::limits::ReqLimits::default()),
        &mut Response::new(&crate::limits::RespLimits::default()),
    );
}

#[doc(hidden)]
#[cfg(test)]
pub(crate) mod tools {
    use std::str::from_utf8;

    #[inline]
    pub(crate) fn str(value: Option<&[u8]>) -> Option<&str> {
        Some(from_utf8(value?).unwrap())
    }

    #[inline]
    pub(crate) fn str_op(value: &[u8]) -> &str {
        from_utf8(value).unwrap()
    }
}
