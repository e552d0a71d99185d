use crate::{
    errors::*,
    http::types::{self, Header, HeaderMap},
    limits::ReqLimits,
    server::connection::HttpConnection,
    Method, Url, Version,
};
use memchr::{memchr, memchr_iter};
use std::{
    io, mem,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};
use tokio::{io::AsyncReadExt, net::TcpStream, time::sleep};

const UNSET_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

/// High-performance HTTP request representation.
///
/// Uses strategic memory alignment for optimal cache performance.
/// All data is zero-copy referenced from the original input.
#[derive(Debug, Clone, PartialEq)]
#[repr(align(128))]
pub struct Request {
    method: Method,
    url: Url,
    version: Version,
    headers: HeaderMap,
    body: Option<&'static [u8]>,

    pub(crate) client_addr: SocketAddr,
    pub(crate) server_addr: SocketAddr,
}

impl Request {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Request {
            method: Method::Get,
            url: Url::new(limits),
            version: Version::Http11,
            headers: HeaderMap::new(limits.header_count),
            body: None,

            client_addr: UNSET_ADDR,
            server_addr: UNSET_ADDR,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.method = Method::Get;
        self.url.clear();
        self.version = Version::Http11;
        self.headers.reset();
        self.body = None;
    }
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[inline(always)]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Returns the first header value with case-insensitive name matching
    /// (per [RFC 7230](https://tools.ietf.org/html/rfc7230#section-3.2)).
    /// Uses linear search.
    ///
    /// # Arguments
    /// - `name`: Header name bytes (e.g., `b"content-type"`), expected lower-case
    #[inline(always)]
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name)
    }

    /// Returns the value of the `Content-Length` header if present.
    #[inline(always)]
    pub const fn content_length(&self) -> Option<usize> {
        self.headers.content_length
    }

    /// Returns the request body if present.
    #[inline(always)]
    pub const fn body(&self) -> Option<&[u8]> {
        self.body
    }

    /// `If-None-Match` header, for conditional-GET dispatch.
    #[inline(always)]
    pub fn if_none_match(&self) -> Option<&[u8]> {
        self.header(b"if-none-match")
    }

    /// `If-Modified-Since` header, for conditional-GET dispatch.
    #[inline(always)]
    pub fn if_modified_since(&self) -> Option<&[u8]> {
        self.header(b"if-modified-since")
    }

    /// `Accept-Encoding` header, consulted for the gzip fast path.
    #[inline(always)]
    pub fn accept_encoding(&self) -> Option<&[u8]> {
        self.header(b"accept-encoding")
    }

    /// `Range` header, parsed against the caller-supplied resource size.
    /// See [`parse_range`].
    #[inline(always)]
    pub fn range(&self, file_size: u64) -> Option<RangeOutcome> {
        self.header(b"range").map(|h| parse_range(h, file_size))
    }

    /// Remote address of the peer that sent this request.
    #[inline(always)]
    pub const fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Local address the connection was accepted on.
    #[inline(always)]
    pub const fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }
}

/// Result of parsing a `Range` header against a known resource size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// `start..=end`, both inclusive, `start <= end < file_size`.
    Satisfiable { start: u64, end: u64 },
    /// The header was present but could not be satisfied against this resource size.
    Unsatisfiable,
}

/// Parses a `Range: bytes=...` header value against a resource of `file_size` bytes.
///
/// Only the single-range `bytes=S-E`, `bytes=S-`, and `bytes=-N` forms are
/// recognized; anything else (including multi-range requests) is unsatisfiable.
pub(crate) fn parse_range(header: &[u8], file_size: u64) -> RangeOutcome {
    use RangeOutcome::*;

    if file_size == 0 {
        return Unsatisfiable;
    }

    let Some(spec) = header.strip_prefix(b"bytes=") else {
        return Unsatisfiable;
    };

    let Some(dash) = memchr(b'-', spec) else {
        return Unsatisfiable;
    };
    let (start_bytes, end_bytes) = (&spec[..dash], &spec[dash + 1..]);

    if start_bytes.is_empty() {
        // bytes=-N (suffix range)
        let Some(n) = types::slice_to_usize(end_bytes) else {
            return Unsatisfiable;
        };
        let n = n as u64;
        if n == 0 || n > file_size {
            return Unsatisfiable;
        }
        return Satisfiable {
            start: file_size - n,
            end: file_size - 1,
        };
    }

    let Some(start) = types::slice_to_usize(start_bytes).map(|v| v as u64) else {
        return Unsatisfiable;
    };
    if start >= file_size {
        return Unsatisfiable;
    }

    if end_bytes.is_empty() {
        // bytes=S-
        return Satisfiable {
            start,
            end: file_size - 1,
        };
    }

    let Some(end) = types::slice_to_usize(end_bytes).map(|v| v as u64) else {
        return Unsatisfiable;
    };
    if start > end {
        return Unsatisfiable;
    }

    Satisfiable {
        start,
        end: end.min(file_size - 1),
    }
}

impl HttpConnection {
    #[inline]
    pub(crate) fn parse(&mut self) -> Result<Version, ErrorKind> {
        self.parse_method()?;
        self.parse_url()?;
        self.check_version()?;

        self.parse_headers()?;
        self.check_body()?;

        Ok(self.request.version)
    }
}

// Parse first line
impl HttpConnection {
    #[inline]
    fn parse_method(&mut self) -> Result<(), ErrorKind> {
        // "OPTIONS " - the longest recognized method with a space (8 bytes)
        let slice = self
            .parser
            .get_slice(0, 8)
            .ok_or(ErrorKind::InvalidMethod)?;

        (self.request.method, self.parser.position) = Method::from_bytes(slice)?;
        Ok(())
    }

    #[inline]
    // Cannot replace with `get_slice` or `find_slice` method
    // due to ownership error. And there is no need to use `into_static`
    fn parse_url(&mut self) -> Result<(), ErrorKind> {
        let posit = self
            .parser
            .find_char(self.req_limits.url_size, b' ')
            .ok_or(ErrorKind::InvalidUrl)?;

        let parser = &mut self.parser;
        let url = &mut self.request.url;

        let start = parser.position;
        let slice_url = &parser.buffer[start..start + posit];

        if slice_url.is_empty() || slice_url[0] != b'/' {
            return Err(ErrorKind::InvalidUrl);
        }

        let (path_len, query) = match memchr_iter(b'?', slice_url).next() {
            Some(q) => (q, Some(q)),
            None => (posit, None),
        };

        url.path = parser
            .get_slice_static(start, path_len)
            .ok_or(ErrorKind::InvalidUrl)?;
        url.query = match query {
            Some(q) => parser.get_slice_static(start + q, posit - q),
            None => None,
        };
        url.target = parser
            .get_slice_static(start, posit)
            .ok_or(ErrorKind::InvalidUrl)?;

        parser.update_position(posit);

        Ok(())
    }

    #[inline]
    fn check_version(&mut self) -> Result<(), ErrorKind> {
        // "HTTP/1.X\r\n" - HTTP version with line break (10 bytes)
        let slice = self
            .parser
            .find_slice(10, b'\n')
            .ok_or(ErrorKind::InvalidVersion)?;

        if !matches!(slice.len(), 8 | 9) {
            return Err(ErrorKind::InvalidVersion);
        }

        (self.response.version, self.response.keep_alive) = Version::from_bytes(&slice[..8])?;
        self.request.version = self.response.version;

        // Check for the use of the '\r' character
        self.parser.has_crlf = slice.last() == Some(&b'\r');

        Ok(())
    }
}

// Parse headers
impl HttpConnection {
    // Basic methods
    #[inline]
    fn parse_headers(&mut self) -> Result<(), ErrorKind> {
        for _ in 0..=self.req_limits.header_count {
            let Some(header) = self.parse_header()? else {
                return Ok(());
            };

            if !self.parse_special_header(&header)? {
                self.request.headers.headers.push(header);
            }
        }

        Err(ErrorKind::TooManyHeaders)
    }

    #[inline]
    fn parse_header(&mut self) -> Result<Option<Header>, ErrorKind> {
        let parser = &mut self.parser;
        // HeaderName: Someone=data\r\n
        //                            |
        let end = parser
            .find_char(self.req_limits.precalc.h_line, b'\n')
            .ok_or(ErrorKind::InvalidHeader)?;

        match parser.get_slice(parser.position + end - 1, 2) {
            Some([b'\r', b'\n']) if parser.has_crlf => {}
            Some([_, b'\n']) if !parser.has_crlf => {}
            _ => return Err(ErrorKind::InvalidHeader),
        }

        // HeaderName: Someone=data\r\n
        //           |
        let Some(split) = parser.find_char(end, b':') else {
            self.check_end_of_headers(end)?;
            return Ok(None);
        };

        if parser.get_slice(parser.position + split, 2) != Some(b": ") {
            return Err(ErrorKind::InvalidHeader);
        }

        let value_start = split + 2;
        let len_value = end - value_start - parser.has_crlf as usize;

        if split > self.req_limits.header_name_size || len_value > self.req_limits.header_value_size
        {
            return Err(ErrorKind::InvalidHeader);
        }

        let name = {
            let name = parser
                .get_slice_mut(parser.position, split)
                .ok_or(ErrorKind::InvalidHeader)?;

            if name.is_empty() {
                return Err(ErrorKind::InvalidHeader);
            }

            types::to_lower_case(name);
            unsafe { Parser::into_static(name) }
        };

        let value = parser
            .get_slice_static(parser.position + value_start, len_value)
            .ok_or(ErrorKind::InvalidHeader)?;

        parser.update_position(end);

        Ok(Some(Header::new(name, value)))
    }

    #[inline]
    fn parse_special_header(&mut self, header: &Header) -> Result<bool, ErrorKind> {
        match header.name {
            b"content-length" => self.parse_content_length(header.value),
            b"connection" => self.parse_connection(header.value),
            _ => return Ok(false),
        }
        .map(|_| true)
    }

    // Auxiliary methods
    #[inline]
    fn check_end_of_headers(&mut self, start: usize) -> Result<(), ErrorKind> {
        let parser = &mut self.parser;
        // [\r, \n, \r, \n] or [x, x, \n, \n]
        let p_end = parser
            .get_slice(parser.position + start - 3, 4)
            .ok_or(ErrorKind::InvalidHeader)?;

        if !match parser.has_crlf {
            true => p_end.ends_with(b"\r\n\r\n"),
            false => p_end.ends_with(b"\n\n"),
        } {
            return Err(ErrorKind::InvalidHeader);
        }

        parser.position += parser.has_crlf as usize + 1;

        Ok(())
    }

    #[inline]
    fn parse_content_length(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        let len = types::slice_to_usize(value).ok_or(ErrorKind::InvalidContentLength)?;
        if len > self.req_limits.body_size {
            return Err(ErrorKind::BodyTooLarge);
        }
        self.request.headers.content_length = Some(len);
        Ok(())
    }

    #[inline]
    fn parse_connection(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        let mut normalized = [0; 10];
        let len = types::into_lower_case(value, &mut normalized);

        match &normalized[..len] {
            b"keep-alive" => self.response.keep_alive = true,
            b"close" => self.response.keep_alive = false,
            _ => return Err(ErrorKind::InvalidConnection),
        }

        Ok(())
    }
}

// Parse body
impl HttpConnection {
    #[inline]
    fn check_body(&mut self) -> Result<(), ErrorKind> {
        let parser = &self.parser;
        let body = parser.len - parser.position;

        match self.request.headers.content_length {
            Some(len) if len == body => {
                let slice = parser.get_slice_static(parser.position, len).ok_or(
                    ErrorKind::BodyMismatch {
                        expected: len,
                        available: body,
                    },
                )?;

                self.request.body = Some(slice);
                Ok(())
            }
            Some(len) => Err(ErrorKind::BodyMismatch {
                expected: len,
                available: body,
            }),
            None => match body == 0 {
                true => Ok(()),
                false => Err(ErrorKind::UnexpectedBody(body)),
            },
        }
    }
}

//

#[derive(Debug, Clone, PartialEq)]
#[repr(align(64))]
pub(crate) struct Parser {
    position: usize,
    len: usize,
    has_crlf: bool,
    buffer: Box<[u8]>,
}

impl Parser {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        let buffer = vec![0; limits.precalc.buffer].into_boxed_slice();

        Parser {
            position: 0,
            len: 0,
            has_crlf: false,
            buffer,
        }
    }

    #[cfg(test)]
    pub(crate) fn from<V: AsRef<[u8]>>(limits: &ReqLimits, value: V) -> Self {
        let mut buffer = vec![0; limits.precalc.buffer];

        let value = value.as_ref();
        buffer[0..value.len()].copy_from_slice(value);

        Parser {
            position: 0,
            len: value.len(),
            has_crlf: false,
            buffer: buffer.into_boxed_slice(),
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.position = 0;
        self.len = 0;
        self.has_crlf = false;
        self.buffer.fill(0);
    }
}

// Work with Buffer
impl Parser {
    // Reading level
    #[inline]
    pub(crate) async fn fill_buffer(
        &mut self,
        stream: &mut TcpStream,
        time: Duration,
    ) -> Result<usize, io::Error> {
        tokio::select! {
            biased;

            read_result = stream.read(&mut self.buffer) => {
                let n = read_result?;
                self.len = n;
                Ok(n)
            }
            _ = sleep(time) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"))
            },
        }
    }

    // Search level
    #[inline]
    fn find_slice(&mut self, limit: usize, delimiter: u8) -> Option<&[u8]> {
        let step = self.find_char(limit, delimiter)?;
        let last_index = self.update_position(step);
        let slice = self.get_slice(last_index, step)?;
        Some(slice)
    }

    #[inline]
    fn find_char(&self, step: usize, delimiter: u8) -> Option<usize> {
        let slice = self.get_slice(self.position, step)?;
        memchr(delimiter, slice)
    }

    // Low level
    #[inline(always)]
    fn get_slice(&self, start: usize, step: usize) -> Option<&[u8]> {
        self.buffer.get(start..start + step)
    }

    #[inline(always)]
    fn get_slice_mut(&mut self, start: usize, step: usize) -> Option<&mut [u8]> {
        self.buffer.get_mut(start..start + step)
    }

    #[inline(always)]
    fn update_position(&mut self, step: usize) -> usize {
        let old = self.position;
        self.position += step + 1;
        old
    }

    // Unsafe level
    #[inline(always)]
    fn get_slice_static(&self, start: usize, step: usize) -> Option<&'static [u8]> {
        let value = self.get_slice(start, step)?;
        unsafe { Some(Self::into_static(value)) }
    }

    #[inline(always)]
    // SAFETY: the buffer backing `src` lives in `Parser`, which is itself
    // owned by a pool slot kept alive for the process lifetime (never freed,
    // only zeroed and reused on `reset`). A `'static` reference therefore
    // never dangles, but it can point at stale or zeroed bytes once the
    // request that produced it has been reset — callers must not retain
    // these slices past the request/response cycle that created them.
    const unsafe fn into_static(src: &[u8]) -> &'static [u8] {
        unsafe { mem::transmute(src) }
    }
}

#[cfg(test)]
mod request_self {
    use super::*;
    use crate::tools::*;

    #[test]
    fn reset() {
        let limits = ReqLimits::default();
        let mut t = HttpConnection::from_req("OPTIONS /qwe HTTP/1.0\r\nHost: 127.0.0.1\r\n\r\n");

        assert_eq!(t.parse(), Ok(Version::Http10));
        t.request.reset();
        assert_eq!(Request::new(&limits), t.request);
    }

    #[test]
    fn parse_method() {
        #[rustfmt::skip]
        let cases = [
            ("GET /url",    Method::Get),
            ("GET ",        Method::Get),
            ("POST ",       Method::Post),
            ("HEAD ",       Method::Head),
            ("OPTIONS ",    Method::Options),
            ("PUT ",        Method::Unknown),
            ("DELETE ",     Method::Unknown),
            ("PATCH ",      Method::Unknown),
        ];

        for (method, expected) in cases {
            let mut t = HttpConnection::from_req(method);
            assert_eq!(t.parse_method(), Ok(()));
            assert_eq!(t.request.method(), expected);
        }

        for bad in ["GET", "PYU ", "GETGETGET "] {
            let mut t = HttpConnection::from_req(bad);
            assert_eq!(t.parse_method(), Err(ErrorKind::InvalidMethod));
        }
    }

    #[test]
    fn parse_url() {
        #[rustfmt::skip]
        let cases = [
            ("/ ",                       Some(("/", None))),
            ("/api/user ",                Some(("/api/user", None))),
            ("/api/find?user=qwe&id=223 ", Some(("/api/find", Some("?user=qwe&id=223")))),
            ("/report.pdf?download ",     Some(("/report.pdf", Some("?download")))),
            ("qwe ",                      None),
            (" ",                         None),
            ("/qwe",                      None),
        ];

        for (url, expected) in cases {
            let mut t = HttpConnection::from_req(url);

            if let Some((path, query)) = expected {
                assert_eq!(t.parse_url(), Ok(()));
                assert_eq!(str_op(t.request.url().path()), path);
                assert_eq!(t.request.url().query_full().map(str_op), query);
            } else {
                assert_eq!(t.parse_url(), Err(ErrorKind::InvalidUrl));
            }
        }
    }

    #[test]
    fn check_version() {
        #[rustfmt::skip]
        let cases = [
            ("HTTP/1.1\r\n e", Ok((Version::Http11, true))),
            ("HTTP/1.1\r\n",   Ok((Version::Http11, true))),
            ("HTTP/1.0\r\n",   Ok((Version::Http10, true))),
            ("HTTP/1.1\n",     Ok((Version::Http11, false))),
            ("HTTP/1.0\n",     Ok((Version::Http10, false))),

            ("HTTP/2.0\r\n",   Err(ErrorKind::UnsupportedVersion)),
            ("HTTP/0.9\r\n",   Err(ErrorKind::UnsupportedVersion)),
            ("http/1.1\r\n",   Err(ErrorKind::UnsupportedVersion)),

            ("HTTP/1.15\r\n",  Err(ErrorKind::InvalidVersion)),
            (" HTTP/1.1\r\n",  Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.1",       Err(ErrorKind::InvalidVersion)),
            ("",               Err(ErrorKind::InvalidVersion)),
        ];

        for (value, expected) in cases {
            let mut t = HttpConnection::from_req(value);

            if let Ok((version, has_crlf)) = expected {
                assert_eq!(t.check_version(), Ok(()));

                assert_eq!(t.request.version, version);
                assert_eq!(t.response.version, version);
                assert_eq!(t.parser.has_crlf, has_crlf);

                match t.request.version {
                    Version::Http11 => assert!(t.response.keep_alive),
                    Version::Http10 => assert!(!t.response.keep_alive),
                }
            } else if let Err(e) = expected {
                assert_eq!(t.check_version(), Err(e));
            }
        }
    }

    #[test]
    fn parse_header() {
        #[rustfmt::skip]
        let cases = [
            (true,  "HEADER: value\r\n", Some(("header", "value"))),
            (true,  "header: \r\n",      Some(("header", ""))),
            (false, "header: value\n",   Some(("header", "value"))),

            (true,  "Header: value\r",   None),
            (true,  "header:value\n",    None),
            (true,  ": value\r\n",       None),
        ];

        for (has_crlf, header, expected) in cases {
            let mut t = HttpConnection::from_req(header);
            t.parser.has_crlf = has_crlf;

            if let Some((name, value)) = expected {
                let header = t.parse_header().unwrap().unwrap();

                assert_eq!(str_op(header.name), name);
                assert_eq!(str_op(header.value), value);
            } else {
                assert_eq!(t.parse_header(), Err(ErrorKind::InvalidHeader));
            }
        }
    }

    #[test]
    fn parse_special_header() {
        #[rustfmt::skip]
        let cases = [
            ("content-length: 1256\n\n", Ok((Some(1256), None))),
            ("connection: keep-alive\n\n", Ok((None, Some(true)))),
            ("connection: close\n\n", Ok((None, Some(false)))),

            ("connection: keep_alive\n\n", Err(ErrorKind::InvalidConnection)),
            ("content-length: 12asd\n\n", Err(ErrorKind::InvalidContentLength)),
            ("content-length: 4097\n\n", Err(ErrorKind::BodyTooLarge)),
        ];

        for (headers, result) in cases {
            let mut t = HttpConnection::from_req(headers);

            if let Ok((content_length, keep_alive)) = result {
                assert_eq!(t.parse_headers(), Ok(()));

                if let Some(len) = content_length {
                    assert_eq!(t.request.headers.content_length, Some(len));
                }
                if let Some(keep_alive) = keep_alive {
                    assert_eq!(t.response.keep_alive, keep_alive);
                }
            } else if let Err(e) = result {
                assert_eq!(t.parse_headers(), Err(e));
            }
        }
    }

    #[test]
    fn parse_valid_request() {
        #[rustfmt::skip]
        let cases: Vec<(&str, Result<(Method, &str, Version, Vec<(&str, &str)>, Option<&[u8]>, bool), ErrorKind>)> = vec![
            ("GET / HTTP/1.1\r\n\r\n", Ok((Method::Get, "/", Version::Http11, vec![], None, true))),
            ("GET / HTTP/1.1\n\n", Ok((Method::Get, "/", Version::Http11, vec![], None, true))),
            (
                "POST /test HTTP/1.1\r\nHOST: 127.0.0.1\r\n\r\n",
                Ok((Method::Post, "/test", Version::Http11, vec![("host", "127.0.0.1")], None, true)),
            ),
            (
                "HEAD / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n",
                Ok((Method::Head, "/", Version::Http11, vec![], None, true)),
            ),
            (
                "OPTIONS / HTTP/1.1\r\nCoNNEctIon: close\r\n\r\n",
                Ok((Method::Options, "/", Version::Http11, vec![], None, false)),
            ),
            (
                "GET / HTTP/1.0\r\n\r\n",
                Ok((Method::Get, "/", Version::Http10, vec![], None, false)),
            ),
        ];

        for (req, result) in cases {
            let mut t = HttpConnection::from_req(req);

            if let Ok(result) = result {
                assert_eq!(t.parse(), Ok(result.2));
                assert_eq!(t.request.method(), result.0);
                assert_eq!(str_op(t.request.url().target()), result.1);
                assert_eq!(t.response.version, result.2);

                for (name, value) in result.3 {
                    assert_eq!(str(t.request.header(name.as_bytes())), Some(value));
                }
                assert_eq!(t.request.body(), result.4);
                assert_eq!(t.response.keep_alive, result.5);
            } else if let Err(e) = result {
                assert_eq!(t.parse(), Err(e));
            }
        }
    }

    #[test]
    fn range_parsing() {
        use RangeOutcome::*;

        assert_eq!(parse_range(b"bytes=0-0", 1), Satisfiable { start: 0, end: 0 });
        assert_eq!(
            parse_range(b"bytes=100-199", 10_000),
            Satisfiable { start: 100, end: 199 }
        );
        assert_eq!(
            parse_range(b"bytes=100-", 10_000),
            Satisfiable { start: 100, end: 9999 }
        );
        assert_eq!(
            parse_range(b"bytes=-500", 10_000),
            Satisfiable { start: 9500, end: 9999 }
        );
        assert_eq!(
            parse_range(b"bytes=-10000", 10_000),
            Satisfiable { start: 0, end: 9999 }
        );
        assert_eq!(parse_range(b"bytes=10000-", 10_000), Unsatisfiable);
        assert_eq!(parse_range(b"bytes=-0", 10_000), Unsatisfiable);
        assert_eq!(parse_range(b"bytes=-20000", 10_000), Unsatisfiable);
        assert_eq!(parse_range(b"bytes=5-1", 10_000), Unsatisfiable);
        assert_eq!(parse_range(b"garbage", 10_000), Unsatisfiable);
        assert_eq!(parse_range(b"bytes=0-0", 0), Unsatisfiable);
    }
}

#[cfg(test)]
mod parser {
    use super::*;
    use crate::tools::*;

    #[test]
    fn reset() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::new(&limits);

        parser.position = 5;
        parser.len = 10;
        parser.has_crlf = true;
        parser.buffer[0] = b'X';

        parser.reset();

        assert_eq!(Parser::new(&limits), parser);
    }

    #[test]
    fn find_slice() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::from(&limits, b"GET / HTTP/1.1");

        let slice = parser.find_slice(10, b' ').unwrap();
        assert_eq!(slice, b"GET");
        assert_eq!(parser.position, 4);

        let slice = parser.find_slice(10, b' ').unwrap();
        assert_eq!(slice, b"/");

        assert_eq!(parser.find_slice(limits.precalc.buffer + 1, b' '), None);
        assert_eq!(parser.find_slice(0, b' '), None);
    }

    #[test]
    fn find_char() {
        let limits = ReqLimits::default().precalculate();
        let parser = Parser::from(&limits, b"hello world\nnext line");

        assert_eq!(parser.find_char(20, b' '), Some(5));
        assert_eq!(parser.find_char(20, b'\n'), Some(11));
        assert_eq!(parser.find_char(5, b'x'), None);
        assert_eq!(parser.find_char(3, b'o'), None);
    }

    #[test]
    fn get_slice() {
        let limits = ReqLimits::default().precalculate();
        let parser = Parser::from(&limits, b"test data here");

        assert_eq!(str(parser.get_slice(0, 4)), Some("test"));
        assert_eq!(str(parser.get_slice(5, 4)), Some("data"));
        assert_eq!(parser.get_slice(limits.precalc.buffer + 1, 10), None);
    }

    #[test]
    fn get_slice_static() {
        let limits = ReqLimits::default().precalculate();
        let parser = Parser::from(&limits, b"static data");

        assert_eq!(str(parser.get_slice_static(0, 6)), Some("static"));
        assert_eq!(str(parser.get_slice_static(7, 4)), Some("data"));
        assert_eq!(parser.get_slice_static(limits.precalc.buffer + 1, 10), None);
    }

    #[test]
    fn update_position() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::from(&limits, b"some data");

        let old_pos = parser.update_position(4);
        assert_eq!(old_pos, 0);
        assert_eq!(parser.position, 5);
    }
}
