//! Access logging for forwarded HTTP requests.
//!
//! # Responsibilities
//! - Parse a space-separated field list once, at startup
//! - Render one line per completed request
//! - Serialize concurrent writers onto a single destination
//!
//! # Fields
//! `remote_addr time request body_bytes_sent http_referer http_user_agent
//! http_x_forwarded_for server_name proxy_endpoint response_time request_args`
//!
//! `server_name` is the request `Host`, `proxy_endpoint` the upstream
//! authority the request was sent to, and `response_time` the wall time from
//! accept to completion. Whether those are the most useful definitions is
//! still open; they are kept stable so existing log consumers don't break.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Field list used when none is configured.
pub const DEFAULT_FORMAT: &str =
    "remote_addr time request body_bytes_sent http_referer http_user_agent server_name proxy_endpoint response_time";

/// Initial capacity for a rendered line.
const LINE_CAPACITY: usize = 1024;

/// Errors building an access log.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessLogError {
    #[error("access log: invalid format {0:?}")]
    EmptyFormat(String),

    #[error("access log: invalid field {0:?}")]
    UnknownField(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    RemoteAddr,
    Time,
    Request,
    BodyBytesSent,
    HttpReferer,
    HttpUserAgent,
    HttpXForwardedFor,
    ServerName,
    ProxyEndpoint,
    ResponseTime,
    RequestArgs,
}

impl FromStr for Field {
    type Err = AccessLogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "remote_addr" => Field::RemoteAddr,
            "time" => Field::Time,
            "request" => Field::Request,
            "body_bytes_sent" => Field::BodyBytesSent,
            "http_referer" => Field::HttpReferer,
            "http_user_agent" => Field::HttpUserAgent,
            "http_x_forwarded_for" => Field::HttpXForwardedFor,
            "server_name" => Field::ServerName,
            "proxy_endpoint" => Field::ProxyEndpoint,
            "response_time" => Field::ResponseTime,
            "request_args" => Field::RequestArgs,
            other => return Err(AccessLogError::UnknownField(other.to_string())),
        })
    }
}

/// Parse a format string into its fields.
fn parse_format(format: &str) -> Result<Vec<Field>, AccessLogError> {
    let fields = format
        .split_whitespace()
        .map(Field::from_str)
        .collect::<Result<Vec<_>, _>>()?;
    if fields.is_empty() {
        return Err(AccessLogError::EmptyFormat(format.to_string()));
    }
    Ok(fields)
}

/// Everything the access log knows about one request.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub remote_addr: SocketAddr,
    pub method: String,
    /// Path and query as received.
    pub request_uri: String,
    /// Protocol version, e.g. `HTTP/1.1`.
    pub proto: String,
    /// Request `Content-Length`; zero when absent.
    pub content_length: u64,
    pub referer: String,
    pub user_agent: String,
    pub forwarded_for: String,
    pub host: String,
    pub upstream: String,
    pub query: String,
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// A configured access log writing to a shared destination.
pub struct AccessLog {
    fields: Vec<Field>,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for AccessLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessLog").field("fields", &self.fields).finish()
    }
}

impl AccessLog {
    /// Create an access log writing `format` lines to `sink`.
    pub fn new(sink: impl Write + Send + 'static, format: &str) -> Result<Self, AccessLogError> {
        Ok(Self {
            fields: parse_format(format)?,
            sink: Mutex::new(Box::new(sink)),
        })
    }

    /// Check a format string without building a log.
    pub fn validate_format(format: &str) -> Result<(), AccessLogError> {
        parse_format(format).map(|_| ())
    }

    /// Render a record as a newline-terminated line.
    pub fn render(&self, record: &AccessRecord) -> String {
        let mut line = String::with_capacity(LINE_CAPACITY);
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(' ');
            }
            write_field(&mut line, *field, record);
        }
        line.push('\n');
        line
    }

    /// Render and write a record.
    pub fn log(&self, record: &AccessRecord) -> io::Result<()> {
        let line = self.render(record);
        self.write_line(line.as_bytes())
    }

    /// Write a preformatted line under the sink lock.
    pub fn write_line(&self, line: &[u8]) -> io::Result<()> {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        sink.write_all(line)?;
        sink.flush()
    }
}

fn write_field(b: &mut String, field: Field, r: &AccessRecord) {
    // Writing into a String cannot fail.
    let _ = match field {
        Field::RemoteAddr => write!(b, "{}", r.remote_addr.ip()),
        Field::Time => write!(b, "{}", r.finished_at.format("%Y-%m-%dT%H:%M:%SZ")),
        Field::Request => write!(b, "\"{} {} {}\"", r.method, r.request_uri, r.proto),
        Field::BodyBytesSent => write!(b, "{}", r.content_length),
        Field::HttpReferer => write!(b, "{}", r.referer),
        Field::HttpUserAgent => write!(b, "{}", r.user_agent),
        Field::HttpXForwardedFor => write!(b, "{}", r.forwarded_for),
        Field::ServerName => write!(b, "{}", r.host),
        Field::ProxyEndpoint => write!(b, "{}", r.upstream),
        Field::ResponseTime => write!(
            b,
            "{}.{:06}",
            r.elapsed.as_secs(),
            r.elapsed.subsec_micros()
        ),
        Field::RequestArgs => write!(b, "{}", r.query),
    };
}
