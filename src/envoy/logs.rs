//! Envoy log relay.
//!
//! # Responsibilities
//! - Read envoy's stdout/stderr line by line
//! - Decode the `[LOG_FORMAT]level--component--message` line format
//! - Re-emit every record through `tracing` at the matching level
//!
//! # Design Decisions
//! - Decoding sits behind [`LogDecoder`] so it can be tested without I/O
//! - Lines that don't match the format are still emitted, at debug level
//! - Transient read errors are retried forever with backoff; only end of
//!   stream stops the relay

use std::io;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::resilience::backoff::ExponentialBackoff;

/// Value passed to envoy's `--log-format`.
pub const LOG_FORMAT: &str = "[LOG_FORMAT]%l--%n--%v";

const LOG_FORMAT_PREFIX: &str = "[LOG_FORMAT]";

/// Component used for lines that don't name one.
pub const DEFAULT_COMPONENT: &str = "envoy";

/// Matches a `[file.cc:123] ` source location prefix.
static FILE_AND_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\[[a-zA-Z0-9/_.\-]+:[0-9]+\]\s(.*)$").expect("invalid file and line pattern")
});

/// Envoy log severities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Parse an envoy level name. Unknown names yield `None`.
    pub fn parse(level: &str) -> Option<Self> {
        match level.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warning" | "warn" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            "critical" | "fatal" => Some(LogLevel::Critical),
            _ => None,
        }
    }
}

/// One decoded line of envoy output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub component: String,
    pub level: LogLevel,
    pub message: String,
}

/// Turns a raw output line into a record. `None` drops the line.
pub trait LogDecoder: Send + Sync {
    fn decode(&self, line: &str) -> Option<LogRecord>;
}

/// Decoder for envoy started with [`LOG_FORMAT`] and `--log-format-escaped`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvoyLogDecoder;

impl LogDecoder for EnvoyLogDecoder {
    fn decode(&self, line: &str) -> Option<LogRecord> {
        let line = line.trim_end_matches(['\r', '\n']);

        let mut parts = line.splitn(3, "--");
        let (level, component, message) = match (parts.next(), parts.next(), parts.next()) {
            (Some(level), Some(component), Some(message)) => {
                let level = level.strip_prefix(LOG_FORMAT_PREFIX).unwrap_or(level);
                (LogLevel::parse(level), component, message)
            }
            _ => (None, "", ""),
        };

        let component = if component.is_empty() { DEFAULT_COMPONENT } else { component };
        let message = if message.is_empty() { line } else { message };

        // The remainder after a `[file:line]` prefix is escaped but may be
        // bare, so it is unescaped as if it were quoted.
        let message = match FILE_AND_LINE.captures(message).and_then(|c| c.get(1)) {
            Some(rest) => {
                let rest = rest.as_str();
                unquote(rest)
                    .or_else(|| unquote(&format!("\"{rest}\"")))
                    .unwrap_or_else(|| rest.to_string())
            }
            None => unquote(message).unwrap_or_else(|| message.to_string()),
        };

        if message.is_empty() {
            return None;
        }

        Some(LogRecord {
            component: component.to_string(),
            level: level.unwrap_or(LogLevel::Debug),
            message,
        })
    }
}

/// Unescape a C-style double-quoted string. `None` if `s` isn't one.
pub fn unquote(s: &str) -> Option<String> {
    let inner = s.strip_prefix('"')?.strip_suffix('"')?;

    let mut out = Vec::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' | '\n' => return None,
            '\\' => match chars.next()? {
                'n' => out.push(b'\n'),
                't' => out.push(b'\t'),
                'r' => out.push(b'\r'),
                'a' => out.push(0x07),
                'b' => out.push(0x08),
                'f' => out.push(0x0c),
                'v' => out.push(0x0b),
                '\\' => out.push(b'\\'),
                '"' => out.push(b'"'),
                '\'' => out.push(b'\''),
                'x' => out.push(u8::try_from(take_digits(&mut chars, 2, 16)?).ok()?),
                'u' => push_char(&mut out, take_digits(&mut chars, 4, 16)?)?,
                'U' => push_char(&mut out, take_digits(&mut chars, 8, 16)?)?,
                first @ '0'..='7' => {
                    let rest = take_digits(&mut chars, 2, 8)?;
                    let value = first.to_digit(8)? * 64 + rest;
                    out.push(u8::try_from(value).ok()?);
                }
                _ => return None,
            },
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }

    Some(String::from_utf8_lossy(&out).into_owned())
}

fn take_digits(chars: &mut impl Iterator<Item = char>, count: usize, radix: u32) -> Option<u32> {
    let mut value = 0u32;
    for _ in 0..count {
        value = value * radix + chars.next()?.to_digit(radix)?;
    }
    Some(value)
}

fn push_char(out: &mut Vec<u8>, code: u32) -> Option<()> {
    let c = char::from_u32(code)?;
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
    Some(())
}

/// Emit a record through `tracing`.
pub fn emit(record: &LogRecord) {
    let name = record.component.as_str();
    let msg = record.message.as_str();
    match record.level {
        LogLevel::Trace => tracing::trace!(service = "envoy", name, "{msg}"),
        LogLevel::Debug => tracing::debug!(service = "envoy", name, "{msg}"),
        LogLevel::Info => tracing::info!(service = "envoy", name, "{msg}"),
        LogLevel::Warning => tracing::warn!(service = "envoy", name, "{msg}"),
        LogLevel::Error => tracing::error!(service = "envoy", name, "{msg}"),
        LogLevel::Critical => tracing::error!(service = "envoy", name, critical = true, "{msg}"),
    }
}

/// Relays one envoy output stream into the supervisor's logs.
pub struct LogRelay<D> {
    decoder: D,
    stream: &'static str,
    backoff: ExponentialBackoff,
}

impl<D: LogDecoder> LogRelay<D> {
    /// `stream` names the pipe ("stdout", "stderr") in relay diagnostics.
    pub fn new(decoder: D, stream: &'static str) -> Self {
        Self {
            decoder,
            stream,
            backoff: ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(60)),
        }
    }

    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Relay until the stream ends.
    pub async fn run<R: AsyncRead + Unpin>(self, reader: R) {
        self.run_with(reader, |record| emit(&record)).await;
    }

    /// Relay until the stream ends, handing every record to `sink`.
    pub async fn run_with<R, F>(mut self, reader: R, mut sink: F)
    where
        R: AsyncRead + Unpin,
        F: FnMut(LogRecord),
    {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    self.backoff.reset();
                    let line = String::from_utf8_lossy(&buf);
                    if let Some(record) = self.decoder.decode(&line) {
                        sink(record);
                    }
                }
                Err(e) if is_stream_closed(&e) => break,
                Err(e) => {
                    tracing::error!(
                        service = "envoy",
                        stream = self.stream,
                        error = %e,
                        "failed to read log"
                    );
                    tokio::time::sleep(self.backoff.next_backoff()).await;
                }
            }
        }

        tracing::debug!(service = "envoy", stream = self.stream, "envoy log stream closed");
    }
}

fn is_stream_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected
    )
}
