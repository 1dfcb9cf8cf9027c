//! Host output channel for one exchange.
//!
//! # Responsibilities
//! - Keep the pending header table and status line until the head is committed
//! - Keep a stack of nested output buffers
//! - Commit the head on the first unbuffered write or flush, remembering where
//!   that happened
//! - Hand the committed head and body bytes to a `ResponseSink`
//!
//! # Design Decisions
//! - State is per exchange and travels as a cloneable handle instead of living
//!   in process globals, so a long-lived server can run exchanges side by side
//! - Header calls after the head is committed are ignored and logged, matching
//!   what a CGI host does
//! - `write` and `flush` are `#[track_caller]`: the headers-sent origin points
//!   at the code that produced the first output

use std::fmt;
use std::io::{self, Write};
use std::panic::Location;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::http::response::default_reason;

/// Source location that committed the head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersOrigin {
    pub file: String,
    pub line: u32,
}

impl fmt::Display for HeadersOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Committed response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Head {
    pub protocol: String,
    pub status: u16,
    pub reason: String,
    /// `(name, value)` pairs, one per header line.
    pub headers: Vec<(String, String)>,
}

impl Head {
    /// All values of a header, ignoring name case.
    pub fn header(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// Receives committed output.
pub trait ResponseSink: Send {
    fn write_head(&mut self, head: &Head) -> io::Result<()>;

    fn write_body(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;
}

/// CGI/1.1 output: a `Status:` header followed by the header block.
pub struct CgiSink<W> {
    out: W,
}

impl<W: Write + Send> CgiSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl CgiSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ResponseSink for CgiSink<W> {
    fn write_head(&mut self, head: &Head) -> io::Result<()> {
        write!(self.out, "Status: {} {}\r\n", head.status, head.reason)?;
        write_header_block(&mut self.out, &head.headers)
    }

    fn write_body(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Raw HTTP/1.x output: status line followed by the header block.
pub struct RawHttpSink<W> {
    out: W,
}

impl<W: Write + Send> RawHttpSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> ResponseSink for RawHttpSink<W> {
    fn write_head(&mut self, head: &Head) -> io::Result<()> {
        write!(
            self.out,
            "HTTP/{} {} {}\r\n",
            head.protocol, head.status, head.reason
        )?;
        write_header_block(&mut self.out, &head.headers)
    }

    fn write_body(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

fn write_header_block<W: Write>(out: &mut W, headers: &[(String, String)]) -> io::Result<()> {
    for (name, value) in headers {
        write!(out, "{name}: {value}\r\n")?;
    }
    out.write_all(b"\r\n")
}

/// What a `CaptureSink` has received so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub head: Option<Head>,
    pub body: Vec<u8>,
    pub flushes: usize,
}

/// In-memory sink; clones share the captured data.
#[derive(Debug, Clone, Default)]
pub struct CaptureSink {
    inner: Arc<Mutex<Captured>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Captured {
        self.lock().clone()
    }

    pub fn body(&self) -> Vec<u8> {
        self.lock().body.clone()
    }

    pub fn head(&self) -> Option<Head> {
        self.lock().head.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Captured> {
        self.inner.lock().expect("capture sink mutex poisoned")
    }
}

impl ResponseSink for CaptureSink {
    fn write_head(&mut self, head: &Head) -> io::Result<()> {
        self.lock().head = Some(head.clone());
        Ok(())
    }

    fn write_body(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.lock().body.extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().flushes += 1;
        Ok(())
    }
}

struct StatusLine {
    protocol: String,
    code: u16,
    reason: Option<String>,
}

struct OutputState {
    headers: Vec<(String, String)>,
    status: StatusLine,
    headers_sent: Option<HeadersOrigin>,
    buffers: Vec<Vec<u8>>,
    flush_count: usize,
    bytes_written: u64,
    sink: Box<dyn ResponseSink>,
}

impl OutputState {
    fn commit(&mut self, origin: &'static Location<'static>) -> io::Result<()> {
        if self.headers_sent.is_some() {
            return Ok(());
        }
        self.headers_sent = Some(HeadersOrigin {
            file: origin.file().to_string(),
            line: origin.line(),
        });

        let head = Head {
            protocol: self.status.protocol.clone(),
            status: self.status.code,
            reason: self
                .status
                .reason
                .clone()
                .unwrap_or_else(|| default_reason(self.status.code).to_string()),
            headers: std::mem::take(&mut self.headers),
        };
        tracing::debug!(
            status = head.status,
            headers = head.headers.len(),
            origin = %origin,
            "Response head committed"
        );
        self.sink.write_head(&head)
    }

    fn write_unbuffered(&mut self, bytes: &[u8], origin: &'static Location<'static>) -> io::Result<()> {
        self.commit(origin)?;
        self.bytes_written += bytes.len() as u64;
        self.sink.write_body(bytes)
    }
}

/// Cloneable handle to the output state of one exchange.
#[derive(Clone)]
pub struct OutputContext {
    state: Arc<Mutex<OutputState>>,
}

impl fmt::Debug for OutputContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("OutputContext")
            .field("headers_sent", &state.headers_sent)
            .field("buffer_level", &state.buffers.len())
            .field("flush_count", &state.flush_count)
            .finish()
    }
}

impl OutputContext {
    pub fn new<S: ResponseSink + 'static>(sink: S) -> Self {
        Self {
            state: Arc::new(Mutex::new(OutputState {
                headers: Vec::new(),
                status: StatusLine {
                    protocol: "1.1".to_string(),
                    code: 200,
                    reason: None,
                },
                headers_sent: None,
                buffers: Vec::new(),
                flush_count: 0,
                bytes_written: 0,
                sink: Box::new(sink),
            })),
        }
    }

    /// Context writing CGI output to stdout.
    pub fn cgi() -> Self {
        Self::new(CgiSink::stdout())
    }

    /// Context capturing into memory, with a handle to read the capture.
    pub fn capture() -> (Self, CaptureSink) {
        let sink = CaptureSink::new();
        (Self::new(sink.clone()), sink)
    }

    /// Set a header line or, for `HTTP/x.y code reason`, the status line.
    ///
    /// With `replace`, existing headers of the same name are dropped first.
    /// Returns false if the line was ignored.
    pub fn header(&self, line: &str, replace: bool) -> bool {
        let mut state = self.lock();
        if let Some(origin) = &state.headers_sent {
            tracing::warn!(line = %line, origin = %origin, "Header ignored, headers already sent");
            return false;
        }

        if let Some(status) = parse_status_line(line) {
            state.status = status;
            return true;
        }

        let Some((name, value)) = line.split_once(':') else {
            tracing::warn!(line = %line, "Malformed header line ignored");
            return false;
        };
        let name = name.trim();
        if replace {
            state.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        }
        state.headers.push((name.to_string(), value.trim().to_string()));
        true
    }

    /// Drop all pending headers. The status line is kept.
    pub fn header_remove(&self) {
        let mut state = self.lock();
        if state.headers_sent.is_none() {
            state.headers.clear();
        }
    }

    /// Pending header lines.
    pub fn headers_list(&self) -> Vec<String> {
        self.lock()
            .headers
            .iter()
            .map(|(n, v)| format!("{n}: {v}"))
            .collect()
    }

    /// The status code the head will be (or was) sent with.
    pub fn response_code(&self) -> u16 {
        self.lock().status.code
    }

    /// Set the numeric status code, keeping the protocol.
    pub fn set_response_code(&self, code: u16) -> bool {
        let mut state = self.lock();
        if state.headers_sent.is_some() {
            return false;
        }
        state.status.code = code;
        state.status.reason = None;
        true
    }

    /// Where the head was committed, if it was.
    pub fn headers_sent(&self) -> Option<HeadersOrigin> {
        self.lock().headers_sent.clone()
    }

    /// Open a nested output buffer.
    pub fn start_buffer(&self) {
        self.lock().buffers.push(Vec::new());
    }

    /// Close the innermost buffer, passing its contents one level down.
    ///
    /// Returns false if no buffer was open.
    #[track_caller]
    pub fn end_flush_buffer(&self) -> io::Result<bool> {
        let origin = Location::caller();
        let mut state = self.lock();
        let Some(content) = state.buffers.pop() else {
            return Ok(false);
        };
        match state.buffers.last_mut() {
            Some(outer) => outer.extend_from_slice(&content),
            None if content.is_empty() => {}
            None => state.write_unbuffered(&content, origin)?,
        }
        Ok(true)
    }

    /// Number of open buffers.
    pub fn buffer_level(&self) -> usize {
        self.lock().buffers.len()
    }

    /// Write body bytes into the innermost buffer, or out when none is open.
    #[track_caller]
    pub fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let origin = Location::caller();
        let mut state = self.lock();
        match state.buffers.last_mut() {
            Some(buffer) => {
                buffer.extend_from_slice(bytes);
                Ok(())
            }
            None if bytes.is_empty() => Ok(()),
            None => state.write_unbuffered(bytes, origin),
        }
    }

    /// Commit the head if needed and flush the sink. Buffers are untouched.
    #[track_caller]
    pub fn flush(&self) -> io::Result<()> {
        let origin = Location::caller();
        let mut state = self.lock();
        state.commit(origin)?;
        state.flush_count += 1;
        state.sink.flush()
    }

    /// Number of `flush` calls so far.
    pub fn flush_count(&self) -> usize {
        self.lock().flush_count
    }

    /// Body bytes handed to the sink so far.
    pub fn bytes_written(&self) -> u64 {
        self.lock().bytes_written
    }

    /// End of exchange: close all buffers and flush.
    #[track_caller]
    pub fn finish(&self) -> io::Result<()> {
        while self.end_flush_buffer()? {}
        self.flush()
    }

    fn lock(&self) -> MutexGuard<'_, OutputState> {
        self.state.lock().expect("output context mutex poisoned")
    }
}

fn parse_status_line(line: &str) -> Option<StatusLine> {
    let rest = line.strip_prefix("HTTP/")?;
    let mut parts = rest.splitn(3, ' ');
    let protocol = parts.next()?.to_string();
    let code = parts.next()?.trim().parse().ok()?;
    let reason = parts.next().map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
    Some(StatusLine {
        protocol,
        code,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_and_append_headers() {
        let (output, _) = OutputContext::capture();
        output.header("X-Test: 1", false);
        output.header("X-Test: 2", false);
        output.header("Content-Type: text/plain", true);
        output.header("x-test: 3", true);

        assert_eq!(output.headers_list(), ["Content-Type: text/plain", "x-test: 3"]);
        output.header_remove();
        assert!(output.headers_list().is_empty());
    }

    #[test]
    fn status_line_sets_code() {
        let (output, sink) = OutputContext::capture();
        assert!(output.header("HTTP/1.0 404 Not Here", true));
        assert_eq!(output.response_code(), 404);

        output.flush().unwrap();
        let head = sink.head().unwrap();
        assert_eq!(head.protocol, "1.0");
        assert_eq!(head.reason, "Not Here");
    }

    #[test]
    fn first_write_commits_head_and_records_origin() {
        let (output, sink) = OutputContext::capture();
        output.header("X-A: 1", false);
        output.write(b"hello").unwrap();
        let line = line!() - 1;

        let origin = output.headers_sent().unwrap();
        assert_eq!(origin.line, line);
        assert!(origin.file.ends_with("output.rs"));
        assert!(!output.header("X-B: 2", false));

        let captured = sink.snapshot();
        assert_eq!(captured.head.unwrap().headers, [("X-A".to_string(), "1".to_string())]);
        assert_eq!(captured.body, b"hello");
    }

    #[test]
    fn buffered_output_does_not_commit() {
        let (output, sink) = OutputContext::capture();
        output.start_buffer();
        output.start_buffer();
        output.write(b"inner").unwrap();
        assert_eq!(output.buffer_level(), 2);

        assert!(output.end_flush_buffer().unwrap());
        assert!(output.headers_sent().is_none());
        assert!(output.end_flush_buffer().unwrap());
        assert!(!output.end_flush_buffer().unwrap());

        assert!(output.headers_sent().is_some());
        assert_eq!(sink.body(), b"inner");
    }

    #[test]
    fn cgi_sink_format() {
        let mut out = Vec::new();
        {
            let mut sink = CgiSink::new(&mut out);
            let head = Head {
                protocol: "1.1".to_string(),
                status: 201,
                reason: "Created".to_string(),
                headers: vec![
                    ("X-Test".to_string(), "1".to_string()),
                    ("X-Test".to_string(), "2".to_string()),
                ],
            };
            sink.write_head(&head).unwrap();
            sink.write_body(b"body").unwrap();
        }
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Status: 201 Created\r\nX-Test: 1\r\nX-Test: 2\r\n\r\nbody"
        );
    }

    #[test]
    fn raw_http_sink_format() {
        let mut sink = RawHttpSink::new(Vec::new());
        let head = Head {
            protocol: "1.1".to_string(),
            status: 204,
            reason: "No Content".to_string(),
            headers: Vec::new(),
        };
        sink.write_head(&head).unwrap();
        assert_eq!(sink.into_inner(), b"HTTP/1.1 204 No Content\r\n\r\n");
    }
}
