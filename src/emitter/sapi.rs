//! Emitter writing to the host output channel.
//!
//! # Responsibilities
//! - Refuse to run once the head was committed by someone else
//! - Decide whether the body may be sent (status, readability, size, probe)
//! - Send headers one line per value, then the status line
//! - Stream the body in chunks of at most `buffer_size` bytes
//!
//! # Design Decisions
//! - Output buffers opened while the body is produced are closed after each
//!   chunk; buffers that existed before `emit` are left alone
//! - Empty chunks only unwind buffers, they never trigger a flush
//! - Non-seekable bodies of unknown size are assumed non-empty; probing them
//!   would consume data

use crate::config::DEFAULT_BUFFER_SIZE;
use crate::emitter::output::OutputContext;
use crate::emitter::{EmitError, Emitter};
use crate::http::response::{is_no_body_status, Response};
use crate::http::stream::Body;
use crate::observability::metrics;

/// Emitter for the host output channel.
#[derive(Debug, Clone)]
pub struct SapiEmitter {
    output: OutputContext,
    buffer_size: usize,
}

impl SapiEmitter {
    /// `buffer_size` defaults to 8 MiB and must be positive.
    pub fn new(output: OutputContext, buffer_size: Option<usize>) -> Result<Self, EmitError> {
        let buffer_size = buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        if buffer_size < 1 {
            return Err(EmitError::InvalidBufferSize(buffer_size));
        }
        Ok(Self {
            output,
            buffer_size,
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn output(&self) -> &OutputContext {
        &self.output
    }

    /// Send headers and the status line.
    pub fn emit_headers(&self, response: &Response) -> Result<(), EmitError> {
        self.ensure_headers_not_sent()?;

        self.output.header_remove();

        let chunked = response.has_header("Transfer-Encoding");
        for (name, values) in response.headers().iter() {
            if chunked && name.eq_ignore_ascii_case("Content-Length") {
                continue;
            }
            for value in values {
                self.output.header(&format!("{name}: {value}"), false);
            }
        }

        // Last, so it decides the final status code.
        self.output.header(
            &format!(
                "HTTP/{} {} {}",
                response.protocol_version(),
                response.status(),
                response.reason_phrase()
            ),
            true,
        );

        tracing::debug!(
            status = response.status(),
            headers = response.headers().len(),
            "Response headers emitted"
        );
        Ok(())
    }

    fn ensure_headers_not_sent(&self) -> Result<(), EmitError> {
        match self.output.headers_sent() {
            Some(origin) => Err(EmitError::HeadersAlreadySent {
                file: origin.file,
                line: origin.line,
            }),
            None => Ok(()),
        }
    }

    fn should_output_body(&self, response: &Response) -> Result<bool, EmitError> {
        if is_no_body_status(response.status()) {
            return Ok(false);
        }

        let body = response.body();
        if !body.is_readable() {
            return Ok(false);
        }

        if let Some(size) = body.size() {
            return Ok(size > 0);
        }

        if body.is_seekable() {
            body.rewind()?;
            let byte = body.read(1)?;
            if byte.is_empty() || body.eof() {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn emit_body(&self, body: &Body, level: usize) -> Result<u64, EmitError> {
        if body.is_seekable() {
            body.rewind()?;
        }

        if let Some(size) = body.size() {
            if size <= self.buffer_size as u64 {
                let content = body.contents()?;
                self.emit_content(&content, level)?;
                return Ok(content.len() as u64);
            }
        }

        let mut total = 0u64;
        let mut chunks = 0usize;
        while !body.eof() {
            let chunk = body.read(self.buffer_size)?;
            self.emit_content(&chunk, level)?;
            total += chunk.len() as u64;
            chunks += 1;
        }
        tracing::debug!(chunks, bytes = total, "Response body streamed");
        Ok(total)
    }

    fn emit_content(&self, content: &[u8], level: usize) -> Result<(), EmitError> {
        if content.is_empty() {
            self.unwind_buffers(level)?;
            return Ok(());
        }

        self.output.write(content)?;
        self.unwind_buffers(level)?;
        self.output.flush()?;
        Ok(())
    }

    fn unwind_buffers(&self, level: usize) -> Result<(), EmitError> {
        while self.output.buffer_level() > level {
            self.output.end_flush_buffer()?;
        }
        Ok(())
    }
}

impl Emitter for SapiEmitter {
    fn emit(&self, response: Response) -> Result<(), EmitError> {
        let level = self.output.buffer_level();
        self.ensure_headers_not_sent()?;

        if !self.should_output_body(&response)? {
            let response = response.without_header("Content-Length");
            return self.emit_headers(&response);
        }

        let mut response = response;
        if !response.has_header("Transfer-Encoding") && !response.has_header("Content-Length") {
            if let Some(size) = response.body().size() {
                response = response.with_header("Content-Length", [size.to_string()])?;
            }
        }

        self.emit_headers(&response)?;

        // Lets the client see status and headers before a delayed body.
        self.output.flush()?;

        let bytes = self.emit_body(response.body(), level)?;
        metrics::record_emitted_bytes(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::output::{CaptureSink, Head};
    use crate::http::error::StreamError;
    use crate::http::stream::{ByteStream, MemoryStream};

    fn setup(buffer_size: Option<usize>) -> (SapiEmitter, OutputContext, CaptureSink) {
        let (output, sink) = OutputContext::capture();
        let emitter = SapiEmitter::new(output.clone(), buffer_size).unwrap();
        (emitter, output, sink)
    }

    fn head(sink: &CaptureSink) -> Head {
        sink.head().expect("head was not committed")
    }

    fn text(sink: &CaptureSink) -> String {
        String::from_utf8(sink.body()).unwrap()
    }

    /// Seekable stream of unknown size.
    struct UnsizedStream(MemoryStream);

    impl ByteStream for UnsizedStream {
        fn size(&self) -> Option<u64> {
            None
        }
        fn is_readable(&self) -> bool {
            true
        }
        fn is_writable(&self) -> bool {
            false
        }
        fn is_seekable(&self) -> bool {
            true
        }
        fn eof(&self) -> bool {
            self.0.eof()
        }
        fn rewind(&mut self) -> Result<(), StreamError> {
            self.0.rewind()
        }
        fn read(&mut self, len: usize) -> Result<Vec<u8>, StreamError> {
            self.0.read(len)
        }
    }

    /// Opens output buffers while being read.
    struct BufferingStream {
        inner: MemoryStream,
        output: OutputContext,
        opens_per_read: usize,
    }

    impl ByteStream for BufferingStream {
        fn size(&self) -> Option<u64> {
            self.inner.size()
        }
        fn is_readable(&self) -> bool {
            true
        }
        fn is_writable(&self) -> bool {
            false
        }
        fn is_seekable(&self) -> bool {
            true
        }
        fn eof(&self) -> bool {
            self.inner.eof()
        }
        fn rewind(&mut self) -> Result<(), StreamError> {
            self.inner.rewind()
        }
        fn read(&mut self, len: usize) -> Result<Vec<u8>, StreamError> {
            for _ in 0..self.opens_per_read {
                self.output.start_buffer();
            }
            self.inner.read(len)
        }
    }

    /// Counts reads that hit the end of data.
    struct CountingStream {
        inner: MemoryStream,
        eof_reads: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl ByteStream for CountingStream {
        fn size(&self) -> Option<u64> {
            self.inner.size()
        }
        fn is_readable(&self) -> bool {
            true
        }
        fn is_writable(&self) -> bool {
            false
        }
        fn is_seekable(&self) -> bool {
            true
        }
        fn eof(&self) -> bool {
            self.inner.eof()
        }
        fn rewind(&mut self) -> Result<(), StreamError> {
            self.inner.rewind()
        }
        fn read(&mut self, len: usize) -> Result<Vec<u8>, StreamError> {
            let chunk = self.inner.read(len)?;
            if self.inner.eof() {
                self.eof_reads.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
            Ok(chunk)
        }
    }

    #[test]
    fn rejects_zero_buffer_size() {
        let (output, _) = OutputContext::capture();
        assert!(matches!(
            SapiEmitter::new(output.clone(), Some(0)),
            Err(EmitError::InvalidBufferSize(0))
        ));
        assert_eq!(SapiEmitter::new(output, None).unwrap().buffer_size(), DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn emits_status_headers_and_body() {
        let (emitter, output, sink) = setup(None);
        let response = Response::ok()
            .with_header("Content-Type", ["text/plain"])
            .unwrap()
            .with_body(Body::from_bytes("Example body"));

        emitter.emit(response).unwrap();

        let head = head(&sink);
        assert_eq!(head.status, 200);
        assert_eq!(head.reason, "OK");
        assert_eq!(head.header("Content-Type"), ["text/plain"]);
        assert_eq!(head.header("Content-Length"), ["12"]);
        assert_eq!(text(&sink), "Example body");
        assert_eq!(output.response_code(), 200);
    }

    #[test]
    fn no_body_statuses_drop_body_and_length() {
        for code in [100, 101, 102, 204, 205, 304] {
            let (emitter, output, sink) = setup(None);
            let response = Response::new(code)
                .unwrap()
                .with_header("Content-Length", ["12"])
                .unwrap()
                .with_body(Body::from_bytes("Example body"));

            emitter.emit(response).unwrap();

            assert!(output.headers_list().is_empty(), "status {code}");
            assert_eq!(output.response_code(), code);
            assert!(sink.body().is_empty(), "status {code}");
            assert_eq!(output.flush_count(), 0);
        }
    }

    #[test]
    fn transfer_encoding_wins_over_length() {
        let (emitter, _, sink) = setup(None);
        let response = Response::ok()
            .with_header("Transfer-Encoding", ["chunked"])
            .unwrap()
            .with_header("Content-Length", ["12"])
            .unwrap()
            .with_body(Body::from_bytes("Example body"));

        emitter.emit(response).unwrap();

        let head = head(&sink);
        assert!(head.header("Content-Length").is_empty());
        assert_eq!(head.header("Transfer-Encoding"), ["chunked"]);
        assert_eq!(text(&sink), "Example body");
    }

    #[test]
    fn explicit_length_is_preserved() {
        let (emitter, _, sink) = setup(None);
        let response = Response::ok()
            .with_header("Content-Length", ["100"])
            .unwrap()
            .with_body(Body::from_bytes("Example body"));

        emitter.emit(response).unwrap();

        assert_eq!(head(&sink).header("content-length"), ["100"]);
        assert_eq!(text(&sink), "Example body");
    }

    #[test]
    fn multi_value_headers_are_separate_lines() {
        let (emitter, _, sink) = setup(None);
        let response = Response::ok()
            .with_added_header("X-Test", "1")
            .unwrap()
            .with_added_header("X-Test", "2")
            .unwrap()
            .with_added_header("X-Test", "3; 3.5")
            .unwrap();

        emitter.emit(response).unwrap();
        emitter.output().flush().unwrap();

        let head = head(&sink);
        let lines: Vec<_> = head.headers.iter().filter(|(n, _)| n == "X-Test").collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(head.header("x-test"), ["1", "2", "3; 3.5"]);
    }

    #[test]
    fn pending_host_headers_are_cleared() {
        let (emitter, output, sink) = setup(None);
        output.header("X-Stale: yes", false);

        emitter.emit(Response::ok().with_header("X-Fresh", ["1"]).unwrap()).unwrap();
        output.flush().unwrap();

        let head = head(&sink);
        assert!(head.header("X-Stale").is_empty());
        assert_eq!(head.header("X-Fresh"), ["1"]);
    }

    #[test]
    fn headers_sent_fails_before_any_output() {
        let (emitter, output, sink) = setup(None);
        output.write(b"early").unwrap();
        let line = line!() - 1;
        let flushes = output.flush_count();

        let response = Response::ok()
            .with_header("X-Test", ["1"])
            .unwrap()
            .with_body(Body::from_bytes("Example body"));
        let err = emitter.emit(response).unwrap_err();

        match err {
            EmitError::HeadersAlreadySent { file, line: at } => {
                assert!(file.ends_with("sapi.rs"));
                assert_eq!(at, line);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sink.body(), b"early");
        assert!(head(&sink).headers.is_empty());
        assert_eq!(output.flush_count(), flushes);
    }

    #[test]
    fn unreadable_and_empty_bodies_are_skipped() {
        for body in [Body::unreadable(), Body::empty()] {
            let (emitter, output, sink) = setup(None);
            let response = Response::ok()
                .with_header("Content-Length", ["5"])
                .unwrap()
                .with_body(body);

            emitter.emit(response).unwrap();

            assert!(output.headers_list().is_empty());
            assert!(sink.body().is_empty());
        }
    }

    #[test]
    fn probes_seekable_bodies_of_unknown_size() {
        let (emitter, output, _) = setup(None);
        let empty = Body::new(UnsizedStream(MemoryStream::new()));
        emitter.emit(Response::ok().with_body(empty)).unwrap();
        assert_eq!(output.flush_count(), 0);

        let (emitter, _, sink) = setup(None);
        let content = Body::new(UnsizedStream(MemoryStream::from_bytes("probe me")));
        emitter.emit(Response::ok().with_body(content)).unwrap();
        assert_eq!(text(&sink), "probe me");
        assert!(head(&sink).header("Content-Length").is_empty());
    }

    #[test]
    fn non_seekable_unknown_size_is_assumed_present() {
        let (emitter, _, sink) = setup(Some(4));
        let body = Body::from_reader(std::io::Cursor::new(b"streamed body".to_vec()), None);

        emitter.emit(Response::ok().with_body(body)).unwrap();

        assert_eq!(text(&sink), "streamed body");
        assert!(head(&sink).header("Content-Length").is_empty());
    }

    #[test]
    fn large_bodies_are_chunked() {
        let content: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let eof_reads = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let body = Body::new(CountingStream {
            inner: MemoryStream::from_bytes(content.clone()),
            eof_reads: eof_reads.clone(),
        });
        let (emitter, output, sink) = setup(Some(64));

        emitter.emit(Response::ok().with_body(body)).unwrap();

        assert_eq!(sink.body(), content);
        assert_eq!(head(&sink).header("Content-Length"), ["1000"]);
        assert_eq!(eof_reads.load(std::sync::atomic::Ordering::SeqCst), 1);
        // One flush after headers plus one per non-empty chunk.
        assert_eq!(output.flush_count(), 1 + 1000usize.div_ceil(64));
    }

    #[test]
    fn buffer_depth_is_restored() {
        let (emitter, output, sink) = setup(Some(3));
        output.start_buffer();
        output.start_buffer();

        let body = Body::new(BufferingStream {
            inner: MemoryStream::from_bytes("nested buffers"),
            output: output.clone(),
            opens_per_read: 2,
        });

        emitter.emit(Response::ok().with_body(body)).unwrap();
        assert_eq!(output.buffer_level(), 2);

        // Pre-existing buffers still hold the body until they are closed.
        assert!(sink.body().is_empty());
        output.finish().unwrap();
        assert_eq!(text(&sink), "nested buffers");
        assert_eq!(output.buffer_level(), 0);
    }

    #[test]
    fn buffers_opened_for_single_chunk_are_closed() {
        let (emitter, output, sink) = setup(None);
        let body = Body::new(BufferingStream {
            inner: MemoryStream::from_bytes("Example body"),
            output: output.clone(),
            opens_per_read: 3,
        });

        emitter.emit(Response::ok().with_body(body)).unwrap();

        assert_eq!(output.buffer_level(), 0);
        assert_eq!(text(&sink), "Example body");
    }

    #[test]
    fn status_line_uses_protocol_and_reason() {
        let (emitter, _, sink) = setup(None);
        let response = Response::ok()
            .with_status(404, "Nothing Here")
            .unwrap()
            .with_protocol_version("1.0");

        emitter.emit(response).unwrap();
        emitter.output().flush().unwrap();

        let head = head(&sink);
        assert_eq!(head.protocol, "1.0");
        assert_eq!(head.status, 404);
        assert_eq!(head.reason, "Nothing Here");
    }
}
