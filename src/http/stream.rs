//! Message body streams.
//!
//! # Responsibilities
//! - Define the byte stream contract used by request and response bodies
//! - Provide in-memory, file and reader backed implementations
//! - Share one stream between message copies through a cheap `Body` handle
//!
//! # Design Decisions
//! - Capabilities (`readable`, `writable`, `seekable`) are queried, not assumed;
//!   the emitter decides what to do from them
//! - `eof()` turns true once a read has reached the end of the data
//! - `Body` clones share the same underlying stream, like message bodies in a
//!   request/response pipeline do; the message values themselves stay immutable

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::http::error::StreamError;

const READ_CHUNK: usize = 8192;

/// A readable and optionally seekable/writable source of bytes.
///
/// A `read` that returns no bytes must eventually be followed by `eof()`
/// returning true, otherwise consumers reading until end-of-stream never stop.
pub trait ByteStream: Send {
    /// Total size in bytes when known.
    fn size(&self) -> Option<u64>;

    fn is_readable(&self) -> bool;

    fn is_writable(&self) -> bool;

    fn is_seekable(&self) -> bool;

    /// True when the end of the stream has been reached.
    fn eof(&self) -> bool;

    /// Seek back to the beginning.
    fn rewind(&mut self) -> Result<(), StreamError>;

    /// Read up to `len` bytes.
    fn read(&mut self, len: usize) -> Result<Vec<u8>, StreamError>;

    /// Write bytes at the current position.
    fn write(&mut self, _data: &[u8]) -> Result<usize, StreamError> {
        Err(StreamError::NotWritable)
    }

    /// Read everything from the current position to the end.
    fn contents(&mut self) -> Result<Vec<u8>, StreamError> {
        if !self.is_readable() {
            return Err(StreamError::NotReadable);
        }
        let mut out = Vec::new();
        while !self.eof() {
            let chunk = self.read(READ_CHUNK)?;
            if chunk.is_empty() && self.eof() {
                break;
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

/// Shared handle to a body stream.
#[derive(Clone)]
pub struct Body {
    inner: Arc<Mutex<dyn ByteStream>>,
}

impl Body {
    /// Wrap an arbitrary stream.
    pub fn new<S: ByteStream + 'static>(stream: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(stream)),
        }
    }

    /// An empty, readable, writable, seekable body.
    pub fn empty() -> Self {
        Self::new(MemoryStream::new())
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(MemoryStream::from_bytes(bytes))
    }

    /// A body without any capability: not readable, writable nor seekable.
    pub fn unreadable() -> Self {
        Self::new(UnreadableStream)
    }

    /// Open a file for reading.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StreamError> {
        Ok(Self::new(FileStream::open(path)?))
    }

    /// Wrap a forward-only reader.
    pub fn from_reader<R: Read + Send + 'static>(reader: R, size: Option<u64>) -> Self {
        Self::new(ReaderStream::new(reader, size))
    }

    pub fn size(&self) -> Option<u64> {
        self.lock().size()
    }

    pub fn is_readable(&self) -> bool {
        self.lock().is_readable()
    }

    pub fn is_writable(&self) -> bool {
        self.lock().is_writable()
    }

    pub fn is_seekable(&self) -> bool {
        self.lock().is_seekable()
    }

    pub fn eof(&self) -> bool {
        self.lock().eof()
    }

    pub fn rewind(&self) -> Result<(), StreamError> {
        self.lock().rewind()
    }

    pub fn read(&self, len: usize) -> Result<Vec<u8>, StreamError> {
        self.lock().read(len)
    }

    pub fn write(&self, data: &[u8]) -> Result<usize, StreamError> {
        self.lock().write(data)
    }

    /// Remaining contents from the current position.
    pub fn contents(&self) -> Result<Vec<u8>, StreamError> {
        self.lock().contents()
    }

    /// Whole body from the start, rewinding first when possible.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StreamError> {
        let mut stream = self.lock();
        if stream.is_seekable() {
            stream.rewind()?;
        }
        stream.contents()
    }

    /// Returns true if both handles point at the same stream.
    pub fn ptr_eq(&self, other: &Body) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lock(&self) -> MutexGuard<'_, dyn ByteStream + 'static> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stream = self.lock();
        f.debug_struct("Body")
            .field("size", &stream.size())
            .field("readable", &stream.is_readable())
            .field("seekable", &stream.is_seekable())
            .finish()
    }
}

/// Growable in-memory stream.
#[derive(Debug, Default, Clone)]
pub struct MemoryStream {
    data: Vec<u8>,
    pos: usize,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            data: bytes.into(),
            pos: 0,
        }
    }
}

impl ByteStream for MemoryStream {
    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn is_readable(&self) -> bool {
        true
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn rewind(&mut self) -> Result<(), StreamError> {
        self.pos = 0;
        Ok(())
    }

    fn read(&mut self, len: usize) -> Result<Vec<u8>, StreamError> {
        let end = self.pos.saturating_add(len).min(self.data.len());
        let chunk = self.data[self.pos.min(end)..end].to_vec();
        self.pos = end;
        Ok(chunk)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, StreamError> {
        let end = self.pos + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(data.len())
    }
}

/// Stream with no capabilities, used for bodies that must never be read.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnreadableStream;

impl ByteStream for UnreadableStream {
    fn size(&self) -> Option<u64> {
        None
    }

    fn is_readable(&self) -> bool {
        false
    }

    fn is_writable(&self) -> bool {
        false
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn eof(&self) -> bool {
        false
    }

    fn rewind(&mut self) -> Result<(), StreamError> {
        Err(StreamError::NotSeekable)
    }

    fn read(&mut self, _len: usize) -> Result<Vec<u8>, StreamError> {
        Err(StreamError::NotReadable)
    }
}

/// Read-only stream over a file on disk.
#[derive(Debug)]
pub struct FileStream {
    file: File,
    size: Option<u64>,
    eof: bool,
}

impl FileStream {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StreamError> {
        let file = File::open(path)?;
        let size = file.metadata().ok().map(|m| m.len());
        Ok(Self {
            file,
            size,
            eof: false,
        })
    }
}

impl ByteStream for FileStream {
    fn size(&self) -> Option<u64> {
        self.size
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
        self.eof
    }

    fn rewind(&mut self) -> Result<(), StreamError> {
        self.file.seek(SeekFrom::Start(0))?;
        self.eof = false;
        Ok(())
    }

    fn read(&mut self, len: usize) -> Result<Vec<u8>, StreamError> {
        read_up_to(&mut self.file, len, &mut self.eof)
    }
}

/// Forward-only stream over any reader, e.g. the process standard input.
pub struct ReaderStream<R> {
    reader: R,
    size: Option<u64>,
    eof: bool,
}

impl<R: Read + Send> ReaderStream<R> {
    pub fn new(reader: R, size: Option<u64>) -> Self {
        Self {
            reader,
            size,
            eof: false,
        }
    }
}

impl<R: Read + Send> ByteStream for ReaderStream<R> {
    fn size(&self) -> Option<u64> {
        self.size
    }

    fn is_readable(&self) -> bool {
        true
    }

    fn is_writable(&self) -> bool {
        false
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn eof(&self) -> bool {
        self.eof
    }

    fn rewind(&mut self) -> Result<(), StreamError> {
        Err(StreamError::NotSeekable)
    }

    fn read(&mut self, len: usize) -> Result<Vec<u8>, StreamError> {
        read_up_to(&mut self.reader, len, &mut self.eof)
    }
}

/// Fill up to `len` bytes, marking `eof` when the reader is exhausted.
fn read_up_to<R: Read>(reader: &mut R, len: usize, eof: &mut bool) -> Result<Vec<u8>, StreamError> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                *eof = true;
                break;
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Creates body streams for the request factory and response transforms.
pub trait StreamFactory: Send + Sync {
    /// Stream over the given bytes.
    fn create_stream(&self, content: &[u8]) -> Body;

    /// Stream over a file; fails if the file cannot be opened.
    fn create_stream_from_file(&self, path: &Path) -> Result<Body, StreamError>;

    /// Stream over a forward-only reader.
    fn create_stream_from_reader(&self, reader: Box<dyn Read + Send>, size: Option<u64>) -> Body;
}

/// Stream factory producing the stream types of this module.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStreamFactory;

impl StreamFactory for DefaultStreamFactory {
    fn create_stream(&self, content: &[u8]) -> Body {
        Body::from_bytes(content.to_vec())
    }

    fn create_stream_from_file(&self, path: &Path) -> Result<Body, StreamError> {
        Body::from_file(path)
    }

    fn create_stream_from_reader(&self, reader: Box<dyn Read + Send>, size: Option<u64>) -> Body {
        Body::from_reader(reader, size)
    }
}

/// Copy the remaining stream contents into a writer.
pub(crate) fn copy_to<W: Write>(body: &Body, out: &mut W) -> Result<u64, StreamError> {
    let mut total = 0u64;
    while !body.eof() {
        let chunk = body.read(READ_CHUNK)?;
        out.write_all(&chunk)?;
        total += chunk.len() as u64;
    }
    Ok(total)
}
