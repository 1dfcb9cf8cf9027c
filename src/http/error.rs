//! Error types for HTTP messages, streams and request construction.

use thiserror::Error;

/// Errors raised while building or transforming a message value.
#[derive(Debug, Error)]
pub enum MessageError {
    /// Status code outside of 100..=599.
    #[error("invalid HTTP status code {0}; must be an integer between 100 and 599")]
    InvalidStatus(u16),

    /// Header name is empty or contains characters outside of the token set.
    #[error("invalid header name {0:?}")]
    InvalidHeaderName(String),

    /// Header value contains a line break.
    #[error("invalid value for header {name:?}")]
    InvalidHeaderValue { name: String },
}

/// Errors raised by body streams.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Underlying I/O failure.
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream does not support reading.
    #[error("stream is not readable")]
    NotReadable,

    /// The stream does not support writing.
    #[error("stream is not writable")]
    NotWritable,

    /// The stream does not support seeking.
    #[error("stream is not seekable")]
    NotSeekable,

    /// The stream was moved away and can no longer be used.
    #[error("stream is detached")]
    Detached,

    /// The upload failed, so there is no content to move.
    #[error("cannot retrieve stream of a failed upload (code {0})")]
    UploadFailed(u8),
}

/// Errors raised while building a server request from host data.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The host did not report a request method.
    #[error("Unable to determine HTTP request method.")]
    MissingMethod,

    /// The body source cannot be turned into a stream.
    #[error("invalid body source: {0}")]
    InvalidBodySource(String),

    /// `HTTP_HOST` carries a port that does not fit in 16 bits.
    #[error("Invalid port: {0}. Must be between 0 and 65535.")]
    InvalidPort(String),

    /// Upload metadata arrays do not line up.
    #[error("malformed uploaded file entry {0:?}")]
    MalformedUpload(String),

    /// The request body could not be parsed.
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}
