//! Uploaded file descriptors and the nested upload tree.
//!
//! # Responsibilities
//! - Describe one submitted file (client name, media type, size, status, content)
//! - Mirror the nesting of upload field names (`avatar`, `docs[]`, `a[b][c]`)
//! - Build the tree from the host's parallel metadata arrays
//!
//! # Design Decisions
//! - Nesting is a tagged variant (`Nested::Leaf` / `Nested::Map`) walked recursively
//! - The temp file is opened on the first `stream`/`move_to`, not while the
//!   tree is built; one that cannot be opened yields an empty stream, so
//!   descriptors of failed uploads are always constructible
//! - `move_to` may succeed once per descriptor; clones share the "moved" state

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::http::error::{RequestError, StreamError};
use crate::http::stream::{copy_to, Body, StreamFactory};

/// Upload status codes reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadError {
    Ok,
    IniSize,
    FormSize,
    Partial,
    NoFile,
    NoTmpDir,
    CantWrite,
    Extension,
}

impl UploadError {
    /// Map a numeric status code. Unknown codes are `None`.
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => Self::Ok,
            1 => Self::IniSize,
            2 => Self::FormSize,
            3 => Self::Partial,
            4 => Self::NoFile,
            6 => Self::NoTmpDir,
            7 => Self::CantWrite,
            8 => Self::Extension,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::IniSize => 1,
            Self::FormSize => 2,
            Self::Partial => 3,
            Self::NoFile => 4,
            Self::NoTmpDir => 6,
            Self::CantWrite => 7,
            Self::Extension => 8,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::Ok => "There is no error, the file uploaded with success.",
            Self::IniSize => "The uploaded file exceeds the upload_max_filesize directive.",
            Self::FormSize => "The uploaded file exceeds the MAX_FILE_SIZE directive of the form.",
            Self::Partial => "The uploaded file was only partially uploaded.",
            Self::NoFile => "No file was uploaded.",
            Self::NoTmpDir => "Missing a temporary folder.",
            Self::CantWrite => "Failed to write file to disk.",
            Self::Extension => "A server extension stopped the file upload.",
        }
    }
}

#[derive(Clone)]
enum Content {
    Ready(Body),
    TempFile {
        path: PathBuf,
        streams: Arc<dyn StreamFactory>,
        opened: Arc<OnceLock<Body>>,
    },
}

impl Content {
    fn body(&self) -> Body {
        match self {
            Content::Ready(body) => body.clone(),
            Content::TempFile { path, streams, opened } => opened
                .get_or_init(|| match streams.create_stream_from_file(path) {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::debug!(
                            path = %path.display(),
                            error = %e,
                            "Upload temp file unavailable, using empty stream"
                        );
                        streams.create_stream(b"")
                    }
                })
                .clone(),
        }
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Ready(body) => f.debug_tuple("Ready").field(body).finish(),
            Content::TempFile { path, opened, .. } => f
                .debug_struct("TempFile")
                .field("path", path)
                .field("opened", &opened.get().is_some())
                .finish(),
        }
    }
}

/// One submitted file.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    client_filename: Option<String>,
    client_media_type: Option<String>,
    size: Option<u64>,
    error: UploadError,
    content: Content,
    moved: Arc<AtomicBool>,
}

impl UploadedFile {
    pub fn new(
        stream: Body,
        size: Option<u64>,
        error: UploadError,
        client_filename: Option<String>,
        client_media_type: Option<String>,
    ) -> Self {
        Self::with_content(Content::Ready(stream), size, error, client_filename, client_media_type)
    }

    /// Descriptor whose content is read from `path` when first used.
    pub fn from_temp_file(
        path: impl Into<PathBuf>,
        streams: Arc<dyn StreamFactory>,
        size: Option<u64>,
        error: UploadError,
        client_filename: Option<String>,
        client_media_type: Option<String>,
    ) -> Self {
        let content = Content::TempFile {
            path: path.into(),
            streams,
            opened: Arc::new(OnceLock::new()),
        };
        Self::with_content(content, size, error, client_filename, client_media_type)
    }

    fn with_content(
        content: Content,
        size: Option<u64>,
        error: UploadError,
        client_filename: Option<String>,
        client_media_type: Option<String>,
    ) -> Self {
        Self {
            client_filename,
            client_media_type,
            size,
            error,
            content,
            moved: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn client_filename(&self) -> Option<&str> {
        self.client_filename.as_deref()
    }

    pub fn client_media_type(&self) -> Option<&str> {
        self.client_media_type.as_deref()
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn error(&self) -> UploadError {
        self.error
    }

    /// Content stream. Fails for failed uploads and after `move_to`.
    pub fn stream(&self) -> Result<Body, StreamError> {
        self.ensure_movable()?;
        Ok(self.content.body())
    }

    /// Copy the content to `target`. Allowed once.
    pub fn move_to(&self, target: impl AsRef<Path>) -> Result<u64, StreamError> {
        self.ensure_movable()?;
        if self.moved.swap(true, Ordering::SeqCst) {
            return Err(StreamError::Detached);
        }

        let body = self.content.body();
        let mut out = File::create(target.as_ref())?;
        if body.is_seekable() {
            body.rewind()?;
        }
        let written = copy_to(&body, &mut out)?;
        tracing::debug!(
            target = %target.as_ref().display(),
            bytes = written,
            "Uploaded file moved"
        );
        Ok(written)
    }

    fn ensure_movable(&self) -> Result<(), StreamError> {
        if !self.error.is_ok() {
            return Err(StreamError::UploadFailed(self.error.code()));
        }
        if self.moved.load(Ordering::SeqCst) {
            return Err(StreamError::Detached);
        }
        Ok(())
    }
}

/// A value or a keyed group of nested values.
#[derive(Debug, Clone, PartialEq)]
pub enum Nested<T> {
    Leaf(T),
    Map(Vec<(String, Nested<T>)>),
}

impl<T> Nested<T> {
    /// Child of a map node by key.
    pub fn get(&self, key: &str) -> Option<&Nested<T>> {
        match self {
            Nested::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            Nested::Leaf(_) => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&T> {
        match self {
            Nested::Leaf(value) => Some(value),
            Nested::Map(_) => None,
        }
    }

    /// Number of leaves below this node.
    pub fn leaf_count(&self) -> usize {
        match self {
            Nested::Leaf(_) => 1,
            Nested::Map(entries) => entries.iter().map(|(_, v)| v.leaf_count()).sum(),
        }
    }
}

/// Host upload metadata for one top-level field, as parallel trees.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFileField {
    pub name: Nested<String>,
    pub tmp_name: Nested<String>,
    pub media_type: Nested<String>,
    pub size: Nested<u64>,
    pub error: Nested<i64>,
}

impl RawFileField {
    /// Metadata of a single, non-grouped upload.
    pub fn single(name: &str, tmp_name: &str, media_type: &str, size: u64, error: i64) -> Self {
        Self {
            name: Nested::Leaf(name.to_string()),
            tmp_name: Nested::Leaf(tmp_name.to_string()),
            media_type: Nested::Leaf(media_type.to_string()),
            size: Nested::Leaf(size),
            error: Nested::Leaf(error),
        }
    }
}

/// Uploaded files keyed by top-level field name.
pub type UploadedFiles = Vec<(String, Nested<UploadedFile>)>;

/// Build the uploaded file tree from host metadata.
pub fn build_uploaded_files(
    fields: &[(String, RawFileField)],
    streams: &Arc<dyn StreamFactory>,
) -> Result<UploadedFiles, RequestError> {
    fields
        .iter()
        .map(|(field, raw)| {
            let node = populate(
                field,
                &raw.name,
                &raw.tmp_name,
                &raw.media_type,
                &raw.size,
                &raw.error,
                streams,
            )?;
            Ok((field.clone(), node))
        })
        .collect()
}

fn populate(
    path: &str,
    names: &Nested<String>,
    tmp_names: &Nested<String>,
    types: &Nested<String>,
    sizes: &Nested<u64>,
    errors: &Nested<i64>,
    streams: &Arc<dyn StreamFactory>,
) -> Result<Nested<UploadedFile>, RequestError> {
    match names {
        Nested::Map(entries) => {
            let mut out = Vec::with_capacity(entries.len());
            for (key, name) in entries {
                let child_path = format!("{path}[{key}]");
                let node = populate(
                    &child_path,
                    name,
                    child(tmp_names, key, &child_path)?,
                    child(types, key, &child_path)?,
                    child(sizes, key, &child_path)?,
                    child(errors, key, &child_path)?,
                    streams,
                )?;
                out.push((key.clone(), node));
            }
            Ok(Nested::Map(out))
        }
        Nested::Leaf(name) => {
            let malformed = || RequestError::MalformedUpload(path.to_string());
            let tmp_name = tmp_names.as_leaf().ok_or_else(malformed)?;
            let media_type = types.as_leaf().ok_or_else(malformed)?;
            let size = *sizes.as_leaf().ok_or_else(malformed)?;
            let code = *errors.as_leaf().ok_or_else(malformed)?;

            let error = UploadError::from_code(code).ok_or_else(malformed)?;

            Ok(Nested::Leaf(UploadedFile::from_temp_file(
                tmp_name,
                Arc::clone(streams),
                Some(size),
                error,
                Some(name.clone()),
                Some(media_type.clone()),
            )))
        }
    }
}

fn child<'a, T>(node: &'a Nested<T>, key: &str, path: &str) -> Result<&'a Nested<T>, RequestError> {
    node.get(key)
        .ok_or_else(|| RequestError::MalformedUpload(path.to_string()))
}
