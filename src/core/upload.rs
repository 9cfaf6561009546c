//! Sequential sources of uploaded file contents for batch synchronization

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::io::Cursor;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Readable content of one uploaded file
pub type UploadReader = Box<dyn AsyncRead + Send + Unpin>;

/// Yields `(path, content)` pairs in the order the client sent them.
///
/// `Ok(None)` marks the end of the sequence, an `Err` is a failure of that
/// single item. Readers are closed by dropping them, whatever the outcome.
#[async_trait]
pub trait UploadSource: Send {
    async fn next_file(&mut self) -> Result<Option<(String, UploadReader)>>;
}

/// Upload source over in-memory buffers
#[derive(Debug, Default)]
pub struct MemoryUploads {
    files: VecDeque<(String, Bytes)>,
}

impl MemoryUploads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, path: &str, data: impl Into<Bytes>) -> Self {
        self.files.push_back((path.to_string(), data.into()));
        self
    }
}

#[async_trait]
impl UploadSource for MemoryUploads {
    async fn next_file(&mut self) -> Result<Option<(String, UploadReader)>> {
        Ok(self
            .files
            .pop_front()
            .map(|(path, data)| (path, Box::new(Cursor::new(data)) as UploadReader)))
    }
}

type UploadStream = Pin<Box<dyn Stream<Item = Result<(String, UploadReader)>> + Send>>;

/// Upload source backed by a stream, e.g. parts of a multipart request body
pub struct StreamUploads {
    inner: UploadStream,
}

impl StreamUploads {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<(String, UploadReader)>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }
}

#[async_trait]
impl UploadSource for StreamUploads {
    async fn next_file(&mut self) -> Result<Option<(String, UploadReader)>> {
        self.inner.next().await.transpose()
    }
}
