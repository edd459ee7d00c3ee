//! Contracts for the collaborators the server talks to: where sources come
//! from, where content lives and how the index is queried.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use companion_protocol::{ContentDescriptor, Query, SourceListing};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// Maps a content URI to the URI it should resolve to.
pub type LinkTable = HashMap<String, String>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("no such source: {0}")]
    NoSuchSource(String),
    #[error("no content {content_id} in {source_id}")]
    NoSuchContent {
        source_id: String,
        content_id: String,
    },
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// The source's index could not answer. Searches skip the source.
    #[error("index for {source_id} is unusable: {message}")]
    ContentDefect { source_id: String, message: String },
    #[error("invalid query arguments: {0}")]
    InvalidArguments(String),
    #[error("query cancelled")]
    Cancelled,
}

enum BlobReader {
    Memory(Bytes),
    File(tokio::fs::File),
    Stream(Pin<Box<dyn AsyncRead + Send>>),
}

/// Readable payload of a content item with a known size.
pub struct ContentBlob {
    size: u64,
    reader: BlobReader,
}

impl std::fmt::Debug for ContentBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.reader {
            BlobReader::Memory(_) => "memory",
            BlobReader::File(_) => "file",
            BlobReader::Stream(_) => "stream",
        };
        f.debug_struct("ContentBlob")
            .field("size", &self.size)
            .field("kind", &kind)
            .finish()
    }
}

impl ContentBlob {
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            size: bytes.len() as u64,
            reader: BlobReader::Memory(bytes),
        }
    }

    pub fn from_file(file: tokio::fs::File, size: u64) -> Self {
        Self {
            size,
            reader: BlobReader::File(file),
        }
    }

    pub fn from_reader<R>(reader: R, size: u64) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            size,
            reader: BlobReader::Stream(Box::pin(reader)),
        }
    }

    /// Open a file and take its size from the filesystem.
    pub async fn open(path: &std::path::Path) -> std::io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok(Self::from_file(file, size))
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read the whole payload into memory.
    pub async fn read_all(self) -> std::io::Result<Bytes> {
        let mut buf = Vec::with_capacity(self.size as usize);
        match self.reader {
            BlobReader::Memory(bytes) => return Ok(bytes),
            BlobReader::File(mut file) => {
                file.read_to_end(&mut buf).await?;
            }
            BlobReader::Stream(mut reader) => {
                reader.read_to_end(&mut buf).await?;
            }
        }
        Ok(Bytes::from(buf))
    }

    /// Position the reader at `offset` and return a stream of at most `len`
    /// bytes from there. Files seek, other readers discard the prefix.
    pub async fn into_window(
        self,
        offset: u64,
        len: u64,
    ) -> std::io::Result<ReaderStream<Pin<Box<dyn AsyncRead + Send>>>> {
        let reader: Pin<Box<dyn AsyncRead + Send>> = match self.reader {
            BlobReader::Memory(bytes) => {
                let start = (offset as usize).min(bytes.len());
                let end = start.saturating_add(len as usize).min(bytes.len());
                Box::pin(std::io::Cursor::new(bytes.slice(start..end)))
            }
            BlobReader::File(mut file) => {
                if offset > 0 {
                    file.seek(SeekFrom::Start(offset)).await?;
                }
                Box::pin(file.take(len))
            }
            BlobReader::Stream(mut reader) => {
                if offset > 0 {
                    let mut prefix = (&mut reader).take(offset);
                    let skipped = tokio::io::copy(&mut prefix, &mut tokio::io::sink()).await?;
                    if skipped < offset {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "content ended before range start",
                        ));
                    }
                }
                Box::pin(reader.take(len))
            }
        };
        Ok(ReaderStream::new(reader))
    }
}

/// Metadata and payload for one content item.
#[derive(Debug)]
pub struct ContentRecord {
    pub metadata: Bytes,
    pub data: ContentBlob,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn lookup(&self, source_id: &str, content_id: &str) -> Result<ContentRecord, LookupError>;

    /// Link tables in precedence order. Missing tables are an empty list.
    async fn link_tables(&self, source_id: &str) -> Result<Vec<LinkTable>, LookupError>;
}

#[async_trait]
pub trait QueryService: Send + Sync {
    async fn query(
        &self,
        source: &SourceListing,
        query: &Query,
    ) -> Result<Vec<ContentDescriptor>, QueryError>;
}

#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(&self, source_id: &str) -> Result<SourceListing, LookupError>;

    /// Every installed source, in a stable order.
    async fn list(&self) -> Result<Vec<SourceListing>, LookupError>;

    async fn runtime_version(&self, _source_id: &str) -> Result<Option<u32>, LookupError> {
        Ok(None)
    }

    async fn icon(&self, icon_ref: &str) -> Result<Bytes, LookupError>;

    /// Drop anything remembered about installed sources.
    fn invalidate(&self) {}
}
