use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::{future::BoxFuture, stream::BoxStream, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
};

use crate::model::error::StorageError;

pub type UploadTask = BoxFuture<'static, Result<u64, StorageError>>;
pub type ChunkStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// Payload handed to an object service for upload.
pub enum UploadSource {
    Bytes(Bytes),
    Reader(Pin<Box<dyn AsyncRead + Send>>),
}

impl UploadSource {
    pub fn reader(reader: impl AsyncRead + Send + 'static) -> Self {
        UploadSource::Reader(Box::pin(reader))
    }

    /// Drains the source into memory.
    pub async fn into_bytes(self) -> std::io::Result<Bytes> {
        match self {
            UploadSource::Bytes(bytes) => Ok(bytes),
            UploadSource::Reader(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl From<Vec<u8>> for UploadSource {
    fn from(bytes: Vec<u8>) -> Self {
        UploadSource::Bytes(Bytes::from(bytes))
    }
}

impl From<Bytes> for UploadSource {
    fn from(bytes: Bytes) -> Self {
        UploadSource::Bytes(bytes)
    }
}

/// An upload session. Nothing is sent until `start` is awaited.
pub struct Upload {
    key: String,
    task: Option<UploadTask>,
    bytes_sent: u64,
    completed: bool,
    failed: bool,
    error_message: Option<String>,
}

impl Upload {
    pub fn new(key: &str, task: UploadTask) -> Self {
        Self {
            key: key.to_string(),
            task: Some(task),
            bytes_sent: 0,
            completed: false,
            failed: false,
            error_message: None,
        }
    }

    pub async fn start(&mut self) -> Result<(), StorageError> {
        let task = self
            .task
            .take()
            .ok_or_else(|| StorageError::Other(format!("upload of {} already started", self.key)))?;

        match task.await {
            Ok(sent) => {
                self.bytes_sent = sent;
                self.completed = true;
                Ok(())
            }
            Err(err) => {
                self.failed = true;
                self.error_message = Some(err.to_string());
                Err(err)
            }
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

/// Notification sent to download subscribers each time a chunk arrives.
///
/// `chunk` holds the bytes `[offset, bytes_received)` of the object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadProgress {
    pub offset: u64,
    pub bytes_received: u64,
    pub chunk: Bytes,
}

/// A download session. The object is streamed into an in-memory buffer while
/// `start` is awaited; subscribers observe each chunk as it lands.
pub struct Download {
    key: String,
    source: Option<ChunkStream>,
    buffer: BytesMut,
    subscribers: Vec<mpsc::UnboundedSender<DownloadProgress>>,
    completed: bool,
    failed: bool,
    error: Option<StorageError>,
}

impl Download {
    pub fn new(key: &str, source: ChunkStream) -> Self {
        Self {
            key: key.to_string(),
            source: Some(source),
            buffer: BytesMut::new(),
            subscribers: Vec::new(),
            completed: false,
            failed: false,
            error: None,
        }
    }

    /// Registers a progress listener. The channel closes once the download settles.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<DownloadProgress> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub async fn start(&mut self) -> Result<(), StorageError> {
        let mut source = self
            .source
            .take()
            .ok_or_else(|| StorageError::Other(format!("download of {} already started", self.key)))?;

        let result = loop {
            match source.next().await {
                Some(Ok(chunk)) => {
                    let offset = self.buffer.len() as u64;
                    self.buffer.extend_from_slice(&chunk);
                    let progress = DownloadProgress {
                        offset,
                        bytes_received: self.buffer.len() as u64,
                        chunk,
                    };
                    // A dropped receiver only means that listener lost interest.
                    self.subscribers
                        .retain(|tx| tx.send(progress.clone()).is_ok());
                }
                Some(Err(err)) => break Err(err),
                None => break Ok(()),
            }
        };

        self.subscribers.clear();
        match result {
            Ok(()) => {
                self.completed = true;
                Ok(())
            }
            Err(err) => {
                self.failed = true;
                self.error = Some(err.clone());
                Err(err)
            }
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn bytes_received(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn downloaded_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn error(&self) -> Option<&StorageError> {
        self.error.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(StorageError::message)
    }

    pub fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }
}

/// Ways a progress notification can contradict the ones before it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressViolation {
    Regression { prior: u64, received: u64 },
    Gap { prior: u64, offset: u64 },
    Inconsistent { offset: u64, len: usize, received: u64 },
}

impl std::fmt::Display for ProgressViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressViolation::Regression { prior, received } => write!(
                f,
                "progress went backwards from {} to {} bytes",
                prior, received
            ),
            ProgressViolation::Gap { prior, offset } => write!(
                f,
                "progress skipped bytes {} to {}",
                prior, offset
            ),
            ProgressViolation::Inconsistent { offset, len, received } => write!(
                f,
                "chunk of {} bytes at offset {} does not end at {}",
                len, offset, received
            ),
        }
    }
}

/// Folds one notification into the write position of an incremental download.
///
/// Returns the new write position and the bytes in `[prior, new)` that still
/// have to be written. Bytes before `prior` that the chunk repeats are dropped.
pub fn advance(prior: u64, progress: &DownloadProgress) -> Result<(u64, Bytes), ProgressViolation> {
    let received = progress.bytes_received;
    if received < prior {
        return Err(ProgressViolation::Regression { prior, received });
    }
    if progress.offset > prior {
        return Err(ProgressViolation::Gap {
            prior,
            offset: progress.offset,
        });
    }
    if progress.offset + progress.chunk.len() as u64 != received {
        return Err(ProgressViolation::Inconsistent {
            offset: progress.offset,
            len: progress.chunk.len(),
            received,
        });
    }

    let skip = (prior - progress.offset) as usize;
    Ok((received, progress.chunk.slice(skip..)))
}
