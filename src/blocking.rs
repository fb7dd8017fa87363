//! Blocking entry points for callers that cannot await.
//!
//! Each call drives the matching [`Tardigrade`] operation to completion on a
//! runtime owned by the facade. Only the connection test is bounded by a timeout.
//! Blocking sources are read in chunks so a cancelled put stops reading promptly.

use std::{
    io::{ErrorKind, Read, Write},
    path::Path,
    time::Duration,
};

use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{span, warn, Level};

use crate::{
    adapters::Connector,
    backend::Tardigrade,
    config::Config,
    model::{
        entry::RemoteEntry,
        error::{Error, Result},
        transfer::UploadSource,
    },
    util::poll::{self, BlockingWriter},
};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);
const READ_CHUNK_SIZE: usize = 64 * 1024;

pub struct BlockingTardigrade {
    runtime: Runtime,
    inner: Tardigrade,
    test_timeout: Duration,
}

impl BlockingTardigrade {
    /// Must not be called from within an async runtime.
    pub fn connect(config: &Config, connector: &dyn Connector) -> Result<Self> {
        let runtime = poll::blocking_runtime()?;
        let inner = poll::block_until_ready(&runtime, Tardigrade::connect(config, connector))?;

        Ok(Self {
            runtime,
            inner,
            test_timeout: TEST_TIMEOUT,
        })
    }

    /// Overrides the [`TEST_TIMEOUT`] bound on [`BlockingTardigrade::test`].
    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self
    }

    pub fn inner(&self) -> &Tardigrade {
        &self.inner
    }

    pub fn create_folder(&self) -> Result<()> {
        self.inner.create_folder()
    }

    pub fn list(&self) -> Result<Vec<RemoteEntry>> {
        let span = span!(Level::INFO, "list", bucket = self.inner.bucket_name());
        let _e = span.enter();

        poll::block_until_ready(&self.runtime, self.inner.list())
    }

    pub fn get(&self, name: &str, path: impl AsRef<Path>) -> Result<()> {
        let span = span!(Level::INFO, "get", file = name);
        let _e = span.enter();

        poll::block_until_ready(&self.runtime, self.inner.get(name, path))
    }

    pub fn get_stream(&self, name: &str, dest: &mut dyn Write) -> Result<u64> {
        let span = span!(Level::INFO, "get_stream", file = name);
        let _e = span.enter();

        let mut writer = BlockingWriter(dest);
        poll::block_until_ready(&self.runtime, self.inner.get_stream(name, &mut writer))
    }

    pub fn put(&self, name: &str, source: &mut dyn Read, cancel: &CancellationToken) -> Result<()> {
        let span = span!(Level::INFO, "put", file = name);
        let _e = span.enter();

        let buf = read_source(name, source, cancel)?;
        poll::block_until_ready(&self.runtime, self.inner.put(name, UploadSource::from(buf), cancel))
    }

    pub fn put_file(&self, name: &str, path: impl AsRef<Path>, cancel: &CancellationToken) -> Result<()> {
        let span = span!(Level::INFO, "put_file", file = name);
        let _e = span.enter();

        poll::block_until_ready(&self.runtime, self.inner.put_file(name, path, cancel))
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let span = span!(Level::INFO, "delete", file = name);
        let _e = span.enter();

        poll::block_until_ready(&self.runtime, self.inner.delete(name))
    }

    /// Fails with `Connectivity` if the test does not finish within the
    /// test timeout, [`TEST_TIMEOUT`] unless overridden.
    pub fn test(&self) -> Result<()> {
        let span = span!(Level::INFO, "test", bucket = self.inner.bucket_name());
        let _e = span.enter();

        poll::block_until_ready_timeout(&self.runtime, self.inner.test(), self.test_timeout).unwrap_or_else(
            || {
                warn!(timeout = ?self.test_timeout, "connection test timed out");
                Err(Error::Connectivity(format!(
                    "no response within {:?}",
                    self.test_timeout
                )))
            },
        )
    }

    pub fn dispose(&mut self) {
        self.inner.dispose();
    }
}

/// Reads `source` to the end, giving up between chunks once `cancel` fires.
fn read_source(name: &str, source: &mut dyn Read, cancel: &CancellationToken) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        if cancel.is_cancelled() {
            warn!(file = name, bytes_read = buf.len(), "upload cancelled while reading source");
            return Err(Error::Cancelled(name.to_string()));
        }

        match source.read(&mut chunk) {
            Ok(0) => return Ok(buf),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Instant,
    };

    use futures::{
        future::{self, BoxFuture},
        FutureExt,
    };

    use super::*;
    use crate::{
        access::Access,
        adapters::{mock::MemoryClient, BucketService, ObjectService, Services},
        model::{entry::Bucket, error::StorageError},
    };

    /// Endless source that counts the bytes handed out and can cancel a
    /// token once a limit has been read.
    struct CountingReader {
        read: Arc<AtomicUsize>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl Read for CountingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            buf.fill(7);
            let total = self.read.fetch_add(buf.len(), Ordering::SeqCst) + buf.len();
            if let Some((limit, cancel)) = &self.cancel_after {
                if total >= *limit {
                    cancel.cancel();
                }
            }
            Ok(buf.len())
        }
    }

    /// Connector whose bucket lookups never settle.
    struct Stalled {
        inner: MemoryClient,
    }

    impl BucketService for Stalled {
        fn ensure_bucket<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, std::result::Result<Bucket, StorageError>> {
            future::pending().boxed()
        }
    }

    impl Connector for Stalled {
        fn connect<'a>(&'a self, _access: &'a Access) -> BoxFuture<'a, std::result::Result<Services, StorageError>> {
            let services = Services {
                buckets: Arc::new(Stalled {
                    inner: self.inner.clone(),
                }),
                objects: Arc::new(self.inner.clone()) as Arc<dyn ObjectService>,
            };
            future::ready(Ok(services)).boxed()
        }
    }

    fn connect(client: &MemoryClient) -> BlockingTardigrade {
        let config = Config {
            satellite: Some("europe-west-1.tardigrade.io:7777".into()),
            folder: Some("backup".into()),
            ..Config::default()
        };
        BlockingTardigrade::connect(&config, client).unwrap()
    }

    #[test]
    fn test_blocking_round_trip() {
        let client = MemoryClient::new().with_chunk_size(3);
        let backend = connect(&client);
        let cancel = CancellationToken::new();

        backend.create_folder().unwrap();
        backend
            .put("a.txt", &mut &b"hello world"[..], &cancel)
            .unwrap();

        let mut out: Vec<u8> = Vec::new();
        assert_eq!(backend.get_stream("a.txt", &mut out).unwrap(), 11);
        assert_eq!(out, b"hello world");

        let entries = backend.list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[0].size, 11);

        backend.delete("a.txt").unwrap();
        assert!(backend.list().unwrap().is_empty());
    }

    #[test]
    fn test_blocking_files() {
        let client = MemoryClient::new();
        let backend = connect(&client);
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in");
        let dest = dir.path().join("out");
        std::fs::write(&src, b"volume").unwrap();

        backend
            .put_file("v.zip", &src, &CancellationToken::new())
            .unwrap();
        backend.get("v.zip", &dest).unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"volume");
    }

    #[test]
    fn test_blocking_errors() {
        let client = MemoryClient::new();
        let backend = connect(&client);

        assert!(matches!(
            backend.delete("missing.txt"),
            Err(Error::FileMissing { .. })
        ));

        client.set_fault(Some(StorageError::Unavailable("offline".into())));
        assert!(matches!(backend.test(), Err(Error::Connectivity(_))));
        assert!(matches!(backend.list(), Err(Error::Unavailable(_))));
    }

    #[test]
    fn test_blocking_connection_test() {
        let client = MemoryClient::new();
        let backend = connect(&client);

        backend.test().unwrap();
    }

    #[test]
    fn test_blocking_put_cancelled_before_reading() {
        let client = MemoryClient::new();
        let backend = connect(&client);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let read = Arc::new(AtomicUsize::new(0));
        let mut source = CountingReader {
            read: read.clone(),
            cancel_after: None,
        };

        assert!(matches!(
            backend.put("x", &mut source, &cancel),
            Err(Error::Cancelled(name)) if name == "x"
        ));
        assert_eq!(read.load(Ordering::SeqCst), 0);
        assert_eq!(client.object("duplicati", "backup/x"), None);
    }

    #[test]
    fn test_blocking_put_cancelled_while_reading() {
        let client = MemoryClient::new();
        let backend = connect(&client);
        let cancel = CancellationToken::new();

        let read = Arc::new(AtomicUsize::new(0));
        let mut source = CountingReader {
            read: read.clone(),
            cancel_after: Some((3 * READ_CHUNK_SIZE, cancel.clone())),
        };

        assert!(matches!(
            backend.put("x", &mut source, &cancel),
            Err(Error::Cancelled(_))
        ));
        assert_eq!(read.load(Ordering::SeqCst), 3 * READ_CHUNK_SIZE);
        assert_eq!(client.object("duplicati", "backup/x"), None);
    }

    #[test]
    fn test_blocking_connection_test_times_out() {
        let stalled = Stalled {
            inner: MemoryClient::new(),
        };
        let config = Config {
            satellite: Some("europe-west-1.tardigrade.io:7777".into()),
            ..Config::default()
        };
        let backend = BlockingTardigrade::connect(&config, &stalled)
            .unwrap()
            .with_test_timeout(Duration::from_millis(50));

        let started = Instant::now();
        assert!(matches!(backend.test(), Err(Error::Connectivity(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_default_test_timeout() {
        let client = MemoryClient::new();
        let backend = connect(&client);

        assert_eq!(backend.test_timeout, TEST_TIMEOUT);
        assert_eq!(TEST_TIMEOUT, Duration::from_secs(10));
    }

    #[test]
    fn test_blocking_dispose() {
        let client = MemoryClient::new();
        let mut backend = connect(&client);
        backend.dispose();

        assert!(matches!(backend.list(), Err(Error::InvalidState)));
        assert!(matches!(backend.test(), Err(Error::InvalidState)));
        assert!(matches!(
            backend.put("a", &mut &b"x"[..], &CancellationToken::new()),
            Err(Error::InvalidState)
        ));
    }
}
