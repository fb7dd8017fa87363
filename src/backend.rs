use std::path::Path;

use rand::RngCore;
use time::OffsetDateTime;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    access::Access,
    adapters::{Connector, Services},
    config::Config,
    model::{
        entry::{Bucket, CustomMetadata, ListOptions, RemoteEntry},
        error::{Error, Result, StorageError},
        transfer::{advance, Download, DownloadProgress, UploadSource},
    },
    path::PathNamer,
};

/// Well-known key the connection test writes to, relative to the folder.
pub const TEST_FILE_NAME: &str = "duplicati_test.dat";
pub const TEST_PAYLOAD_LEN: usize = 256;

struct Session {
    access: Access,
    services: Services,
}

/// Backup backend storing files as objects in a single bucket.
///
/// One instance serves one caller at a time; calls are not serialized
/// against each other. After [`Tardigrade::dispose`] every operation fails
/// with [`Error::InvalidState`].
pub struct Tardigrade {
    session: Option<Session>,
    bucket: String,
    namer: PathNamer,
}

impl Tardigrade {
    pub async fn connect(config: &Config, connector: &dyn Connector) -> Result<Self> {
        let access = Access::build(config)?;
        let services = connector.connect(&access).await?;

        info!(
            bucket = %config.bucket,
            folder = config.folder.as_deref().unwrap_or(""),
            auth_method = access.auth_method().as_str(),
            "connected"
        );

        Ok(Self {
            session: Some(Session { access, services }),
            bucket: config.bucket.clone(),
            namer: PathNamer::new(config.folder.as_deref()),
        })
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket
    }

    pub fn namer(&self) -> &PathNamer {
        &self.namer
    }

    pub fn access(&self) -> Result<&Access> {
        self.session().map(|session| &session.access)
    }

    pub fn is_disposed(&self) -> bool {
        self.session.is_none()
    }

    /// Releases the access. Later calls fail with `InvalidState`.
    pub fn dispose(&mut self) {
        if self.session.take().is_some() {
            info!(bucket = %self.bucket, "disposed");
        }
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(Error::InvalidState)
    }

    async fn ensure_bucket(&self, session: &Session) -> Result<Bucket> {
        let bucket = session.services.buckets.ensure_bucket(&self.bucket).await?;
        debug!(bucket = bucket.name(), "bucket resolved");
        Ok(bucket)
    }

    /// Buckets have no directories, so there is nothing to create.
    pub fn create_folder(&self) -> Result<()> {
        self.session().map(|_| ())
    }

    pub async fn list(&self) -> Result<Vec<RemoteEntry>> {
        let session = self.session()?;
        let bucket = self.ensure_bucket(session).await?;
        let options = ListOptions::with_prefix(self.namer.prefix());

        let objects = session
            .services
            .objects
            .list_objects(&bucket, &options)
            .await?;
        debug!(bucket = bucket.name(), prefix = self.namer.prefix(), count = objects.len(), "listed");

        Ok(objects
            .into_iter()
            .map(|info| {
                let name = self.namer.strip_prefix(&info.key).to_string();
                RemoteEntry::from_object(info, name)
            })
            .collect())
    }

    /// Downloads `name` into the file at `path`, written in one go once the
    /// whole object has arrived. The file is not touched if the download fails.
    pub async fn get(&self, name: &str, path: impl AsRef<Path>) -> Result<()> {
        let session = self.session()?;
        let (key, mut download) = self.download(session, name).await?;
        download
            .start()
            .await
            .map_err(|err| download_error(name, &key, err))?;

        let bytes = download.into_bytes();
        let mut file = tokio::fs::File::create(path.as_ref()).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;

        info!(key = %key, bytes = bytes.len(), "downloaded");
        Ok(())
    }

    /// Downloads `name` into `dest`, writing every chunk as soon as it arrives.
    ///
    /// On failure `dest` holds an unknown prefix of the object.
    pub async fn get_stream<W>(&self, name: &str, dest: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let session = self.session()?;
        let (key, mut download) = self.download(session, name).await?;
        let progress = download.subscribe();

        let transfer = async {
            download
                .start()
                .await
                .map_err(|err| download_error(name, &key, err))
        };
        let ((), written) = tokio::try_join!(transfer, write_progress(&key, progress, dest))?;
        dest.flush().await?;

        info!(key = %key, bytes = written, "downloaded");
        Ok(written)
    }

    async fn download(&self, session: &Session, name: &str) -> Result<(String, Download)> {
        let bucket = self.ensure_bucket(session).await?;
        let key = self.namer.namespaced_key(name);

        let download = session
            .services
            .objects
            .download_object(&bucket, &key)
            .await
            .map_err(|err| download_error(name, &key, err))?;

        Ok((key, download))
    }

    /// Uploads `source` as `name`. If `cancel` fires first the upload is
    /// dropped and the remote object must be treated as not written.
    pub async fn put(&self, name: &str, source: UploadSource, cancel: &CancellationToken) -> Result<()> {
        let session = self.session()?;
        let key = self.namer.namespaced_key(name);

        let transfer = async {
            let bucket = self.ensure_bucket(session).await?;
            let metadata = CustomMetadata::timestamps(OffsetDateTime::now_utc());

            let mut upload = session
                .services
                .objects
                .upload_object(&bucket, &key, source, metadata)
                .await
                .map_err(|err| upload_error(&key, err))?;
            upload.start().await.map_err(|err| upload_error(&key, err))?;

            Ok::<_, Error>(upload.bytes_sent())
        };

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(key = %key, "upload cancelled");
                return Err(Error::Cancelled(name.to_string()));
            }
            sent = transfer => sent?,
        };

        info!(key = %key, bytes = sent, "uploaded");
        Ok(())
    }

    pub async fn put_reader(
        &self,
        name: &str,
        reader: impl AsyncRead + Send + 'static,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.put(name, UploadSource::reader(reader), cancel).await
    }

    pub async fn put_file(&self, name: &str, path: impl AsRef<Path>, cancel: &CancellationToken) -> Result<()> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        self.put_reader(name, file, cancel).await
    }

    /// Every failure, not only an absent object, is reported as `FileMissing`;
    /// the underlying cause is kept as its source.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let session = self.session()?;
        let key = self.namer.namespaced_key(name);

        let deleted = async {
            let bucket = session.services.buckets.ensure_bucket(&self.bucket).await?;
            session.services.objects.delete_object(&bucket, &key).await
        }
        .await;

        match deleted {
            Ok(()) => {
                info!(key = %key, "deleted");
                Ok(())
            }
            Err(err) => {
                warn!(key = %key, error = %err, "delete failed");
                Err(Error::file_missing(name, err))
            }
        }
    }

    /// Round-trips a random payload through the bucket.
    ///
    /// The test key is fixed, so concurrent tests against the same bucket and
    /// folder can step on each other.
    pub async fn test(&self) -> Result<()> {
        let session = self.session()?;
        let key = self.namer.namespaced_key(TEST_FILE_NAME);

        let result = self.round_trip(session, &key).await;
        match &result {
            Ok(()) => info!(key = %key, "connection test passed"),
            Err(err) => warn!(key = %key, error = %err, "connection test failed"),
        }
        result
    }

    async fn round_trip(&self, session: &Session, key: &str) -> Result<()> {
        let objects = &session.services.objects;

        let mut payload = vec![0u8; TEST_PAYLOAD_LEN];
        rand::thread_rng().fill_bytes(&mut payload);

        let bucket = session
            .services
            .buckets
            .ensure_bucket(&self.bucket)
            .await
            .map_err(connectivity)?;

        let mut upload = objects
            .upload_object(&bucket, key, payload.into(), CustomMetadata::new())
            .await
            .map_err(connectivity)?;
        if upload.start().await.is_err() || !upload.completed() {
            return Err(Error::Connectivity(format!(
                "upload of {} failed: {}",
                upload.key(),
                upload.error_message().unwrap_or("no error reported")
            )));
        }

        let mut download = objects
            .download_object(&bucket, key)
            .await
            .map_err(connectivity)?;
        // Delete even when the read back failed, so no test object is left behind.
        let _ = download.start().await;

        objects
            .delete_object(&bucket, key)
            .await
            .map_err(connectivity)?;

        if let Some(message) = download.error_message() {
            return Err(Error::Connectivity(format!(
                "download of {} failed: {}",
                download.key(),
                message
            )));
        }
        if download.failed() || download.bytes_received() != TEST_PAYLOAD_LEN as u64 {
            return Err(Error::Connectivity(format!(
                "expected {} bytes back, received {}",
                TEST_PAYLOAD_LEN,
                download.bytes_received()
            )));
        }

        Ok(())
    }
}

fn connectivity(err: StorageError) -> Error {
    Error::Connectivity(err.to_string())
}

fn download_error(name: &str, key: &str, err: StorageError) -> Error {
    match err {
        StorageError::NotFound(_) => Error::file_missing(name, err),
        StorageError::Unauthorized(msg) => Error::Authorization(msg),
        other => Error::transfer(key, other.to_string()),
    }
}

fn upload_error(key: &str, err: StorageError) -> Error {
    match err {
        StorageError::Unauthorized(msg) => Error::Authorization(msg),
        other => Error::transfer(key, other.to_string()),
    }
}

/// Writes each notified byte range to `dest` in arrival order. Returns the
/// number of bytes written.
pub(crate) async fn write_progress<W>(
    key: &str,
    mut progress: mpsc::UnboundedReceiver<DownloadProgress>,
    dest: &mut W,
) -> Result<u64>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut offset = 0;
    while let Some(update) = progress.recv().await {
        let (next, bytes) =
            advance(offset, &update).map_err(|violation| Error::transfer(key, violation.to_string()))?;
        dest.write_all(&bytes).await?;
        offset = next;
    }

    Ok(offset)
}
