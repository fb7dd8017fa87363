use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, MutexGuard},
};

use bytes::Bytes;
use futures::{future::{self, BoxFuture}, stream, FutureExt, StreamExt};
use time::OffsetDateTime;

use crate::{
    access::Access,
    adapters::{BucketService, Connector, ObjectService, Services},
    model::{
        entry::{Bucket, CustomMetadata, ListOptions, ObjectInfo},
        error::StorageError,
        transfer::{Download, Upload, UploadSource},
    },
};

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

struct StoredObject {
    data: Bytes,
    created: OffsetDateTime,
    custom: CustomMetadata,
}

struct State {
    buckets: BTreeMap<String, BTreeMap<String, StoredObject>>,
    fault: Option<StorageError>,
    chunk_size: usize,
}

/// Object store kept in process memory. Clones share the same store.
#[derive(Clone)]
pub struct MemoryClient {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                buckets: BTreeMap::new(),
                fault: None,
                chunk_size: DEFAULT_CHUNK_SIZE,
            })),
        }
    }

    /// Downloads are delivered in pieces of at most `chunk_size` bytes.
    pub fn with_chunk_size(self, chunk_size: usize) -> Self {
        self.lock().chunk_size = chunk_size.max(1);
        self
    }

    /// Makes every subsequent call fail with `fault` until cleared.
    pub fn set_fault(&self, fault: Option<StorageError>) {
        self.lock().fault = fault;
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.lock()
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| object.data.clone())
    }

    pub fn bucket_exists(&self, bucket: &str) -> bool {
        self.lock().buckets.contains_key(bucket)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .expect("failed to acquire `state` guard")
    }

    fn check(&self) -> Result<MutexGuard<'_, State>, StorageError> {
        let state = self.lock();
        if let Some(fault) = state.fault.clone() {
            return Err(fault);
        }

        Ok(state)
    }
}

fn missing_bucket(bucket: &Bucket) -> StorageError {
    StorageError::NotFound(format!("bucket {}", bucket.name()))
}

impl BucketService for MemoryClient {
    fn ensure_bucket<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Bucket, StorageError>> {
        let result = self.check().map(|mut state| {
            state.buckets.entry(name.to_string()).or_default();
            Bucket::new(name)
        });

        future::ready(result).boxed()
    }
}

impl ObjectService for MemoryClient {
    fn list_objects<'a>(
        &'a self,
        bucket: &'a Bucket,
        options: &'a ListOptions,
    ) -> BoxFuture<'a, Result<Vec<ObjectInfo>, StorageError>> {
        let result = self.check().and_then(|state| {
            let objects = state
                .buckets
                .get(bucket.name())
                .ok_or_else(|| missing_bucket(bucket))?;

            let mut infos = Vec::new();
            let mut prefixes = BTreeSet::new();
            for (key, object) in objects.range(options.prefix.clone()..) {
                let Some(rest) = key.strip_prefix(options.prefix.as_str()) else {
                    break;
                };

                if !options.recursive {
                    if let Some((dir, _)) = rest.split_once('/') {
                        let prefix = format!("{}{}/", options.prefix, dir);
                        if prefixes.insert(prefix.clone()) {
                            infos.push(ObjectInfo {
                                key: prefix,
                                is_prefix: true,
                                size: 0,
                                created: None,
                                custom: CustomMetadata::new(),
                            });
                        }
                        continue;
                    }
                }

                infos.push(ObjectInfo {
                    key: key.clone(),
                    is_prefix: false,
                    size: object.data.len() as u64,
                    created: options.system.then_some(object.created),
                    custom: if options.custom {
                        object.custom.clone()
                    } else {
                        CustomMetadata::new()
                    },
                });
            }

            Ok(infos)
        });

        future::ready(result).boxed()
    }

    fn upload_object<'a>(
        &'a self,
        bucket: &'a Bucket,
        key: &'a str,
        source: UploadSource,
        metadata: CustomMetadata,
    ) -> BoxFuture<'a, Result<Upload, StorageError>> {
        let result = self.check().and_then(|state| {
            if !state.buckets.contains_key(bucket.name()) {
                return Err(missing_bucket(bucket));
            }

            let client = self.clone();
            let bucket = bucket.name().to_string();
            let object_key = key.to_string();
            let task = async move {
                let data = source
                    .into_bytes()
                    .await
                    .map_err(|err| StorageError::Other(format!("failed to read upload source: {}", err)))?;
                let sent = data.len() as u64;

                let mut state = client.check()?;
                let objects = state
                    .buckets
                    .get_mut(&bucket)
                    .ok_or_else(|| StorageError::NotFound(format!("bucket {}", bucket)))?;
                objects.insert(
                    object_key,
                    StoredObject {
                        data,
                        created: OffsetDateTime::now_utc(),
                        custom: metadata,
                    },
                );

                Ok(sent)
            }
            .boxed();

            Ok(Upload::new(key, task))
        });

        future::ready(result).boxed()
    }

    fn download_object<'a>(
        &'a self,
        bucket: &'a Bucket,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Download, StorageError>> {
        let result = self.check().and_then(|state| {
            let data = state
                .buckets
                .get(bucket.name())
                .ok_or_else(|| missing_bucket(bucket))?
                .get(key)
                .map(|object| object.data.clone())
                .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

            let chunk_size = state.chunk_size;
            let chunks = (0..data.len())
                .step_by(chunk_size)
                .map(|start| Ok::<_, StorageError>(data.slice(start..(start + chunk_size).min(data.len()))))
                .collect::<Vec<_>>();

            Ok(Download::new(key, stream::iter(chunks).boxed()))
        });

        future::ready(result).boxed()
    }

    fn delete_object<'a>(
        &'a self,
        bucket: &'a Bucket,
        key: &'a str,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        let result = self.check().and_then(|mut state| {
            state
                .buckets
                .get_mut(bucket.name())
                .ok_or_else(|| missing_bucket(bucket))?
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| StorageError::NotFound(key.to_string()))
        });

        future::ready(result).boxed()
    }
}

impl Connector for MemoryClient {
    fn connect<'a>(&'a self, _access: &'a Access) -> BoxFuture<'a, Result<Services, StorageError>> {
        let services = Services {
            buckets: Arc::new(self.clone()),
            objects: Arc::new(self.clone()),
        };

        future::ready(Ok(services)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn upload(client: &MemoryClient, bucket: &Bucket, key: &str, data: &'static [u8]) {
        let mut upload = client
            .upload_object(bucket, key, Bytes::from_static(data).into(), CustomMetadata::new())
            .await
            .unwrap();
        upload.start().await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_bucket_is_idempotent() {
        let client = MemoryClient::new();

        let first = client.ensure_bucket("b").await.unwrap();
        upload(&client, &first, "k", b"data").await;
        let second = client.ensure_bucket("b").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(client.object("b", "k").as_deref(), Some(&b"data"[..]));
    }

    #[tokio::test]
    async fn test_upload_is_lazy() {
        let client = MemoryClient::new();
        let bucket = client.ensure_bucket("b").await.unwrap();

        let mut upload = client
            .upload_object(&bucket, "k", vec![1u8, 2, 3].into(), CustomMetadata::new())
            .await
            .unwrap();
        assert_eq!(client.object("b", "k"), None);

        upload.start().await.unwrap();
        assert_eq!(upload.bytes_sent(), 3);
        assert!(client.object("b", "k").is_some());
    }

    #[tokio::test]
    async fn test_list_prefix_and_grouping() {
        let client = MemoryClient::new();
        let bucket = client.ensure_bucket("b").await.unwrap();
        for key in ["f/a", "f/sub/b", "f/sub/c", "g/d"] {
            upload(&client, &bucket, key, b"x").await;
        }

        let recursive = client
            .list_objects(&bucket, &ListOptions::with_prefix("f/"))
            .await
            .unwrap();
        let keys: Vec<_> = recursive.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["f/a", "f/sub/b", "f/sub/c"]);

        let shallow = ListOptions {
            recursive: false,
            ..ListOptions::with_prefix("f/")
        };
        let grouped = client.list_objects(&bucket, &shallow).await.unwrap();
        let keys: Vec<_> = grouped.iter().map(|o| (o.key.as_str(), o.is_prefix)).collect();
        assert_eq!(keys, vec![("f/a", false), ("f/sub/", true)]);
    }

    #[tokio::test]
    async fn test_download_in_chunks() {
        let client = MemoryClient::new().with_chunk_size(2);
        let bucket = client.ensure_bucket("b").await.unwrap();
        upload(&client, &bucket, "k", b"hello").await;

        let mut download = client.download_object(&bucket, "k").await.unwrap();
        let mut rx = download.subscribe();
        download.start().await.unwrap();

        let mut sizes = Vec::new();
        while let Some(progress) = rx.recv().await {
            sizes.push(progress.chunk.len());
        }
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(download.downloaded_bytes(), b"hello");
    }

    #[tokio::test]
    async fn test_missing_objects() {
        let client = MemoryClient::new();
        let bucket = client.ensure_bucket("b").await.unwrap();

        assert!(matches!(
            client.download_object(&bucket, "nope").await,
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(
            client.delete_object(&bucket, "nope").await,
            Err(StorageError::NotFound("nope".into()))
        );
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let client = MemoryClient::new();
        client.set_fault(Some(StorageError::Unauthorized("revoked".into())));

        assert_eq!(
            client.ensure_bucket("b").await,
            Err(StorageError::Unauthorized("revoked".into()))
        );

        client.set_fault(None);
        assert!(client.ensure_bucket("b").await.is_ok());
    }
}
