use std::sync::Arc;

use futures::future::BoxFuture;

use crate::{
    access::Access,
    model::{
        entry::{Bucket, CustomMetadata, ListOptions, ObjectInfo},
        error::StorageError,
        transfer::{Download, Upload, UploadSource},
    },
};

pub mod auth;
pub mod mock;
pub mod s3;

pub trait BucketService: Send + Sync {
    /// Returns the bucket, creating it first if it does not exist yet.
    fn ensure_bucket<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Bucket, StorageError>>;
}

pub trait ObjectService: Send + Sync {
    fn list_objects<'a>(
        &'a self,
        bucket: &'a Bucket,
        options: &'a ListOptions,
    ) -> BoxFuture<'a, Result<Vec<ObjectInfo>, StorageError>>;

    /// Prepares an upload; nothing is transferred before `Upload::start`.
    fn upload_object<'a>(
        &'a self,
        bucket: &'a Bucket,
        key: &'a str,
        source: UploadSource,
        metadata: CustomMetadata,
    ) -> BoxFuture<'a, Result<Upload, StorageError>>;

    /// Prepares a download; nothing is transferred before `Download::start`.
    fn download_object<'a>(
        &'a self,
        bucket: &'a Bucket,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Download, StorageError>>;

    fn delete_object<'a>(
        &'a self,
        bucket: &'a Bucket,
        key: &'a str,
    ) -> BoxFuture<'a, Result<(), StorageError>>;
}

/// Bucket and object capabilities bound to one access.
#[derive(Clone)]
pub struct Services {
    pub buckets: Arc<dyn BucketService>,
    pub objects: Arc<dyn ObjectService>,
}

/// Opens the storage capabilities for an access.
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, access: &'a Access) -> BoxFuture<'a, Result<Services, StorageError>>;
}
