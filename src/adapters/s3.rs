use std::sync::Arc;

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::{ByteStream, DateTime},
};
use bytes::Bytes;
use futures::{
    future::{self, BoxFuture},
    stream, FutureExt, Stream, StreamExt, TryStreamExt,
};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::{
    access::Access,
    adapters::{auth, BucketService, Connector, ObjectService, Services},
    model::{
        entry::{Bucket, CustomMetadata, ListOptions, ObjectInfo},
        error::StorageError,
        transfer::{Download, Upload, UploadSource},
    },
};

pub const DEFAULT_REGION: &str = "us-1";

/// Listing with custom metadata needs one HEAD per object.
const HEAD_CONCURRENCY: usize = 8;

/// Connects through an S3-compatible gateway.
///
/// With an explicit access the satellite is used as the gateway endpoint and the
/// API key and secret as access key id and secret key. An access grant is first
/// registered with the auth service, which hands back gateway credentials.
#[derive(Clone, Debug)]
pub struct S3Connector {
    endpoint: Option<String>,
    region: String,
    auth_service: String,
    http: reqwest::Client,
}

impl Default for S3Connector {
    fn default() -> Self {
        Self::new()
    }
}

impl S3Connector {
    pub fn new() -> Self {
        Self {
            endpoint: None,
            region: DEFAULT_REGION.to_string(),
            auth_service: auth::DEFAULT_AUTH_SERVICE.to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Overrides the endpoint derived from the access.
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(normalize_endpoint(endpoint));
        self
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = region.to_string();
        self
    }

    pub fn with_auth_service(mut self, auth_service: &str) -> Self {
        self.auth_service = auth_service.to_string();
        self
    }

    async fn client(&self, endpoint: &str, key: &str, secret: &str) -> aws_sdk_s3::Client {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .endpoint_url(endpoint)
            .credentials_provider(Credentials::new(key, secret, None, None, "tardigrade"))
            .load()
            .await;

        let config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        aws_sdk_s3::Client::from_conf(config)
    }
}

impl Connector for S3Connector {
    fn connect<'a>(&'a self, access: &'a Access) -> BoxFuture<'a, Result<Services, StorageError>> {
        async move {
            let client = match access {
                Access::Explicit {
                    satellite,
                    api_key,
                    secret,
                } => {
                    let endpoint = self
                        .endpoint
                        .clone()
                        .unwrap_or_else(|| normalize_endpoint(satellite));
                    debug!(endpoint = %endpoint, "connecting with api key");

                    self.client(
                        &endpoint,
                        api_key.as_deref().unwrap_or_default(),
                        secret.as_deref().unwrap_or_default(),
                    )
                    .await
                }
                Access::Grant(grant) => {
                    let creds = auth::register_access(&self.http, &self.auth_service, grant).await?;
                    let endpoint = self
                        .endpoint
                        .clone()
                        .unwrap_or_else(|| normalize_endpoint(&creds.endpoint));
                    debug!(endpoint = %endpoint, "connecting with registered access grant");

                    self.client(&endpoint, &creds.access_key_id, &creds.secret_key)
                        .await
                }
            };

            let storage = Arc::new(S3Storage::new(client));
            Ok(Services {
                buckets: storage.clone(),
                objects: storage,
            })
        }
        .boxed()
    }
}

pub struct S3Storage {
    client: aws_sdk_s3::Client,
}

impl S3Storage {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    async fn custom_metadata(&self, bucket: &str, key: &str) -> Result<CustomMetadata, StorageError> {
        let ho = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| classify(&format!("failed to head_object: {}", key), err))?;

        Ok(ho
            .metadata()
            .map(|metadata| {
                metadata
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl BucketService for S3Storage {
    fn ensure_bucket<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Bucket, StorageError>> {
        async move {
            match self.client.create_bucket().bucket(name).send().await {
                Ok(_) => info!(bucket = name, "created bucket"),
                Err(err) => {
                    let exists = err
                        .as_service_error()
                        .map(|svc_err| {
                            svc_err.is_bucket_already_owned_by_you()
                                || svc_err.is_bucket_already_exists()
                        })
                        .unwrap_or(false);

                    if !exists {
                        return Err(classify(&format!("failed to create bucket: {}", name), err));
                    }
                }
            }

            Ok(Bucket::new(name))
        }
        .boxed()
    }
}

impl ObjectService for S3Storage {
    fn list_objects<'a>(
        &'a self,
        bucket: &'a Bucket,
        options: &'a ListOptions,
    ) -> BoxFuture<'a, Result<Vec<ObjectInfo>, StorageError>> {
        async move {
            let mut objects = Vec::new();
            let mut continuation_token: Option<String> = None;

            loop {
                let mut req = self
                    .client
                    .list_objects_v2()
                    .bucket(bucket.name())
                    .prefix(&options.prefix);

                if !options.recursive {
                    req = req.delimiter("/");
                }
                if let Some(tok) = continuation_token {
                    req = req.continuation_token(tok);
                }

                let lo = req.send().await.map_err(|err| {
                    classify(&format!("failed to list_objects at: {}", options.prefix), err)
                })?;

                for p in lo.common_prefixes() {
                    if let Some(prefix) = p.prefix() {
                        objects.push(ObjectInfo {
                            key: prefix.to_string(),
                            is_prefix: true,
                            size: 0,
                            created: None,
                            custom: CustomMetadata::new(),
                        });
                    }
                }

                for o in lo.contents() {
                    let created = if options.system {
                        o.last_modified().and_then(to_offset_date_time)
                    } else {
                        None
                    };

                    objects.push(ObjectInfo {
                        key: o.key().unwrap_or("").to_string(),
                        is_prefix: false,
                        size: o.size().unwrap_or(0).max(0) as u64,
                        created,
                        custom: CustomMetadata::new(),
                    });
                }

                continuation_token = lo.next_continuation_token().map(|tok| tok.to_string());
                if continuation_token.is_none() {
                    break;
                }
            }

            if !options.custom {
                return Ok(objects);
            }

            stream::iter(objects)
                .map(|mut info| async move {
                    if !info.is_prefix {
                        info.custom = self.custom_metadata(bucket.name(), &info.key).await?;
                    }
                    Ok::<_, StorageError>(info)
                })
                .buffered(HEAD_CONCURRENCY)
                .try_collect()
                .await
        }
        .boxed()
    }

    fn upload_object<'a>(
        &'a self,
        bucket: &'a Bucket,
        key: &'a str,
        source: UploadSource,
        metadata: CustomMetadata,
    ) -> BoxFuture<'a, Result<Upload, StorageError>> {
        let client = self.client.clone();
        let bucket = bucket.name().to_string();
        let object_key = key.to_string();

        let task = async move {
            let body = source
                .into_bytes()
                .await
                .map_err(|err| StorageError::Other(format!("failed to read upload source: {}", err)))?;
            let sent = body.len() as u64;

            let mut req = client
                .put_object()
                .bucket(&bucket)
                .key(&object_key)
                .body(ByteStream::from(body));
            for (k, v) in metadata.entries() {
                req = req.metadata(k, v);
            }

            req.send()
                .await
                .map_err(|err| classify(&format!("failed to put_object at: {}", object_key), err))?;

            Ok(sent)
        }
        .boxed();

        future::ready(Ok(Upload::new(key, task))).boxed()
    }

    fn download_object<'a>(
        &'a self,
        bucket: &'a Bucket,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Download, StorageError>> {
        let client = self.client.clone();
        let bucket = bucket.name().to_string();
        let object_key = key.to_string();

        let chunks = stream::once(async move {
            client
                .get_object()
                .bucket(&bucket)
                .key(&object_key)
                .send()
                .await
                .map_err(|err| classify(&format!("failed to get_object: {}", object_key), err))
        })
        .map_ok(|o| body_chunks(o.body))
        .try_flatten()
        .boxed();

        future::ready(Ok(Download::new(key, chunks))).boxed()
    }

    fn delete_object<'a>(
        &'a self,
        bucket: &'a Bucket,
        key: &'a str,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        async move {
            // S3 deletes of absent keys succeed silently.
            self.client
                .head_object()
                .bucket(bucket.name())
                .key(key)
                .send()
                .await
                .map_err(|err| classify(&format!("failed to head_object: {}", key), err))?;

            self.client
                .delete_object()
                .bucket(bucket.name())
                .key(key)
                .send()
                .await
                .map_err(|err| classify(&format!("failed to delete_object: {}", key), err))?;

            Ok(())
        }
        .boxed()
    }
}

fn body_chunks(body: ByteStream) -> impl Stream<Item = Result<Bytes, StorageError>> + Send {
    stream::unfold(body, |mut body| async move {
        body.next().await.map(|chunk| {
            let chunk = chunk
                .map_err(|err| StorageError::Unavailable(format!("failed to read body: {}", err)));
            (chunk, body)
        })
    })
}

fn to_offset_date_time(at: &DateTime) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(at.as_nanos()).ok()
}

pub fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    }
}

fn classify<E>(context: &str, err: SdkError<E>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = format!("{}, {}", context, DisplayErrorContext(&err));
    if matches!(err, SdkError::TimeoutError(_) | SdkError::DispatchFailure(_)) {
        return StorageError::Unavailable(message);
    }

    let status = err.raw_response().map(|resp| resp.status().as_u16());
    classify_response(err.code(), status, message)
}

pub fn classify_response(code: Option<&str>, status: Option<u16>, message: String) -> StorageError {
    match code {
        Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch") => {
            StorageError::Unauthorized(message)
        }
        Some("NoSuchKey" | "NoSuchBucket" | "NotFound") => StorageError::NotFound(message),
        _ => match status {
            Some(status) => auth::classify_status(status, message),
            None => StorageError::Other(message),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("gateway.storjshare.io"),
            "https://gateway.storjshare.io"
        );
        assert_eq!(
            normalize_endpoint("http://localhost:7777"),
            "http://localhost:7777"
        );
    }

    #[test]
    fn test_classify_response() {
        assert!(matches!(
            classify_response(Some("InvalidAccessKeyId"), Some(403), "x".into()),
            StorageError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_response(Some("NoSuchKey"), None, "x".into()),
            StorageError::NotFound(_)
        ));
        assert!(matches!(
            classify_response(None, Some(404), "x".into()),
            StorageError::NotFound(_)
        ));
        assert!(matches!(
            classify_response(Some("SlowDown"), Some(503), "x".into()),
            StorageError::Unavailable(_)
        ));
        assert!(matches!(
            classify_response(None, None, "x".into()),
            StorageError::Other(_)
        ));
    }

    #[test]
    fn test_to_offset_date_time() {
        let at = DateTime::from_secs(1_700_000_000);
        assert_eq!(
            to_offset_date_time(&at),
            OffsetDateTime::from_unix_timestamp(1_700_000_000).ok()
        );
    }

    #[tokio::test]
    async fn test_connector_with_explicit_access() {
        let connector = S3Connector::new().with_region("eu-1");
        let access = Access::Explicit {
            satellite: "gateway.example.invalid".into(),
            api_key: Some("key".into()),
            secret: Some("secret".into()),
        };

        assert!(connector.connect(&access).await.is_ok());
    }
}
