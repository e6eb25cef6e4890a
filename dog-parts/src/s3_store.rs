use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream as AwsByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::{
    ObjectMetadata, ObjectStorageClient, PartError, PartResult, RemoteObject, S3Config,
    StreamingUpload, UploadConfig,
};

/// Highest part number S3 accepts
pub const MAX_PART_NUMBER: i32 = 10_000;

/// Smallest size S3 accepts for any part but the last
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// S3-compatible store backed by native multipart uploads.
///
/// Part index `i` is uploaded as part number `i + 1`. S3 accepts gaps in
/// part numbers, so placeholder parts that never reach the store are fine.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn new(config: S3Config) -> Self {
        let client = Self::create_client(&config).await;
        Self {
            client,
            bucket: config.bucket,
        }
    }

    /// Build from `DOG_PARTS_S3_*` environment variables
    pub async fn from_env() -> PartResult<Self> {
        Ok(Self::new(S3Config::from_env()?).await)
    }

    pub fn from_client<B: Into<String>>(client: Client, bucket: B) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Reject part sizes S3 would refuse for non-final parts
    pub fn check_part_size(config: &UploadConfig) -> PartResult<()> {
        if config.part_size_bytes < MIN_PART_SIZE {
            return Err(PartError::invalid(format!(
                "Part size {} is below the S3 minimum of {}",
                config.part_size_bytes, MIN_PART_SIZE
            )));
        }
        Ok(())
    }

    async fn create_client(config: &S3Config) -> Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access_key_id), Some(secret_access_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "dog-parts",
            ));
        }
        if let Some(endpoint_url) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        let shared = loader.load().await;
        Client::from_conf(
            aws_sdk_s3::config::Builder::from(&shared)
                .force_path_style(config.force_path_style)
                .build(),
        )
    }
}

#[async_trait]
impl ObjectStorageClient for S3ObjectStore {
    async fn start_streaming_upload(
        &self,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> PartResult<Box<dyn StreamingUpload>> {
        let user_metadata: HashMap<String, String> = metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_metadata(Some(user_metadata))
            .send()
            .await
            .map_err(PartError::backend)?;

        let upload_id = output
            .upload_id()
            .ok_or_else(|| PartError::invalid(format!("S3 returned no upload id for {}", key)))?
            .to_string();

        debug!("Created multipart upload {} for s3://{}/{}", upload_id, self.bucket, key);

        Ok(Box::new(S3StreamingUpload {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: key.to_string(),
            upload_id,
            parts: Mutex::new(BTreeMap::new()),
        }))
    }

    fn check_config(&self, config: &UploadConfig) -> PartResult<()> {
        Self::check_part_size(config)
    }
}

/// Open S3 multipart upload
pub struct S3StreamingUpload {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    /// part number -> (completed part, size)
    parts: Mutex<BTreeMap<i32, (CompletedPart, u64)>>,
}

impl S3StreamingUpload {
    fn part_number(index: u64) -> PartResult<i32> {
        index
            .checked_add(1)
            .and_then(|n| i32::try_from(n).ok())
            .filter(|n| *n <= MAX_PART_NUMBER)
            .ok_or_else(|| {
                PartError::invalid(format!(
                    "Part index {} exceeds the S3 limit of {} parts",
                    index, MAX_PART_NUMBER
                ))
            })
    }
}

#[async_trait]
impl StreamingUpload for S3StreamingUpload {
    async fn upload_part(&self, bytes: Bytes, index: u64) -> PartResult<()> {
        let part_number = Self::part_number(index)?;
        let size = bytes.len() as u64;

        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .part_number(part_number)
            .body(AwsByteStream::from(bytes))
            .send()
            .await
            .map_err(PartError::backend)?;

        let etag = output.e_tag().ok_or_else(|| {
            PartError::invalid(format!(
                "S3 returned no ETag for part {} of {}",
                part_number, self.key
            ))
        })?;

        let completed = CompletedPart::builder()
            .part_number(part_number)
            .e_tag(etag)
            .build();
        self.parts.lock().insert(part_number, (completed, size));
        Ok(())
    }

    async fn complete(&self) -> PartResult<RemoteObject> {
        // S3 refuses to complete an upload without parts.
        if self.parts.lock().is_empty() {
            self.upload_part(Bytes::new(), 0).await?;
        }

        let (parts, size_bytes) = {
            let parts = self.parts.lock();
            let completed: Vec<CompletedPart> = parts.values().map(|(p, _)| p.clone()).collect();
            (completed, parts.values().map(|(_, size)| size).sum::<u64>())
        };
        let part_count = parts.len() as u32;

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(PartError::backend)?;

        let mut object = RemoteObject::new(&self.key, size_bytes, part_count);
        if let Some(etag) = output.e_tag() {
            object = object.with_etag(etag);
        }
        if let Some(version_id) = output.version_id() {
            object = object.with_version_id(version_id);
        }
        if let Some(location) = output.location() {
            object = object.with_location(location);
        }
        Ok(object)
    }

    fn upload_id(&self) -> Option<&str> {
        Some(&self.upload_id)
    }
}
