use async_trait::async_trait;
use aws_sdk_s3::model::{
    BucketLocationConstraint, BucketVersioningStatus, CreateBucketConfiguration,
    VersioningConfiguration,
};
use aws_sdk_s3::types::{ByteStream, SdkError};
use futures::future::try_join_all;
use tracing::debug;

use crate::store::{ArtifactStore, Error};

/// Buckets in this region must be created without a location constraint.
const DEFAULT_REGION: &str = "us-east-1";

pub struct S3Store {
    client: aws_sdk_s3::Client,
}

impl S3Store {
    pub fn new(sdk_config: &aws_types::SdkConfig) -> Self {
        return Self {
            client: aws_sdk_s3::Client::new(sdk_config),
        };
    }

    async fn delete_versions(&self, bucket: &str) -> Result<(), Error> {
        let mut key_marker: Option<String> = None;
        let mut version_marker: Option<String> = None;

        loop {
            let listing = self
                .client
                .list_object_versions()
                .bucket(bucket)
                .set_key_marker(key_marker.take())
                .set_version_id_marker(version_marker.take())
                .send()
                .await
                .map_err(map_sdk_error)?;

            let mut targets: Vec<(String, Option<String>)> = Vec::new();
            for version in listing.versions().unwrap_or_else(|| &[]) {
                if let Some(key) = version.key() {
                    targets.push((key.to_string(), version.version_id().map(str::to_string)));
                }
            }
            for marker in listing.delete_markers().unwrap_or_else(|| &[]) {
                if let Some(key) = marker.key() {
                    targets.push((key.to_string(), marker.version_id().map(str::to_string)));
                }
            }

            try_join_all(targets.into_iter().map(|(key, version_id)| {
                self.client
                    .delete_object()
                    .bucket(bucket)
                    .key(key)
                    .set_version_id(version_id)
                    .send()
            }))
            .await
            .map_err(map_sdk_error)?;

            if !listing.is_truncated() {
                return Ok(());
            }
            key_marker = listing.next_key_marker().map(str::to_string);
            version_marker = listing.next_version_id_marker().map(str::to_string);
        }
    }
}

fn map_sdk_error<E>(error: SdkError<E>) -> Error
where
    E: std::error::Error + 'static,
{
    return match error {
        SdkError::ServiceError { err, .. } => Error::ServiceError(err.to_string()),
        err => Error::UnknownError(err.to_string()),
    };
}

#[async_trait]
impl ArtifactStore for S3Store {
    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<(), Error> {
        debug!(bucket, region, "CreateBucket");
        let mut request = self.client.create_bucket().bucket(bucket);
        if region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }
        request.send().await.map_err(map_sdk_error)?;

        return Ok(());
    }

    async fn enable_versioning(&self, bucket: &str) -> Result<(), Error> {
        self.client
            .put_bucket_versioning()
            .bucket(bucket)
            .versioning_configuration(
                VersioningConfiguration::builder()
                    .status(BucketVersioningStatus::Enabled)
                    .build(),
            )
            .send()
            .await
            .map_err(map_sdk_error)?;

        return Ok(());
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), Error> {
        debug!(bucket, key, bytes = body.len(), "PutObject");
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(map_sdk_error)?;

        return Ok(());
    }

    async fn delete_bucket(&self, bucket: &str, force: bool) -> Result<(), Error> {
        if force {
            self.delete_versions(bucket).await?;
        }
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(map_sdk_error)?;

        return Ok(());
    }
}
