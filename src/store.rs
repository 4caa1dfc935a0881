use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Service error ocurred: {0}.")]
    ServiceError(String),

    #[error("Unknown error ocurred: {0}.")]
    UnknownError(String),
}

/// Object storage holding the built deployment archives.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<(), Error>;

    async fn enable_versioning(&self, bucket: &str) -> Result<(), Error>;

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), Error>;

    /// With `force`, every object version is removed before the bucket itself.
    async fn delete_bucket(&self, bucket: &str, force: bool) -> Result<(), Error>;
}

/// Bucket names embed the creation time so no two runs share a bucket.
pub fn artifact_bucket_name(prefix: &str, environment: &str, now: DateTime<Utc>) -> String {
    return format!("{}-artifacts-{}-{}", prefix, environment, now.timestamp()).to_lowercase();
}

pub fn artifact_key(unit_name: &str) -> String {
    return format!("lambda/{}.zip", unit_name);
}
