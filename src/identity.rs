use async_trait::async_trait;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Credentials did not resolve to an identity: {0}")]
    Unresolved(String),
}

#[async_trait]
pub trait Identity: Send + Sync {
    /// The ARN the current credentials act as.
    async fn caller_identity(&self) -> Result<String, Error>;
}

pub struct StsIdentity {
    client: aws_sdk_sts::Client,
}

impl StsIdentity {
    pub fn new(sdk_config: &aws_types::SdkConfig) -> Self {
        return Self {
            client: aws_sdk_sts::Client::new(sdk_config),
        };
    }
}

#[async_trait]
impl Identity for StsIdentity {
    async fn caller_identity(&self) -> Result<String, Error> {
        let result = match self.client.get_caller_identity().send().await {
            Ok(data) => data,
            Err(aws_sdk_sts::types::SdkError::ServiceError { err, .. }) => {
                return Err(Error::Unresolved(err.to_string()));
            }
            Err(err) => return Err(Error::Unresolved(format!("request failed: {}", err))),
        };

        return match result.arn() {
            Some(arn) => Ok(arn.to_string()),
            None => Err(Error::Unresolved("no ARN returned".to_string())),
        };
    }
}
