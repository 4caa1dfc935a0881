use async_trait::async_trait;
use aws_sdk_cloudformation::model::{Capability, Parameter};
use aws_sdk_cloudformation::types::SdkError;
use aws_types::region::Region;
use tracing::debug;

use crate::orchestrator::{Error, Orchestrator, StackRequest, StackSummary, UpdateOutcome};
use crate::outputs::StackOutputs;
use crate::stack::StackState;

const NO_UPDATES_MESSAGE: &str = "No updates are to be performed";

pub async fn load_sdk_config(region: &str) -> aws_types::SdkConfig {
    return aws_config::from_env()
        .region(Region::new(region.to_string()))
        .load()
        .await;
}

pub struct CloudFormation {
    client: aws_sdk_cloudformation::Client,
}

impl CloudFormation {
    pub fn new(sdk_config: &aws_types::SdkConfig) -> Self {
        return Self {
            client: aws_sdk_cloudformation::Client::new(sdk_config),
        };
    }

    async fn describe(
        &self,
        stack_name: &str,
    ) -> Result<Option<aws_sdk_cloudformation::model::Stack>, Error> {
        let result = self
            .client
            .describe_stacks()
            .stack_name(stack_name)
            .send()
            .await;

        let result = match result {
            Ok(data) => data,
            Err(SdkError::ServiceError { err, .. }) => {
                let message = err.to_string();
                if message.contains("does not exist") {
                    return Ok(None);
                }
                return Err(Error::ServiceError(message));
            }
            Err(err) => return Err(Error::UnknownError(err.to_string())),
        };

        let stacks = result.stacks().unwrap_or_else(|| &[]);
        return Ok(stacks.first().cloned());
    }
}

fn to_parameters(request: &StackRequest<'_>) -> Vec<Parameter> {
    return request
        .parameters
        .iter()
        .map(|(key, value)| Parameter::builder().parameter_key(key).parameter_value(value).build())
        .collect();
}

fn to_capabilities(request: &StackRequest<'_>) -> Vec<Capability> {
    return request
        .capabilities
        .iter()
        .map(|capability| Capability::from(capability.as_str()))
        .collect();
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
impl Orchestrator for CloudFormation {
    async fn describe_stack(&self, stack_name: &str) -> Result<StackState, Error> {
        let stack = match self.describe(stack_name).await? {
            Some(stack) => stack,
            None => return Ok(StackState::Absent),
        };

        return match stack.stack_status() {
            Some(status) => Ok(StackState::from_status(status.as_str())),
            None => Err(Error::UnknownError(format!("{} has no status", stack_name))),
        };
    }

    async fn create_stack(&self, request: &StackRequest<'_>) -> Result<(), Error> {
        debug!(stack = request.stack_name, "CreateStack");
        self.client
            .create_stack()
            .stack_name(request.stack_name)
            .template_body(request.template_body)
            .set_parameters(Some(to_parameters(request)))
            .set_capabilities(Some(to_capabilities(request)))
            .send()
            .await
            .map_err(map_sdk_error)?;

        return Ok(());
    }

    async fn update_stack(&self, request: &StackRequest<'_>) -> Result<UpdateOutcome, Error> {
        debug!(stack = request.stack_name, "UpdateStack");
        let result = self
            .client
            .update_stack()
            .stack_name(request.stack_name)
            .template_body(request.template_body)
            .set_parameters(Some(to_parameters(request)))
            .set_capabilities(Some(to_capabilities(request)))
            .send()
            .await;

        return match result {
            Ok(_) => Ok(UpdateOutcome::Started),
            Err(SdkError::ServiceError { err, .. }) => {
                let message = err.to_string();
                if message.contains(NO_UPDATES_MESSAGE) {
                    return Ok(UpdateOutcome::NoChanges);
                }
                Err(Error::ServiceError(message))
            }
            Err(err) => Err(Error::UnknownError(err.to_string())),
        };
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<(), Error> {
        debug!(stack = stack_name, "DeleteStack");
        self.client
            .delete_stack()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(map_sdk_error)?;

        return Ok(());
    }

    async fn list_stacks(&self, prefix: &str) -> Result<Vec<StackSummary>, Error> {
        let mut summaries = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let result = self
                .client
                .list_stacks()
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(map_sdk_error)?;

            for summary in result.stack_summaries().unwrap_or_else(|| &[]) {
                let name = match summary.stack_name() {
                    Some(name) if name.starts_with(prefix) => name,
                    _ => continue,
                };
                let state = match summary.stack_status() {
                    Some(status) => StackState::from_status(status.as_str()),
                    None => continue,
                };
                if state == StackState::DeleteComplete {
                    continue;
                }
                summaries.push(StackSummary {
                    name: name.to_string(),
                    state,
                });
            }

            match result.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        return Ok(summaries);
    }

    async fn get_outputs(&self, stack_name: &str) -> Result<StackOutputs, Error> {
        let stack = match self.describe(stack_name).await? {
            Some(stack) => stack,
            None => return Err(Error::NotFoundError(stack_name.to_string())),
        };

        let outputs = stack
            .outputs()
            .unwrap_or_else(|| &[])
            .iter()
            .filter_map(|output| match (output.output_key(), output.output_value()) {
                (Some(key), Some(value)) => Some((key, value)),
                _ => None,
            })
            .collect();

        return Ok(outputs);
    }

    async fn validate_template(&self, template_body: &str) -> Result<(), Error> {
        let result = self
            .client
            .validate_template()
            .template_body(template_body)
            .send()
            .await;

        return match result {
            Ok(_) => Ok(()),
            Err(SdkError::ServiceError { err, .. }) => Err(Error::InvalidTemplate(err.to_string())),
            Err(err) => Err(Error::UnknownError(err.to_string())),
        };
    }
}
