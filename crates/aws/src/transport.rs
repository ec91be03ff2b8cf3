//! Transport over the official AWS SDK crates

use std::time::Duration;

use async_trait::async_trait;
use aws_credential_types::provider::ProvideCredentials;
use nb_core::{Error, Profile, ResourceIdentity, Result, Service, Transport, TransportError};
use serde_json::{Value, json};

/// How long waiters and polls wait for a resource to settle
pub const DEFAULT_WAITER_TIMEOUT: Duration = Duration::from_secs(300);

const POLL_INTERVAL: Duration = Duration::from_secs(2);

const NOT_FOUND_CODES: &[&str] = &["NotFound", "NoSuchBucket", "ResourceNotFoundException"];

#[derive(Debug, Clone)]
enum Client {
    Storage(aws_sdk_s3::Client),
    Table(aws_sdk_dynamodb::Client),
    Topic(aws_sdk_sns::Client),
    Logs(aws_sdk_cloudwatchlogs::Client),
}

/// Transport bound to one AWS service family and one region
#[derive(Debug, Clone)]
pub struct AwsTransport {
    service: Service,
    region: String,
    client: Client,
    waiter_timeout: Duration,
}

/// Cheap read that proves the endpoint answers for `service`
fn reachability_request(service: Service) -> (&'static str, Value) {
    match service {
        Service::Storage => ("ListBuckets", json!({"MaxBuckets": 1})),
        Service::Table => ("ListTables", json!({"Limit": 1})),
        Service::Topic => ("ListTopics", json!({})),
        Service::Logs => ("DescribeLogGroups", json!({"limit": 1})),
    }
}

fn is_not_found(error: &TransportError) -> bool {
    NOT_FOUND_CODES.contains(&error.code.as_str())
}

fn waiter_error(identity: &ResourceIdentity, error: impl std::fmt::Display) -> TransportError {
    TransportError::new(
        TransportError::WAITER_TIMEOUT,
        format!("Waiting on {identity}: {error}"),
    )
}

impl AwsTransport {
    /// Open a transport for `service` using a connection profile
    ///
    /// `region` overrides the profile's region. Credentials must resolve and
    /// a reachability call must succeed before the handle is returned.
    pub async fn open(service: Service, profile: &Profile, region: Option<&str>) -> Result<Self> {
        profile.validate()?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region.or(profile.region.as_deref()) {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        if let (Some(access_key), Some(secret_key)) = (&profile.access_key, &profile.secret_key) {
            loader = loader.credentials_provider(aws_credential_types::Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "nb-static-credentials",
            ));
        }
        if let Some(endpoint) = &profile.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;

        let region = config
            .region()
            .map(ToString::to_string)
            .ok_or_else(|| {
                Error::Config(format!(
                    "No region for profile '{}'; set one on the profile or pass --region",
                    profile.name
                ))
            })?;
        let provider = config
            .credentials_provider()
            .ok_or_else(|| Error::Auth("No credentials provider configured".to_string()))?;
        provider
            .provide_credentials()
            .await
            .map_err(|e| Error::Auth(format!("Could not resolve credentials: {e}")))?;

        let client = match service {
            Service::Storage => {
                let s3_config = aws_sdk_s3::config::Builder::from(&config)
                    .force_path_style(profile.force_path_style)
                    .build();
                Client::Storage(aws_sdk_s3::Client::from_conf(s3_config))
            }
            Service::Table => Client::Table(aws_sdk_dynamodb::Client::new(&config)),
            Service::Topic => Client::Topic(aws_sdk_sns::Client::new(&config)),
            Service::Logs => Client::Logs(aws_sdk_cloudwatchlogs::Client::new(&config)),
        };

        let transport = Self {
            service,
            region,
            client,
            waiter_timeout: DEFAULT_WAITER_TIMEOUT,
        };
        let (operation, params) = reachability_request(service);
        transport.invoke(service, operation, params).await?;
        tracing::debug!(service = %service, region = %transport.region, "Transport ready");
        Ok(transport)
    }

    pub fn with_waiter_timeout(mut self, timeout: Duration) -> Self {
        self.waiter_timeout = timeout;
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Whether the resource currently exists
    async fn exists(&self, identity: &ResourceIdentity) -> std::result::Result<bool, TransportError> {
        let outcome = match self.service {
            Service::Topic if nb_core::topic::is_arn(&identity.name) => {
                self.invoke(
                    Service::Topic,
                    "GetTopicAttributes",
                    json!({"TopicArn": identity.name}),
                )
                .await
            }
            Service::Topic => {
                let suffix = format!(":{}", identity.name);
                let mut token: Option<String> = None;
                loop {
                    let mut params = json!({});
                    if let Some(token) = &token {
                        params["NextToken"] = json!(token);
                    }
                    let page = self.invoke(Service::Topic, "ListTopics", params).await?;
                    let found = page["Topics"].as_array().is_some_and(|topics| {
                        topics
                            .iter()
                            .filter_map(|t| t["TopicArn"].as_str())
                            .any(|arn| arn.ends_with(&suffix))
                    });
                    if found {
                        return Ok(true);
                    }
                    match page["NextToken"].as_str() {
                        Some(next) => token = Some(next.to_string()),
                        None => return Ok(false),
                    }
                }
            }
            Service::Logs => {
                let page = self
                    .invoke(
                        Service::Logs,
                        "DescribeLogGroups",
                        json!({"logGroupNamePrefix": identity.name, "limit": 1}),
                    )
                    .await?;
                // The exact name sorts first among names sharing it as a prefix
                return Ok(page["logGroups"][0]["logGroupName"].as_str() == Some(identity.name.as_str()));
            }
            Service::Storage => {
                self.invoke(Service::Storage, "HeadBucket", json!({"Bucket": identity.name}))
                    .await
            }
            Service::Table => {
                self.invoke(Service::Table, "DescribeTable", json!({"TableName": identity.name}))
                    .await
            }
        };
        match outcome {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Poll until the resource reaches the wanted state or the timeout passes
    async fn poll(&self, identity: &ResourceIdentity, want: bool) -> std::result::Result<(), TransportError> {
        let deadline = tokio::time::Instant::now() + self.waiter_timeout;
        loop {
            if self.exists(identity).await? == want {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(waiter_error(identity, "timed out"));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl Transport for AwsTransport {
    fn serves(&self, service: Service) -> bool {
        service == self.service
    }

    async fn invoke(
        &self,
        service: Service,
        operation: &str,
        params: Value,
    ) -> std::result::Result<Value, TransportError> {
        if service != self.service {
            return Err(TransportError::new(
                TransportError::UNKNOWN_OPERATION,
                format!("Transport is bound to {}, not {service}", self.service),
            ));
        }
        tracing::debug!(service = %service, operation = operation, region = %self.region, "SDK call");
        match &self.client {
            Client::Storage(client) => crate::storage::invoke(client, operation, &params).await,
            Client::Table(client) => crate::table::invoke(client, operation, &params).await,
            Client::Topic(client) => crate::topic::invoke(client, operation, &params).await,
            Client::Logs(client) => crate::logs::invoke(client, operation, &params).await,
        }
    }

    async fn wait_until_exists(
        &self,
        identity: &ResourceIdentity,
    ) -> std::result::Result<(), TransportError> {
        match &self.client {
            Client::Storage(client) => {
                use aws_sdk_s3::client::Waiters as _;
                client
                    .wait_until_bucket_exists()
                    .bucket(&identity.name)
                    .wait(self.waiter_timeout)
                    .await
                    .map_err(|e| waiter_error(identity, e))?;
                Ok(())
            }
            Client::Table(client) => {
                use aws_sdk_dynamodb::client::Waiters as _;
                client
                    .wait_until_table_exists()
                    .table_name(&identity.name)
                    .wait(self.waiter_timeout)
                    .await
                    .map_err(|e| waiter_error(identity, e))?;
                Ok(())
            }
            Client::Topic(_) | Client::Logs(_) => self.poll(identity, true).await,
        }
    }

    async fn wait_until_not_exists(
        &self,
        identity: &ResourceIdentity,
    ) -> std::result::Result<(), TransportError> {
        match &self.client {
            Client::Storage(client) => {
                use aws_sdk_s3::client::Waiters as _;
                client
                    .wait_until_bucket_not_exists()
                    .bucket(&identity.name)
                    .wait(self.waiter_timeout)
                    .await
                    .map_err(|e| waiter_error(identity, e))?;
                Ok(())
            }
            Client::Table(client) => {
                use aws_sdk_dynamodb::client::Waiters as _;
                client
                    .wait_until_table_not_exists()
                    .table_name(&identity.name)
                    .wait(self.waiter_timeout)
                    .await
                    .map_err(|e| waiter_error(identity, e))?;
                Ok(())
            }
            Client::Topic(_) | Client::Logs(_) => self.poll(identity, false).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reachability_requests_are_single_item_reads() {
        assert_eq!(reachability_request(Service::Storage).0, "ListBuckets");
        assert_eq!(reachability_request(Service::Table).1, json!({"Limit": 1}));
        assert_eq!(reachability_request(Service::Logs).0, "DescribeLogGroups");
    }

    #[test]
    fn test_not_found_codes() {
        assert!(is_not_found(&TransportError::new("NoSuchBucket", "")));
        assert!(is_not_found(&TransportError::new("ResourceNotFoundException", "")));
        assert!(!is_not_found(&TransportError::new("AccessDenied", "")));
    }

    #[tokio::test]
    async fn test_invalid_profile_is_rejected_before_any_call() {
        let mut profile = Profile::new("broken");
        profile.endpoint = Some("ftp://localhost".to_string());
        let err = AwsTransport::open(Service::Storage, &profile, Some("us-east-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
