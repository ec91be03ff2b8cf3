//! Shared state for one command invocation

use std::future::Future;
use std::sync::Arc;

use nb_aws::AwsTransport;
use nb_core::{
    Config, ConfigManager, Error, LogsClient, Profile, Result, Service, StorageClient,
    TableClient, TopicClient, Transport, is_retryable_error, retry_with_backoff,
};

use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Configuration, selected profile and output for a command
pub struct Session {
    pub formatter: Formatter,
    config: Config,
    profile: Profile,
    region: Option<String>,
}

impl Session {
    /// Load the configuration and resolve the profile named on the command line
    pub fn load(
        formatter: Formatter,
        profile: Option<&str>,
        region: Option<String>,
    ) -> Result<Self> {
        let config = ConfigManager::new()?.load()?;
        let profile = config.resolve_profile(profile)?;
        tracing::debug!(profile = %profile.name, "Profile selected");
        Ok(Self {
            formatter,
            config,
            profile,
            region,
        })
    }

    async fn transport(&self, service: Service) -> Result<Arc<dyn Transport>> {
        let transport = AwsTransport::open(service, &self.profile, self.region.as_deref()).await?;
        Ok(Arc::new(transport))
    }

    pub async fn storage(&self) -> Result<StorageClient> {
        Ok(StorageClient::new(self.transport(Service::Storage).await?)?
            .with_batch_config(&self.config.batch))
    }

    pub async fn tables(&self) -> Result<TableClient> {
        Ok(TableClient::new(self.transport(Service::Table).await?)?
            .with_batch_config(&self.config.batch))
    }

    pub async fn topics(&self) -> Result<TopicClient> {
        TopicClient::new(self.transport(Service::Topic).await?)
    }

    pub async fn logs(&self) -> Result<LogsClient> {
        LogsClient::new(self.transport(Service::Logs).await?)
    }

    /// Run a read-only operation, retrying transient failures
    pub async fn read<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry_with_backoff(&self.config.retry, operation, is_retryable_error).await
    }

    /// Report a failed operation and pick the exit code
    pub fn fail(&self, action: &str, error: &Error) -> ExitCode {
        self.formatter.error(&format!("{action}: {error}"));
        ExitCode::from_error(error)
    }
}
