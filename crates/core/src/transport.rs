//! Cloud transport boundary
//!
//! The façade never talks to a provider SDK directly. Every remote call goes
//! through [`Transport::invoke`] with the provider's operation name and a
//! JSON parameter document shaped like the provider API, and the raw JSON
//! response comes back for the façade to normalize.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;
use crate::identity::ResourceIdentity;

/// Remote service family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    /// Object storage (S3)
    Storage,
    /// Key-value tables (DynamoDB)
    Table,
    /// Pub/sub topics (SNS)
    Topic,
    /// Log aggregation (CloudWatch Logs)
    Logs,
}

impl Service {
    /// Provider service identifier
    pub fn as_str(self) -> &'static str {
        match self {
            Service::Storage => "s3",
            Service::Table => "dynamodb",
            Service::Topic => "sns",
            Service::Logs => "logs",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Service {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "s3" | "storage" => Ok(Service::Storage),
            "dynamodb" | "table" => Ok(Service::Table),
            "sns" | "topic" => Ok(Service::Topic),
            "logs" | "cloudwatchlogs" => Ok(Service::Logs),
            _ => Err(format!("Invalid service: {s}")),
        }
    }
}

/// Transport to one remote service family
///
/// Implementations own credential and region resolution, network I/O and
/// any SDK-internal retries. A handle is bound to the families reported by
/// [`Transport::serves`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether this handle can route calls for `service`
    fn serves(&self, service: Service) -> bool;

    /// Issue one remote call and return the raw response document
    async fn invoke(
        &self,
        service: Service,
        operation: &str,
        params: Value,
    ) -> Result<Value, TransportError>;

    /// Block until the top-level resource exists
    async fn wait_until_exists(&self, identity: &ResourceIdentity) -> Result<(), TransportError>;

    /// Block until the top-level resource is gone
    async fn wait_until_not_exists(
        &self,
        identity: &ResourceIdentity,
    ) -> Result<(), TransportError>;
}
