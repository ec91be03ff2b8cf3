//! In-memory transport
//!
//! [`MemoryTransport`] simulates the four service families in process. It
//! speaks the same operation names and parameter documents as the AWS
//! transport, evaluates rendered condition and update expressions with the
//! expression parser, and pages every listing, so façade code runs against
//! it unchanged. Faults (errors, unprocessed batch items, non-2xx statuses)
//! can be injected for tests.

mod logs;
mod storage;
mod table;
mod topic;

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use jiff::{SignedDuration, Timestamp};
use serde_json::{Value, json};

use crate::error::TransportError;
use crate::identity::{ResourceIdentity, ResourceKind};
use crate::transport::{Service, Transport};

/// Account id used in simulated ARNs
pub const ACCOUNT_ID: &str = "000000000000";

/// Items per page when a request does not ask for fewer
pub const DEFAULT_PAGE_SIZE: usize = 1000;

type Reply = std::result::Result<Value, TransportError>;

fn fail(code: &str, message: impl Into<String>) -> TransportError {
    TransportError::new(code, message)
}

fn unknown_operation(service: Service, operation: &str) -> TransportError {
    fail(
        TransportError::UNKNOWN_OPERATION,
        format!("{service} has no operation {operation}"),
    )
}

/// String parameter that must be present, failing with `code` otherwise
fn required<'a>(params: &'a Value, key: &str, code: &str) -> Result<&'a str, TransportError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| fail(code, format!("Missing required parameter '{key}'")))
}

fn optional<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

/// Page size for a request: its own limit when smaller than the transport's
fn page_limit(params: &Value, key: &str, page_size: usize) -> usize {
    params
        .get(key)
        .and_then(Value::as_u64)
        .map(|limit| (limit as usize).clamp(1, page_size))
        .unwrap_or(page_size)
}

/// Per-call view of the transport settings and fault budget
struct Context<'a> {
    now: Timestamp,
    region: &'a str,
    page_size: usize,
    unprocessed_budget: &'a mut usize,
}

impl Context<'_> {
    /// How many of `n` batch entries to report unprocessed
    fn take_unprocessed(&mut self, n: usize) -> usize {
        let taken = n.min(*self.unprocessed_budget);
        *self.unprocessed_budget -= taken;
        taken
    }
}

#[derive(Default)]
struct State {
    storage: storage::StorageState,
    tables: table::TableState,
    topics: topic::TopicState,
    logs: logs::LogsState,
    clock: Option<Timestamp>,
    unprocessed_budget: usize,
    failures: HashMap<String, VecDeque<TransportError>>,
    statuses: HashMap<String, u16>,
    calls: Vec<(Service, String)>,
}

impl State {
    /// Strictly increasing timestamps, so writes within one millisecond still order
    fn tick(&mut self) -> Timestamp {
        let now = Timestamp::now();
        let next = match self.clock {
            Some(last) => last
                .checked_add(SignedDuration::from_millis(1))
                .map_or(now, |after| after.max(now)),
            None => now,
        };
        self.clock = Some(next);
        next
    }
}

/// In-process simulation of object storage, tables, topics and logs
pub struct MemoryTransport {
    state: Mutex<State>,
    services: Vec<Service>,
    region: String,
    page_size: usize,
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("services", &self.services)
            .field("region", &self.region)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Transport serving every service family
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            services: vec![
                Service::Storage,
                Service::Table,
                Service::Topic,
                Service::Logs,
            ],
            region: "us-east-1".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Transport bound to a single service family
    pub fn only(service: Service) -> Self {
        Self {
            services: vec![service],
            ..Self::new()
        }
    }

    /// Cap every listing page at `page_size` items
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail the next call of `operation` with `error`
    pub fn fail_next(&self, operation: &str, error: TransportError) {
        self.lock()
            .failures
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    /// Report the last `count` entries of upcoming batch requests as unprocessed
    ///
    /// The budget is shared by table batch writes and multi-object deletes and
    /// is consumed as entries are reported.
    pub fn leave_unprocessed(&self, count: usize) {
        self.lock().unprocessed_budget += count;
    }

    /// Stamp the next response of `operation` with HTTP status `status`
    pub fn respond_with_status(&self, operation: &str, status: u16) {
        self.lock().statuses.insert(operation.to_string(), status);
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<(Service, String)> {
        self.lock().calls.clone()
    }

    /// Number of calls of `operation` made so far
    pub fn call_count(&self, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|(_, op)| op == operation)
            .count()
    }

    /// Messages published to `topic_arn`, oldest first, as `(subject, message)`
    pub fn published(&self, topic_arn: &str) -> Vec<(Option<String>, String)> {
        self.lock().topics.published(topic_arn)
    }

    fn exists(&self, identity: &ResourceIdentity) -> bool {
        let state = self.lock();
        match identity.kind {
            ResourceKind::StorageBucket => state.storage.contains(&identity.name),
            ResourceKind::Table => state.tables.contains(&identity.name),
            ResourceKind::Topic => state.topics.contains(&identity.name),
            ResourceKind::LogGroup => state.logs.contains(&identity.name),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn serves(&self, service: Service) -> bool {
        self.services.contains(&service)
    }

    async fn invoke(&self, service: Service, operation: &str, params: Value) -> Reply {
        if !self.serves(service) {
            return Err(unknown_operation(service, operation));
        }

        let mut state = self.lock();
        state.calls.push((service, operation.to_string()));
        if let Some(error) = state
            .failures
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            tracing::debug!(service = %service, operation = operation, code = %error.code, "Injected failure");
            return Err(error);
        }

        let now = state.tick();
        let State {
            storage,
            tables,
            topics,
            logs,
            unprocessed_budget,
            ..
        } = &mut *state;
        let mut ctx = Context {
            now,
            region: &self.region,
            page_size: self.page_size,
            unprocessed_budget,
        };

        let mut response = match service {
            Service::Storage => storage.handle(&mut ctx, operation, &params),
            Service::Table => tables.handle(&mut ctx, operation, &params),
            Service::Topic => topics.handle(&mut ctx, operation, &params),
            Service::Logs => logs.handle(&mut ctx, operation, &params),
        }?;

        let status = state.statuses.remove(operation).unwrap_or(200);
        if let Value::Object(map) = &mut response {
            map.insert(
                "ResponseMetadata".to_string(),
                json!({"HTTPStatusCode": status}),
            );
        }
        Ok(response)
    }

    async fn wait_until_exists(&self, identity: &ResourceIdentity) -> Result<(), TransportError> {
        if self.exists(identity) {
            Ok(())
        } else {
            Err(fail(
                TransportError::WAITER_TIMEOUT,
                format!("{identity} never became available"),
            ))
        }
    }

    async fn wait_until_not_exists(
        &self,
        identity: &ResourceIdentity,
    ) -> Result<(), TransportError> {
        if self.exists(identity) {
            Err(fail(
                TransportError::WAITER_TIMEOUT,
                format!("{identity} was never removed"),
            ))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let transport = MemoryTransport::new();
        transport.fail_next(
            "ListBuckets",
            TransportError::new(TransportError::TIMEOUT, "slow"),
        );

        let first = transport
            .invoke(Service::Storage, "ListBuckets", json!({}))
            .await;
        assert_eq!(first.unwrap_err().code, TransportError::TIMEOUT);
        let second = transport
            .invoke(Service::Storage, "ListBuckets", json!({}))
            .await
            .unwrap();
        assert_eq!(second["ResponseMetadata"]["HTTPStatusCode"], 200);
        assert_eq!(transport.call_count("ListBuckets"), 2);
    }

    #[tokio::test]
    async fn test_status_override_applies_once() {
        let transport = MemoryTransport::new();
        transport.respond_with_status("ListTables", 503);
        let first = transport
            .invoke(Service::Table, "ListTables", json!({}))
            .await
            .unwrap();
        assert_eq!(first["ResponseMetadata"]["HTTPStatusCode"], 503);
        let second = transport
            .invoke(Service::Table, "ListTables", json!({}))
            .await
            .unwrap();
        assert_eq!(second["ResponseMetadata"]["HTTPStatusCode"], 200);
    }

    #[tokio::test]
    async fn test_single_family_transport() {
        let transport = MemoryTransport::only(Service::Logs);
        assert!(transport.serves(Service::Logs));
        assert!(!transport.serves(Service::Storage));
        let err = transport
            .invoke(Service::Storage, "ListBuckets", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code, TransportError::UNKNOWN_OPERATION);
    }

    #[test]
    fn test_clock_is_strictly_increasing() {
        let mut state = State::default();
        let a = state.tick();
        let b = state.tick();
        let c = state.tick();
        assert!(a < b && b < c);
    }
}
