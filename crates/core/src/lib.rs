//! nb-core: Core library for the nimbus cloud resource façade
//!
//! This crate provides the provider-neutral part of nimbus, including:
//! - Resource identities and key schemas
//! - Typed attribute values and items
//! - CRUD, listing and batch façades over storage, tables, topics and logs
//! - Predicates and the condition/update expressions they render to
//! - Profile and configuration management
//!
//! Every façade talks to a [`Transport`], so the crate is independent of any
//! provider SDK. [`MemoryTransport`] simulates all four service families in
//! process for tests and offline use.

pub mod batch;
mod client;
pub mod config;
pub mod error;
pub mod expression;
pub mod identity;
pub mod listing;
pub mod logs;
pub mod memory;
pub mod predicate;
pub mod resource;
pub mod retry;
pub mod storage;
pub mod table;
pub mod topic;
pub mod transport;
pub mod value;

pub use batch::{BatchOperation, BatchPolicy, BatchResult, send_in_chunks};
pub use config::{BatchConfig, Config, ConfigManager, Profile, ProfileManager, RetryConfig};
pub use error::{Error, Result, TransportError};
pub use identity::{KeyAttribute, KeyRole, KeySchema, ResourceIdentity, ResourceKind, ScalarType};
pub use listing::{ListOptions, ListingPage, collect_all, paginate};
pub use logs::{EventFilter, LogEvent, LogStream, LogsClient};
pub use memory::MemoryTransport;
pub use predicate::{Condition, Predicate, attr};
pub use resource::{ResourceManager, ResourceSummary, list_all};
pub use retry::{is_retryable_error, retry_with_backoff};
pub use storage::{ObjectData, ObjectSummary, ObjectVersion, StorageClient, VersioningStatus};
pub use table::{Table, TableClient};
pub use topic::{Subscription, TopicClient, topic_name};
pub use transport::{Service, Transport};
pub use value::{AttributeValue, Item, Number};
