//! nb-aws: AWS SDK transport for nimbus
//!
//! [`AwsTransport`] implements the nb-core `Transport` trait over the
//! official SDK crates, one handle per service family:
//! - object storage over `aws-sdk-s3`
//! - tables over `aws-sdk-dynamodb`
//! - topics over `aws-sdk-sns`
//! - log groups over `aws-sdk-cloudwatchlogs`
//!
//! Parameter and response documents use the provider API names, so the
//! nb-core façades run unchanged against this transport and the in-memory one.

mod convert;
mod error;
mod logs;
mod storage;
mod table;
mod topic;
mod transport;

pub use transport::{AwsTransport, DEFAULT_WAITER_TIMEOUT};
