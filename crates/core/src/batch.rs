//! Batch mutation
//!
//! Splits an ordered list of operations into chunks no larger than the
//! provider limit, sends one request per chunk in order, and re-submits
//! whatever the remote side reports as unprocessed (or a whole chunk
//! rejected as throttled) a bounded number of times. Anything still
//! unprocessed afterwards is handed back to the caller.

use serde::{Deserialize, Serialize};

use crate::config::{BatchConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::calculate_backoff;
use crate::value::Item;

/// One write in a table batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOperation {
    /// Insert or replace a full item
    Put(Item),
    /// Delete by key
    Delete(Item),
}

impl BatchOperation {
    pub fn item(&self) -> &Item {
        match self {
            BatchOperation::Put(item) | BatchOperation::Delete(item) => item,
        }
    }
}

/// Outcome of a chunked batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult<T> {
    /// Number of chunks the input was split into
    pub chunks: usize,
    /// Remote requests issued, including re-submissions
    pub requests: usize,
    /// Re-submissions of unprocessed items
    pub retries: u32,
    /// Items the remote side accepted
    pub processed: usize,
    /// Items still unprocessed after the retry budget, in input order
    pub unprocessed: Vec<T>,
}

impl<T> BatchResult<T> {
    fn new() -> Self {
        Self {
            chunks: 0,
            requests: 0,
            retries: 0,
            processed: 0,
            unprocessed: Vec::new(),
        }
    }

    /// Whether every item was processed
    pub fn is_complete(&self) -> bool {
        self.unprocessed.is_empty()
    }
}

/// Chunk size and retry budget for one kind of batch request
#[derive(Debug, Clone)]
pub struct BatchPolicy {
    pub chunk_size: usize,
    pub max_retries: u32,
    pub backoff: RetryConfig,
}

impl BatchPolicy {
    /// Policy for table batch writes
    pub fn table(config: &BatchConfig) -> Self {
        Self {
            chunk_size: config.table_chunk_size.clamp(1, BatchConfig::TABLE_CHUNK_LIMIT),
            max_retries: config.max_retries,
            backoff: config.backoff(),
        }
    }

    /// Policy for multi-object deletes
    pub fn delete(config: &BatchConfig) -> Self {
        Self {
            chunk_size: config
                .delete_chunk_size
                .clamp(1, BatchConfig::DELETE_CHUNK_LIMIT),
            max_retries: config.max_retries,
            backoff: config.backoff(),
        }
    }
}

/// Send `items` in order, one chunk per request, retrying unprocessed items
///
/// `send` submits one chunk and returns the items the remote side did not
/// process, in their original relative order. A `Throttled` error counts as
/// the whole chunk being unprocessed; any other error aborts the batch.
pub async fn send_in_chunks<T, F, Fut>(
    items: Vec<T>,
    policy: &BatchPolicy,
    mut send: F,
) -> Result<BatchResult<T>>
where
    T: Clone,
    F: FnMut(Vec<T>) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<T>>>,
{
    let mut result = BatchResult::new();
    let chunk_size = policy.chunk_size.max(1);
    let mut remaining = items.into_iter().peekable();

    while remaining.peek().is_some() {
        let chunk: Vec<T> = remaining.by_ref().take(chunk_size).collect();
        result.chunks += 1;

        let mut pending = chunk;
        let mut attempt = 0u32;
        loop {
            result.requests += 1;
            let submitted = pending.len();

            let leftover = match send(pending.clone()).await {
                Ok(leftover) => leftover,
                Err(Error::Throttled(msg)) => {
                    tracing::debug!(chunk = result.chunks, error = %msg, "Chunk throttled");
                    pending
                }
                Err(e) => return Err(e),
            };
            result.processed += submitted.saturating_sub(leftover.len());

            if leftover.is_empty() {
                break;
            }
            if attempt >= policy.max_retries {
                tracing::warn!(
                    chunk = result.chunks,
                    unprocessed = leftover.len(),
                    "Batch retries exhausted"
                );
                result.unprocessed.extend(leftover);
                break;
            }

            attempt += 1;
            result.retries += 1;
            let backoff = calculate_backoff(&policy.backoff, attempt);
            tracing::debug!(
                chunk = result.chunks,
                attempt = attempt,
                unprocessed = leftover.len(),
                backoff_ms = backoff.as_millis(),
                "Re-submitting unprocessed items"
            );
            tokio::time::sleep(backoff).await;
            pending = leftover;
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn policy(chunk_size: usize, max_retries: u32) -> BatchPolicy {
        BatchPolicy {
            chunk_size,
            max_retries,
            backoff: RetryConfig {
                max_attempts: max_retries + 1,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
            },
        }
    }

    #[tokio::test]
    async fn test_chunks_preserve_order() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let log = sent.clone();

        let result = send_in_chunks((0..200).collect(), &policy(25, 3), |chunk: Vec<u32>| {
            log.lock().unwrap().push(chunk);
            async { Ok(Vec::new()) }
        })
        .await
        .unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(result.chunks, 8);
        assert_eq!(result.requests, 8);
        assert_eq!(result.processed, 200);
        assert!(result.is_complete());
        assert!(sent.iter().all(|c| c.len() == 25));
        let flattened: Vec<u32> = sent.iter().flatten().copied().collect();
        assert_eq!(flattened, (0..200).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_partial_chunk_at_end() {
        let result = send_in_chunks((0..30).collect(), &policy(25, 0), |_: Vec<u32>| async {
            Ok(Vec::new())
        })
        .await
        .unwrap();
        assert_eq!(result.chunks, 2);
        assert_eq!(result.processed, 30);
    }

    #[tokio::test]
    async fn test_unprocessed_items_are_resubmitted() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let log = sent.clone();

        // Full chunks come back with their odd items unprocessed
        let result = send_in_chunks((0..10).collect(), &policy(5, 3), |chunk: Vec<u32>| {
            log.lock().unwrap().extend(chunk.iter().copied());
            let leftover: Vec<u32> = if chunk.len() == 5 {
                chunk.into_iter().filter(|i| i % 2 == 1).collect()
            } else {
                Vec::new()
            };
            async move { Ok(leftover) }
        })
        .await
        .unwrap();

        assert_eq!(result.chunks, 2);
        assert_eq!(result.requests, 4);
        assert_eq!(result.retries, 2);
        assert_eq!(result.processed, 10);
        assert!(result.is_complete());
        assert_eq!(
            *sent.lock().unwrap(),
            vec![0, 1, 2, 3, 4, 1, 3, 5, 6, 7, 8, 9, 5, 7, 9]
        );
    }

    #[tokio::test]
    async fn test_throttled_chunk_counts_as_unprocessed() {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();

        let result = send_in_chunks((0..3).collect(), &policy(25, 2), |_: Vec<u32>| {
            *counter.lock().unwrap() += 1;
            async { Err(Error::Throttled("ProvisionedThroughputExceeded".to_string())) }
        })
        .await
        .unwrap();

        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(result.retries, 2);
        assert_eq!(result.processed, 0);
        assert_eq!(result.unprocessed, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_other_errors_abort() {
        let result = send_in_chunks((0..3).collect(), &policy(25, 2), |_: Vec<u32>| async {
            Err(Error::Auth("expired".to_string()))
        })
        .await;
        assert!(matches!(result, Err(Error::Auth(_))));
    }

    #[tokio::test]
    async fn test_empty_input_sends_nothing() {
        let mut calls = 0;
        let result = send_in_chunks(Vec::<u32>::new(), &policy(25, 2), |_| {
            calls += 1;
            async { Ok(Vec::new()) }
        })
        .await
        .unwrap();
        assert_eq!(calls, 0);
        assert_eq!(result.chunks, 0);
        assert_eq!(result.requests, 0);
    }

    #[test]
    fn test_policies_clamp_to_provider_limits() {
        let config = BatchConfig {
            table_chunk_size: 500,
            delete_chunk_size: 5000,
            ..Default::default()
        };
        assert_eq!(BatchPolicy::table(&config).chunk_size, 25);
        assert_eq!(BatchPolicy::delete(&config).chunk_size, 1000);
    }
}
