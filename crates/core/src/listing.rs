//! Paginated listing
//!
//! Every list operation returns one [`ListingPage`] per remote round-trip.
//! [`paginate`] turns a page-fetching closure into a lazy, forward-only
//! stream of items that follows continuation tokens until the remote side
//! stops returning one.

use futures::{Stream, StreamExt, TryStreamExt, stream};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingPage<T> {
    pub items: Vec<T>,
    /// Opaque cursor for the next page; `None` marks the end of the sequence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
}

impl<T> ListingPage<T> {
    pub fn new(items: Vec<T>, continuation_token: Option<String>) -> Self {
        Self {
            items,
            continuation_token,
        }
    }

    /// Whether more pages follow
    pub fn has_more(&self) -> bool {
        self.continuation_token.is_some()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> ListingPage<U> {
        ListingPage {
            items: self.items.into_iter().map(f).collect(),
            continuation_token: self.continuation_token,
        }
    }
}

/// Options for list operations
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Name prefix, evaluated by the remote service
    pub prefix: Option<String>,
    /// Page size hint
    pub max_keys: Option<i32>,
    /// Token returned by the previous page
    pub continuation_token: Option<String>,
}

impl ListOptions {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Default::default()
        }
    }

    /// Same options positioned at `token`
    pub fn at(&self, token: Option<String>) -> Self {
        Self {
            continuation_token: token,
            ..self.clone()
        }
    }
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Lazily follow continuation tokens, yielding items in order
///
/// `fetch` receives `None` for the first page and the previous page's token
/// afterwards. Errors end the stream after being yielded.
pub fn paginate<'a, T, F, Fut>(mut fetch: F) -> impl Stream<Item = Result<T>> + Send + 'a
where
    T: Send + 'a,
    F: FnMut(Option<String>) -> Fut + Send + 'a,
    Fut: std::future::Future<Output = Result<ListingPage<T>>> + Send + 'a,
{
    stream::try_unfold(Cursor::Start, move |cursor| {
        let token = match cursor {
            Cursor::Start => Some(None),
            Cursor::Next(token) => Some(Some(token)),
            Cursor::Done => None,
        };
        let next_page = token.map(&mut fetch);
        async move {
            let Some(next_page) = next_page else {
                return Ok(None);
            };
            let page = next_page.await?;
            let cursor = match page.continuation_token {
                Some(token) => Cursor::Next(token),
                None => Cursor::Done,
            };
            Ok::<_, Error>(Some((
                stream::iter(page.items.into_iter().map(Ok::<T, Error>)),
                cursor,
            )))
        }
    })
    .try_flatten()
    .boxed()
}

/// Drain a paginated stream into a vector
pub async fn collect_all<T>(stream: impl Stream<Item = Result<T>>) -> Result<Vec<T>> {
    stream.try_collect().await
}

/// Encode a structured provider cursor as an opaque token
pub fn encode_token<C: Serialize>(cursor: &C) -> Result<String> {
    Ok(serde_json::to_string(cursor)?)
}

/// Decode a token produced by [`encode_token`]
pub fn decode_token<C: DeserializeOwned>(token: &str) -> Result<C> {
    serde_json::from_str(token)
        .map_err(|e| Error::General(format!("Invalid continuation token: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn page_of(all: &[u32], token: Option<String>, size: usize) -> ListingPage<u32> {
        let start: usize = token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let end = (start + size).min(all.len());
        let next = (end < all.len()).then(|| end.to_string());
        ListingPage::new(all[start..end].to_vec(), next)
    }

    #[tokio::test]
    async fn test_paginate_follows_tokens() {
        let all: Vec<u32> = (0..23).collect();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let data = all.clone();

        let items = collect_all(paginate(move |token| {
            counter.fetch_add(1, Ordering::SeqCst);
            let page = page_of(&data, token, 5);
            async move { Ok(page) }
        }))
        .await
        .unwrap();

        assert_eq!(items, all);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_paginate_is_lazy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let data: Vec<u32> = (0..10).collect();

        let mut stream = Box::pin(paginate(move |token| {
            counter.fetch_add(1, Ordering::SeqCst);
            let page = page_of(&data, token, 3);
            async move { Ok(page) }
        }));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_paginate_propagates_errors() {
        let result: Result<Vec<u32>> = collect_all(paginate(|token: Option<String>| async move {
            match token {
                None => Ok(ListingPage::new(vec![1], Some("next".to_string()))),
                Some(_) => Err(Error::Connection("timeout".to_string())),
            }
        }))
        .await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }

    #[test]
    fn test_token_roundtrip() {
        let token = encode_token(&("key/a", "v1")).unwrap();
        let decoded: (String, String) = decode_token(&token).unwrap();
        assert_eq!(decoded, ("key/a".to_string(), "v1".to_string()));
        assert!(decode_token::<(String, String)>("garbage").is_err());
    }
}
