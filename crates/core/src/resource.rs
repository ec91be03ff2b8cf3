//! Uniform CRUD contract over top-level resources
//!
//! Each family façade implements [`ResourceManager`], so buckets, tables,
//! topics and log groups can be created, read, updated, deleted and listed
//! the same way.

use async_trait::async_trait;
use futures::Stream;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identity::{ResourceIdentity, ResourceKind};
use crate::listing::{ListOptions, ListingPage, paginate};
use crate::value::Item;

/// Summary of a top-level resource in a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub kind: ResourceKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<Timestamp>,
}

impl ResourceSummary {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            arn: None,
            created: None,
        }
    }
}

/// CRUD and listing over one resource family
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Kind of resource this manager handles
    fn kind(&self) -> ResourceKind;

    /// Create the resource; `AlreadyExists` when it is already there
    /// (families whose provider create is idempotent return the existing one)
    async fn create(&self, identity: &ResourceIdentity, attributes: Item) -> Result<Item>;

    /// Current attributes, or `None` when the resource does not exist
    async fn get(&self, identity: &ResourceIdentity) -> Result<Option<Item>>;

    /// Apply exactly the attributes in `partial`
    async fn update(&self, identity: &ResourceIdentity, partial: Item) -> Result<Item>;

    /// Delete the resource; `false` when the remote side did not confirm
    async fn delete(&self, identity: &ResourceIdentity) -> Result<bool>;

    /// One page of resources, one remote round-trip
    async fn list(&self, options: &ListOptions) -> Result<ListingPage<ResourceSummary>>;

    /// Get the resource, creating it when absent
    ///
    /// A create that loses a race against a concurrent creator is followed
    /// by a single re-read.
    async fn get_or_create(&self, identity: &ResourceIdentity, attributes: Item) -> Result<Item> {
        if let Some(existing) = self.get(identity).await? {
            return Ok(existing);
        }
        match self.create(identity, attributes).await {
            Ok(created) => Ok(created),
            Err(Error::AlreadyExists(_)) => {
                tracing::debug!(resource = %identity, "Lost create race, re-reading");
                self.get(identity)
                    .await?
                    .ok_or_else(|| Error::NotFound(identity.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

/// Lazily list every resource matching `options`, following tokens
pub fn list_all<'a, M>(
    manager: &'a M,
    options: ListOptions,
) -> impl Stream<Item = Result<ResourceSummary>> + Send + 'a
where
    M: ResourceManager + ?Sized,
{
    paginate(move |token| {
        let options = options.at(token);
        async move { manager.list(&options).await }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item;
    use crate::listing::collect_all;
    use std::sync::Mutex;

    /// Manager whose create always races and loses
    struct Racing {
        gets: Mutex<u32>,
        pages: Vec<Vec<&'static str>>,
    }

    #[async_trait]
    impl ResourceManager for Racing {
        fn kind(&self) -> ResourceKind {
            ResourceKind::LogGroup
        }

        async fn create(&self, identity: &ResourceIdentity, _: Item) -> Result<Item> {
            Err(Error::AlreadyExists(identity.to_string()))
        }

        async fn get(&self, identity: &ResourceIdentity) -> Result<Option<Item>> {
            let mut gets = self.gets.lock().unwrap();
            *gets += 1;
            Ok((*gets > 1).then(|| item! {"logGroupName" => identity.name.as_str()}))
        }

        async fn update(&self, _: &ResourceIdentity, partial: Item) -> Result<Item> {
            Ok(partial)
        }

        async fn delete(&self, _: &ResourceIdentity) -> Result<bool> {
            Ok(true)
        }

        async fn list(&self, options: &ListOptions) -> Result<ListingPage<ResourceSummary>> {
            let index: usize = options
                .continuation_token
                .as_deref()
                .map(|t| t.parse().unwrap())
                .unwrap_or(0);
            let items = self.pages[index]
                .iter()
                .map(|name| ResourceSummary::new(ResourceKind::LogGroup, *name))
                .collect();
            let next = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
            Ok(ListingPage::new(items, next))
        }
    }

    fn racing() -> Racing {
        Racing {
            gets: Mutex::new(0),
            pages: vec![vec!["a", "b"], vec!["c"]],
        }
    }

    #[tokio::test]
    async fn test_get_or_create_rereads_after_race() {
        let manager = racing();
        let id = ResourceIdentity::log_group("/app/web");
        let item = manager.get_or_create(&id, Item::new()).await.unwrap();
        assert_eq!(item["logGroupName"].as_str(), Some("/app/web"));
        assert_eq!(*manager.gets.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_all_follows_tokens() {
        let manager = racing();
        let names: Vec<String> = collect_all(list_all(&manager, ListOptions::default()))
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
