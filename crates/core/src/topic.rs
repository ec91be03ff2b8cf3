//! Pub/sub topic façade
//!
//! Topics are addressed by ARN; an identity holding a bare name is resolved
//! to its ARN by listing topics.

use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::client::{
    Endpoint, array_field, best_effort_delete, required_str, str_field, string_map_item,
};
use crate::error::{Error, Result};
use crate::identity::{ResourceIdentity, ResourceKind};
use crate::listing::{ListOptions, ListingPage, paginate};
use crate::resource::{ResourceManager, ResourceSummary};
use crate::transport::{Service, Transport};
use crate::value::{AttributeValue, Item};

/// Subscription of an endpoint to a topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_arn: String,
    pub topic_arn: String,
    pub protocol: String,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl Subscription {
    fn from_response(value: &Value) -> Result<Self> {
        Ok(Self {
            subscription_arn: required_str(value, "SubscriptionArn")?,
            topic_arn: required_str(value, "TopicArn")?,
            protocol: required_str(value, "Protocol")?,
            endpoint: str_field(value, "Endpoint").unwrap_or_default(),
            owner: str_field(value, "Owner"),
        })
    }
}

pub fn is_arn(name: &str) -> bool {
    name.starts_with("arn:")
}

/// Topic name from an ARN (`arn:aws:sns:region:account:name`) or a bare name
pub fn topic_name(name_or_arn: &str) -> &str {
    if is_arn(name_or_arn) {
        name_or_arn.rsplit(':').next().unwrap_or(name_or_arn)
    } else {
        name_or_arn
    }
}

fn attribute_text(value: &AttributeValue) -> String {
    match value {
        AttributeValue::S(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Topic client
#[derive(Debug, Clone)]
pub struct TopicClient {
    endpoint: Endpoint,
}

impl TopicClient {
    /// Create a client over a transport that serves topics
    pub fn new(transport: Arc<dyn Transport>) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(transport, Service::Topic)?,
        })
    }

    /// ARN of the topic, or `None` when no topic has that name
    pub async fn resolve_arn(&self, identity: &ResourceIdentity) -> Result<Option<String>> {
        identity.expect_kind(ResourceKind::Topic)?;
        if is_arn(&identity.name) {
            return Ok(Some(identity.name.clone()));
        }

        let suffix = format!(":{}", identity.name);
        let mut topics = Box::pin(paginate(|token| async move { self.list_page(token).await }));
        while let Some(topic) = topics.try_next().await? {
            if let Some(arn) = topic.arn.filter(|arn| arn.ends_with(&suffix)) {
                return Ok(Some(arn));
            }
        }
        Ok(None)
    }

    async fn require_arn(&self, identity: &ResourceIdentity) -> Result<String> {
        self.resolve_arn(identity)
            .await?
            .ok_or_else(|| Error::NotFound(identity.to_string()))
    }

    async fn list_page(&self, token: Option<String>) -> Result<ListingPage<ResourceSummary>> {
        let mut params = Map::new();
        if let Some(token) = token {
            params.insert("NextToken".to_string(), json!(token));
        }
        let response = self
            .endpoint
            .call("ListTopics", Value::Object(params))
            .await?;

        let items = array_field(&response, "Topics")
            .iter()
            .map(|topic| {
                let arn = required_str(topic, "TopicArn")?;
                let mut summary = ResourceSummary::new(ResourceKind::Topic, topic_name(&arn));
                summary.arn = Some(arn);
                Ok(summary)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ListingPage::new(items, str_field(&response, "NextToken")))
    }

    /// Subscribe `endpoint` over `protocol` (`email`, `sqs`, `https`, ...)
    ///
    /// Returns the subscription ARN.
    pub async fn subscribe(
        &self,
        identity: &ResourceIdentity,
        protocol: &str,
        endpoint: &str,
    ) -> Result<String> {
        let arn = self.require_arn(identity).await?;
        let response = self
            .endpoint
            .call(
                "Subscribe",
                json!({
                    "TopicArn": arn,
                    "Protocol": protocol,
                    "Endpoint": endpoint,
                    "ReturnSubscriptionArn": true,
                }),
            )
            .await?;
        required_str(&response, "SubscriptionArn")
    }

    /// Remove a subscription; `false` when the service did not confirm
    pub async fn unsubscribe(&self, subscription_arn: &str) -> Result<bool> {
        let outcome = self
            .endpoint
            .call(
                "Unsubscribe",
                json!({"SubscriptionArn": subscription_arn}),
            )
            .await;
        best_effort_delete(
            &ResourceIdentity::topic(subscription_arn),
            "subscription",
            outcome,
        )
    }

    /// One page of subscriptions, across all topics or for one topic
    pub async fn list_subscriptions(
        &self,
        topic: Option<&ResourceIdentity>,
        token: Option<String>,
    ) -> Result<ListingPage<Subscription>> {
        let mut params = Map::new();
        let operation = match topic {
            Some(identity) => {
                params.insert("TopicArn".to_string(), json!(self.require_arn(identity).await?));
                "ListSubscriptionsByTopic"
            }
            None => "ListSubscriptions",
        };
        if let Some(token) = token {
            params.insert("NextToken".to_string(), json!(token));
        }

        let response = self.endpoint.call(operation, Value::Object(params)).await?;

        let items = array_field(&response, "Subscriptions")
            .iter()
            .map(Subscription::from_response)
            .collect::<Result<Vec<_>>>()?;
        Ok(ListingPage::new(items, str_field(&response, "NextToken")))
    }

    /// Publish a message; returns the message id
    pub async fn publish(
        &self,
        identity: &ResourceIdentity,
        message: &str,
        subject: Option<&str>,
    ) -> Result<String> {
        let arn = self.require_arn(identity).await?;
        let mut params = json!({"TopicArn": arn, "Message": message});
        if let Some(subject) = subject {
            params["Subject"] = json!(subject);
        }
        let response = self.endpoint.call("Publish", params).await?;
        required_str(&response, "MessageId")
    }
}

#[async_trait]
impl ResourceManager for TopicClient {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Topic
    }

    /// Provider topic creation is idempotent: an existing topic with the same
    /// name and attributes is returned as is.
    async fn create(&self, identity: &ResourceIdentity, attributes: Item) -> Result<Item> {
        identity.expect_kind(ResourceKind::Topic)?;
        let mut params = json!({"Name": topic_name(&identity.name)});
        if !attributes.is_empty() {
            let attributes: Map<String, Value> = attributes
                .iter()
                .map(|(k, v)| (k.clone(), json!(attribute_text(v))))
                .collect();
            params["Attributes"] = Value::Object(attributes);
        }

        let response = self.endpoint.call("CreateTopic", params).await?;
        let arn = required_str(&response, "TopicArn")?;
        tracing::debug!(topic = %arn, "Topic created");

        self.get(&ResourceIdentity::topic(arn.as_str()))
            .await?
            .ok_or_else(|| Error::NotFound(arn))
    }

    async fn get(&self, identity: &ResourceIdentity) -> Result<Option<Item>> {
        let Some(arn) = self.resolve_arn(identity).await? else {
            return Ok(None);
        };
        let response = match self
            .endpoint
            .call("GetTopicAttributes", json!({"TopicArn": arn}))
            .await
        {
            Ok(response) => response,
            Err(Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut item = response
            .get("Attributes")
            .map(string_map_item)
            .unwrap_or_default();
        item.insert("TopicArn".to_string(), arn.into());
        Ok(Some(item))
    }

    async fn update(&self, identity: &ResourceIdentity, partial: Item) -> Result<Item> {
        if partial.is_empty() {
            return Err(Error::InvalidItem("Nothing to update".to_string()));
        }
        if partial.contains_key("TopicArn") {
            return Err(Error::UnsupportedFeature(
                "TopicArn cannot be updated".to_string(),
            ));
        }
        let arn = self.require_arn(identity).await?;

        for (name, value) in &partial {
            self.endpoint
                .call(
                    "SetTopicAttributes",
                    json!({
                        "TopicArn": arn,
                        "AttributeName": name,
                        "AttributeValue": attribute_text(value),
                    }),
                )
                .await?;
        }

        self.get(&ResourceIdentity::topic(arn.as_str()))
            .await?
            .ok_or_else(|| Error::NotFound(arn))
    }

    async fn delete(&self, identity: &ResourceIdentity) -> Result<bool> {
        let Some(arn) = self.resolve_arn(identity).await? else {
            tracing::warn!(resource = %identity, "Topic to delete does not exist");
            return Ok(false);
        };
        // DeleteTopic succeeds for an unknown ARN
        if is_arn(&identity.name) {
            match self
                .endpoint
                .call("GetTopicAttributes", json!({"TopicArn": arn}))
                .await
            {
                Ok(_) => {}
                Err(Error::NotFound(_)) => {
                    tracing::warn!(resource = %identity, "Topic to delete does not exist");
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
        let outcome = self
            .endpoint
            .call("DeleteTopic", json!({"TopicArn": arn}))
            .await;
        best_effort_delete(identity, "topic", outcome)
    }

    async fn list(&self, options: &ListOptions) -> Result<ListingPage<ResourceSummary>> {
        if options.prefix.is_some() {
            return Err(Error::UnsupportedFeature(
                "Topic listing has no remote prefix filter".to_string(),
            ));
        }
        self.list_page(options.continuation_token.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn serving() -> MockTransport {
        let mut mock = MockTransport::new();
        mock.expect_serves()
            .returning(|service| service == Service::Topic);
        mock
    }

    #[test]
    fn test_topic_name() {
        assert_eq!(
            topic_name("arn:aws:sns:us-east-1:000000000000:orders"),
            "orders"
        );
        assert_eq!(topic_name("orders"), "orders");
    }

    #[tokio::test]
    async fn test_resolve_arn_follows_pages() {
        let mut mock = serving();
        mock.expect_invoke()
            .withf(|_, op, params| op == "ListTopics" && params.get("NextToken").is_none())
            .times(1)
            .returning(|_, _, _| {
                Ok(json!({
                    "Topics": [{"TopicArn": "arn:aws:sns:us-east-1:1:orders-dlq"}],
                    "NextToken": "p2",
                }))
            });
        mock.expect_invoke()
            .withf(|_, op, params| op == "ListTopics" && params["NextToken"] == "p2")
            .times(1)
            .returning(|_, _, _| {
                Ok(json!({"Topics": [{"TopicArn": "arn:aws:sns:us-east-1:1:orders"}]}))
            });

        let topics = TopicClient::new(Arc::new(mock)).unwrap();
        let arn = topics
            .resolve_arn(&ResourceIdentity::topic("orders"))
            .await
            .unwrap();
        assert_eq!(arn.as_deref(), Some("arn:aws:sns:us-east-1:1:orders"));
    }

    #[tokio::test]
    async fn test_list_rejects_prefix() {
        let mut mock = serving();
        mock.expect_invoke().never();
        let topics = TopicClient::new(Arc::new(mock)).unwrap();
        assert!(matches!(
            topics.list(&ListOptions::with_prefix("ord")).await,
            Err(Error::UnsupportedFeature(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_unknown_topic_is_not_found() {
        let mut mock = serving();
        mock.expect_invoke()
            .withf(|_, op, _| op == "ListTopics")
            .returning(|_, _, _| Ok(json!({"Topics": []})));
        let topics = TopicClient::new(Arc::new(mock)).unwrap();
        let err = topics
            .publish(&ResourceIdentity::topic("missing"), "hello", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
