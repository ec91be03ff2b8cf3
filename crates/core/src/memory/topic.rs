//! Simulated pub/sub topics

use std::collections::BTreeMap;

use serde_json::{Value, json};

use super::{ACCOUNT_ID, Context, Reply, fail, optional, required, unknown_operation};
use crate::error::TransportError;
use crate::transport::Service;

const INVALID: &str = "InvalidParameter";

/// Topics and subscriptions per page, as the service pages them
const SERVICE_PAGE_SIZE: usize = 100;

const PROTOCOLS: &[&str] = &[
    "http",
    "https",
    "email",
    "email-json",
    "sms",
    "sqs",
    "application",
    "lambda",
    "firehose",
];

/// Attributes the service owns and callers cannot set
const READ_ONLY_ATTRIBUTES: &[&str] = &[
    "TopicArn",
    "Owner",
    "SubscriptionsConfirmed",
    "SubscriptionsPending",
    "SubscriptionsDeleted",
];

fn not_found(what: &str) -> TransportError {
    fail("NotFound", format!("{what} does not exist"))
}

struct Topic {
    attributes: BTreeMap<String, String>,
    published: Vec<(Option<String>, String)>,
}

struct MemorySubscription {
    topic_arn: String,
    protocol: String,
    endpoint: String,
}

#[derive(Default)]
pub(super) struct TopicState {
    /// Topics by ARN
    topics: BTreeMap<String, Topic>,
    /// Subscriptions by ARN
    subscriptions: BTreeMap<String, MemorySubscription>,
    counter: u64,
}

fn page_token(index: usize, total: usize) -> Option<String> {
    (index < total).then(|| index.to_string())
}

fn token_offset(params: &Value) -> Result<usize, TransportError> {
    optional(params, "NextToken")
        .map(|token| {
            token
                .parse()
                .map_err(|_| fail(INVALID, format!("Invalid NextToken: {token}")))
        })
        .transpose()
        .map(Option::unwrap_or_default)
}

impl TopicState {
    pub(super) fn contains(&self, name_or_arn: &str) -> bool {
        self.topics.contains_key(name_or_arn)
            || self
                .topics
                .keys()
                .any(|arn| arn.rsplit(':').next() == Some(name_or_arn))
    }

    pub(super) fn published(&self, topic_arn: &str) -> Vec<(Option<String>, String)> {
        self.topics
            .get(topic_arn)
            .map(|t| t.published.clone())
            .unwrap_or_default()
    }

    /// Opaque id in the service's UUID shape
    fn next_id(&mut self) -> String {
        self.counter += 1;
        format!("00000000-0000-4000-8000-{:012x}", self.counter)
    }

    fn topic_mut(&mut self, params: &Value) -> Result<(String, &mut Topic), TransportError> {
        let arn = required(params, "TopicArn", INVALID)?;
        let topic = self.topics.get_mut(arn).ok_or_else(|| not_found("Topic"))?;
        Ok((arn.to_string(), topic))
    }

    pub(super) fn handle(&mut self, ctx: &mut Context<'_>, operation: &str, params: &Value) -> Reply {
        match operation {
            "CreateTopic" => self.create_topic(ctx, params),
            "GetTopicAttributes" => {
                let arn = required(params, "TopicArn", INVALID)?;
                let topic = self.topics.get(arn).ok_or_else(|| not_found("Topic"))?;
                let confirmed = self
                    .subscriptions
                    .values()
                    .filter(|s| s.topic_arn == arn)
                    .count();

                let mut attributes = topic.attributes.clone();
                attributes.insert("TopicArn".to_string(), arn.to_string());
                attributes.insert("Owner".to_string(), ACCOUNT_ID.to_string());
                attributes.insert("SubscriptionsConfirmed".to_string(), confirmed.to_string());
                attributes.insert("SubscriptionsPending".to_string(), "0".to_string());
                attributes.insert("SubscriptionsDeleted".to_string(), "0".to_string());
                Ok(json!({"Attributes": attributes}))
            }
            "SetTopicAttributes" => {
                let name = required(params, "AttributeName", INVALID)?;
                if READ_ONLY_ATTRIBUTES.contains(&name) {
                    return Err(fail(INVALID, format!("Attribute {name} is read-only")));
                }
                let value = optional(params, "AttributeValue").unwrap_or_default();
                let (_, topic) = self.topic_mut(params)?;
                topic.attributes.insert(name.to_string(), value.to_string());
                Ok(json!({}))
            }
            "DeleteTopic" => {
                let arn = required(params, "TopicArn", INVALID)?;
                self.topics.remove(arn);
                self.subscriptions.retain(|_, s| s.topic_arn != arn);
                Ok(json!({}))
            }
            "ListTopics" => {
                let offset = token_offset(params)?;
                let end = (offset + SERVICE_PAGE_SIZE.min(ctx.page_size)).min(self.topics.len());
                let topics: Vec<Value> = self
                    .topics
                    .keys()
                    .skip(offset)
                    .take(end.saturating_sub(offset))
                    .map(|arn| json!({"TopicArn": arn}))
                    .collect();

                let mut response = json!({"Topics": topics});
                if let Some(token) = page_token(end, self.topics.len()) {
                    response["NextToken"] = json!(token);
                }
                Ok(response)
            }
            "Subscribe" => {
                let protocol = required(params, "Protocol", INVALID)?;
                if !PROTOCOLS.contains(&protocol) {
                    return Err(fail(INVALID, format!("Invalid protocol: {protocol}")));
                }
                let endpoint = required(params, "Endpoint", INVALID)?;
                let (arn, _) = self.topic_mut(params)?;
                let subscription_arn = format!("{arn}:{}", self.next_id());
                self.subscriptions.insert(
                    subscription_arn.clone(),
                    MemorySubscription {
                        topic_arn: arn,
                        protocol: protocol.to_string(),
                        endpoint: endpoint.to_string(),
                    },
                );
                Ok(json!({"SubscriptionArn": subscription_arn}))
            }
            "Unsubscribe" => {
                let arn = required(params, "SubscriptionArn", INVALID)?;
                self.subscriptions
                    .remove(arn)
                    .ok_or_else(|| not_found("Subscription"))?;
                Ok(json!({}))
            }
            "ListSubscriptions" => self.list_subscriptions(ctx, params, None),
            "ListSubscriptionsByTopic" => {
                let arn = required(params, "TopicArn", INVALID)?;
                if !self.topics.contains_key(arn) {
                    return Err(not_found("Topic"));
                }
                self.list_subscriptions(ctx, params, Some(arn))
            }
            "Publish" => {
                let message = required(params, "Message", INVALID)?;
                if message.is_empty() {
                    return Err(fail(INVALID, "Empty message"));
                }
                let subject = optional(params, "Subject").map(str::to_string);
                let message_id = self.next_id();
                let (_, topic) = self.topic_mut(params)?;
                topic.published.push((subject, message.to_string()));
                Ok(json!({"MessageId": message_id}))
            }
            other => Err(unknown_operation(Service::Topic, other)),
        }
    }

    fn create_topic(&mut self, ctx: &mut Context<'_>, params: &Value) -> Reply {
        let name = required(params, "Name", INVALID)?;
        if name.is_empty()
            || name.len() > 256
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(fail(
                INVALID,
                "Topic Name must be 1 to 256 alphanumeric characters, hyphens or underscores",
            ));
        }
        let arn = format!("arn:aws:sns:{}:{ACCOUNT_ID}:{name}", ctx.region);

        let attributes: BTreeMap<String, String> = params
            .get("Attributes")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        if let Some(name) = attributes
            .keys()
            .find(|name| READ_ONLY_ATTRIBUTES.contains(&name.as_str()))
        {
            return Err(fail(INVALID, format!("Attribute {name} is read-only")));
        }

        // Creating an existing topic returns it unchanged
        self.topics.entry(arn.clone()).or_insert_with(|| {
            let mut defaults = BTreeMap::from([("DisplayName".to_string(), String::new())]);
            defaults.extend(attributes);
            Topic {
                attributes: defaults,
                published: Vec::new(),
            }
        });
        Ok(json!({"TopicArn": arn}))
    }

    fn list_subscriptions(
        &self,
        ctx: &Context<'_>,
        params: &Value,
        topic_arn: Option<&str>,
    ) -> Reply {
        let matching: Vec<(&String, &MemorySubscription)> = self
            .subscriptions
            .iter()
            .filter(|(_, s)| topic_arn.is_none_or(|arn| s.topic_arn == arn))
            .collect();
        let offset = token_offset(params)?;
        let end = (offset + SERVICE_PAGE_SIZE.min(ctx.page_size)).min(matching.len());

        let subscriptions: Vec<Value> = matching
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|(arn, s)| {
                json!({
                    "SubscriptionArn": arn,
                    "TopicArn": s.topic_arn,
                    "Protocol": s.protocol,
                    "Endpoint": s.endpoint,
                    "Owner": ACCOUNT_ID,
                })
            })
            .collect();
        let mut response = json!({"Subscriptions": subscriptions});
        if let Some(token) = page_token(end, matching.len()) {
            response["NextToken"] = json!(token);
        }
        Ok(response)
    }
}
