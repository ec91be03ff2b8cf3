//! Log aggregation façade
//!
//! [`LogsClient`] manages log groups through the [`ResourceManager`]
//! contract and reads streams and events out of them.

use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::client::{
    Endpoint, array_field, best_effort_delete, i64_field, required_str, str_field,
    timestamp_field,
};
use crate::error::{Error, Result};
use crate::identity::{ResourceIdentity, ResourceKind};
use crate::listing::{ListOptions, ListingPage};
use crate::resource::{ResourceManager, ResourceSummary};
use crate::transport::{Service, Transport};
use crate::value::{AttributeValue, Item};

const RETENTION: &str = "RetentionInDays";

/// Retention periods the service accepts
pub(crate) const RETENTION_DAYS: &[i64] = &[
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922,
    3288, 3653,
];

/// Stream inside a log group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStream {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_event: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_bytes: Option<i64>,
}

/// One log event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub stream: String,
    pub timestamp: Timestamp,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// Which events of a log group to read
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Service filter pattern; every term (or quoted phrase) must occur
    pub pattern: Option<String>,
    /// Inclusive lower bound
    pub start: Option<Timestamp>,
    /// Inclusive upper bound
    pub end: Option<Timestamp>,
    pub stream_prefix: Option<String>,
    /// Page size hint
    pub limit: Option<i32>,
}

/// Log group client
#[derive(Debug, Clone)]
pub struct LogsClient {
    endpoint: Endpoint,
}

impl LogsClient {
    /// Create a client over a transport that serves log aggregation
    pub fn new(transport: Arc<dyn Transport>) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(transport, Service::Logs)?,
        })
    }

    async fn describe_page(
        &self,
        prefix: Option<&str>,
        limit: Option<i32>,
        token: Option<&str>,
    ) -> Result<Value> {
        let mut params = Map::new();
        if let Some(prefix) = prefix {
            params.insert("logGroupNamePrefix".to_string(), json!(prefix));
        }
        if let Some(limit) = limit {
            params.insert("limit".to_string(), json!(limit));
        }
        if let Some(token) = token {
            params.insert("nextToken".to_string(), json!(token));
        }
        self.endpoint
            .call("DescribeLogGroups", Value::Object(params))
            .await
    }

    /// Raw description of the group with exactly this name
    async fn find_group(&self, name: &str) -> Result<Option<Value>> {
        let mut token: Option<String> = None;
        loop {
            let response = self
                .describe_page(Some(name), None, token.as_deref())
                .await?;
            if let Some(group) = array_field(&response, "logGroups")
                .iter()
                .find(|g| str_field(g, "logGroupName").as_deref() == Some(name))
            {
                return Ok(Some(group.clone()));
            }
            match str_field(&response, "nextToken") {
                Some(next) => token = Some(next),
                None => return Ok(None),
            }
        }
    }

    async fn set_retention(&self, name: &str, days: Option<i64>) -> Result<()> {
        match days {
            Some(days) => {
                self.endpoint
                    .call(
                        "PutRetentionPolicy",
                        json!({"logGroupName": name, "retentionInDays": days}),
                    )
                    .await?
            }
            None => {
                self.endpoint
                    .call("DeleteRetentionPolicy", json!({"logGroupName": name}))
                    .await?
            }
        };
        Ok(())
    }

    /// One page of streams in the group, optionally by name prefix
    pub async fn list_streams(
        &self,
        identity: &ResourceIdentity,
        options: &ListOptions,
    ) -> Result<ListingPage<LogStream>> {
        identity.expect_kind(ResourceKind::LogGroup)?;
        let mut params = Map::new();
        params.insert("logGroupName".to_string(), json!(identity.name));
        if let Some(prefix) = &options.prefix {
            params.insert("logStreamNamePrefix".to_string(), json!(prefix));
        }
        if let Some(limit) = options.max_keys {
            params.insert("limit".to_string(), json!(limit));
        }
        if let Some(token) = &options.continuation_token {
            params.insert("nextToken".to_string(), json!(token));
        }

        let response = self
            .endpoint
            .call("DescribeLogStreams", Value::Object(params))
            .await?;

        let items = array_field(&response, "logStreams")
            .iter()
            .map(|stream| {
                Ok(LogStream {
                    name: required_str(stream, "logStreamName")?,
                    created: timestamp_field(stream, "creationTime"),
                    first_event: timestamp_field(stream, "firstEventTimestamp"),
                    last_event: timestamp_field(stream, "lastEventTimestamp"),
                    stored_bytes: i64_field(stream, "storedBytes"),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ListingPage::new(items, str_field(&response, "nextToken")))
    }

    /// One page of events matching `filter`
    pub async fn filter_events(
        &self,
        identity: &ResourceIdentity,
        filter: &EventFilter,
        token: Option<String>,
    ) -> Result<ListingPage<LogEvent>> {
        identity.expect_kind(ResourceKind::LogGroup)?;
        let mut params = Map::new();
        params.insert("logGroupName".to_string(), json!(identity.name));
        if let Some(pattern) = &filter.pattern {
            params.insert("filterPattern".to_string(), json!(pattern));
        }
        if let Some(start) = filter.start {
            params.insert("startTime".to_string(), json!(start.as_millisecond()));
        }
        if let Some(end) = filter.end {
            params.insert("endTime".to_string(), json!(end.as_millisecond()));
        }
        if let Some(prefix) = &filter.stream_prefix {
            params.insert("logStreamNamePrefix".to_string(), json!(prefix));
        }
        if let Some(limit) = filter.limit {
            params.insert("limit".to_string(), json!(limit));
        }
        if let Some(token) = token {
            params.insert("nextToken".to_string(), json!(token));
        }

        let response = self
            .endpoint
            .call("FilterLogEvents", Value::Object(params))
            .await?;

        let items = array_field(&response, "events")
            .iter()
            .map(|event| {
                Ok(LogEvent {
                    stream: str_field(event, "logStreamName").unwrap_or_default(),
                    timestamp: timestamp_field(event, "timestamp")
                        .ok_or_else(|| Error::Response("event without timestamp".to_string()))?,
                    message: required_str(event, "message")?,
                    event_id: str_field(event, "eventId"),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ListingPage::new(items, str_field(&response, "nextToken")))
    }

    /// Create a stream in the group
    pub async fn create_stream(&self, identity: &ResourceIdentity, stream: &str) -> Result<()> {
        identity.expect_kind(ResourceKind::LogGroup)?;
        self.endpoint
            .call(
                "CreateLogStream",
                json!({"logGroupName": identity.name, "logStreamName": stream}),
            )
            .await?;
        Ok(())
    }

    /// Append events to a stream; events are sent in timestamp order
    pub async fn put_events(
        &self,
        identity: &ResourceIdentity,
        stream: &str,
        events: &[(Timestamp, String)],
    ) -> Result<()> {
        identity.expect_kind(ResourceKind::LogGroup)?;
        if events.is_empty() {
            return Ok(());
        }
        let mut ordered: Vec<&(Timestamp, String)> = events.iter().collect();
        ordered.sort_by_key(|(timestamp, _)| *timestamp);
        let log_events: Vec<Value> = ordered
            .into_iter()
            .map(|(timestamp, message)| {
                json!({"timestamp": timestamp.as_millisecond(), "message": message})
            })
            .collect();

        self.endpoint
            .call(
                "PutLogEvents",
                json!({
                    "logGroupName": identity.name,
                    "logStreamName": stream,
                    "logEvents": log_events,
                }),
            )
            .await?;
        Ok(())
    }
}

fn retention_attribute(value: &AttributeValue) -> Result<Option<i64>> {
    let days = match value {
        AttributeValue::Null(_) => return Ok(None),
        AttributeValue::N(n) => n.as_str().parse::<i64>().ok(),
        _ => None,
    };
    match days {
        Some(days) if RETENTION_DAYS.contains(&days) => Ok(Some(days)),
        _ => Err(Error::InvalidItem(format!(
            "{RETENTION} must be one of {RETENTION_DAYS:?}, got {value}"
        ))),
    }
}

/// Retention change requested by `attributes`; `Some(None)` clears it
fn retention_from(attributes: &Item, verb: &str) -> Result<Option<Option<i64>>> {
    let mut retention = None;
    for (name, value) in attributes {
        if name == RETENTION {
            retention = Some(retention_attribute(value)?);
        } else {
            return Err(Error::UnsupportedFeature(format!(
                "Log group attribute '{name}' cannot be {verb}"
            )));
        }
    }
    Ok(retention)
}

fn group_item(group: &Value) -> Item {
    let mut item = Item::new();
    if let Some(name) = str_field(group, "logGroupName") {
        item.insert("LogGroupName".to_string(), name.into());
    }
    if let Some(arn) = str_field(group, "arn") {
        item.insert("Arn".to_string(), arn.into());
    }
    if let Some(created) = timestamp_field(group, "creationTime") {
        item.insert("CreationTime".to_string(), created.to_string().into());
    }
    if let Some(days) = i64_field(group, "retentionInDays") {
        item.insert(RETENTION.to_string(), days.into());
    }
    if let Some(bytes) = i64_field(group, "storedBytes") {
        item.insert("StoredBytes".to_string(), bytes.into());
    }
    item
}

#[async_trait]
impl ResourceManager for LogsClient {
    fn kind(&self) -> ResourceKind {
        ResourceKind::LogGroup
    }

    async fn create(&self, identity: &ResourceIdentity, attributes: Item) -> Result<Item> {
        identity.expect_kind(ResourceKind::LogGroup)?;
        let retention = retention_from(&attributes, "set")?.flatten();

        self.endpoint
            .call("CreateLogGroup", json!({"logGroupName": identity.name}))
            .await?;
        tracing::debug!(resource = %identity, "Log group created");
        if retention.is_some() {
            self.set_retention(&identity.name, retention).await?;
        }

        self.get(identity)
            .await?
            .ok_or_else(|| Error::NotFound(identity.to_string()))
    }

    async fn get(&self, identity: &ResourceIdentity) -> Result<Option<Item>> {
        identity.expect_kind(ResourceKind::LogGroup)?;
        Ok(self.find_group(&identity.name).await?.map(|g| group_item(&g)))
    }

    async fn update(&self, identity: &ResourceIdentity, partial: Item) -> Result<Item> {
        identity.expect_kind(ResourceKind::LogGroup)?;
        if partial.is_empty() {
            return Err(Error::InvalidItem("Nothing to update".to_string()));
        }
        let retention = retention_from(&partial, "updated")?;

        if self.find_group(&identity.name).await?.is_none() {
            return Err(Error::NotFound(identity.to_string()));
        }
        if let Some(days) = retention {
            self.set_retention(&identity.name, days).await?;
        }

        self.get(identity)
            .await?
            .ok_or_else(|| Error::NotFound(identity.to_string()))
    }

    async fn delete(&self, identity: &ResourceIdentity) -> Result<bool> {
        identity.expect_kind(ResourceKind::LogGroup)?;
        let outcome = self
            .endpoint
            .call("DeleteLogGroup", json!({"logGroupName": identity.name}))
            .await;
        best_effort_delete(identity, "log group", outcome)
    }

    async fn list(&self, options: &ListOptions) -> Result<ListingPage<ResourceSummary>> {
        let response = self
            .describe_page(
                options.prefix.as_deref(),
                options.max_keys,
                options.continuation_token.as_deref(),
            )
            .await?;

        let items = array_field(&response, "logGroups")
            .iter()
            .map(|group| {
                let mut summary =
                    ResourceSummary::new(ResourceKind::LogGroup, required_str(group, "logGroupName")?);
                summary.arn = str_field(group, "arn");
                summary.created = timestamp_field(group, "creationTime");
                Ok(summary)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ListingPage::new(items, str_field(&response, "nextToken")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item;
    use crate::transport::MockTransport;

    fn serving() -> MockTransport {
        let mut mock = MockTransport::new();
        mock.expect_serves()
            .returning(|service| service == Service::Logs);
        mock
    }

    #[test]
    fn test_retention_attribute() {
        assert_eq!(retention_attribute(&14.into()).unwrap(), Some(14));
        assert_eq!(
            retention_attribute(&AttributeValue::Null(true)).unwrap(),
            None
        );
        assert!(matches!(
            retention_attribute(&13.into()),
            Err(Error::InvalidItem(_))
        ));
        assert!(matches!(
            retention_from(&item! {"KmsKeyId" => "k"}, "set"),
            Err(Error::UnsupportedFeature(_))
        ));
    }

    #[tokio::test]
    async fn test_get_matches_exact_name_across_pages() {
        let mut mock = serving();
        mock.expect_invoke()
            .withf(|_, op, params| op == "DescribeLogGroups" && params.get("nextToken").is_none())
            .times(1)
            .returning(|_, _, _| {
                Ok(json!({
                    "logGroups": [{"logGroupName": "/app/web-canary"}],
                    "nextToken": "n1",
                }))
            });
        mock.expect_invoke()
            .withf(|_, op, params| op == "DescribeLogGroups" && params["nextToken"] == "n1")
            .times(1)
            .returning(|_, _, _| {
                Ok(json!({"logGroups": [{
                    "logGroupName": "/app/web",
                    "creationTime": 1658219460000i64,
                    "retentionInDays": 30,
                }]}))
            });

        let logs = LogsClient::new(Arc::new(mock)).unwrap();
        let group = logs
            .get(&ResourceIdentity::log_group("/app/web"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(group["LogGroupName"].as_str(), Some("/app/web"));
        assert_eq!(group[RETENTION], AttributeValue::from(30));
        assert_eq!(
            group["CreationTime"].as_str(),
            Some("2022-07-19T08:31:00Z")
        );
    }

    #[tokio::test]
    async fn test_filter_events_sends_epoch_millis() {
        let mut mock = serving();
        mock.expect_invoke()
            .withf(|_, op, params| {
                op == "FilterLogEvents"
                    && params["startTime"] == 1658219460000i64
                    && params["filterPattern"] == "ERROR"
            })
            .times(1)
            .returning(|_, _, _| {
                Ok(json!({"events": [{
                    "logStreamName": "web-1",
                    "timestamp": 1658219461000i64,
                    "message": "ERROR boom",
                }]}))
            });

        let logs = LogsClient::new(Arc::new(mock)).unwrap();
        let filter = EventFilter {
            pattern: Some("ERROR".to_string()),
            start: Some(Timestamp::from_millisecond(1658219460000).unwrap()),
            ..Default::default()
        };
        let page = logs
            .filter_events(&ResourceIdentity::log_group("/app/web"), &filter, None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].stream, "web-1");
        assert!(!page.has_more());
    }
}
