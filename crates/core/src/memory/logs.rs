//! Simulated log groups

use std::collections::BTreeMap;

use jiff::Timestamp;
use serde_json::{Value, json};

use super::{ACCOUNT_ID, Context, Reply, fail, optional, page_limit, required, unknown_operation};
use crate::error::TransportError;
use crate::logs::RETENTION_DAYS;
use crate::transport::Service;

const INVALID: &str = "InvalidParameterException";
const NOT_FOUND: &str = "ResourceNotFoundException";

/// Page limits of the service
const MAX_GROUPS_PER_PAGE: usize = 50;
const MAX_STREAMS_PER_PAGE: usize = 50;
const MAX_EVENTS_PER_PAGE: usize = 10_000;

struct Event {
    timestamp: i64,
    ingested: i64,
    message: String,
}

struct Stream {
    created: Timestamp,
    events: Vec<Event>,
}

impl Stream {
    fn stored_bytes(&self) -> usize {
        self.events.iter().map(|e| e.message.len()).sum()
    }
}

struct Group {
    created: Timestamp,
    retention: Option<i64>,
    streams: BTreeMap<String, Stream>,
}

impl Group {
    fn stored_bytes(&self) -> usize {
        self.streams.values().map(Stream::stored_bytes).sum()
    }
}

#[derive(Default)]
pub(super) struct LogsState {
    groups: BTreeMap<String, Group>,
}

fn offset(params: &Value) -> Result<usize, TransportError> {
    optional(params, "nextToken")
        .map(|token| {
            token
                .parse()
                .map_err(|_| fail(INVALID, format!("Invalid nextToken: {token}")))
        })
        .transpose()
        .map(Option::unwrap_or_default)
}

fn with_token(mut response: Value, end: usize, total: usize) -> Value {
    if end < total {
        response["nextToken"] = json!(end.to_string());
    }
    response
}

fn valid_group_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 512
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-/.#".contains(c))
}

/// Filter pattern terms: bare words and double-quoted phrases
fn pattern_terms(pattern: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut rest = pattern.trim();
    while !rest.is_empty() {
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted.find('"').unwrap_or(quoted.len());
            terms.push(quoted[..end].to_string());
            rest = quoted.get(end + 1..).unwrap_or_default().trim_start();
        } else {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            terms.push(rest[..end].to_string());
            rest = rest[end..].trim_start();
        }
    }
    terms.retain(|t| !t.is_empty());
    terms
}

impl LogsState {
    pub(super) fn contains(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    fn group_mut(&mut self, params: &Value) -> Result<&mut Group, TransportError> {
        let name = required(params, "logGroupName", INVALID)?;
        self.groups
            .get_mut(name)
            .ok_or_else(|| fail(NOT_FOUND, "The specified log group does not exist."))
    }

    fn group(&self, params: &Value) -> Result<&Group, TransportError> {
        let name = required(params, "logGroupName", INVALID)?;
        self.groups
            .get(name)
            .ok_or_else(|| fail(NOT_FOUND, "The specified log group does not exist."))
    }

    pub(super) fn handle(&mut self, ctx: &mut Context<'_>, operation: &str, params: &Value) -> Reply {
        match operation {
            "CreateLogGroup" => {
                let name = required(params, "logGroupName", INVALID)?;
                if !valid_group_name(name) {
                    return Err(fail(INVALID, format!("Invalid log group name: {name}")));
                }
                if self.groups.contains_key(name) {
                    return Err(fail(
                        "ResourceAlreadyExistsException",
                        "The specified log group already exists",
                    ));
                }
                self.groups.insert(
                    name.to_string(),
                    Group {
                        created: ctx.now,
                        retention: None,
                        streams: BTreeMap::new(),
                    },
                );
                Ok(json!({}))
            }
            "DeleteLogGroup" => {
                let name = required(params, "logGroupName", INVALID)?;
                self.groups
                    .remove(name)
                    .ok_or_else(|| fail(NOT_FOUND, "The specified log group does not exist."))?;
                Ok(json!({}))
            }
            "PutRetentionPolicy" => {
                let days = params
                    .get("retentionInDays")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| fail(INVALID, "Missing required parameter 'retentionInDays'"))?;
                if !RETENTION_DAYS.contains(&days) {
                    return Err(fail(INVALID, format!("Invalid retentionInDays: {days}")));
                }
                self.group_mut(params)?.retention = Some(days);
                Ok(json!({}))
            }
            "DeleteRetentionPolicy" => {
                self.group_mut(params)?.retention = None;
                Ok(json!({}))
            }
            "DescribeLogGroups" => {
                let prefix = optional(params, "logGroupNamePrefix").unwrap_or_default();
                let matching: Vec<(&String, &Group)> = self
                    .groups
                    .iter()
                    .filter(|(name, _)| name.starts_with(prefix))
                    .collect();
                let start = offset(params)?;
                let limit = page_limit(params, "limit", MAX_GROUPS_PER_PAGE.min(ctx.page_size));
                let end = (start + limit).min(matching.len());

                let groups: Vec<Value> = matching
                    .get(start..end)
                    .unwrap_or_default()
                    .iter()
                    .map(|(name, group)| {
                        let mut value = json!({
                            "logGroupName": name,
                            "arn": format!("arn:aws:logs:{}:{ACCOUNT_ID}:log-group:{name}:*", ctx.region),
                            "creationTime": group.created.as_millisecond(),
                            "storedBytes": group.stored_bytes(),
                        });
                        if let Some(days) = group.retention {
                            value["retentionInDays"] = json!(days);
                        }
                        value
                    })
                    .collect();
                Ok(with_token(json!({"logGroups": groups}), end, matching.len()))
            }
            "CreateLogStream" => {
                let stream = required(params, "logStreamName", INVALID)?;
                if stream.is_empty() || stream.contains(':') || stream.contains('*') {
                    return Err(fail(INVALID, format!("Invalid log stream name: {stream}")));
                }
                let now = ctx.now;
                let group = self.group_mut(params)?;
                if group.streams.contains_key(stream) {
                    return Err(fail(
                        "ResourceAlreadyExistsException",
                        "The specified log stream already exists",
                    ));
                }
                group.streams.insert(
                    stream.to_string(),
                    Stream {
                        created: now,
                        events: Vec::new(),
                    },
                );
                Ok(json!({}))
            }
            "DescribeLogStreams" => {
                let prefix = optional(params, "logStreamNamePrefix").unwrap_or_default();
                let group = self.group(params)?;
                let matching: Vec<(&String, &Stream)> = group
                    .streams
                    .iter()
                    .filter(|(name, _)| name.starts_with(prefix))
                    .collect();
                let start = offset(params)?;
                let limit = page_limit(params, "limit", MAX_STREAMS_PER_PAGE.min(ctx.page_size));
                let end = (start + limit).min(matching.len());

                let streams: Vec<Value> = matching
                    .get(start..end)
                    .unwrap_or_default()
                    .iter()
                    .map(|(name, stream)| {
                        let mut value = json!({
                            "logStreamName": name,
                            "creationTime": stream.created.as_millisecond(),
                            "storedBytes": stream.stored_bytes(),
                        });
                        if let (Some(first), Some(last)) = (
                            stream.events.iter().map(|e| e.timestamp).min(),
                            stream.events.iter().map(|e| e.timestamp).max(),
                        ) {
                            value["firstEventTimestamp"] = json!(first);
                            value["lastEventTimestamp"] = json!(last);
                        }
                        value
                    })
                    .collect();
                Ok(with_token(json!({"logStreams": streams}), end, matching.len()))
            }
            "PutLogEvents" => {
                let stream_name = required(params, "logStreamName", INVALID)?;
                let events = params
                    .get("logEvents")
                    .and_then(Value::as_array)
                    .filter(|events| !events.is_empty())
                    .ok_or_else(|| fail(INVALID, "logEvents must contain at least one event"))?;
                let parsed = events
                    .iter()
                    .map(|event| {
                        let timestamp = event.get("timestamp").and_then(Value::as_i64);
                        let message = event.get("message").and_then(Value::as_str);
                        match (timestamp, message) {
                            (Some(timestamp), Some(message)) => Ok((timestamp, message)),
                            _ => Err(fail(INVALID, "Each log event needs a timestamp and message")),
                        }
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if parsed.windows(2).any(|pair| pair[0].0 > pair[1].0) {
                    return Err(fail(
                        INVALID,
                        "Log events in a single PutLogEvents request must be in chronological order",
                    ));
                }

                let ingested = ctx.now.as_millisecond();
                let group = self.group_mut(params)?;
                let stream = group.streams.get_mut(stream_name).ok_or_else(|| {
                    fail(NOT_FOUND, "The specified log stream does not exist.")
                })?;
                stream
                    .events
                    .extend(parsed.into_iter().map(|(timestamp, message)| Event {
                        timestamp,
                        ingested,
                        message: message.to_string(),
                    }));
                Ok(json!({"nextSequenceToken": ingested.to_string()}))
            }
            "FilterLogEvents" => self.filter_events(ctx, params),
            other => Err(unknown_operation(Service::Logs, other)),
        }
    }

    fn filter_events(&self, ctx: &Context<'_>, params: &Value) -> Reply {
        let group = self.group(params)?;
        let terms = pattern_terms(optional(params, "filterPattern").unwrap_or_default());
        let start_time = params.get("startTime").and_then(Value::as_i64);
        let end_time = params.get("endTime").and_then(Value::as_i64);
        let stream_prefix = optional(params, "logStreamNamePrefix").unwrap_or_default();

        let mut matching: Vec<(&String, usize, &Event)> = group
            .streams
            .iter()
            .filter(|(name, _)| name.starts_with(stream_prefix))
            .flat_map(|(name, stream)| {
                stream
                    .events
                    .iter()
                    .enumerate()
                    .map(move |(index, event)| (name, index, event))
            })
            .filter(|(_, _, event)| {
                start_time.is_none_or(|start| event.timestamp >= start)
                    && end_time.is_none_or(|end| event.timestamp <= end)
                    && terms.iter().all(|term| event.message.contains(term.as_str()))
            })
            .collect();
        matching.sort_by_key(|(name, index, event)| (event.timestamp, (*name).clone(), *index));

        let start = offset(params)?;
        let limit = page_limit(params, "limit", MAX_EVENTS_PER_PAGE.min(ctx.page_size));
        let end = (start + limit).min(matching.len());
        let events: Vec<Value> = matching
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|(name, index, event)| {
                json!({
                    "logStreamName": name,
                    "timestamp": event.timestamp,
                    "ingestionTime": event.ingested,
                    "message": event.message,
                    "eventId": format!("{}-{name}-{index}", event.timestamp),
                })
            })
            .collect();
        Ok(with_token(json!({"events": events}), end, matching.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_terms() {
        assert_eq!(pattern_terms("ERROR timeout"), vec!["ERROR", "timeout"]);
        assert_eq!(
            pattern_terms("\"connection reset\" db"),
            vec!["connection reset", "db"]
        );
        assert!(pattern_terms("   ").is_empty());
    }

    #[test]
    fn test_group_names() {
        assert!(valid_group_name("/aws/lambda/handler-1"));
        assert!(!valid_group_name(""));
        assert!(!valid_group_name("bad name"));
    }
}
