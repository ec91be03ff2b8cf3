//! Log group operations over aws-sdk-cloudwatchlogs

use aws_sdk_cloudwatchlogs::Client;
use aws_sdk_cloudwatchlogs::types::InputLogEvent;
use nb_core::{Service, TransportError};
use serde_json::{Value, json};

use crate::convert::{fields, opt_i32, opt_i64, opt_str, required_str, text};
use crate::error::{build_error, sdk_error};

fn with_token(mut value: Value, token: Option<&str>) -> Value {
    if let Some(token) = token {
        value["nextToken"] = json!(token);
    }
    value
}

fn log_events(params: &Value) -> Result<Vec<InputLogEvent>, TransportError> {
    params
        .get("logEvents")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(|event| {
            InputLogEvent::builder()
                .set_timestamp(opt_i64(event, "timestamp"))
                .set_message(opt_str(event, "message").map(str::to_string))
                .build()
                .map_err(build_error)
        })
        .collect()
}

pub(crate) async fn invoke(client: &Client, operation: &str, params: &Value) -> Result<Value, TransportError> {
    match operation {
        "CreateLogGroup" => {
            client
                .create_log_group()
                .log_group_name(required_str(params, "logGroupName")?)
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(json!({}))
        }
        "DeleteLogGroup" => {
            client
                .delete_log_group()
                .log_group_name(required_str(params, "logGroupName")?)
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(json!({}))
        }
        "PutRetentionPolicy" => {
            client
                .put_retention_policy()
                .log_group_name(required_str(params, "logGroupName")?)
                .set_retention_in_days(opt_i32(params, "retentionInDays"))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(json!({}))
        }
        "DeleteRetentionPolicy" => {
            client
                .delete_retention_policy()
                .log_group_name(required_str(params, "logGroupName")?)
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(json!({}))
        }
        "DescribeLogGroups" => {
            let response = client
                .describe_log_groups()
                .set_log_group_name_prefix(opt_str(params, "logGroupNamePrefix").map(str::to_string))
                .set_limit(opt_i32(params, "limit"))
                .set_next_token(opt_str(params, "nextToken").map(str::to_string))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            let groups: Vec<Value> = response
                .log_groups()
                .iter()
                .map(|g| {
                    fields([
                        ("logGroupName", text(g.log_group_name())),
                        ("arn", text(g.arn())),
                        ("creationTime", g.creation_time().map(Value::from)),
                        ("retentionInDays", g.retention_in_days().map(Value::from)),
                        ("storedBytes", g.stored_bytes().map(Value::from)),
                    ])
                })
                .collect();
            Ok(with_token(json!({"logGroups": groups}), response.next_token()))
        }
        "CreateLogStream" => {
            client
                .create_log_stream()
                .log_group_name(required_str(params, "logGroupName")?)
                .log_stream_name(required_str(params, "logStreamName")?)
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(json!({}))
        }
        "DescribeLogStreams" => {
            let response = client
                .describe_log_streams()
                .log_group_name(required_str(params, "logGroupName")?)
                .set_log_stream_name_prefix(
                    opt_str(params, "logStreamNamePrefix").map(str::to_string),
                )
                .set_limit(opt_i32(params, "limit"))
                .set_next_token(opt_str(params, "nextToken").map(str::to_string))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            let streams: Vec<Value> = response
                .log_streams()
                .iter()
                .map(|s| {
                    #[allow(deprecated)]
                    let stored = s.stored_bytes();
                    fields([
                        ("logStreamName", text(s.log_stream_name())),
                        ("creationTime", s.creation_time().map(Value::from)),
                        ("firstEventTimestamp", s.first_event_timestamp().map(Value::from)),
                        ("lastEventTimestamp", s.last_event_timestamp().map(Value::from)),
                        ("storedBytes", stored.map(Value::from)),
                    ])
                })
                .collect();
            Ok(with_token(json!({"logStreams": streams}), response.next_token()))
        }
        "PutLogEvents" => {
            let response = client
                .put_log_events()
                .log_group_name(required_str(params, "logGroupName")?)
                .log_stream_name(required_str(params, "logStreamName")?)
                .set_log_events(Some(log_events(params)?))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(fields([(
                "nextSequenceToken",
                text(response.next_sequence_token()),
            )]))
        }
        "FilterLogEvents" => {
            let response = client
                .filter_log_events()
                .log_group_name(required_str(params, "logGroupName")?)
                .set_filter_pattern(opt_str(params, "filterPattern").map(str::to_string))
                .set_start_time(opt_i64(params, "startTime"))
                .set_end_time(opt_i64(params, "endTime"))
                .set_log_stream_name_prefix(
                    opt_str(params, "logStreamNamePrefix").map(str::to_string),
                )
                .set_limit(opt_i32(params, "limit"))
                .set_next_token(opt_str(params, "nextToken").map(str::to_string))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            let events: Vec<Value> = response
                .events()
                .iter()
                .map(|e| {
                    fields([
                        ("logStreamName", text(e.log_stream_name())),
                        ("timestamp", e.timestamp().map(Value::from)),
                        ("ingestionTime", e.ingestion_time().map(Value::from)),
                        ("message", text(e.message())),
                        ("eventId", text(e.event_id())),
                    ])
                })
                .collect();
            Ok(with_token(json!({"events": events}), response.next_token()))
        }
        other => Err(TransportError::new(
            TransportError::UNKNOWN_OPERATION,
            format!("{} has no operation {other}", Service::Logs),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_events_need_timestamp_and_message() {
        let params = json!({"logEvents": [{"timestamp": 1658219461000i64, "message": "boot"}]});
        let events = log_events(&params).unwrap();
        assert_eq!(events[0].timestamp(), 1658219461000);
        assert_eq!(events[0].message(), "boot");

        let missing = json!({"logEvents": [{"message": "no time"}]});
        assert!(log_events(&missing).is_err());
    }
}
