//! logs command - Inspect log groups, streams and events

use clap::{Args, Subcommand};
use jiff::Timestamp;
use nb_core::{
    AttributeValue, EventFilter, Item, ListOptions, LogEvent, LogStream, LogsClient,
    ResourceIdentity, ResourceManager as _, Result, collect_all, list_all, paginate,
};
use serde::Serialize;

use crate::commands::{item_json, print_item, print_resources};
use crate::context::Session;
use crate::exit_code::ExitCode;
use crate::output::human_size;
use crate::parse::{ParseError, parse_time};

#[derive(Subcommand, Debug)]
pub enum LogsCommands {
    /// List log groups
    Groups(GroupsArgs),

    /// List streams in a log group
    Streams(StreamsArgs),

    /// Read events matching a pattern and time window
    Filter(FilterArgs),

    /// Create a log group
    Create(CreateArgs),

    /// Delete a log group
    Delete(GroupArg),

    /// Set or clear the retention period of a log group
    Retention(RetentionArgs),
}

#[derive(Args, Debug)]
pub struct GroupArg {
    /// Log group name
    pub group: String,
}

#[derive(Args, Debug)]
pub struct GroupsArgs {
    /// Only groups whose name starts with this prefix
    #[arg(long)]
    pub prefix: Option<String>,
}

#[derive(Args, Debug)]
pub struct StreamsArgs {
    /// Log group name
    pub group: String,

    /// Only streams whose name starts with this prefix
    #[arg(long)]
    pub prefix: Option<String>,
}

#[derive(Args, Debug)]
pub struct FilterArgs {
    /// Log group name
    pub group: String,

    /// Filter pattern; every term or "quoted phrase" must occur
    #[arg(short, long)]
    pub pattern: Option<String>,

    /// Earliest event time: RFC 3339 or an age such as 30m or 2h
    #[arg(long)]
    pub start: Option<String>,

    /// Latest event time: RFC 3339 or an age
    #[arg(long)]
    pub end: Option<String>,

    /// Only streams whose name starts with this prefix
    #[arg(long)]
    pub stream_prefix: Option<String>,

    /// Stop after this many events
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Log group name
    pub group: String,

    /// Retention in days (1, 3, 5, 7, 14, 30, 60, 90, ...)
    #[arg(long)]
    pub retention: Option<i64>,
}

#[derive(Args, Debug)]
pub struct RetentionArgs {
    /// Log group name
    pub group: String,

    /// Retention in days; omit to keep events forever
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
struct StreamListOutput {
    group: String,
    streams: Vec<LogStream>,
}

#[derive(Debug, Serialize)]
struct EventListOutput {
    group: String,
    events: Vec<LogEvent>,
}

/// Execute a logs subcommand
pub async fn execute(cmd: LogsCommands, session: &Session) -> ExitCode {
    let logs = match session.logs().await {
        Ok(logs) => logs,
        Err(e) => return session.fail("Failed to connect to the log service", &e),
    };

    match cmd {
        LogsCommands::Groups(args) => execute_groups(args, &logs, session).await,
        LogsCommands::Streams(args) => execute_streams(args, &logs, session).await,
        LogsCommands::Filter(args) => execute_filter(args, &logs, session).await,
        LogsCommands::Create(args) => execute_create(args, &logs, session).await,
        LogsCommands::Delete(args) => execute_delete(args, &logs, session).await,
        LogsCommands::Retention(args) => execute_retention(args, &logs, session).await,
    }
}

async fn execute_groups(args: GroupsArgs, logs: &LogsClient, session: &Session) -> ExitCode {
    let options = ListOptions {
        prefix: args.prefix,
        ..Default::default()
    };
    match session
        .read(|| collect_all(list_all(logs, options.clone())))
        .await
    {
        Ok(groups) => {
            print_resources(&session.formatter, "groups", &groups);
            ExitCode::Success
        }
        Err(e) => session.fail("Failed to list log groups", &e),
    }
}

async fn all_streams(
    logs: &LogsClient,
    group: &ResourceIdentity,
    options: &ListOptions,
) -> Result<Vec<LogStream>> {
    collect_all(paginate(|token| {
        let options = options.at(token);
        async move { logs.list_streams(group, &options).await }
    }))
    .await
}

async fn execute_streams(args: StreamsArgs, logs: &LogsClient, session: &Session) -> ExitCode {
    let formatter = &session.formatter;
    let group = ResourceIdentity::log_group(&args.group);
    let options = ListOptions {
        prefix: args.prefix,
        ..Default::default()
    };
    let streams = match session.read(|| all_streams(logs, &group, &options)).await {
        Ok(streams) => streams,
        Err(e) => return session.fail("Failed to list log streams", &e),
    };

    if formatter.is_json() {
        formatter.json(&StreamListOutput {
            group: args.group,
            streams,
        });
    } else if streams.is_empty() {
        formatter.println("No streams found.");
    } else {
        let rows = streams
            .iter()
            .map(|s| {
                vec![
                    formatter.style_name(&s.name),
                    s.last_event.map(|t| t.to_string()).unwrap_or_default(),
                    s.stored_bytes.map(human_size).unwrap_or_default(),
                ]
            })
            .collect();
        formatter.table(&["STREAM", "LAST EVENT", "STORED"], rows);
    }
    ExitCode::Success
}

fn event_filter(
    args: &FilterArgs,
    now: Timestamp,
) -> std::result::Result<EventFilter, ParseError> {
    Ok(EventFilter {
        pattern: args.pattern.clone(),
        start: args.start.as_deref().map(|t| parse_time(t, now)).transpose()?,
        end: args.end.as_deref().map(|t| parse_time(t, now)).transpose()?,
        stream_prefix: args.stream_prefix.clone(),
        limit: None,
    })
}

/// Follow pages until `limit` events are collected or the service runs out
async fn matching_events(
    logs: &LogsClient,
    group: &ResourceIdentity,
    filter: &EventFilter,
    limit: Option<usize>,
) -> Result<Vec<LogEvent>> {
    let mut events = Vec::new();
    let mut token = None;
    loop {
        let page = logs.filter_events(group, filter, token).await?;
        events.extend(page.items);
        if let Some(limit) = limit
            && events.len() >= limit
        {
            events.truncate(limit);
            return Ok(events);
        }
        match page.continuation_token {
            Some(next) => token = Some(next),
            None => return Ok(events),
        }
    }
}

async fn execute_filter(args: FilterArgs, logs: &LogsClient, session: &Session) -> ExitCode {
    let formatter = &session.formatter;
    let filter = match event_filter(&args, Timestamp::now()) {
        Ok(filter) => filter,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::UsageError;
        }
    };
    let group = ResourceIdentity::log_group(&args.group);
    let events = match session
        .read(|| matching_events(logs, &group, &filter, args.limit))
        .await
    {
        Ok(events) => events,
        Err(e) => return session.fail("Failed to filter log events", &e),
    };

    if formatter.is_json() {
        formatter.json(&EventListOutput {
            group: args.group,
            events,
        });
    } else if events.is_empty() {
        formatter.println("No events found.");
    } else {
        for event in &events {
            formatter.println(&format!(
                "{} {} {}",
                formatter.style_date(&event.timestamp.to_string()),
                formatter.style_name(&event.stream),
                event.message.trim_end()
            ));
        }
    }
    ExitCode::Success
}

fn retention_attributes(days: Option<i64>) -> Item {
    let mut attributes = Item::new();
    attributes.insert(
        "RetentionInDays".to_string(),
        days.map(AttributeValue::from)
            .unwrap_or(AttributeValue::Null(true)),
    );
    attributes
}

async fn execute_create(args: CreateArgs, logs: &LogsClient, session: &Session) -> ExitCode {
    let formatter = &session.formatter;
    let attributes = match args.retention {
        Some(days) => retention_attributes(Some(days)),
        None => Item::new(),
    };
    match logs
        .create(&ResourceIdentity::log_group(&args.group), attributes)
        .await
    {
        Ok(created) => {
            if formatter.is_json() {
                formatter.json(&item_json(&created));
            } else {
                formatter.success(&format!(
                    "Log group '{}' created.",
                    formatter.style_name(&args.group)
                ));
            }
            ExitCode::Success
        }
        Err(e) => session.fail("Failed to create log group", &e),
    }
}

async fn execute_delete(args: GroupArg, logs: &LogsClient, session: &Session) -> ExitCode {
    let formatter = &session.formatter;
    match logs.delete(&ResourceIdentity::log_group(&args.group)).await {
        Ok(true) => {
            if formatter.is_json() {
                formatter.json(&serde_json::json!({"group": args.group, "deleted": true}));
            } else {
                formatter.success(&format!(
                    "Log group '{}' deleted.",
                    formatter.style_name(&args.group)
                ));
            }
            ExitCode::Success
        }
        Ok(false) => {
            formatter.error(&format!(
                "Log group '{}' was not deleted (missing or not confirmed)",
                args.group
            ));
            ExitCode::NotFound
        }
        Err(e) => session.fail("Failed to delete log group", &e),
    }
}

async fn execute_retention(args: RetentionArgs, logs: &LogsClient, session: &Session) -> ExitCode {
    match logs
        .update(
            &ResourceIdentity::log_group(&args.group),
            retention_attributes(args.days),
        )
        .await
    {
        Ok(updated) => {
            print_item(&session.formatter, &updated);
            ExitCode::Success
        }
        Err(e) => session.fail("Failed to change retention", &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nb_core::item;

    fn filter_args(start: Option<&str>, end: Option<&str>) -> FilterArgs {
        FilterArgs {
            group: "/app/api".to_string(),
            pattern: Some("ERROR \"payment failed\"".to_string()),
            start: start.map(str::to_string),
            end: end.map(str::to_string),
            stream_prefix: None,
            limit: Some(10),
        }
    }

    #[test]
    fn test_event_filter_window() {
        let now: Timestamp = "2024-05-01T12:00:00Z".parse().unwrap();
        let args = filter_args(Some("1h"), Some("2024-05-01T11:30:00Z"));
        let filter = event_filter(&args, now).unwrap();
        assert_eq!(filter.start, Some("2024-05-01T11:00:00Z".parse().unwrap()));
        assert_eq!(filter.end, Some("2024-05-01T11:30:00Z".parse().unwrap()));
        assert_eq!(filter.pattern.as_deref(), Some("ERROR \"payment failed\""));

        assert!(event_filter(&filter_args(Some("last week"), None), now).is_err());
    }

    #[test]
    fn test_retention_attributes() {
        assert_eq!(retention_attributes(Some(30)), item! {"RetentionInDays" => 30i64});
        assert_eq!(
            retention_attributes(None).get("RetentionInDays"),
            Some(&AttributeValue::Null(true))
        );
    }
}
