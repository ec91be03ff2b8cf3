//! topic command - Manage notification topics, subscriptions and publishing
//!
//! Topics may be named by ARN or by bare name; bare names are resolved by
//! listing topics.

use clap::{Args, Subcommand};
use nb_core::{
    ListOptions, ResourceIdentity, ResourceManager as _, Result, Subscription, TopicClient,
    collect_all, list_all, paginate,
};
use serde::Serialize;

use crate::commands::{item_json, print_item, print_resources};
use crate::context::Session;
use crate::exit_code::ExitCode;
use crate::parse::parse_attributes;

#[derive(Subcommand, Debug)]
pub enum TopicCommands {
    /// Create a topic (returns the existing one when it is already there)
    Create(CreateArgs),

    /// List topics
    List,

    /// Show topic attributes
    Info(TopicArg),

    /// Delete a topic
    Delete(TopicArg),

    /// Subscribe an endpoint to a topic
    Subscribe(SubscribeArgs),

    /// Remove a subscription
    Unsubscribe(UnsubscribeArgs),

    /// List subscriptions, for one topic or all
    Subscriptions(SubscriptionsArgs),

    /// Publish a message
    Publish(PublishArgs),
}

#[derive(Args, Debug)]
pub struct TopicArg {
    /// Topic name or ARN
    pub topic: String,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Topic name
    pub topic: String,

    /// Topic attribute as name=value (e.g. DisplayName=Orders)
    #[arg(short, long = "attribute", value_name = "NAME=VALUE")]
    pub attributes: Vec<String>,
}

#[derive(Args, Debug)]
pub struct SubscribeArgs {
    /// Topic name or ARN
    pub topic: String,

    /// Delivery protocol (email, sqs, https, lambda, ...)
    #[arg(long)]
    pub protocol: String,

    /// Endpoint receiving messages (address, queue ARN, URL)
    #[arg(long)]
    pub endpoint: String,
}

#[derive(Args, Debug)]
pub struct UnsubscribeArgs {
    /// Subscription ARN
    pub subscription: String,
}

#[derive(Args, Debug)]
pub struct SubscriptionsArgs {
    /// Topic name or ARN; all subscriptions when omitted
    pub topic: Option<String>,
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Topic name or ARN
    pub topic: String,

    /// Message body
    pub message: String,

    /// Subject line (email endpoints)
    #[arg(long)]
    pub subject: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubscribeOutput {
    topic: String,
    subscription_arn: String,
}

#[derive(Debug, Serialize)]
struct PublishOutput {
    topic: String,
    message_id: String,
}

/// Execute a topic subcommand
pub async fn execute(cmd: TopicCommands, session: &Session) -> ExitCode {
    let topics = match session.topics().await {
        Ok(topics) => topics,
        Err(e) => return session.fail("Failed to connect to the notification service", &e),
    };

    match cmd {
        TopicCommands::Create(args) => execute_create(args, &topics, session).await,
        TopicCommands::List => execute_list(&topics, session).await,
        TopicCommands::Info(args) => execute_info(args, &topics, session).await,
        TopicCommands::Delete(args) => execute_delete(args, &topics, session).await,
        TopicCommands::Subscribe(args) => execute_subscribe(args, &topics, session).await,
        TopicCommands::Unsubscribe(args) => execute_unsubscribe(args, &topics, session).await,
        TopicCommands::Subscriptions(args) => {
            execute_subscriptions(args, &topics, session).await
        }
        TopicCommands::Publish(args) => execute_publish(args, &topics, session).await,
    }
}

async fn execute_create(args: CreateArgs, topics: &TopicClient, session: &Session) -> ExitCode {
    let formatter = &session.formatter;
    let attributes = match parse_attributes(&args.attributes) {
        Ok(attributes) => attributes,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::UsageError;
        }
    };

    match topics
        .create(&ResourceIdentity::topic(&args.topic), attributes)
        .await
    {
        Ok(created) => {
            if formatter.is_json() {
                formatter.json(&item_json(&created));
            } else {
                let arn = created
                    .get("TopicArn")
                    .map(ToString::to_string)
                    .unwrap_or_default();
                formatter.success(&format!(
                    "Topic '{}' ready: {}",
                    formatter.style_name(&args.topic),
                    formatter.style_arn(&arn)
                ));
            }
            ExitCode::Success
        }
        Err(e) => session.fail("Failed to create topic", &e),
    }
}

async fn execute_list(topics: &TopicClient, session: &Session) -> ExitCode {
    match session
        .read(|| collect_all(list_all(topics, ListOptions::default())))
        .await
    {
        Ok(found) => {
            print_resources(&session.formatter, "topics", &found);
            ExitCode::Success
        }
        Err(e) => session.fail("Failed to list topics", &e),
    }
}

async fn execute_info(args: TopicArg, topics: &TopicClient, session: &Session) -> ExitCode {
    let identity = ResourceIdentity::topic(&args.topic);
    match session.read(|| topics.get(&identity)).await {
        Ok(Some(attributes)) => {
            print_item(&session.formatter, &attributes);
            ExitCode::Success
        }
        Ok(None) => {
            session
                .formatter
                .error(&format!("Topic '{}' does not exist", args.topic));
            ExitCode::NotFound
        }
        Err(e) => session.fail("Failed to read topic", &e),
    }
}

async fn execute_delete(args: TopicArg, topics: &TopicClient, session: &Session) -> ExitCode {
    let formatter = &session.formatter;
    match topics.delete(&ResourceIdentity::topic(&args.topic)).await {
        Ok(true) => {
            if formatter.is_json() {
                formatter.json(&serde_json::json!({"topic": args.topic, "deleted": true}));
            } else {
                formatter.success(&format!(
                    "Topic '{}' deleted.",
                    formatter.style_name(&args.topic)
                ));
            }
            ExitCode::Success
        }
        Ok(false) => {
            formatter.error(&format!(
                "Topic '{}' was not deleted (missing or not confirmed)",
                args.topic
            ));
            ExitCode::NotFound
        }
        Err(e) => session.fail("Failed to delete topic", &e),
    }
}

async fn execute_subscribe(
    args: SubscribeArgs,
    topics: &TopicClient,
    session: &Session,
) -> ExitCode {
    let formatter = &session.formatter;
    match topics
        .subscribe(
            &ResourceIdentity::topic(&args.topic),
            &args.protocol,
            &args.endpoint,
        )
        .await
    {
        Ok(subscription_arn) => {
            if formatter.is_json() {
                formatter.json(&SubscribeOutput {
                    topic: args.topic,
                    subscription_arn,
                });
            } else {
                formatter.success(&format!(
                    "Subscribed {} ({}): {}",
                    args.endpoint,
                    args.protocol,
                    formatter.style_arn(&subscription_arn)
                ));
            }
            ExitCode::Success
        }
        Err(e) => session.fail("Failed to subscribe", &e),
    }
}

async fn execute_unsubscribe(
    args: UnsubscribeArgs,
    topics: &TopicClient,
    session: &Session,
) -> ExitCode {
    let formatter = &session.formatter;
    match topics.unsubscribe(&args.subscription).await {
        Ok(true) => {
            if formatter.is_json() {
                formatter.json(&serde_json::json!({
                    "subscription_arn": args.subscription,
                    "deleted": true
                }));
            } else {
                formatter.success("Subscription removed.");
            }
            ExitCode::Success
        }
        Ok(false) => {
            formatter.error(&format!(
                "Subscription '{}' was not removed (missing or not confirmed)",
                args.subscription
            ));
            ExitCode::NotFound
        }
        Err(e) => session.fail("Failed to unsubscribe", &e),
    }
}

async fn all_subscriptions(
    topics: &TopicClient,
    topic: Option<&ResourceIdentity>,
) -> Result<Vec<Subscription>> {
    collect_all(paginate(|token| topics.list_subscriptions(topic, token))).await
}

async fn execute_subscriptions(
    args: SubscriptionsArgs,
    topics: &TopicClient,
    session: &Session,
) -> ExitCode {
    let formatter = &session.formatter;
    let identity = args.topic.as_deref().map(ResourceIdentity::topic);
    let subscriptions = match session
        .read(|| all_subscriptions(topics, identity.as_ref()))
        .await
    {
        Ok(subscriptions) => subscriptions,
        Err(e) => return session.fail("Failed to list subscriptions", &e),
    };

    if formatter.is_json() {
        formatter.json(&serde_json::json!({ "subscriptions": subscriptions }));
    } else if subscriptions.is_empty() {
        formatter.println("No subscriptions found.");
    } else {
        let rows = subscriptions
            .iter()
            .map(|s| {
                vec![
                    nb_core::topic_name(&s.topic_arn).to_string(),
                    s.protocol.clone(),
                    s.endpoint.clone(),
                    formatter.style_arn(&s.subscription_arn),
                ]
            })
            .collect();
        formatter.table(&["TOPIC", "PROTOCOL", "ENDPOINT", "SUBSCRIPTION"], rows);
    }
    ExitCode::Success
}

async fn execute_publish(args: PublishArgs, topics: &TopicClient, session: &Session) -> ExitCode {
    let formatter = &session.formatter;
    match topics
        .publish(
            &ResourceIdentity::topic(&args.topic),
            &args.message,
            args.subject.as_deref(),
        )
        .await
    {
        Ok(message_id) => {
            if formatter.is_json() {
                formatter.json(&PublishOutput {
                    topic: args.topic,
                    message_id,
                });
            } else {
                formatter.success(&format!("Published message {message_id}"));
            }
            ExitCode::Success
        }
        Err(e) => session.fail("Failed to publish", &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_output_shape() {
        let output = PublishOutput {
            topic: "orders".to_string(),
            message_id: "6f1b3c2e-0000-4000-8000-000000000001".to_string(),
        };
        insta::assert_json_snapshot!(output, @r#"
        {
          "topic": "orders",
          "message_id": "6f1b3c2e-0000-4000-8000-000000000001"
        }
        "#);
    }
}
