//! Topic operations over aws-sdk-sns

use aws_sdk_sns::Client;
use nb_core::{Service, TransportError};
use serde_json::{Value, json};

use crate::convert::{fields, opt_bool, opt_str, required_str, string_map, text};
use crate::error::sdk_error;

fn subscription(s: &aws_sdk_sns::types::Subscription) -> Value {
    fields([
        ("SubscriptionArn", text(s.subscription_arn())),
        ("TopicArn", text(s.topic_arn())),
        ("Protocol", text(s.protocol())),
        ("Endpoint", text(s.endpoint())),
        ("Owner", text(s.owner())),
    ])
}

fn with_token(mut value: Value, token: Option<&str>) -> Value {
    if let Some(token) = token {
        value["NextToken"] = json!(token);
    }
    value
}

pub(crate) async fn invoke(client: &Client, operation: &str, params: &Value) -> Result<Value, TransportError> {
    match operation {
        "CreateTopic" => {
            let response = client
                .create_topic()
                .name(required_str(params, "Name")?)
                .set_attributes(string_map(params, "Attributes"))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(fields([("TopicArn", text(response.topic_arn()))]))
        }
        "GetTopicAttributes" => {
            let response = client
                .get_topic_attributes()
                .topic_arn(required_str(params, "TopicArn")?)
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(json!({"Attributes": response.attributes().cloned().unwrap_or_default()}))
        }
        "SetTopicAttributes" => {
            client
                .set_topic_attributes()
                .topic_arn(required_str(params, "TopicArn")?)
                .attribute_name(required_str(params, "AttributeName")?)
                .set_attribute_value(opt_str(params, "AttributeValue").map(str::to_string))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(json!({}))
        }
        "DeleteTopic" => {
            client
                .delete_topic()
                .topic_arn(required_str(params, "TopicArn")?)
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(json!({}))
        }
        "ListTopics" => {
            let response = client
                .list_topics()
                .set_next_token(opt_str(params, "NextToken").map(str::to_string))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            let topics: Vec<Value> = response
                .topics()
                .iter()
                .map(|t| fields([("TopicArn", text(t.topic_arn()))]))
                .collect();
            Ok(with_token(json!({"Topics": topics}), response.next_token()))
        }
        "Subscribe" => {
            let response = client
                .subscribe()
                .topic_arn(required_str(params, "TopicArn")?)
                .protocol(required_str(params, "Protocol")?)
                .set_endpoint(opt_str(params, "Endpoint").map(str::to_string))
                .set_return_subscription_arn(opt_bool(params, "ReturnSubscriptionArn"))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(fields([("SubscriptionArn", text(response.subscription_arn()))]))
        }
        "Unsubscribe" => {
            client
                .unsubscribe()
                .subscription_arn(required_str(params, "SubscriptionArn")?)
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(json!({}))
        }
        "ListSubscriptions" => {
            let response = client
                .list_subscriptions()
                .set_next_token(opt_str(params, "NextToken").map(str::to_string))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            let subscriptions: Vec<Value> = response.subscriptions().iter().map(subscription).collect();
            Ok(with_token(
                json!({"Subscriptions": subscriptions}),
                response.next_token(),
            ))
        }
        "ListSubscriptionsByTopic" => {
            let response = client
                .list_subscriptions_by_topic()
                .topic_arn(required_str(params, "TopicArn")?)
                .set_next_token(opt_str(params, "NextToken").map(str::to_string))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            let subscriptions: Vec<Value> = response.subscriptions().iter().map(subscription).collect();
            Ok(with_token(
                json!({"Subscriptions": subscriptions}),
                response.next_token(),
            ))
        }
        "Publish" => {
            let response = client
                .publish()
                .topic_arn(required_str(params, "TopicArn")?)
                .message(required_str(params, "Message")?)
                .set_subject(opt_str(params, "Subject").map(str::to_string))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(fields([("MessageId", text(response.message_id()))]))
        }
        other => Err(TransportError::new(
            TransportError::UNKNOWN_OPERATION,
            format!("{} has no operation {other}", Service::Topic),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_shape() {
        let s = aws_sdk_sns::types::Subscription::builder()
            .subscription_arn("arn:aws:sns:us-east-1:123456789012:orders:abc")
            .topic_arn("arn:aws:sns:us-east-1:123456789012:orders")
            .protocol("email")
            .endpoint("ops@example.com")
            .build();
        let value = subscription(&s);
        assert_eq!(value["Protocol"], "email");
        assert!(value.get("Owner").is_none());
    }

    #[test]
    fn test_token_only_when_present() {
        assert_eq!(with_token(json!({}), None), json!({}));
        assert_eq!(with_token(json!({}), Some("t")), json!({"NextToken": "t"}));
    }
}
