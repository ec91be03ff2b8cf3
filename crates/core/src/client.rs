//! Shared plumbing for the family façades
//!
//! [`Endpoint`] pairs a transport handle with the service family a façade
//! serves and is the single place where remote calls are logged and
//! transport failures are classified.

use std::sync::Arc;

use jiff::Timestamp;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identity::ResourceIdentity;
use crate::transport::{Service, Transport};
use crate::value::Item;

#[derive(Clone)]
pub(crate) struct Endpoint {
    transport: Arc<dyn Transport>,
    service: Service,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("service", &self.service)
            .finish()
    }
}

impl Endpoint {
    pub(crate) fn new(transport: Arc<dyn Transport>, service: Service) -> Result<Self> {
        if !transport.serves(service) {
            return Err(Error::Config(format!(
                "Transport is not bound to the {service} service"
            )));
        }
        Ok(Self { transport, service })
    }

    pub(crate) async fn call(&self, operation: &str, params: Value) -> Result<Value> {
        tracing::debug!(service = %self.service, operation = operation, "Invoking remote operation");
        self.transport
            .invoke(self.service, operation, params)
            .await
            .map_err(|e| {
                tracing::debug!(
                    service = %self.service,
                    operation = operation,
                    code = %e.code,
                    "Remote operation failed"
                );
                Error::from_transport(operation, e)
            })
    }

    pub(crate) async fn wait_until_exists(&self, identity: &ResourceIdentity) -> Result<()> {
        tracing::debug!(resource = %identity, "Waiting until resource exists");
        Ok(self.transport.wait_until_exists(identity).await?)
    }

    pub(crate) async fn wait_until_not_exists(&self, identity: &ResourceIdentity) -> Result<()> {
        tracing::debug!(resource = %identity, "Waiting until resource is gone");
        Ok(self.transport.wait_until_not_exists(identity).await?)
    }
}

/// Whether a raw response positively confirms success
///
/// Responses carrying `ResponseMetadata.HTTPStatusCode` confirm only with a
/// 2xx status; a response without metadata was already accepted by the
/// transport.
pub(crate) fn confirms_success(response: &Value) -> bool {
    match response
        .pointer("/ResponseMetadata/HTTPStatusCode")
        .and_then(Value::as_u64)
    {
        Some(status) => (200..300).contains(&status),
        None => true,
    }
}

/// Turn the outcome of a delete call into the best-effort boolean contract
///
/// Auth and connection failures still surface; anything else that does not
/// confirm success is reported as `false` with a warning.
pub(crate) fn best_effort_delete(
    identity: &ResourceIdentity,
    what: &str,
    outcome: Result<Value>,
) -> Result<bool> {
    match outcome {
        Ok(response) if confirms_success(&response) => Ok(true),
        Ok(response) => {
            tracing::warn!(
                resource = %identity,
                target = what,
                response = %response,
                "Delete was not confirmed by the remote service"
            );
            Ok(false)
        }
        Err(e @ (Error::Auth(_) | Error::Connection(_))) => Err(e),
        Err(e) => {
            tracing::warn!(resource = %identity, target = what, error = %e, "Delete failed");
            Ok(false)
        }
    }
}

pub(crate) fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn required_str(value: &Value, key: &str) -> Result<String> {
    str_field(value, key).ok_or_else(|| Error::Response(format!("missing '{key}'")))
}

pub(crate) fn i64_field(value: &Value, key: &str) -> Option<i64> {
    value.get(key).and_then(Value::as_i64)
}

pub(crate) fn array_field<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Timestamp from an RFC 3339 string or epoch milliseconds
pub(crate) fn timestamp_field(value: &Value, key: &str) -> Option<Timestamp> {
    match value.get(key)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64().and_then(|ms| Timestamp::from_millisecond(ms).ok()),
        _ => None,
    }
}

/// Item from a typed-JSON attribute map
pub(crate) fn parse_item(value: &Value) -> Result<Item> {
    serde_json::from_value(value.clone())
        .map_err(|e| Error::Response(format!("malformed item: {e}")))
}

pub(crate) fn item_field(value: &Value, key: &str) -> Result<Option<Item>> {
    value.get(key).map(parse_item).transpose()
}

/// Item of string attributes from a JSON object of strings
pub(crate) fn string_map_item(value: &Value) -> Item {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.into())))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_confirms_success() {
        assert!(confirms_success(&json!({})));
        assert!(confirms_success(
            &json!({"ResponseMetadata": {"HTTPStatusCode": 204}})
        ));
        assert!(!confirms_success(
            &json!({"ResponseMetadata": {"HTTPStatusCode": 500}})
        ));
    }

    #[test]
    fn test_best_effort_delete() {
        let id = ResourceIdentity::bucket("b");
        assert!(best_effort_delete(&id, "bucket", Ok(json!({}))).unwrap());
        assert!(
            !best_effort_delete(
                &id,
                "bucket",
                Ok(json!({"ResponseMetadata": {"HTTPStatusCode": 409}}))
            )
            .unwrap()
        );
        assert!(!best_effort_delete(&id, "bucket", Err(Error::NotFound("b".into()))).unwrap());
        assert!(best_effort_delete(&id, "bucket", Err(Error::Auth("expired".into()))).is_err());
        assert!(
            best_effort_delete(&id, "bucket", Err(Error::Connection("timeout".into()))).is_err()
        );
    }

    #[test]
    fn test_timestamp_field() {
        let doc = json!({"iso": "2022-07-19T08:31:00Z", "ms": 1658219460000i64, "bad": true});
        let iso = timestamp_field(&doc, "iso").unwrap();
        let ms = timestamp_field(&doc, "ms").unwrap();
        assert_eq!(iso, ms);
        assert!(timestamp_field(&doc, "bad").is_none());
        assert!(timestamp_field(&doc, "missing").is_none());
    }
}
