//! Parameter documents in, SDK builders out, and back again

use std::collections::HashMap;

use aws_sdk_dynamodb::types::AttributeValue as SdkValue;
use aws_smithy_types::{Blob, DateTime};
use nb_core::{AttributeValue, Item, Number, TransportError};
use serde_json::{Map, Value};

fn invalid(message: impl Into<String>) -> TransportError {
    TransportError::new(TransportError::INVALID_PARAMETER, message)
}

pub(crate) fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, TransportError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(format!("Missing required parameter '{key}'")))
}

pub(crate) fn opt_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

pub(crate) fn opt_i64(params: &Value, key: &str) -> Option<i64> {
    params.get(key).and_then(Value::as_i64)
}

pub(crate) fn opt_i32(params: &Value, key: &str) -> Option<i32> {
    opt_i64(params, key).and_then(|n| i32::try_from(n).ok())
}

pub(crate) fn opt_bool(params: &Value, key: &str) -> Option<bool> {
    params.get(key).and_then(Value::as_bool)
}

/// String-to-string map parameter (`Attributes`, `ExpressionAttributeNames`)
pub(crate) fn string_map(params: &Value, key: &str) -> Option<HashMap<String, String>> {
    let map = params.get(key)?.as_object()?;
    Some(
        map.iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect(),
    )
}

/// Epoch milliseconds, the timestamp form nb-core reads
pub(crate) fn millis(time: &DateTime) -> Option<Value> {
    time.to_millis().ok().map(Value::from)
}

/// Response object from optional fields, dropping the absent ones
pub(crate) fn fields<const N: usize>(entries: [(&str, Option<Value>); N]) -> Value {
    let map: Map<String, Value> = entries
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_string(), v)))
        .collect();
    Value::Object(map)
}

pub(crate) fn text(value: Option<&str>) -> Option<Value> {
    value.map(Value::from)
}

pub(crate) fn to_sdk(value: AttributeValue) -> SdkValue {
    match value {
        AttributeValue::S(s) => SdkValue::S(s),
        AttributeValue::N(n) => SdkValue::N(n.as_str().to_string()),
        AttributeValue::Bool(b) => SdkValue::Bool(b),
        AttributeValue::B(bytes) => SdkValue::B(Blob::new(bytes)),
        AttributeValue::Null(b) => SdkValue::Null(b),
        AttributeValue::L(values) => SdkValue::L(values.into_iter().map(to_sdk).collect()),
        AttributeValue::M(map) => SdkValue::M(map.into_iter().map(|(k, v)| (k, to_sdk(v))).collect()),
    }
}

fn number(text: &str) -> Result<Number, TransportError> {
    Number::parse(text).map_err(|e| TransportError::new("SerializationException", e.to_string()))
}

pub(crate) fn from_sdk(value: &SdkValue) -> Result<AttributeValue, TransportError> {
    Ok(match value {
        SdkValue::S(s) => AttributeValue::S(s.clone()),
        SdkValue::N(n) => AttributeValue::N(number(n)?),
        SdkValue::Bool(b) => AttributeValue::Bool(*b),
        SdkValue::B(blob) => AttributeValue::B(blob.as_ref().to_vec()),
        SdkValue::Null(b) => AttributeValue::Null(*b),
        SdkValue::L(values) => AttributeValue::L(values.iter().map(from_sdk).collect::<Result<_, _>>()?),
        SdkValue::M(map) => AttributeValue::M(sdk_to_item(map)?),
        // Sets come back as lists of their members
        SdkValue::Ss(values) => AttributeValue::L(values.iter().cloned().map(AttributeValue::S).collect()),
        SdkValue::Ns(values) => AttributeValue::L(
            values
                .iter()
                .map(|n| number(n).map(AttributeValue::N))
                .collect::<Result<_, _>>()?,
        ),
        SdkValue::Bs(values) => {
            AttributeValue::L(values.iter().map(|b| AttributeValue::B(b.as_ref().to_vec())).collect())
        }
        other => {
            return Err(TransportError::new(
                "SerializationException",
                format!("Unsupported attribute value: {other:?}"),
            ));
        }
    })
}

/// Typed-JSON item parameter as an SDK attribute map
pub(crate) fn item_param(
    params: &Value,
    key: &str,
) -> Result<Option<HashMap<String, SdkValue>>, TransportError> {
    let Some(value) = params.get(key) else {
        return Ok(None);
    };
    let item: Item = serde_json::from_value(value.clone())
        .map_err(|e| invalid(format!("Invalid item in '{key}': {e}")))?;
    Ok(Some(item_to_sdk(item)))
}

pub(crate) fn item_to_sdk(item: Item) -> HashMap<String, SdkValue> {
    item.into_iter().map(|(k, v)| (k, to_sdk(v))).collect()
}

pub(crate) fn sdk_to_item(map: &HashMap<String, SdkValue>) -> Result<Item, TransportError> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), from_sdk(v)?)))
        .collect()
}

/// SDK attribute map as a typed-JSON document
pub(crate) fn item_value(map: &HashMap<String, SdkValue>) -> Result<Value, TransportError> {
    serde_json::to_value(sdk_to_item(map)?)
        .map_err(|e| TransportError::new("SerializationException", e.to_string()))
}
