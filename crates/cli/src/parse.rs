//! Command-line argument syntax
//!
//! Conditions are written `name=value` (equality), `name^=prefix`
//! (begins with), `name=low..high` (inclusive range) or `name?` (exists).
//! Values are read as JSON when they parse as JSON, so `price=44.99` is a
//! number and `sku="123"` forces a string; anything else is a plain string.

use jiff::{Span, Timestamp};
use nb_core::value::item_from_plain_json;
use nb_core::{AttributeValue, Item, Predicate, ScalarType, attr};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid condition '{0}' (expected name=value, name^=prefix, name=low..high or name?)")]
    Condition(String),

    #[error("Invalid key attribute '{0}' (expected name:S, name:N or name:B)")]
    KeyAttribute(String),

    #[error("Invalid attribute '{0}' (expected name=value)")]
    Attribute(String),

    #[error("Invalid time '{0}' (expected RFC 3339 like 2024-05-01T12:00:00Z or an age like 30m, 2h)")]
    Time(String),

    #[error("Invalid item: {0}")]
    Item(String),
}

/// Attribute value from argument text
pub fn parse_value(text: &str) -> AttributeValue {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|json| AttributeValue::from_plain_json(&json).ok())
        .unwrap_or_else(|| AttributeValue::S(text.to_string()))
}

/// One comparison term
pub fn parse_condition(text: &str) -> Result<Predicate, ParseError> {
    let invalid = || ParseError::Condition(text.to_string());

    if let Some(name) = text.strip_suffix('?') {
        if name.is_empty() {
            return Err(invalid());
        }
        return Ok(attr(name).exists());
    }
    if let Some((name, prefix)) = text.split_once("^=") {
        if name.is_empty() {
            return Err(invalid());
        }
        return Ok(attr(name).begins_with(parse_value(prefix)));
    }
    let (name, value) = text.split_once('=').ok_or_else(invalid)?;
    if name.is_empty() {
        return Err(invalid());
    }
    match value.split_once("..") {
        Some((low, high)) if !low.is_empty() && !high.is_empty() => {
            Ok(attr(name).between(parse_value(low), parse_value(high)))
        }
        _ => Ok(attr(name).eq(parse_value(value))),
    }
}

/// Conjunction of every term; `None` when there are none
pub fn parse_conditions(terms: &[String]) -> Result<Option<Predicate>, ParseError> {
    let predicates = terms
        .iter()
        .map(|term| parse_condition(term))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Predicate::all(predicates))
}

/// `name:TYPE` key attribute declaration
pub fn parse_key_attribute(text: &str) -> Result<(String, ScalarType), ParseError> {
    let invalid = || ParseError::KeyAttribute(text.to_string());
    let (name, scalar_type) = text.split_once(':').ok_or_else(invalid)?;
    if name.is_empty() {
        return Err(invalid());
    }
    let scalar_type = scalar_type.parse::<ScalarType>().map_err(|_| invalid())?;
    Ok((name.to_string(), scalar_type))
}

/// `name=value` pairs into an item
pub fn parse_attributes(pairs: &[String]) -> Result<Item, ParseError> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) if !name.is_empty() => Ok((name.to_string(), parse_value(value))),
            _ => Err(ParseError::Attribute(pair.clone())),
        })
        .collect()
}

/// Item from a JSON object
pub fn parse_item(text: &str) -> Result<Item, ParseError> {
    let json: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ParseError::Item(e.to_string()))?;
    item_from_plain_json(&json).map_err(|e| ParseError::Item(e.to_string()))
}

/// Items from a JSON array or from one JSON object per line
pub fn parse_items(text: &str) -> Result<Vec<Item>, ParseError> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        let json: Vec<serde_json::Value> =
            serde_json::from_str(trimmed).map_err(|e| ParseError::Item(e.to_string()))?;
        return json
            .iter()
            .map(|value| item_from_plain_json(value).map_err(|e| ParseError::Item(e.to_string())))
            .collect();
    }
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_item)
        .collect()
}

/// Absolute RFC 3339 time, or an age relative to `now`
pub fn parse_time(text: &str, now: Timestamp) -> Result<Timestamp, ParseError> {
    if let Ok(timestamp) = text.parse::<Timestamp>() {
        return Ok(timestamp);
    }
    text.parse::<Span>()
        .ok()
        .and_then(|age| now.checked_sub(age).ok())
        .ok_or_else(|| ParseError::Time(text.to_string()))
}
