//! Attribute values and items
//!
//! Items are ordered maps from attribute name to a tagged [`AttributeValue`].
//! Numbers are exact decimals: the decimal text is kept as supplied and
//! compared numerically, never through a float.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// An item: attribute name to value
pub type Item = BTreeMap<String, AttributeValue>;

/// Build an [`Item`] from `name => value` pairs
///
/// ```
/// use nb_core::item;
/// let product = item! {"category" => "clothing", "sku" => "woo-1", "in_stock" => true};
/// assert_eq!(product.len(), 3);
/// ```
#[macro_export]
macro_rules! item {
    () => { $crate::Item::new() };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut item = $crate::Item::new();
        $( item.insert(::std::string::String::from($name), $crate::AttributeValue::from($value)); )+
        item
    }};
}

/// Exact decimal number
#[derive(Debug, Clone)]
pub struct Number(String);

impl Number {
    /// Parse decimal text (`-12`, `44.99`, `1.5e3`)
    ///
    /// Values keep at most [`MAX_DIGITS`] significant digits and a magnitude
    /// between `1e-130` and `1e126` (exclusive), or are zero.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if !is_decimal(text) {
            return Err(Error::InvalidItem(format!("Invalid number: '{text}'")));
        }

        let number = Self(text.to_string());
        let (_, digits, exponent) = number.parts();
        if digits.len() > MAX_DIGITS {
            return Err(Error::InvalidItem(format!(
                "Number '{text}' has more than {MAX_DIGITS} significant digits"
            )));
        }
        if !digits.is_empty() && !MAGNITUDE_RANGE.contains(&magnitude(&digits, exponent)) {
            return Err(Error::InvalidItem(format!(
                "Number '{text}' is out of range"
            )));
        }
        Ok(number)
    }

    /// Number from a finite float in range, using its shortest round-trip text
    pub fn from_f64(value: f64) -> Option<Self> {
        value
            .is_finite()
            .then(|| Self::parse(&format!("{value}")).ok())
            .flatten()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical text: equal numbers give equal text (`1.50` and `15e-1`
    /// both become `15e-1`)
    pub(crate) fn normalized(&self) -> String {
        match self.parts() {
            (_, digits, _) if digits.is_empty() => "0".to_string(),
            (negative, digits, exponent) => {
                format!("{}{digits}e{exponent}", if negative { "-" } else { "" })
            }
        }
    }

    /// Sign, significant digits (no leading or trailing zeros) and exponent,
    /// so that the value is `digits * 10^exponent`
    fn parts(&self) -> (bool, String, i64) {
        let text = self.0.as_str();
        let (negative, text) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(text)),
        };
        let (mantissa, exp) = match text.find(['e', 'E']) {
            Some(pos) => (&text[..pos], exponent_value(&text[pos + 1..])),
            None => (text, 0),
        };
        let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));

        let mut digits: String = format!("{int_part}{frac_part}");
        let mut exponent = exp.saturating_sub(frac_part.len() as i64);

        let trimmed_end = digits.trim_end_matches('0').len();
        exponent = exponent.saturating_add((digits.len() - trimmed_end) as i64);
        digits.truncate(trimmed_end);
        let digits = digits.trim_start_matches('0').to_string();

        if digits.is_empty() {
            (false, digits, 0)
        } else {
            (negative, digits, exponent)
        }
    }
}

/// Most significant digits a number may carry
pub const MAX_DIGITS: usize = 38;

/// Allowed [`magnitude`] of a non-zero number: `1e-130 <= |n| < 1e126`
const MAGNITUDE_RANGE: std::ops::RangeInclusive<i64> = -129..=126;

/// Exponent text clamped to `i64` instead of failing on overflow
fn exponent_value(text: &str) -> i64 {
    text.parse::<i64>().unwrap_or_else(|_| {
        if text.starts_with('-') {
            i64::MIN
        } else {
            i64::MAX
        }
    })
}

/// Position of the decimal point relative to the first significant digit:
/// a number with magnitude `m` lies in `[10^(m-1), 10^m)`
fn magnitude(digits: &str, exponent: i64) -> i64 {
    (digits.len() as i64).saturating_add(exponent)
}

fn is_decimal(text: &str) -> bool {
    let body = text
        .strip_prefix('-')
        .or_else(|| text.strip_prefix('+'))
        .unwrap_or(text);
    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(pos) => (&body[..pos], Some(&body[pos + 1..])),
        None => (body, None),
    };
    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (mantissa, None),
    };

    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    let mantissa_ok = all_digits(int_part)
        && frac_part.is_none_or(all_digits)
        && !(int_part.is_empty() && frac_part.is_none_or(str::is_empty));
    let exponent_ok = exponent.is_none_or(|e| {
        let e = e
            .strip_prefix('-')
            .or_else(|| e.strip_prefix('+'))
            .unwrap_or(e);
        !e.is_empty() && all_digits(e)
    });

    mantissa_ok && exponent_ok
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a_neg, a_digits, a_exp) = self.parts();
        let (b_neg, b_digits, b_exp) = other.parts();

        match (a_digits.is_empty(), b_digits.is_empty()) {
            (true, true) => return Ordering::Equal,
            (true, false) => {
                return if b_neg {
                    Ordering::Greater
                } else {
                    Ordering::Less
                };
            }
            (false, true) => {
                return if a_neg {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
            }
            (false, false) => {}
        }

        if a_neg != b_neg {
            return if a_neg {
                Ordering::Less
            } else {
                Ordering::Greater
            };
        }

        let magnitude = magnitude(&a_digits, a_exp)
            .cmp(&magnitude(&b_digits, b_exp))
            .then_with(|| a_digits.cmp(&b_digits));

        if a_neg {
            magnitude.reverse()
        } else {
            magnitude
        }
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Number {}

impl std::fmt::Display for Number {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Number {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Number::parse(s)
    }
}

impl Serialize for Number {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Number {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Number::parse(&text).map_err(serde::de::Error::custom)
    }
}

macro_rules! number_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Number {
            fn from(value: $t) -> Self {
                Number(value.to_string())
            }
        })*
    };
}

number_from_int!(i32, i64, u32, u64, usize);

/// Tagged attribute value, serialized in the provider's typed JSON form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    S(String),
    #[serde(rename = "N")]
    N(Number),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "B", with = "base64_bytes")]
    B(Vec<u8>),
    #[serde(rename = "NULL")]
    Null(bool),
    #[serde(rename = "L")]
    L(Vec<AttributeValue>),
    #[serde(rename = "M")]
    M(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    /// Provider type tag
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::S(_) => "S",
            AttributeValue::N(_) => "N",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::B(_) => "B",
            AttributeValue::Null(_) => "NULL",
            AttributeValue::L(_) => "L",
            AttributeValue::M(_) => "M",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    /// Ordering between values of the same scalar type; `None` across types
    pub fn compare(&self, other: &AttributeValue) -> Option<Ordering> {
        match (self, other) {
            (AttributeValue::S(a), AttributeValue::S(b)) => Some(a.cmp(b)),
            (AttributeValue::N(a), AttributeValue::N(b)) => Some(a.cmp(b)),
            (AttributeValue::B(a), AttributeValue::B(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Plain JSON rendering for display (numbers become JSON numbers where possible)
    pub fn to_plain_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            AttributeValue::S(s) => Value::String(s.clone()),
            AttributeValue::N(n) => n
                .as_str()
                .parse::<serde_json::Number>()
                .map(Value::Number)
                .unwrap_or_else(|_| Value::String(n.to_string())),
            AttributeValue::Bool(b) => Value::Bool(*b),
            AttributeValue::B(bytes) => {
                Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            AttributeValue::Null(_) => Value::Null,
            AttributeValue::L(list) => Value::Array(list.iter().map(Self::to_plain_json).collect()),
            AttributeValue::M(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_plain_json()))
                    .collect(),
            ),
        }
    }

    /// Value from plain JSON (strings, numbers, booleans, null, arrays, objects)
    pub fn from_plain_json(value: &serde_json::Value) -> Result<Self> {
        use serde_json::Value;
        Ok(match value {
            Value::String(s) => AttributeValue::S(s.clone()),
            Value::Number(n) => AttributeValue::N(Number::parse(&n.to_string())?),
            Value::Bool(b) => AttributeValue::Bool(*b),
            Value::Null => AttributeValue::Null(true),
            Value::Array(list) => AttributeValue::L(
                list.iter()
                    .map(Self::from_plain_json)
                    .collect::<Result<_>>()?,
            ),
            Value::Object(map) => AttributeValue::M(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), Self::from_plain_json(v)?)))
                    .collect::<Result<_>>()?,
            ),
        })
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::S(s) => f.write_str(s),
            AttributeValue::N(n) => write!(f, "{n}"),
            AttributeValue::Bool(b) => write!(f, "{b}"),
            other => write!(f, "{}", other.to_plain_json()),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::S(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::S(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<Number> for AttributeValue {
    fn from(value: Number) -> Self {
        AttributeValue::N(value)
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(value: Vec<u8>) -> Self {
        AttributeValue::B(value)
    }
}

impl From<Item> for AttributeValue {
    fn from(value: Item) -> Self {
        AttributeValue::M(value)
    }
}

/// Non-finite floats have no decimal representation and map to `NULL`
impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Number::from_f64(value)
            .map(AttributeValue::N)
            .unwrap_or(AttributeValue::Null(true))
    }
}

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for AttributeValue {
            fn from(value: $t) -> Self {
                AttributeValue::N(Number::from(value))
            }
        })*
    };
}

value_from_int!(i32, i64, u32, u64, usize);

/// Convert an item to plain JSON for display
pub fn item_to_plain_json(item: &Item) -> serde_json::Value {
    AttributeValue::M(item.clone()).to_plain_json()
}

/// Parse an item from a plain JSON object
pub fn item_from_plain_json(value: &serde_json::Value) -> Result<Item> {
    match AttributeValue::from_plain_json(value)? {
        AttributeValue::M(map) => Ok(map),
        other => Err(Error::InvalidItem(format!(
            "Expected a JSON object, got {}",
            other.type_name()
        ))),
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(text: &str) -> Number {
        Number::parse(text).unwrap()
    }

    #[test]
    fn test_number_parse() {
        assert!(Number::parse("44.99").is_ok());
        assert!(Number::parse("-3").is_ok());
        assert!(Number::parse("1.5e3").is_ok());
        assert!(Number::parse(".5").is_ok());
        assert!(Number::parse("").is_err());
        assert!(Number::parse("abc").is_err());
        assert!(Number::parse("1.2.3").is_err());
        assert!(Number::parse("1e").is_err());
        assert!(Number::parse(".").is_err());
    }

    #[test]
    fn test_number_range_limits() {
        assert!(Number::parse("9.9999999999999999999999999999999999999e125").is_ok());
        assert!(Number::parse("-1e-130").is_ok());
        assert!(Number::parse("0e999999").is_ok());
        assert!(Number::parse(&"9".repeat(38)).is_ok());

        for text in [
            "1e126",
            "1e-131",
            "12e9223372036854775807",
            "1e-9223372036854775808",
            "1e99999999999999999999",
        ] {
            assert!(
                matches!(Number::parse(text), Err(Error::InvalidItem(_))),
                "{text} should be rejected"
            );
        }
        assert!(Number::parse(&"9".repeat(39)).is_err());
        assert!(Number::parse(&format!("{}000", "1".repeat(38))).is_ok());
        assert!(Number::from_f64(1e200).is_none());
    }

    #[test]
    fn test_number_normalized() {
        assert_eq!(n("1.50").normalized(), "15e-1");
        assert_eq!(n("15e-1").normalized(), "15e-1");
        assert_eq!(n("-0.00").normalized(), "0");
        assert_eq!(n("-1200").normalized(), "-12e2");
    }

    #[test]
    fn test_number_ordering_at_extreme_exponents() {
        assert!(n("9.9e125") > n("1"));
        assert!(n("1e-130") < n("1"));
        assert!(n("-9.9e125") < n("-1e-130"));
        assert_ne!(n("1e125"), n("1"));
    }

    #[test]
    fn test_number_equality_is_numeric() {
        assert_eq!(n("44.99"), n("44.990"));
        assert_eq!(n("1500"), n("1.5e3"));
        assert_eq!(n("0"), n("-0.00"));
        assert_ne!(n("44.99"), n("44.9"));
    }

    #[test]
    fn test_number_ordering() {
        assert!(n("30") < n("34.75"));
        assert!(n("34.75") < n("40"));
        assert!(n("-5") < n("-4.5"));
        assert!(n("-1") < n("0"));
        assert!(n("0.001") < n("0.01"));
        assert!(n("99") < n("100"));
        assert!(n("1.05") > n("1.0499"));
    }

    #[test]
    fn test_number_keeps_text() {
        assert_eq!(n("44.990").as_str(), "44.990");
        assert_eq!(Number::from_f64(44.99).unwrap().as_str(), "44.99");
        assert!(Number::from_f64(f64::NAN).is_none());
    }

    #[test]
    fn test_attribute_value_wire_form() {
        let value = AttributeValue::from(44.99);
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            serde_json::json!({"N": "44.99"})
        );

        let value = AttributeValue::B(vec![1, 2, 3]);
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            serde_json::json!({"B": "AQID"})
        );

        let parsed: AttributeValue =
            serde_json::from_value(serde_json::json!({"M": {"on": {"BOOL": true}}})).unwrap();
        assert_eq!(
            parsed,
            AttributeValue::M(crate::item! {"on" => true})
        );
    }

    #[test]
    fn test_plain_json_conversion() {
        let json = serde_json::json!({
            "category": "clothing",
            "price": 44.99,
            "in_stock": true,
            "tags": ["a", "b"],
            "note": null,
        });
        let item = item_from_plain_json(&json).unwrap();
        assert_eq!(item["price"], AttributeValue::N(n("44.99")));
        assert_eq!(item["note"], AttributeValue::Null(true));
        assert_eq!(item_to_plain_json(&item), json);

        assert!(item_from_plain_json(&serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn test_compare_across_types() {
        assert_eq!(
            AttributeValue::from("a").compare(&AttributeValue::from("b")),
            Some(Ordering::Less)
        );
        assert_eq!(AttributeValue::from("1").compare(&AttributeValue::from(1)), None);
    }
}
