//! Composable predicates
//!
//! A [`Predicate`] is a tree of attribute comparisons joined by `and`. It is
//! provider-agnostic: the table façade renders it into the remote expression
//! syntax, and [`Predicate::matches`] evaluates it locally for the in-memory
//! transport.
//!
//! ```
//! use nb_core::predicate::attr;
//! let key = attr("category").eq("apparel") & attr("sku").begins_with("woo");
//! assert_eq!(key.terms().len(), 2);
//! ```

use std::cmp::Ordering;
use std::ops::BitAnd;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identity::KeySchema;
use crate::value::{AttributeValue, Item};

/// Comparison applied to one attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Eq(AttributeValue),
    BeginsWith(AttributeValue),
    Between(AttributeValue, AttributeValue),
    /// Attribute is present (any value)
    Exists,
}

impl Condition {
    fn name(&self) -> &'static str {
        match self {
            Condition::Eq(_) => "eq",
            Condition::BeginsWith(_) => "begins_with",
            Condition::Between(..) => "between",
            Condition::Exists => "exists",
        }
    }

    /// Evaluate against an attribute value (`None` when absent)
    pub fn evaluate(&self, value: Option<&AttributeValue>) -> bool {
        let Some(value) = value else {
            return false;
        };
        match self {
            Condition::Eq(operand) => value == operand,
            Condition::BeginsWith(prefix) => match (value, prefix) {
                (AttributeValue::S(v), AttributeValue::S(p)) => v.starts_with(p.as_str()),
                (AttributeValue::B(v), AttributeValue::B(p)) => v.starts_with(p),
                _ => false,
            },
            Condition::Between(low, high) => {
                matches!(
                    value.compare(low),
                    Some(Ordering::Greater | Ordering::Equal)
                ) && matches!(value.compare(high), Some(Ordering::Less | Ordering::Equal))
            }
            Condition::Exists => true,
        }
    }
}

/// Boolean predicate tree over item attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Compare {
        attribute: String,
        condition: Condition,
    },
    And(Box<Predicate>, Box<Predicate>),
}

/// Start a comparison on `name`
pub fn attr(name: impl Into<String>) -> Attr {
    Attr(name.into())
}

/// Comparison builder for one attribute
#[derive(Debug, Clone)]
pub struct Attr(String);

impl Attr {
    pub fn eq(self, value: impl Into<AttributeValue>) -> Predicate {
        self.compare(Condition::Eq(value.into()))
    }

    pub fn begins_with(self, prefix: impl Into<AttributeValue>) -> Predicate {
        self.compare(Condition::BeginsWith(prefix.into()))
    }

    pub fn between(
        self,
        low: impl Into<AttributeValue>,
        high: impl Into<AttributeValue>,
    ) -> Predicate {
        self.compare(Condition::Between(low.into(), high.into()))
    }

    pub fn exists(self) -> Predicate {
        self.compare(Condition::Exists)
    }

    fn compare(self, condition: Condition) -> Predicate {
        Predicate::Compare {
            attribute: self.0,
            condition,
        }
    }
}

impl Predicate {
    /// Conjunction of `self` and `other`
    pub fn and(self, other: Predicate) -> Predicate {
        Predicate::And(Box::new(self), Box::new(other))
    }

    /// Conjunction of every predicate in `predicates`; `None` when empty
    pub fn all(predicates: impl IntoIterator<Item = Predicate>) -> Option<Predicate> {
        predicates.into_iter().reduce(Predicate::and)
    }

    /// Flattened comparison terms, left to right
    pub fn terms(&self) -> Vec<(&str, &Condition)> {
        let mut out = Vec::new();
        self.collect_terms(&mut out);
        out
    }

    fn collect_terms<'a>(&'a self, out: &mut Vec<(&'a str, &'a Condition)>) {
        match self {
            Predicate::Compare {
                attribute,
                condition,
            } => out.push((attribute, condition)),
            Predicate::And(left, right) => {
                left.collect_terms(out);
                right.collect_terms(out);
            }
        }
    }

    /// Evaluate against an item
    pub fn matches(&self, item: &Item) -> bool {
        match self {
            Predicate::Compare {
                attribute,
                condition,
            } => condition.evaluate(item.get(attribute)),
            Predicate::And(left, right) => left.matches(item) && right.matches(item),
        }
    }

    /// Check this predicate is a valid key condition for `schema`
    ///
    /// A key condition pins the partition key with `eq` and may add a single
    /// `eq`, `begins_with` or `between` on the sort key. Nothing else.
    pub fn validate_key_condition(&self, schema: &KeySchema) -> Result<()> {
        let partition = &schema.partition_key().name;
        let sort = schema.sort_key().map(|k| k.name.as_str());

        let mut partition_pinned = false;
        let mut sort_seen = false;

        for (attribute, condition) in self.terms() {
            if attribute == partition {
                if partition_pinned {
                    return Err(Error::InvalidQuery(format!(
                        "Partition key '{partition}' is constrained more than once"
                    )));
                }
                if !matches!(condition, Condition::Eq(_)) {
                    return Err(Error::InvalidQuery(format!(
                        "Partition key '{partition}' only supports eq, got {}",
                        condition.name()
                    )));
                }
                partition_pinned = true;
            } else if Some(attribute) == sort {
                if sort_seen {
                    return Err(Error::InvalidQuery(format!(
                        "Sort key '{attribute}' is constrained more than once"
                    )));
                }
                if matches!(condition, Condition::Exists) {
                    return Err(Error::InvalidQuery(format!(
                        "Sort key '{attribute}' does not support exists"
                    )));
                }
                sort_seen = true;
            } else {
                return Err(Error::InvalidQuery(format!(
                    "'{attribute}' is not a key attribute; use a filter predicate"
                )));
            }
        }

        if !partition_pinned {
            return Err(Error::InvalidQuery(format!(
                "Key condition must include eq on partition key '{partition}'"
            )));
        }
        Ok(())
    }
}

impl BitAnd for Predicate {
    type Output = Predicate;

    fn bitand(self, rhs: Predicate) -> Predicate {
        self.and(rhs)
    }
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Predicate::Compare {
                attribute,
                condition,
            } => match condition {
                Condition::Eq(v) => write!(f, "{attribute} = {v}"),
                Condition::BeginsWith(v) => write!(f, "{attribute} begins with {v}"),
                Condition::Between(lo, hi) => write!(f, "{attribute} between {lo} and {hi}"),
                Condition::Exists => write!(f, "{attribute} exists"),
            },
            Predicate::And(left, right) => write!(f, "({left}) and ({right})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ScalarType;
    use crate::item;

    fn schema() -> KeySchema {
        KeySchema::partition("category", ScalarType::S).with_sort("sku", ScalarType::S)
    }

    #[test]
    fn test_matches() {
        let hoodie = item! {
            "category" => "apparel",
            "sku" => "woo-hoodie-1",
            "price" => 34.75,
            "in_stock" => true,
        };

        assert!(attr("category").eq("apparel").matches(&hoodie));
        assert!(attr("sku").begins_with("woo").matches(&hoodie));
        assert!(!attr("sku").begins_with("foo").matches(&hoodie));
        assert!(attr("price").between(30, 40).matches(&hoodie));
        assert!(!attr("price").between(40, 50).matches(&hoodie));
        assert!(attr("price").exists().matches(&hoodie));
        assert!(!attr("discount").exists().matches(&hoodie));

        let both = attr("in_stock").eq(true) & attr("price").between(30, 40);
        assert!(both.matches(&hoodie));
        let neither = attr("in_stock").eq(false) & attr("price").between(30, 40);
        assert!(!neither.matches(&hoodie));
    }

    #[test]
    fn test_between_is_inclusive_and_typed() {
        let item = item! {"price" => 40};
        assert!(attr("price").between(30, 40).matches(&item));
        assert!(!attr("price").between("30", "40").matches(&item));
    }

    #[test]
    fn test_terms_flatten_left_to_right() {
        let p = attr("a").eq(1) & (attr("b").eq(2) & attr("c").eq(3));
        let names: Vec<&str> = p.terms().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_valid_key_conditions() {
        let schema = schema();
        assert!(
            attr("category")
                .eq("apparel")
                .validate_key_condition(&schema)
                .is_ok()
        );
        assert!(
            (attr("category").eq("apparel") & attr("sku").begins_with("woo"))
                .validate_key_condition(&schema)
                .is_ok()
        );
        assert!(
            (attr("sku").between("a", "m") & attr("category").eq("apparel"))
                .validate_key_condition(&schema)
                .is_ok()
        );
    }

    #[test]
    fn test_invalid_key_conditions() {
        let schema = schema();
        let cases = vec![
            attr("sku").begins_with("woo"),
            attr("category").begins_with("app"),
            attr("category").eq("apparel") & attr("price").eq(10),
            attr("category").eq("apparel") & attr("category").eq("clothing"),
            attr("category").eq("a") & attr("sku").eq("x") & attr("sku").eq("y"),
        ];
        for predicate in cases {
            assert!(
                matches!(
                    predicate.validate_key_condition(&schema),
                    Err(Error::InvalidQuery(_))
                ),
                "expected InvalidQuery for {predicate}"
            );
        }
    }

    #[test]
    fn test_all() {
        assert!(Predicate::all(Vec::new()).is_none());
        let p = Predicate::all(vec![attr("a").eq(1), attr("b").eq(2)]).unwrap();
        assert_eq!(p, attr("a").eq(1) & attr("b").eq(2));
    }
}
