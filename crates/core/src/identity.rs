//! Resource identities
//!
//! A [`ResourceIdentity`] names one remote resource: a storage bucket, a
//! table (with its key schema), a topic or a log group.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::Service;
use crate::value::{AttributeValue, Item};

/// Kind of top-level remote resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    StorageBucket,
    Table,
    Topic,
    LogGroup,
}

impl ResourceKind {
    /// Service family that owns resources of this kind
    pub fn service(self) -> Service {
        match self {
            ResourceKind::StorageBucket => Service::Storage,
            ResourceKind::Table => Service::Table,
            ResourceKind::Topic => Service::Topic,
            ResourceKind::LogGroup => Service::Logs,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::StorageBucket => write!(f, "storage-bucket"),
            ResourceKind::Table => write!(f, "table"),
            ResourceKind::Topic => write!(f, "topic"),
            ResourceKind::LogGroup => write!(f, "log-group"),
        }
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "storage-bucket" | "bucket" => Ok(ResourceKind::StorageBucket),
            "table" => Ok(ResourceKind::Table),
            "topic" => Ok(ResourceKind::Topic),
            "log-group" | "loggroup" => Ok(ResourceKind::LogGroup),
            _ => Err(format!("Invalid resource kind: {s}")),
        }
    }
}

/// Role of a key attribute in a table key schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyRole {
    /// Partition (hash) key
    #[serde(rename = "HASH")]
    Partition,
    /// Sort (range) key
    #[serde(rename = "RANGE")]
    Sort,
}

impl KeyRole {
    /// Provider key type name
    pub fn as_str(self) -> &'static str {
        match self {
            KeyRole::Partition => "HASH",
            KeyRole::Sort => "RANGE",
        }
    }
}

impl std::str::FromStr for KeyRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "HASH" | "PARTITION" => Ok(KeyRole::Partition),
            "RANGE" | "SORT" => Ok(KeyRole::Sort),
            _ => Err(format!("Invalid key role: {s}")),
        }
    }
}

/// Scalar type of a key attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarType {
    S,
    N,
    B,
}

impl ScalarType {
    /// Provider attribute type name
    pub fn as_str(self) -> &'static str {
        match self {
            ScalarType::S => "S",
            ScalarType::N => "N",
            ScalarType::B => "B",
        }
    }

    /// Whether `value` has this scalar type
    pub fn matches(self, value: &AttributeValue) -> bool {
        matches!(
            (self, value),
            (ScalarType::S, AttributeValue::S(_))
                | (ScalarType::N, AttributeValue::N(_))
                | (ScalarType::B, AttributeValue::B(_))
        )
    }
}

impl std::str::FromStr for ScalarType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "S" | "STRING" => Ok(ScalarType::S),
            "N" | "NUMBER" => Ok(ScalarType::N),
            "B" | "BINARY" => Ok(ScalarType::B),
            _ => Err(format!("Invalid key attribute type: {s}")),
        }
    }
}

/// One attribute of a table key schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAttribute {
    pub name: String,
    pub role: KeyRole,
    #[serde(rename = "type")]
    pub scalar_type: ScalarType,
}

/// Ordered composite key of a table: partition key, then optional sort key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    attributes: Vec<KeyAttribute>,
}

impl KeySchema {
    /// Key schema with only a partition key
    pub fn partition(name: impl Into<String>, scalar_type: ScalarType) -> Self {
        Self {
            attributes: vec![KeyAttribute {
                name: name.into(),
                role: KeyRole::Partition,
                scalar_type,
            }],
        }
    }

    /// Add a sort key
    pub fn with_sort(mut self, name: impl Into<String>, scalar_type: ScalarType) -> Self {
        self.attributes.truncate(1);
        self.attributes.push(KeyAttribute {
            name: name.into(),
            role: KeyRole::Sort,
            scalar_type,
        });
        self
    }

    /// Build a key schema from an ordered attribute list, checking its shape
    pub fn from_attributes(attributes: Vec<KeyAttribute>) -> Result<Self> {
        match attributes.as_slice() {
            [p] if p.role == KeyRole::Partition => {}
            [p, s] if p.role == KeyRole::Partition && s.role == KeyRole::Sort => {
                if p.name == s.name {
                    return Err(Error::InvalidItem(format!(
                        "Partition and sort key share the name '{}'",
                        p.name
                    )));
                }
            }
            _ => {
                return Err(Error::InvalidItem(
                    "Key schema needs one partition key followed by at most one sort key"
                        .to_string(),
                ));
            }
        }
        Ok(Self { attributes })
    }

    pub fn attributes(&self) -> &[KeyAttribute] {
        &self.attributes
    }

    pub fn partition_key(&self) -> &KeyAttribute {
        &self.attributes[0]
    }

    pub fn sort_key(&self) -> Option<&KeyAttribute> {
        self.attributes.get(1)
    }

    /// Whether `name` is one of the key attributes
    pub fn is_key(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.name == name)
    }

    /// Check that `item` carries every key attribute, non-null and well typed
    pub fn validate_item(&self, item: &Item) -> Result<()> {
        for attr in &self.attributes {
            match item.get(&attr.name) {
                None | Some(AttributeValue::Null(_)) => {
                    return Err(Error::InvalidItem(format!(
                        "Missing key attribute '{}'",
                        attr.name
                    )));
                }
                Some(value) if !attr.scalar_type.matches(value) => {
                    return Err(Error::InvalidItem(format!(
                        "Key attribute '{}' must be of type {}",
                        attr.name,
                        attr.scalar_type.as_str()
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Project the key attributes out of `item`
    pub fn extract_key(&self, item: &Item) -> Result<Item> {
        self.validate_item(item)?;
        Ok(self
            .attributes
            .iter()
            .filter_map(|a| item.get(&a.name).map(|v| (a.name.clone(), v.clone())))
            .collect())
    }
}

/// Immutable name of one remote resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub kind: ResourceKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_schema: Option<KeySchema>,
}

impl ResourceIdentity {
    pub fn bucket(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::StorageBucket,
            name: name.into(),
            key_schema: None,
        }
    }

    pub fn table(name: impl Into<String>, key_schema: KeySchema) -> Self {
        Self {
            kind: ResourceKind::Table,
            name: name.into(),
            key_schema: Some(key_schema),
        }
    }

    /// Table identity whose key schema is not known locally
    pub fn table_by_name(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Table,
            name: name.into(),
            key_schema: None,
        }
    }

    /// Topic identified by its ARN
    pub fn topic(arn: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Topic,
            name: arn.into(),
            key_schema: None,
        }
    }

    pub fn log_group(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::LogGroup,
            name: name.into(),
            key_schema: None,
        }
    }

    /// Check the identity is usable for `expected` resources
    pub fn expect_kind(&self, expected: ResourceKind) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::General(format!("{expected} name cannot be empty")));
        }
        if self.kind != expected {
            return Err(Error::General(format!(
                "Expected a {expected} identity, got {} '{}'",
                self.kind, self.name
            )));
        }
        if self.key_schema.is_some() && self.kind != ResourceKind::Table {
            return Err(Error::General(format!(
                "Only tables carry a key schema, got {} '{}'",
                self.kind, self.name
            )));
        }
        Ok(())
    }

    /// Key schema of a table identity
    pub fn require_key_schema(&self) -> Result<&KeySchema> {
        self.key_schema.as_ref().ok_or_else(|| {
            Error::InvalidQuery(format!("Table '{}' has no key schema", self.name))
        })
    }
}

impl std::fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item;

    fn products_schema() -> KeySchema {
        KeySchema::partition("category", ScalarType::S).with_sort("sku", ScalarType::S)
    }

    #[test]
    fn test_resource_kind_roundtrip() {
        for kind in [
            ResourceKind::StorageBucket,
            ResourceKind::Table,
            ResourceKind::Topic,
            ResourceKind::LogGroup,
        ] {
            assert_eq!(kind.to_string().parse::<ResourceKind>().unwrap(), kind);
        }
        assert!("queue".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_key_schema_shape() {
        let schema = products_schema();
        assert_eq!(schema.partition_key().name, "category");
        assert_eq!(schema.sort_key().map(|k| k.name.as_str()), Some("sku"));
        assert!(schema.is_key("sku"));
        assert!(!schema.is_key("price"));

        let invalid = KeySchema::from_attributes(vec![KeyAttribute {
            name: "sku".into(),
            role: KeyRole::Sort,
            scalar_type: ScalarType::S,
        }]);
        assert!(invalid.is_err());
    }

    #[test]
    fn test_validate_item() {
        let schema = products_schema();
        assert!(
            schema
                .validate_item(&item! {"category" => "clothing", "sku" => "woo-1"})
                .is_ok()
        );

        let missing = schema.validate_item(&item! {"category" => "clothing"});
        assert!(matches!(missing, Err(Error::InvalidItem(_))));

        let null_key = schema.validate_item(&item! {
            "category" => "clothing",
            "sku" => AttributeValue::Null(true),
        });
        assert!(matches!(null_key, Err(Error::InvalidItem(_))));

        let wrong_type = schema.validate_item(&item! {"category" => "clothing", "sku" => 7});
        assert!(matches!(wrong_type, Err(Error::InvalidItem(_))));
    }

    #[test]
    fn test_extract_key() {
        let schema = products_schema();
        let key = schema
            .extract_key(&item! {"category" => "clothing", "sku" => "woo-1", "price" => 10})
            .unwrap();
        assert_eq!(key, item! {"category" => "clothing", "sku" => "woo-1"});
    }

    #[test]
    fn test_expect_kind() {
        let id = ResourceIdentity::bucket("media");
        assert!(id.expect_kind(ResourceKind::StorageBucket).is_ok());
        assert!(id.expect_kind(ResourceKind::Table).is_err());
        assert!(
            ResourceIdentity::bucket("")
                .expect_kind(ResourceKind::StorageBucket)
                .is_err()
        );
    }
}
