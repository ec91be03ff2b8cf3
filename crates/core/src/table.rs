//! Key-value table façade
//!
//! [`TableClient`] manages tables through the [`ResourceManager`] contract.
//! Item operations live on [`Table`], a handle bound to one table and its key
//! schema, obtained from [`TableClient::items`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::batch::{BatchOperation, BatchPolicy, BatchResult, send_in_chunks};
use crate::client::{
    Endpoint, array_field, best_effort_delete, i64_field, item_field, parse_item, required_str,
    str_field, timestamp_field,
};
use crate::config::BatchConfig;
use crate::error::{Error, Result};
use crate::expression::ExpressionBuilder;
use crate::identity::{KeyAttribute, KeyRole, KeySchema, ResourceIdentity, ResourceKind, ScalarType};
use crate::listing::{ListOptions, ListingPage, collect_all, decode_token, encode_token, paginate};
use crate::predicate::{Predicate, attr};
use crate::resource::{ResourceManager, ResourceSummary};
use crate::transport::{Service, Transport};
use crate::value::{AttributeValue, Item};

/// Provisioned capacity used when a create does not name one
const DEFAULT_CAPACITY_UNITS: i64 = 5;

const READ_CAPACITY: &str = "ReadCapacityUnits";
const WRITE_CAPACITY: &str = "WriteCapacityUnits";

/// Table management client
#[derive(Debug, Clone)]
pub struct TableClient {
    endpoint: Endpoint,
    batch: BatchPolicy,
}

impl TableClient {
    /// Create a client over a transport that serves key-value tables
    pub fn new(transport: Arc<dyn Transport>) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(transport, Service::Table)?,
            batch: BatchPolicy::table(&BatchConfig::default()),
        })
    }

    /// Use the table chunk size and retry budget from `config`
    pub fn with_batch_config(mut self, config: &BatchConfig) -> Self {
        self.batch = BatchPolicy::table(config);
        self
    }

    /// Identity of an existing table, with its key schema read from the service
    pub async fn resolve(&self, name: &str) -> Result<ResourceIdentity> {
        let description = self.describe(name).await?;
        Ok(ResourceIdentity::table(
            name,
            key_schema_from_description(&description)?,
        ))
    }

    /// Item operations on the table named by `identity`
    pub fn items(&self, identity: &ResourceIdentity) -> Result<Table> {
        identity.expect_kind(ResourceKind::Table)?;
        Ok(Table {
            endpoint: self.endpoint.clone(),
            name: identity.name.clone(),
            schema: identity.require_key_schema()?.clone(),
            batch: self.batch.clone(),
        })
    }

    async fn describe(&self, name: &str) -> Result<Value> {
        let response = self
            .endpoint
            .call("DescribeTable", json!({"TableName": name}))
            .await?;
        response
            .get("Table")
            .cloned()
            .ok_or_else(|| Error::Response("missing 'Table'".to_string()))
    }
}

pub(crate) fn key_schema_from_description(table: &Value) -> Result<KeySchema> {
    let definitions = array_field(table, "AttributeDefinitions");
    let mut attributes = array_field(table, "KeySchema")
        .iter()
        .map(|element| {
            let name = required_str(element, "AttributeName")?;
            let role: KeyRole = required_str(element, "KeyType")?
                .parse()
                .map_err(Error::Response)?;
            let scalar_type: ScalarType = definitions
                .iter()
                .find(|d| str_field(d, "AttributeName").as_deref() == Some(name.as_str()))
                .and_then(|d| str_field(d, "AttributeType"))
                .ok_or_else(|| Error::Response(format!("no attribute definition for '{name}'")))?
                .parse()
                .map_err(Error::Response)?;
            Ok(KeyAttribute {
                name,
                role,
                scalar_type,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    attributes.sort_by_key(|a| a.role != KeyRole::Partition);
    KeySchema::from_attributes(attributes)
}

/// Table description flattened into an item
fn description_item(table: &Value) -> Item {
    let mut item = Item::new();
    for field in ["TableName", "TableStatus", "TableArn"] {
        if let Some(value) = str_field(table, field) {
            item.insert(field.to_string(), value.into());
        }
    }
    for field in ["ItemCount", "TableSizeBytes"] {
        if let Some(value) = i64_field(table, field) {
            item.insert(field.to_string(), value.into());
        }
    }
    if let Some(throughput) = table.get("ProvisionedThroughput") {
        for field in [READ_CAPACITY, WRITE_CAPACITY] {
            if let Some(value) = i64_field(throughput, field) {
                item.insert(field.to_string(), value.into());
            }
        }
    }
    if let Some(created) = timestamp_field(table, "CreationDateTime") {
        item.insert("CreationDateTime".to_string(), created.to_string().into());
    }
    if let Ok(schema) = key_schema_from_description(table) {
        let elements = schema
            .attributes()
            .iter()
            .map(|a| {
                AttributeValue::from(crate::item! {
                    "AttributeName" => a.name.as_str(),
                    "KeyType" => a.role.as_str(),
                    "AttributeType" => a.scalar_type.as_str(),
                })
            })
            .collect();
        item.insert("KeySchema".to_string(), AttributeValue::L(elements));
    }
    item
}

fn capacity_units(name: &str, value: &AttributeValue) -> Result<i64> {
    match value {
        AttributeValue::N(n) => n
            .as_str()
            .parse::<i64>()
            .ok()
            .filter(|units| *units > 0)
            .ok_or_else(|| Error::InvalidItem(format!("{name} must be a positive integer, got {n}"))),
        other => Err(Error::InvalidItem(format!(
            "{name} must be a number, got {other}"
        ))),
    }
}

/// Split throughput attributes out of `attributes`, rejecting anything else
fn throughput_attributes(attributes: &Item, verb: &str) -> Result<(Option<i64>, Option<i64>)> {
    let mut read = None;
    let mut write = None;
    for (name, value) in attributes {
        match name.as_str() {
            READ_CAPACITY => read = Some(capacity_units(name, value)?),
            WRITE_CAPACITY => write = Some(capacity_units(name, value)?),
            other => {
                return Err(Error::UnsupportedFeature(format!(
                    "Table attribute '{other}' cannot be {verb}"
                )));
            }
        }
    }
    Ok((read, write))
}

#[async_trait]
impl ResourceManager for TableClient {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Table
    }

    async fn create(&self, identity: &ResourceIdentity, attributes: Item) -> Result<Item> {
        identity.expect_kind(ResourceKind::Table)?;
        let schema = identity.require_key_schema()?;
        let (read, write) = throughput_attributes(&attributes, "set")?;

        let key_schema: Vec<Value> = schema
            .attributes()
            .iter()
            .map(|a| json!({"AttributeName": a.name, "KeyType": a.role.as_str()}))
            .collect();
        let definitions: Vec<Value> = schema
            .attributes()
            .iter()
            .map(|a| json!({"AttributeName": a.name, "AttributeType": a.scalar_type.as_str()}))
            .collect();

        self.endpoint
            .call(
                "CreateTable",
                json!({
                    "TableName": identity.name,
                    "KeySchema": key_schema,
                    "AttributeDefinitions": definitions,
                    "ProvisionedThroughput": {
                        READ_CAPACITY: read.unwrap_or(DEFAULT_CAPACITY_UNITS),
                        WRITE_CAPACITY: write.unwrap_or(DEFAULT_CAPACITY_UNITS),
                    },
                }),
            )
            .await?;
        self.endpoint.wait_until_exists(identity).await?;
        tracing::debug!(resource = %identity, "Table created");

        self.get(identity)
            .await?
            .ok_or_else(|| Error::NotFound(identity.to_string()))
    }

    async fn get(&self, identity: &ResourceIdentity) -> Result<Option<Item>> {
        identity.expect_kind(ResourceKind::Table)?;
        match self.describe(&identity.name).await {
            Ok(table) => Ok(Some(description_item(&table))),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn update(&self, identity: &ResourceIdentity, partial: Item) -> Result<Item> {
        identity.expect_kind(ResourceKind::Table)?;
        if partial.is_empty() {
            return Err(Error::InvalidItem("Nothing to update".to_string()));
        }
        let (read, write) = throughput_attributes(&partial, "updated")?;

        let current = self
            .get(identity)
            .await?
            .ok_or_else(|| Error::NotFound(identity.to_string()))?;
        let current_units = |name: &str| match current.get(name) {
            Some(value) => capacity_units(name, value),
            None => Ok(DEFAULT_CAPACITY_UNITS),
        };
        let read = match read {
            Some(units) => units,
            None => current_units(READ_CAPACITY)?,
        };
        let write = match write {
            Some(units) => units,
            None => current_units(WRITE_CAPACITY)?,
        };

        self.endpoint
            .call(
                "UpdateTable",
                json!({
                    "TableName": identity.name,
                    "ProvisionedThroughput": {READ_CAPACITY: read, WRITE_CAPACITY: write},
                }),
            )
            .await?;

        self.get(identity)
            .await?
            .ok_or_else(|| Error::NotFound(identity.to_string()))
    }

    async fn delete(&self, identity: &ResourceIdentity) -> Result<bool> {
        identity.expect_kind(ResourceKind::Table)?;
        let outcome = self
            .endpoint
            .call("DeleteTable", json!({"TableName": identity.name}))
            .await;
        let deleted = best_effort_delete(identity, "table", outcome)?;
        if deleted {
            self.endpoint.wait_until_not_exists(identity).await?;
        }
        Ok(deleted)
    }

    async fn list(&self, options: &ListOptions) -> Result<ListingPage<ResourceSummary>> {
        if options.prefix.is_some() {
            return Err(Error::UnsupportedFeature(
                "Table listing has no remote prefix filter".to_string(),
            ));
        }
        let mut params = Map::new();
        if let Some(token) = &options.continuation_token {
            params.insert("ExclusiveStartTableName".to_string(), json!(token));
        }
        if let Some(max) = options.max_keys {
            params.insert("Limit".to_string(), json!(max));
        }

        let response = self
            .endpoint
            .call("ListTables", Value::Object(params))
            .await?;

        let items = array_field(&response, "TableNames")
            .iter()
            .filter_map(Value::as_str)
            .map(|name| ResourceSummary::new(ResourceKind::Table, name))
            .collect();
        Ok(ListingPage::new(
            items,
            str_field(&response, "LastEvaluatedTableName"),
        ))
    }
}

/// Item operations on one table
#[derive(Debug, Clone)]
pub struct Table {
    endpoint: Endpoint,
    name: String,
    schema: KeySchema,
    batch: BatchPolicy,
}

impl Table {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_schema(&self) -> &KeySchema {
        &self.schema
    }

    fn key_value(&self, key: &Item) -> Result<Value> {
        Ok(serde_json::to_value(self.schema.extract_key(key)?)?)
    }

    /// Condition that the item addressed by the key exists
    fn exists_condition(&self) -> Predicate {
        attr(self.schema.partition_key().name.as_str()).exists()
    }

    /// Write the item at `key` with `attributes` and read it back
    ///
    /// Upserts: an existing item at the key is replaced. Key attributes in
    /// `key` take precedence over same-named entries in `attributes`.
    pub async fn create(&self, key: Item, attributes: Item) -> Result<Item> {
        let mut item = attributes;
        item.extend(self.schema.extract_key(&key)?);
        self.schema.validate_item(&item)?;

        self.endpoint
            .call(
                "PutItem",
                json!({"TableName": self.name, "Item": serde_json::to_value(&item)?}),
            )
            .await?;

        Ok(self.get(&key).await?.unwrap_or(item))
    }

    /// Item at `key`, or `None` when absent
    pub async fn get(&self, key: &Item) -> Result<Option<Item>> {
        let response = self
            .endpoint
            .call(
                "GetItem",
                json!({
                    "TableName": self.name,
                    "Key": self.key_value(key)?,
                    "ConsistentRead": true,
                }),
            )
            .await?;
        item_field(&response, "Item")
    }

    /// Set exactly the attributes in `partial` on the existing item at `key`
    pub async fn update(&self, key: &Item, partial: Item) -> Result<Item> {
        if partial.is_empty() {
            return Err(Error::InvalidItem("Nothing to update".to_string()));
        }
        if let Some(name) = partial.keys().find(|name| self.schema.is_key(name)) {
            return Err(Error::InvalidItem(format!(
                "Key attribute '{name}' cannot be updated"
            )));
        }

        let mut expressions = ExpressionBuilder::new();
        let update = expressions.update(&partial);
        let condition = expressions.condition(&self.exists_condition());

        let mut params = Map::new();
        params.insert("TableName".to_string(), json!(self.name));
        params.insert("Key".to_string(), self.key_value(key)?);
        params.insert("UpdateExpression".to_string(), json!(update));
        params.insert("ConditionExpression".to_string(), json!(condition));
        params.insert("ReturnValues".to_string(), json!("ALL_NEW"));
        expressions.apply(&mut params)?;

        let response = match self.endpoint.call("UpdateItem", Value::Object(params)).await {
            Ok(response) => response,
            Err(Error::NotFound(_)) => {
                return Err(Error::NotFound(format!(
                    "No item in table '{}' at {}",
                    self.name,
                    display_key(key)
                )));
            }
            Err(e) => return Err(e),
        };
        match item_field(&response, "Attributes")? {
            Some(item) => Ok(item),
            None => self
                .get(key)
                .await?
                .ok_or_else(|| Error::NotFound(display_key(key))),
        }
    }

    /// Delete the item at `key`; `false` when there was none
    pub async fn delete(&self, key: &Item) -> Result<bool> {
        let mut expressions = ExpressionBuilder::new();
        let condition = expressions.condition(&self.exists_condition());

        let mut params = Map::new();
        params.insert("TableName".to_string(), json!(self.name));
        params.insert("Key".to_string(), self.key_value(key)?);
        params.insert("ConditionExpression".to_string(), json!(condition));
        params.insert("ReturnValues".to_string(), json!("ALL_OLD"));
        expressions.apply(&mut params)?;

        let outcome = self.endpoint.call("DeleteItem", Value::Object(params)).await;
        best_effort_delete(
            &ResourceIdentity::table(self.name.as_str(), self.schema.clone()),
            &display_key(key),
            outcome,
        )
    }

    /// Apply puts and deletes in chunks, re-submitting unprocessed operations
    ///
    /// Every operation is checked against the key schema before anything is
    /// sent. Several operations on one key collapse to the last of them, which
    /// takes that last position in the batch. Operations still unprocessed
    /// after the retry budget come back in [`BatchResult::unprocessed`].
    pub async fn batch_write(
        &self,
        operations: Vec<BatchOperation>,
    ) -> Result<BatchResult<BatchOperation>> {
        let operations = self.collapse_duplicate_keys(operations)?;

        let result = send_in_chunks(operations, &self.batch, |chunk| async move {
            self.write_chunk(chunk).await
        })
        .await?;

        tracing::debug!(
            table = %self.name,
            chunks = result.chunks,
            processed = result.processed,
            unprocessed = result.unprocessed.len(),
            "Batch write finished"
        );
        Ok(result)
    }

    /// Keep only the last operation per key; a chunk with a repeated key is
    /// rejected by the service
    fn collapse_duplicate_keys(
        &self,
        operations: Vec<BatchOperation>,
    ) -> Result<Vec<BatchOperation>> {
        let submitted = operations.len();
        let mut latest: HashMap<Vec<String>, usize> = HashMap::with_capacity(submitted);
        let mut slots: Vec<Option<BatchOperation>> = Vec::with_capacity(submitted);
        for operation in operations {
            let key = self.key_fingerprint(operation.item())?;
            if let Some(previous) = latest.insert(key, slots.len()) {
                slots[previous] = None;
            }
            slots.push(Some(operation));
        }

        let collapsed: Vec<BatchOperation> = slots.into_iter().flatten().collect();
        if collapsed.len() < submitted {
            tracing::debug!(
                table = %self.name,
                dropped = submitted - collapsed.len(),
                "Collapsed batch operations sharing a key"
            );
        }
        Ok(collapsed)
    }

    fn key_fingerprint(&self, item: &Item) -> Result<Vec<String>> {
        Ok(self
            .schema
            .extract_key(item)?
            .values()
            .map(|value| match value {
                AttributeValue::N(number) => number.normalized(),
                other => other.to_string(),
            })
            .collect())
    }

    fn write_request(&self, operation: &BatchOperation) -> Result<Value> {
        Ok(match operation {
            BatchOperation::Put(item) => json!({"PutRequest": {"Item": serde_json::to_value(item)?}}),
            BatchOperation::Delete(key) => json!({"DeleteRequest": {"Key": self.key_value(key)?}}),
        })
    }

    /// Send one chunk and return the operations reported unprocessed, in chunk order
    async fn write_chunk(&self, chunk: Vec<BatchOperation>) -> Result<Vec<BatchOperation>> {
        let requests = chunk
            .iter()
            .map(|operation| self.write_request(operation))
            .collect::<Result<Vec<_>>>()?;

        let mut request_items = Map::new();
        request_items.insert(self.name.clone(), Value::Array(requests.clone()));
        let response = self
            .endpoint
            .call("BatchWriteItem", json!({"RequestItems": request_items}))
            .await?;

        let mut unprocessed: Vec<&Value> = response
            .get("UnprocessedItems")
            .and_then(|u| u.get(&self.name))
            .and_then(Value::as_array)
            .map(|requests| requests.iter().collect())
            .unwrap_or_default();
        if unprocessed.is_empty() {
            return Ok(Vec::new());
        }

        Ok(chunk
            .into_iter()
            .zip(requests)
            .filter_map(|(operation, request)| {
                let position = unprocessed.iter().position(|u| **u == request)?;
                unprocessed.swap_remove(position);
                Some(operation)
            })
            .collect())
    }

    /// Every item matching the key condition and optional filter
    ///
    /// The key condition must pin the partition key with `eq` and may add one
    /// sort-key condition; anything else fails with `InvalidQuery` before a
    /// remote call is made.
    pub async fn query(&self, key: &Predicate, filter: Option<&Predicate>) -> Result<Vec<Item>> {
        key.validate_key_condition(&self.schema)?;
        collect_all(paginate(|token| {
            let options = ListOptions::default().at(token);
            async move { self.query_page(key, filter, &options).await }
        }))
        .await
    }

    /// One page of a query
    pub async fn query_page(
        &self,
        key: &Predicate,
        filter: Option<&Predicate>,
        options: &ListOptions,
    ) -> Result<ListingPage<Item>> {
        key.validate_key_condition(&self.schema)?;
        self.read_page("Query", Some(key), filter, options).await
    }

    /// Every item matching `filter`, reading the whole table
    pub async fn scan(&self, filter: Option<&Predicate>) -> Result<Vec<Item>> {
        tracing::warn!(table = %self.name, "Scan reads every item in the table; prefer query");
        collect_all(paginate(|token| {
            let options = ListOptions::default().at(token);
            async move { self.read_page("Scan", None, filter, &options).await }
        }))
        .await
    }

    /// One page of a scan
    pub async fn scan_page(
        &self,
        filter: Option<&Predicate>,
        options: &ListOptions,
    ) -> Result<ListingPage<Item>> {
        tracing::warn!(table = %self.name, "Scan reads every item in the table; prefer query");
        self.read_page("Scan", None, filter, options).await
    }

    async fn read_page(
        &self,
        operation: &str,
        key: Option<&Predicate>,
        filter: Option<&Predicate>,
        options: &ListOptions,
    ) -> Result<ListingPage<Item>> {
        if options.prefix.is_some() {
            return Err(Error::UnsupportedFeature(format!(
                "{operation} takes predicates, not a prefix"
            )));
        }

        let mut expressions = ExpressionBuilder::new();
        let mut params = Map::new();
        params.insert("TableName".to_string(), json!(self.name));
        if let Some(key) = key {
            params.insert(
                "KeyConditionExpression".to_string(),
                json!(expressions.condition(key)),
            );
        }
        if let Some(filter) = filter {
            params.insert(
                "FilterExpression".to_string(),
                json!(expressions.condition(filter)),
            );
        }
        if let Some(max) = options.max_keys {
            params.insert("Limit".to_string(), json!(max));
        }
        if let Some(token) = &options.continuation_token {
            let start: Item = decode_token(token)?;
            params.insert("ExclusiveStartKey".to_string(), serde_json::to_value(start)?);
        }
        expressions.apply(&mut params)?;

        let response = self.endpoint.call(operation, Value::Object(params)).await?;

        let items = array_field(&response, "Items")
            .iter()
            .map(parse_item)
            .collect::<Result<Vec<_>>>()?;
        let token = item_field(&response, "LastEvaluatedKey")?
            .map(|last| encode_token(&last))
            .transpose()?;
        Ok(ListingPage::new(items, token))
    }
}

fn display_key(key: &Item) -> String {
    let parts: Vec<String> = key.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{{{}}}", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item;
    use crate::transport::MockTransport;

    fn products() -> ResourceIdentity {
        ResourceIdentity::table(
            "products",
            KeySchema::partition("category", ScalarType::S).with_sort("sku", ScalarType::S),
        )
    }

    fn table(mock: MockTransport) -> Table {
        TableClient::new(Arc::new(mock))
            .unwrap()
            .items(&products())
            .unwrap()
    }

    fn serving() -> MockTransport {
        let mut mock = MockTransport::new();
        mock.expect_serves()
            .returning(|service| service == Service::Table);
        mock
    }

    #[tokio::test]
    async fn test_query_without_partition_eq_never_calls_remote() {
        let mut mock = serving();
        mock.expect_invoke().never();
        let table = table(mock);

        let err = table
            .query(&attr("sku").begins_with("woo"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));

        let err = table
            .query_page(
                &attr("category").begins_with("cl"),
                None,
                &ListOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn test_query_renders_placeholders() {
        let mut mock = serving();
        mock.expect_invoke()
            .withf(|_, op, params| {
                op == "Query"
                    && params["KeyConditionExpression"] == "#n0 = :v0 AND begins_with(#n1, :v1)"
                    && params["FilterExpression"] == "#n2 = :v2"
                    && params["ExpressionAttributeNames"]["#n1"] == "sku"
                    && params["ExpressionAttributeValues"][":v0"]["S"] == "clothing"
            })
            .times(1)
            .returning(|_, _, _| {
                Ok(json!({"Items": [{"category": {"S": "clothing"}, "sku": {"S": "woo-1"}}]}))
            });

        let items = table(mock)
            .query(
                &(attr("category").eq("clothing") & attr("sku").begins_with("woo")),
                Some(&attr("inStock").eq(true)),
            )
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["sku"].as_str(), Some("woo-1"));
    }

    #[tokio::test]
    async fn test_update_rejects_key_attributes() {
        let mut mock = serving();
        mock.expect_invoke().never();
        let key = item! {"category" => "clothing", "sku" => "woo-1"};

        let err = table(mock)
            .update(&key, item! {"sku" => "woo-2"})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidItem(_)));
    }

    #[tokio::test]
    async fn test_update_missing_item_is_not_found() {
        let mut mock = serving();
        mock.expect_invoke()
            .withf(|_, op, params| {
                op == "UpdateItem"
                    && params["ConditionExpression"] == "attribute_exists(#n1)"
                    && params["ReturnValues"] == "ALL_NEW"
            })
            .returning(|_, _, _| {
                Err(crate::TransportError::new(
                    "ConditionalCheckFailedException",
                    "The conditional request failed",
                ))
            });
        let key = item! {"category" => "clothing", "sku" => "missing"};

        let err = table(mock)
            .update(&key, item! {"price" => 10})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(msg) if msg.contains("products")));
    }

    #[tokio::test]
    async fn test_batch_write_validates_before_sending() {
        let mut mock = serving();
        mock.expect_invoke().never();
        let operations = vec![
            BatchOperation::Put(item! {"category" => "a", "sku" => "1"}),
            BatchOperation::Put(item! {"category" => "a"}),
        ];

        let err = table(mock).batch_write(operations).await.unwrap_err();
        assert!(matches!(err, Error::InvalidItem(_)));
    }

    #[tokio::test]
    async fn test_batch_write_maps_unprocessed_back_in_order() {
        let mut mock = serving();
        let mut calls = 0;
        mock.expect_invoke()
            .withf(|_, op, _| op == "BatchWriteItem")
            .times(2)
            .returning(move |_, _, params| {
                calls += 1;
                let requests = params["RequestItems"]["products"].as_array().unwrap().clone();
                if calls == 1 {
                    // Second and third requests come back unprocessed
                    Ok(json!({"UnprocessedItems": {"products": [requests[2], requests[1]]}}))
                } else {
                    assert_eq!(requests.len(), 2);
                    Ok(json!({"UnprocessedItems": {}}))
                }
            });

        let operations: Vec<BatchOperation> = (0..3)
            .map(|i| BatchOperation::Put(item! {"category" => "a", "sku" => format!("{i}")}))
            .collect();
        let result = table(mock).batch_write(operations).await.unwrap();
        assert_eq!(result.chunks, 1);
        assert_eq!(result.requests, 2);
        assert_eq!(result.processed, 3);
        assert!(result.is_complete());
    }

    #[test]
    fn test_key_schema_from_description() {
        let description = json!({
            "KeySchema": [
                {"AttributeName": "sku", "KeyType": "RANGE"},
                {"AttributeName": "category", "KeyType": "HASH"},
            ],
            "AttributeDefinitions": [
                {"AttributeName": "category", "AttributeType": "S"},
                {"AttributeName": "sku", "AttributeType": "S"},
            ],
        });
        let schema = key_schema_from_description(&description).unwrap();
        assert_eq!(schema.partition_key().name, "category");
        assert_eq!(schema.sort_key().unwrap().name, "sku");
    }

    #[test]
    fn test_throughput_attributes() {
        let (read, write) =
            throughput_attributes(&item! {"ReadCapacityUnits" => 10}, "set").unwrap();
        assert_eq!(read, Some(10));
        assert_eq!(write, None);
        assert!(matches!(
            throughput_attributes(&item! {"BillingMode" => "PAY_PER_REQUEST"}, "set"),
            Err(Error::UnsupportedFeature(_))
        ));
        assert!(matches!(
            throughput_attributes(&item! {"ReadCapacityUnits" => 0}, "set"),
            Err(Error::InvalidItem(_))
        ));
    }
}
