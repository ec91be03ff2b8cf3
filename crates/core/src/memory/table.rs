//! Simulated key-value tables

use std::cmp::Ordering;
use std::collections::BTreeMap;

use jiff::Timestamp;
use serde_json::{Map, Value, json};

use super::{ACCOUNT_ID, Context, Reply, fail, page_limit, required, unknown_operation};
use crate::error::TransportError;
use crate::expression::{Placeholders, parse_condition, parse_update};
use crate::identity::KeySchema;
use crate::predicate::Predicate;
use crate::table::key_schema_from_description;
use crate::transport::Service;
use crate::value::Item;

/// Write requests per batch the service accepts
const MAX_BATCH_WRITE: usize = 25;

const VALIDATION: &str = "ValidationException";

fn invalid(message: impl std::fmt::Display) -> TransportError {
    fail(VALIDATION, message.to_string())
}

fn no_such_table(name: &str) -> TransportError {
    fail(
        "ResourceNotFoundException",
        format!("Requested resource not found: Table: {name} not found"),
    )
}

struct MemoryTable {
    /// `KeySchema` and `AttributeDefinitions` as supplied at creation
    definition: Value,
    schema: KeySchema,
    read_capacity: i64,
    write_capacity: i64,
    created: Timestamp,
    /// Items in key order
    items: Vec<Item>,
}

impl MemoryTable {
    fn key_order(&self, a: &Item, b: &Item) -> Ordering {
        self.schema
            .attributes()
            .iter()
            .map(|attr| match (a.get(&attr.name), b.get(&attr.name)) {
                (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            })
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    fn same_key(&self, a: &Item, b: &Item) -> bool {
        self.schema
            .attributes()
            .iter()
            .all(|attr| a.get(&attr.name) == b.get(&attr.name))
    }

    /// Key from a request, which must name exactly the key attributes
    fn parse_key(&self, value: Option<&Value>) -> Result<Item, TransportError> {
        let key: Item = value
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(invalid)?
            .ok_or_else(|| invalid("Missing required parameter 'Key'"))?;
        if key.len() != self.schema.attributes().len() || self.schema.validate_item(&key).is_err() {
            return Err(invalid("The provided key element does not match the schema"));
        }
        Ok(key)
    }

    fn position(&self, key: &Item) -> Option<usize> {
        self.items.iter().position(|item| self.same_key(item, key))
    }

    fn put(&mut self, item: Item) -> Result<Option<Item>, TransportError> {
        self.schema.validate_item(&item).map_err(invalid)?;
        match self.position(&item) {
            Some(index) => Ok(Some(std::mem::replace(&mut self.items[index], item))),
            None => {
                let index = self
                    .items
                    .partition_point(|existing| self.key_order(existing, &item) == Ordering::Less);
                self.items.insert(index, item);
                Ok(None)
            }
        }
    }

    fn remove(&mut self, key: &Item) -> Option<Item> {
        self.position(key).map(|index| self.items.remove(index))
    }

    fn description(&self, name: &str, status: &str, region: &str) -> Value {
        let size: usize = self
            .items
            .iter()
            .map(|item| serde_json::to_string(item).map_or(0, |s| s.len()))
            .sum();
        json!({
            "TableName": name,
            "TableStatus": status,
            "TableArn": format!("arn:aws:dynamodb:{region}:{ACCOUNT_ID}:table/{name}"),
            "KeySchema": self.definition["KeySchema"],
            "AttributeDefinitions": self.definition["AttributeDefinitions"],
            "ItemCount": self.items.len(),
            "TableSizeBytes": size,
            "CreationDateTime": self.created.to_string(),
            "ProvisionedThroughput": {
                "ReadCapacityUnits": self.read_capacity,
                "WriteCapacityUnits": self.write_capacity,
            },
        })
    }
}

fn placeholders(params: &Value) -> Result<Placeholders, TransportError> {
    Placeholders::from_params(params).map_err(invalid)
}

fn expression(
    params: &Value,
    key: &str,
    placeholders: &Placeholders,
) -> Result<Option<Predicate>, TransportError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(|text| parse_condition(text, placeholders).map_err(invalid))
        .transpose()
}

/// Reject the write when the request's condition does not hold for `current`
fn check_condition(params: &Value, current: Option<&Item>) -> Result<(), TransportError> {
    let placeholders = placeholders(params)?;
    if let Some(condition) = expression(params, "ConditionExpression", &placeholders)? {
        let empty = Item::new();
        if !condition.matches(current.unwrap_or(&empty)) {
            return Err(fail(
                "ConditionalCheckFailedException",
                "The conditional request failed",
            ));
        }
    }
    Ok(())
}

fn capacity(params: &Value, field: &str) -> Option<i64> {
    params
        .get("ProvisionedThroughput")
        .and_then(|t| t.get(field))
        .and_then(Value::as_i64)
}

#[derive(Default)]
pub(super) struct TableState {
    tables: BTreeMap<String, MemoryTable>,
}

impl TableState {
    pub(super) fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    fn table<'a>(
        &'a self,
        params: &'a Value,
    ) -> Result<(&'a str, &'a MemoryTable), TransportError> {
        let name = required(params, "TableName", VALIDATION)?;
        let table = self.tables.get(name).ok_or_else(|| no_such_table(name))?;
        Ok((name, table))
    }

    fn table_mut(&mut self, params: &Value) -> Result<&mut MemoryTable, TransportError> {
        let name = required(params, "TableName", VALIDATION)?;
        self.tables.get_mut(name).ok_or_else(|| no_such_table(name))
    }

    pub(super) fn handle(&mut self, ctx: &mut Context<'_>, operation: &str, params: &Value) -> Reply {
        match operation {
            "CreateTable" => self.create_table(ctx, params),
            "DescribeTable" => {
                let (name, table) = self.table(params)?;
                Ok(json!({"Table": table.description(name, "ACTIVE", ctx.region)}))
            }
            "UpdateTable" => {
                let table = self.table_mut(params)?;
                if let Some(read) = capacity(params, "ReadCapacityUnits") {
                    table.read_capacity = read;
                }
                if let Some(write) = capacity(params, "WriteCapacityUnits") {
                    table.write_capacity = write;
                }
                let (name, table) = self.table(params)?;
                Ok(json!({"TableDescription": table.description(name, "UPDATING", ctx.region)}))
            }
            "DeleteTable" => {
                let name = required(params, "TableName", VALIDATION)?;
                let table = self.tables.remove(name).ok_or_else(|| no_such_table(name))?;
                Ok(json!({"TableDescription": table.description(name, "DELETING", ctx.region)}))
            }
            "ListTables" => {
                let after = params.get("ExclusiveStartTableName").and_then(Value::as_str);
                let limit = page_limit(params, "Limit", ctx.page_size.min(100));
                let mut names = self
                    .tables
                    .keys()
                    .filter(|name| after.is_none_or(|after| name.as_str() > after));
                let page: Vec<&String> = names.by_ref().take(limit).collect();
                let more = names.next().is_some();

                let mut response = json!({"TableNames": page});
                if more && let Some(last) = page.last() {
                    response["LastEvaluatedTableName"] = json!(last);
                }
                Ok(response)
            }
            "PutItem" => {
                let item: Item = params
                    .get("Item")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(invalid)?
                    .ok_or_else(|| invalid("Missing required parameter 'Item'"))?;
                let table = self.table_mut(params)?;
                let current = table.position(&item).map(|index| &table.items[index]);
                check_condition(params, current)?;
                let previous = table.put(item)?;

                Ok(match (params.get("ReturnValues").and_then(Value::as_str), previous) {
                    (Some("ALL_OLD"), Some(previous)) => json!({"Attributes": previous}),
                    _ => json!({}),
                })
            }
            "GetItem" => {
                let (_, table) = self.table(params)?;
                let key = table.parse_key(params.get("Key"))?;
                Ok(match table.position(&key) {
                    Some(index) => json!({"Item": table.items[index]}),
                    None => json!({}),
                })
            }
            "UpdateItem" => self.update_item(params),
            "DeleteItem" => {
                let table = self.table_mut(params)?;
                let key = table.parse_key(params.get("Key"))?;
                let current = table.position(&key).map(|index| &table.items[index]);
                check_condition(params, current)?;
                let previous = table.remove(&key);

                Ok(match (params.get("ReturnValues").and_then(Value::as_str), previous) {
                    (Some("ALL_OLD"), Some(previous)) => json!({"Attributes": previous}),
                    _ => json!({}),
                })
            }
            "BatchWriteItem" => self.batch_write(ctx, params),
            "Query" => self.read(ctx, params, true),
            "Scan" => self.read(ctx, params, false),
            other => Err(unknown_operation(Service::Table, other)),
        }
    }

    fn create_table(&mut self, ctx: &mut Context<'_>, params: &Value) -> Reply {
        let name = required(params, "TableName", VALIDATION)?;
        if self.tables.contains_key(name) {
            return Err(fail(
                "ResourceInUseException",
                format!("Table already exists: {name}"),
            ));
        }
        let schema = key_schema_from_description(params).map_err(invalid)?;
        let table = MemoryTable {
            definition: json!({
                "KeySchema": params["KeySchema"],
                "AttributeDefinitions": params["AttributeDefinitions"],
            }),
            schema,
            read_capacity: capacity(params, "ReadCapacityUnits").unwrap_or(5),
            write_capacity: capacity(params, "WriteCapacityUnits").unwrap_or(5),
            created: ctx.now,
            items: Vec::new(),
        };
        let description = table.description(name, "CREATING", ctx.region);
        self.tables.insert(name.to_string(), table);
        Ok(json!({"TableDescription": description}))
    }

    fn update_item(&mut self, params: &Value) -> Reply {
        let placeholders = placeholders(params)?;
        let text = required(params, "UpdateExpression", VALIDATION)?;
        let assignments = parse_update(text, &placeholders).map_err(invalid)?;

        let table = self.table_mut(params)?;
        let key = table.parse_key(params.get("Key"))?;
        if let Some(name) = assignments.keys().find(|name| table.schema.is_key(name)) {
            return Err(invalid(format!(
                "Cannot update attribute {name}. This attribute is part of the key"
            )));
        }
        let current = table.position(&key).map(|index| &table.items[index]);
        check_condition(params, current)?;

        let mut item = current.cloned().unwrap_or_else(|| key.clone());
        item.extend(assignments);
        table.put(item.clone())?;

        Ok(match params.get("ReturnValues").and_then(Value::as_str) {
            Some("ALL_NEW") => json!({"Attributes": item}),
            _ => json!({}),
        })
    }

    fn batch_write(&mut self, ctx: &mut Context<'_>, params: &Value) -> Reply {
        let request_items = params
            .get("RequestItems")
            .and_then(Value::as_object)
            .ok_or_else(|| invalid("Missing required parameter 'RequestItems'"))?;
        let total: usize = request_items
            .values()
            .map(|requests| requests.as_array().map_or(0, Vec::len))
            .sum();
        if total == 0 || total > MAX_BATCH_WRITE {
            return Err(invalid(format!(
                "Member must have length less than or equal to {MAX_BATCH_WRITE} and at least 1"
            )));
        }

        let mut unprocessed = Map::new();
        for (name, requests) in request_items {
            let requests = requests.as_array().cloned().unwrap_or_default();
            let refused = ctx.take_unprocessed(requests.len());
            let accepted = requests.len() - refused;
            let table = self
                .tables
                .get_mut(name)
                .ok_or_else(|| no_such_table(name))?;

            let mut writes: Vec<(Item, Option<Item>)> = Vec::with_capacity(requests.len());
            for request in &requests {
                let write = if let Some(put) = request.get("PutRequest") {
                    let item: Item =
                        serde_json::from_value(put["Item"].clone()).map_err(invalid)?;
                    let key = table.schema.extract_key(&item).map_err(invalid)?;
                    (key, Some(item))
                } else if let Some(delete) = request.get("DeleteRequest") {
                    (table.parse_key(delete.get("Key"))?, None)
                } else {
                    return Err(invalid("Write request needs PutRequest or DeleteRequest"));
                };
                if writes.iter().any(|(key, _)| table.same_key(key, &write.0)) {
                    return Err(invalid("Provided list of item keys contains duplicates"));
                }
                writes.push(write);
            }

            for (key, item) in writes.into_iter().take(accepted) {
                match item {
                    Some(item) => {
                        table.put(item)?;
                    }
                    None => {
                        table.remove(&key);
                    }
                }
            }
            if refused > 0 {
                unprocessed.insert(name.clone(), Value::Array(requests[accepted..].to_vec()));
            }
        }
        Ok(json!({"UnprocessedItems": unprocessed}))
    }

    fn read(&self, ctx: &Context<'_>, params: &Value, query: bool) -> Reply {
        let (_, table) = self.table(params)?;
        let placeholders = placeholders(params)?;
        let key_condition = if query {
            let condition = expression(params, "KeyConditionExpression", &placeholders)?
                .ok_or_else(|| invalid("Missing required parameter 'KeyConditionExpression'"))?;
            condition
                .validate_key_condition(&table.schema)
                .map_err(invalid)?;
            Some(condition)
        } else {
            None
        };
        let filter = expression(params, "FilterExpression", &placeholders)?;
        let start = match params.get("ExclusiveStartKey") {
            Some(key) => Some(table.parse_key(Some(key))?),
            None => None,
        };
        let limit = page_limit(params, "Limit", ctx.page_size);

        let mut candidates = table
            .items
            .iter()
            .filter(|item| key_condition.as_ref().is_none_or(|k| k.matches(item)))
            .skip_while(|item| {
                start
                    .as_ref()
                    .is_some_and(|start| table.key_order(item, start) != Ordering::Greater)
            });
        let evaluated: Vec<&Item> = candidates.by_ref().take(limit).collect();
        let more = candidates.next().is_some();

        let items: Vec<&Item> = evaluated
            .iter()
            .copied()
            .filter(|item| filter.as_ref().is_none_or(|f| f.matches(item)))
            .collect();
        let mut response = json!({
            "Items": items,
            "Count": items.len(),
            "ScannedCount": evaluated.len(),
        });
        if more && let Some(last) = evaluated.last() {
            let key: Item = table
                .schema
                .attributes()
                .iter()
                .filter_map(|a| last.get(&a.name).map(|v| (a.name.clone(), v.clone())))
                .collect();
            response["LastEvaluatedKey"] = json!(key);
        }
        Ok(response)
    }
}
