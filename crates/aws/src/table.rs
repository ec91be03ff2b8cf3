//! Table operations over aws-sdk-dynamodb

use std::collections::HashMap;

use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue as SdkValue, DeleteRequest, KeySchemaElement, KeyType,
    ProvisionedThroughput, PutRequest, ReturnValue, ScalarAttributeType, TableDescription,
    WriteRequest,
};
use nb_core::{Service, TransportError};
use serde_json::{Value, json};

use crate::convert::{
    fields, item_param, item_value, millis, opt_bool, opt_i32, opt_str,
    required_str, string_map, text,
};
use crate::error::{build_error, sdk_error};

fn invalid(message: impl Into<String>) -> TransportError {
    TransportError::new(TransportError::INVALID_PARAMETER, message)
}

/// Attribute-value placeholders of a request
fn expression_values(params: &Value) -> Result<Option<HashMap<String, SdkValue>>, TransportError> {
    item_param(params, "ExpressionAttributeValues")
}

fn throughput(params: &Value) -> Result<Option<ProvisionedThroughput>, TransportError> {
    let Some(value) = params.get("ProvisionedThroughput") else {
        return Ok(None);
    };
    let units = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| invalid(format!("Missing ProvisionedThroughput.{key}")))
    };
    ProvisionedThroughput::builder()
        .read_capacity_units(units("ReadCapacityUnits")?)
        .write_capacity_units(units("WriteCapacityUnits")?)
        .build()
        .map(Some)
        .map_err(build_error)
}

fn key_schema(params: &Value) -> Result<Vec<KeySchemaElement>, TransportError> {
    params
        .get("KeySchema")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(|element| {
            KeySchemaElement::builder()
                .attribute_name(required_str(element, "AttributeName")?)
                .key_type(KeyType::from(required_str(element, "KeyType")?))
                .build()
                .map_err(build_error)
        })
        .collect()
}

fn attribute_definitions(params: &Value) -> Result<Vec<AttributeDefinition>, TransportError> {
    params
        .get("AttributeDefinitions")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(|definition| {
            AttributeDefinition::builder()
                .attribute_name(required_str(definition, "AttributeName")?)
                .attribute_type(ScalarAttributeType::from(required_str(
                    definition,
                    "AttributeType",
                )?))
                .build()
                .map_err(build_error)
        })
        .collect()
}

/// Table description in the wire shape nb-core reads
fn description(table: &TableDescription) -> Value {
    let key_schema: Vec<Value> = table
        .key_schema()
        .iter()
        .map(|k| json!({"AttributeName": k.attribute_name(), "KeyType": k.key_type().as_str()}))
        .collect();
    let definitions: Vec<Value> = table
        .attribute_definitions()
        .iter()
        .map(|d| {
            json!({"AttributeName": d.attribute_name(), "AttributeType": d.attribute_type().as_str()})
        })
        .collect();

    let mut value = fields([
        ("TableName", text(table.table_name())),
        ("TableStatus", text(table.table_status().map(|s| s.as_str()))),
        ("TableArn", text(table.table_arn())),
        ("ItemCount", table.item_count().map(Value::from)),
        ("TableSizeBytes", table.table_size_bytes().map(Value::from)),
        ("CreationDateTime", table.creation_date_time().and_then(millis)),
    ]);
    value["KeySchema"] = json!(key_schema);
    value["AttributeDefinitions"] = json!(definitions);
    if let Some(units) = table.provisioned_throughput() {
        value["ProvisionedThroughput"] = fields([
            ("ReadCapacityUnits", units.read_capacity_units().map(Value::from)),
            ("WriteCapacityUnits", units.write_capacity_units().map(Value::from)),
        ]);
    }
    value
}

fn optional_item(map: Option<&HashMap<String, SdkValue>>) -> Result<Option<Value>, TransportError> {
    map.filter(|m| !m.is_empty()).map(item_value).transpose()
}

pub(crate) async fn invoke(client: &Client, operation: &str, params: &Value) -> Result<Value, TransportError> {
    match operation {
        "CreateTable" => {
            let response = client
                .create_table()
                .table_name(required_str(params, "TableName")?)
                .set_key_schema(Some(key_schema(params)?))
                .set_attribute_definitions(Some(attribute_definitions(params)?))
                .set_provisioned_throughput(throughput(params)?)
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(match response.table_description() {
                Some(table) => json!({"TableDescription": description(table)}),
                None => json!({}),
            })
        }
        "DescribeTable" => {
            let response = client
                .describe_table()
                .table_name(required_str(params, "TableName")?)
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            let table = response
                .table()
                .ok_or_else(|| TransportError::new("ResourceNotFoundException", "No table description"))?;
            Ok(json!({"Table": description(table)}))
        }
        "UpdateTable" => {
            client
                .update_table()
                .table_name(required_str(params, "TableName")?)
                .set_provisioned_throughput(throughput(params)?)
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(json!({}))
        }
        "DeleteTable" => {
            client
                .delete_table()
                .table_name(required_str(params, "TableName")?)
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(json!({}))
        }
        "ListTables" => {
            let response = client
                .list_tables()
                .set_exclusive_start_table_name(
                    opt_str(params, "ExclusiveStartTableName").map(str::to_string),
                )
                .set_limit(opt_i32(params, "Limit"))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            let mut value = json!({"TableNames": response.table_names()});
            if let Some(last) = response.last_evaluated_table_name() {
                value["LastEvaluatedTableName"] = json!(last);
            }
            Ok(value)
        }
        "PutItem" => {
            client
                .put_item()
                .table_name(required_str(params, "TableName")?)
                .set_item(item_param(params, "Item")?)
                .set_condition_expression(opt_str(params, "ConditionExpression").map(str::to_string))
                .set_expression_attribute_names(string_map(params, "ExpressionAttributeNames"))
                .set_expression_attribute_values(expression_values(params)?)
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(json!({}))
        }
        "GetItem" => {
            let response = client
                .get_item()
                .table_name(required_str(params, "TableName")?)
                .set_key(item_param(params, "Key")?)
                .set_consistent_read(opt_bool(params, "ConsistentRead"))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(fields([("Item", optional_item(response.item())?)]))
        }
        "UpdateItem" => {
            let response = client
                .update_item()
                .table_name(required_str(params, "TableName")?)
                .set_key(item_param(params, "Key")?)
                .set_update_expression(opt_str(params, "UpdateExpression").map(str::to_string))
                .set_condition_expression(opt_str(params, "ConditionExpression").map(str::to_string))
                .set_expression_attribute_names(string_map(params, "ExpressionAttributeNames"))
                .set_expression_attribute_values(expression_values(params)?)
                .set_return_values(opt_str(params, "ReturnValues").map(ReturnValue::from))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(fields([("Attributes", optional_item(response.attributes())?)]))
        }
        "DeleteItem" => {
            let response = client
                .delete_item()
                .table_name(required_str(params, "TableName")?)
                .set_key(item_param(params, "Key")?)
                .set_condition_expression(opt_str(params, "ConditionExpression").map(str::to_string))
                .set_expression_attribute_names(string_map(params, "ExpressionAttributeNames"))
                .set_expression_attribute_values(expression_values(params)?)
                .set_return_values(opt_str(params, "ReturnValues").map(ReturnValue::from))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(fields([("Attributes", optional_item(response.attributes())?)]))
        }
        "BatchWriteItem" => batch_write(client, params).await,
        "Query" | "Scan" => read(client, operation, params).await,
        other => Err(TransportError::new(
            TransportError::UNKNOWN_OPERATION,
            format!("{} has no operation {other}", Service::Table),
        )),
    }
}

fn write_request(request: &Value) -> Result<WriteRequest, TransportError> {
    if let Some(put) = request.get("PutRequest") {
        let item = PutRequest::builder()
            .set_item(item_param(put, "Item")?)
            .build()
            .map_err(build_error)?;
        Ok(WriteRequest::builder().put_request(item).build())
    } else if let Some(delete) = request.get("DeleteRequest") {
        let key = DeleteRequest::builder()
            .set_key(item_param(delete, "Key")?)
            .build()
            .map_err(build_error)?;
        Ok(WriteRequest::builder().delete_request(key).build())
    } else {
        Err(invalid("Write request needs a PutRequest or DeleteRequest"))
    }
}

/// SDK write request back in the wire shape, so callers can match it
fn request_value(request: &WriteRequest) -> Result<Value, TransportError> {
    if let Some(put) = request.put_request() {
        Ok(json!({"PutRequest": {"Item": item_value(put.item())?}}))
    } else if let Some(delete) = request.delete_request() {
        Ok(json!({"DeleteRequest": {"Key": item_value(delete.key())?}}))
    } else {
        Ok(json!({}))
    }
}

async fn batch_write(client: &Client, params: &Value) -> Result<Value, TransportError> {
    let request_items = params
        .get("RequestItems")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("Missing required parameter 'RequestItems'"))?
        .iter()
        .map(|(table, requests)| {
            let requests = requests
                .as_array()
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .map(write_request)
                .collect::<Result<Vec<_>, _>>()?;
            Ok((table.clone(), requests))
        })
        .collect::<Result<HashMap<_, _>, TransportError>>()?;

    let response = client
        .batch_write_item()
        .set_request_items(Some(request_items))
        .send()
        .await
        .map_err(|e| sdk_error("BatchWriteItem", e))?;

    let mut unprocessed = serde_json::Map::new();
    for (table, requests) in response.unprocessed_items().into_iter().flatten() {
        let requests = requests
            .iter()
            .map(request_value)
            .collect::<Result<Vec<_>, _>>()?;
        unprocessed.insert(table.clone(), Value::Array(requests));
    }
    Ok(json!({"UnprocessedItems": unprocessed}))
}

async fn read(client: &Client, operation: &str, params: &Value) -> Result<Value, TransportError> {
    let table = required_str(params, "TableName")?;
    let filter = opt_str(params, "FilterExpression").map(str::to_string);
    let names = string_map(params, "ExpressionAttributeNames");
    let values = expression_values(params)?;
    let limit = opt_i32(params, "Limit");
    let start = item_param(params, "ExclusiveStartKey")?;

    let (items, last) = if operation == "Query" {
        let response = client
            .query()
            .table_name(table)
            .set_key_condition_expression(
                opt_str(params, "KeyConditionExpression").map(str::to_string),
            )
            .set_filter_expression(filter)
            .set_expression_attribute_names(names)
            .set_expression_attribute_values(values)
            .set_limit(limit)
            .set_exclusive_start_key(start)
            .send()
            .await
            .map_err(|e| sdk_error(operation, e))?;
        (response.items().to_vec(), response.last_evaluated_key().cloned())
    } else {
        let response = client
            .scan()
            .table_name(table)
            .set_filter_expression(filter)
            .set_expression_attribute_names(names)
            .set_expression_attribute_values(values)
            .set_limit(limit)
            .set_exclusive_start_key(start)
            .send()
            .await
            .map_err(|e| sdk_error(operation, e))?;
        (response.items().to_vec(), response.last_evaluated_key().cloned())
    };

    let items = items
        .iter()
        .map(item_value)
        .collect::<Result<Vec<_>, _>>()?;
    let mut value = json!({"Items": items, "Count": items.len()});
    if let Some(last) = optional_item(last.as_ref())? {
        value["LastEvaluatedKey"] = last;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_requests_round_trip_for_matching() {
        let put = json!({"PutRequest": {"Item": {"category": {"S": "toys"}, "sku": {"S": "t1"}}}});
        let delete = json!({"DeleteRequest": {"Key": {"category": {"S": "toys"}, "sku": {"S": "t2"}}}});
        for request in [put, delete] {
            let sdk = write_request(&request).unwrap();
            assert_eq!(request_value(&sdk).unwrap(), request);
        }
        assert!(write_request(&json!({"Other": {}})).is_err());
    }

    #[test]
    fn test_throughput_requires_both_units() {
        let params = json!({"ProvisionedThroughput": {"ReadCapacityUnits": 5}});
        assert!(throughput(&params).is_err());
        assert!(throughput(&json!({})).unwrap().is_none());
        let both = json!({"ProvisionedThroughput": {"ReadCapacityUnits": 5, "WriteCapacityUnits": 2}});
        let units = throughput(&both).unwrap().unwrap();
        assert_eq!(units.write_capacity_units(), 2);
    }

    #[test]
    fn test_description_shape() {
        let table = TableDescription::builder()
            .table_name("products")
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name("category")
                    .key_type(KeyType::Hash)
                    .build()
                    .unwrap(),
            )
            .attribute_definitions(
                AttributeDefinition::builder()
                    .attribute_name("category")
                    .attribute_type(ScalarAttributeType::S)
                    .build()
                    .unwrap(),
            )
            .item_count(3)
            .build();
        let value = description(&table);
        assert_eq!(value["TableName"], "products");
        assert_eq!(value["KeySchema"][0]["KeyType"], "HASH");
        assert_eq!(value["AttributeDefinitions"][0]["AttributeType"], "S");
        assert_eq!(value["ItemCount"], 3);
    }
}
