//! table command - Manage key-value tables and their items
//!
//! Keys are given as `name=value` pairs (`--key category=clothing --key
//! sku=woo-1`); items as JSON objects.

use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use nb_core::{
    BatchOperation, BatchResult, Item, KeySchema, ListOptions, ResourceIdentity,
    ResourceManager as _, Table, TableClient, collect_all, list_all,
};
use serde::Serialize;
use tokio::io::AsyncReadExt as _;

use crate::commands::{item_json, print_item, print_items, print_resources};
use crate::context::Session;
use crate::exit_code::ExitCode;
use crate::parse::{
    parse_attributes, parse_conditions, parse_item, parse_items, parse_key_attribute,
};

#[derive(Subcommand, Debug)]
pub enum TableCommands {
    /// Create a table
    Create(CreateArgs),

    /// List tables
    List,

    /// Show a table's key schema, status and capacity
    Info(TableArg),

    /// Delete a table
    Delete(TableArg),

    /// Write an item, replacing any item with the same key
    Put(PutArgs),

    /// Read one item by key
    Get(KeyArgs),

    /// Set attributes on an existing item
    Update(UpdateArgs),

    /// Delete one item by key
    Remove(KeyArgs),

    /// Write many items from a JSON array or JSON lines
    BatchPut(BatchPutArgs),

    /// Items matching a key condition
    Query(QueryArgs),

    /// Every item matching a filter (reads the whole table)
    Scan(ScanArgs),
}

#[derive(Args, Debug)]
pub struct TableArg {
    /// Table name
    pub table: String,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Table name
    pub table: String,

    /// Partition key as name:TYPE (S, N or B)
    #[arg(long, value_name = "NAME:TYPE")]
    pub partition: String,

    /// Sort key as name:TYPE
    #[arg(long, value_name = "NAME:TYPE")]
    pub sort: Option<String>,

    /// Provisioned read capacity units
    #[arg(long)]
    pub read_capacity: Option<i64>,

    /// Provisioned write capacity units
    #[arg(long)]
    pub write_capacity: Option<i64>,
}

#[derive(Args, Debug)]
pub struct PutArgs {
    /// Table name
    pub table: String,

    /// Item as a JSON object, key attributes included
    pub item: String,
}

#[derive(Args, Debug)]
pub struct KeyArgs {
    /// Table name
    pub table: String,

    /// Key attribute as name=value (repeat for the sort key)
    #[arg(short, long = "key", value_name = "NAME=VALUE", required = true)]
    pub keys: Vec<String>,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Table name
    pub table: String,

    /// Key attribute as name=value (repeat for the sort key)
    #[arg(short, long = "key", value_name = "NAME=VALUE", required = true)]
    pub keys: Vec<String>,

    /// Attribute to set as name=value (repeatable)
    #[arg(short, long = "set", value_name = "NAME=VALUE", required = true)]
    pub set: Vec<String>,
}

#[derive(Args, Debug)]
pub struct BatchPutArgs {
    /// Table name
    pub table: String,

    /// File with a JSON array or one JSON object per line; `-` reads stdin
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Table name
    pub table: String,

    /// Key condition term (partition key equality required, one sort key term allowed)
    #[arg(short, long = "key", value_name = "CONDITION", required = true)]
    pub key: Vec<String>,

    /// Filter term applied after the key condition (repeatable)
    #[arg(short, long, value_name = "CONDITION")]
    pub filter: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Table name
    pub table: String,

    /// Filter term (repeatable)
    #[arg(short, long, value_name = "CONDITION")]
    pub filter: Vec<String>,
}

#[derive(Debug, Serialize)]
struct BatchOutput {
    table: String,
    chunks: usize,
    requests: usize,
    retries: u32,
    processed: usize,
    unprocessed: Vec<serde_json::Value>,
}

impl BatchOutput {
    fn new(table: &str, result: &BatchResult<BatchOperation>) -> Self {
        Self {
            table: table.to_string(),
            chunks: result.chunks,
            requests: result.requests,
            retries: result.retries,
            processed: result.processed,
            unprocessed: result
                .unprocessed
                .iter()
                .map(|operation| item_json(operation.item()))
                .collect(),
        }
    }
}

/// Execute a table subcommand
pub async fn execute(cmd: TableCommands, session: &Session) -> ExitCode {
    let tables = match session.tables().await {
        Ok(tables) => tables,
        Err(e) => return session.fail("Failed to connect to the table service", &e),
    };

    match cmd {
        TableCommands::Create(args) => execute_create(args, &tables, session).await,
        TableCommands::List => execute_list(&tables, session).await,
        TableCommands::Info(args) => execute_info(args, &tables, session).await,
        TableCommands::Delete(args) => execute_delete(args, &tables, session).await,
        TableCommands::Put(args) => execute_put(args, &tables, session).await,
        TableCommands::Get(args) => execute_get(args, &tables, session).await,
        TableCommands::Update(args) => execute_update(args, &tables, session).await,
        TableCommands::Remove(args) => execute_remove(args, &tables, session).await,
        TableCommands::BatchPut(args) => execute_batch_put(args, &tables, session).await,
        TableCommands::Query(args) => execute_query(args, &tables, session).await,
        TableCommands::Scan(args) => execute_scan(args, &tables, session).await,
    }
}

fn key_schema(args: &CreateArgs) -> Result<KeySchema, crate::parse::ParseError> {
    let (name, scalar_type) = parse_key_attribute(&args.partition)?;
    let mut schema = KeySchema::partition(name, scalar_type);
    if let Some(sort) = &args.sort {
        let (name, scalar_type) = parse_key_attribute(sort)?;
        schema = schema.with_sort(name, scalar_type);
    }
    Ok(schema)
}

fn capacity_attributes(args: &CreateArgs) -> Item {
    let mut attributes = Item::new();
    if let Some(units) = args.read_capacity {
        attributes.insert("ReadCapacityUnits".to_string(), units.into());
    }
    if let Some(units) = args.write_capacity {
        attributes.insert("WriteCapacityUnits".to_string(), units.into());
    }
    attributes
}

/// Item handle for an existing table, reading its key schema from the service
async fn open_table(
    name: &str,
    tables: &TableClient,
    session: &Session,
) -> Result<Table, ExitCode> {
    let identity = session
        .read(|| tables.resolve(name))
        .await
        .map_err(|e| session.fail(&format!("Failed to open table '{name}'"), &e))?;
    tables
        .items(&identity)
        .map_err(|e| session.fail(&format!("Failed to open table '{name}'"), &e))
}

fn parse_pairs(keys: &[String], session: &Session) -> Result<Item, ExitCode> {
    parse_attributes(keys).map_err(|e| {
        session.formatter.error(&e.to_string());
        ExitCode::UsageError
    })
}

async fn execute_create(args: CreateArgs, tables: &TableClient, session: &Session) -> ExitCode {
    let formatter = &session.formatter;
    let schema = match key_schema(&args) {
        Ok(schema) => schema,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::UsageError;
        }
    };
    let identity = ResourceIdentity::table(&args.table, schema);

    let spinner = formatter.spinner(&format!("Creating table '{}'...", args.table));
    let outcome = tables.create(&identity, capacity_attributes(&args)).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    match outcome {
        Ok(description) => {
            if formatter.is_json() {
                formatter.json(&item_json(&description));
            } else {
                let name = formatter.style_name(&args.table);
                formatter.success(&format!("Table '{name}' created."));
            }
            ExitCode::Success
        }
        Err(e) => session.fail("Failed to create table", &e),
    }
}

async fn execute_list(tables: &TableClient, session: &Session) -> ExitCode {
    match session
        .read(|| collect_all(list_all(tables, ListOptions::default())))
        .await
    {
        Ok(names) => {
            print_resources(&session.formatter, "tables", &names);
            ExitCode::Success
        }
        Err(e) => session.fail("Failed to list tables", &e),
    }
}

async fn execute_info(args: TableArg, tables: &TableClient, session: &Session) -> ExitCode {
    let identity = ResourceIdentity::table_by_name(&args.table);
    match session.read(|| tables.get(&identity)).await {
        Ok(Some(description)) => {
            print_item(&session.formatter, &description);
            ExitCode::Success
        }
        Ok(None) => {
            session
                .formatter
                .error(&format!("Table '{}' does not exist", args.table));
            ExitCode::NotFound
        }
        Err(e) => session.fail("Failed to describe table", &e),
    }
}

async fn execute_delete(args: TableArg, tables: &TableClient, session: &Session) -> ExitCode {
    let formatter = &session.formatter;
    let identity = ResourceIdentity::table_by_name(&args.table);

    let spinner = formatter.spinner(&format!("Deleting table '{}'...", args.table));
    let outcome = tables.delete(&identity).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    match outcome {
        Ok(true) => {
            if formatter.is_json() {
                formatter.json(&serde_json::json!({"table": args.table, "deleted": true}));
            } else {
                let name = formatter.style_name(&args.table);
                formatter.success(&format!("Table '{name}' deleted."));
            }
            ExitCode::Success
        }
        Ok(false) => {
            formatter.error(&format!(
                "Table '{}' was not deleted (missing or not confirmed)",
                args.table
            ));
            ExitCode::NotFound
        }
        Err(e) => session.fail("Failed to delete table", &e),
    }
}

async fn execute_put(args: PutArgs, tables: &TableClient, session: &Session) -> ExitCode {
    let item = match parse_item(&args.item) {
        Ok(item) => item,
        Err(e) => {
            session.formatter.error(&e.to_string());
            return ExitCode::UsageError;
        }
    };
    let table = match open_table(&args.table, tables, session).await {
        Ok(table) => table,
        Err(code) => return code,
    };

    match table.create(item.clone(), item).await {
        Ok(stored) => {
            let formatter = &session.formatter;
            if formatter.is_json() {
                formatter.json(&item_json(&stored));
            } else {
                formatter.success(&format!(
                    "Item written to '{}'.",
                    formatter.style_name(&args.table)
                ));
            }
            ExitCode::Success
        }
        Err(e) => session.fail("Failed to write item", &e),
    }
}

async fn execute_get(args: KeyArgs, tables: &TableClient, session: &Session) -> ExitCode {
    let key = match parse_pairs(&args.keys, session) {
        Ok(key) => key,
        Err(code) => return code,
    };
    let table = match open_table(&args.table, tables, session).await {
        Ok(table) => table,
        Err(code) => return code,
    };

    match session.read(|| table.get(&key)).await {
        Ok(Some(item)) => {
            print_item(&session.formatter, &item);
            ExitCode::Success
        }
        Ok(None) => {
            session
                .formatter
                .error(&format!("No item in '{}' at that key", args.table));
            ExitCode::NotFound
        }
        Err(e) => session.fail("Failed to read item", &e),
    }
}

async fn execute_update(args: UpdateArgs, tables: &TableClient, session: &Session) -> ExitCode {
    let key = match parse_pairs(&args.keys, session) {
        Ok(key) => key,
        Err(code) => return code,
    };
    let partial = match parse_pairs(&args.set, session) {
        Ok(partial) => partial,
        Err(code) => return code,
    };
    let table = match open_table(&args.table, tables, session).await {
        Ok(table) => table,
        Err(code) => return code,
    };

    match table.update(&key, partial).await {
        Ok(updated) => {
            print_item(&session.formatter, &updated);
            ExitCode::Success
        }
        Err(e) => session.fail("Failed to update item", &e),
    }
}

async fn execute_remove(args: KeyArgs, tables: &TableClient, session: &Session) -> ExitCode {
    let formatter = &session.formatter;
    let key = match parse_pairs(&args.keys, session) {
        Ok(key) => key,
        Err(code) => return code,
    };
    let table = match open_table(&args.table, tables, session).await {
        Ok(table) => table,
        Err(code) => return code,
    };

    match table.delete(&key).await {
        Ok(true) => {
            if formatter.is_json() {
                formatter.json(&serde_json::json!({"table": args.table, "deleted": true}));
            } else {
                formatter.success("Item deleted.");
            }
            ExitCode::Success
        }
        Ok(false) => {
            formatter.error(&format!("No item in '{}' at that key", args.table));
            ExitCode::NotFound
        }
        Err(e) => session.fail("Failed to delete item", &e),
    }
}

async fn read_input(path: &Path) -> std::io::Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        tokio::io::stdin().read_to_string(&mut text).await?;
        Ok(text)
    } else {
        tokio::fs::read_to_string(path).await
    }
}

async fn execute_batch_put(
    args: BatchPutArgs,
    tables: &TableClient,
    session: &Session,
) -> ExitCode {
    let formatter = &session.formatter;
    let text = match read_input(&args.file).await {
        Ok(text) => text,
        Err(e) => {
            formatter.error(&format!("Cannot read '{}': {e}", args.file.display()));
            return ExitCode::UsageError;
        }
    };
    let items = match parse_items(&text) {
        Ok(items) => items,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::UsageError;
        }
    };
    let table = match open_table(&args.table, tables, session).await {
        Ok(table) => table,
        Err(code) => return code,
    };

    let spinner = formatter.spinner(&format!("Writing {} item(s)...", items.len()));
    let outcome = table
        .batch_write(items.into_iter().map(BatchOperation::Put).collect())
        .await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let result = match outcome {
        Ok(result) => result,
        Err(e) => return session.fail("Batch write failed", &e),
    };

    if formatter.is_json() {
        formatter.json(&BatchOutput::new(&args.table, &result));
    } else {
        formatter.println(&format!(
            "Wrote {} item(s) in {} chunk(s), {} request(s)",
            result.processed, result.chunks, result.requests
        ));
    }
    if result.is_complete() {
        ExitCode::Success
    } else {
        formatter.warning(&format!(
            "{} item(s) were still unprocessed after retries",
            result.unprocessed.len()
        ));
        ExitCode::Incomplete
    }
}

async fn execute_query(args: QueryArgs, tables: &TableClient, session: &Session) -> ExitCode {
    let formatter = &session.formatter;
    let (key, filter) = match (parse_conditions(&args.key), parse_conditions(&args.filter)) {
        (Ok(Some(key)), Ok(filter)) => (key, filter),
        (Ok(None), _) => {
            formatter.error("A key condition is required");
            return ExitCode::UsageError;
        }
        (Err(e), _) | (_, Err(e)) => {
            formatter.error(&e.to_string());
            return ExitCode::UsageError;
        }
    };
    let table = match open_table(&args.table, tables, session).await {
        Ok(table) => table,
        Err(code) => return code,
    };

    match session.read(|| table.query(&key, filter.as_ref())).await {
        Ok(items) => {
            print_items(formatter, &items);
            ExitCode::Success
        }
        Err(e) => session.fail("Query failed", &e),
    }
}

async fn execute_scan(args: ScanArgs, tables: &TableClient, session: &Session) -> ExitCode {
    let filter = match parse_conditions(&args.filter) {
        Ok(filter) => filter,
        Err(e) => {
            session.formatter.error(&e.to_string());
            return ExitCode::UsageError;
        }
    };
    let table = match open_table(&args.table, tables, session).await {
        Ok(table) => table,
        Err(code) => return code,
    };

    match session.read(|| table.scan(filter.as_ref())).await {
        Ok(items) => {
            print_items(&session.formatter, &items);
            ExitCode::Success
        }
        Err(e) => session.fail("Scan failed", &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nb_core::{ScalarType, item};

    fn create_args(partition: &str, sort: Option<&str>) -> CreateArgs {
        CreateArgs {
            table: "products".to_string(),
            partition: partition.to_string(),
            sort: sort.map(str::to_string),
            read_capacity: Some(10),
            write_capacity: None,
        }
    }

    #[test]
    fn test_key_schema_from_flags() {
        let schema = key_schema(&create_args("category:S", Some("sku:S"))).unwrap();
        assert_eq!(
            schema,
            KeySchema::partition("category", ScalarType::S).with_sort("sku", ScalarType::S)
        );
        assert!(key_schema(&create_args("category", None)).is_err());
    }

    #[test]
    fn test_capacity_attributes() {
        assert_eq!(
            capacity_attributes(&create_args("category:S", None)),
            item! {"ReadCapacityUnits" => 10i64}
        );
    }

    #[test]
    fn test_batch_output_shape() {
        let result = BatchResult {
            chunks: 8,
            requests: 9,
            retries: 1,
            processed: 199,
            unprocessed: vec![BatchOperation::Put(
                item! {"category" => "clothing", "sku" => "woo-200"},
            )],
        };
        insta::assert_json_snapshot!(BatchOutput::new("products", &result), @r#"
        {
          "table": "products",
          "chunks": 8,
          "requests": 9,
          "retries": 1,
          "processed": 199,
          "unprocessed": [
            {
              "category": "clothing",
              "sku": "woo-200"
            }
          ]
        }
        "#);
    }
}
