//! Command implementations
//!
//! Each command group exposes a clap subcommand enum and an `execute`
//! function returning the process exit code.

pub mod bucket;
pub mod completions;
pub mod logs;
pub mod profile;
pub mod table;
pub mod topic;

use nb_core::value::item_to_plain_json;
use nb_core::{Item, ResourceSummary};

use crate::output::Formatter;

/// Item as plain JSON (numbers as numbers, binary as base64)
pub(crate) fn item_json(item: &Item) -> serde_json::Value {
    item_to_plain_json(item)
}

/// Print one item as JSON or as `key: value` lines
pub(crate) fn print_item(formatter: &Formatter, item: &Item) {
    if formatter.is_json() {
        formatter.json(&item_json(item));
        return;
    }
    let width = item.keys().map(String::len).max().unwrap_or(0);
    for (name, value) in item {
        let key = formatter.style_key(&format!("{name:<width$}"));
        formatter.println(&format!("{key}  {value}"));
    }
}

/// Print items as a JSON array or one JSON object per line
pub(crate) fn print_items(formatter: &Formatter, items: &[Item]) {
    if formatter.is_json() {
        let items: Vec<serde_json::Value> = items.iter().map(item_json).collect();
        formatter.json(&serde_json::json!({"items": items, "count": items.len()}));
    } else if items.is_empty() {
        formatter.println("No items found.");
    } else {
        for item in items {
            formatter.println(&item_json(item).to_string());
        }
        formatter.println(&format!("\nTotal: {} item(s)", items.len()));
    }
}

/// Print a resource listing under `label`
pub(crate) fn print_resources(formatter: &Formatter, label: &str, resources: &[ResourceSummary]) {
    if formatter.is_json() {
        let mut output = serde_json::Map::new();
        output.insert(label.to_string(), serde_json::json!(resources));
        formatter.json(&output);
    } else if resources.is_empty() {
        formatter.println(&format!("No {label} found."));
    } else {
        let rows = resources
            .iter()
            .map(|r| {
                vec![
                    formatter.style_name(&r.name),
                    r.created
                        .map(|t| formatter.style_date(&t.to_string()))
                        .unwrap_or_default(),
                    r.arn
                        .as_deref()
                        .map(|arn| formatter.style_arn(arn))
                        .unwrap_or_default(),
                ]
            })
            .collect();
        formatter.table(&["NAME", "CREATED", "ARN"], rows);
    }
}
