//! bucket command - Manage storage buckets and their objects

use std::path::PathBuf;

use bytes::Bytes;
use clap::{Args, Subcommand, ValueEnum};
use nb_core::{
    Item, ListOptions, ObjectSummary, ObjectVersion, ResourceIdentity, ResourceManager as _,
    Result, StorageClient, collect_all, list_all, paginate,
};
use serde::Serialize;
use tokio::io::AsyncWriteExt as _;

use crate::commands::{item_json, print_item, print_resources};
use crate::context::Session;
use crate::exit_code::ExitCode;
use crate::output::human_size;

#[derive(Subcommand, Debug)]
pub enum BucketCommands {
    /// Create a bucket
    Create(CreateArgs),

    /// List buckets
    List(PrefixArgs),

    /// Show bucket region and versioning
    Info(BucketArg),

    /// Delete a bucket
    Delete(DeleteArgs),

    /// Show or change the versioning state
    Versioning(VersioningArgs),

    /// Upload a file as an object
    Put(PutArgs),

    /// Download an object
    Get(GetArgs),

    /// Show object metadata
    Stat(ObjectArgs),

    /// Delete an object, or one version of it
    Rm(RmArgs),

    /// List objects
    Ls(ObjectListArgs),

    /// List object versions and delete markers
    Versions(ObjectListArgs),

    /// Permanently delete every object version under a prefix
    Purge(ObjectListArgs),
}

#[derive(Args, Debug)]
pub struct BucketArg {
    /// Bucket name
    pub bucket: String,
}

#[derive(Args, Debug)]
pub struct PrefixArgs {
    /// Only names starting with this prefix
    #[arg(long)]
    pub prefix: Option<String>,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Bucket name
    pub bucket: String,

    /// Region to place the bucket in (defaults to the profile region)
    #[arg(long)]
    pub location: Option<String>,

    /// Enable versioning right after creation
    #[arg(long)]
    pub versioning: bool,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Bucket name
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub bucket: Option<String>,

    /// Delete every bucket, skipping those that fail
    #[arg(long)]
    pub all: bool,

    /// Only with --all: buckets whose name starts with this prefix
    #[arg(long, requires = "all")]
    pub prefix: Option<String>,

    /// Delete every object version first
    #[arg(long)]
    pub purge: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum VersioningChange {
    Enable,
    Suspend,
}

#[derive(Args, Debug)]
pub struct VersioningArgs {
    /// Bucket name
    pub bucket: String,

    /// New state; omit to show the current one
    #[arg(value_enum)]
    pub change: Option<VersioningChange>,
}

#[derive(Args, Debug)]
pub struct PutArgs {
    /// Bucket name
    pub bucket: String,

    /// Object key
    pub key: String,

    /// Local file to upload
    pub file: PathBuf,

    /// Content type (guessed from the file name when omitted)
    #[arg(long)]
    pub content_type: Option<String>,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Bucket name
    pub bucket: String,

    /// Object key
    pub key: String,

    /// Read a specific version
    #[arg(long)]
    pub version_id: Option<String>,

    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ObjectArgs {
    /// Bucket name
    pub bucket: String,

    /// Object key
    pub key: String,
}

#[derive(Args, Debug)]
pub struct RmArgs {
    /// Bucket name
    pub bucket: String,

    /// Object key
    pub key: String,

    /// Permanently delete this version instead of adding a delete marker
    #[arg(long)]
    pub version_id: Option<String>,
}

#[derive(Args, Debug)]
pub struct ObjectListArgs {
    /// Bucket name
    pub bucket: String,

    /// Only keys starting with this prefix
    #[arg(long)]
    pub prefix: Option<String>,
}

#[derive(Debug, Serialize)]
struct VersioningOutput {
    bucket: String,
    status: String,
}

#[derive(Debug, Serialize)]
struct ObjectListOutput {
    bucket: String,
    objects: Vec<ObjectSummary>,
    total_size_bytes: i64,
}

#[derive(Debug, Serialize)]
struct VersionListOutput {
    bucket: String,
    versions: Vec<ObjectVersion>,
}

#[derive(Debug, Serialize)]
struct SweepOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    prefix: Option<String>,
    deleted: usize,
}

#[derive(Debug, Serialize)]
struct PurgeOutput {
    bucket: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    prefix: Option<String>,
    deleted: usize,
}

/// Execute a bucket subcommand
pub async fn execute(cmd: BucketCommands, session: &Session) -> ExitCode {
    let storage = match session.storage().await {
        Ok(storage) => storage,
        Err(e) => return session.fail("Failed to connect to object storage", &e),
    };

    match cmd {
        BucketCommands::Create(args) => execute_create(args, &storage, session).await,
        BucketCommands::List(args) => execute_list(args, &storage, session).await,
        BucketCommands::Info(args) => execute_info(args, &storage, session).await,
        BucketCommands::Delete(args) => execute_delete(args, &storage, session).await,
        BucketCommands::Versioning(args) => execute_versioning(args, &storage, session).await,
        BucketCommands::Put(args) => execute_put(args, &storage, session).await,
        BucketCommands::Get(args) => execute_get(args, &storage, session).await,
        BucketCommands::Stat(args) => execute_stat(args, &storage, session).await,
        BucketCommands::Rm(args) => execute_rm(args, &storage, session).await,
        BucketCommands::Ls(args) => execute_ls(args, &storage, session).await,
        BucketCommands::Versions(args) => execute_versions(args, &storage, session).await,
        BucketCommands::Purge(args) => execute_purge(args, &storage, session).await,
    }
}

fn create_attributes(args: &CreateArgs) -> Item {
    let mut attributes = Item::new();
    if let Some(location) = &args.location {
        attributes.insert("Region".to_string(), location.as_str().into());
    }
    if args.versioning {
        attributes.insert("Versioning".to_string(), "Enabled".into());
    }
    attributes
}

async fn execute_create(args: CreateArgs, storage: &StorageClient, session: &Session) -> ExitCode {
    let bucket = ResourceIdentity::bucket(&args.bucket);
    let spinner = session
        .formatter
        .spinner(&format!("Creating bucket '{}'...", args.bucket));
    let outcome = storage.create(&bucket, create_attributes(&args)).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    match outcome {
        Ok(created) => {
            let formatter = &session.formatter;
            if formatter.is_json() {
                formatter.json(&item_json(&created));
            } else {
                let name = formatter.style_name(&args.bucket);
                formatter.success(&format!("Bucket '{name}' created."));
            }
            ExitCode::Success
        }
        Err(e) => session.fail("Failed to create bucket", &e),
    }
}

async fn execute_list(args: PrefixArgs, storage: &StorageClient, session: &Session) -> ExitCode {
    let options = ListOptions {
        prefix: args.prefix,
        ..Default::default()
    };
    match session
        .read(|| collect_all(list_all(storage, options.clone())))
        .await
    {
        Ok(buckets) => {
            print_resources(&session.formatter, "buckets", &buckets);
            ExitCode::Success
        }
        Err(e) => session.fail("Failed to list buckets", &e),
    }
}

async fn execute_info(args: BucketArg, storage: &StorageClient, session: &Session) -> ExitCode {
    let bucket = ResourceIdentity::bucket(&args.bucket);
    match session.read(|| storage.get(&bucket)).await {
        Ok(Some(attributes)) => {
            print_item(&session.formatter, &attributes);
            ExitCode::Success
        }
        Ok(None) => {
            session
                .formatter
                .error(&format!("Bucket '{}' does not exist", args.bucket));
            ExitCode::NotFound
        }
        Err(e) => session.fail("Failed to read bucket", &e),
    }
}

async fn execute_delete(args: DeleteArgs, storage: &StorageClient, session: &Session) -> ExitCode {
    let formatter = &session.formatter;
    let Some(name) = args.bucket else {
        return execute_delete_all(args.prefix, args.purge, storage, session).await;
    };
    let bucket = ResourceIdentity::bucket(&name);

    if args.purge {
        match purge(storage, &bucket, None, session).await {
            Ok(deleted) => tracing::debug!(bucket = %name, deleted, "Bucket emptied"),
            Err(e) => return session.fail("Failed to empty bucket", &e),
        }
    }

    match storage.delete(&bucket).await {
        Ok(true) => {
            if formatter.is_json() {
                formatter.json(&serde_json::json!({"bucket": name, "deleted": true}));
            } else {
                formatter.success(&format!(
                    "Bucket '{}' deleted.",
                    formatter.style_name(&name)
                ));
            }
            ExitCode::Success
        }
        Ok(false) => {
            formatter.error(&format!(
                "Bucket '{name}' was not deleted (missing or not confirmed)"
            ));
            ExitCode::NotFound
        }
        Err(e) => session.fail("Failed to delete bucket", &e),
    }
}

async fn execute_delete_all(
    prefix: Option<String>,
    purge: bool,
    storage: &StorageClient,
    session: &Session,
) -> ExitCode {
    let formatter = &session.formatter;
    let options = ListOptions {
        prefix,
        ..Default::default()
    };
    let spinner = formatter.spinner("Deleting buckets...");
    let outcome = storage.delete_buckets(&options, purge).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    match outcome {
        Ok(deleted) => {
            if formatter.is_json() {
                formatter.json(&SweepOutput {
                    prefix: options.prefix,
                    deleted,
                });
            } else {
                formatter.success(&format!("Deleted {deleted} bucket(s)."));
            }
            ExitCode::Success
        }
        Err(e) => session.fail("Failed to list buckets", &e),
    }
}

async fn execute_versioning(
    args: VersioningArgs,
    storage: &StorageClient,
    session: &Session,
) -> ExitCode {
    let bucket = ResourceIdentity::bucket(&args.bucket);
    let outcome = match args.change {
        Some(VersioningChange::Enable) => storage.enable_versioning(&bucket).await,
        Some(VersioningChange::Suspend) => storage.set_versioning(&bucket, false).await,
        None => session.read(|| storage.versioning(&bucket)).await,
    };

    match outcome {
        Ok(status) => {
            let formatter = &session.formatter;
            if formatter.is_json() {
                formatter.json(&VersioningOutput {
                    bucket: args.bucket,
                    status: status.to_string(),
                });
            } else {
                formatter.println(&format!("Bucket: {}", formatter.style_name(&args.bucket)));
                formatter.println(&format!("Versioning: {status}"));
            }
            ExitCode::Success
        }
        Err(e) => session.fail("Failed to change versioning", &e),
    }
}

async fn execute_put(args: PutArgs, storage: &StorageClient, session: &Session) -> ExitCode {
    let formatter = &session.formatter;
    let body = match tokio::fs::read(&args.file).await {
        Ok(body) => Bytes::from(body),
        Err(e) => {
            formatter.error(&format!("Cannot read '{}': {e}", args.file.display()));
            return ExitCode::UsageError;
        }
    };
    let content_type = args.content_type.clone().or_else(|| {
        mime_guess::from_path(&args.file)
            .first_raw()
            .map(str::to_string)
    });

    let bucket = ResourceIdentity::bucket(&args.bucket);
    match storage
        .put_object(&bucket, &args.key, body, content_type.as_deref())
        .await
    {
        Ok(summary) => {
            if formatter.is_json() {
                formatter.json(&summary);
            } else {
                formatter.success(&format!(
                    "Uploaded '{}' to {}/{} ({})",
                    args.file.display(),
                    formatter.style_name(&args.bucket),
                    args.key,
                    formatter.style_size(&human_size(summary.size_bytes))
                ));
            }
            ExitCode::Success
        }
        Err(e) => session.fail("Failed to upload object", &e),
    }
}

async fn execute_get(args: GetArgs, storage: &StorageClient, session: &Session) -> ExitCode {
    let formatter = &session.formatter;
    let bucket = ResourceIdentity::bucket(&args.bucket);
    let data = match session
        .read(|| storage.get_object(&bucket, &args.key, args.version_id.as_deref()))
        .await
    {
        Ok(data) => data,
        Err(e) => return session.fail("Failed to download object", &e),
    };

    let Some(path) = &args.output else {
        let mut stdout = tokio::io::stdout();
        if let Err(e) = stdout.write_all(&data.body).await {
            formatter.error(&format!("Failed to write to stdout: {e}"));
            return ExitCode::GeneralError;
        }
        if let Err(e) = stdout.flush().await {
            formatter.error(&format!("Failed to write to stdout: {e}"));
            return ExitCode::GeneralError;
        }
        return ExitCode::Success;
    };

    if let Err(e) = tokio::fs::write(path, &data.body).await {
        formatter.error(&format!("Cannot write '{}': {e}", path.display()));
        return ExitCode::GeneralError;
    }
    if formatter.is_json() {
        formatter.json(&data.summary);
    } else {
        formatter.success(&format!(
            "Downloaded {}/{} to '{}' ({})",
            formatter.style_name(&args.bucket),
            args.key,
            path.display(),
            formatter.style_size(&human_size(data.summary.size_bytes))
        ));
    }
    ExitCode::Success
}

async fn execute_stat(args: ObjectArgs, storage: &StorageClient, session: &Session) -> ExitCode {
    let formatter = &session.formatter;
    let bucket = ResourceIdentity::bucket(&args.bucket);
    match session.read(|| storage.head_object(&bucket, &args.key)).await {
        Ok(Some(summary)) if formatter.is_json() => {
            formatter.json(&summary);
            ExitCode::Success
        }
        Ok(Some(summary)) => {
            let mut rows = vec![
                ("Key", summary.key.clone()),
                ("Size", formatter.style_size(&human_size(summary.size_bytes))),
            ];
            if let Some(modified) = summary.last_modified {
                rows.push(("Modified", formatter.style_date(&modified.to_string())));
            }
            for (label, value) in [
                ("ETag", &summary.etag),
                ("Type", &summary.content_type),
                ("Class", &summary.storage_class),
                ("Version", &summary.version_id),
            ] {
                if let Some(value) = value {
                    rows.push((label, value.clone()));
                }
            }
            for (label, value) in rows {
                let label = formatter.style_key(&format!("{label:<8}"));
                formatter.println(&format!("{label}  {value}"));
            }
            ExitCode::Success
        }
        Ok(None) => {
            formatter.error(&format!("Object '{}/{}' does not exist", args.bucket, args.key));
            ExitCode::NotFound
        }
        Err(e) => session.fail("Failed to read object metadata", &e),
    }
}

async fn execute_rm(args: RmArgs, storage: &StorageClient, session: &Session) -> ExitCode {
    let formatter = &session.formatter;
    let bucket = ResourceIdentity::bucket(&args.bucket);
    match storage
        .delete_object(&bucket, &args.key, args.version_id.as_deref())
        .await
    {
        Ok(true) => {
            if formatter.is_json() {
                formatter.json(&serde_json::json!({
                    "bucket": args.bucket,
                    "key": args.key,
                    "version_id": args.version_id,
                    "deleted": true
                }));
            } else {
                formatter.success(&format!(
                    "Removed {}/{}",
                    formatter.style_name(&args.bucket),
                    args.key
                ));
            }
            ExitCode::Success
        }
        Ok(false) => {
            formatter.error(&format!(
                "Object '{}/{}' was not deleted (missing or not confirmed)",
                args.bucket, args.key
            ));
            ExitCode::NotFound
        }
        Err(e) => session.fail("Failed to delete object", &e),
    }
}

async fn all_objects(
    storage: &StorageClient,
    bucket: &ResourceIdentity,
    options: &ListOptions,
) -> Result<Vec<ObjectSummary>> {
    collect_all(paginate(|token| {
        let options = options.at(token);
        async move { storage.list_objects(bucket, &options).await }
    }))
    .await
}

async fn all_versions(
    storage: &StorageClient,
    bucket: &ResourceIdentity,
    options: &ListOptions,
) -> Result<Vec<ObjectVersion>> {
    collect_all(paginate(|token| {
        let options = options.at(token);
        async move { storage.list_object_versions(bucket, &options).await }
    }))
    .await
}

async fn execute_ls(args: ObjectListArgs, storage: &StorageClient, session: &Session) -> ExitCode {
    let formatter = &session.formatter;
    let bucket = ResourceIdentity::bucket(&args.bucket);
    let options = ListOptions {
        prefix: args.prefix,
        ..Default::default()
    };
    let objects = match session
        .read(|| all_objects(storage, &bucket, &options))
        .await
    {
        Ok(objects) => objects,
        Err(e) => return session.fail("Failed to list objects", &e),
    };

    let total_size_bytes = objects.iter().map(|o| o.size_bytes).sum();
    if formatter.is_json() {
        formatter.json(&ObjectListOutput {
            bucket: args.bucket,
            objects,
            total_size_bytes,
        });
    } else if objects.is_empty() {
        formatter.println("No objects found.");
    } else {
        let rows = objects
            .iter()
            .map(|o| {
                vec![
                    o.last_modified.map(|t| t.to_string()).unwrap_or_default(),
                    human_size(o.size_bytes),
                    o.key.clone(),
                ]
            })
            .collect();
        formatter.table(&["LAST MODIFIED", "SIZE", "KEY"], rows);
        formatter.println(&format!(
            "Total: {} object(s), {}",
            objects.len(),
            human_size(total_size_bytes)
        ));
    }
    ExitCode::Success
}

async fn execute_versions(
    args: ObjectListArgs,
    storage: &StorageClient,
    session: &Session,
) -> ExitCode {
    let formatter = &session.formatter;
    let bucket = ResourceIdentity::bucket(&args.bucket);
    let options = ListOptions {
        prefix: args.prefix,
        ..Default::default()
    };
    let versions = match session
        .read(|| all_versions(storage, &bucket, &options))
        .await
    {
        Ok(versions) => versions,
        Err(e) => return session.fail("Failed to list versions", &e),
    };

    if formatter.is_json() {
        formatter.json(&VersionListOutput {
            bucket: args.bucket,
            versions,
        });
    } else if versions.is_empty() {
        formatter.println("No versions found.");
    } else {
        for v in &versions {
            let marker = if v.is_delete_marker { "[DELETE]" } else { "" };
            let latest = if v.is_latest { "*" } else { " " };
            let size = v.size_bytes.map(human_size).unwrap_or_default();
            formatter.println(&format!(
                "{latest} {:<40} {:>12} {:>12} {marker}",
                v.key,
                v.version_id.chars().take(12).collect::<String>(),
                size
            ));
        }
        formatter.println(&format!("\nTotal: {} version(s)", versions.len()));
    }
    ExitCode::Success
}

async fn purge(
    storage: &StorageClient,
    bucket: &ResourceIdentity,
    prefix: Option<&str>,
    session: &Session,
) -> Result<usize> {
    let spinner = session
        .formatter
        .spinner(&format!("Deleting object versions in '{}'...", bucket.name));
    let outcome = storage.delete_all(bucket, prefix).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    outcome
}

async fn execute_purge(
    args: ObjectListArgs,
    storage: &StorageClient,
    session: &Session,
) -> ExitCode {
    let formatter = &session.formatter;
    let bucket = ResourceIdentity::bucket(&args.bucket);
    match purge(storage, &bucket, args.prefix.as_deref(), session).await {
        Ok(deleted) => {
            if formatter.is_json() {
                formatter.json(&PurgeOutput {
                    bucket: args.bucket,
                    prefix: args.prefix,
                    deleted,
                });
            } else {
                formatter.success(&format!(
                    "Deleted {deleted} version(s) from '{}'",
                    formatter.style_name(&args.bucket)
                ));
            }
            ExitCode::Success
        }
        Err(e) => session.fail("Failed to purge bucket", &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nb_core::item;

    #[test]
    fn test_create_attributes() {
        let args = CreateArgs {
            bucket: "logs".to_string(),
            location: Some("eu-west-1".to_string()),
            versioning: true,
        };
        assert_eq!(
            create_attributes(&args),
            item! {"Region" => "eu-west-1", "Versioning" => "Enabled"}
        );

        let bare = CreateArgs {
            bucket: "logs".to_string(),
            location: None,
            versioning: false,
        };
        assert!(create_attributes(&bare).is_empty());
    }

    #[test]
    fn test_sweep_output_shape() {
        let output = SweepOutput {
            prefix: None,
            deleted: 3,
        };
        insta::assert_json_snapshot!(output, @r#"
        {
          "deleted": 3
        }
        "#);
    }

    #[test]
    fn test_purge_output_shape() {
        let output = PurgeOutput {
            bucket: "assets".to_string(),
            prefix: Some("temp/".to_string()),
            deleted: 6,
        };
        insta::assert_json_snapshot!(output, @r#"
        {
          "bucket": "assets",
          "prefix": "temp/",
          "deleted": 6
        }
        "#);
    }
}
