//! Object storage façade
//!
//! [`StorageClient`] manages buckets through the [`ResourceManager`]
//! contract and adds object operations, versioning and the versioned
//! delete-everything sweep.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::batch::{BatchPolicy, send_in_chunks};
use crate::client::{
    Endpoint, array_field, best_effort_delete, i64_field, required_str, str_field,
    timestamp_field,
};
use crate::config::BatchConfig;
use crate::error::{Error, Result};
use crate::identity::{ResourceIdentity, ResourceKind};
use crate::listing::{ListOptions, ListingPage, collect_all, decode_token, encode_token, paginate};
use crate::resource::{ResourceManager, ResourceSummary, list_all};
use crate::transport::{Service, Transport};
use crate::value::{AttributeValue, Item};

/// Region that must not be sent as a location constraint
const DEFAULT_REGION: &str = "us-east-1";

/// Versioning state of a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersioningStatus {
    Enabled,
    Suspended,
    /// Never enabled
    Disabled,
}

impl VersioningStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VersioningStatus::Enabled => "Enabled",
            VersioningStatus::Suspended => "Suspended",
            VersioningStatus::Disabled => "Disabled",
        }
    }

    fn from_response(response: &Value) -> Self {
        match response.get("Status").and_then(Value::as_str) {
            Some("Enabled") => VersioningStatus::Enabled,
            Some("Suspended") => VersioningStatus::Suspended,
            _ => VersioningStatus::Disabled,
        }
    }
}

impl std::fmt::Display for VersioningStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub key: String,
    pub size_bytes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

impl ObjectSummary {
    fn from_response(key: &str, value: &Value, size_field: &str) -> Self {
        Self {
            key: key.to_string(),
            size_bytes: i64_field(value, size_field).unwrap_or(0),
            etag: str_field(value, "ETag").map(|e| e.trim_matches('"').to_string()),
            last_modified: timestamp_field(value, "LastModified"),
            content_type: str_field(value, "ContentType"),
            storage_class: str_field(value, "StorageClass"),
            version_id: str_field(value, "VersionId"),
        }
    }
}

/// Object content with its metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectData {
    pub summary: ObjectSummary,
    pub body: Bytes,
}

/// One version (or delete marker) of an object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectVersion {
    pub key: String,
    /// `"null"` for objects written while versioning was off
    pub version_id: String,
    pub is_latest: bool,
    pub is_delete_marker: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl ObjectVersion {
    fn from_response(value: &Value, is_delete_marker: bool) -> Result<Self> {
        Ok(Self {
            key: required_str(value, "Key")?,
            version_id: str_field(value, "VersionId").unwrap_or_else(|| "null".to_string()),
            is_latest: value
                .get("IsLatest")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            is_delete_marker,
            last_modified: timestamp_field(value, "LastModified"),
            size_bytes: (!is_delete_marker)
                .then(|| i64_field(value, "Size"))
                .flatten(),
            etag: str_field(value, "ETag").map(|e| e.trim_matches('"').to_string()),
        })
    }
}

/// Key and version markers of the version listing, carried in one token
#[derive(Debug, Serialize, Deserialize)]
struct VersionCursor {
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

/// Object storage client
#[derive(Debug, Clone)]
pub struct StorageClient {
    endpoint: Endpoint,
    delete_policy: BatchPolicy,
}

impl StorageClient {
    /// Create a client over a transport that serves object storage
    pub fn new(transport: Arc<dyn Transport>) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(transport, Service::Storage)?,
            delete_policy: BatchPolicy::delete(&BatchConfig::default()),
        })
    }

    /// Use the delete chunk size and retry budget from `config`
    pub fn with_batch_config(mut self, config: &BatchConfig) -> Self {
        self.delete_policy = BatchPolicy::delete(config);
        self
    }

    async fn set_versioning_status(
        &self,
        identity: &ResourceIdentity,
        status: VersioningStatus,
    ) -> Result<()> {
        if status == VersioningStatus::Disabled {
            return Err(Error::UnsupportedFeature(
                "Versioning cannot be disabled once enabled; suspend it instead".to_string(),
            ));
        }
        self.endpoint
            .call(
                "PutBucketVersioning",
                json!({
                    "Bucket": identity.name,
                    "VersioningConfiguration": {"Status": status.as_str()},
                }),
            )
            .await?;
        Ok(())
    }

    /// Current versioning state
    pub async fn versioning(&self, identity: &ResourceIdentity) -> Result<VersioningStatus> {
        identity.expect_kind(ResourceKind::StorageBucket)?;
        let response = self
            .endpoint
            .call("GetBucketVersioning", json!({"Bucket": identity.name}))
            .await?;
        Ok(VersioningStatus::from_response(&response))
    }

    /// Turn versioning on and return the resulting state
    pub async fn enable_versioning(&self, identity: &ResourceIdentity) -> Result<VersioningStatus> {
        self.set_versioning(identity, true).await
    }

    /// Enable or suspend versioning and return the resulting state
    pub async fn set_versioning(
        &self,
        identity: &ResourceIdentity,
        enabled: bool,
    ) -> Result<VersioningStatus> {
        identity.expect_kind(ResourceKind::StorageBucket)?;
        let status = if enabled {
            VersioningStatus::Enabled
        } else {
            VersioningStatus::Suspended
        };
        self.set_versioning_status(identity, status).await?;
        self.versioning(identity).await
    }

    /// Upload an object
    pub async fn put_object(
        &self,
        identity: &ResourceIdentity,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<ObjectSummary> {
        identity.expect_kind(ResourceKind::StorageBucket)?;
        let mut params = json!({
            "Bucket": identity.name,
            "Key": key,
            "Body": base64::engine::general_purpose::STANDARD.encode(&body),
        });
        if let Some(ct) = content_type {
            params["ContentType"] = json!(ct);
        }

        let response = self.endpoint.call("PutObject", params).await?;

        let mut summary = ObjectSummary::from_response(key, &response, "ContentLength");
        summary.size_bytes = body.len() as i64;
        summary.content_type = content_type.map(str::to_string);
        summary.last_modified.get_or_insert_with(Timestamp::now);
        Ok(summary)
    }

    /// Download an object, optionally a specific version
    pub async fn get_object(
        &self,
        identity: &ResourceIdentity,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<ObjectData> {
        identity.expect_kind(ResourceKind::StorageBucket)?;
        let mut params = json!({"Bucket": identity.name, "Key": key});
        if let Some(version) = version_id {
            params["VersionId"] = json!(version);
        }

        let response = self.endpoint.call("GetObject", params).await?;

        let body = match response.get("Body").and_then(Value::as_str) {
            Some(encoded) => base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| Error::Response(format!("object body is not base64: {e}")))?,
            None => Vec::new(),
        };
        Ok(ObjectData {
            summary: ObjectSummary::from_response(key, &response, "ContentLength"),
            body: Bytes::from(body),
        })
    }

    /// Object metadata, or `None` when the key does not exist
    pub async fn head_object(
        &self,
        identity: &ResourceIdentity,
        key: &str,
    ) -> Result<Option<ObjectSummary>> {
        identity.expect_kind(ResourceKind::StorageBucket)?;
        match self
            .endpoint
            .call("HeadObject", json!({"Bucket": identity.name, "Key": key}))
            .await
        {
            Ok(response) => Ok(Some(ObjectSummary::from_response(
                key,
                &response,
                "ContentLength",
            ))),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete an object (or one version of it)
    pub async fn delete_object(
        &self,
        identity: &ResourceIdentity,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<bool> {
        identity.expect_kind(ResourceKind::StorageBucket)?;
        let mut params = json!({"Bucket": identity.name, "Key": key});
        if let Some(version) = version_id {
            params["VersionId"] = json!(version);
        }
        let outcome = self.endpoint.call("DeleteObject", params).await;
        best_effort_delete(identity, key, outcome)
    }

    /// One page of objects under `options.prefix`
    pub async fn list_objects(
        &self,
        identity: &ResourceIdentity,
        options: &ListOptions,
    ) -> Result<ListingPage<ObjectSummary>> {
        identity.expect_kind(ResourceKind::StorageBucket)?;
        let mut params = Map::new();
        params.insert("Bucket".to_string(), json!(identity.name));
        if let Some(prefix) = &options.prefix {
            params.insert("Prefix".to_string(), json!(prefix));
        }
        if let Some(max) = options.max_keys {
            params.insert("MaxKeys".to_string(), json!(max));
        }
        if let Some(token) = &options.continuation_token {
            params.insert("ContinuationToken".to_string(), json!(token));
        }

        let response = self
            .endpoint
            .call("ListObjectsV2", Value::Object(params))
            .await?;

        let items = array_field(&response, "Contents")
            .iter()
            .map(|object| {
                let key = required_str(object, "Key")?;
                Ok(ObjectSummary::from_response(&key, object, "Size"))
            })
            .collect::<Result<Vec<_>>>()?;
        let token = truncated(&response)
            .then(|| str_field(&response, "NextContinuationToken"))
            .flatten();
        Ok(ListingPage::new(items, token))
    }

    /// One page of object versions and delete markers under `options.prefix`
    pub async fn list_object_versions(
        &self,
        identity: &ResourceIdentity,
        options: &ListOptions,
    ) -> Result<ListingPage<ObjectVersion>> {
        identity.expect_kind(ResourceKind::StorageBucket)?;
        let mut params = Map::new();
        params.insert("Bucket".to_string(), json!(identity.name));
        if let Some(prefix) = &options.prefix {
            params.insert("Prefix".to_string(), json!(prefix));
        }
        if let Some(max) = options.max_keys {
            params.insert("MaxKeys".to_string(), json!(max));
        }
        if let Some(token) = &options.continuation_token {
            let cursor: VersionCursor = decode_token(token)?;
            params.insert("KeyMarker".to_string(), json!(cursor.key));
            if let Some(version) = cursor.version {
                params.insert("VersionIdMarker".to_string(), json!(version));
            }
        }

        let response = self
            .endpoint
            .call("ListObjectVersions", Value::Object(params))
            .await?;

        let mut items = array_field(&response, "Versions")
            .iter()
            .map(|v| ObjectVersion::from_response(v, false))
            .chain(
                array_field(&response, "DeleteMarkers")
                    .iter()
                    .map(|m| ObjectVersion::from_response(m, true)),
            )
            .collect::<Result<Vec<_>>>()?;
        // Key order, newest first within a key
        items.sort_by(|a, b| {
            a.key
                .cmp(&b.key)
                .then_with(|| b.last_modified.cmp(&a.last_modified))
        });

        let token = match (truncated(&response), str_field(&response, "NextKeyMarker")) {
            (true, Some(key)) => Some(encode_token(&VersionCursor {
                key,
                version: str_field(&response, "NextVersionIdMarker"),
            })?),
            _ => None,
        };
        Ok(ListingPage::new(items, token))
    }

    /// Permanently delete every object version and delete marker under `prefix`
    ///
    /// Returns how many versions were removed. Versions the remote side keeps
    /// refusing after the retry budget are logged and not counted.
    pub async fn delete_all(&self, identity: &ResourceIdentity, prefix: Option<&str>) -> Result<usize> {
        identity.expect_kind(ResourceKind::StorageBucket)?;
        let options = ListOptions {
            prefix: prefix.map(str::to_string),
            ..Default::default()
        };

        let versions = collect_all(paginate(|token| {
            let options = options.at(token);
            async move { self.list_object_versions(identity, &options).await }
        }))
        .await?;

        if versions.is_empty() {
            tracing::debug!(resource = %identity, prefix = ?prefix, "Nothing to delete");
            return Ok(0);
        }
        tracing::debug!(
            resource = %identity,
            prefix = ?prefix,
            versions = versions.len(),
            "Deleting object versions"
        );

        let result = send_in_chunks(versions, &self.delete_policy, |chunk| async move {
            self.delete_versions(identity, chunk).await
        })
        .await?;

        if !result.is_complete() {
            tracing::warn!(
                resource = %identity,
                remaining = result.unprocessed.len(),
                "Some object versions could not be deleted"
            );
        }
        Ok(result.processed)
    }

    /// Delete every bucket matching `options`, best-effort
    ///
    /// With `purge`, each bucket is emptied first. A bucket that cannot be
    /// emptied or deleted is logged and skipped; listing failures abort.
    /// Returns how many buckets were deleted.
    pub async fn delete_buckets(&self, options: &ListOptions, purge: bool) -> Result<usize> {
        let buckets = collect_all(list_all(self, options.clone())).await?;
        let mut deleted = 0;
        for bucket in buckets {
            let identity = ResourceIdentity::bucket(bucket.name.as_str());
            if purge && let Err(e) = self.delete_all(&identity, None).await {
                tracing::warn!(resource = %identity, error = %e, "Failed to empty bucket");
                continue;
            }
            match self.delete(&identity).await {
                Ok(true) => deleted += 1,
                Ok(false) => tracing::warn!(resource = %identity, "Bucket was not deleted"),
                Err(e) => tracing::warn!(resource = %identity, error = %e, "Failed to delete bucket"),
            }
        }
        Ok(deleted)
    }

    /// Quietly delete one chunk of versions, returning those that failed
    async fn delete_versions(
        &self,
        identity: &ResourceIdentity,
        chunk: Vec<ObjectVersion>,
    ) -> Result<Vec<ObjectVersion>> {
        let objects: Vec<Value> = chunk
            .iter()
            .map(|v| json!({"Key": v.key, "VersionId": v.version_id}))
            .collect();
        let response = self
            .endpoint
            .call(
                "DeleteObjects",
                json!({
                    "Bucket": identity.name,
                    "Delete": {"Objects": objects, "Quiet": true},
                }),
            )
            .await?;

        let failed: HashSet<(String, String)> = array_field(&response, "Errors")
            .iter()
            .filter_map(|e| {
                tracing::debug!(
                    key = ?str_field(e, "Key"),
                    code = ?str_field(e, "Code"),
                    "Object version not deleted"
                );
                Some((
                    str_field(e, "Key")?,
                    str_field(e, "VersionId").unwrap_or_else(|| "null".to_string()),
                ))
            })
            .collect();

        Ok(chunk
            .into_iter()
            .filter(|v| failed.contains(&(v.key.clone(), v.version_id.clone())))
            .collect())
    }
}

fn truncated(response: &Value) -> bool {
    response
        .get("IsTruncated")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn versioning_attribute(value: &AttributeValue) -> Result<VersioningStatus> {
    match value {
        AttributeValue::S(s) if s.eq_ignore_ascii_case("enabled") => Ok(VersioningStatus::Enabled),
        AttributeValue::S(s) if s.eq_ignore_ascii_case("suspended") => {
            Ok(VersioningStatus::Suspended)
        }
        AttributeValue::Bool(true) => Ok(VersioningStatus::Enabled),
        AttributeValue::Bool(false) => Ok(VersioningStatus::Suspended),
        other => Err(Error::UnsupportedFeature(format!(
            "Versioning must be Enabled or Suspended, got {other}"
        ))),
    }
}

#[async_trait]
impl ResourceManager for StorageClient {
    fn kind(&self) -> ResourceKind {
        ResourceKind::StorageBucket
    }

    async fn create(&self, identity: &ResourceIdentity, attributes: Item) -> Result<Item> {
        identity.expect_kind(ResourceKind::StorageBucket)?;

        let mut region = None;
        let mut versioning = None;
        for (name, value) in &attributes {
            match name.as_str() {
                "Region" => {
                    region = Some(value.as_str().ok_or_else(|| {
                        Error::UnsupportedFeature(format!("Region must be a string, got {value}"))
                    })?)
                }
                "Versioning" => versioning = Some(versioning_attribute(value)?),
                other => {
                    return Err(Error::UnsupportedFeature(format!(
                        "Bucket attribute '{other}' cannot be set"
                    )));
                }
            }
        }

        let mut params = json!({"Bucket": identity.name});
        if let Some(region) = region.filter(|r| *r != DEFAULT_REGION) {
            params["CreateBucketConfiguration"] = json!({"LocationConstraint": region});
        }
        self.endpoint.call("CreateBucket", params).await?;
        self.endpoint.wait_until_exists(identity).await?;
        tracing::debug!(resource = %identity, "Bucket created");

        if let Some(status) = versioning {
            self.set_versioning_status(identity, status).await?;
        }

        self.get(identity)
            .await?
            .ok_or_else(|| Error::NotFound(identity.to_string()))
    }

    async fn get(&self, identity: &ResourceIdentity) -> Result<Option<Item>> {
        identity.expect_kind(ResourceKind::StorageBucket)?;
        let head = match self
            .endpoint
            .call("HeadBucket", json!({"Bucket": identity.name}))
            .await
        {
            Ok(head) => head,
            Err(Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let versioning = self.versioning(identity).await?;

        let mut item = Item::new();
        item.insert("Name".to_string(), identity.name.as_str().into());
        if let Some(region) = str_field(&head, "BucketRegion") {
            item.insert("Region".to_string(), region.into());
        }
        item.insert("Versioning".to_string(), versioning.as_str().into());
        Ok(Some(item))
    }

    async fn update(&self, identity: &ResourceIdentity, partial: Item) -> Result<Item> {
        identity.expect_kind(ResourceKind::StorageBucket)?;
        if partial.is_empty() {
            return Err(Error::InvalidItem("Nothing to update".to_string()));
        }
        let mut status = None;
        for (name, value) in &partial {
            match name.as_str() {
                "Versioning" => status = Some(versioning_attribute(value)?),
                other => {
                    return Err(Error::UnsupportedFeature(format!(
                        "Bucket attribute '{other}' cannot be updated"
                    )));
                }
            }
        }

        if self.get(identity).await?.is_none() {
            return Err(Error::NotFound(identity.to_string()));
        }
        if let Some(status) = status {
            self.set_versioning_status(identity, status).await?;
        }
        self.get(identity)
            .await?
            .ok_or_else(|| Error::NotFound(identity.to_string()))
    }

    async fn delete(&self, identity: &ResourceIdentity) -> Result<bool> {
        identity.expect_kind(ResourceKind::StorageBucket)?;
        let outcome = self
            .endpoint
            .call("DeleteBucket", json!({"Bucket": identity.name}))
            .await;
        let deleted = best_effort_delete(identity, "bucket", outcome)?;
        if deleted {
            self.endpoint.wait_until_not_exists(identity).await?;
        }
        Ok(deleted)
    }

    async fn list(&self, options: &ListOptions) -> Result<ListingPage<ResourceSummary>> {
        let mut params = Map::new();
        if let Some(prefix) = &options.prefix {
            params.insert("Prefix".to_string(), json!(prefix));
        }
        if let Some(max) = options.max_keys {
            params.insert("MaxBuckets".to_string(), json!(max));
        }
        if let Some(token) = &options.continuation_token {
            params.insert("ContinuationToken".to_string(), json!(token));
        }

        let response = self
            .endpoint
            .call("ListBuckets", Value::Object(params))
            .await?;

        let items = array_field(&response, "Buckets")
            .iter()
            .map(|bucket| {
                let mut summary =
                    ResourceSummary::new(ResourceKind::StorageBucket, required_str(bucket, "Name")?);
                summary.created = timestamp_field(bucket, "CreationDate");
                Ok(summary)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ListingPage::new(
            items,
            str_field(&response, "ContinuationToken"),
        ))
    }
}
