//! Simulated object storage

use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use base64::Engine as _;
use jiff::Timestamp;
use serde_json::{Value, json};

use super::{Context, Reply, fail, optional, page_limit, required, unknown_operation};
use crate::error::TransportError;
use crate::transport::Service;

/// Multi-object delete limit of the service
const MAX_DELETE_OBJECTS: usize = 1000;

const NULL_VERSION: &str = "null";

struct Version {
    id: String,
    /// `None` marks a delete marker
    body: Option<Vec<u8>>,
    content_type: Option<String>,
    etag: String,
    last_modified: Timestamp,
}

impl Version {
    fn is_delete_marker(&self) -> bool {
        self.body.is_none()
    }

    fn size(&self) -> usize {
        self.body.as_ref().map_or(0, Vec::len)
    }
}

struct Bucket {
    region: String,
    created: Timestamp,
    versioning: Option<String>,
    /// Versions per key, newest first
    objects: BTreeMap<String, Vec<Version>>,
}

impl Bucket {
    fn versioning_enabled(&self) -> bool {
        self.versioning.as_deref() == Some("Enabled")
    }

    /// Version id for a new write: unique when enabled, `null` otherwise
    fn next_version_id(&self, counter: &mut u64) -> String {
        if self.versioning_enabled() {
            *counter += 1;
            format!("{:032x}", *counter)
        } else {
            NULL_VERSION.to_string()
        }
    }

    /// Record a new newest version of `key`, replacing any previous `null` version
    fn push(&mut self, key: &str, version: Version) {
        let versions = self.objects.entry(key.to_string()).or_default();
        if version.id == NULL_VERSION {
            versions.retain(|v| v.id != NULL_VERSION);
        }
        versions.insert(0, version);
    }

    fn remove_version(&mut self, key: &str, version_id: &str) {
        if let Some(versions) = self.objects.get_mut(key) {
            versions.retain(|v| v.id != version_id);
            if versions.is_empty() {
                self.objects.remove(key);
            }
        }
    }

    /// Delete without a version id: a marker when versioned, removal otherwise
    fn delete_current(&mut self, key: &str, now: Timestamp, counter: &mut u64) -> Option<String> {
        if self.versioning.is_none() {
            self.objects.remove(key);
            return None;
        }
        if !self.objects.contains_key(key) {
            return None;
        }
        let id = self.next_version_id(counter);
        self.push(
            key,
            Version {
                id: id.clone(),
                body: None,
                content_type: None,
                etag: String::new(),
                last_modified: now,
            },
        );
        Some(id)
    }

    fn find(&self, key: &str, version_id: Option<&str>) -> Option<&Version> {
        let versions = self.objects.get(key)?;
        match version_id {
            Some(id) => versions.iter().find(|v| v.id == id),
            None => versions.first(),
        }
    }
}

#[derive(Default)]
pub(super) struct StorageState {
    buckets: BTreeMap<String, Bucket>,
    version_counter: u64,
}

fn no_such_bucket(name: &str) -> TransportError {
    fail("NoSuchBucket", format!("The specified bucket does not exist: {name}"))
}

fn etag(body: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("\"{:016x}\"", hasher.finish())
}

impl StorageState {
    pub(super) fn contains(&self, bucket: &str) -> bool {
        self.buckets.contains_key(bucket)
    }

    fn bucket<'a>(
        &'a self,
        params: &'a Value,
    ) -> Result<(&'a str, &'a Bucket), TransportError> {
        let name = required(params, "Bucket", "InvalidRequest")?;
        let bucket = self.buckets.get(name).ok_or_else(|| no_such_bucket(name))?;
        Ok((name, bucket))
    }

    fn bucket_mut(&mut self, params: &Value) -> Result<&mut Bucket, TransportError> {
        let name = required(params, "Bucket", "InvalidRequest")?;
        self.buckets
            .get_mut(name)
            .ok_or_else(|| no_such_bucket(name))
    }

    pub(super) fn handle(&mut self, ctx: &mut Context<'_>, operation: &str, params: &Value) -> Reply {
        match operation {
            "CreateBucket" => self.create_bucket(ctx, params),
            "HeadBucket" => {
                let name = required(params, "Bucket", "InvalidRequest")?;
                let bucket = self
                    .buckets
                    .get(name)
                    .ok_or_else(|| fail("NotFound", format!("Not Found: {name}")))?;
                Ok(json!({"BucketRegion": bucket.region}))
            }
            "GetBucketVersioning" => {
                let (_, bucket) = self.bucket(params)?;
                Ok(match &bucket.versioning {
                    Some(status) => json!({"Status": status}),
                    None => json!({}),
                })
            }
            "PutBucketVersioning" => {
                let status = params
                    .pointer("/VersioningConfiguration/Status")
                    .and_then(Value::as_str)
                    .filter(|s| matches!(*s, "Enabled" | "Suspended"))
                    .ok_or_else(|| fail("MalformedXML", "Versioning status must be Enabled or Suspended"))?
                    .to_string();
                self.bucket_mut(params)?.versioning = Some(status);
                Ok(json!({}))
            }
            "DeleteBucket" => {
                let (name, bucket) = self.bucket(params)?;
                if !bucket.objects.is_empty() {
                    return Err(fail(
                        "BucketNotEmpty",
                        format!("The bucket you tried to delete is not empty: {name}"),
                    ));
                }
                let name = name.to_string();
                self.buckets.remove(&name);
                Ok(json!({}))
            }
            "ListBuckets" => self.list_buckets(ctx, params),
            "PutObject" => self.put_object(ctx, params),
            "GetObject" => self.get_object(params, true),
            "HeadObject" => self.get_object(params, false),
            "DeleteObject" => {
                let key = required(params, "Key", "InvalidRequest")?;
                let now = ctx.now;
                let mut counter = self.version_counter;
                let bucket = self.bucket_mut(params)?;
                let response = match optional(params, "VersionId") {
                    Some(version_id) => {
                        bucket.remove_version(key, version_id);
                        json!({"VersionId": version_id})
                    }
                    None => match bucket.delete_current(key, now, &mut counter) {
                        Some(marker) => json!({"DeleteMarker": true, "VersionId": marker}),
                        None => json!({}),
                    },
                };
                self.version_counter = counter;
                Ok(response)
            }
            "DeleteObjects" => self.delete_objects(ctx, params),
            "ListObjectsV2" => self.list_objects(ctx, params),
            "ListObjectVersions" => self.list_object_versions(ctx, params),
            other => Err(unknown_operation(Service::Storage, other)),
        }
    }

    fn create_bucket(&mut self, ctx: &mut Context<'_>, params: &Value) -> Reply {
        let name = required(params, "Bucket", "InvalidRequest")?;
        if name.len() < 3
            || name.len() > 63
            || !name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        {
            return Err(fail(
                "InvalidBucketName",
                format!("The specified bucket is not valid: {name}"),
            ));
        }
        if self.buckets.contains_key(name) {
            return Err(fail(
                "BucketAlreadyOwnedByYou",
                format!("Your previous request to create the named bucket succeeded: {name}"),
            ));
        }
        let region = params
            .pointer("/CreateBucketConfiguration/LocationConstraint")
            .and_then(Value::as_str)
            .unwrap_or(ctx.region)
            .to_string();
        self.buckets.insert(
            name.to_string(),
            Bucket {
                region,
                created: ctx.now,
                versioning: None,
                objects: BTreeMap::new(),
            },
        );
        Ok(json!({"Location": format!("/{name}")}))
    }

    fn list_buckets(&self, ctx: &Context<'_>, params: &Value) -> Reply {
        let prefix = optional(params, "Prefix").unwrap_or_default();
        let after = optional(params, "ContinuationToken");
        let limit = page_limit(params, "MaxBuckets", ctx.page_size);

        let mut matching = self
            .buckets
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .filter(|(name, _)| after.is_none_or(|after| name.as_str() > after));
        let page: Vec<(&String, &Bucket)> = matching.by_ref().take(limit).collect();
        let more = matching.next().is_some();

        let buckets: Vec<Value> = page
            .iter()
            .map(|(name, bucket)| {
                json!({
                    "Name": name,
                    "CreationDate": bucket.created.to_string(),
                    "BucketRegion": bucket.region,
                })
            })
            .collect();
        let mut response = json!({"Buckets": buckets});
        if more && let Some((last, _)) = page.last() {
            response["ContinuationToken"] = json!(last);
        }
        Ok(response)
    }

    fn put_object(&mut self, ctx: &mut Context<'_>, params: &Value) -> Reply {
        let key = required(params, "Key", "InvalidRequest")?;
        let body = match optional(params, "Body") {
            Some(encoded) => base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| fail(TransportError::INVALID_PARAMETER, format!("Body: {e}")))?,
            None => Vec::new(),
        };
        let content_type = optional(params, "ContentType").map(str::to_string);

        let mut counter = self.version_counter;
        let bucket = self.bucket_mut(params)?;
        let id = bucket.next_version_id(&mut counter);
        let tag = etag(&body);
        bucket.push(
            key,
            Version {
                id: id.clone(),
                body: Some(body),
                content_type,
                etag: tag.clone(),
                last_modified: ctx.now,
            },
        );
        let versioned = bucket.versioning.is_some();
        self.version_counter = counter;

        let mut response = json!({"ETag": tag});
        if versioned {
            response["VersionId"] = json!(id);
        }
        Ok(response)
    }

    fn get_object(&self, params: &Value, with_body: bool) -> Reply {
        let key = required(params, "Key", "InvalidRequest")?;
        let version_id = optional(params, "VersionId");
        let (_, bucket) = self.bucket(params)?;

        let missing = || {
            if with_body {
                fail("NoSuchKey", format!("The specified key does not exist: {key}"))
            } else {
                fail("NotFound", format!("Not Found: {key}"))
            }
        };
        let version = bucket
            .find(key, version_id)
            .filter(|v| !v.is_delete_marker())
            .ok_or_else(missing)?;

        let mut response = json!({
            "ContentLength": version.size(),
            "ETag": version.etag,
            "LastModified": version.last_modified.to_string(),
        });
        if let Some(ct) = &version.content_type {
            response["ContentType"] = json!(ct);
        }
        if version.id != NULL_VERSION {
            response["VersionId"] = json!(version.id);
        }
        if with_body && let Some(body) = &version.body {
            response["Body"] = json!(base64::engine::general_purpose::STANDARD.encode(body));
        }
        Ok(response)
    }

    fn delete_objects(&mut self, ctx: &mut Context<'_>, params: &Value) -> Reply {
        let objects = params
            .pointer("/Delete/Objects")
            .and_then(Value::as_array)
            .ok_or_else(|| fail("MalformedXML", "Delete.Objects is required"))?;
        if objects.is_empty() || objects.len() > MAX_DELETE_OBJECTS {
            return Err(fail(
                "MalformedXML",
                format!("Delete.Objects must hold 1 to {MAX_DELETE_OBJECTS} entries"),
            ));
        }
        let quiet = params
            .pointer("/Delete/Quiet")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let refused = ctx.take_unprocessed(objects.len());
        let accepted = objects.len() - refused;
        let now = ctx.now;
        let mut counter = self.version_counter;
        let bucket = self.bucket_mut(params)?;

        let mut deleted = Vec::new();
        let mut errors = Vec::new();
        for (index, object) in objects.iter().enumerate() {
            let Some(key) = optional(object, "Key") else {
                errors.push(json!({"Code": "MalformedXML", "Message": "Key is required"}));
                continue;
            };
            let version_id = optional(object, "VersionId");
            if index >= accepted {
                errors.push(json!({
                    "Key": key,
                    "VersionId": version_id,
                    "Code": "SlowDown",
                    "Message": "Please reduce your request rate.",
                }));
                continue;
            }
            match version_id {
                Some(id) => bucket.remove_version(key, id),
                None => {
                    bucket.delete_current(key, now, &mut counter);
                }
            }
            deleted.push(json!({"Key": key, "VersionId": version_id}));
        }
        self.version_counter = counter;

        let mut response = json!({"Errors": errors});
        if !quiet {
            response["Deleted"] = json!(deleted);
        }
        Ok(response)
    }

    fn list_objects(&self, ctx: &Context<'_>, params: &Value) -> Reply {
        let prefix = optional(params, "Prefix").unwrap_or_default();
        let after = optional(params, "ContinuationToken");
        let limit = page_limit(params, "MaxKeys", ctx.page_size);
        let (_, bucket) = self.bucket(params)?;

        let mut matching = bucket
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| after.is_none_or(|after| key.as_str() > after))
            .filter_map(|(key, versions)| {
                versions
                    .first()
                    .filter(|v| !v.is_delete_marker())
                    .map(|v| (key, v))
            });
        let page: Vec<(&String, &Version)> = matching.by_ref().take(limit).collect();
        let more = matching.next().is_some();

        let contents: Vec<Value> = page
            .iter()
            .map(|(key, version)| {
                json!({
                    "Key": key,
                    "Size": version.size(),
                    "ETag": version.etag,
                    "LastModified": version.last_modified.to_string(),
                    "StorageClass": "STANDARD",
                })
            })
            .collect();
        let mut response = json!({
            "Contents": contents,
            "KeyCount": page.len(),
            "IsTruncated": more,
        });
        if more && let Some((last, _)) = page.last() {
            response["NextContinuationToken"] = json!(last);
        }
        Ok(response)
    }

    fn list_object_versions(&self, ctx: &Context<'_>, params: &Value) -> Reply {
        let prefix = optional(params, "Prefix").unwrap_or_default();
        let key_marker = optional(params, "KeyMarker");
        let version_marker = optional(params, "VersionIdMarker");
        let limit = page_limit(params, "MaxKeys", ctx.page_size);
        let (_, bucket) = self.bucket(params)?;

        let entries = bucket
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .flat_map(|(key, versions)| {
                versions
                    .iter()
                    .enumerate()
                    .map(move |(position, version)| (key, position == 0, version))
            });
        // Skip everything up to and including the marker entry
        let mut passed_marker = key_marker.is_none();
        let mut remaining = entries.filter(|(key, _, version)| {
            if passed_marker {
                return true;
            }
            let Some(marker) = key_marker else {
                return true;
            };
            match key.as_str().cmp(marker) {
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => {
                    if version_marker == Some(version.id.as_str()) {
                        passed_marker = true;
                    }
                    false
                }
                std::cmp::Ordering::Greater => {
                    passed_marker = true;
                    true
                }
            }
        });
        let page: Vec<(&String, bool, &Version)> = remaining.by_ref().take(limit).collect();
        let more = remaining.next().is_some();

        let mut versions = Vec::new();
        let mut markers = Vec::new();
        for (key, is_latest, version) in &page {
            if version.is_delete_marker() {
                markers.push(json!({
                    "Key": key,
                    "VersionId": version.id,
                    "IsLatest": is_latest,
                    "LastModified": version.last_modified.to_string(),
                }));
            } else {
                versions.push(json!({
                    "Key": key,
                    "VersionId": version.id,
                    "IsLatest": is_latest,
                    "Size": version.size(),
                    "ETag": version.etag,
                    "LastModified": version.last_modified.to_string(),
                }));
            }
        }

        let mut response = json!({
            "Versions": versions,
            "DeleteMarkers": markers,
            "IsTruncated": more,
        });
        if more && let Some((key, _, version)) = page.last() {
            response["NextKeyMarker"] = json!(key);
            response["NextVersionIdMarker"] = json!(version.id);
        }
        Ok(response)
    }
}
