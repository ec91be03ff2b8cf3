//! Object storage operations over aws-sdk-s3

use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, BucketVersioningStatus, CreateBucketConfiguration, Delete,
    ObjectIdentifier, VersioningConfiguration,
};
use base64::Engine as _;
use nb_core::{Service, TransportError};
use serde_json::{Value, json};

use crate::convert::{fields, millis, opt_bool, opt_i32, opt_str, required_str, text};
use crate::error::{build_error, sdk_error};

pub(crate) async fn invoke(client: &Client, operation: &str, params: &Value) -> Result<Value, TransportError> {
    match operation {
        "CreateBucket" => {
            let mut request = client.create_bucket().bucket(required_str(params, "Bucket")?);
            if let Some(region) = params
                .pointer("/CreateBucketConfiguration/LocationConstraint")
                .and_then(Value::as_str)
            {
                request = request.create_bucket_configuration(
                    CreateBucketConfiguration::builder()
                        .location_constraint(BucketLocationConstraint::from(region))
                        .build(),
                );
            }
            let response = request.send().await.map_err(|e| sdk_error(operation, e))?;
            Ok(fields([("Location", text(response.location()))]))
        }
        "HeadBucket" => {
            let response = client
                .head_bucket()
                .bucket(required_str(params, "Bucket")?)
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(fields([("BucketRegion", text(response.bucket_region()))]))
        }
        "GetBucketVersioning" => {
            let response = client
                .get_bucket_versioning()
                .bucket(required_str(params, "Bucket")?)
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(fields([(
                "Status",
                text(response.status().map(BucketVersioningStatus::as_str)),
            )]))
        }
        "PutBucketVersioning" => {
            let status = params
                .pointer("/VersioningConfiguration/Status")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    TransportError::new(
                        TransportError::INVALID_PARAMETER,
                        "Missing VersioningConfiguration.Status",
                    )
                })?;
            client
                .put_bucket_versioning()
                .bucket(required_str(params, "Bucket")?)
                .versioning_configuration(
                    VersioningConfiguration::builder()
                        .status(BucketVersioningStatus::from(status))
                        .build(),
                )
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(json!({}))
        }
        "DeleteBucket" => {
            client
                .delete_bucket()
                .bucket(required_str(params, "Bucket")?)
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(json!({}))
        }
        "ListBuckets" => {
            let response = client
                .list_buckets()
                .set_prefix(opt_str(params, "Prefix").map(str::to_string))
                .set_max_buckets(opt_i32(params, "MaxBuckets"))
                .set_continuation_token(opt_str(params, "ContinuationToken").map(str::to_string))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            let buckets: Vec<Value> = response
                .buckets()
                .iter()
                .map(|b| {
                    fields([
                        ("Name", text(b.name())),
                        ("CreationDate", b.creation_date().and_then(millis)),
                        ("BucketRegion", text(b.bucket_region())),
                    ])
                })
                .collect();
            let mut value = json!({"Buckets": buckets});
            if let Some(token) = response.continuation_token() {
                value["ContinuationToken"] = json!(token);
            }
            Ok(value)
        }
        "PutObject" => {
            let body = base64::engine::general_purpose::STANDARD
                .decode(required_str(params, "Body")?)
                .map_err(|e| {
                    TransportError::new(TransportError::INVALID_PARAMETER, format!("Body: {e}"))
                })?;
            let response = client
                .put_object()
                .bucket(required_str(params, "Bucket")?)
                .key(required_str(params, "Key")?)
                .body(ByteStream::from(body))
                .set_content_type(opt_str(params, "ContentType").map(str::to_string))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(fields([
                ("ETag", text(response.e_tag())),
                ("VersionId", text(response.version_id())),
            ]))
        }
        "GetObject" => {
            let response = client
                .get_object()
                .bucket(required_str(params, "Bucket")?)
                .key(required_str(params, "Key")?)
                .set_version_id(opt_str(params, "VersionId").map(str::to_string))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            let mut value = fields([
                ("ContentLength", response.content_length().map(Value::from)),
                ("ETag", text(response.e_tag())),
                ("LastModified", response.last_modified().and_then(millis)),
                ("ContentType", text(response.content_type())),
                ("StorageClass", text(response.storage_class().map(|s| s.as_str()))),
                ("VersionId", text(response.version_id())),
            ]);
            let body = response.body.collect().await.map_err(|e| {
                TransportError::new(TransportError::DISPATCH_FAILURE, e.to_string()).retryable(true)
            })?;
            value["Body"] = json!(base64::engine::general_purpose::STANDARD.encode(body.into_bytes()));
            Ok(value)
        }
        "HeadObject" => {
            let response = client
                .head_object()
                .bucket(required_str(params, "Bucket")?)
                .key(required_str(params, "Key")?)
                .set_version_id(opt_str(params, "VersionId").map(str::to_string))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(fields([
                ("ContentLength", response.content_length().map(Value::from)),
                ("ETag", text(response.e_tag())),
                ("LastModified", response.last_modified().and_then(millis)),
                ("ContentType", text(response.content_type())),
                ("StorageClass", text(response.storage_class().map(|s| s.as_str()))),
                ("VersionId", text(response.version_id())),
            ]))
        }
        "DeleteObject" => {
            let response = client
                .delete_object()
                .bucket(required_str(params, "Bucket")?)
                .key(required_str(params, "Key")?)
                .set_version_id(opt_str(params, "VersionId").map(str::to_string))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            Ok(fields([
                ("DeleteMarker", response.delete_marker().map(Value::from)),
                ("VersionId", text(response.version_id())),
            ]))
        }
        "DeleteObjects" => delete_objects(client, params).await,
        "ListObjectsV2" => {
            let response = client
                .list_objects_v2()
                .bucket(required_str(params, "Bucket")?)
                .set_prefix(opt_str(params, "Prefix").map(str::to_string))
                .set_max_keys(opt_i32(params, "MaxKeys"))
                .set_continuation_token(opt_str(params, "ContinuationToken").map(str::to_string))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            let contents: Vec<Value> = response
                .contents()
                .iter()
                .map(|o| {
                    fields([
                        ("Key", text(o.key())),
                        ("Size", o.size().map(Value::from)),
                        ("ETag", text(o.e_tag())),
                        ("LastModified", o.last_modified().and_then(millis)),
                        ("StorageClass", text(o.storage_class().map(|s| s.as_str()))),
                    ])
                })
                .collect();
            let mut value = fields([
                ("IsTruncated", response.is_truncated().map(Value::from)),
                ("NextContinuationToken", text(response.next_continuation_token())),
            ]);
            value["Contents"] = json!(contents);
            Ok(value)
        }
        "ListObjectVersions" => {
            let response = client
                .list_object_versions()
                .bucket(required_str(params, "Bucket")?)
                .set_prefix(opt_str(params, "Prefix").map(str::to_string))
                .set_max_keys(opt_i32(params, "MaxKeys"))
                .set_key_marker(opt_str(params, "KeyMarker").map(str::to_string))
                .set_version_id_marker(opt_str(params, "VersionIdMarker").map(str::to_string))
                .send()
                .await
                .map_err(|e| sdk_error(operation, e))?;
            let versions: Vec<Value> = response
                .versions()
                .iter()
                .map(|v| {
                    fields([
                        ("Key", text(v.key())),
                        ("VersionId", text(v.version_id())),
                        ("IsLatest", v.is_latest().map(Value::from)),
                        ("LastModified", v.last_modified().and_then(millis)),
                        ("Size", v.size().map(Value::from)),
                        ("ETag", text(v.e_tag())),
                    ])
                })
                .collect();
            let markers: Vec<Value> = response
                .delete_markers()
                .iter()
                .map(|m| {
                    fields([
                        ("Key", text(m.key())),
                        ("VersionId", text(m.version_id())),
                        ("IsLatest", m.is_latest().map(Value::from)),
                        ("LastModified", m.last_modified().and_then(millis)),
                    ])
                })
                .collect();
            let mut value = fields([
                ("IsTruncated", response.is_truncated().map(Value::from)),
                ("NextKeyMarker", text(response.next_key_marker())),
                ("NextVersionIdMarker", text(response.next_version_id_marker())),
            ]);
            value["Versions"] = json!(versions);
            value["DeleteMarkers"] = json!(markers);
            Ok(value)
        }
        other => Err(TransportError::new(
            TransportError::UNKNOWN_OPERATION,
            format!("{} has no operation {other}", Service::Storage),
        )),
    }
}

async fn delete_objects(client: &Client, params: &Value) -> Result<Value, TransportError> {
    let delete = params.get("Delete").unwrap_or(&Value::Null);
    let objects = delete
        .get("Objects")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(|object| {
            ObjectIdentifier::builder()
                .key(required_str(object, "Key")?)
                .set_version_id(opt_str(object, "VersionId").map(str::to_string))
                .build()
                .map_err(build_error)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let response = client
        .delete_objects()
        .bucket(required_str(params, "Bucket")?)
        .delete(
            Delete::builder()
                .set_objects(Some(objects))
                .set_quiet(opt_bool(delete, "Quiet"))
                .build()
                .map_err(build_error)?,
        )
        .send()
        .await
        .map_err(|e| sdk_error("DeleteObjects", e))?;

    let deleted: Vec<Value> = response
        .deleted()
        .iter()
        .map(|d| fields([("Key", text(d.key())), ("VersionId", text(d.version_id()))]))
        .collect();
    let errors: Vec<Value> = response
        .errors()
        .iter()
        .map(|e| {
            fields([
                ("Key", text(e.key())),
                ("VersionId", text(e.version_id())),
                ("Code", text(e.code())),
                ("Message", text(e.message())),
            ])
        })
        .collect();
    Ok(json!({"Deleted": deleted, "Errors": errors}))
}
