//! End-to-end façade behaviour against the in-memory transport

use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use jiff::Timestamp;

use nb_core::{
    AttributeValue, BatchConfig, BatchOperation, Error, EventFilter, Item, KeySchema, ListOptions,
    LogsClient, MemoryTransport, ResourceIdentity, ResourceManager, ScalarType, StorageClient,
    TableClient, TopicClient, TransportError, attr, collect_all, item, list_all,
};

fn products() -> ResourceIdentity {
    ResourceIdentity::table(
        "products",
        KeySchema::partition("category", ScalarType::S).with_sort("sku", ScalarType::S),
    )
}

fn fast_batches() -> BatchConfig {
    BatchConfig {
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        ..Default::default()
    }
}

async fn products_table(transport: &Arc<MemoryTransport>) -> nb_core::Table {
    let tables = TableClient::new(transport.clone())
        .unwrap()
        .with_batch_config(&fast_batches());
    tables.create(&products(), Item::new()).await.unwrap();
    tables.items(&products()).unwrap()
}

#[tokio::test]
async fn test_products_table_lifecycle() {
    let transport = Arc::new(MemoryTransport::new());
    let tables = TableClient::new(transport.clone()).unwrap();

    let created = tables.create(&products(), Item::new()).await.unwrap();
    assert_eq!(created["TableName"], AttributeValue::from("products"));
    assert!(matches!(
        tables.create(&products(), Item::new()).await,
        Err(Error::AlreadyExists(_))
    ));

    let table = tables.items(&products()).unwrap();
    let key = item! {"category" => "clothing", "sku" => "woo-hoodie"};
    let stored = table
        .create(key.clone(), item! {"name" => "Hoodie", "price" => 44.99})
        .await
        .unwrap();
    assert_eq!(table.get(&key).await.unwrap(), Some(stored.clone()));

    let updated = table
        .update(&key, item! {"price" => 39.99, "on_sale" => true})
        .await
        .unwrap();
    assert_eq!(updated["name"], AttributeValue::from("Hoodie"));
    assert_eq!(updated["on_sale"], AttributeValue::Bool(true));
    assert_eq!(table.get(&key).await.unwrap(), Some(updated));

    assert!(table.delete(&key).await.unwrap());
    assert_eq!(table.get(&key).await.unwrap(), None);
    // Second delete finds nothing
    assert!(!table.delete(&key).await.unwrap());

    assert!(tables.delete(&products()).await.unwrap());
    assert_eq!(tables.get(&products()).await.unwrap(), None);
    assert!(!tables.delete(&products()).await.unwrap());
}

#[tokio::test]
async fn test_update_of_missing_item_is_not_found() {
    let transport = Arc::new(MemoryTransport::new());
    let table = products_table(&transport).await;

    let err = table
        .update(
            &item! {"category" => "clothing", "sku" => "ghost"},
            item! {"price" => 1},
        )
        .await
        .unwrap_err();
    match err {
        Error::NotFound(msg) => assert!(msg.contains("products"), "{msg}"),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn test_batch_of_200_puts_sends_8_chunks() {
    let transport = Arc::new(MemoryTransport::new());
    let table = products_table(&transport).await;

    let operations: Vec<BatchOperation> = (0..200)
        .map(|i| {
            BatchOperation::Put(item! {
                "category" => "clothing",
                "sku" => format!("sku-{i:03}"),
                "price" => i,
            })
        })
        .collect();
    let result = table.batch_write(operations).await.unwrap();

    assert_eq!(result.chunks, 8);
    assert_eq!(result.processed, 200);
    assert!(result.is_complete());
    assert_eq!(transport.call_count("BatchWriteItem"), 8);

    let stored = table
        .query(&attr("category").eq("clothing"), None)
        .await
        .unwrap();
    assert_eq!(stored.len(), 200);
}

#[tokio::test]
async fn test_batch_keeps_last_write_per_key() {
    let transport = Arc::new(MemoryTransport::new());
    let table = products_table(&transport).await;

    let result = table
        .batch_write(vec![
            BatchOperation::Put(item! {"category" => "a", "sku" => "1", "price" => 10}),
            BatchOperation::Put(item! {"category" => "a", "sku" => "2", "price" => 20}),
            BatchOperation::Put(item! {"category" => "a", "sku" => "1", "price" => 11}),
            BatchOperation::Delete(item! {"category" => "a", "sku" => "2"}),
        ])
        .await
        .unwrap();

    assert_eq!(result.requests, 1);
    assert_eq!(result.processed, 2);
    assert!(result.is_complete());

    let stored = table.query(&attr("category").eq("a"), None).await.unwrap();
    assert_eq!(
        stored,
        vec![item! {"category" => "a", "sku" => "1", "price" => 11}]
    );
}

#[tokio::test]
async fn test_raw_batch_with_repeated_key_is_rejected() {
    use nb_core::{Service, Transport};

    let transport = Arc::new(MemoryTransport::new());
    let table = products_table(&transport).await;
    let put = serde_json::json!({"PutRequest": {"Item": {
        "category": {"S": "a"},
        "sku": {"S": "1"},
    }}});

    let err = transport
        .invoke(
            Service::Table,
            "BatchWriteItem",
            serde_json::json!({"RequestItems": {"products": [put.clone(), put]}}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, "ValidationException");
    assert_eq!(table.scan(None).await.unwrap(), Vec::<Item>::new());
}

#[tokio::test]
async fn test_unprocessed_items_are_resubmitted() {
    let transport = Arc::new(MemoryTransport::new());
    let table = products_table(&transport).await;
    transport.leave_unprocessed(3);

    let operations: Vec<BatchOperation> = (0..30)
        .map(|i| BatchOperation::Put(item! {"category" => "toys", "sku" => format!("t{i:02}")}))
        .collect();
    let result = table.batch_write(operations).await.unwrap();

    assert_eq!(result.chunks, 2);
    assert_eq!(result.retries, 1);
    assert_eq!(result.requests, 3);
    assert_eq!(result.processed, 30);
    assert!(result.is_complete());
}

#[tokio::test]
async fn test_query_with_sort_prefix_and_filter() {
    let transport = Arc::new(MemoryTransport::new());
    let table = products_table(&transport).await;
    for (sku, price) in [("woo-hoodie", 44), ("woo-tshirt", 20), ("wp-mug", 9)] {
        table
            .create(
                item! {"category" => "clothing", "sku" => sku},
                item! {"price" => price},
            )
            .await
            .unwrap();
    }
    table
        .create(item! {"category" => "music", "sku" => "woo-album"}, Item::new())
        .await
        .unwrap();

    let key = attr("category")
        .eq("clothing")
        .and(attr("sku").begins_with("woo"));
    let hits = table.query(&key, None).await.unwrap();
    let skus: Vec<_> = hits.iter().map(|i| i["sku"].as_str().unwrap()).collect();
    assert_eq!(skus, vec!["woo-hoodie", "woo-tshirt"]);

    let pricey = table
        .query(&key, Some(&attr("price").eq(44)))
        .await
        .unwrap();
    assert_eq!(pricey.len(), 1);

    let scanned = table.scan(Some(&attr("sku").begins_with("woo"))).await.unwrap();
    assert_eq!(scanned.len(), 3);
}

#[tokio::test]
async fn test_invalid_query_never_reaches_the_service() {
    let transport = Arc::new(MemoryTransport::new());
    let table = products_table(&transport).await;

    let err = table
        .query(&attr("sku").eq("woo-hoodie"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidQuery(_)));
    assert_eq!(transport.call_count("Query"), 0);
}

#[tokio::test]
async fn test_query_pages_concatenate() {
    let transport = Arc::new(MemoryTransport::new().with_page_size(7));
    let table = products_table(&transport).await;
    let operations: Vec<BatchOperation> = (0..20)
        .map(|i| BatchOperation::Put(item! {"category" => "books", "sku" => format!("b{i:02}")}))
        .collect();
    table.batch_write(operations).await.unwrap();

    let all = table.query(&attr("category").eq("books"), None).await.unwrap();
    let skus: Vec<String> = all
        .iter()
        .map(|i| i["sku"].as_str().unwrap().to_string())
        .collect();
    let expected: Vec<String> = (0..20).map(|i| format!("b{i:02}")).collect();
    assert_eq!(skus, expected);
    assert_eq!(transport.call_count("Query"), 3);
}

#[tokio::test]
async fn test_delete_all_removes_every_version() {
    let transport = Arc::new(MemoryTransport::new());
    let storage = StorageClient::new(transport.clone()).unwrap();
    let bucket = ResourceIdentity::bucket("scratch-data");
    storage
        .create(&bucket, item! {"Versioning" => "Enabled"})
        .await
        .unwrap();

    for key in ["temp/a.txt", "temp/b.txt", "temp/c.txt"] {
        for body in ["v1", "v2"] {
            storage
                .put_object(&bucket, key, Bytes::from(body), Some("text/plain"))
                .await
                .unwrap();
        }
    }
    storage
        .put_object(&bucket, "keep/readme.md", Bytes::from("hi"), None)
        .await
        .unwrap();

    assert_eq!(storage.delete_all(&bucket, Some("temp/")).await.unwrap(), 6);

    let remaining = collect_all(nb_core::paginate(|token| {
        let options = ListOptions::default().at(token);
        let storage = &storage;
        let bucket = &bucket;
        async move { storage.list_object_versions(bucket, &options).await }
    }))
    .await
    .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].key, "keep/readme.md");

    assert_eq!(storage.delete_all(&bucket, Some("temp/")).await.unwrap(), 0);
}

#[tokio::test]
async fn test_delete_buckets_sweeps_best_effort() {
    let transport = Arc::new(MemoryTransport::new());
    let storage = StorageClient::new(transport.clone()).unwrap();
    for name in ["scratch-a", "scratch-b", "scratch-full", "keep-me"] {
        storage
            .create(&ResourceIdentity::bucket(name), Item::new())
            .await
            .unwrap();
    }
    storage
        .put_object(
            &ResourceIdentity::bucket("scratch-full"),
            "data.bin",
            Bytes::from("x"),
            None,
        )
        .await
        .unwrap();

    let scratch = ListOptions::with_prefix("scratch-");
    // The non-empty bucket is skipped, not fatal
    assert_eq!(storage.delete_buckets(&scratch, false).await.unwrap(), 2);
    assert!(
        storage
            .get(&ResourceIdentity::bucket("scratch-full"))
            .await
            .unwrap()
            .is_some()
    );

    assert_eq!(storage.delete_buckets(&scratch, true).await.unwrap(), 1);
    let left: Vec<String> = collect_all(list_all(&storage, ListOptions::default()))
        .await
        .unwrap()
        .into_iter()
        .map(|bucket| bucket.name)
        .collect();
    assert_eq!(left, vec!["keep-me".to_string()]);
}

#[tokio::test]
async fn test_bucket_round_trip_and_listing() {
    let transport = Arc::new(MemoryTransport::new().with_page_size(2));
    let storage = StorageClient::new(transport.clone()).unwrap();
    for name in ["logs-a", "logs-b", "logs-c", "media"] {
        storage
            .create(&ResourceIdentity::bucket(name), Item::new())
            .await
            .unwrap();
    }

    let created = storage
        .get(&ResourceIdentity::bucket("media"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(created["Name"], AttributeValue::from("media"));

    let names: Vec<String> = list_all(&storage, ListOptions::with_prefix("logs-"))
        .map_ok(|summary| summary.name)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(names, vec!["logs-a", "logs-b", "logs-c"]);

    let object = storage
        .put_object(
            &ResourceIdentity::bucket("media"),
            "cat.png",
            Bytes::from_static(b"\x89PNG"),
            Some("image/png"),
        )
        .await
        .unwrap();
    assert_eq!(object.size_bytes, 4);
    let data = storage
        .get_object(&ResourceIdentity::bucket("media"), "cat.png", None)
        .await
        .unwrap();
    assert_eq!(data.body.as_ref(), b"\x89PNG");
}

#[tokio::test]
async fn test_object_head_and_delete() {
    let transport = Arc::new(MemoryTransport::new());
    let storage = StorageClient::new(transport).unwrap();
    let media = ResourceIdentity::bucket("media");
    storage.create(&media, Item::new()).await.unwrap();
    storage
        .put_object(&media, "notes.txt", Bytes::from_static(b"hello"), None)
        .await
        .unwrap();

    let head = storage.head_object(&media, "notes.txt").await.unwrap().unwrap();
    assert_eq!(head.key, "notes.txt");
    assert_eq!(head.size_bytes, 5);

    assert!(storage.delete_object(&media, "notes.txt", None).await.unwrap());
    assert!(storage.head_object(&media, "notes.txt").await.unwrap().is_none());
    assert!(matches!(
        storage.get_object(&media, "notes.txt", None).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_unconfirmed_delete_reports_false() {
    let transport = Arc::new(MemoryTransport::new());
    let logs = LogsClient::new(transport.clone()).unwrap();
    let group = ResourceIdentity::log_group("/app/web");
    logs.create(&group, Item::new()).await.unwrap();

    transport.respond_with_status("DeleteLogGroup", 500);
    assert!(!logs.delete(&group).await.unwrap());
}

#[tokio::test]
async fn test_connection_failures_surface() {
    let transport = Arc::new(MemoryTransport::new());
    let storage = StorageClient::new(transport.clone()).unwrap();
    transport.fail_next(
        "DeleteBucket",
        TransportError::new(TransportError::TIMEOUT, "no route to host"),
    );
    let err = storage
        .delete(&ResourceIdentity::bucket("anything"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
}

#[tokio::test]
async fn test_get_or_create_is_stable() {
    let transport = Arc::new(MemoryTransport::new());
    let logs = LogsClient::new(transport.clone()).unwrap();
    let group = ResourceIdentity::log_group("/app/jobs");

    let first = logs
        .get_or_create(&group, item! {"RetentionInDays" => 14})
        .await
        .unwrap();
    let second = logs.get_or_create(&group, Item::new()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(transport.call_count("CreateLogGroup"), 1);
}

#[tokio::test]
async fn test_topic_publish_and_subscriptions() {
    let transport = Arc::new(MemoryTransport::new());
    let topics = TopicClient::new(transport.clone()).unwrap();
    let orders = ResourceIdentity::topic("orders");

    let created = topics
        .create(&orders, item! {"DisplayName" => "Orders"})
        .await
        .unwrap();
    let arn = created["TopicArn"].as_str().unwrap().to_string();
    assert_eq!(arn, "arn:aws:sns:us-east-1:000000000000:orders");
    // Topic creation is idempotent
    topics.create(&orders, Item::new()).await.unwrap();

    let subscription = topics
        .subscribe(&orders, "email", "ops@example.com")
        .await
        .unwrap();
    let page = topics.list_subscriptions(Some(&orders), None).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].subscription_arn, subscription);

    topics
        .publish(&orders, "order 42 shipped", Some("shipping"))
        .await
        .unwrap();
    assert_eq!(
        transport.published(&arn),
        vec![(Some("shipping".to_string()), "order 42 shipped".to_string())]
    );

    assert!(topics.unsubscribe(&subscription).await.unwrap());
    assert!(!topics.unsubscribe(&subscription).await.unwrap());
    assert!(topics.delete(&orders).await.unwrap());
    assert_eq!(topics.get(&orders).await.unwrap(), None);
    assert!(!topics.delete(&orders).await.unwrap());
}

#[tokio::test]
async fn test_delete_of_unknown_topic_arn_reports_false() {
    let transport = Arc::new(MemoryTransport::new());
    let topics = TopicClient::new(transport.clone()).unwrap();

    let ghost = ResourceIdentity::topic("arn:aws:sns:us-east-1:000000000000:never-created");
    assert!(!topics.delete(&ghost).await.unwrap());
    assert_eq!(transport.call_count("DeleteTopic"), 0);

    let created = topics
        .create(&ResourceIdentity::topic("audit"), Item::new())
        .await
        .unwrap();
    let arn = created["TopicArn"].as_str().unwrap().to_string();
    assert!(topics.delete(&ResourceIdentity::topic(arn.as_str())).await.unwrap());
    assert!(!topics.delete(&ResourceIdentity::topic(arn.as_str())).await.unwrap());
}

#[tokio::test]
async fn test_log_events_filtering() {
    let transport = Arc::new(MemoryTransport::new());
    let logs = LogsClient::new(transport.clone()).unwrap();
    let group = ResourceIdentity::log_group("/app/api");
    logs.create(&group, Item::new()).await.unwrap();
    logs.create_stream(&group, "api-1").await.unwrap();

    let base: Timestamp = "2024-03-01T12:00:00Z".parse().unwrap();
    let at = |secs: i64| base.checked_add(jiff::SignedDuration::from_secs(secs)).unwrap();
    logs.put_events(
        &group,
        "api-1",
        &[
            (at(2), "ERROR connection reset by peer".to_string()),
            (at(0), "INFO started".to_string()),
            (at(5), "ERROR timeout".to_string()),
        ],
    )
    .await
    .unwrap();

    let filter = EventFilter {
        pattern: Some("ERROR \"connection reset\"".to_string()),
        ..Default::default()
    };
    let page = logs.filter_events(&group, &filter, None).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].timestamp, at(2));

    let window = EventFilter {
        start: Some(at(1)),
        end: Some(at(5)),
        ..Default::default()
    };
    let page = logs.filter_events(&group, &window, None).await.unwrap();
    let messages: Vec<_> = page.items.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["ERROR connection reset by peer", "ERROR timeout"]);

    let streams = logs
        .list_streams(&group, &ListOptions::default())
        .await
        .unwrap();
    assert_eq!(streams.items[0].name, "api-1");
    assert_eq!(streams.items[0].first_event, Some(at(0)));
}

#[tokio::test]
async fn test_log_retention_update() {
    let transport = Arc::new(MemoryTransport::new());
    let logs = LogsClient::new(transport.clone()).unwrap();
    let group = ResourceIdentity::log_group("/app/retained");
    logs.create(&group, Item::new()).await.unwrap();

    let updated = logs
        .update(&group, item! {"RetentionInDays" => 30})
        .await
        .unwrap();
    assert_eq!(updated["RetentionInDays"], AttributeValue::from(30));

    let err = logs
        .update(&group, item! {"RetentionInDays" => 31})
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidItem(_)));
}

#[tokio::test]
async fn test_scan_pages_follow_tokens() {
    let transport = Arc::new(MemoryTransport::new().with_page_size(3));
    let table = products_table(&transport).await;
    let operations: Vec<BatchOperation> = (0..5)
        .map(|i| BatchOperation::Put(item! {"category" => "games", "sku" => format!("g{i}")}))
        .collect();
    table.batch_write(operations).await.unwrap();

    let first = table.scan_page(None, &ListOptions::default()).await.unwrap();
    assert_eq!(first.items.len(), 3);
    assert!(first.has_more());

    let options = ListOptions::default().at(first.continuation_token.clone());
    let second = table.scan_page(None, &options).await.unwrap();
    assert_eq!(second.items.len(), 2);
    assert!(!second.has_more());
}

#[tokio::test]
async fn test_log_group_arn_carries_region() {
    let transport = Arc::new(MemoryTransport::new().with_region("eu-west-1"));
    let logs = LogsClient::new(transport).unwrap();
    logs.create(&ResourceIdentity::log_group("/app/api"), Item::new())
        .await
        .unwrap();

    let groups = collect_all(list_all(&logs, ListOptions::default())).await.unwrap();
    assert_eq!(groups.len(), 1);
    let arn = groups[0].arn.as_deref().unwrap();
    assert!(arn.starts_with("arn:aws:logs:eu-west-1:"), "{arn}");
}
