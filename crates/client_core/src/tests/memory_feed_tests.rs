use super::*;
use serde_json::json;

fn seeded() -> MemoryFeed {
    MemoryFeed::with_root(json!({
        "currentReadings": {
            "sensors": { "soilMoisture": 40, "temperature": 21 },
            "devices": { "light1": "off" }
        }
    }))
}

#[tokio::test]
async fn subscribe_delivers_current_value_first() {
    let feed = seeded();
    let mut subscription = feed
        .subscribe("currentReadings/sensors")
        .await
        .expect("subscribe");

    assert_eq!(subscription.path(), "currentReadings/sensors");
    assert_eq!(
        subscription.next_update().await,
        Some(FeedUpdate::Value(Some(
            json!({ "soilMoisture": 40, "temperature": 21 })
        )))
    );
}

#[tokio::test]
async fn empty_path_delivers_none() {
    let feed = MemoryFeed::new();
    let mut subscription = feed.subscribe("historicalData").await.expect("subscribe");
    assert_eq!(subscription.next_update().await, Some(FeedUpdate::Value(None)));
}

#[tokio::test]
async fn child_writes_deliver_the_whole_subtree() {
    let feed = seeded();
    let mut devices = feed
        .subscribe("currentReadings/devices")
        .await
        .expect("subscribe");
    let _ = devices.next_update().await;

    feed.write("currentReadings/devices/light2", json!("on"))
        .await
        .expect("write");

    assert_eq!(
        devices.next_update().await,
        Some(FeedUpdate::Value(Some(
            json!({ "light1": "off", "light2": "on" })
        )))
    );
}

#[tokio::test]
async fn unrelated_writes_are_not_delivered() {
    let feed = seeded();
    let mut sensors = feed
        .subscribe("currentReadings/sensors")
        .await
        .expect("subscribe");
    let _ = sensors.next_update().await;

    feed.write("currentReadings/devices/light1", json!("on"))
        .await
        .expect("write");
    feed.set("currentReadings/sensors/soilMoisture", json!(12));

    match sensors.next_update().await {
        Some(FeedUpdate::Value(Some(value))) => assert_eq!(value["soilMoisture"], json!(12)),
        other => panic!("unexpected update: {other:?}"),
    }
}

#[tokio::test]
async fn parent_writes_reach_nested_subscribers() {
    let feed = seeded();
    let mut sensors = feed
        .subscribe("currentReadings/sensors")
        .await
        .expect("subscribe");
    let _ = sensors.next_update().await;

    feed.set("currentReadings", json!({ "sensors": { "soilMoisture": 5 } }));

    assert_eq!(
        sensors.next_update().await,
        Some(FeedUpdate::Value(Some(json!({ "soilMoisture": 5 }))))
    );
}

#[tokio::test]
async fn null_removes_the_node() {
    let feed = seeded();
    let mut devices = feed
        .subscribe("currentReadings/devices")
        .await
        .expect("subscribe");
    let _ = devices.next_update().await;

    feed.set("currentReadings/devices", Value::Null);

    assert_eq!(feed.value_at("currentReadings/devices"), None);
    assert_eq!(devices.next_update().await, Some(FeedUpdate::Value(None)));
    assert!(feed.value_at("currentReadings/sensors").is_some());
}

#[tokio::test]
async fn failed_writes_leave_the_tree_alone() {
    let feed = seeded();
    feed.fail_writes(Some("offline"));

    let err = feed
        .write("currentReadings/devices/light1", json!("on"))
        .await
        .expect_err("injected failure");
    assert!(err.to_string().contains("offline"));
    assert_eq!(
        feed.value_at("currentReadings/devices/light1"),
        Some(json!("off"))
    );
    assert!(feed.writes().is_empty());

    feed.fail_writes(None);
    feed.write("currentReadings/devices/light1", json!("on"))
        .await
        .expect("write");
    assert_eq!(feed.writes().len(), 1);
}

#[tokio::test]
async fn errors_go_to_exact_path_subscribers_only() {
    let feed = seeded();
    let mut sensors = feed
        .subscribe("currentReadings/sensors")
        .await
        .expect("subscribe");
    let mut devices = feed
        .subscribe("currentReadings/devices")
        .await
        .expect("subscribe");
    let _ = sensors.next_update().await;
    let _ = devices.next_update().await;

    feed.push_error("currentReadings/sensors", "permission denied");
    feed.set("currentReadings/devices/light1", json!("auto"));

    assert_eq!(
        sensors.next_update().await,
        Some(FeedUpdate::Error("permission denied".into()))
    );
    assert!(matches!(
        devices.next_update().await,
        Some(FeedUpdate::Value(Some(_)))
    ));
}

#[tokio::test]
async fn dropping_a_subscription_unsubscribes() {
    let feed = seeded();
    let first = feed.subscribe("currentReadings/sensors").await.expect("subscribe");
    let second = feed.subscribe("currentReadings/devices").await.expect("subscribe");
    assert_eq!(feed.subscriber_count(), 2);

    drop(first);
    assert_eq!(feed.subscriber_count(), 1);

    second.cancel();
    assert_eq!(feed.subscriber_count(), 0);
}

#[tokio::test]
async fn subscription_is_a_stream() {
    use futures::StreamExt;

    let feed = seeded();
    let mut subscription = feed
        .subscribe("currentReadings/devices/light1")
        .await
        .expect("subscribe");
    feed.set("currentReadings/devices/light1", json!("on"));

    let updates: Vec<FeedUpdate> = (&mut subscription).take(2).collect().await;
    assert_eq!(
        updates,
        vec![
            FeedUpdate::Value(Some(json!("off"))),
            FeedUpdate::Value(Some(json!("on")))
        ]
    );
}
