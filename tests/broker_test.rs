//! Subscription broker tests.

mod common;

use bytes::Bytes;
use common::{drain, env_line, filter, next_message, subscribed, test_broker, TestPointBuilder};
use iotpulse_lib::broker::SUBSCRIBE_PREFIX;
use iotpulse_lib::protocol::Point;
use pretty_assertions::assert_eq;

fn delivered_points(message: &str) -> Vec<Point> {
    serde_json::from_str(message).unwrap()
}

#[test]
fn test_each_connection_gets_its_matching_subset() {
    let broker = test_broker();
    let (_, mut all) = subscribed(&broker, vec![filter("environment", &[])]);
    let (_, mut only_a) = subscribed(&broker, vec![filter("environment", &["clientId=A"])]);
    let (_, mut power) = subscribed(&broker, vec![filter("power", &[])]);

    let points = vec![
        TestPointBuilder::new("environment").tag("clientId", "A").build(),
        TestPointBuilder::new("environment").tag("clientId", "B").build(),
        TestPointBuilder::new("environment").tag("clientId", "A").field("Humidity", "1").build(),
    ];
    let report = broker.on_ingest(&points);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.skipped, 1);

    let all = drain(&mut all);
    assert_eq!(all.len(), 1);
    assert_eq!(delivered_points(&all[0]), points);

    let only_a = drain(&mut only_a);
    assert_eq!(only_a.len(), 1);
    assert_eq!(delivered_points(&only_a[0]), vec![points[0].clone(), points[2].clone()]);

    assert!(drain(&mut power).is_empty());
}

#[test]
fn test_filters_are_disjunctive_and_tags_conjunctive() {
    let broker = test_broker();
    let (_, mut rx) = subscribed(
        &broker,
        vec![
            filter("environment", &["clientId=A", "room=1"]),
            filter("power", &[]),
        ],
    );

    let points = vec![
        TestPointBuilder::new("environment").tag("clientId", "A").build(),
        TestPointBuilder::new("environment").tag("clientId", "A").tag("room", "1").build(),
        TestPointBuilder::new("power").build(),
    ];
    broker.on_ingest(&points);

    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 1);
    assert_eq!(delivered_points(&messages[0]), vec![points[1].clone(), points[2].clone()]);
}

#[test]
fn test_no_subscription_no_delivery() {
    let broker = test_broker();
    let (_, mut idle) = broker.connect().unwrap();
    let (id, mut cleared) = subscribed(&broker, vec![filter("environment", &[])]);
    broker.handle_control(id, "subscribe:[]").unwrap();

    broker.ingest_buffer(env_line("A", 20.0, 1).as_bytes());
    assert!(drain(&mut idle).is_empty());
    assert!(drain(&mut cleared).is_empty());
}

#[test]
fn test_control_messages() {
    let broker = test_broker();
    let (id, mut rx) = broker.connect().unwrap();

    let payload = format!(
        r#"{}[{{"measurement":"environment","tags":["clientId=B"]}}]"#,
        SUBSCRIBE_PREFIX
    );
    broker.handle_control(id, &payload).unwrap();
    broker.ingest_buffer(format!("{}{}", env_line("A", 1.0, 1), env_line("B", 2.0, 2)).as_bytes());

    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 1);
    let points = delivered_points(&messages[0]);
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].tag("clientId"), Some("B"));

    // rejected: previous subscription stays
    assert!(broker.handle_control(id, r#"subscribe:[{"tags":[]}]"#).is_err());
    assert!(broker.handle_control(id, "hello").is_err());
    broker.ingest_buffer(env_line("B", 3.0, 3).as_bytes());
    assert_eq!(drain(&mut rx).len(), 1);

    for falsy in ["subscribe:false", "subscribe:null", "subscribe:0", "subscribe:\"\""] {
        broker.handle_control(id, &payload).unwrap();
        broker.handle_control(id, falsy).unwrap();
        assert!(broker.subscription_of(id).is_none(), "{falsy} should unsubscribe");
    }
}

#[test]
fn test_batches_arrive_in_ingest_order() {
    let broker = test_broker();
    let (_, mut rx) = subscribed(&broker, vec![filter("environment", &[])]);

    for i in 0..10u64 {
        broker.ingest_buffer(env_line("A", i as f64, i).as_bytes());
    }

    let timestamps: Vec<String> = drain(&mut rx)
        .iter()
        .flat_map(|message| delivered_points(message))
        .filter_map(|point| point.timestamp)
        .collect();
    let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    assert_eq!(timestamps, expected);
}

#[test]
fn test_parallel_fanout_matches_sequential() {
    let broker = test_broker();
    let receivers: Vec<_> = (0..12)
        .map(|i| {
            let client = format!("clientId=D{}", i % 3);
            subscribed(&broker, vec![filter("environment", &[client.as_str()])]).1
        })
        .collect();

    let buffer: String = (0..30u64).map(|i| env_line(&format!("D{}", i % 3), 1.0, i)).collect();
    let report = broker.ingest_buffer(buffer.as_bytes());
    assert_eq!(report.points, 30);
    assert_eq!(report.delivered, 12);

    for mut rx in receivers {
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(delivered_points(&messages[0]).len(), 10);
    }
}

#[test]
fn test_dropped_receiver_is_removed() {
    let broker = test_broker();
    let (id, rx) = subscribed(&broker, vec![filter("environment", &[])]);
    drop(rx);

    let report = broker.ingest_buffer(env_line("A", 1.0, 1).as_bytes());
    assert_eq!(report.disconnected, 1);
    assert!(broker.subscription_of(id).is_none());
    assert_eq!(broker.connection_count(), 0);
    assert_eq!(broker.stats().disconnected, 1);
}

#[test]
fn test_cleanup_sweeps_idle_closed_connections() {
    let broker = test_broker();
    let (_, rx) = broker.connect().unwrap();
    let (_, _kept) = broker.connect().unwrap();
    drop(rx);

    assert_eq!(broker.cleanup_disconnected(), 1);
    assert_eq!(broker.connection_count(), 1);
}

#[tokio::test]
async fn test_ingest_loop_over_feed() {
    let broker = test_broker();
    let (_, mut rx) = subscribed(&broker, vec![filter("environment", &["clientId=A"])]);

    let (feed, feed_rx) = broker.feed_channel();
    let handle = broker.start(feed_rx);

    feed.send(Bytes::from(env_line("B", 1.0, 1))).await.unwrap();
    feed.send(Bytes::from(env_line("A", 2.0, 2))).await.unwrap();

    let message = next_message(&mut rx).await.expect("delivery");
    let points = delivered_points(&message);
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].timestamp.as_deref(), Some("2"));

    handle.stop().await.unwrap();
    assert_eq!(broker.stats().passes, 2);
}

#[tokio::test]
async fn test_ingest_loop_ends_when_feed_closes() {
    let broker = test_broker();
    let (feed, feed_rx) = broker.feed_channel();
    let handle = broker.start(feed_rx);
    drop(feed);

    tokio::time::timeout(std::time::Duration::from_secs(1), handle.stop())
        .await
        .unwrap()
        .unwrap();
}
