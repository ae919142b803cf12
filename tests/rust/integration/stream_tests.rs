//! Stream matcher behavior: insert, update, and unmatch events.

use std::time::Duration;

use serde_json::{json, Value};
use serial_test::serial;
use tokio::time::timeout;

use autumndb::backend::{StreamEventKind, StreamMessage, Streams};
use autumndb::schema::QueryOptions;

use super::common::{card_draft, test_backend, unique_slug};

const EVENT_WAIT: Duration = Duration::from_secs(10);

async fn next_event(
    receiver: &mut tokio::sync::mpsc::UnboundedReceiver<StreamMessage>,
) -> autumndb::backend::StreamEvent {
    loop {
        let message = timeout(EVENT_WAIT, receiver.recv())
            .await
            .expect("timed out waiting for a stream event")
            .expect("stream closed unexpectedly");
        match message {
            StreamMessage::Event(event) => return event,
            StreamMessage::Error(error) => panic!("stream error: {}", error),
        }
    }
}

#[tokio::test]
#[serial]
async fn test_insert_update_and_unmatch_sequence() {
    let Some(backend) = test_backend().await else {
        eprintln!("skipping: AUTUMNDB_TEST_DATABASE_URL not set");
        return;
    };

    let streams = Streams::new(backend.clone());
    tokio::spawn(streams.clone().run());
    // Give the listener a moment to issue LISTEN before changes happen.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let slug = unique_slug("watched");
    let schema = json!({
        "type": "object",
        "properties": {"slug": {"const": slug}},
        "required": ["slug"]
    });
    let (subscriber_id, mut receiver) = streams
        .attach(schema, Value::Null, QueryOptions::default())
        .await
        .unwrap();

    // Insert: the contract enters the subscriber's result set.
    let inserted = backend
        .insert_contract(card_draft(&slug, json!({"test": 1})))
        .await
        .unwrap();
    let event = next_event(&mut receiver).await;
    assert_eq!(event.kind, StreamEventKind::Insert);
    assert_eq!(event.id, inserted.id);

    // Update a data field: one update event with the new payload.
    backend
        .replace_contract(inserted.id, card_draft(&slug, json!({"test": 2})))
        .await
        .unwrap();
    let event = next_event(&mut receiver).await;
    assert_eq!(event.kind, StreamEventKind::Update);
    assert_eq!(event.id, inserted.id);
    let after = event.after.expect("update carries the new payload");
    assert_eq!(after["data"]["test"], json!(2));

    // Change the slug: the contract no longer matches and unmatches.
    let other_slug = unique_slug("moved");
    backend
        .replace_contract(inserted.id, card_draft(&other_slug, json!({"test": 2})))
        .await
        .unwrap();
    let event = next_event(&mut receiver).await;
    assert_eq!(event.kind, StreamEventKind::Unmatch);
    assert_eq!(event.id, inserted.id);
    assert!(event.after.is_none());

    streams.detach(subscriber_id).await;
}

#[tokio::test]
#[serial]
async fn test_delete_event_for_seen_contract() {
    let Some(backend) = test_backend().await else {
        eprintln!("skipping: AUTUMNDB_TEST_DATABASE_URL not set");
        return;
    };

    let streams = Streams::new(backend.clone());
    tokio::spawn(streams.clone().run());
    tokio::time::sleep(Duration::from_millis(500)).await;

    let slug = unique_slug("doomed");
    let schema = json!({
        "type": "object",
        "properties": {"slug": {"const": slug}},
        "required": ["slug"]
    });
    let (_, mut receiver) = streams
        .attach(schema, Value::Null, QueryOptions::default())
        .await
        .unwrap();

    let inserted = backend
        .insert_contract(card_draft(&slug, json!({})))
        .await
        .unwrap();
    assert_eq!(next_event(&mut receiver).await.kind, StreamEventKind::Insert);

    backend.delete_contract(inserted.id).await.unwrap();
    let event = next_event(&mut receiver).await;
    assert_eq!(event.kind, StreamEventKind::Delete);
    assert_eq!(event.id, inserted.id);
}

#[tokio::test]
#[serial]
async fn test_unrelated_changes_produce_no_events() {
    let Some(backend) = test_backend().await else {
        eprintln!("skipping: AUTUMNDB_TEST_DATABASE_URL not set");
        return;
    };

    let streams = Streams::new(backend.clone());
    tokio::spawn(streams.clone().run());
    tokio::time::sleep(Duration::from_millis(500)).await;

    let watched = unique_slug("watched");
    let schema = json!({
        "type": "object",
        "properties": {"slug": {"const": watched}},
        "required": ["slug"]
    });
    let (_, mut receiver) = streams
        .attach(schema, Value::Null, QueryOptions::default())
        .await
        .unwrap();

    // A contract with a different slug never reaches the subscriber.
    backend
        .insert_contract(card_draft(&unique_slug("other"), json!({})))
        .await
        .unwrap();

    let quiet = timeout(Duration::from_secs(2), receiver.recv()).await;
    assert!(quiet.is_err(), "no event should arrive for unrelated changes");
}
