//! Link creation, traversal, and linked_at bookkeeping.

use serde_json::{json, Value};
use serial_test::serial;

use autumndb::backend::BackendError;
use autumndb::contract::ContractDraft;
use autumndb::schema::QueryOptions;
use uuid::Uuid;

use super::common::{card_draft, link_draft, test_backend, unique_slug};

fn typed_draft(slug: &str, contract_type: &str) -> ContractDraft {
    serde_json::from_value(json!({
        "slug": slug,
        "type": contract_type,
        "version": "1.0.0",
        "data": {}
    }))
    .expect("valid draft")
}

#[tokio::test]
#[serial]
async fn test_link_expansion_collects_all_edges() {
    let Some(backend) = test_backend().await else {
        eprintln!("skipping: AUTUMNDB_TEST_DATABASE_URL not set");
        return;
    };

    let thread = backend
        .insert_contract(typed_draft(&unique_slug("thread"), "thread@1.0.0"))
        .await
        .unwrap();
    let message_1 = backend
        .insert_contract(typed_draft(&unique_slug("m1"), "message@1.0.0"))
        .await
        .unwrap();
    let message_2 = backend
        .insert_contract(typed_draft(&unique_slug("m2"), "message@1.0.0"))
        .await
        .unwrap();

    for message in [&message_1, &message_2] {
        backend
            .insert_contract(link_draft(
                message,
                "is attached to",
                &thread,
                "has attached element",
            ))
            .await
            .unwrap();
    }

    let schema = json!({
        "type": "object",
        "properties": {
            "id": {"const": thread.id},
            "type": {"const": "thread@1.0.0"}
        },
        "required": ["id", "type"],
        "$$links": {"has attached element": {"type": "object"}}
    });
    let options = QueryOptions::from_value(&json!({"limit": 1})).unwrap();
    let results = backend.query(&schema, &Value::Null, &options).await.unwrap();

    // One root row, with both messages rolled up under the verb.
    assert_eq!(results.len(), 1);
    let linked = results[0]["links"]["has attached element"]
        .as_array()
        .expect("expanded links are an array");
    assert_eq!(linked.len(), 2);
    let ids: Vec<&str> = linked
        .iter()
        .map(|entry| entry["id"].as_str().unwrap())
        .collect();
    // Creation order.
    assert_eq!(
        ids,
        vec![message_1.id.to_string().as_str(), message_2.id.to_string().as_str()]
    );
}

#[tokio::test]
#[serial]
async fn test_linked_at_is_stamped_once() {
    let Some(backend) = test_backend().await else {
        eprintln!("skipping: AUTUMNDB_TEST_DATABASE_URL not set");
        return;
    };

    let thread = backend
        .insert_contract(typed_draft(&unique_slug("thread"), "thread@1.0.0"))
        .await
        .unwrap();
    let message_1 = backend
        .insert_contract(typed_draft(&unique_slug("m1"), "message@1.0.0"))
        .await
        .unwrap();
    let message_2 = backend
        .insert_contract(typed_draft(&unique_slug("m2"), "message@1.0.0"))
        .await
        .unwrap();

    let first_link = backend
        .insert_contract(link_draft(
            &message_1,
            "is attached to",
            &thread,
            "has attached element",
        ))
        .await
        .unwrap();

    let after_first = backend
        .get_contract_by_id(thread.id)
        .await
        .unwrap()
        .unwrap();
    let stamped = after_first.linked_at["has attached element"].clone();
    let stamped_at: chrono::DateTime<chrono::Utc> =
        serde_json::from_value(stamped.clone()).expect("stamp is a timestamp");
    assert_eq!(
        stamped_at, first_link.created_at,
        "first link stamps its created_at"
    );

    backend
        .insert_contract(link_draft(
            &message_2,
            "is attached to",
            &thread,
            "has attached element",
        ))
        .await
        .unwrap();

    let after_second = backend
        .get_contract_by_id(thread.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        after_second.linked_at["has attached element"], stamped,
        "later links leave the stamp unchanged"
    );

    // Both sides carry their own verb.
    let message_side = backend
        .get_contract_by_id(message_1.id)
        .await
        .unwrap()
        .unwrap();
    assert!(message_side.linked_at.contains_key("is attached to"));
}

#[tokio::test]
#[serial]
async fn test_link_to_missing_target_fails() {
    let Some(backend) = test_backend().await else {
        eprintln!("skipping: AUTUMNDB_TEST_DATABASE_URL not set");
        return;
    };

    let message = backend
        .insert_contract(typed_draft(&unique_slug("m"), "message@1.0.0"))
        .await
        .unwrap();
    let ghost = Uuid::new_v4();

    let draft: ContractDraft = serde_json::from_value(json!({
        "slug": unique_slug("link"),
        "type": "link@1.0.0",
        "name": "is attached to",
        "data": {
            "from": {"id": message.id, "type": message.contract_type},
            "to": {"id": ghost, "type": "thread@1.0.0"},
            "inverseName": "has attached element"
        }
    }))
    .unwrap();

    let err = backend.insert_contract(draft).await.unwrap_err();
    match err {
        BackendError::NoLinkTarget(id) => assert_eq!(id, ghost),
        other => panic!("expected NoLinkTarget, got {:?}", other),
    }
}

#[tokio::test]
#[serial]
async fn test_remove_link_drops_both_edges() {
    let Some(backend) = test_backend().await else {
        eprintln!("skipping: AUTUMNDB_TEST_DATABASE_URL not set");
        return;
    };

    let thread = backend
        .insert_contract(typed_draft(&unique_slug("thread"), "thread@1.0.0"))
        .await
        .unwrap();
    let message = backend
        .insert_contract(typed_draft(&unique_slug("m"), "message@1.0.0"))
        .await
        .unwrap();
    let link = backend
        .insert_contract(link_draft(
            &message,
            "is attached to",
            &thread,
            "has attached element",
        ))
        .await
        .unwrap();

    assert!(backend.remove_link(link.id).await.unwrap());

    let schema = json!({
        "type": "object",
        "properties": {"id": {"const": thread.id}},
        "required": ["id"],
        "$$links": {"has attached element": {"type": "object"}}
    });
    let results = backend
        .query(&schema, &Value::Null, &QueryOptions::default())
        .await
        .unwrap();
    // The thread no longer has a matching linked contract.
    assert!(results.is_empty());
}
