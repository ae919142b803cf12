//! Contract CRUD and query behavior against a live database.

use anyhow::Result;
use serde_json::{json, Value};
use serial_test::serial;

use autumndb::backend::BackendError;
use autumndb::schema::QueryOptions;

use super::common::{card_draft, test_backend, unique_slug};

#[tokio::test]
#[serial]
async fn test_insert_and_fetch_round_trip() -> Result<()> {
    let Some(backend) = test_backend().await else {
        eprintln!("skipping: AUTUMNDB_TEST_DATABASE_URL not set");
        return Ok(());
    };

    let slug = unique_slug("c");
    let inserted = backend
        .insert_contract(card_draft(&slug, json!({"test": 1})))
        .await?;

    let by_id = backend
        .get_contract_by_id(inserted.id)
        .await?
        .expect("inserted contract is fetchable by id");
    assert_eq!(by_id, inserted);

    let by_slug = backend
        .get_contract_by_slug(&format!("{}@1.0.0", slug))
        .await?
        .expect("inserted contract is fetchable by versioned slug");
    assert_eq!(by_slug.id, inserted.id);
    assert_eq!(by_slug.version, "1.0.0");
    assert_eq!(by_slug.data, json!({"test": 1}));
    assert!(by_slug.updated_at.is_none());
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_duplicate_slug_version_conflict() -> Result<()> {
    let Some(backend) = test_backend().await else {
        eprintln!("skipping: AUTUMNDB_TEST_DATABASE_URL not set");
        return Ok(());
    };

    let slug = unique_slug("dup");
    backend.insert_contract(card_draft(&slug, json!({}))).await?;
    let err = backend
        .insert_contract(card_draft(&slug, json!({})))
        .await
        .unwrap_err();
    match err {
        BackendError::ElementAlreadyExists { slug: offending } => assert_eq!(offending, slug),
        other => panic!("expected ElementAlreadyExists, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_query_with_sort_and_limit() -> Result<()> {
    let Some(backend) = test_backend().await else {
        eprintln!("skipping: AUTUMNDB_TEST_DATABASE_URL not set");
        return Ok(());
    };

    let marker = unique_slug("batch");
    for (slug, value) in [("c1", 1), ("c2", 2)] {
        let mut draft = card_draft(&format!("{}-{}", marker, slug), json!({"test": value}));
        draft.tags = vec![marker.clone()];
        backend.insert_contract(draft).await?;
    }

    let schema = json!({
        "type": "object",
        "properties": {
            "type": {"const": "card@1.0.0"},
            "tags": {"contains": {"const": marker}}
        },
        "required": ["type", "tags"]
    });
    let options = QueryOptions::from_value(&json!({
        "sortBy": ["data", "test"],
        "limit": 1
    }))?;

    let results = backend.query(&schema, &Value::Null, &options).await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["data"]["test"], json!(1));

    let zero = QueryOptions::from_value(&json!({"limit": 0}))?;
    let results = backend.query(&schema, &Value::Null, &zero).await?;
    assert!(results.is_empty());
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_replace_preserves_identity_and_stamps_updated_at() -> Result<()> {
    let Some(backend) = test_backend().await else {
        eprintln!("skipping: AUTUMNDB_TEST_DATABASE_URL not set");
        return Ok(());
    };

    let slug = unique_slug("rep");
    let inserted = backend
        .insert_contract(card_draft(&slug, json!({"test": 1})))
        .await?;

    let replaced = backend
        .replace_contract(inserted.id, card_draft(&slug, json!({"test": 2})))
        .await?;

    assert_eq!(replaced.id, inserted.id);
    assert_eq!(replaced.created_at, inserted.created_at);
    assert_eq!(replaced.data, json!({"test": 2}));
    assert!(replaced.updated_at.is_some());
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_latest_version_resolution() -> Result<()> {
    let Some(backend) = test_backend().await else {
        eprintln!("skipping: AUTUMNDB_TEST_DATABASE_URL not set");
        return Ok(());
    };

    let slug = unique_slug("ver");
    for version in ["1.0.0", "2.0.0", "3.0.0-beta"] {
        let mut draft = card_draft(&slug, json!({}));
        draft.version = version.to_string();
        backend.insert_contract(draft).await?;
    }

    // Pre-releases never win a latest lookup.
    let latest = backend
        .get_contract_by_slug(&format!("{}@latest", slug))
        .await?
        .expect("latest resolves");
    assert_eq!(latest.version, "2.0.0");

    let exact = backend
        .get_contract_by_slug(&format!("{}@3.0.0-beta", slug))
        .await?
        .expect("exact pre-release resolves");
    assert_eq!(exact.version, "3.0.0-beta");
    Ok(())
}
