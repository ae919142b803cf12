//! Shared helpers for the database-backed tests.

use autumndb::backend::{Backend, ConnectOptions};
use serde_json::{json, Value};
use uuid::Uuid;

/// Connect to the test database, or `None` when the environment does not
/// provide one.
pub async fn test_backend() -> Option<Backend> {
    let url = std::env::var("AUTUMNDB_TEST_DATABASE_URL").ok()?;
    let backend = Backend::connect(&url, ConnectOptions::default())
        .await
        .ok()?;
    backend.setup().await.ok()?;
    Some(backend)
}

/// A fresh slug per test run so tests never collide on the unique
/// constraint.
pub fn unique_slug(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

/// Draft for a plain card contract.
pub fn card_draft(slug: &str, data: Value) -> autumndb::contract::ContractDraft {
    serde_json::from_value(json!({
        "slug": slug,
        "type": "card@1.0.0",
        "version": "1.0.0",
        "data": data
    }))
    .expect("valid draft")
}

/// Draft for a link contract between two existing contracts.
pub fn link_draft(
    from: &autumndb::contract::Contract,
    verb: &str,
    to: &autumndb::contract::Contract,
    inverse: &str,
) -> autumndb::contract::ContractDraft {
    serde_json::from_value(json!({
        "slug": unique_slug("link"),
        "type": "link@1.0.0",
        "version": "1.0.0",
        "name": verb,
        "data": {
            "from": {"id": from.id, "type": from.contract_type},
            "to": {"id": to.id, "type": to.contract_type},
            "inverseName": inverse
        }
    }))
    .expect("valid link draft")
}
