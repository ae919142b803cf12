//! Projection behavior of the compiled payload column.

use autumndb::schema::{compile, QueryOptions};
use serde_json::{json, Value};

#[test]
fn test_empty_select_projects_whole_contract() {
    let sql = compile(
        &json!({"type": "object"}),
        &Value::Null,
        &QueryOptions::default(),
    )
    .unwrap();
    assert!(sql.contains("row_to_json(\"contracts\")::jsonb"));
    // The internal version split never leaks into payloads.
    assert!(sql.contains("- 'version_major'"));
    assert!(sql.contains("- 'versioned_slug'"));
    assert!(sql.contains("jsonb_build_object('version'"));
}

#[test]
fn test_select_tree_restricts_payload() {
    let sql = compile(
        &json!({"type": "object"}),
        &json!({"id": {}, "slug": {}}),
        &QueryOptions::default(),
    )
    .unwrap();
    assert!(sql.contains("jsonb_build_object('id', to_jsonb(\"contracts\".\"id\"), 'slug', to_jsonb(\"contracts\".\"slug\"))"));
    assert!(!sql.contains("row_to_json"));
}

#[test]
fn test_additional_properties_false_restricts_to_seen_keys() {
    let sql = compile(
        &json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {"slug": {"type": "string"}, "data": {"type": "object"}},
            "required": ["slug"]
        }),
        &Value::Null,
        &QueryOptions::default(),
    )
    .unwrap();
    assert!(sql.contains("jsonb_strip_nulls(jsonb_build_object("));
    assert!(sql.contains("'slug', to_jsonb(\"contracts\".\"slug\")"));
    assert!(sql.contains("'data', \"contracts\".\"data\""));
    // Unselected columns are simply absent.
    assert!(!sql.contains("'markers'"));
}

#[test]
fn test_link_payload_is_overlaid_on_projection() {
    let sql = compile(
        &json!({
            "type": "object",
            "$$links": {"has attached element": {"type": "object"}}
        }),
        &json!({"id": {}, "links": {"has attached element": {"id": {}, "data": {}}}}),
        &QueryOptions::default(),
    )
    .unwrap();
    // Root payload carries only the selected key plus the links overlay.
    assert!(sql.contains("jsonb_build_object('id', to_jsonb(\"contracts\".\"id\"))"));
    assert!(sql.contains("jsonb_build_object('links', jsonb_build_object('has attached element'"));
    // The sink projection honors the per-link select tree.
    assert!(sql.contains("to_jsonb(\"sink@/has attached element\".\"id\")"));
    assert!(sql.contains("'data', \"sink@/has attached element\".\"data\""));
}
