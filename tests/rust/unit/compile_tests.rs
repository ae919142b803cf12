//! End-to-end compiles: JSON Schema in, SQL text out.

use autumndb::schema::{compile, CompileError, QueryOptions};
use serde_json::{json, Value};

fn compile_default(schema: Value) -> String {
    compile(&schema, &Value::Null, &QueryOptions::default()).unwrap()
}

#[test]
fn test_type_constant_filter() {
    let sql = compile_default(json!({
        "type": "object",
        "properties": {"type": {"const": "card@1.0.0"}},
        "required": ["type"]
    }));
    assert!(sql.contains("WHERE (\"contracts\".\"type\" = 'card@1.0.0')"));
    assert!(sql.contains("AS \"payload\""));
    assert!(sql.contains("LIMIT 1000"));
}

#[test]
fn test_compile_is_deterministic() {
    let schema = json!({
        "type": "object",
        "properties": {
            "active": {"const": true},
            "data": {
                "type": "object",
                "properties": {"count": {"type": "number", "minimum": 3}}
            }
        },
        "required": ["active", "data"],
        "$$links": {"is attached to": {"type": "object"}}
    });
    let options = QueryOptions::default();
    let first = compile(&schema, &Value::Null, &options).unwrap();
    let second = compile(&schema, &Value::Null, &options).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_sort_by_path_and_limit() {
    let schema = json!({
        "type": "object",
        "properties": {"type": {"const": "card@1.0.0"}},
        "required": ["type"]
    });
    let options = QueryOptions::from_value(&json!({
        "sortBy": ["data", "test"],
        "limit": 1
    }))
    .unwrap();
    let sql = compile(&schema, &Value::Null, &options).unwrap();
    assert!(sql.contains("ORDER BY \"contracts\".\"data\"#>'{test}' ASC NULLS LAST"));
    assert!(sql.ends_with("LIMIT 1"));
}

#[test]
fn test_sort_by_version_expands_to_components() {
    let options = QueryOptions::from_value(&json!({"sortBy": "version", "sortDir": "desc"})).unwrap();
    let sql = compile(&json!({"type": "object"}), &Value::Null, &options).unwrap();
    assert!(sql.contains("\"contracts\".\"version_major\" DESC"));
    assert!(sql.contains("(\"contracts\".\"version_prerelease\" = '') DESC"));
    assert!(sql.contains("\"contracts\".\"version_build\" DESC"));
}

#[test]
fn test_sort_by_version_ranks_prereleases_below_releases_in_any_direction() {
    // The release/pre-release relationship is fixed: the boolean tie-break
    // stays DESC (releases first) even when the requested order is
    // ascending or left at its default.
    for options_value in [json!({"sortBy": "version"}), json!({"sortBy": "version", "sortDir": "asc"})] {
        let options = QueryOptions::from_value(&options_value).unwrap();
        let sql = compile(&json!({"type": "object"}), &Value::Null, &options).unwrap();
        assert!(sql.contains("\"contracts\".\"version_major\" ASC"));
        assert!(sql.contains("(\"contracts\".\"version_prerelease\" = '') DESC"));
        assert!(sql.contains("\"contracts\".\"version_build\" ASC"));
    }
}

#[test]
fn test_json_property_containment() {
    let sql = compile_default(json!({
        "type": "object",
        "properties": {
            "data": {
                "type": "object",
                "properties": {"test": {"const": 2}},
                "required": ["test"]
            }
        },
        "required": ["data"]
    }));
    assert!(sql.contains("\"contracts\".\"data\" @> '{\"test\":2}'::jsonb"));
}

#[test]
fn test_numeric_bound_is_type_gated() {
    let sql = compile_default(json!({
        "type": "object",
        "properties": {
            "data": {
                "type": "object",
                "properties": {"count": {"minimum": 3}}
            }
        }
    }));
    assert!(sql.contains("jsonb_typeof(\"contracts\".\"data\"#>'{count}') = 'number'"));
    assert!(sql.contains("(\"contracts\".\"data\"#>>'{count}')::numeric >= 3"));
}

#[test]
fn test_unsatisfiable_type_intersection() {
    // A slug can only be a string; requiring a number can never match.
    let sql = compile_default(json!({
        "type": "object",
        "properties": {"slug": {"type": "number"}},
        "required": ["slug"]
    }));
    assert!(sql.contains("WHERE (false)"));
}

#[test]
fn test_any_of_disjunction() {
    let sql = compile_default(json!({
        "type": "object",
        "anyOf": [
            {"properties": {"slug": {"const": "a"}}},
            {"properties": {"slug": {"const": "b"}}}
        ]
    }));
    assert!(sql.contains("(\"contracts\".\"slug\" = 'a' OR \"contracts\".\"slug\" = 'b')"));
}

#[test]
fn test_not_negates() {
    let sql = compile_default(json!({
        "type": "object",
        "not": {"properties": {"slug": {"const": "a"}}}
    }));
    assert!(sql.contains("NOT (\"contracts\".\"slug\" = 'a')"));
}

#[test]
fn test_full_text_search_is_string_gated() {
    let sql = compile_default(json!({
        "type": "object",
        "properties": {
            "data": {
                "type": "object",
                "properties": {"body": {"fullTextSearch": {"term": "hello"}}}
            }
        }
    }));
    assert!(sql.contains("to_tsvector('english'"));
    assert!(sql.contains("plainto_tsquery('english', 'hello')"));
    assert!(sql.contains("jsonb_typeof"));
}

#[test]
fn test_contains_full_text_search_over_string_array() {
    let sql = compile_default(json!({
        "type": "object",
        "properties": {
            "tags": {"contains": {"fullTextSearch": {"term": "urgent"}}}
        }
    }));
    assert!(sql.contains("immutable_array_to_string(\"contracts\".\"tags\", ' ')"));
}

#[test]
fn test_tuple_items_use_plain_equality_not_containment() {
    let sql = compile_default(json!({
        "type": "object",
        "properties": {
            "data": {
                "type": "object",
                "properties": {"xs": {"items": [{"const": 1}]}}
            }
        }
    }));
    assert!(sql.contains("\"contracts\".\"data\"#>'{xs,0}' = '1'::jsonb"));
    assert!(sql.contains("jsonb_array_length(\"contracts\".\"data\"#>'{xs}') > 0"));
    assert!(!sql.contains("@> '{\"xs\":{\"0\":1}}'"));
}

#[test]
fn test_uniform_items_reject_violating_elements() {
    let sql = compile_default(json!({
        "type": "object",
        "properties": {
            "data": {
                "type": "object",
                "properties": {"xs": {"items": {"type": "string"}}}
            }
        }
    }));
    assert!(sql.contains("NOT (EXISTS (SELECT 1 FROM jsonb_array_elements("));
}

#[test]
fn test_links_produce_fenced_statement() {
    let options = QueryOptions::from_value(&json!({"limit": 1})).unwrap();
    let sql = compile(
        &json!({
            "type": "object",
            "$$links": {"has attached element": {"type": "object"}}
        }),
        &Value::Null,
        &options,
    )
    .unwrap();

    assert!(sql.starts_with("WITH \"roots\" AS (SELECT"));
    assert!(sql.contains("\"fence\" AS MATERIALIZED ("));
    assert!(sql.contains("LEFT JOIN \"links2\" AS \"links@/has attached element\""));
    assert!(sql.contains("LEFT JOIN \"contracts\" AS \"join@/has attached element\""));
    assert!(sql.contains("(SELECT \"id\" FROM \"strings\" WHERE \"string\" = 'has attached element')"));
    assert!(sql.contains("::card_and_link_edges"));
    assert!(sql.contains("::link_edge"));
    assert!(sql.contains("row_number() OVER"));
    assert!(sql.contains("jsonb_agg(\"linked\".\"payload\" ORDER BY \"linked\".\"pos\")"));
    assert!(sql.contains("coalesce(\"agg@/has attached element\".\"payload\", '[]'::jsonb)"));
    // Root pagination happens after rollup; the inner stage widens to
    // skip+limit and the outer stage applies the real limit.
    assert!(sql.contains("GROUP BY \"contracts\".\"id\""));
    assert!(sql.ends_with("LIMIT 1"));
}

#[test]
fn test_nested_links_hoist_inner_filter() {
    let sql = compile_default(json!({
        "type": "object",
        "$$links": {
            "has attached element": {
                "type": "object",
                "properties": {"active": {"const": true}},
                "required": ["active"],
                "$$links": {"is owned by": {"type": "object"}}
            }
        }
    }));
    // The outer link's own filter is lifted into the root WHERE, and its
    // join keeps a vacuous condition.
    assert!(sql.contains("ON \"links@/has attached element\".\"toId\" = \"join@/has attached element\".\"id\" AND (true)"));
    assert!(sql.contains("\"links@/has attached element/is owned by\""));
    assert!(sql.contains("\"join@/has attached element\".\"active\" = true"));
}

#[test]
fn test_per_link_options_paginate_the_lateral() {
    let options = QueryOptions::from_value(&json!({
        "links": {"has attached element": {"limit": 2, "skip": 1, "sortDir": "desc"}}
    }))
    .unwrap();
    let sql = compile(
        &json!({"type": "object", "$$links": {"has attached element": {"type": "object"}}}),
        &Value::Null,
        &options,
    )
    .unwrap();
    assert!(sql.contains("\"linked\".\"pos\" > 1"));
    assert!(sql.contains("\"linked\".\"pos\" <= 3"));
    assert!(sql.contains("\"sink@/has attached element\".\"created_at\" DESC"));
}

#[test]
fn test_deeply_nested_schema_compiles() {
    // Alternating object/property nesting, comfortably past any realistic
    // document depth.
    let mut schema = json!({"const": 1});
    for level in 0..80 {
        let mut properties = serde_json::Map::new();
        properties.insert(format!("level{}", level % 7), schema);
        let mut node = serde_json::Map::new();
        node.insert("type".to_string(), json!("object"));
        node.insert("properties".to_string(), Value::Object(properties));
        schema = Value::Object(node);
    }
    let schema = json!({
        "type": "object",
        "properties": {"data": schema}
    });
    assert!(compile(&schema, &Value::Null, &QueryOptions::default()).is_ok());
}

#[test]
fn test_empty_enum_is_schema_invalid() {
    let result = compile(
        &json!({
            "type": "object",
            "properties": {"slug": {"enum": []}},
            "required": ["slug"]
        }),
        &Value::Null,
        &QueryOptions::default(),
    );
    assert!(matches!(result, Err(CompileError::SchemaInvalid(_))));
}

#[test]
fn test_unknown_keyword_is_rejected() {
    let result = compile(
        &json!({"type": "object", "patternProperties": {}}),
        &Value::Null,
        &QueryOptions::default(),
    );
    assert!(matches!(result, Err(CompileError::UnknownKeyword(_))));
}

#[test]
fn test_unknown_format_is_rejected() {
    let result = compile(
        &json!({
            "type": "object",
            "properties": {"data": {"properties": {"x": {"format": "ipv4"}}}}
        }),
        &Value::Null,
        &QueryOptions::default(),
    );
    assert!(matches!(result, Err(CompileError::UnknownFormat(_))));
}

#[test]
fn test_format_comparison_requires_format() {
    let result = compile(
        &json!({
            "type": "object",
            "properties": {"data": {"properties": {"x": {"formatMinimum": "2024-01-01"}}}}
        }),
        &Value::Null,
        &QueryOptions::default(),
    );
    assert!(matches!(
        result,
        Err(CompileError::FormatComparisonWithoutFormat)
    ));
}

#[test]
fn test_format_comparison_casts_both_sides() {
    let sql = compile_default(json!({
        "type": "object",
        "properties": {
            "data": {
                "type": "object",
                "properties": {
                    "when": {"format": "date-time", "formatMinimum": "2024-01-01T00:00:00Z"}
                }
            }
        }
    }));
    assert!(sql.contains("(\"contracts\".\"data\"#>>'{when}')::timestamp >= '2024-01-01T00:00:00Z'::timestamp"));
}

#[test]
fn test_invalid_pattern_is_rejected_before_sql() {
    let result = compile(
        &json!({
            "type": "object",
            "properties": {"slug": {"pattern": "("}}
        }),
        &Value::Null,
        &QueryOptions::default(),
    );
    assert!(matches!(result, Err(CompileError::InvalidRegex { .. })));
}

#[test]
fn test_regexp_object_with_case_flag() {
    let sql = compile_default(json!({
        "type": "object",
        "properties": {"slug": {"regexp": {"pattern": "^user-", "flags": "i"}}}
    }));
    assert!(sql.contains("\"contracts\".\"slug\" ~* '^user-'"));
}

#[test]
fn test_limit_validation() {
    assert!(QueryOptions::from_value(&json!({"limit": 0})).is_ok());
    assert!(QueryOptions::from_value(&json!({"limit": 1000})).is_ok());
    for bad in [json!(-1), json!(2.5), json!(1001), Value::Null, json!("10")] {
        let result = QueryOptions::from_value(&json!({ "limit": bad }));
        assert!(
            matches!(result, Err(CompileError::InvalidLimit(_))),
            "expected invalid limit"
        );
    }
}

#[test]
fn test_unknown_top_level_property_is_rejected() {
    let result = compile(
        &json!({"type": "object", "properties": {"nonsense": {"const": 1}}}),
        &Value::Null,
        &QueryOptions::default(),
    );
    assert!(matches!(result, Err(CompileError::SchemaInvalid(_))));
}

#[test]
fn test_extra_filter_is_conjoined() {
    let mut options = QueryOptions::default();
    options.extra_filter = Some("\"contracts\".\"id\" = '00000000-0000-0000-0000-000000000001'::uuid".to_string());
    let sql = compile(
        &json!({"type": "object", "properties": {"active": {"const": true}}, "required": ["active"]}),
        &Value::Null,
        &options,
    )
    .unwrap();
    assert!(sql.contains("AND (\"contracts\".\"id\" = '00000000-0000-0000-0000-000000000001'::uuid)"));
}

#[test]
fn test_optional_property_allows_absence() {
    let sql = compile_default(json!({
        "type": "object",
        "properties": {
            "data": {
                "type": "object",
                "properties": {"maybe": {"const": "x"}}
            }
        }
    }));
    assert!(sql.contains("\"contracts\".\"data\"#>'{maybe}' IS NULL OR "));
}

#[test]
fn test_all_of_conjoins() {
    let sql = compile_default(json!({
        "type": "object",
        "allOf": [
            {"properties": {"active": {"const": true}}, "required": ["active"]},
            {"properties": {"slug": {"const": "c1"}}, "required": ["slug"]}
        ]
    }));
    assert!(sql.contains("\"contracts\".\"active\" = true AND \"contracts\".\"slug\" = 'c1'"));
}

#[test]
fn test_min_items_on_array_column() {
    let sql = compile_default(json!({
        "type": "object",
        "properties": {"tags": {"minItems": 1}},
        "required": ["tags"]
    }));
    assert!(sql.contains("coalesce(array_length(\"contracts\".\"tags\", 1), 0) >= 1"));
}

#[test]
fn test_required_nullable_column_gets_existence_check() {
    // `name` is the one nullable text column; requiring it without further
    // constraints becomes a NOT NULL test.
    let sql = compile_default(json!({
        "type": "object",
        "required": ["name"]
    }));
    assert!(sql.contains("\"contracts\".\"name\" IS NOT NULL"));
}

#[test]
fn test_required_non_nullable_column_skips_existence_check() {
    let sql = compile_default(json!({
        "type": "object",
        "required": ["slug"]
    }));
    assert!(!sql.contains("\"slug\" IS NOT NULL"));
}

#[test]
fn test_string_bounds_on_json_property() {
    let sql = compile_default(json!({
        "type": "object",
        "properties": {
            "data": {
                "type": "object",
                "properties": {"title": {"type": "string", "minLength": 1, "maxLength": 80}}
            }
        }
    }));
    assert!(sql.contains("char_length(\"contracts\".\"data\"#>>'{title}') >= 1"));
    assert!(sql.contains("char_length(\"contracts\".\"data\"#>>'{title}') <= 80"));
}

#[test]
fn test_integer_type_adds_divisibility_gate() {
    let sql = compile_default(json!({
        "type": "object",
        "properties": {
            "data": {
                "type": "object",
                "properties": {"count": {"type": "integer"}}
            }
        }
    }));
    assert!(sql.contains("mod((\"contracts\".\"data\"#>>'{count}')::numeric, 1) = 0"));
}

#[test]
fn test_min_properties_counts_object_keys() {
    let sql = compile_default(json!({
        "type": "object",
        "properties": {
            "data": {"type": "object", "minProperties": 2}
        }
    }));
    assert!(sql.contains("(SELECT count(*) FROM jsonb_object_keys(\"contracts\".\"data\")) >= 2"));
}
