//! Query options: pagination, ordering, per-link overrides.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::errors::CompileError;

/// Hard cap on `limit`; requests above it are rejected rather than clamped.
pub const LIMIT_CAP: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Pagination and ordering for one expanded link verb.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LinkQueryOptions {
    #[serde(default)]
    pub skip: u32,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default, rename = "sortBy")]
    pub sort_by: Option<Vec<String>>,
    #[serde(default, rename = "sortDir")]
    pub sort_dir: SortDirection,
}

/// Options for one query compile.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub skip: u32,
    pub limit: u32,
    pub sort_by: Option<Vec<String>>,
    pub sort_dir: SortDirection,
    pub links: HashMap<String, LinkQueryOptions>,
    /// Extra SQL conjoined to the root WHERE. Internal: used by the stream
    /// matcher to restrict a compiled query to a single contract.
    pub extra_filter: Option<String>,
    pub profile: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: LIMIT_CAP,
            sort_by: None,
            sort_dir: SortDirection::Asc,
            links: HashMap::new(),
            extra_filter: None,
            profile: false,
        }
    }
}

impl QueryOptions {
    /// Parse options from their JSON wire form, validating `limit` and
    /// `skip` before anything is compiled.
    pub fn from_value(value: &Value) -> Result<Self, CompileError> {
        let mut options = QueryOptions::default();
        let object = match value {
            Value::Null => return Ok(options),
            Value::Object(object) => object,
            other => {
                return Err(CompileError::SchemaInvalid(format!(
                    "options must be an object, got {}",
                    other
                )))
            }
        };

        for (key, entry) in object {
            match key.as_str() {
                "skip" => {
                    options.skip = parse_bounded_number(entry, u32::MAX, "skip").map_err(|_| {
                        CompileError::SchemaInvalid(format!("invalid skip: {}", entry))
                    })?
                }
                "limit" => options.limit = parse_limit(entry)?,
                "sortBy" => options.sort_by = Some(parse_sort_by(entry)?),
                "sortDir" => {
                    options.sort_dir =
                        serde_json::from_value(entry.clone()).map_err(|_| {
                            CompileError::SchemaInvalid(format!("invalid sortDir: {}", entry))
                        })?
                }
                "links" => {
                    let verbs = entry.as_object().ok_or_else(|| {
                        CompileError::SchemaInvalid("options.links must be an object".to_string())
                    })?;
                    for (verb, link_entry) in verbs {
                        options
                            .links
                            .insert(verb.clone(), parse_link_options(link_entry)?);
                    }
                }
                "extraFilter" => {
                    options.extra_filter = entry.as_str().map(str::to_string);
                }
                "profile" => options.profile = entry.as_bool().unwrap_or(false),
                unknown => {
                    return Err(CompileError::SchemaInvalid(format!(
                        "unknown query option: {}",
                        unknown
                    )))
                }
            }
        }
        Ok(options)
    }
}

fn parse_link_options(value: &Value) -> Result<LinkQueryOptions, CompileError> {
    let mut link = LinkQueryOptions::default();
    let object = value.as_object().ok_or_else(|| {
        CompileError::SchemaInvalid("per-link options must be an object".to_string())
    })?;
    for (key, entry) in object {
        match key.as_str() {
            "skip" => {
                link.skip = parse_bounded_number(entry, u32::MAX, "skip").map_err(|_| {
                    CompileError::SchemaInvalid(format!("invalid skip: {}", entry))
                })?
            }
            "limit" => link.limit = Some(parse_limit(entry)?),
            "sortBy" => link.sort_by = Some(parse_sort_by(entry)?),
            "sortDir" => {
                link.sort_dir = serde_json::from_value(entry.clone()).map_err(|_| {
                    CompileError::SchemaInvalid(format!("invalid sortDir: {}", entry))
                })?
            }
            unknown => {
                return Err(CompileError::SchemaInvalid(format!(
                    "unknown link option: {}",
                    unknown
                )))
            }
        }
    }
    Ok(link)
}

fn parse_sort_by(value: &Value) -> Result<Vec<String>, CompileError> {
    match value {
        Value::String(field) => Ok(vec![field.clone()]),
        Value::Array(fields) => fields
            .iter()
            .map(|field| {
                field.as_str().map(str::to_string).ok_or_else(|| {
                    CompileError::SchemaInvalid(format!("invalid sortBy element: {}", field))
                })
            })
            .collect(),
        other => Err(CompileError::SchemaInvalid(format!(
            "invalid sortBy: {}",
            other
        ))),
    }
}

/// Validate `limit`: it must be a non-negative integer no larger than the
/// cap. Fractional, negative and non-finite numbers are rejected.
pub fn parse_limit(value: &Value) -> Result<u32, CompileError> {
    parse_bounded_number(value, LIMIT_CAP, "limit")
        .map_err(|_| CompileError::InvalidLimit(value.to_string()))
}

fn parse_bounded_number(value: &Value, cap: u32, field: &str) -> Result<u32, CompileError> {
    let number = value
        .as_f64()
        .ok_or_else(|| CompileError::InvalidLimit(format!("{} must be a number", field)))?;
    if !number.is_finite() || number.fract() != 0.0 || number < 0.0 || number > cap as f64 {
        return Err(CompileError::InvalidLimit(format!(
            "{} out of range: {}",
            field, number
        )));
    }
    Ok(number as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let options = QueryOptions::from_value(&Value::Null).unwrap();
        assert_eq!(options.skip, 0);
        assert_eq!(options.limit, LIMIT_CAP);
        assert_eq!(options.sort_dir, SortDirection::Asc);
    }

    #[test]
    fn test_limit_boundaries() {
        assert_eq!(parse_limit(&json!(0)).unwrap(), 0);
        assert_eq!(parse_limit(&json!(1000)).unwrap(), 1000);
        assert!(parse_limit(&json!(1001)).is_err());
        assert!(parse_limit(&json!(-1)).is_err());
        assert!(parse_limit(&json!(1.5)).is_err());
        assert!(parse_limit(&json!("10")).is_err());
        // JSON has no NaN/Infinity literals; they arrive as nulls.
        assert!(parse_limit(&Value::Null).is_err());
    }

    #[test]
    fn test_sort_by_forms() {
        let options = QueryOptions::from_value(&json!({"sortBy": "slug"})).unwrap();
        assert_eq!(options.sort_by, Some(vec!["slug".to_string()]));

        let options = QueryOptions::from_value(&json!({"sortBy": ["data", "test"]})).unwrap();
        assert_eq!(
            options.sort_by,
            Some(vec!["data".to_string(), "test".to_string()])
        );
    }

    #[test]
    fn test_link_options() {
        let options = QueryOptions::from_value(&json!({
            "links": {"has attached element": {"limit": 2, "sortDir": "desc"}}
        }))
        .unwrap();
        let link = &options.links["has attached element"];
        assert_eq!(link.limit, Some(2));
        assert_eq!(link.sort_dir, SortDirection::Desc);
    }

    #[test]
    fn test_unknown_option_rejected() {
        assert!(QueryOptions::from_value(&json!({"nope": 1})).is_err());
    }
}
