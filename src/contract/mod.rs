//! Contract data model.
//!
//! A contract is the uniform document every row of the `contracts` table
//! stores: slug, semantic version, type, tags, markers, an opaque `data`
//! payload, and a `links` mapping that is materialized at query time and
//! never written back.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub mod versioned_slug;

pub use versioned_slug::{parse_versioned_slug, SlugParseError, VersionedSlug};

/// Hard cap on slug length, matching the `varchar(255)` column.
pub const SLUG_MAX_LENGTH: usize = 255;

lazy_static! {
    static ref SLUG_RE: Regex = Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").unwrap();
}

/// Validate a bare slug (no version suffix): lowercase-dashed, bounded length.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty() && slug.len() <= SLUG_MAX_LENGTH && SLUG_RE.is_match(slug)
}

/// A stored contract.
///
/// `links` and `linked_at` are derived projections: both are ignored on
/// insert and replace, and only ever populated by the query engine and the
/// link bookkeeping respectively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: Uuid,
    pub slug: String,
    #[serde(rename = "type")]
    pub contract_type: String,
    pub version: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub markers: Vec<String>,
    #[serde(default)]
    pub links: Map<String, Value>,
    #[serde(default)]
    pub requires: Vec<Value>,
    #[serde(default)]
    pub capabilities: Vec<Value>,
    #[serde(default = "empty_object")]
    pub data: Value,
    #[serde(default)]
    pub linked_at: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Contract {
    /// Render the five stored version components back into the textual
    /// `major.minor.patch[-prerelease][+build]` form.
    pub fn format_version(
        major: u32,
        minor: u32,
        patch: u32,
        prerelease: &str,
        build: &str,
    ) -> String {
        let mut out = format!("{}.{}.{}", major, minor, patch);
        if !prerelease.is_empty() {
            out.push('-');
            out.push_str(prerelease);
        }
        if !build.is_empty() {
            out.push('+');
            out.push_str(build);
        }
        out
    }

    /// `slug@version` form used by the generated `versioned_slug` column.
    pub fn versioned_slug(&self) -> String {
        format!("{}@{}", self.slug, self.version)
    }

    /// Whether this contract is a link contract (`type` of the shape
    /// `link@<version>`).
    pub fn is_link(&self) -> bool {
        type_base(&self.contract_type) == "link"
    }

    /// Decode the link endpoints of a link contract.
    pub fn link_endpoints(&self) -> Option<(LinkEndpoint, LinkEndpoint, String)> {
        let from = serde_json::from_value(self.data.get("from")?.clone()).ok()?;
        let to = serde_json::from_value(self.data.get("to")?.clone()).ok()?;
        let inverse = self.data.get("inverseName")?.as_str()?.to_string();
        Some((from, to, inverse))
    }
}

/// Input for inserting a new contract. Server-assigned fields (`id`,
/// `created_at`) are optional; `links` and `linked_at` are absent because
/// they are write-ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub slug: String,
    #[serde(rename = "type")]
    pub contract_type: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub markers: Vec<String>,
    #[serde(default)]
    pub requires: Vec<Value>,
    #[serde(default)]
    pub capabilities: Vec<Value>,
    #[serde(default = "empty_object")]
    pub data: Value,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_active() -> bool {
    true
}

/// One endpoint of a link contract, stored under `data.from` / `data.to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkEndpoint {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub contract_type: String,
}

/// Strip the `@version` suffix off a `slug@semver` type reference.
pub fn type_base(type_ref: &str) -> &str {
    match type_ref.split_once('@') {
        Some((base, _)) => base,
        None => type_ref,
    }
}
