//! Projection tree: which fields of a contract the final payload carries.
//!
//! The tree mirrors `properties` and `$$links` verbs. A node remembers the
//! keys the schema or the caller's select tree touched, whether additional
//! properties are allowed, and one branch per `$$links` entry (several
//! branches for the same verb arise from `anyOf`).

use serde_json::Value;

use crate::schema::errors::CompileError;
use crate::schema::path::{column_type, version_expression, ColumnType};
use crate::sql::fragment::{quote_ident, quote_literal};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectMap {
    /// Keys seen via schema `properties` or `required`, in first-seen order.
    seen: Vec<(String, SelectMap)>,
    /// Keys explicitly requested by the caller's select tree.
    selected: Vec<String>,
    /// `additionalProperties`; `None` inherits the default (true).
    additional_properties: Option<bool>,
    /// Link branches, one per `$$links` compile. Branch order matches the
    /// link registration order.
    links: Vec<LinkBranch>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkBranch {
    pub verb: String,
    pub map: SelectMap,
    /// Set when the branch was compiled under `anyOf` and carries its own
    /// filter, so the payload merge must gate on edge participation.
    pub filtered: bool,
}

impl SelectMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from the caller's select tree: an object whose keys are
    /// fields to project, with a `links` entry holding per-verb subtrees.
    pub fn from_user_select(select: &Value) -> Result<Self, CompileError> {
        let mut map = SelectMap::new();
        map.apply_user_select(select)?;
        Ok(map)
    }

    fn apply_user_select(&mut self, select: &Value) -> Result<(), CompileError> {
        let object = match select {
            Value::Null => return Ok(()),
            Value::Object(object) => object,
            other => {
                return Err(CompileError::SchemaInvalid(format!(
                    "select must be an object, got {}",
                    other
                )))
            }
        };

        for (key, value) in object {
            if key == "links" {
                let verbs = value.as_object().ok_or_else(|| {
                    CompileError::SchemaInvalid("select.links must be an object".to_string())
                })?;
                for (verb, subtree) in verbs {
                    let mut branch_map = SelectMap::new();
                    branch_map.apply_user_select(subtree)?;
                    self.links.push(LinkBranch {
                        verb: verb.clone(),
                        map: branch_map,
                        filtered: false,
                    });
                }
                continue;
            }
            self.selected.push(key.clone());
            self.child(key).apply_user_select(value)?;
        }
        Ok(())
    }

    /// Mark a key seen and return its child node.
    pub fn child(&mut self, key: &str) -> &mut SelectMap {
        if let Some(position) = self.seen.iter().position(|(name, _)| name == key) {
            return &mut self.seen[position].1;
        }
        self.seen.push((key.to_string(), SelectMap::new()));
        &mut self.seen.last_mut().expect("just pushed").1
    }

    pub fn set_additional_properties(&mut self, allowed: bool) {
        self.additional_properties = Some(allowed);
    }

    pub fn additional_properties(&self) -> bool {
        self.additional_properties.unwrap_or(true)
    }

    pub fn add_link_branch(&mut self, verb: &str, map: SelectMap, filtered: bool) {
        self.links.push(LinkBranch {
            verb: verb.to_string(),
            map,
            filtered,
        });
    }

    pub fn link_branches(&self) -> &[LinkBranch] {
        &self.links
    }

    /// Find the user-provided select subtree for a verb, if any.
    pub fn user_link_select(&self, verb: &str) -> Option<&SelectMap> {
        self.links
            .iter()
            .find(|branch| branch.verb == verb)
            .map(|branch| &branch.map)
    }

    /// Merge `other` into this node; used to fold `anyOf` branches back into
    /// their parent projection.
    pub fn absorb(&mut self, other: SelectMap) {
        for (key, child) in other.seen {
            self.child(&key).absorb(child);
        }
        for key in other.selected {
            if !self.selected.contains(&key) {
                self.selected.push(key);
            }
        }
        if let Some(additional) = other.additional_properties {
            // The most restrictive branch wins: a single
            // additionalProperties=false makes extra keys unprojectable.
            let current = self.additional_properties.unwrap_or(true);
            self.additional_properties = Some(current && additional);
        }
        self.links.extend(other.links);
    }

    /// Whether the projection is the whole row.
    fn is_unrestricted(&self) -> bool {
        self.additional_properties() && self.selected.is_empty()
    }

    /// Keys the projection carries when restricted.
    fn projected_keys(&self) -> Vec<&str> {
        if !self.additional_properties() {
            let mut keys: Vec<&str> = self.seen.iter().map(|(name, _)| name.as_str()).collect();
            for key in &self.selected {
                if !keys.contains(&key.as_str()) {
                    keys.push(key);
                }
            }
            keys
        } else {
            self.selected.iter().map(String::as_str).collect()
        }
    }

    /// Render the payload expression for one contract row at `table_alias`.
    ///
    /// Link entries are not rendered here; the link expansion engine overlays
    /// them onto the payload with a jsonb concatenation.
    pub fn render_projection(&self, table_alias: &str) -> String {
        if self.is_unrestricted() {
            // The whole row, reshaped: the five stored version components
            // and the generated reference column fold into the logical
            // `version` field.
            return format!(
                "((row_to_json({alias})::jsonb - 'version_major' - 'version_minor' - \
                 'version_patch' - 'version_prerelease' - 'version_build' - 'versioned_slug') \
                 || jsonb_build_object('version', {version}))",
                alias = quote_ident(table_alias),
                version = version_expression(table_alias)
            );
        }

        let mut pairs: Vec<String> = Vec::new();
        for key in self.projected_keys() {
            pairs.push(quote_literal(key));
            pairs.push(self.render_field(table_alias, key));
        }
        format!("jsonb_strip_nulls(jsonb_build_object({}))", pairs.join(", "))
    }

    fn render_field(&self, table_alias: &str, key: &str) -> String {
        let alias = quote_ident(table_alias);
        let nested = self
            .seen
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, child)| child);

        match column_type(key) {
            Some(ColumnType::ComputedVersion) => {
                format!("to_jsonb({})", version_expression(table_alias))
            }
            Some(ColumnType::Jsonb) => {
                // A restricted subtree of a JSONB column projects only the
                // touched keys; anything else passes the column through.
                if let Some(child) = nested {
                    if !child.additional_properties() {
                        let mut segments = vec![key.to_string()];
                        return child.render_jsonb_subtree(table_alias, key, &mut segments);
                    }
                }
                format!("{}.{}", alias, quote_ident(key))
            }
            Some(_) => format!("to_jsonb({}.{})", alias, quote_ident(key)),
            None => "NULL".to_string(),
        }
    }

    fn render_jsonb_subtree(
        &self,
        table_alias: &str,
        column: &str,
        segments: &mut Vec<String>,
    ) -> String {
        let mut pairs: Vec<String> = Vec::new();
        for key in self.projected_keys() {
            pairs.push(quote_literal(key));
            segments.push(key.to_string());
            let child = self.seen.iter().find(|(name, _)| name == key);
            let rendered = match child {
                Some((_, child)) if !child.additional_properties() => {
                    child.render_jsonb_subtree(table_alias, column, segments)
                }
                _ => {
                    let keypath = segments[1..]
                        .iter()
                        .map(String::as_str)
                        .collect::<Vec<_>>()
                        .join(",");
                    format!(
                        "{}.{}#>{}",
                        quote_ident(table_alias),
                        quote_ident(column),
                        quote_literal(&format!("{{{}}}", keypath))
                    )
                }
            };
            segments.pop();
            pairs.push(rendered);
        }
        format!("jsonb_strip_nulls(jsonb_build_object({}))", pairs.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unrestricted_projection() {
        let map = SelectMap::new();
        let projection = map.render_projection("contracts");
        assert!(projection.starts_with("((row_to_json(\"contracts\")::jsonb"));
        assert!(projection.contains("- 'version_build'"));
        assert!(projection.contains("jsonb_build_object('version'"));
    }

    #[test]
    fn test_schema_seen_keys_do_not_restrict_by_themselves() {
        let mut map = SelectMap::new();
        map.child("slug");
        map.child("data");
        assert!(map
            .render_projection("contracts")
            .starts_with("((row_to_json(\"contracts\")::jsonb"));
    }

    #[test]
    fn test_additional_properties_false_restricts() {
        let mut map = SelectMap::new();
        map.child("slug");
        map.child("data");
        map.set_additional_properties(false);
        let projection = map.render_projection("contracts");
        assert!(projection.starts_with("jsonb_strip_nulls(jsonb_build_object("));
        assert!(projection.contains("'slug', to_jsonb(\"contracts\".\"slug\")"));
        assert!(projection.contains("'data', \"contracts\".\"data\""));
        assert!(!projection.contains("'id'"));
    }

    #[test]
    fn test_user_select_restricts() {
        let map = SelectMap::from_user_select(&json!({"id": {}, "slug": {}})).unwrap();
        let projection = map.render_projection("contracts");
        assert!(projection.contains("'id', to_jsonb(\"contracts\".\"id\")"));
        assert!(projection.contains("'slug'"));
        assert!(!projection.contains("'data'"));
    }

    #[test]
    fn test_user_select_link_branches() {
        let map =
            SelectMap::from_user_select(&json!({"links": {"has attached element": {"id": {}}}}))
                .unwrap();
        assert_eq!(map.link_branches().len(), 1);
        assert_eq!(map.link_branches()[0].verb, "has attached element");
        assert!(map
            .user_link_select("has attached element")
            .is_some());
    }

    #[test]
    fn test_version_projection_uses_computed_expression() {
        let mut map = SelectMap::new();
        map.child("version");
        map.set_additional_properties(false);
        let projection = map.render_projection("contracts");
        assert!(projection.contains("\"version_major\""));
    }

    #[test]
    fn test_rejects_non_object_select() {
        assert!(SelectMap::from_user_select(&json!("not-an-object")).is_err());
    }

    #[test]
    fn test_absorb_merges_branches() {
        let mut base = SelectMap::new();
        base.child("slug");
        let mut branch = SelectMap::new();
        branch.child("data");
        branch.set_additional_properties(false);
        base.absorb(branch);
        assert!(!base.additional_properties());
        let projection = base.render_projection("contracts");
        assert!(projection.contains("'slug'"));
        assert!(projection.contains("'data'"));
    }
}
