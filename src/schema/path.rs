//! Compile-time pointer into the logical contract document.
//!
//! A path starts at the table root, descends into a column at depth one, and
//! from depth two onward either addresses a JSON property (for JSONB-typed
//! columns) or an element of an array-typed column. The same path value knows
//! how to render itself as a plain column reference, a `#>`/`#>>` keypath
//! extraction, an array subscript, or the computed `version` expression.

use crate::sql::fragment::{quote_ident, quote_literal};

/// SQL type of a declared column of the `contracts` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Uuid,
    Text,
    Bool,
    Integer,
    TextArray,
    Jsonb,
    JsonbArray,
    Timestamp,
    /// The `version` field, computed from the five stored version columns.
    ComputedVersion,
}

impl ColumnType {
    pub fn is_jsonb(self) -> bool {
        matches!(self, ColumnType::Jsonb)
    }

    pub fn is_array(self) -> bool {
        matches!(self, ColumnType::TextArray | ColumnType::JsonbArray)
    }
}

/// Declared columns of the contracts table, in storage order.
const COLUMNS: &[(&str, ColumnType, bool)] = &[
    ("id", ColumnType::Uuid, false),
    ("slug", ColumnType::Text, false),
    ("type", ColumnType::Text, false),
    ("active", ColumnType::Bool, false),
    ("version_major", ColumnType::Integer, false),
    ("version_minor", ColumnType::Integer, false),
    ("version_patch", ColumnType::Integer, false),
    ("version_prerelease", ColumnType::Text, false),
    ("version_build", ColumnType::Text, false),
    ("version", ColumnType::ComputedVersion, false),
    ("name", ColumnType::Text, true),
    ("tags", ColumnType::TextArray, false),
    ("markers", ColumnType::TextArray, false),
    ("links", ColumnType::Jsonb, false),
    ("requires", ColumnType::JsonbArray, false),
    ("capabilities", ColumnType::JsonbArray, false),
    ("data", ColumnType::Jsonb, false),
    ("linked_at", ColumnType::Jsonb, false),
    ("created_at", ColumnType::Timestamp, false),
    ("updated_at", ColumnType::Timestamp, true),
];

/// Look up the type of a declared column, `None` for unknown names.
pub fn column_type(name: &str) -> Option<ColumnType> {
    COLUMNS
        .iter()
        .find(|(column, _, _)| *column == name)
        .map(|(_, column_type, _)| *column_type)
}

/// Whether a declared column may be NULL. Unknown names count as nullable so
/// existence checks stay in place for them.
pub fn column_is_nullable(name: &str) -> bool {
    COLUMNS
        .iter()
        .find(|(column, _, _)| *column == name)
        .map(|(_, _, nullable)| *nullable)
        .unwrap_or(true)
}

/// Logical document fields exposed to schemas and projections, i.e. all
/// columns except the internal five-way version split.
pub fn logical_fields() -> impl Iterator<Item = &'static str> {
    COLUMNS
        .iter()
        .map(|(name, _, _)| *name)
        .filter(|name| !name.starts_with("version_"))
}

/// The computed expression behind the logical `version` column.
pub fn version_expression(table_alias: &str) -> String {
    let alias = quote_ident(table_alias);
    format!(
        "({alias}.\"version_major\"::text || '.' || {alias}.\"version_minor\"::text || '.' || \
         {alias}.\"version_patch\"::text || \
         CASE WHEN {alias}.\"version_prerelease\" <> '' \
         THEN '-' || {alias}.\"version_prerelease\" ELSE '' END || \
         CASE WHEN {alias}.\"version_build\" <> '' \
         THEN '+' || {alias}.\"version_build\" ELSE '' END)",
        alias = alias
    )
}

/// One step below the table root.
#[derive(Debug, Clone, PartialEq)]
enum PathSegment {
    /// An object property name.
    Key(String),
    /// An array index, set through the tuple-items placeholder protocol.
    Index(String),
    /// Pushed before a tuple walk and overwritten per index.
    Placeholder,
}

impl PathSegment {
    fn as_str(&self) -> &str {
        match self {
            PathSegment::Key(key) => key,
            PathSegment::Index(index) => index,
            PathSegment::Placeholder => "",
        }
    }
}

/// Rendering options for a path.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathRender {
    /// Extract JSON keypaths as text (`#>>`) instead of jsonb (`#>`).
    pub as_text: bool,
    /// Wrap the rendered expression in `(…)::text`.
    pub force_cast: bool,
}

impl PathRender {
    pub fn jsonb() -> Self {
        Self::default()
    }

    pub fn text() -> Self {
        Self {
            as_text: true,
            force_cast: false,
        }
    }
}

/// A pointer into the document being compiled.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlPath {
    segments: Vec<PathSegment>,
    /// Set for paths rooted at an unnested array element rather than at the
    /// table: the parent path addressed the array.
    element_root: bool,
    /// Type of the array column an element root came from.
    element_type: Option<ColumnType>,
}

impl SqlPath {
    /// A path at the table root.
    pub fn table_root() -> Self {
        Self::default()
    }

    /// A path rooted at an element of the array `parent` addresses. The
    /// element itself is depth zero; further segments navigate into it as
    /// JSON properties.
    pub fn element_root(parent: &SqlPath) -> Self {
        Self {
            segments: Vec::new(),
            element_root: true,
            element_type: parent.root_column_type(),
        }
    }

    pub fn push(&mut self, segment: &str) {
        self.segments.push(PathSegment::Key(segment.to_string()));
    }

    /// Push a placeholder segment to be filled by `set_last`. Used by tuple
    /// `items` handling, which addresses one index at a time.
    pub fn push_placeholder(&mut self) {
        self.segments.push(PathSegment::Placeholder);
    }

    /// Overwrite the last segment with an index, without growing the path.
    pub fn set_last(&mut self, index: &str) {
        if let Some(last) = self.segments.last_mut() {
            *last = PathSegment::Index(index.to_string());
        }
    }

    pub fn pop(&mut self) {
        self.segments.pop();
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn is_table(&self) -> bool {
        !self.element_root && self.segments.is_empty()
    }

    pub fn is_column(&self) -> bool {
        !self.element_root && self.segments.len() == 1
    }

    /// True for keypaths into a JSONB column, and for any descent into an
    /// array element (the element is addressed as JSON).
    pub fn is_json_property(&self) -> bool {
        if self.element_root {
            return !self.segments.is_empty()
                || matches!(
                    self.element_type,
                    Some(ColumnType::JsonbArray) | Some(ColumnType::Jsonb)
                );
        }
        self.segments.len() >= 2
            && self
                .root_column_type()
                .map(|column_type| column_type.is_jsonb())
                .unwrap_or(false)
    }

    /// True for the element of an array-typed column.
    pub fn is_sub_column(&self) -> bool {
        self.element_root && self.segments.is_empty()
    }

    /// Whether every segment below the column is an object key; array
    /// indices and placeholders rule out keypath-shaped rewrites such as
    /// containment.
    pub fn is_key_addressed(&self) -> bool {
        let skip = usize::from(!self.element_root);
        self.segments
            .iter()
            .skip(skip)
            .all(|segment| matches!(segment, PathSegment::Key(_)))
    }

    /// First segment, i.e. the column the path descends through.
    pub fn column_name(&self) -> Option<&str> {
        if self.element_root {
            return None;
        }
        self.segments.first().map(PathSegment::as_str)
    }

    /// Type of the column this path is rooted in, or of the array column an
    /// element root came from.
    pub fn root_column_type(&self) -> Option<ColumnType> {
        if self.element_root {
            return self.element_type;
        }
        self.column_name().and_then(column_type)
    }

    /// JSON keypath below the column, as owned segments.
    pub fn json_segments(&self) -> Vec<String> {
        self.json_keypath()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// JSON keypath below the column, for `#>` extraction.
    fn json_keypath(&self) -> Vec<&str> {
        let skip = usize::from(!self.element_root);
        self.segments
            .iter()
            .skip(skip)
            .map(PathSegment::as_str)
            .collect()
    }

    /// Render this path as a SQL expression against `table_alias`.
    pub fn render(&self, table_alias: &str, options: PathRender) -> String {
        let rendered = self.render_raw(table_alias, options.as_text);
        if options.force_cast {
            format!("({})::text", rendered)
        } else {
            rendered
        }
    }

    fn render_raw(&self, table_alias: &str, as_text: bool) -> String {
        let alias = quote_ident(table_alias);

        if self.element_root {
            // The element alias doubles as its column name for set-returning
            // functions aliased without a column list.
            let element = format!("{alias}.{alias}", alias = alias);
            if self.segments.is_empty() {
                return element;
            }
            let operator = if as_text { "#>>" } else { "#>" };
            return format!(
                "{}{}{}",
                element,
                operator,
                json_path_literal(&self.json_keypath())
            );
        }

        match self.segments.len() {
            0 => alias,
            1 => {
                let column = self.segments[0].as_str();
                if column == "version" {
                    version_expression(table_alias)
                } else {
                    format!("{}.{}", alias, quote_ident(column))
                }
            }
            2 if self
                .root_column_type()
                .map(ColumnType::is_array)
                .unwrap_or(false) =>
            {
                // Element of a real SQL array: one-based subscript.
                let column = self.segments[0].as_str();
                let index: u64 = self.segments[1].as_str().parse().unwrap_or(0);
                format!("({}.{})[{}]", alias, quote_ident(column), index + 1)
            }
            _ => {
                let column = self.segments[0].as_str();
                let operator = if as_text { "#>>" } else { "#>" };
                format!(
                    "{}.{}{}{}",
                    alias,
                    quote_ident(column),
                    operator,
                    json_path_literal(&self.json_keypath())
                )
            }
        }
    }
}

/// Build the quoted `'{a,b,…}'` keypath literal for `#>` extraction.
fn json_path_literal(segments: &[&str]) -> String {
    let body = segments
        .iter()
        .map(|segment| {
            if segment.contains(',')
                || segment.contains('"')
                || segment.contains('{')
                || segment.contains('}')
                || segment.contains(' ')
            {
                format!("\"{}\"", segment.replace('\\', "\\\\").replace('"', "\\\""))
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",");
    quote_literal(&format!("{{{}}}", body))
}
