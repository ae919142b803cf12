//! Recursive JSON-Schema visitor.
//!
//! Walks a schema object, maintaining a path into the document and a
//! projection node, and produces a boolean filter expression. Only the
//! keyword subset below is accepted; anything else aborts the compile.
//!
//! Keyword handling keeps two invariants: a constraint on a value that can
//! hold several JSON types is guarded by a type gate (`type ⇒ filter`), and
//! object properties go through the existence policy in `finalize` so
//! required/optional semantics hold even when the property's own filter says
//! nothing about presence.

use serde_json::{Map, Value};

use crate::schema::errors::CompileError;
use crate::schema::expression::ExpressionFilter;
use crate::schema::filter::{JsonType, SqlCast, SqlFilter, ValueOp};
use crate::schema::formats::KnownFormat;
use crate::schema::options::QueryOptions;
use crate::schema::path::{column_is_nullable, column_type, ColumnType, SqlPath};
use crate::schema::select_map::SelectMap;

/// Keywords the compiler understands. `title` and `description` are
/// accepted as inert metadata.
const KNOWN_KEYWORDS: &[&str] = &[
    "type",
    "required",
    "properties",
    "additionalProperties",
    "enum",
    "const",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "minLength",
    "maxLength",
    "minItems",
    "maxItems",
    "minProperties",
    "maxProperties",
    "multipleOf",
    "pattern",
    "format",
    "formatMinimum",
    "formatMaximum",
    "regexp",
    "fullTextSearch",
    "items",
    "contains",
    "not",
    "allOf",
    "anyOf",
    "$$links",
    "title",
    "description",
];

/// A set of JSON types, tracked per path while compiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeSet(u8);

impl TypeSet {
    const OBJECT: u8 = 1;
    const ARRAY: u8 = 1 << 1;
    const STRING: u8 = 1 << 2;
    const NUMBER: u8 = 1 << 3;
    const INTEGER: u8 = 1 << 4;
    const BOOLEAN: u8 = 1 << 5;
    const NULL: u8 = 1 << 6;

    pub fn all() -> Self {
        TypeSet(0x7f)
    }

    pub fn empty() -> Self {
        TypeSet(0)
    }

    fn of(bits: u8) -> Self {
        TypeSet(bits)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn intersect(self, other: TypeSet) -> TypeSet {
        TypeSet(self.0 & other.0)
    }

    pub fn subset_of(self, other: TypeSet) -> bool {
        self.0 & !other.0 == 0
    }

    fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    /// Parse a `type` keyword value. `number` admits integers too.
    fn from_keyword(keyword: &str) -> Result<TypeSet, CompileError> {
        match keyword {
            "object" => Ok(TypeSet::of(TypeSet::OBJECT)),
            "array" => Ok(TypeSet::of(TypeSet::ARRAY)),
            "string" => Ok(TypeSet::of(TypeSet::STRING)),
            "number" => Ok(TypeSet::of(TypeSet::NUMBER | TypeSet::INTEGER)),
            "integer" => Ok(TypeSet::of(TypeSet::INTEGER)),
            "boolean" => Ok(TypeSet::of(TypeSet::BOOLEAN)),
            "null" => Ok(TypeSet::of(TypeSet::NULL)),
            other => Err(CompileError::SchemaInvalid(format!(
                "unknown type: {}",
                other
            ))),
        }
    }

    /// The `jsonb_typeof`-visible types in this set.
    fn to_json_types(self) -> Vec<JsonType> {
        let mut types = Vec::new();
        if self.contains(TypeSet::OBJECT) {
            types.push(JsonType::Object);
        }
        if self.contains(TypeSet::ARRAY) {
            types.push(JsonType::Array);
        }
        if self.contains(TypeSet::STRING) {
            types.push(JsonType::String);
        }
        if self.contains(TypeSet::NUMBER) || self.contains(TypeSet::INTEGER) {
            types.push(JsonType::Number);
        }
        if self.contains(TypeSet::BOOLEAN) {
            types.push(JsonType::Boolean);
        }
        if self.contains(TypeSet::NULL) {
            types.push(JsonType::Null);
        }
        types
    }
}

fn gate_object() -> TypeSet {
    TypeSet::of(TypeSet::OBJECT)
}

fn gate_array() -> TypeSet {
    TypeSet::of(TypeSet::ARRAY)
}

fn gate_string() -> TypeSet {
    TypeSet::of(TypeSet::STRING)
}

fn gate_number() -> TypeSet {
    TypeSet::of(TypeSet::NUMBER | TypeSet::INTEGER)
}

/// JSON types a freshly-pushed path can hold before any keyword narrows it.
fn path_possible_types(path: &SqlPath) -> TypeSet {
    if path.is_table() {
        return TypeSet::of(TypeSet::OBJECT);
    }
    if path.is_column() {
        let column = path.column_name().unwrap_or("");
        let mut bits = match column_type(column) {
            Some(ColumnType::Uuid)
            | Some(ColumnType::Text)
            | Some(ColumnType::Timestamp)
            | Some(ColumnType::ComputedVersion) => TypeSet::STRING,
            Some(ColumnType::Bool) => TypeSet::BOOLEAN,
            Some(ColumnType::Integer) => TypeSet::INTEGER,
            Some(ColumnType::TextArray) | Some(ColumnType::JsonbArray) => TypeSet::ARRAY,
            Some(ColumnType::Jsonb) => TypeSet::OBJECT,
            None => return TypeSet::all(),
        };
        if column_is_nullable(column) {
            bits |= TypeSet::NULL;
        }
        return TypeSet::of(bits);
    }
    if path.is_sub_column() {
        return match path.root_column_type() {
            Some(ColumnType::TextArray) => TypeSet::of(TypeSet::STRING),
            _ => TypeSet::all(),
        };
    }
    TypeSet::all()
}

fn value_json_type(value: &Value) -> u8 {
    match value {
        Value::Object(_) => TypeSet::OBJECT,
        Value::Array(_) => TypeSet::ARRAY,
        Value::String(_) => TypeSet::STRING,
        Value::Number(number) => {
            if number.is_i64() || number.is_u64() {
                TypeSet::INTEGER
            } else {
                TypeSet::NUMBER
            }
        }
        Value::Bool(_) => TypeSet::BOOLEAN,
        Value::Null => TypeSet::NULL,
    }
}

/// Result of compiling one schema node.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub filter: ExpressionFilter,
    /// Whether satisfying the filter already requires the value to exist,
    /// making an explicit existence check redundant.
    pub implies_exists: bool,
    pub types: TypeSet,
    pub format: Option<KnownFormat>,
}

impl Compiled {
    fn satisfied(types: TypeSet) -> Self {
        Compiled {
            filter: ExpressionFilter::constant(true),
            implies_exists: false,
            types,
            format: None,
        }
    }
}

/// Compile one schema node at `path`, collecting projection information
/// into `select`. `in_branch` is set inside `anyOf` alternatives so links
/// registered there gate their payload on edge participation.
pub fn compile_node(
    path: &mut SqlPath,
    select: &mut SelectMap,
    schema: &Value,
    options: &QueryOptions,
    in_branch: bool,
) -> Result<Compiled, CompileError> {
    let possible = path_possible_types(path);

    let object = match schema {
        Value::Bool(true) => return Ok(Compiled::satisfied(possible)),
        Value::Bool(false) => {
            let mut compiled = Compiled::satisfied(possible);
            compiled.filter = compiled.filter.make_unsatisfiable();
            return Ok(compiled);
        }
        Value::Object(object) => object,
        other => {
            return Err(CompileError::SchemaInvalid(format!(
                "schema must be an object or boolean, got {}",
                other
            )))
        }
    };

    for keyword in object.keys() {
        if !KNOWN_KEYWORDS.contains(&keyword.as_str()) {
            return Err(CompileError::UnknownKeyword(keyword.clone()));
        }
    }

    let mut types = possible;
    let mut filter = ExpressionFilter::constant(true);
    let mut implies_exists = false;
    let mut format = None;

    // `type` first: it narrows the set every later gate consults.
    if let Some(type_value) = object.get("type") {
        let mut requested = TypeSet::empty();
        match type_value {
            Value::String(keyword) => requested = TypeSet::from_keyword(keyword)?,
            Value::Array(keywords) => {
                for keyword in keywords {
                    let keyword = keyword.as_str().ok_or_else(|| {
                        CompileError::SchemaInvalid(format!("invalid type entry: {}", keyword))
                    })?;
                    requested = TypeSet::of(requested.0 | TypeSet::from_keyword(keyword)?.0);
                }
            }
            other => {
                return Err(CompileError::SchemaInvalid(format!(
                    "invalid type keyword: {}",
                    other
                )))
            }
        }

        types = types.intersect(requested);
        if types.is_empty() {
            filter = filter.make_unsatisfiable();
        } else if path.is_json_property() && !possible.subset_of(requested) {
            filter = filter.and(SqlFilter::IsOfJsonTypes {
                path: path.clone(),
                types: types.to_json_types(),
            });
            // JSON has no integer type; an integer requirement also checks
            // divisibility.
            if types.contains(TypeSet::INTEGER) && !types.contains(TypeSet::NUMBER) {
                filter = filter.and(SqlFilter::MultipleOf {
                    path: path.clone(),
                    multiple: Value::from(1),
                });
            }
            implies_exists = true;
        }
    }

    if let Some(format_value) = object.get("format") {
        let keyword = format_value.as_str().ok_or_else(|| {
            CompileError::SchemaInvalid(format!("invalid format: {}", format_value))
        })?;
        let known = KnownFormat::from_keyword(keyword)
            .ok_or_else(|| CompileError::UnknownFormat(keyword.to_string()))?;
        format = Some(known);
        if let Some(regex) = known.sql_regex() {
            let gate = if_type_then(
                SqlFilter::MatchesRegex {
                    path: path.clone(),
                    pattern: regex.to_string(),
                    ignore_case: false,
                },
                gate_string(),
                path,
                types,
            );
            filter = filter.and(gate.into_filter());
        }
    }

    // const / enum.
    let constants: Option<Vec<Value>> = match (object.get("const"), object.get("enum")) {
        (Some(constant), None) => Some(vec![constant.clone()]),
        (None, Some(Value::Array(values))) => {
            if values.is_empty() {
                return Err(CompileError::SchemaInvalid("empty enum".to_string()));
            }
            Some(values.clone())
        }
        (None, Some(other)) => {
            return Err(CompileError::SchemaInvalid(format!(
                "invalid enum: {}",
                other
            )))
        }
        (Some(_), Some(_)) => {
            return Err(CompileError::SchemaInvalid(
                "const and enum are mutually exclusive".to_string(),
            ))
        }
        (None, None) => None,
    };

    if let Some(values) = constants {
        let matchable: Vec<Value> = values
            .iter()
            .filter(|value| types.contains(value_json_type(value)))
            .cloned()
            .collect();
        if matchable.is_empty() {
            filter = filter.make_unsatisfiable();
        } else {
            // With nothing but a constant (and possibly a type) at a JSON
            // property, containment is equivalent and hits the GIN index.
            // Index-addressed paths (tuple items) stay on plain equality.
            let containment = path.is_json_property()
                && path.is_key_addressed()
                && matchable.len() == 1
                && object.keys().all(|keyword| {
                    matches!(keyword.as_str(), "const" | "type" | "title" | "description")
                });
            filter = filter.and(SqlFilter::Equals {
                path: path.clone(),
                values: matchable,
                containment,
            });
            implies_exists = true;
        }
    }

    // Numeric bounds.
    for (keyword, op) in [
        ("minimum", ValueOp::Ge),
        ("maximum", ValueOp::Le),
        ("exclusiveMinimum", ValueOp::Gt),
        ("exclusiveMaximum", ValueOp::Lt),
    ] {
        if let Some(bound) = object.get(keyword) {
            if !bound.is_number() {
                return Err(CompileError::SchemaInvalid(format!(
                    "{} must be a number",
                    keyword
                )));
            }
            let cast = path.is_json_property().then_some(SqlCast::Numeric);
            let gated = if_type_then(
                SqlFilter::ValueIs {
                    path: path.clone(),
                    op,
                    value: bound.clone(),
                    cast,
                },
                gate_number(),
                path,
                types,
            );
            filter = filter.and(gated.into_filter());
        }
    }

    if let Some(multiple) = object.get("multipleOf") {
        if !multiple.is_number() {
            return Err(CompileError::SchemaInvalid(
                "multipleOf must be a number".to_string(),
            ));
        }
        let gated = if_type_then(
            SqlFilter::MultipleOf {
                path: path.clone(),
                multiple: multiple.clone(),
            },
            gate_number(),
            path,
            types,
        );
        filter = filter.and(gated.into_filter());
    }

    // Length bounds: strings, arrays, objects.
    for (keyword, op, gate, build) in [
        (
            "minLength",
            ValueOp::Ge,
            gate_string(),
            LengthKind::String,
        ),
        (
            "maxLength",
            ValueOp::Le,
            gate_string(),
            LengthKind::String,
        ),
        ("minItems", ValueOp::Ge, gate_array(), LengthKind::Array),
        ("maxItems", ValueOp::Le, gate_array(), LengthKind::Array),
        (
            "minProperties",
            ValueOp::Ge,
            gate_object(),
            LengthKind::Properties,
        ),
        (
            "maxProperties",
            ValueOp::Le,
            gate_object(),
            LengthKind::Properties,
        ),
    ] {
        if let Some(bound) = object.get(keyword) {
            let length = bound.as_u64().ok_or_else(|| {
                CompileError::SchemaInvalid(format!(
                    "{} must be a non-negative integer",
                    keyword
                ))
            })?;
            let leaf = match build {
                LengthKind::String => SqlFilter::StringLength {
                    path: path.clone(),
                    op,
                    length,
                },
                LengthKind::Array => SqlFilter::ArrayLength {
                    path: path.clone(),
                    op,
                    length,
                },
                LengthKind::Properties => SqlFilter::JsonMapPropertyCount {
                    path: path.clone(),
                    op,
                    count: length,
                },
            };
            let gated = if_type_then(leaf, gate, path, types);
            filter = filter.and(gated.into_filter());
        }
    }

    if let Some(pattern_value) = object.get("pattern") {
        let pattern = pattern_value.as_str().ok_or_else(|| {
            CompileError::SchemaInvalid("pattern must be a string".to_string())
        })?;
        filter = filter.and(
            regex_filter(path, pattern, false, types)?.into_filter(),
        );
    }

    if let Some(regexp_value) = object.get("regexp") {
        let (pattern, ignore_case) = match regexp_value {
            Value::String(pattern) => (pattern.as_str(), false),
            Value::Object(body) => {
                let pattern = body.get("pattern").and_then(Value::as_str).ok_or_else(|| {
                    CompileError::SchemaInvalid("regexp requires a pattern".to_string())
                })?;
                let flags = body.get("flags").and_then(Value::as_str).unwrap_or("");
                (pattern, flags.contains('i'))
            }
            other => {
                return Err(CompileError::SchemaInvalid(format!(
                    "invalid regexp: {}",
                    other
                )))
            }
        };
        filter = filter.and(regex_filter(path, pattern, ignore_case, types)?.into_filter());
    }

    // Ordered comparison on formatted strings.
    for (keyword, op) in [("formatMinimum", ValueOp::Ge), ("formatMaximum", ValueOp::Le)] {
        if let Some(bound) = object.get(keyword) {
            let bound_text = bound.as_str().ok_or_else(|| {
                CompileError::SchemaInvalid(format!("{} must be a string", keyword))
            })?;
            let cast = format
                .and_then(KnownFormat::comparison_cast)
                .ok_or(CompileError::FormatComparisonWithoutFormat)?;
            let gated = if_type_then(
                SqlFilter::ValueIs {
                    path: path.clone(),
                    op,
                    value: Value::String(bound_text.to_string()),
                    cast: Some(cast),
                },
                gate_string(),
                path,
                types,
            );
            filter = filter.and(gated.into_filter());
        }
    }

    if let Some(search) = object.get("fullTextSearch") {
        let term = search
            .as_object()
            .and_then(|body| body.get("term"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CompileError::SchemaInvalid("fullTextSearch requires a term".to_string())
            })?;
        let gated = if_type_then(
            SqlFilter::FullTextSearch {
                path: path.clone(),
                term: term.to_string(),
                as_array: false,
            },
            gate_string(),
            path,
            types,
        );
        filter = filter.and(gated.into_filter());
    }

    if let Some(additional) = object.get("additionalProperties") {
        match additional {
            Value::Bool(allowed) => select.set_additional_properties(*allowed),
            other => {
                return Err(CompileError::SchemaInvalid(format!(
                    "additionalProperties must be a boolean, got {}",
                    other
                )))
            }
        }
    }

    // Object properties with the existence policy.
    let required = match object.get("required") {
        None => Vec::new(),
        Some(Value::Array(names)) => names
            .iter()
            .map(|name| {
                name.as_str().map(str::to_string).ok_or_else(|| {
                    CompileError::SchemaInvalid(format!("invalid required entry: {}", name))
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => {
            return Err(CompileError::SchemaInvalid(format!(
                "required must be an array, got {}",
                other
            )))
        }
    };

    if let Some(properties_value) = object.get("properties") {
        let properties = properties_value.as_object().ok_or_else(|| {
            CompileError::SchemaInvalid("properties must be an object".to_string())
        })?;
        filter = compile_properties(
            filter,
            path,
            select,
            properties,
            &required,
            options,
            in_branch,
            &mut implies_exists,
        )?;
    } else {
        for name in &required {
            if path.is_table() && column_type(name).is_none() {
                return Err(CompileError::SchemaInvalid(format!(
                    "unknown contract field: {}",
                    name
                )));
            }
            select.child(name);
            path.push(name);
            if !existence_is_implicit(path) {
                filter = filter.and(SqlFilter::IsNull {
                    path: path.clone(),
                    negate: true,
                });
            }
            path.pop();
            implies_exists = true;
        }
    }

    // Arrays: uniform items, tuple items, contains.
    if let Some(items) = object.get("items") {
        filter = filter.and(
            compile_items(path, items, object, options, types)?.into_filter(),
        );
    }

    if let Some(contains) = object.get("contains") {
        filter = filter.and(compile_contains(path, contains, options, types)?.into_filter());
    }

    if let Some(negated) = object.get("not") {
        let mut scratch = SelectMap::new();
        let child = compile_node(path, &mut scratch, negated, options, in_branch)?;
        filter = filter.and(child.filter.negate().into_filter());
    }

    if let Some(all_of) = object.get("allOf") {
        let branches = all_of.as_array().ok_or_else(|| {
            CompileError::SchemaInvalid("allOf must be an array".to_string())
        })?;
        for branch in branches {
            let child = compile_node(path, select, branch, options, in_branch)?;
            implies_exists = implies_exists || child.implies_exists;
            filter = filter.and(child.filter.into_filter());
        }
    }

    if let Some(any_of) = object.get("anyOf") {
        let branches = any_of.as_array().ok_or_else(|| {
            CompileError::SchemaInvalid("anyOf must be an array".to_string())
        })?;
        if branches.is_empty() {
            return Err(CompileError::SchemaInvalid("empty anyOf".to_string()));
        }
        let mut disjunction = ExpressionFilter::constant(false);
        let mut all_branches_imply = true;
        for branch in branches {
            let mut branch_select = SelectMap::new();
            let child = compile_node(path, &mut branch_select, branch, options, true)?;
            all_branches_imply = all_branches_imply && child.implies_exists;
            disjunction = disjunction.or(child.filter.into_filter());
            select.absorb(branch_select);
        }
        implies_exists = implies_exists || all_branches_imply;
        filter = filter.and(disjunction.into_filter());
    }

    if let Some(links) = object.get("$$links") {
        if !path.is_table() {
            return Err(CompileError::SchemaInvalid(
                "$$links is only valid at the contract level".to_string(),
            ));
        }
        let verbs = links.as_object().ok_or_else(|| {
            CompileError::SchemaInvalid("$$links must be an object".to_string())
        })?;
        for (verb, subschema) in verbs {
            filter = filter.and(compile_link(verb, subschema, select, options, in_branch)?);
        }
    }

    Ok(Compiled {
        filter,
        implies_exists,
        types,
        format,
    })
}

enum LengthKind {
    String,
    Array,
    Properties,
}

fn regex_filter(
    path: &SqlPath,
    pattern: &str,
    ignore_case: bool,
    types: TypeSet,
) -> Result<ExpressionFilter, CompileError> {
    // Validate before the engine sees it; an invalid pattern is a schema
    // error, not a database error.
    regex::Regex::new(pattern).map_err(|error| CompileError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: error.to_string(),
    })?;
    Ok(if_type_then(
        SqlFilter::MatchesRegex {
            path: path.clone(),
            pattern: pattern.to_string(),
            ignore_case,
        },
        gate_string(),
        path,
        types,
    ))
}

/// Whether a value at this path always exists, making existence tests
/// redundant: declared non-nullable columns.
fn existence_is_implicit(path: &SqlPath) -> bool {
    if !path.is_column() {
        return false;
    }
    let column = path.column_name().unwrap_or("");
    column_type(column).is_some() && !column_is_nullable(column)
}

/// `gate ⇒ filter`, simplified when the path's types already decide the
/// gate.
fn if_type_then(
    leaf: SqlFilter,
    gate: TypeSet,
    path: &SqlPath,
    current: TypeSet,
) -> ExpressionFilter {
    let effective = current.intersect(gate);
    if effective.is_empty() {
        // The gate can never hold, so the implication is vacuous.
        return ExpressionFilter::constant(true);
    }
    if current.subset_of(gate) {
        return ExpressionFilter::wrap(leaf);
    }
    let type_gate = SqlFilter::IsOfJsonTypes {
        path: path.clone(),
        types: effective.to_json_types(),
    };
    ExpressionFilter::wrap(type_gate).implies(leaf)
}

#[allow(clippy::too_many_arguments)]
fn compile_properties(
    mut filter: ExpressionFilter,
    path: &mut SqlPath,
    select: &mut SelectMap,
    properties: &Map<String, Value>,
    required: &[String],
    options: &QueryOptions,
    in_branch: bool,
    implies_exists: &mut bool,
) -> Result<ExpressionFilter, CompileError> {
    if path.is_table() {
        for name in properties.keys() {
            if column_type(name).is_none() {
                return Err(CompileError::SchemaInvalid(format!(
                    "unknown contract field: {}",
                    name
                )));
            }
        }
    }

    for (name, subschema) in properties {
        let is_required = required.iter().any(|entry| entry == name);
        path.push(name);
        let child_select = select.child(name);
        let child = compile_node(path, child_select, subschema, options, in_branch);
        let property_path = path.clone();
        let always_exists = existence_is_implicit(path);
        path.pop();
        let child = child?;

        if is_required {
            *implies_exists = true;
            if child.filter.is_unsatisfiable() {
                // A required property that can never match makes the whole
                // object unmatchable; and() folds and keeps the links.
                filter = filter.and(child.filter.into_filter());
                continue;
            }
            if !child.implies_exists && !always_exists {
                filter = filter.and(SqlFilter::IsNull {
                    path: property_path,
                    negate: true,
                });
            }
            filter = filter.and(child.filter.into_filter());
        } else {
            // Optional: absent values pass, present values must match.
            let per_property = if always_exists {
                child.filter
            } else {
                ExpressionFilter::wrap(SqlFilter::IsNull {
                    path: property_path,
                    negate: false,
                })
                .or(child.filter.into_filter())
            };
            filter = filter.and(per_property.into_filter());
        }
    }

    // Required names without a subschema still demand presence.
    for name in required {
        if properties.contains_key(name) {
            continue;
        }
        if path.is_table() && column_type(name).is_none() {
            return Err(CompileError::SchemaInvalid(format!(
                "unknown contract field: {}",
                name
            )));
        }
        select.child(name);
        path.push(name);
        if !existence_is_implicit(path) {
            filter = filter.and(SqlFilter::IsNull {
                path: path.clone(),
                negate: true,
            });
        }
        path.pop();
        *implies_exists = true;
    }

    Ok(filter)
}

fn compile_items(
    path: &mut SqlPath,
    items: &Value,
    parent: &Map<String, Value>,
    options: &QueryOptions,
    types: TypeSet,
) -> Result<ExpressionFilter, CompileError> {
    match items {
        // Uniform items: no element may violate the subschema.
        Value::Object(_) | Value::Bool(_) => {
            let mut element_path = SqlPath::element_root(path);
            let mut scratch = SelectMap::new();
            let element = compile_node(&mut element_path, &mut scratch, items, options, false)?;
            let violating = element.filter.negate().into_filter();
            let some_element_violates = SqlFilter::ArrayContains {
                path: path.clone(),
                filter: Box::new(violating),
                containment: None,
            };
            Ok(if_type_then(
                SqlFilter::Not(Box::new(some_element_violates)),
                gate_array(),
                path,
                types,
            ))
        }

        // Tuple items: element i matches schema i whenever it exists.
        Value::Array(tuple) => {
            let parent_path = path.clone();
            let mut tuple_filter = ExpressionFilter::constant(true);
            path.push_placeholder();
            for (index, subschema) in tuple.iter().enumerate() {
                path.set_last(&index.to_string());
                let mut scratch = SelectMap::new();
                let element = match compile_node(path, &mut scratch, subschema, options, false) {
                    Ok(element) => element,
                    Err(error) => {
                        path.pop();
                        return Err(error);
                    }
                };
                let long_enough = SqlFilter::ArrayLength {
                    path: parent_path.clone(),
                    op: ValueOp::Gt,
                    length: index as u64,
                };
                let per_index = ExpressionFilter::wrap(long_enough)
                    .implies(element.filter.into_filter());
                tuple_filter = tuple_filter.and(per_index.into_filter());
            }
            path.pop();

            if parent.get("additionalProperties") == Some(&Value::Bool(false)) {
                tuple_filter = tuple_filter.and(SqlFilter::ArrayLength {
                    path: parent_path,
                    op: ValueOp::Le,
                    length: tuple.len() as u64,
                });
            }
            Ok(if_type_then(
                tuple_filter.into_filter(),
                gate_array(),
                path,
                types,
            ))
        }

        other => Err(CompileError::SchemaInvalid(format!(
            "invalid items: {}",
            other
        ))),
    }
}

fn compile_contains(
    path: &mut SqlPath,
    contains: &Value,
    options: &QueryOptions,
    types: TypeSet,
) -> Result<ExpressionFilter, CompileError> {
    if let Some(body) = contains.as_object() {
        // Full-text search over an array of strings.
        if body.len() == 1 {
            if let Some(search) = body.get("fullTextSearch") {
                let term = search
                    .as_object()
                    .and_then(|search| search.get("term"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        CompileError::SchemaInvalid(
                            "fullTextSearch requires a term".to_string(),
                        )
                    })?;
                return Ok(if_type_then(
                    SqlFilter::FullTextSearch {
                        path: path.clone(),
                        term: term.to_string(),
                        as_array: true,
                    },
                    gate_array(),
                    path,
                    types,
                ));
            }
        }

        // A constant-only element schema degrades to containment.
        let constant_only = body.contains_key("const")
            && body.keys().all(|keyword| {
                matches!(keyword.as_str(), "const" | "type" | "title" | "description")
            });
        if constant_only {
            let constant = body.get("const").expect("checked above").clone();
            return Ok(if_type_then(
                SqlFilter::ArrayContains {
                    path: path.clone(),
                    filter: Box::new(SqlFilter::Constant(true)),
                    containment: Some(constant),
                },
                gate_array(),
                path,
                types,
            ));
        }
    }

    let mut element_path = SqlPath::element_root(path);
    let mut scratch = SelectMap::new();
    let element = compile_node(&mut element_path, &mut scratch, contains, options, false)?;
    Ok(if_type_then(
        SqlFilter::ArrayContains {
            path: path.clone(),
            filter: Box::new(element.filter.into_filter()),
            containment: None,
        },
        gate_array(),
        path,
        types,
    ))
}

fn compile_link(
    verb: &str,
    subschema: &Value,
    select: &mut SelectMap,
    options: &QueryOptions,
    in_branch: bool,
) -> Result<SqlFilter, CompileError> {
    // A linked subschema starts over at the joined table: fresh root path,
    // fresh projection, same global options.
    let mut link_path = SqlPath::table_root();
    let mut link_select = select
        .user_link_select(verb)
        .cloned()
        .unwrap_or_default();
    let compiled = compile_node(&mut link_path, &mut link_select, subschema, options, in_branch)?;
    let link_options = options.links.get(verb).cloned().unwrap_or_default();

    Ok(SqlFilter::Link {
        verb: verb.to_string(),
        filter: Box::new(compiled.filter.into_filter()),
        select: link_select,
        options: link_options,
        filtered: in_branch,
    })
}
