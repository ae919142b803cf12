//! Leaf filters of the compiled query.
//!
//! A closed set of variants, each owning the path it constrains. Every
//! variant knows two things: how to render itself into a SQL fragment, and
//! how to give up the `Link` filters nested inside it so a constant-folded
//! branch can still register its joins.

use serde_json::Value;

use crate::schema::context::BuilderContext;
use crate::schema::errors::CompileError;
use crate::schema::expression::ExpressionFilter;
use crate::schema::options::LinkQueryOptions;
use crate::schema::path::{ColumnType, PathRender, SqlPath};
use crate::schema::select_map::SelectMap;
use crate::sql::fragment::{quote_ident, quote_jsonb, quote_literal, SqlFragmentBuilder};

/// JSON type names as used by `jsonb_typeof`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    Object,
    Array,
    String,
    Number,
    Integer,
    Boolean,
    Null,
}

impl JsonType {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "object" => Some(JsonType::Object),
            "array" => Some(JsonType::Array),
            "string" => Some(JsonType::String),
            "number" => Some(JsonType::Number),
            "integer" => Some(JsonType::Integer),
            "boolean" => Some(JsonType::Boolean),
            "null" => Some(JsonType::Null),
            _ => None,
        }
    }

    /// The name `jsonb_typeof` reports; JSON itself has no integer type.
    pub fn sql_name(self) -> &'static str {
        match self {
            JsonType::Object => "object",
            JsonType::Array => "array",
            JsonType::String => "string",
            JsonType::Number | JsonType::Integer => "number",
            JsonType::Boolean => "boolean",
            JsonType::Null => "null",
        }
    }
}

/// Comparison operators usable by the value filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ValueOp {
    pub fn sql(self) -> &'static str {
        match self {
            ValueOp::Eq => "=",
            ValueOp::Ne => "<>",
            ValueOp::Lt => "<",
            ValueOp::Le => "<=",
            ValueOp::Gt => ">",
            ValueOp::Ge => ">=",
        }
    }
}

/// SQL casts applied to extracted values before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlCast {
    Text,
    Numeric,
    Boolean,
    Date,
    Time,
    Timestamp,
}

impl SqlCast {
    pub fn sql(self) -> &'static str {
        match self {
            SqlCast::Text => "text",
            SqlCast::Numeric => "numeric",
            SqlCast::Boolean => "boolean",
            SqlCast::Date => "date",
            SqlCast::Time => "time",
            SqlCast::Timestamp => "timestamp",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlFilter {
    /// A constant truth value; the unit of constant folding.
    Constant(bool),

    /// A raw SQL condition, trusted as-is (hoisted filters, the internal
    /// extra filter).
    Raw(String),

    Equals {
        path: SqlPath,
        values: Vec<Value>,
        /// Use JSONB containment (`@>`) instead of equality; set when the
        /// subschema constrained nothing but this constant so the column's
        /// GIN index applies.
        containment: bool,
    },

    ValueIs {
        path: SqlPath,
        op: ValueOp,
        value: Value,
        cast: Option<SqlCast>,
    },

    IsNull {
        path: SqlPath,
        /// Render `IS NOT NULL` instead.
        negate: bool,
    },

    IsOfJsonTypes {
        path: SqlPath,
        types: Vec<JsonType>,
    },

    StringLength {
        path: SqlPath,
        op: ValueOp,
        length: u64,
    },

    ArrayLength {
        path: SqlPath,
        op: ValueOp,
        length: u64,
    },

    JsonMapPropertyCount {
        path: SqlPath,
        op: ValueOp,
        count: u64,
    },

    ArrayContains {
        path: SqlPath,
        filter: Box<SqlFilter>,
        /// Containment shortcut for constant-only element schemas.
        containment: Option<Value>,
    },

    MultipleOf {
        path: SqlPath,
        multiple: Value,
    },

    MatchesRegex {
        path: SqlPath,
        pattern: String,
        ignore_case: bool,
    },

    FullTextSearch {
        path: SqlPath,
        term: String,
        /// Search an array of strings instead of one string.
        as_array: bool,
    },

    IfThenElse {
        condition: Box<SqlFilter>,
        then: Box<SqlFilter>,
        otherwise: Box<SqlFilter>,
    },

    Not(Box<SqlFilter>),

    /// A `$$links` traversal: registers a join pair in the build context and
    /// constrains the root to rows whose join matched.
    Link {
        verb: String,
        filter: Box<SqlFilter>,
        select: SelectMap,
        options: LinkQueryOptions,
        filtered: bool,
    },

    Expression(Box<ExpressionFilter>),
}

impl SqlFilter {
    pub fn truth(&self) -> Option<bool> {
        match self {
            SqlFilter::Constant(value) => Some(*value),
            SqlFilter::Expression(expression) => expression.truth(),
            _ => None,
        }
    }

    /// Move every `Link` filter reachable in this tree into `out`.
    pub fn scrape_links(self, out: &mut Vec<SqlFilter>) {
        match self {
            link @ SqlFilter::Link { .. } => out.push(link),
            SqlFilter::Not(inner) => inner.scrape_links(out),
            SqlFilter::ArrayContains { filter, .. } => filter.scrape_links(out),
            SqlFilter::IfThenElse {
                condition,
                then,
                otherwise,
            } => {
                condition.scrape_links(out);
                then.scrape_links(out);
                otherwise.scrape_links(out);
            }
            SqlFilter::Expression(expression) => expression.scrape_links(out),
            _ => {}
        }
    }

    /// Render this filter against the context's current table alias.
    pub fn render(
        &self,
        context: &mut BuilderContext,
        builder: &mut SqlFragmentBuilder,
    ) -> Result<(), CompileError> {
        match self {
            SqlFilter::Constant(value) => {
                builder.push(if *value { "true" } else { "false" });
            }

            SqlFilter::Raw(sql) => {
                builder.push(sql);
            }

            SqlFilter::Equals {
                path,
                values,
                containment,
            } => render_equals(context, builder, path, values, *containment)?,

            SqlFilter::ValueIs {
                path,
                op,
                value,
                cast,
            } => {
                let alias = context.current_alias().to_string();
                let subject = match cast {
                    Some(cast) => {
                        let raw = if path.is_json_property() {
                            path.render(&alias, PathRender::text())
                        } else {
                            path.render(&alias, PathRender::jsonb())
                        };
                        format!("({})::{}", raw, cast.sql())
                    }
                    None => path.render(&alias, PathRender::jsonb()),
                };
                builder.push(&subject);
                builder.push(" ");
                builder.push(op.sql());
                builder.push(" ");
                builder.push(&scalar_literal(value, *cast));
            }

            SqlFilter::IsNull { path, negate } => {
                let alias = context.current_alias().to_string();
                builder.push(&path.render(&alias, PathRender::jsonb()));
                builder.push(if *negate { " IS NOT NULL" } else { " IS NULL" });
            }

            SqlFilter::IsOfJsonTypes { path, types } => {
                let alias = context.current_alias().to_string();
                let subject = path.render(&alias, PathRender::jsonb());
                let mut names: Vec<&str> = types.iter().map(|t| t.sql_name()).collect();
                names.dedup();
                let typeof_expr = format!("jsonb_typeof({})", subject);
                if names.len() == 1 {
                    builder.push(&typeof_expr);
                    builder.push(" = ");
                    builder.push(&quote_literal(names[0]));
                } else {
                    builder.push(&typeof_expr);
                    builder.push(" IN ");
                    let quoted: Vec<String> =
                        names.iter().map(|name| quote_literal(name)).collect();
                    builder.push_parenthesized_list(&quoted);
                }
            }

            SqlFilter::StringLength { path, op, length } => {
                let alias = context.current_alias().to_string();
                let subject = if path.is_json_property() {
                    path.render(&alias, PathRender::text())
                } else {
                    path.render(&alias, PathRender::jsonb())
                };
                builder.push_invoked("char_length", &[subject]);
                builder.push(" ");
                builder.push(op.sql());
                builder.push(&format!(" {}", length));
            }

            SqlFilter::ArrayLength { path, op, length } => {
                let alias = context.current_alias().to_string();
                let subject = path.render(&alias, PathRender::jsonb());
                let measured = if path.is_json_property() {
                    format!("jsonb_array_length({})", subject)
                } else {
                    format!("coalesce(array_length({}, 1), 0)", subject)
                };
                builder.push(&measured);
                builder.push(" ");
                builder.push(op.sql());
                builder.push(&format!(" {}", length));
            }

            SqlFilter::JsonMapPropertyCount { path, op, count } => {
                let alias = context.current_alias().to_string();
                let subject = path.render(&alias, PathRender::jsonb());
                builder.push(&format!(
                    "(SELECT count(*) FROM jsonb_object_keys({})) {} {}",
                    subject,
                    op.sql(),
                    count
                ));
            }

            SqlFilter::ArrayContains {
                path,
                filter,
                containment,
            } => render_array_contains(context, builder, path, filter, containment.as_ref())?,

            SqlFilter::MultipleOf { path, multiple } => {
                let alias = context.current_alias().to_string();
                let subject = if path.is_json_property() {
                    format!("({})::numeric", path.render(&alias, PathRender::text()))
                } else {
                    format!("({})::numeric", path.render(&alias, PathRender::jsonb()))
                };
                builder.push(&format!("mod({}, {}) = 0", subject, multiple));
            }

            SqlFilter::MatchesRegex {
                path,
                pattern,
                ignore_case,
            } => {
                let alias = context.current_alias().to_string();
                let subject = if path.is_json_property() {
                    path.render(&alias, PathRender::text())
                } else {
                    path.render(&alias, PathRender::jsonb())
                };
                builder.push(&subject);
                builder.push(if *ignore_case { " ~* " } else { " ~ " });
                builder.push(&quote_literal(pattern));
            }

            SqlFilter::FullTextSearch {
                path,
                term,
                as_array,
            } => {
                let alias = context.current_alias().to_string();
                let query = format!("plainto_tsquery('english', {})", quote_literal(term));
                if *as_array {
                    if path.is_json_property() {
                        let subject = path.render(&alias, PathRender::jsonb());
                        builder.push(&format!(
                            "jsonb_to_tsvector('english', {}, '[\"string\"]') @@ {}",
                            subject, query
                        ));
                    } else {
                        let subject = path.render(&alias, PathRender::jsonb());
                        builder.push(&format!(
                            "to_tsvector('english', immutable_array_to_string({}, ' ')) @@ {}",
                            subject, query
                        ));
                    }
                } else {
                    let subject = if path.is_json_property() {
                        path.render(&alias, PathRender::text())
                    } else {
                        path.render(&alias, PathRender::jsonb())
                    };
                    builder.push(&format!(
                        "to_tsvector('english', {}) @@ {}",
                        subject, query
                    ));
                }
            }

            SqlFilter::IfThenElse {
                condition,
                then,
                otherwise,
            } => {
                let mut condition_sql = SqlFragmentBuilder::new();
                condition.render(context, &mut condition_sql)?;
                let mut then_sql = SqlFragmentBuilder::new();
                then.render(context, &mut then_sql)?;
                let mut otherwise_sql = SqlFragmentBuilder::new();
                otherwise.render(context, &mut otherwise_sql)?;
                builder.push(&format!(
                    "(CASE WHEN {} THEN {} ELSE {} END)",
                    condition_sql.as_str(),
                    then_sql.as_str(),
                    otherwise_sql.as_str()
                ));
            }

            SqlFilter::Not(inner) => {
                let mut inner_sql = SqlFragmentBuilder::new();
                inner.render(context, &mut inner_sql)?;
                builder.push("NOT ").extend_parenthesized_from(&inner_sql);
            }

            SqlFilter::Link {
                verb,
                filter,
                select,
                options,
                filtered,
            } => {
                let (_, join_alias) = context.link_aliases(verb);
                let seen_before = context.links_seen();
                context.begin_link(verb, select.clone(), options.clone(), *filtered);
                let mut inner_sql = SqlFragmentBuilder::new();
                filter.render(context, &mut inner_sql)?;
                let nested_links = context.links_seen() > seen_before + 1;
                context.end_link(inner_sql.into_sql(), nested_links);

                builder.push(&format!("{}.\"id\" IS NOT NULL", quote_ident(&join_alias)));
            }

            SqlFilter::Expression(expression) => expression.render(context, builder)?,
        }
        Ok(())
    }
}

fn render_equals(
    context: &mut BuilderContext,
    builder: &mut SqlFragmentBuilder,
    path: &SqlPath,
    values: &[Value],
    containment: bool,
) -> Result<(), CompileError> {
    let alias = context.current_alias().to_string();

    if containment {
        if let [value] = values {
            if let (Some(column), keypath) = (path.column_name(), path.json_segments()) {
                let mut wrapped = value.clone();
                for segment in keypath.iter().rev() {
                    let mut object = serde_json::Map::new();
                    object.insert(segment.to_string(), wrapped);
                    wrapped = Value::Object(object);
                }
                builder.push(&format!(
                    "{}.{} @> {}",
                    quote_ident(&alias),
                    quote_ident(column),
                    quote_jsonb(&wrapped)
                ));
                return Ok(());
            }
        }
    }

    let subject = path.render(&alias, PathRender::jsonb());
    let json = path.is_json_property();

    let (nulls, rest): (Vec<&Value>, Vec<&Value>) =
        values.iter().partition(|value| value.is_null() && !json);

    let mut clauses: Vec<String> = Vec::new();
    match rest.len() {
        0 => {}
        1 => clauses.push(format!(
            "{} = {}",
            subject,
            equality_literal(rest[0], json)
        )),
        _ => {
            let literals: Vec<String> = rest
                .iter()
                .map(|value| equality_literal(value, json))
                .collect();
            clauses.push(format!("{} IN ({})", subject, literals.join(", ")));
        }
    }
    if !nulls.is_empty() {
        clauses.push(format!("{} IS NULL", subject));
    }

    match clauses.len() {
        0 => builder.push("false"),
        1 => builder.push(&clauses[0]),
        _ => builder.push(&format!("({})", clauses.join(" OR "))),
    };
    Ok(())
}

fn render_array_contains(
    context: &mut BuilderContext,
    builder: &mut SqlFragmentBuilder,
    path: &SqlPath,
    filter: &SqlFilter,
    containment: Option<&Value>,
) -> Result<(), CompileError> {
    let alias = context.current_alias().to_string();
    let subject = path.render(&alias, PathRender::jsonb());
    let column = path.root_column_type();

    if let Some(value) = containment {
        match column {
            Some(ColumnType::TextArray) => {
                let element = value.as_str().ok_or_else(|| {
                    CompileError::SchemaInvalid(format!(
                        "constant {} cannot be contained in a text array",
                        value
                    ))
                })?;
                builder.push(&format!(
                    "{} @> ARRAY[{}]",
                    subject,
                    quote_literal(element)
                ));
            }
            Some(ColumnType::JsonbArray) => {
                builder.push(&format!("{} @> ARRAY[{}]", subject, quote_jsonb(value)));
            }
            _ => {
                builder.push(&format!(
                    "{} @> {}",
                    subject,
                    quote_jsonb(&Value::Array(vec![value.clone()]))
                ));
            }
        }
        return Ok(());
    }

    let element_alias = context.next_element_alias();
    let source = match column {
        Some(ColumnType::TextArray) | Some(ColumnType::JsonbArray) if path.is_column() => {
            format!("unnest({})", subject)
        }
        _ => format!("jsonb_array_elements({})", subject),
    };

    let mut inner_sql = SqlFragmentBuilder::new();
    context.push_alias(&element_alias);
    let rendered = filter.render(context, &mut inner_sql);
    context.pop_alias();
    rendered?;

    builder.push(&format!(
        "EXISTS (SELECT 1 FROM {} AS {} WHERE {})",
        source,
        quote_ident(&element_alias),
        inner_sql.as_str()
    ));
    Ok(())
}

fn equality_literal(value: &Value, json: bool) -> String {
    if json {
        return quote_jsonb(value);
    }
    scalar_literal(value, None)
}

/// Render a scalar comparison literal, honoring the cast of the other side.
fn scalar_literal(value: &Value, cast: Option<SqlCast>) -> String {
    match value {
        Value::String(text) => match cast {
            Some(SqlCast::Date) => format!("{}::date", quote_literal(text)),
            Some(SqlCast::Time) => format!("{}::time", quote_literal(text)),
            Some(SqlCast::Timestamp) => format!("{}::timestamp", quote_literal(text)),
            _ => quote_literal(text),
        },
        Value::Number(number) => number.to_string(),
        Value::Bool(boolean) => if *boolean { "true" } else { "false" }.to_string(),
        Value::Null => "NULL".to_string(),
        other => quote_jsonb(other),
    }
}
