//! The JSON-Schema-to-SQL compiler.
//!
//! `compile` is the single entry point: it walks the schema into a filter
//! expression and a projection map, renders the filter (registering any
//! `$$links` joins in a fresh build context), and hands everything to the
//! link expansion engine for final SQL assembly.

pub mod compiler;
pub mod context;
pub mod errors;
pub mod expression;
pub mod filter;
pub mod formats;
pub mod options;
pub mod path;
pub mod select_map;

use serde_json::Value;

use crate::sql::fragment::SqlFragmentBuilder;
use context::BuilderContext;
use path::SqlPath;
use select_map::SelectMap;

pub use errors::CompileError;
pub use options::{LinkQueryOptions, QueryOptions, SortDirection, LIMIT_CAP};

/// Name of the wide contracts table every query roots at.
pub const CONTRACTS_TABLE: &str = "contracts";

/// Compile `(schema, select, options)` into one executable SELECT whose
/// single `payload` column holds the projected contract per row.
///
/// Compiling twice yields byte-identical SQL; all state lives in the
/// per-call context.
pub fn compile(
    schema: &Value,
    select: &Value,
    options: &QueryOptions,
) -> Result<String, CompileError> {
    let mut select_map = SelectMap::from_user_select(select)?;
    let mut path = SqlPath::table_root();
    let compiled = compiler::compile_node(&mut path, &mut select_map, schema, options, false)?;

    let mut context = BuilderContext::new(CONTRACTS_TABLE);
    let mut builder = SqlFragmentBuilder::new();
    compiled.filter.render(&mut context, &mut builder)?;

    crate::sql::link_expansion::build_query(context, builder.into_sql(), &select_map, options)
}
