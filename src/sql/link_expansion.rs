//! Link-graph expansion: the final SELECT.
//!
//! Without `$$links` the compiled filter and projection collapse into one
//! plain SELECT. With links, the statement splits in two around a
//! materialized fence:
//!
//! 1. an inner SELECT where only IDs flow, joining every registered link
//!    edge and rolling them up per root with ordering and a widened limit;
//! 2. a `MATERIALIZED` fence CTE regrouping the flattened edges per root so
//!    the planner cannot collapse the inner pagination;
//! 3. an outer SELECT that joins the contracts back, aggregates each link
//!    verb through a LATERAL subquery with per-link pagination, and overlays
//!    the aggregated payloads onto the root projection.

use crate::schema::context::{BuilderContext, LinkRegistry, RegisteredLink};
use crate::schema::errors::CompileError;
use crate::schema::options::{QueryOptions, SortDirection};
use crate::schema::path::{column_type, PathRender, SqlPath};
use crate::schema::select_map::SelectMap;
use crate::sql::fragment::{quote_ident, quote_literal};
use crate::sql::select::{CteBuilder, JoinItem, JoinKind, OrderByItem, SelectBuilder};

/// Ordering items for contracts at `alias`. `version` expands to the five
/// version columns with releases ranking above pre-releases; everything else
/// is a path into the document. The id is always appended so the order is
/// total.
fn sort_order_items(
    alias: &str,
    sort_by: Option<&Vec<String>>,
    direction: SortDirection,
) -> Result<Vec<OrderByItem>, CompileError> {
    let quoted = quote_ident(alias);
    let mut items = Vec::new();

    match sort_by {
        None => {
            items.push(OrderByItem::new(
                format!("{}.\"created_at\"", quoted),
                direction,
            ));
        }
        Some(fields) if fields.len() == 1 && fields[0] == "version" => {
            for column in ["version_major", "version_minor", "version_patch"] {
                items.push(OrderByItem::new(
                    format!("{}.{}", quoted, quote_ident(column)),
                    direction,
                ));
            }
            // Pre-releases rank below releases regardless of the requested
            // direction: the boolean key stays DESC (TRUE, i.e. release,
            // first) even when everything else flips.
            items.push(OrderByItem::new(
                format!("({}.\"version_prerelease\" = '')", quoted),
                SortDirection::Desc,
            ));
            items.push(OrderByItem::new(
                format!("{}.\"version_prerelease\"", quoted),
                direction,
            ));
            items.push(OrderByItem::new(
                format!("{}.\"version_build\"", quoted),
                direction,
            ));
        }
        Some(fields) => {
            let first = fields.first().ok_or_else(|| {
                CompileError::SchemaInvalid("sortBy cannot be empty".to_string())
            })?;
            if column_type(first).is_none() {
                return Err(CompileError::SchemaInvalid(format!(
                    "unknown sortBy field: {}",
                    first
                )));
            }
            let mut path = SqlPath::table_root();
            for field in fields {
                path.push(field);
            }
            items.push(OrderByItem::new(
                path.render(alias, PathRender::jsonb()),
                direction,
            ));
        }
    }

    items.push(OrderByItem::new(format!("{}.\"id\"", quoted), direction));
    Ok(items)
}

/// Registered links of one registry level, grouped by verb in first-seen
/// order. Several entries of the same verb are `anyOf` branches.
fn group_by_verb(registry: &LinkRegistry) -> Vec<Vec<&RegisteredLink>> {
    let mut groups: Vec<Vec<&RegisteredLink>> = Vec::new();
    for entry in &registry.entries {
        if let Some(group) = groups
            .iter_mut()
            .find(|group| group[0].verb == entry.verb)
        {
            group.push(entry);
        } else {
            groups.push(vec![entry]);
        }
    }
    groups
}

/// Emit the edge joins of a registry level and collect the edge-row
/// constructors, depth first so nested links join after their parents.
fn collect_edge_joins(
    builder: &mut SelectBuilder,
    registry: &LinkRegistry,
    root_table: &str,
    parent_alias: &str,
    edge_rows: &mut Vec<String>,
) {
    for link in &registry.entries {
        let links_alias = quote_ident(&link.links_alias);
        let join_alias = quote_ident(&link.join_alias);
        let parent = quote_ident(parent_alias);

        builder.push_join(JoinItem {
            kind: JoinKind::Left,
            target: "\"links2\"".to_string(),
            alias: Some(link.links_alias.clone()),
            on: format!(
                "{links}.\"fromId\" = {parent}.\"id\" AND {links}.\"name\" = \
                 (SELECT \"id\" FROM \"strings\" WHERE \"string\" = {verb})",
                links = links_alias,
                parent = parent,
                verb = quote_literal(&link.verb)
            ),
            lateral: false,
        });
        builder.push_join(JoinItem {
            kind: JoinKind::Left,
            target: quote_ident(root_table),
            alias: Some(link.join_alias.clone()),
            on: format!(
                "{links}.\"toId\" = {join}.\"id\" AND ({filter})",
                links = links_alias,
                join = join_alias,
                filter = link.filter_sql
            ),
            lateral: false,
        });

        edge_rows.push(format!(
            "row({parent}.\"id\", {index}, {join}.\"id\")::link_edge",
            parent = parent,
            index = link.edge_index,
            join = join_alias
        ));

        collect_edge_joins(builder, &link.nested, root_table, &link.join_alias, edge_rows);
    }
}

/// Build the LATERAL aggregation for one verb group. Returns the aggregate
/// alias and the subquery SQL.
fn link_group_lateral(
    root_table: &str,
    group: &[&RegisteredLink],
    source_expr: &str,
    fence_edges: &str,
) -> Result<(String, String), CompileError> {
    let suffix = group[0]
        .join_alias
        .strip_prefix("join@")
        .unwrap_or(&group[0].join_alias);
    let agg_alias = format!("agg@{}", suffix);
    let sink_alias = format!("sink@{}", suffix);
    let options = &group[0].options;

    let indices: Vec<String> = group
        .iter()
        .map(|branch| branch.edge_index.to_string())
        .collect();

    // Per-branch payloads, each overlaying its own nested link aggregates.
    let mut nested_joins: Vec<JoinItem> = Vec::new();
    let mut branch_payloads: Vec<(usize, String, bool)> = Vec::new();
    for branch in group.iter() {
        let base = branch.select.render_projection(&sink_alias);
        let mut links_pairs: Vec<String> = Vec::new();
        for nested_group in group_by_verb(&branch.nested) {
            let (nested_alias, nested_sql) = link_group_lateral(
                root_table,
                &nested_group,
                &format!("{}.\"id\"", quote_ident(&sink_alias)),
                fence_edges,
            )?;
            nested_joins.push(JoinItem {
                kind: JoinKind::Left,
                target: format!("({})", nested_sql),
                alias: Some(nested_alias.clone()),
                on: "true".to_string(),
                lateral: true,
            });
            links_pairs.push(quote_literal(&nested_group[0].verb));
            links_pairs.push(format!(
                "coalesce({}.\"payload\", '[]'::jsonb)",
                quote_ident(&nested_alias)
            ));
        }
        let payload = if links_pairs.is_empty() {
            base
        } else {
            format!(
                "({} || jsonb_build_object('links', jsonb_build_object({})))",
                base,
                links_pairs.join(", ")
            )
        };
        branch_payloads.push((branch.edge_index, payload, branch.filtered));
    }

    // One matched branch is the payload as-is; several merge their views,
    // each gated by whether the edge participated in that branch.
    let merged = if branch_payloads.len() == 1 && !branch_payloads[0].2 {
        branch_payloads[0].1.clone()
    } else {
        let mut gated: Vec<String> = branch_payloads
            .iter()
            .map(|(index, payload, _)| {
                format!(
                    "CASE WHEN \"edge\".\"idxs\" && ARRAY[{}] THEN {} ELSE NULL END",
                    index, payload
                )
            })
            .collect();
        let mut merged = gated.pop().expect("at least one branch");
        while let Some(previous) = gated.pop() {
            merged = format!("merge_jsonb_views({}, {})", previous, merged);
        }
        merged
    };

    let order_items = sort_order_items(&sink_alias, options.sort_by.as_ref(), options.sort_dir)?;
    let window_order: Vec<String> = order_items.iter().map(OrderByItem::render).collect();

    let mut linked = SelectBuilder::new();
    linked
        .push_item(merged, Some("payload"))
        .push_item(
            format!("row_number() OVER (ORDER BY {})", window_order.join(", ")),
            Some("pos"),
        )
        .push_from_subquery(format!("SELECT * FROM unnest({})", fence_edges), "edge")
        .push_join(JoinItem {
            kind: JoinKind::Inner,
            target: quote_ident(root_table),
            alias: Some(sink_alias.clone()),
            on: format!(
                "{}.\"id\" = \"edge\".\"sink\"",
                quote_ident(&sink_alias)
            ),
            lateral: false,
        });
    for join in nested_joins {
        linked.push_join(join);
    }
    linked.set_filter(format!(
        "\"edge\".\"source\" = {} AND \"edge\".\"idxs\" && ARRAY[{}]",
        source_expr,
        indices.join(", ")
    ));

    let mut aggregate = SelectBuilder::new();
    aggregate
        .push_item(
            "jsonb_agg(\"linked\".\"payload\" ORDER BY \"linked\".\"pos\")",
            Some("payload"),
        )
        .push_from_subquery(linked.to_sql(), "linked");

    let mut bounds: Vec<String> = Vec::new();
    if options.skip > 0 {
        bounds.push(format!("\"linked\".\"pos\" > {}", options.skip));
    }
    if let Some(limit) = options.limit {
        bounds.push(format!(
            "\"linked\".\"pos\" <= {}",
            options.skip as u64 + limit as u64
        ));
    }
    if !bounds.is_empty() {
        aggregate.set_filter(bounds.join(" AND "));
    }

    Ok((agg_alias, aggregate.to_sql()))
}

/// Assemble the final statement from the rendered root filter, the link
/// registry the render left in the context, and the projection map.
pub fn build_query(
    context: BuilderContext,
    filter_sql: String,
    select: &SelectMap,
    options: &QueryOptions,
) -> Result<String, CompileError> {
    let root_table = context.root_table().to_string();
    let quoted_root = quote_ident(&root_table);
    let (registry, hoisted) = context.into_parts();

    let mut conjuncts: Vec<String> = Vec::new();
    if !filter_sql.is_empty() && filter_sql != "true" {
        conjuncts.push(format!("({})", filter_sql));
    }
    for lifted in &hoisted {
        conjuncts.push(format!("({})", lifted));
    }
    if let Some(extra) = &options.extra_filter {
        conjuncts.push(format!("({})", extra));
    }
    let where_sql = if conjuncts.is_empty() {
        "true".to_string()
    } else {
        conjuncts.join(" AND ")
    };

    let order_items = sort_order_items(&root_table, options.sort_by.as_ref(), options.sort_dir)?;

    if registry.is_empty() {
        let mut plain = SelectBuilder::new();
        plain
            .push_item(select.render_projection(&root_table), Some("payload"))
            .push_from_table(&root_table, None)
            .set_filter(where_sql);
        for item in order_items {
            plain.push_order_by(item);
        }
        if options.skip > 0 {
            plain.set_offset(options.skip as u64);
        }
        plain.set_limit(options.limit as u64);
        return Ok(plain.to_sql());
    }

    // Inner SELECT: only IDs flow; edges roll up per root. The limit widens
    // to skip+limit because root pagination happens after link rollup.
    let mut roots = SelectBuilder::new();
    roots.push_item(format!("{}.\"id\"", quoted_root), Some("id"));
    let mut edge_rows: Vec<String> = Vec::new();
    collect_edge_joins(&mut roots, &registry, &root_table, &root_table, &mut edge_rows);
    roots.push_item(
        format!(
            "array_agg(row({}.\"id\", ARRAY[{}])::card_and_link_edges)",
            quoted_root,
            edge_rows.join(", ")
        ),
        Some("edges"),
    );
    roots
        .push_from_table(&root_table, None)
        .set_filter(where_sql)
        .push_group_by(format!("{}.\"id\"", quoted_root));
    for item in &order_items {
        roots.push_order_by(item.clone());
    }
    roots.set_limit(options.skip as u64 + options.limit as u64);

    // Fence: regroup the flattened edges as (source, sink, idxs) per root.
    // MATERIALIZED is the optimization barrier keeping the inner limit.
    let fence_sql = "SELECT \"grouped\".\"cardId\" AS \"cardId\", \
         array_agg(row(\"grouped\".\"source\", \"grouped\".\"sink\", \"grouped\".\"idxs\")::merged_edge) AS \"linkEdges\" \
         FROM (SELECT \"roots\".\"id\" AS \"cardId\", \"edge\".\"source\" AS \"source\", \
         \"edge\".\"sink\" AS \"sink\", array_agg(\"edge\".\"idx\") AS \"idxs\" \
         FROM \"roots\" \
         CROSS JOIN LATERAL unnest(\"roots\".\"edges\") AS \"rolled\" \
         CROSS JOIN LATERAL unnest(\"rolled\".\"edges\") AS \"edge\" \
         WHERE \"edge\".\"sink\" IS NOT NULL \
         GROUP BY \"roots\".\"id\", \"edge\".\"source\", \"edge\".\"sink\") AS \"grouped\" \
         GROUP BY \"grouped\".\"cardId\""
        .to_string();

    // Outer SELECT: payload materialization per root, one LATERAL per
    // top-level verb.
    let mut outer = SelectBuilder::new();
    outer
        .push_from_table("roots", None)
        .push_join(JoinItem {
            kind: JoinKind::Inner,
            target: quoted_root.clone(),
            alias: None,
            on: format!("{}.\"id\" = \"roots\".\"id\"", quoted_root),
            lateral: false,
        })
        .push_join(JoinItem {
            kind: JoinKind::Left,
            target: "\"fence\"".to_string(),
            alias: None,
            on: "\"fence\".\"cardId\" = \"roots\".\"id\"".to_string(),
            lateral: false,
        });

    let mut links_pairs: Vec<String> = Vec::new();
    for group in group_by_verb(&registry) {
        let (agg_alias, lateral_sql) = link_group_lateral(
            &root_table,
            &group,
            &format!("{}.\"id\"", quoted_root),
            "\"fence\".\"linkEdges\"",
        )?;
        outer.push_join(JoinItem {
            kind: JoinKind::Left,
            target: format!("({})", lateral_sql),
            alias: Some(agg_alias.clone()),
            on: "true".to_string(),
            lateral: true,
        });
        links_pairs.push(quote_literal(&group[0].verb));
        links_pairs.push(format!(
            "coalesce({}.\"payload\", '[]'::jsonb)",
            quote_ident(&agg_alias)
        ));
    }

    let base_projection = select.render_projection(&root_table);
    let payload = format!(
        "({} || jsonb_build_object('links', jsonb_build_object({})))",
        base_projection,
        links_pairs.join(", ")
    );
    outer.push_item(payload, Some("payload"));
    for item in order_items {
        outer.push_order_by(item);
    }
    if options.skip > 0 {
        outer.set_offset(options.skip as u64);
    }
    outer.set_limit(options.limit as u64);

    let mut ctes = CteBuilder::new();
    ctes.push("roots", roots.to_sql(), false);
    ctes.push("fence", fence_sql, true);
    Ok(ctes.to_sql(&outer.to_sql()))
}
