//! Textual SELECT and CTE builders.
//!
//! These are deliberately thin: they own ordering and punctuation, nothing
//! else. All expressions arrive as already-rendered SQL strings.

use crate::schema::options::SortDirection;
use crate::sql::fragment::{quote_ident, SqlFragmentBuilder};

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expr: String,
    pub direction: SortDirection,
    pub nulls_last: bool,
}

impl OrderByItem {
    pub fn new(expr: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            expr: expr.into(),
            direction,
            nulls_last: true,
        }
    }

    pub fn render(&self) -> String {
        let mut rendered = format!("{} {}", self.expr, self.direction.sql());
        if self.nulls_last {
            rendered.push_str(" NULLS LAST");
        }
        rendered
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    fn sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinItem {
    pub kind: JoinKind,
    /// Join target: a table name, or a parenthesized subquery when
    /// `lateral` is set.
    pub target: String,
    pub alias: Option<String>,
    pub on: String,
    pub lateral: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromItem {
    Table {
        name: String,
        alias: Option<String>,
    },
    Subquery {
        sql: String,
        alias: String,
    },
}

/// One SELECT statement under construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectBuilder {
    items: Vec<(String, Option<String>)>,
    from: Vec<FromItem>,
    joins: Vec<JoinItem>,
    filter: Option<String>,
    group_by: Vec<String>,
    order_by: Vec<OrderByItem>,
    offset: Option<u64>,
    limit: Option<u64>,
}

impl SelectBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_item(&mut self, expr: impl Into<String>, alias: Option<&str>) -> &mut Self {
        self.items.push((expr.into(), alias.map(str::to_string)));
        self
    }

    pub fn push_from_table(&mut self, name: &str, alias: Option<&str>) -> &mut Self {
        self.from.push(FromItem::Table {
            name: name.to_string(),
            alias: alias.map(str::to_string),
        });
        self
    }

    pub fn push_from_subquery(&mut self, sql: impl Into<String>, alias: &str) -> &mut Self {
        self.from.push(FromItem::Subquery {
            sql: sql.into(),
            alias: alias.to_string(),
        });
        self
    }

    pub fn push_join(&mut self, join: JoinItem) -> &mut Self {
        self.joins.push(join);
        self
    }

    pub fn set_filter(&mut self, filter: impl Into<String>) -> &mut Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn push_group_by(&mut self, expr: impl Into<String>) -> &mut Self {
        self.group_by.push(expr.into());
        self
    }

    pub fn push_order_by(&mut self, item: OrderByItem) -> &mut Self {
        self.order_by.push(item);
        self
    }

    pub fn set_offset(&mut self, offset: u64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    pub fn set_limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn to_sql(&self) -> String {
        let mut builder = SqlFragmentBuilder::new();
        builder.push("SELECT ");

        let items: Vec<String> = self
            .items
            .iter()
            .map(|(expr, alias)| match alias {
                Some(alias) => format!("{} AS {}", expr, quote_ident(alias)),
                None => expr.clone(),
            })
            .collect();
        builder.push_list(&items);

        if !self.from.is_empty() {
            builder.push(" FROM ");
            let from: Vec<String> = self
                .from
                .iter()
                .map(|item| match item {
                    FromItem::Table { name, alias } => match alias {
                        Some(alias) => format!("{} AS {}", quote_ident(name), quote_ident(alias)),
                        None => quote_ident(name),
                    },
                    FromItem::Subquery { sql, alias } => {
                        format!("({}) AS {}", sql, quote_ident(alias))
                    }
                })
                .collect();
            builder.push_list(&from);
        }

        for join in &self.joins {
            builder.push(" ");
            builder.push(join.kind.sql());
            if join.lateral {
                builder.push(" LATERAL");
            }
            builder.push(" ");
            builder.push(&join.target);
            if let Some(alias) = &join.alias {
                builder.push(" AS ");
                builder.push(&quote_ident(alias));
            }
            builder.push(" ON ");
            builder.push(&join.on);
        }

        if let Some(filter) = &self.filter {
            builder.push(" WHERE ");
            builder.push(filter);
        }

        if !self.group_by.is_empty() {
            builder.push(" GROUP BY ");
            builder.push_list(&self.group_by);
        }

        if !self.order_by.is_empty() {
            builder.push(" ORDER BY ");
            let items: Vec<String> = self.order_by.iter().map(OrderByItem::render).collect();
            builder.push_list(&items);
        }

        if let Some(offset) = self.offset {
            builder.push(&format!(" OFFSET {}", offset));
        }
        if let Some(limit) = self.limit {
            builder.push(&format!(" LIMIT {}", limit));
        }

        builder.into_sql()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Cte {
    alias: String,
    sql: String,
    materialized: bool,
}

/// An ordered list of common table expressions prepended to a tail
/// statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CteBuilder {
    ctes: Vec<Cte>,
}

impl CteBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, alias: &str, sql: impl Into<String>, materialized: bool) -> &mut Self {
        self.ctes.push(Cte {
            alias: alias.to_string(),
            sql: sql.into(),
            materialized,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ctes.is_empty()
    }

    pub fn to_sql(&self, tail: &str) -> String {
        if self.ctes.is_empty() {
            return tail.to_string();
        }
        let clauses: Vec<String> = self
            .ctes
            .iter()
            .map(|cte| {
                format!(
                    "{} AS {}({})",
                    quote_ident(&cte.alias),
                    if cte.materialized { "MATERIALIZED " } else { "" },
                    cte.sql
                )
            })
            .collect();
        format!("WITH {} {}", clauses.join(", "), tail)
    }
}
