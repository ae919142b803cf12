//! Boolean combination of filters, with constant folding.
//!
//! Folding never loses a `$$links` traversal: when a branch is folded away,
//! its link filters are scraped into the surviving expression as optional
//! links. An optional link registers its join pair when the expression
//! renders, so the outer SELECT still sees the link's columns, but it
//! contributes no condition.
//!
//! Every combinator consumes its operands; filters are moved, never cloned.

use crate::schema::context::BuilderContext;
use crate::schema::errors::CompileError;
use crate::schema::filter::SqlFilter;
use crate::sql::fragment::SqlFragmentBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

impl BoolOp {
    fn separator(self) -> &'static str {
        match self {
            BoolOp::And => " AND ",
            BoolOp::Or => " OR ",
        }
    }

    /// The value that leaves the other operand unchanged.
    fn identity(self) -> bool {
        matches!(self, BoolOp::And)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionFilter {
    operator: BoolOp,
    operands: Vec<SqlFilter>,
    /// Links from folded-away branches; rendered into a throwaway fragment
    /// so their joins register without filtering anything.
    optional_links: Vec<SqlFilter>,
}

impl ExpressionFilter {
    pub fn constant(value: bool) -> Self {
        Self {
            operator: BoolOp::And,
            operands: vec![SqlFilter::Constant(value)],
            optional_links: Vec::new(),
        }
    }

    /// Wrap a filter, splicing in nested expressions instead of nesting.
    pub fn wrap(filter: SqlFilter) -> Self {
        match filter {
            SqlFilter::Expression(expression) => *expression,
            other => Self {
                operator: BoolOp::And,
                operands: vec![other],
                optional_links: Vec::new(),
            },
        }
    }

    pub fn into_filter(self) -> SqlFilter {
        SqlFilter::Expression(Box::new(self))
    }

    pub fn truth(&self) -> Option<bool> {
        if self.operands.len() == 1 {
            self.operands[0].truth()
        } else {
            None
        }
    }

    pub fn is_unsatisfiable(&self) -> bool {
        self.truth() == Some(false)
    }

    pub fn and(self, other: SqlFilter) -> Self {
        self.combine(BoolOp::And, other)
    }

    pub fn or(self, other: SqlFilter) -> Self {
        self.combine(BoolOp::Or, other)
    }

    /// `self ⇒ other`, i.e. `¬self ∨ other`.
    pub fn implies(self, other: SqlFilter) -> Self {
        self.negate().or(other)
    }

    pub fn make_unsatisfiable(self) -> Self {
        let mut links = self.optional_links;
        for operand in self.operands {
            operand.scrape_links(&mut links);
        }
        Self {
            operator: BoolOp::And,
            operands: vec![SqlFilter::Constant(false)],
            optional_links: links,
        }
    }

    pub fn negate(mut self) -> Self {
        if let Some(value) = self.truth() {
            let links = std::mem::take(&mut self.optional_links);
            return Self {
                operator: BoolOp::And,
                operands: vec![SqlFilter::Constant(!value)],
                optional_links: links,
            };
        }

        // Involutive: ¬¬x folds back to x.
        if self.operands.len() == 1 {
            if matches!(self.operands[0], SqlFilter::Not(_)) {
                let SqlFilter::Not(inner) = self.operands.pop().expect("one operand") else {
                    unreachable!()
                };
                let mut unwrapped = Self::wrap(*inner);
                unwrapped.optional_links.append(&mut self.optional_links);
                return unwrapped;
            }
        }

        let links = std::mem::take(&mut self.optional_links);
        Self {
            operator: BoolOp::And,
            operands: vec![SqlFilter::Not(Box::new(self.into_filter()))],
            optional_links: links,
        }
    }

    fn combine(mut self, operator: BoolOp, other: SqlFilter) -> Self {
        let absorbing = !operator.identity();

        // The other side is a constant: fold.
        if let Some(value) = other.truth() {
            let mut links = Vec::new();
            other.scrape_links(&mut links);
            if value == absorbing {
                // false∧x, true∨x: the whole expression collapses.
                let mut collapsed = self.make_unsatisfiable();
                if absorbing {
                    collapsed.operands = vec![SqlFilter::Constant(true)];
                }
                collapsed.optional_links.extend(links);
                return collapsed;
            }
            // true∧x, false∨x: the constant vanishes.
            self.optional_links.extend(links);
            return self;
        }

        // This side is a constant: fold the other way around.
        if let Some(value) = self.truth() {
            if value == absorbing {
                let mut links = std::mem::take(&mut self.optional_links);
                other.scrape_links(&mut links);
                self.optional_links = links;
                return self;
            }
            let mut replacement = Self::wrap(other);
            replacement.optional_links.extend(self.optional_links);
            return replacement;
        }

        // Both sides carry real conditions: combine structurally.
        if self.operator == operator {
            match other {
                SqlFilter::Expression(expression) if expression.operator == operator => {
                    let inner = *expression;
                    self.operands.extend(inner.operands);
                    self.optional_links.extend(inner.optional_links);
                }
                other => self.operands.push(other),
            }
            self
        } else {
            Self {
                operator,
                operands: vec![self.into_filter(), other],
                optional_links: Vec::new(),
            }
        }
    }

    /// Move every reachable `Link` filter into `out`.
    pub fn scrape_links(self, out: &mut Vec<SqlFilter>) {
        for operand in self.operands {
            operand.scrape_links(out);
        }
        out.extend(self.optional_links);
    }

    pub fn render(
        &self,
        context: &mut BuilderContext,
        builder: &mut SqlFragmentBuilder,
    ) -> Result<(), CompileError> {
        match self.operands.len() {
            0 => {
                builder.push(if self.operator.identity() { "true" } else { "false" });
            }
            1 => self.operands[0].render(context, builder)?,
            _ => {
                builder.push("(");
                for (position, operand) in self.operands.iter().enumerate() {
                    if position > 0 {
                        builder.push(self.operator.separator());
                    }
                    operand.render(context, builder)?;
                }
                builder.push(")");
            }
        }

        // Optional links register their joins but filter nothing.
        for link in &self.optional_links {
            let mut discarded = SqlFragmentBuilder::new();
            link.render(context, &mut discarded)?;
        }
        Ok(())
    }
}
