//! Composable textual SQL fragments.
//!
//! All SQL in this crate is assembled as text through these builders so the
//! quoting rules live in exactly one place.

/// Quote an identifier for PostgreSQL, doubling embedded double quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quote a JSON value as a `::jsonb` literal.
pub fn quote_jsonb(value: &serde_json::Value) -> String {
    format!("{}::jsonb", quote_literal(&value.to_string()))
}

/// A growing SQL text fragment.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SqlFragmentBuilder {
    buf: String,
}

impl SqlFragmentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_sql(self) -> String {
        self.buf
    }

    pub fn push(&mut self, fragment: &str) -> &mut Self {
        self.buf.push_str(fragment);
        self
    }

    /// Append `items` separated by `, `.
    pub fn push_list<S: AsRef<str>>(&mut self, items: &[S]) -> &mut Self {
        for (position, item) in items.iter().enumerate() {
            if position > 0 {
                self.buf.push_str(", ");
            }
            self.buf.push_str(item.as_ref());
        }
        self
    }

    /// Append `(items…)`.
    pub fn push_parenthesized_list<S: AsRef<str>>(&mut self, items: &[S]) -> &mut Self {
        self.buf.push('(');
        self.push_list(items);
        self.buf.push(')');
        self
    }

    /// Append `(expr)::type`.
    pub fn push_casted(&mut self, expr: &str, sql_type: &str) -> &mut Self {
        self.buf.push('(');
        self.buf.push_str(expr);
        self.buf.push_str(")::");
        self.buf.push_str(sql_type);
        self
    }

    /// Append `function(args…)`.
    pub fn push_invoked<S: AsRef<str>>(&mut self, function: &str, args: &[S]) -> &mut Self {
        self.buf.push_str(function);
        self.push_parenthesized_list(args);
        self
    }

    pub fn extend_from(&mut self, other: &SqlFragmentBuilder) -> &mut Self {
        self.buf.push_str(&other.buf);
        self
    }

    pub fn extend_parenthesized_from(&mut self, other: &SqlFragmentBuilder) -> &mut Self {
        self.buf.push('(');
        self.buf.push_str(&other.buf);
        self.buf.push(')');
        self
    }
}
