//! Registry of `format` keyword values the compiler understands.
//!
//! Each known format contributes a SQL-side regular expression gate and,
//! for the temporal formats, the cast used by `formatMinimum` /
//! `formatMaximum` comparisons.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::schema::filter::SqlCast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownFormat {
    Date,
    Time,
    DateTime,
    Email,
    Uuid,
    Hostname,
    Markdown,
}

lazy_static! {
    static ref FORMATS: HashMap<&'static str, KnownFormat> = {
        let mut formats = HashMap::new();
        formats.insert("date", KnownFormat::Date);
        formats.insert("time", KnownFormat::Time);
        formats.insert("date-time", KnownFormat::DateTime);
        formats.insert("email", KnownFormat::Email);
        formats.insert("uuid", KnownFormat::Uuid);
        formats.insert("hostname", KnownFormat::Hostname);
        formats.insert("markdown", KnownFormat::Markdown);
        formats
    };
}

impl KnownFormat {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        FORMATS.get(keyword).copied()
    }

    /// Regular expression the value must match, or `None` when the format
    /// imposes no shape (markdown).
    pub fn sql_regex(self) -> Option<&'static str> {
        match self {
            KnownFormat::Date => Some(r"^\d{4}-\d{2}-\d{2}$"),
            KnownFormat::Time => Some(r"^\d{2}:\d{2}:\d{2}(\.\d+)?([Zz]|[+-]\d{2}:?\d{2})?$"),
            KnownFormat::DateTime => {
                Some(r"^\d{4}-\d{2}-\d{2}[Tt ]\d{2}:\d{2}:\d{2}(\.\d+)?([Zz]|[+-]\d{2}:?\d{2})?$")
            }
            KnownFormat::Email => Some(r"^[^@[:space:]]+@[^@[:space:]]+\.[^@[:space:]]+$"),
            KnownFormat::Uuid => {
                Some(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
            }
            KnownFormat::Hostname => Some(
                r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
            ),
            KnownFormat::Markdown => None,
        }
    }

    /// SQL cast for ordered comparisons, available only for the temporal
    /// formats.
    pub fn comparison_cast(self) -> Option<SqlCast> {
        match self {
            KnownFormat::Date => Some(SqlCast::Date),
            KnownFormat::Time => Some(SqlCast::Time),
            KnownFormat::DateTime => Some(SqlCast::Timestamp),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_formats_resolve() {
        for keyword in ["date", "time", "date-time", "email", "uuid", "hostname", "markdown"] {
            assert!(KnownFormat::from_keyword(keyword).is_some(), "{}", keyword);
        }
        assert!(KnownFormat::from_keyword("ipv4").is_none());
    }

    #[test]
    fn test_temporal_casts() {
        assert_eq!(
            KnownFormat::DateTime.comparison_cast(),
            Some(SqlCast::Timestamp)
        );
        assert_eq!(KnownFormat::Email.comparison_cast(), None);
    }

    #[test]
    fn test_markdown_has_no_regex() {
        assert!(KnownFormat::Markdown.sql_regex().is_none());
        assert!(KnownFormat::Date.sql_regex().is_some());
    }
}
