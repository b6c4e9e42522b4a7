//! Validated table identifiers.
//!
//! The store cannot bind table names as parameters, so every name that ends
//! up inside SQL text goes through [`TableName::parse`] first. A `TableName`
//! only renders as double-quoted, already-validated parts.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::error::{Error, Result};

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*){0,2}$")
            .expect("table name pattern is valid")
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    schema: Option<String>,
    table: String,
}

impl TableName {
    /// Accepts `table`, `dataset.table` and `project.dataset.table`.
    ///
    /// A project prefix must equal `project`; it is stripped because the
    /// project is the database file itself.
    pub fn parse(raw: &str, project: &str) -> Result<Self> {
        if !pattern().is_match(raw) {
            return Err(Error::InvalidTableIdentifier(raw.to_string()));
        }
        let parts: Vec<&str> = raw.split('.').collect();
        match parts.as_slice() {
            [table] => Ok(Self {
                schema: None,
                table: table.to_string(),
            }),
            [schema, table] => Ok(Self {
                schema: Some(schema.to_string()),
                table: table.to_string(),
            }),
            [proj, schema, table] if *proj == project => Ok(Self {
                schema: Some(schema.to_string()),
                table: table.to_string(),
            }),
            _ => Err(Error::InvalidTableIdentifier(raw.to_string())),
        }
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Quoted schema prefix including the trailing dot, or empty.
    pub fn schema_prefix(&self) -> String {
        match &self.schema {
            Some(s) => format!("\"{}\".", s),
            None => String::new(),
        }
    }

    /// Sibling name in the same schema, e.g. an index or a DLQ table.
    pub fn sibling(&self, suffix: &str) -> Result<Self> {
        let raw = match &self.schema {
            Some(s) => format!("{}.{}{}", s, self.table, suffix),
            None => format!("{}{}", self.table, suffix),
        };
        Self::parse(&raw, "")
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\"{}\"", self.schema_prefix(), self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_one_two_and_three_parts() {
        assert_eq!(
            TableName::parse("entity_unified", "p").unwrap().to_string(),
            "\"entity_unified\""
        );
        assert_eq!(
            TableName::parse("ds.cc_stage_1", "p").unwrap().to_string(),
            "\"ds\".\"cc_stage_1\""
        );
        let three = TableName::parse("p.ds.cc_stage_1", "p").unwrap();
        assert_eq!(three.schema(), Some("ds"));
        assert_eq!(three.table(), "cc_stage_1");
    }

    #[test]
    fn test_rejects_injection_and_foreign_projects() {
        for bad in [
            "stage_1; DROP TABLE x",
            "1stage",
            "a.b.c.d",
            "ds.\"t\"",
            "",
            "ds.",
            "a-b",
        ] {
            assert!(
                matches!(
                    TableName::parse(bad, "p"),
                    Err(Error::InvalidTableIdentifier(_))
                ),
                "{bad} should be rejected"
            );
        }
        assert!(TableName::parse("other.ds.t", "p").is_err());
    }

    #[test]
    fn test_sibling_keeps_schema() {
        let name = TableName::parse("ds.cc_stage_3", "p").unwrap();
        assert_eq!(
            name.sibling("_dlq").unwrap().to_string(),
            "\"ds\".\"cc_stage_3_dlq\""
        );
    }
}
