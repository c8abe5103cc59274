//! Pipe-separated product tables.
//!
//! ```text
//! Region!STRING:0|BuildConfig!HEX:16|CDNConfig!HEX:16|BuildId!DEC:4
//! ## seqn = 2241282
//! us|0017a402f556fbece46c38dc431a2c9b|1e2c9d2bd6ba5c0e9a59ef5e1b5b5b5b|4242
//! ```
//!
//! The first non-comment line names the columns; the `!TYPE:SIZE` annotation
//! is dropped. Lines starting with `##` are comments.

use crate::error::{Error, Result};

/// A parsed table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// A borrowed view of one row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    table: &'a Table,
    fields: &'a [String],
}

impl<'a> Row<'a> {
    /// Get a field by column name.
    pub fn get(&self, column: &str) -> Option<&'a str> {
        self.table
            .column_index(column)
            .map(|i| self.fields[i].as_str())
    }

    /// Get a non-empty field by column name.
    pub fn get_non_empty(&self, column: &str) -> Option<&'a str> {
        self.get(column).filter(|v| !v.is_empty())
    }
}

impl Table {
    /// Parse a table.
    pub fn parse(content: &str) -> Result<Self> {
        let mut columns: Option<Vec<String>> = None;
        let mut rows = Vec::new();

        for (i, line) in content.lines().enumerate() {
            let line_no = i + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with("##") {
                continue;
            }

            let fields: Vec<&str> = line.split('|').collect();

            match &columns {
                None => {
                    let names: Vec<String> = fields
                        .iter()
                        .map(|f| f.split('!').next().unwrap_or("").trim().to_string())
                        .collect();
                    if names.iter().any(String::is_empty) {
                        return Err(Error::table_parse(line_no, "empty column name"));
                    }
                    columns = Some(names);
                }
                Some(names) => {
                    if fields.len() != names.len() {
                        return Err(Error::table_parse(
                            line_no,
                            format!("expected {} fields, got {}", names.len(), fields.len()),
                        ));
                    }
                    rows.push(fields.iter().map(|f| f.trim().to_string()).collect());
                }
            }
        }

        let columns = columns.ok_or_else(|| Error::table_parse(0, "missing header line"))?;
        Ok(Self { columns, rows })
    }

    /// Parse a table from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::table_parse(0, format!("not UTF-8: {}", e)))?;
        Self::parse(text)
    }

    /// Column names in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Position of a column, matched case-insensitively.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
    }

    /// Iterate over rows in order.
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |fields| Row {
            table: self,
            fields,
        })
    }

    /// First row, if any.
    pub fn first(&self) -> Option<Row<'_>> {
        self.rows().next()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERSIONS: &str = "Region!STRING:0|BuildConfig!HEX:16|CDNConfig!HEX:16|BuildId!DEC:4\n\
        ## seqn = 2241282\n\
        us|0017a402f556fbece46c38dc431a2c9b|1e2c9d2bd6ba5c0e9a59ef5e1b5b5b5b|4242\n\
        eu|aa17a402f556fbece46c38dc431a2c9b|bb2c9d2bd6ba5c0e9a59ef5e1b5b5b5b|4242\n";

    #[test]
    fn test_parse_versions() {
        let table = Table::parse(VERSIONS).unwrap();
        assert_eq!(
            table.columns(),
            &["Region", "BuildConfig", "CDNConfig", "BuildId"]
        );
        assert_eq!(table.len(), 2);

        let eu = table.rows().nth(1).unwrap();
        assert_eq!(eu.get("Region"), Some("eu"));
        assert_eq!(eu.get("buildconfig"), Some("aa17a402f556fbece46c38dc431a2c9b"));
        assert_eq!(eu.get("Missing"), None);
    }

    #[test]
    fn test_empty_field_is_none_when_non_empty_required() {
        let table = Table::parse("Name|Path\nus|\n").unwrap();
        let row = table.first().unwrap();
        assert_eq!(row.get("Path"), Some(""));
        assert_eq!(row.get_non_empty("Path"), None);
    }

    #[test]
    fn test_field_count_mismatch() {
        let err = Table::parse("A|B\n1|2|3\n").unwrap_err();
        assert!(matches!(err, Error::TableParse { line: 2, .. }));
    }

    #[test]
    fn test_missing_header() {
        assert!(Table::parse("## only a comment\n\n").is_err());
    }

    #[test]
    fn test_header_only_is_empty() {
        let table = Table::parse("Name!STRING:0|Path!STRING:0\n").unwrap();
        assert!(table.is_empty());
        assert!(table.first().is_none());
    }
}
