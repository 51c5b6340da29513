//! Column schemas and projection of records into tabular frames.

use std::collections::BTreeSet;

use clap::ValueEnum;
use serde_json::Value;

use crate::page::Record;

/// What to do when a page's fields differ from the schema.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum SchemaPolicy {
    /// Log the difference and write the projected columns anyway.
    #[default]
    Warn,
    /// Refuse to write the page.
    Fail,
}

/// Ordered, duplicate-free list of expected field names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    columns: Vec<String>,
}

impl ColumnSchema {
    /// Builds a schema, keeping the first occurrence of any repeated name.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = BTreeSet::new();
        let columns = columns
            .into_iter()
            .map(Into::into)
            .filter(|name: &String| seen.insert(name.clone()))
            .collect();
        Self { columns }
    }

    /// Column names in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Whether `name` is one of the schema columns.
    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|col| col == name)
    }

    /// Keeps only schema fields, filling absent ones with null.
    pub fn project_record(&self, record: &Record) -> Record {
        self.columns
            .iter()
            .map(|col| (col.clone(), record.get(col).cloned().unwrap_or(Value::Null)))
            .collect()
    }

    /// Compares the fields present in `records` against the schema.
    pub fn check(&self, records: &[Record]) -> SchemaDiff {
        let observed: BTreeSet<&str> = records
            .iter()
            .flat_map(|record| record.keys().map(String::as_str))
            .collect();
        if observed.is_empty() {
            return SchemaDiff::default();
        }
        let missing = self
            .columns
            .iter()
            .filter(|col| !observed.contains(col.as_str()))
            .cloned()
            .collect();
        let unexpected = observed
            .into_iter()
            .filter(|name| !self.contains(name))
            .map(str::to_string)
            .collect();
        SchemaDiff {
            missing,
            unexpected,
        }
    }
}

/// Fields that differ between a page and a schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDiff {
    /// Schema columns absent from every record.
    pub missing: Vec<String>,
    /// Record fields the schema does not name.
    pub unexpected: Vec<String>,
}

impl SchemaDiff {
    /// True when the page matches the schema exactly.
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

/// Rows ready to be written as a table.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Header row.
    pub columns: Vec<String>,
    /// Cells, one `Vec` per record, aligned with `columns`.
    pub rows: Vec<Vec<Value>>,
}

impl Frame {
    /// Projects `records` onto `schema` column order.
    pub fn project(records: &[Record], schema: &ColumnSchema) -> Self {
        let rows = records
            .iter()
            .map(|record| schema.project_record(record).into_iter().map(|(_, v)| v).collect())
            .collect();
        Self {
            columns: schema.columns().to_vec(),
            rows,
        }
    }

    /// Uses the union of record fields in order of first appearance.
    pub fn natural(records: &[Record]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            for key in record.keys() {
                if !columns.iter().any(|col| col == key) {
                    columns.push(key.clone());
                }
            }
        }
        let schema = ColumnSchema { columns };
        Self::project(records, &schema)
    }

    /// Number of data rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no data rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Renders a JSON value as a CSV cell.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        nested => nested.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().expect("object")
    }

    fn records_of(frame: &Frame) -> Vec<Record> {
        frame
            .rows
            .iter()
            .map(|row| frame.columns.iter().cloned().zip(row.iter().cloned()).collect())
            .collect()
    }

    #[test]
    fn projecting_a_projected_frame_changes_nothing() {
        let schema = ColumnSchema::new(["loan_number", "term", "borrower_rate"]);
        let raw = vec![
            record(json!({"term": 36, "loan_number": 7, "extra": "x"})),
            record(json!({"borrower_rate": 0.12, "loan_number": 8})),
        ];
        let once = Frame::project(&raw, &schema);
        let twice = Frame::project(&records_of(&once), &schema);
        assert_eq!(once, twice);
        assert_eq!(once.rows[0], vec![json!(7), json!(36), Value::Null]);
        assert!(!once.columns.iter().any(|col| col == "extra"));
    }

    #[test]
    fn frame_follows_schema_order() {
        let schema = ColumnSchema::new(["b", "a"]);
        let frame = Frame::project(&[record(json!({"a": 1, "b": "two"}))], &schema);
        assert_eq!(frame.columns, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(frame.rows, vec![vec![json!("two"), json!(1)]]);
    }

    #[test]
    fn natural_frame_unions_fields() {
        let frame = Frame::natural(&[record(json!({"a": 1})), record(json!({"a": 2, "b": true}))]);
        assert_eq!(frame.columns, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(frame.rows[0], vec![json!(1), Value::Null]);
    }

    #[test]
    fn check_reports_missing_and_unexpected_fields() {
        let schema = ColumnSchema::new(["a", "b"]);
        let diff = schema.check(&[record(json!({"a": 1, "c": 3}))]);
        assert_eq!(diff.missing, vec!["b".to_string()]);
        assert_eq!(diff.unexpected, vec!["c".to_string()]);
        assert!(schema.check(&[]).is_clean());
    }

    #[test]
    fn schema_drops_repeated_names() {
        let schema = ColumnSchema::new(["a", "b", "a"]);
        assert_eq!(schema.columns().to_vec(), vec!["a", "b"]);
    }

    #[test]
    fn cells_render_like_csv_values() {
        assert_eq!(cell_text(&Value::Null), "");
        assert_eq!(cell_text(&json!("2019-01-02")), "2019-01-02");
        assert_eq!(cell_text(&json!(0.1299)), "0.1299");
        assert_eq!(cell_text(&json!({"k": 1})), r#"{"k":1}"#);
    }
}
