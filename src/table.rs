//! Uniform in-memory tables built from lists of JSON records.
//!
//! Every row of a [`Table`] carries the full column set. A record that lacks a
//! key (or holds `null` for it) gets [`Cell::Missing`] in that column instead
//! of failing the whole page, so one irregular record never aborts a result.
//!
//! Column types come from the declared schema when the endpoint has one, and
//! are otherwise inferred from the values: date strings become dates, columns
//! whose every value is numeric become integers or floats, and everything
//! else stays text.

use crate::error::{Result, SurveillanceError};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Semantic type of a table column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
    /// Enum-like string with a small closed set of values
    Category,
}

/// Declared column: name and type
pub type ColumnDecl = (&'static str, ColumnType);

/// A single table value
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Key absent from the record, `null`, or not coercible to the column type
    Missing,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Category(String),
}

impl Cell {
    /// Check if the cell holds no value
    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    /// Numeric value as a float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Integer(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer value
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Text or category value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) | Cell::Category(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Cell::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Date value; datetimes give their date
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Cell::Date(d) => Some(*d),
            Cell::DateTime(dt) => Some(dt.date()),
            _ => None,
        }
    }

    /// Cell as JSON; missing values become `null`
    pub fn to_json(&self) -> Value {
        match self {
            Cell::Missing => Value::Null,
            Cell::Text(s) | Cell::Category(s) => Value::String(s.clone()),
            Cell::Integer(i) => Value::from(*i),
            Cell::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Cell::Boolean(b) => Value::Bool(*b),
            Cell::Date(_) | Cell::DateTime(_) => Value::String(self.to_string()),
        }
    }

    fn compare(&self, other: &Cell) -> Ordering {
        match (self, other) {
            (Cell::Missing, Cell::Missing) => Ordering::Equal,
            (Cell::Missing, _) => Ordering::Greater,
            (_, Cell::Missing) => Ordering::Less,
            (Cell::Date(a), Cell::Date(b)) => a.cmp(b),
            (Cell::DateTime(a), Cell::DateTime(b)) => a.cmp(b),
            (Cell::Boolean(a), Cell::Boolean(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => a.to_string().cmp(&b.to_string()),
            },
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Missing => Ok(()),
            Cell::Text(s) | Cell::Category(s) => f.write_str(s),
            Cell::Integer(i) => write!(f, "{}", i),
            Cell::Float(x) => write!(f, "{}", x),
            Cell::Boolean(b) => write!(f, "{}", b),
            Cell::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Cell::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

/// Ordered rows sharing one typed column set
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: IndexMap<String, ColumnType>,
    rows: Vec<Vec<Cell>>,
}

/// Borrowed view of one table row
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    table: &'a Table,
    index: usize,
}

impl<'a> Record<'a> {
    /// Get the cell of a column by name
    pub fn get(&self, column: &str) -> Option<&'a Cell> {
        self.table.get(self.index, column)
    }

    /// Row number in the table
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Table {
    /// An empty table with the declared columns
    pub fn empty(schema: &[ColumnDecl]) -> Self {
        Table {
            columns: schema
                .iter()
                .map(|(name, kind)| (name.to_string(), *kind))
                .collect(),
            rows: Vec::new(),
        }
    }

    /// Build a table from JSON records.
    ///
    /// Columns are the declared schema followed by every other key seen across
    /// the records, in first-seen order. Records that are not JSON objects are
    /// kept as rows of missing values.
    pub fn from_records(records: &[Value], schema: &[ColumnDecl]) -> Self {
        let mut names: IndexMap<String, Option<ColumnType>> = schema
            .iter()
            .map(|(name, kind)| (name.to_string(), Some(*kind)))
            .collect();

        for (i, record) in records.iter().enumerate() {
            match record {
                Value::Object(map) => {
                    for key in map.keys() {
                        if !names.contains_key(key) {
                            names.insert(key.clone(), None);
                        }
                    }
                }
                other => log::warn!(
                    "record {} is not an object ({}), keeping it as an empty row",
                    i,
                    json_kind(other)
                ),
            }
        }

        let mut columns = IndexMap::with_capacity(names.len());
        let mut cells: Vec<Vec<Cell>> = vec![Vec::with_capacity(names.len()); records.len()];

        for (name, declared) in names {
            let raw: Vec<Option<&Value>> = records
                .iter()
                .map(|r| r.get(&name).filter(|v| !v.is_null()))
                .collect();
            let kind = declared.unwrap_or_else(|| infer_type(raw.iter().flatten().copied()));

            let mut rejected = 0usize;
            for (row, value) in cells.iter_mut().zip(&raw) {
                let cell = match value {
                    None => Cell::Missing,
                    Some(v) => coerce(v, kind).unwrap_or_else(|| {
                        rejected += 1;
                        Cell::Missing
                    }),
                };
                row.push(cell);
            }
            if rejected > 0 {
                log::warn!(
                    "column {:?}: {} value(s) not coercible to {:?}, marked missing",
                    name,
                    rejected,
                    kind
                );
            }
            columns.insert(name, kind);
        }

        Table {
            columns,
            rows: cells,
        }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column names in order
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Type of `column`, if present
    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.columns.get(column).copied()
    }

    /// Check if `column` is present
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    /// Get the cell at `row` in `column`
    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.columns.get_index_of(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Row at `index`
    pub fn row(&self, index: usize) -> Option<Record<'_>> {
        (index < self.rows.len()).then_some(Record { table: self, index })
    }

    /// Iterate over rows
    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        (0..self.rows.len()).map(move |index| Record { table: self, index })
    }

    /// All cells of one column, top to bottom
    pub fn column(&self, column: &str) -> Option<Vec<&Cell>> {
        let idx = self.columns.get_index_of(column)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// Numeric view of a column; non-numeric cells are `None`
    pub fn numeric_column(&self, column: &str) -> Option<Vec<Option<f64>>> {
        self.column(column)
            .map(|cells| cells.into_iter().map(Cell::as_f64).collect())
    }

    /// Append a column; `cells` must have one entry per row
    pub fn push_column(&mut self, name: &str, kind: ColumnType, cells: Vec<Cell>) -> Result<()> {
        if cells.len() != self.rows.len() {
            return Err(SurveillanceError::validation(
                format!(
                    "column {:?} has {} values for {} rows",
                    name,
                    cells.len(),
                    self.rows.len()
                ),
                Some(name),
            ));
        }
        if let Some(idx) = self.columns.get_index_of(name) {
            self.columns.insert(name.to_string(), kind);
            for (row, cell) in self.rows.iter_mut().zip(cells) {
                row[idx] = cell;
            }
        } else {
            self.columns.insert(name.to_string(), kind);
            for (row, cell) in self.rows.iter_mut().zip(cells) {
                row.push(cell);
            }
        }
        Ok(())
    }

    /// Stable ascending sort on one column, missing values last
    pub fn sort_by_column(&mut self, column: &str) -> Result<()> {
        let idx = self.columns.get_index_of(column).ok_or_else(|| {
            SurveillanceError::validation(format!("unknown column {:?}", column), Some(column))
        })?;
        self.rows.sort_by(|a, b| a[idx].compare(&b[idx]));
        Ok(())
    }

    /// Rows as JSON objects, in column order
    pub fn to_records(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let map: serde_json::Map<String, Value> = self
                    .columns
                    .keys()
                    .zip(row)
                    .map(|(name, cell)| (name.clone(), cell.to_json()))
                    .collect();
                Value::Object(map)
            })
            .collect()
    }

    /// Render as CSV with a header line; missing cells are empty fields
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        let header: Vec<String> = self.columns.keys().map(|n| csv_field(n)).collect();
        out.push_str(&header.join(","));
        out.push('\n');
        for row in &self.rows {
            let line: Vec<String> = row.iter().map(|c| csv_field(&c.to_string())).collect();
            out.push_str(&line.join(","));
            out.push('\n');
        }
        out
    }
}

impl Serialize for Table {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.to_records())
    }
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn infer_type<'a>(values: impl Iterator<Item = &'a Value> + Clone) -> ColumnType {
    let mut present = values.clone().peekable();
    if present.peek().is_none() {
        return ColumnType::Text;
    }
    let all = |pred: fn(&Value) -> bool| values.clone().all(pred);

    if all(|v| v.is_boolean()) {
        ColumnType::Boolean
    } else if all(is_integer_like) {
        ColumnType::Integer
    } else if all(is_numeric_like) {
        ColumnType::Float
    } else if all(|v| v.as_str().and_then(parse_date).is_some()) {
        ColumnType::Date
    } else if all(|v| v.as_str().and_then(parse_datetime).is_some()) {
        ColumnType::DateTime
    } else {
        ColumnType::Text
    }
}

fn is_integer_like(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_i64(),
        Value::String(s) => s.trim().parse::<i64>().is_ok(),
        _ => false,
    }
}

fn is_numeric_like(value: &Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(s) => looks_numeric(s),
        _ => false,
    }
}

fn looks_numeric(raw: &str) -> bool {
    let s = raw.trim();
    !s.is_empty()
        && s.chars().any(|c| c.is_ascii_digit())
        && s.chars().all(|c| c.is_ascii_digit() || "+-.eE".contains(c))
        && s.parse::<f64>().is_ok()
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// Parse an RFC 3339 timestamp (converted to UTC) or a naive `YYYY-MM-DD[T ]HH:MM:SS[.f]`
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

fn coerce(value: &Value, kind: ColumnType) -> Option<Cell> {
    match kind {
        ColumnType::Text => Some(Cell::Text(text_of(value))),
        ColumnType::Category => Some(Cell::Category(text_of(value))),
        ColumnType::Integer => match value {
            Value::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .map(Cell::Integer),
        ColumnType::Float => match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) if looks_numeric(s) => s.trim().parse().ok(),
            _ => None,
        }
        .map(Cell::Float),
        ColumnType::Boolean => match value {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Some(false),
                Some(1) => Some(true),
                _ => None,
            },
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
        .map(Cell::Boolean),
        ColumnType::Date => value
            .as_str()
            .and_then(|s| parse_date(s).or_else(|| parse_datetime(s).map(|dt| dt.date())))
            .map(Cell::Date),
        ColumnType::DateTime => value
            .as_str()
            .and_then(|s| {
                parse_datetime(s).or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
            })
            .map(Cell::DateTime),
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_column_set_is_union_of_keys() {
        let records = vec![
            json!({"region": "Centre", "total_cas": 12}),
            json!({"region": "Hauts-Bassins", "deces": 1}),
            json!({"total_cas": 3, "district": "Baskuy"}),
        ];
        let table = Table::from_records(&records, &[]);

        assert_eq!(table.len(), 3);
        let names: Vec<&str> = table.column_names().collect();
        assert_eq!(names, vec!["region", "total_cas", "deces", "district"]);
        assert_eq!(table.get(1, "total_cas"), Some(&Cell::Missing));
        assert_eq!(table.get(0, "deces"), Some(&Cell::Missing));
        assert_eq!(table.get(2, "region"), Some(&Cell::Missing));
        assert_eq!(table.get(2, "total_cas"), Some(&Cell::Integer(3)));
    }

    #[test]
    fn test_malformed_record_does_not_abort_page() {
        let records = vec![json!({"age": 30}), json!("garbage"), json!({"age": 41})];
        let table = Table::from_records(&records, &[]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(1, "age"), Some(&Cell::Missing));
        assert_eq!(table.column_type("age"), Some(ColumnType::Integer));
    }

    #[test]
    fn test_type_inference() {
        let records = vec![
            json!({"d": "2024-01-08", "n": "12", "x": "1.5", "t": "2024-01-08T10:00:00Z", "b": true, "s": "Centre"}),
            json!({"d": "2024-01-15", "n": 7, "x": 2, "t": "2024-01-15 08:30:00", "b": false, "s": "42"}),
        ];
        let table = Table::from_records(&records, &[]);

        assert_eq!(table.column_type("d"), Some(ColumnType::Date));
        assert_eq!(table.column_type("n"), Some(ColumnType::Integer));
        assert_eq!(table.column_type("x"), Some(ColumnType::Float));
        assert_eq!(table.column_type("t"), Some(ColumnType::DateTime));
        assert_eq!(table.column_type("b"), Some(ColumnType::Boolean));
        assert_eq!(table.column_type("s"), Some(ColumnType::Text));

        assert_eq!(table.get(0, "n"), Some(&Cell::Integer(12)));
        assert_eq!(table.get(1, "x"), Some(&Cell::Float(2.0)));
        assert_eq!(
            table.get(0, "d").and_then(Cell::as_date),
            NaiveDate::from_ymd_opt(2024, 1, 8)
        );
        assert_eq!(table.get(1, "s"), Some(&Cell::Text("42".to_string())));
    }

    #[test]
    fn test_declared_schema_wins_and_pads_empty_pages() {
        const SCHEMA: &[ColumnDecl] = &[
            ("idCas", ColumnType::Integer),
            ("sexe", ColumnType::Category),
            ("age", ColumnType::Integer),
        ];
        let empty = Table::from_records(&[], SCHEMA);
        assert!(empty.is_empty());
        assert_eq!(empty.column_names().count(), 3);

        let records = vec![
            json!({"idCas": "1", "sexe": "f", "age": "n/a"}),
            json!({"idCas": 2, "sexe": "m", "age": 34}),
        ];
        let table = Table::from_records(&records, SCHEMA);
        assert_eq!(table.get(0, "idCas"), Some(&Cell::Integer(1)));
        assert_eq!(table.get(0, "sexe"), Some(&Cell::Category("f".to_string())));
        assert_eq!(table.get(0, "age"), Some(&Cell::Missing));
        assert_eq!(table.get(1, "age"), Some(&Cell::Integer(34)));
    }

    #[test]
    fn test_nulls_are_missing_and_do_not_drive_inference() {
        let records = vec![json!({"v": null}), json!({"v": 4.5})];
        let table = Table::from_records(&records, &[]);
        assert_eq!(table.column_type("v"), Some(ColumnType::Float));
        assert!(table.get(0, "v").unwrap().is_missing());
    }

    #[test]
    fn test_sort_and_push_column() {
        let records = vec![
            json!({"date_debut": "2024-02-05", "total_cas": 9}),
            json!({"total_cas": 1}),
            json!({"date_debut": "2024-01-29", "total_cas": 4}),
        ];
        let mut table = Table::from_records(&records, &[]);
        table.sort_by_column("date_debut").unwrap();
        assert_eq!(table.numeric_column("total_cas").unwrap(), vec![Some(4.0), Some(9.0), Some(1.0)]);

        table
            .push_column("flag", ColumnType::Boolean, vec![Cell::Boolean(true); 3])
            .unwrap();
        assert_eq!(table.row(2).unwrap().get("flag"), Some(&Cell::Boolean(true)));
        assert!(table.push_column("bad", ColumnType::Boolean, vec![]).is_err());
        assert!(table.sort_by_column("nope").is_err());
    }

    #[test]
    fn test_csv_and_json_output() {
        let records = vec![
            json!({"region": "Centre, Nord", "total_cas": 2}),
            json!({"region": "Say \"hi\""}),
        ];
        let table = Table::from_records(&records, &[]);
        assert_eq!(
            table.to_csv(),
            "region,total_cas\n\"Centre, Nord\",2\n\"Say \"\"hi\"\"\",\n"
        );
        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json[1]["total_cas"], Value::Null);
        assert_eq!(json[0]["region"], "Centre, Nord");
    }
}
