use super::{IngestError, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Primitive column types understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Char1,
    Char2,
    Char4,
    Char8,
    Char16,
    Char32,
    Char64,
    Char128,
    Char256,
    Double,
    Float,
    Int8,
    Int16,
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Long,
    String,
    Date,
    #[serde(rename = "datetime")]
    DateTime,
    Time,
    /// Milliseconds since the Unix epoch, stored as a 64-bit integer.
    Timestamp,
    Decimal,
    Bytes,
    Ipv4,
}

impl ColumnType {
    /// Width in bytes of a fixed-width character type.
    pub fn char_width(&self) -> Option<usize> {
        match self {
            Self::Char1 => Some(1),
            Self::Char2 => Some(2),
            Self::Char4 => Some(4),
            Self::Char8 => Some(8),
            Self::Char16 => Some(16),
            Self::Char32 => Some(32),
            Self::Char64 => Some(64),
            Self::Char128 => Some(128),
            Self::Char256 => Some(256),
            _ => None,
        }
    }

    pub fn is_char(&self) -> bool {
        self.char_width().is_some()
    }

    pub fn is_textual(&self) -> bool {
        self.is_char() || matches!(self, Self::String)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Char1 => "char1",
            Self::Char2 => "char2",
            Self::Char4 => "char4",
            Self::Char8 => "char8",
            Self::Char16 => "char16",
            Self::Char32 => "char32",
            Self::Char64 => "char64",
            Self::Char128 => "char128",
            Self::Char256 => "char256",
            Self::Double => "double",
            Self::Float => "float",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int => "int",
            Self::Long => "long",
            Self::String => "string",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Time => "time",
            Self::Timestamp => "timestamp",
            Self::Decimal => "decimal",
            Self::Bytes => "bytes",
            Self::Ipv4 => "ipv4",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnProperty {
    PrimaryKey,
    ShardKey,
    Nullable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub properties: Vec<ColumnProperty>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            properties: Vec::new(),
        }
    }

    pub fn primary_key(self) -> Self {
        self.with_property(ColumnProperty::PrimaryKey)
    }

    pub fn shard_key(self) -> Self {
        self.with_property(ColumnProperty::ShardKey)
    }

    pub fn nullable(self) -> Self {
        self.with_property(ColumnProperty::Nullable)
    }

    pub fn with_property(mut self, property: ColumnProperty) -> Self {
        if !self.properties.contains(&property) {
            self.properties.push(property);
        }
        self
    }

    pub fn has_property(&self, property: ColumnProperty) -> bool {
        self.properties.contains(&property)
    }

    pub fn is_primary_key(&self) -> bool {
        self.has_property(ColumnProperty::PrimaryKey)
    }

    pub fn is_shard_key(&self) -> bool {
        self.has_property(ColumnProperty::ShardKey)
    }

    pub fn is_nullable(&self) -> bool {
        self.has_property(ColumnProperty::Nullable)
    }
}

/// Column layout of one table, in server order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
}

/// Column names that make up the server's track table shape.
const TRACK_ID_COLUMN: &str = "TRACKID";
const TRACK_SHAPE: [&str; 4] = [TRACK_ID_COLUMN, "TIMESTAMP", "X", "Y"];

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnSpec> {
        self.find_column_index(name).map(|idx| &self.columns[idx])
    }

    pub fn primary_key_indices(&self) -> Vec<usize> {
        self.indices_where(ColumnSpec::is_primary_key)
    }

    pub fn shard_key_indices(&self) -> Vec<usize> {
        self.indices_where(ColumnSpec::is_shard_key)
    }

    fn indices_where(&self, pred: impl Fn(&ColumnSpec) -> bool) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, col)| pred(col))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// True when the table has the server's track shape (TRACKID, TIMESTAMP, X, Y).
    pub fn is_track_table(&self) -> bool {
        TRACK_SHAPE.iter().all(|wanted| {
            self.columns
                .iter()
                .any(|col| col.name.eq_ignore_ascii_case(wanted))
        })
    }

    /// Index of the track identifier column, when the table is a track table.
    pub fn track_id_index(&self) -> Option<usize> {
        if !self.is_track_table() {
            return None;
        }
        self.columns
            .iter()
            .position(|col| col.name.eq_ignore_ascii_case(TRACK_ID_COLUMN))
    }

    /// Checks that the record exposes exactly this table's columns.
    pub fn validate_record(&self, record: &Record) -> Result<()> {
        let missing: Vec<&str> = self
            .columns
            .iter()
            .filter(|col| !record.contains(&col.name))
            .map(|col| col.name.as_str())
            .collect();
        let extra: Vec<&str> = record
            .column_names()
            .filter(|name| self.find_column_index(name).is_none())
            .collect();

        if missing.is_empty() && extra.is_empty() {
            return Ok(());
        }

        let mut detail = Vec::new();
        if !missing.is_empty() {
            detail.push(format!("missing columns [{}]", missing.join(", ")));
        }
        if !extra.is_empty() {
            detail.push(format!("unknown columns [{}]", extra.join(", ")));
        }
        Err(IngestError::SchemaMismatch {
            table: self.name.clone(),
            detail: detail.join("; "),
        })
    }
}

/// A row to ingest, addressed by column name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    values: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Builds a record from a JSON object of scalar values.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let object = json.as_object().ok_or_else(|| {
            IngestError::Codec(format!("expected a JSON object, got {}", json))
        })?;
        let mut record = Record::new();
        for (column, raw) in object {
            let value = Value::from_json(raw).ok_or_else(|| IngestError::InvalidValue {
                column: column.clone(),
                detail: "nested JSON values are not supported".to_string(),
            })?;
            record.set(column.clone(), value);
        }
        Ok(record)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (column, value) in iter {
            record.set(column, value);
        }
        record
    }
}
