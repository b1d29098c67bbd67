//! Record codecs. The ingest path treats a codec as an opaque
//! `encode(record) -> bytes` / `decode(bytes) -> record` pair.

use crate::core::{IngestError, Record, Result, TableSchema, Value};
use std::fmt::Debug;

pub trait RecordCodec: Send + Sync + Debug {
    fn encode(&self, schema: &TableSchema, record: &Record) -> Result<Vec<u8>>;

    fn decode(&self, schema: &TableSchema, bytes: &[u8]) -> Result<Record>;
}

/// Encodes records as a MessagePack array of values in schema column order.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackCodec;

impl MessagePackCodec {
    pub fn new() -> Self {
        Self
    }
}

impl RecordCodec for MessagePackCodec {
    fn encode(&self, schema: &TableSchema, record: &Record) -> Result<Vec<u8>> {
        let row: Vec<&Value> = schema
            .columns()
            .iter()
            .map(|col| record.get(&col.name).unwrap_or(&Value::Null))
            .collect();
        rmp_serde::to_vec(&row).map_err(|err| IngestError::Codec(err.to_string()))
    }

    fn decode(&self, schema: &TableSchema, bytes: &[u8]) -> Result<Record> {
        let row: Vec<Value> =
            rmp_serde::from_slice(bytes).map_err(|err| IngestError::Codec(err.to_string()))?;
        if row.len() != schema.column_count() {
            return Err(IngestError::Codec(format!(
                "expected {} values for table '{}', decoded {}",
                schema.column_count(),
                schema.name,
                row.len()
            )));
        }
        Ok(schema
            .columns()
            .iter()
            .map(|col| col.name.clone())
            .zip(row)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnSpec, ColumnType};

    fn schema() -> TableSchema {
        TableSchema::new(
            "readings",
            vec![
                ColumnSpec::new("sensor", ColumnType::Char16).primary_key(),
                ColumnSpec::new("value", ColumnType::Double).nullable(),
            ],
        )
    }

    #[test]
    fn test_decode_restores_column_names() {
        let codec = MessagePackCodec::new();
        let record = Record::new().with("sensor", "s-1").with("value", 21.5);
        let bytes = codec.encode(&schema(), &record).unwrap();
        assert_eq!(codec.decode(&schema(), &bytes).unwrap(), record);
    }

    #[test]
    fn test_decode_rejects_wrong_arity() {
        let codec = MessagePackCodec::new();
        let bytes = rmp_serde::to_vec(&vec![Value::Integer(1)]).unwrap();
        assert!(matches!(
            codec.decode(&schema(), &bytes),
            Err(IngestError::Codec(_))
        ));
    }
}
