use super::KeyHasher;
use super::codec::{component_width, encode_key_value};
use crate::core::{ColumnType, IngestError, Record, Result, TableSchema, Value};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Which key of a table a builder extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Primary,
    Shard,
}

/// One column of a key, as laid out in the key buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyComponent {
    pub column_index: usize,
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub width: usize,
}

/// Derived layout of a table's primary or shard key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescriptor {
    kind: KeyKind,
    components: Vec<KeyComponent>,
    buffer_size: usize,
}

impl KeyDescriptor {
    /// Inspects the schema and lays out the requested key.
    pub fn from_schema(schema: &TableSchema, kind: KeyKind) -> Result<Self> {
        let indices = match kind {
            KeyKind::Primary => schema.primary_key_indices(),
            KeyKind::Shard => Self::shard_key_indices(schema)?,
        };

        let mut components = Vec::with_capacity(indices.len());
        for index in indices {
            let column = &schema.columns[index];
            let width = component_width(column).map_err(|err| IngestError::InvalidKeyColumn {
                table: schema.name.clone(),
                column: column.name.clone(),
                reason: err.to_string(),
            })?;
            components.push(KeyComponent {
                column_index: index,
                name: column.name.clone(),
                column_type: column.column_type,
                nullable: column.is_nullable(),
                width,
            });
        }

        let buffer_size = components.iter().map(|c| c.width).sum();
        Ok(Self {
            kind,
            components,
            buffer_size,
        })
    }

    /// Explicit shard key columns, or the track id for track tables without one.
    fn shard_key_indices(schema: &TableSchema) -> Result<Vec<usize>> {
        let explicit = schema.shard_key_indices();
        let Some(track_id) = schema.track_id_index() else {
            return Ok(explicit);
        };

        if explicit.is_empty() {
            return Ok(vec![track_id]);
        }
        if explicit != [track_id] {
            let column = &schema.columns[explicit[0]];
            return Err(IngestError::InvalidKeyColumn {
                table: schema.name.clone(),
                column: column.name.clone(),
                reason: format!(
                    "track tables must be sharded on '{}' only",
                    schema.columns[track_id].name
                ),
            });
        }
        Ok(explicit)
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn components(&self) -> &[KeyComponent] {
        &self.components
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn has_key(&self) -> bool {
        !self.components.is_empty()
    }

    /// True when both descriptors cover the same columns in the same order.
    pub fn same_columns(&self, other: &KeyDescriptor) -> bool {
        self.components.len() == other.components.len()
            && self
                .components
                .iter()
                .zip(&other.components)
                .all(|(a, b)| a.column_index == b.column_index)
    }
}

/// Encoded key of one record.
///
/// Equality compares the encoded bytes; hashing uses the precomputed `hash_code`.
#[derive(Debug, Clone)]
pub struct RecordKey {
    bytes: Vec<u8>,
    hash_code: i64,
    routing_hash: i64,
}

impl RecordKey {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Both 64-bit halves of the buffer hash folded together.
    pub fn hash_code(&self) -> i64 {
        self.hash_code
    }

    /// First 64-bit half of the buffer hash; selects the shard bucket.
    pub fn routing_hash(&self) -> i64 {
        self.routing_hash
    }
}

impl PartialEq for RecordKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for RecordKey {}

impl Hash for RecordKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash_code.hash(state);
    }
}

/// Builds [`RecordKey`]s for one table and one key kind.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    schema: Arc<TableSchema>,
    descriptor: KeyDescriptor,
    hasher: Arc<dyn KeyHasher>,
}

impl KeyBuilder {
    pub fn new(schema: Arc<TableSchema>, kind: KeyKind, hasher: Arc<dyn KeyHasher>) -> Result<Self> {
        let descriptor = KeyDescriptor::from_schema(&schema, kind)?;
        Ok(Self {
            schema,
            descriptor,
            hasher,
        })
    }

    pub fn descriptor(&self) -> &KeyDescriptor {
        &self.descriptor
    }

    pub fn has_key(&self) -> bool {
        self.descriptor.has_key()
    }

    /// Encodes and hashes the key of `record`. Returns `None` when the table has no such key.
    pub fn build(&self, record: &Record) -> Result<Option<RecordKey>> {
        self.schema.validate_record(record)?;
        self.build_validated(record)
    }

    /// Same as [`build`](Self::build) for a record already checked against the schema.
    pub(crate) fn build_validated(&self, record: &Record) -> Result<Option<RecordKey>> {
        if !self.descriptor.has_key() {
            return Ok(None);
        }

        let mut bytes = Vec::with_capacity(self.descriptor.buffer_size);
        for component in &self.descriptor.components {
            let column = &self.schema.columns[component.column_index];
            let value = record.get(&column.name).unwrap_or(&Value::Null);
            encode_key_value(column, value, self.hasher.as_ref(), &mut bytes)?;
        }

        let (h1, h2) = self.hasher.hash128(&bytes)?;
        Ok(Some(RecordKey {
            bytes,
            hash_code: (h1 ^ h2) as i64,
            routing_hash: h1 as i64,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ColumnSpec;
    use crate::key::Murmur3KeyHasher;

    fn hasher() -> Arc<dyn KeyHasher> {
        Arc::new(Murmur3KeyHasher::default())
    }

    fn orders() -> Arc<TableSchema> {
        Arc::new(TableSchema::new(
            "orders",
            vec![
                ColumnSpec::new("id", ColumnType::Long).primary_key(),
                ColumnSpec::new("region", ColumnType::Char8).primary_key().shard_key(),
                ColumnSpec::new("amount", ColumnType::Double),
            ],
        ))
    }

    #[test]
    fn test_descriptor_layout() {
        let schema = orders();
        let primary = KeyDescriptor::from_schema(&schema, KeyKind::Primary).unwrap();
        assert_eq!(primary.buffer_size(), 16);
        assert_eq!(primary.components().len(), 2);

        let shard = KeyDescriptor::from_schema(&schema, KeyKind::Shard).unwrap();
        assert_eq!(shard.buffer_size(), 8);
        assert!(!primary.same_columns(&shard));
    }

    #[test]
    fn test_equal_key_values_give_identical_keys() {
        let builder = KeyBuilder::new(orders(), KeyKind::Primary, hasher()).unwrap();
        let a = Record::new().with("id", 5).with("region", "eu").with("amount", 1.0);
        let b = Record::new().with("id", 5).with("region", "eu").with("amount", 99.0);

        let ka = builder.build(&a).unwrap().unwrap();
        let kb = builder.build(&b).unwrap().unwrap();
        assert_eq!(ka, kb);
        assert_eq!(ka.routing_hash(), kb.routing_hash());
        assert_eq!(ka.hash_code(), kb.hash_code());
    }

    #[test]
    fn test_no_key_returns_none() {
        let schema = Arc::new(TableSchema::new(
            "events",
            vec![ColumnSpec::new("payload", ColumnType::String)],
        ));
        let builder = KeyBuilder::new(schema, KeyKind::Primary, hasher()).unwrap();
        assert!(!builder.has_key());
        let record = Record::new().with("payload", "x");
        assert!(builder.build(&record).unwrap().is_none());
    }

    #[test]
    fn test_build_rejects_malformed_records() {
        let builder = KeyBuilder::new(orders(), KeyKind::Primary, hasher()).unwrap();
        let record = Record::new().with("id", 5);
        assert!(matches!(
            builder.build(&record),
            Err(IngestError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_bytes_key_column_is_invalid() {
        let schema = Arc::new(TableSchema::new(
            "blobs",
            vec![ColumnSpec::new("digest", ColumnType::Bytes).primary_key()],
        ));
        let err = KeyBuilder::new(schema, KeyKind::Primary, hasher()).unwrap_err();
        assert!(matches!(err, IngestError::InvalidKeyColumn { ref column, .. } if column == "digest"));
    }

    #[test]
    fn test_track_table_is_sharded_on_track_id() {
        let columns = vec![
            ColumnSpec::new("TRACKID", ColumnType::Char16),
            ColumnSpec::new("TIMESTAMP", ColumnType::Timestamp),
            ColumnSpec::new("X", ColumnType::Double),
            ColumnSpec::new("Y", ColumnType::Double),
        ];
        let implicit = TableSchema::new("tracks", columns.clone());
        let shard = KeyDescriptor::from_schema(&implicit, KeyKind::Shard).unwrap();
        assert_eq!(shard.components()[0].name, "TRACKID");

        let mut conflicting = columns;
        conflicting[2] = ColumnSpec::new("X", ColumnType::Double).shard_key();
        let conflicting = TableSchema::new("tracks", conflicting);
        assert!(matches!(
            KeyDescriptor::from_schema(&conflicting, KeyKind::Shard),
            Err(IngestError::InvalidKeyColumn { .. })
        ));
    }

    #[test]
    fn test_all_null_nullable_key_is_deterministic() {
        let schema = Arc::new(TableSchema::new(
            "sparse",
            vec![
                ColumnSpec::new("a", ColumnType::Int).shard_key().nullable(),
                ColumnSpec::new("b", ColumnType::String).shard_key().nullable(),
            ],
        ));
        let builder = KeyBuilder::new(schema, KeyKind::Shard, hasher()).unwrap();
        let record = Record::new().with("a", Value::Null).with("b", Value::Null);
        let first = builder.build(&record).unwrap().unwrap();
        let second = builder.build(&record).unwrap().unwrap();
        assert_eq!(first.routing_hash(), second.routing_hash());

        let non_null = Record::new().with("a", 0).with("b", Value::Null);
        assert_ne!(builder.build(&non_null).unwrap().unwrap(), first);
    }
}
