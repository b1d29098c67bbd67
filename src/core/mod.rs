pub mod error;
pub mod types;
pub mod value;

pub use error::{DestinationFailure, IngestError, Result};
pub use types::{ColumnProperty, ColumnSpec, ColumnType, Record, TableSchema};
pub use value::Value;
