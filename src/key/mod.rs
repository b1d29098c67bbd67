//! Key extraction: which columns form the primary and shard keys, how their
//! values are laid out in a key buffer and how that buffer is hashed.

pub mod builder;
pub mod codec;
pub mod hasher;

pub use builder::{KeyBuilder, KeyComponent, KeyDescriptor, KeyKind, RecordKey};
pub use codec::{encode_key_value, key_width};
pub use hasher::{KeyHasher, Murmur3KeyHasher, DEFAULT_HASH_SEED};
