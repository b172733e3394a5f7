//! Storage abstractions for the tile pipeline.
//!
//! Provides the object-store client for the tile bucket (S3 compatible) and
//! the key layout shared by tiles and per-chunk vector archives.

pub mod object_store;

pub use self::object_store::{ObjectStorage, ObjectStorageConfig, StoragePath};
