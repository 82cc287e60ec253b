//! Storage layer for the student vault. Provides:
//! - Durable blob storage behind the [`BlobStore`] trait ([`MemoryBlobStore`], [`FileBlobStore`])
//! - The roll number to balance mapping on top of it ([`RecordStore`])
//!
//! Everything is synchronous and single-process; each record operation is a
//! whole-vault read-modify-write.

mod backend;
mod records;

pub use backend::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use records::{RecordStore, DEFAULT_STORAGE_KEY};
