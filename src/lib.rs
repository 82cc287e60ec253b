//! Per-student PhonePe and cash balances for a small class roster.
//!
//! - [`roll_number`] validates the two-character roll number key
//! - [`stores`] persists the roll number to balance mapping
//! - [`export`] renders the roster as CSV or an xlsx workbook

pub mod config;
pub mod currency;
pub mod dto;
pub mod error;
pub mod export;
pub mod roll_number;
pub mod runner;
pub mod stores;

pub use config::VaultConfig;
pub use dto::{BalanceUpdate, Field, StudentRecord, VaultData, VaultSummary};
pub use error::{Error, Result};
pub use roll_number::{is_valid, RollNumber};
pub use runner::{run, Command};
pub use stores::{BlobStore, FileBlobStore, MemoryBlobStore, RecordStore};
