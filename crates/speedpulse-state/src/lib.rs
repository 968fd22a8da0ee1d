//! Speedpulse-State: persistence collaborators for the measurement pipeline
//!
//! The run pipeline in `speedpulse-core` only ever talks to the traits in
//! [`storage_traits`]. This crate provides those traits, the canonical
//! [`ResultRecord`] they move around, and a few implementations.
//!
//! ## Layer 0 - Data/Persistence
//!
//! ## Key Components
//!
//! - `ResultStore`: append/query of finished measurements, keyed by timestamp
//! - `SettingsStore`: read-only thresholds, retry policy and server blacklist
//! - `JsonlResultStore`: append-only JSON-lines journal on disk
//! - `TomlSettingsStore`: settings read from a TOML file
//! - `fakes`: in-memory implementations for tests

mod error;
pub mod fakes;
pub mod jsonl_store;
mod record;
pub mod settings;
pub mod storage_traits;

pub use error::StorageError;
pub use jsonl_store::JsonlResultStore;
pub use record::{RecordId, ResultRecord, StoredResult, UNKNOWN};
pub use settings::{QualityThresholds, RetryPolicy, Settings, TomlSettingsStore};
pub use storage_traits::{ResultStore, SettingsStore, StorageResult};
