//! PayRail Ledger Core
//!
//! Transactional ledger primitives: per-account currency balances with
//! atomic transfers, an append-only block log with gapless sequential ids,
//! and a registry of public keys bound to accounts.
//!
//! # Architecture
//!
//! - **Transactional Store**: every operation runs inside one RocksDB
//!   pessimistic transaction; rollback on any failure
//! - **Row Locking**: writers lock exactly the rows they touch, in a fixed
//!   global order, so disjoint operations proceed in parallel
//! - **Serialized Sequencing**: block ids are drawn from a row-locked head
//!   counter, never from a read-then-increment race
//! - **Bounded Retry**: lock timeouts and write-write conflicts are
//!   retried a configurable number of times before surfacing
//!
//! # Invariants
//!
//! - Balances never go negative; a debit and its credit apply atomically
//! - Block ids form one contiguous strictly increasing sequence
//! - An exact (account, scheme, public key) triple is registered at most once
//! - No partial effect survives a failed operation

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use metrics::Metrics;
pub use storage::Storage;
pub use types::{AccountId, AccountKey, Block, Currency};
