//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (Decimal for money)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(i64);

impl AccountId {
    /// Create new account ID
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw identifier
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Currency code (short identifier such as "USD" or "EUR")
///
/// The ledger does not maintain a closed currency list; any non-empty code
/// names an independent balance column for an account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    /// Create from a code
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the code is empty (rejected by every operation)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A finalized entry of the append-only block log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Sequential id (contiguous, starting at 1)
    pub id: u64,

    /// Opaque payload bytes (never empty)
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,

    /// Append timestamp
    pub created_at: DateTime<Utc>,
}

/// A public key registered for an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountKey {
    /// Key scheme identifier (e.g. "ed25519")
    pub scheme: String,

    /// Public key bytes (stored and listed, never verified here)
    #[serde(with = "serde_bytes")]
    pub public_key: Vec<u8>,

    /// Registration timestamp
    pub registered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_display() {
        assert_eq!(AccountId::new(42).to_string(), "42");
        assert_eq!(AccountId::new(-7).value(), -7);
    }

    #[test]
    fn test_currency_code() {
        let usd = Currency::new("USD");
        assert_eq!(usd.as_str(), "USD");
        assert_eq!(usd.to_string(), "USD");
        assert!(!usd.is_empty());
        assert!(Currency::new("").is_empty());
    }

    #[test]
    fn test_currency_is_open_set() {
        // No closed list: unusual codes are distinct balance columns
        assert_ne!(Currency::new("XAU"), Currency::new("USD"));
        assert_eq!(Currency::new("EUR"), Currency::new("EUR"));
    }
}
