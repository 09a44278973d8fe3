//! Main ledger orchestration layer
//!
//! Ties storage, metrics, and configuration together into the operations
//! the serving layer calls: `transfer`, `append_block`, `register_key`,
//! `list_keys`, plus administrative funding and read accessors.
//!
//! # Example
//!
//! ```no_run
//! use payrail_ledger::{AccountId, Config, Currency, Ledger};
//! use rust_decimal::Decimal;
//!
//! fn main() -> payrail_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default())?;
//!     let usd = Currency::new("USD");
//!
//!     ledger.credit(AccountId::new(1), &usd, Decimal::from(100))?;
//!     ledger.transfer(AccountId::new(1), AccountId::new(2), &usd, Decimal::from(30))?;
//!
//!     Ok(())
//! }
//! ```

use crate::{
    metrics::Metrics,
    storage::{self, BalanceRecord, BlockRecord, KeyRecord, Storage},
    types::{AccountId, AccountKey, Block, Currency},
    Config, Error, Result,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;

/// Scheme identifiers longer than one length byte cannot be encoded
const MAX_SCHEME_LEN: usize = u8::MAX as usize;

/// Main ledger interface
///
/// Cheap to share behind an `Arc`; all operations take `&self` and are
/// safe to call from any number of threads concurrently.
pub struct Ledger {
    /// Transactional storage
    storage: Arc<Storage>,

    /// Prometheus metrics
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    pub fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let metrics =
            Metrics::new().map_err(|e| Error::Other(format!("metrics init failed: {}", e)))?;

        Ok(Self {
            storage,
            metrics,
            config,
        })
    }

    /// Atomically move `amount` of `currency` from `sender` to `receiver`.
    ///
    /// Validation happens before any row is touched: the parties must
    /// differ, the amount must be positive, the currency must be
    /// non-empty, and the sender must cover the amount (a missing sender
    /// row reads as zero and fails the sufficiency check, it is not a
    /// distinct not-found error). The receiver row is created at `amount`
    /// if absent; the sender row is never auto-created.
    pub fn transfer(
        &self,
        sender: AccountId,
        receiver: AccountId,
        currency: &Currency,
        amount: Decimal,
    ) -> Result<()> {
        if sender == receiver {
            return Err(Error::InvalidArgument(
                "transfer sender and receiver must differ".to_string(),
            ));
        }
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidArgument(
                "transfer amount must be positive".to_string(),
            ));
        }
        if currency.is_empty() {
            return Err(Error::InvalidArgument(
                "transfer currency must not be empty".to_string(),
            ));
        }

        let started = Instant::now();
        let sender_key = storage::balance_key(sender, currency);
        let receiver_key = storage::balance_key(receiver, currency);

        self.storage.with_write_txn("transfer", |txn| {
            // Both rows are locked in encoded-key order; reciprocal
            // concurrent transfers therefore cannot deadlock.
            let (sender_record, receiver_record) = if sender_key <= receiver_key {
                let s = self.storage.balance_for_update(txn, &sender_key)?;
                let r = self.storage.balance_for_update(txn, &receiver_key)?;
                (s, r)
            } else {
                let r = self.storage.balance_for_update(txn, &receiver_key)?;
                let s = self.storage.balance_for_update(txn, &sender_key)?;
                (s, r)
            };

            let available = sender_record
                .as_ref()
                .map(|record| record.balance)
                .unwrap_or(Decimal::ZERO);
            if available < amount {
                return Err(Error::InsufficientFunds {
                    account: sender,
                    currency: currency.clone(),
                    available,
                    requested: amount,
                });
            }

            let credited = receiver_record
                .as_ref()
                .map(|record| record.balance)
                .unwrap_or(Decimal::ZERO)
                .checked_add(amount)
                .ok_or_else(|| {
                    Error::InvalidArgument("transfer amount overflows receiver balance".to_string())
                })?;

            let now = Utc::now();
            self.storage.put_balance(
                txn,
                &sender_key,
                &BalanceRecord {
                    balance: available - amount,
                    updated_at: now,
                },
            )?;
            self.storage.put_balance(
                txn,
                &receiver_key,
                &BalanceRecord {
                    balance: credited,
                    updated_at: now,
                },
            )?;
            Ok(())
        })?;

        self.metrics.record_transfer();
        self.metrics
            .observe_op("transfer", started.elapsed().as_secs_f64());
        tracing::debug!(%sender, %receiver, %currency, %amount, "transfer applied");

        Ok(())
    }

    /// Administrative funding: credit `amount` of `currency` to `account`,
    /// creating the balance row if absent. Returns the new balance.
    ///
    /// This is how balances enter the system; it is not reachable through
    /// the transfer surface.
    pub fn credit(
        &self,
        account: AccountId,
        currency: &Currency,
        amount: Decimal,
    ) -> Result<Decimal> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidArgument(
                "credit amount must be positive".to_string(),
            ));
        }
        if currency.is_empty() {
            return Err(Error::InvalidArgument(
                "credit currency must not be empty".to_string(),
            ));
        }

        let started = Instant::now();
        let key = storage::balance_key(account, currency);

        let balance = self.storage.with_write_txn("credit", |txn| {
            let current = self
                .storage
                .balance_for_update(txn, &key)?
                .map(|record| record.balance)
                .unwrap_or(Decimal::ZERO);
            let next = current.checked_add(amount).ok_or_else(|| {
                Error::InvalidArgument("credit amount overflows balance".to_string())
            })?;
            self.storage.put_balance(
                txn,
                &key,
                &BalanceRecord {
                    balance: next,
                    updated_at: Utc::now(),
                },
            )?;
            Ok(next)
        })?;

        self.metrics
            .observe_op("credit", started.elapsed().as_secs_f64());
        tracing::debug!(%account, %currency, %amount, %balance, "balance credited");

        Ok(balance)
    }

    /// Append a payload to the block log, returning the assigned id.
    ///
    /// Ids are drawn from a row-locked head counter: assignment is
    /// totally ordered across concurrent callers and the resulting
    /// sequence is contiguous, starting at 1.
    pub fn append_block(&self, payload: &[u8]) -> Result<u64> {
        if payload.is_empty() {
            return Err(Error::InvalidArgument(
                "block payload must not be empty".to_string(),
            ));
        }

        let started = Instant::now();
        let id = self.storage.with_write_txn("append_block", |txn| {
            let id = self.storage.next_block_id(txn)?;
            self.storage.put_block(
                txn,
                id,
                &BlockRecord {
                    payload: payload.to_vec(),
                    created_at: Utc::now(),
                },
            )?;
            Ok(id)
        })?;

        self.metrics.record_block_append();
        self.metrics
            .observe_op("append_block", started.elapsed().as_secs_f64());
        tracing::debug!(id, payload_len = payload.len(), "block appended");

        Ok(id)
    }

    /// Register a public key for an account.
    ///
    /// The exact (account, scheme, public key) triple must be new; the
    /// same account may hold other keys under the same scheme, and the
    /// same key bytes may be registered under other schemes.
    pub fn register_key(&self, account: AccountId, scheme: &str, public_key: &[u8]) -> Result<()> {
        if scheme.is_empty() {
            return Err(Error::InvalidArgument(
                "key scheme must not be empty".to_string(),
            ));
        }
        if scheme.len() > MAX_SCHEME_LEN {
            return Err(Error::InvalidArgument(format!(
                "key scheme exceeds {} bytes",
                MAX_SCHEME_LEN
            )));
        }
        if public_key.is_empty() {
            return Err(Error::InvalidArgument(
                "public key must not be empty".to_string(),
            ));
        }

        let started = Instant::now();
        let key = storage::account_key_key(account, scheme, public_key);

        self.storage.with_write_txn("register_key", |txn| {
            if self.storage.account_key_for_update(txn, &key)?.is_some() {
                return Err(Error::AlreadyExists(format!(
                    "key already registered for account {} under scheme {}",
                    account, scheme
                )));
            }
            let seq = self.storage.next_key_seq(txn)?;
            self.storage.put_account_key(
                txn,
                &key,
                &KeyRecord {
                    seq,
                    registered_at: Utc::now(),
                },
            )?;
            Ok(())
        })?;

        self.metrics.record_key_registered();
        self.metrics
            .observe_op("register_key", started.elapsed().as_secs_f64());
        tracing::debug!(%account, scheme, "account key registered");

        Ok(())
    }

    /// List an account's registered keys, optionally restricted to one
    /// scheme, ordered by (scheme, registration order)
    pub fn list_keys(&self, account: AccountId, scheme: Option<&str>) -> Result<Vec<AccountKey>> {
        self.storage.list_account_keys(account, scheme)
    }

    /// Current balance for (account, currency), `None` when no row exists
    pub fn balance(&self, account: AccountId, currency: &Currency) -> Result<Option<Decimal>> {
        self.storage.get_balance(account, currency)
    }

    /// Get block by id
    pub fn block(&self, id: u64) -> Result<Option<Block>> {
        self.storage.get_block(id)
    }

    /// Highest assigned block id, 0 when the log is empty
    pub fn head_block_id(&self) -> Result<u64> {
        self.storage.head_block_id()
    }

    /// Metrics registry for this instance
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration the ledger was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_ledger() -> (Ledger, TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Ledger::open(config).unwrap(), temp_dir)
    }

    fn dec(value: i64) -> Decimal {
        Decimal::from(value)
    }

    #[test]
    fn test_transfer_moves_funds() {
        let (ledger, _temp) = test_ledger();
        let usd = Currency::new("USD");
        ledger.credit(AccountId::new(1), &usd, dec(100)).unwrap();

        ledger
            .transfer(AccountId::new(1), AccountId::new(2), &usd, dec(30))
            .unwrap();

        assert_eq!(
            ledger.balance(AccountId::new(1), &usd).unwrap(),
            Some(dec(70))
        );
        assert_eq!(
            ledger.balance(AccountId::new(2), &usd).unwrap(),
            Some(dec(30))
        );
    }

    #[test]
    fn test_transfer_autocreates_receiver() {
        let (ledger, _temp) = test_ledger();
        let eur = Currency::new("EUR");
        ledger.credit(AccountId::new(10), &eur, dec(50)).unwrap();

        ledger
            .transfer(AccountId::new(10), AccountId::new(11), &eur, dec(20))
            .unwrap();

        assert_eq!(
            ledger.balance(AccountId::new(10), &eur).unwrap(),
            Some(dec(30))
        );
        assert_eq!(
            ledger.balance(AccountId::new(11), &eur).unwrap(),
            Some(dec(20))
        );
    }

    #[test]
    fn test_transfer_rejects_self_transfer() {
        let (ledger, _temp) = test_ledger();
        let usd = Currency::new("USD");
        ledger.credit(AccountId::new(7), &usd, dec(10)).unwrap();

        let result = ledger.transfer(AccountId::new(7), AccountId::new(7), &usd, dec(1));
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(
            ledger.balance(AccountId::new(7), &usd).unwrap(),
            Some(dec(10))
        );
    }

    #[test]
    fn test_transfer_rejects_non_positive_amount() {
        let (ledger, _temp) = test_ledger();
        let usd = Currency::new("USD");
        ledger.credit(AccountId::new(7), &usd, dec(10)).unwrap();

        for amount in [dec(0), dec(-5)] {
            let result = ledger.transfer(AccountId::new(7), AccountId::new(8), &usd, amount);
            assert!(matches!(result, Err(Error::InvalidArgument(_))));
        }
        assert_eq!(
            ledger.balance(AccountId::new(7), &usd).unwrap(),
            Some(dec(10))
        );
        assert_eq!(ledger.balance(AccountId::new(8), &usd).unwrap(), None);
    }

    #[test]
    fn test_transfer_rejects_empty_currency() {
        let (ledger, _temp) = test_ledger();
        let result = ledger.transfer(
            AccountId::new(7),
            AccountId::new(8),
            &Currency::new(""),
            dec(1),
        );
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_transfer_insufficient_funds() {
        let (ledger, _temp) = test_ledger();
        let gbp = Currency::new("GBP");
        ledger.credit(AccountId::new(20), &gbp, dec(10)).unwrap();

        let result = ledger.transfer(AccountId::new(20), AccountId::new(21), &gbp, dec(20));
        match result {
            Err(Error::InsufficientFunds {
                available,
                requested,
                ..
            }) => {
                assert_eq!(available, dec(10));
                assert_eq!(requested, dec(20));
            }
            other => panic!("expected InsufficientFunds, got {:?}", other),
        }

        // No partial effect
        assert_eq!(
            ledger.balance(AccountId::new(20), &gbp).unwrap(),
            Some(dec(10))
        );
        assert_eq!(ledger.balance(AccountId::new(21), &gbp).unwrap(), None);
    }

    #[test]
    fn test_transfer_missing_sender_reads_as_insufficient() {
        let (ledger, _temp) = test_ledger();
        let usd = Currency::new("USD");

        let result = ledger.transfer(AccountId::new(1), AccountId::new(2), &usd, dec(5));
        match result {
            Err(Error::InsufficientFunds { available, .. }) => {
                assert_eq!(available, Decimal::ZERO);
            }
            other => panic!("expected InsufficientFunds, got {:?}", other),
        }
        // The sender row was not auto-created by the failed attempt
        assert_eq!(ledger.balance(AccountId::new(1), &usd).unwrap(), None);
        assert_eq!(ledger.balance(AccountId::new(2), &usd).unwrap(), None);
    }

    #[test]
    fn test_transfer_per_currency_isolation() {
        let (ledger, _temp) = test_ledger();
        let usd = Currency::new("USD");
        let eur = Currency::new("EUR");
        ledger.credit(AccountId::new(1), &usd, dec(100)).unwrap();
        ledger.credit(AccountId::new(1), &eur, dec(40)).unwrap();

        ledger
            .transfer(AccountId::new(1), AccountId::new(2), &usd, dec(60))
            .unwrap();

        assert_eq!(
            ledger.balance(AccountId::new(1), &eur).unwrap(),
            Some(dec(40))
        );
        assert_eq!(ledger.balance(AccountId::new(2), &eur).unwrap(), None);
    }

    #[test]
    fn test_credit_accumulates() {
        let (ledger, _temp) = test_ledger();
        let usd = Currency::new("USD");

        assert_eq!(
            ledger.credit(AccountId::new(5), &usd, dec(25)).unwrap(),
            dec(25)
        );
        assert_eq!(
            ledger.credit(AccountId::new(5), &usd, dec(15)).unwrap(),
            dec(40)
        );
        assert_eq!(
            ledger.balance(AccountId::new(5), &usd).unwrap(),
            Some(dec(40))
        );
    }

    #[test]
    fn test_credit_rejects_bad_input() {
        let (ledger, _temp) = test_ledger();
        let usd = Currency::new("USD");

        assert!(matches!(
            ledger.credit(AccountId::new(5), &usd, dec(0)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            ledger.credit(AccountId::new(5), &Currency::new(""), dec(1)),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(ledger.balance(AccountId::new(5), &usd).unwrap(), None);
    }

    #[test]
    fn test_append_block_monotonic() {
        let (ledger, _temp) = test_ledger();

        let first = ledger.append_block(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
        let second = ledger.append_block(&[0xca, 0xfe, 0xba, 0xbe]).unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, first + 1);
        assert_eq!(ledger.head_block_id().unwrap(), second);

        let block = ledger.block(first).unwrap().unwrap();
        assert_eq!(block.id, first);
        assert_eq!(block.payload, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_append_block_rejects_empty_payload() {
        let (ledger, _temp) = test_ledger();

        let result = ledger.append_block(&[]);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(ledger.head_block_id().unwrap(), 0);
    }

    #[test]
    fn test_register_and_list_key() {
        let (ledger, _temp) = test_ledger();
        let public_key = [0xde, 0xad, 0xbe, 0xef].repeat(4);

        ledger
            .register_key(AccountId::new(42), "ed25519", &public_key)
            .unwrap();

        let keys = ledger.list_keys(AccountId::new(42), None).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].scheme, "ed25519");
        assert_eq!(keys[0].public_key, public_key);
    }

    #[test]
    fn test_register_duplicate_key_rejected() {
        let (ledger, _temp) = test_ledger();
        let public_key = [0xca, 0xfe, 0xba, 0xbe].repeat(4);

        ledger
            .register_key(AccountId::new(777), "ed25519", &public_key)
            .unwrap();
        let result = ledger.register_key(AccountId::new(777), "ed25519", &public_key);
        assert!(matches!(result, Err(Error::AlreadyExists(_))));

        assert_eq!(ledger.list_keys(AccountId::new(777), None).unwrap().len(), 1);
    }

    #[test]
    fn test_multiple_keys_per_account_and_scheme() {
        let (ledger, _temp) = test_ledger();
        let key_a = [0xaa, 0xbb, 0xcc, 0xdd].repeat(4);
        let key_b = [0xff, 0xee, 0xdd, 0xcc].repeat(4);

        ledger
            .register_key(AccountId::new(99), "ed25519", &key_a)
            .unwrap();
        ledger
            .register_key(AccountId::new(99), "ed25519", &key_b)
            .unwrap();

        let keys = ledger
            .list_keys(AccountId::new(99), Some("ed25519"))
            .unwrap();
        assert_eq!(keys.len(), 2);
        // Insertion order within a scheme
        assert_eq!(keys[0].public_key, key_a);
        assert_eq!(keys[1].public_key, key_b);
    }

    #[test]
    fn test_same_key_under_multiple_schemes() {
        let (ledger, _temp) = test_ledger();
        let public_key = [0x11, 0x22, 0x33, 0x44].repeat(4);

        ledger
            .register_key(AccountId::new(123), "ed25519", &public_key)
            .unwrap();
        ledger
            .register_key(AccountId::new(123), "secp256k1", &public_key)
            .unwrap();

        let schemes: Vec<String> = ledger
            .list_keys(AccountId::new(123), None)
            .unwrap()
            .into_iter()
            .map(|key| key.scheme)
            .collect();
        assert_eq!(schemes, vec!["ed25519", "secp256k1"]);
    }

    #[test]
    fn test_register_key_rejects_bad_input() {
        let (ledger, _temp) = test_ledger();

        assert!(matches!(
            ledger.register_key(AccountId::new(888), "", &[0xab; 16]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            ledger.register_key(AccountId::new(888), "ed25519", &[]),
            Err(Error::InvalidArgument(_))
        ));
        let oversized = "x".repeat(300);
        assert!(matches!(
            ledger.register_key(AccountId::new(888), &oversized, &[0xab; 16]),
            Err(Error::InvalidArgument(_))
        ));

        assert!(ledger.list_keys(AccountId::new(888), None).unwrap().is_empty());
    }

    #[test]
    fn test_list_keys_orders_by_scheme_then_insertion() {
        let (ledger, _temp) = test_ledger();

        ledger
            .register_key(AccountId::new(5), "secp256k1", &[0x01; 8])
            .unwrap();
        ledger
            .register_key(AccountId::new(5), "ed25519", &[0x02; 8])
            .unwrap();
        ledger
            .register_key(AccountId::new(5), "ed25519", &[0x03; 8])
            .unwrap();

        let keys = ledger.list_keys(AccountId::new(5), None).unwrap();
        let listed: Vec<(&str, &[u8])> = keys
            .iter()
            .map(|key| (key.scheme.as_str(), key.public_key.as_slice()))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("ed25519", &[0x02u8; 8][..]),
                ("ed25519", &[0x03u8; 8][..]),
                ("secp256k1", &[0x01u8; 8][..]),
            ]
        );
    }

    #[test]
    fn test_list_keys_does_not_leak_other_accounts() {
        let (ledger, _temp) = test_ledger();

        ledger
            .register_key(AccountId::new(1), "ed25519", &[0x01; 8])
            .unwrap();
        ledger
            .register_key(AccountId::new(2), "ed25519", &[0x02; 8])
            .unwrap();

        let keys = ledger.list_keys(AccountId::new(1), None).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].public_key, vec![0x01; 8]);
    }
}
