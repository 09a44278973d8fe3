//! Storage layer using RocksDB pessimistic transactions
//!
//! # Column Families
//!
//! - `balances` - (account_id, currency) -> balance record
//! - `blocks` - block id (big-endian u64) -> block record
//! - `account_keys` - (account_id, scheme, public_key) -> registration record
//! - `meta` - head counters (block head, key registration sequence)
//!
//! Writers go through [`Storage::with_write_txn`]: a pessimistic
//! transaction whose row locks are taken with `get_for_update`, re-run a
//! bounded number of times when the engine reports lock contention.
//! Dropping an uncommitted transaction rolls it back, so a failed
//! operation leaves no partial effect.

use crate::{
    config::Config,
    error::{Error, Result},
    types::{AccountId, AccountKey, Block, Currency},
};
use chrono::{DateTime, Utc};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    Transaction, TransactionDB, TransactionDBOptions, TransactionOptions, WriteOptions,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Column family names
const CF_BALANCES: &str = "balances";
const CF_BLOCKS: &str = "blocks";
const CF_ACCOUNT_KEYS: &str = "account_keys";
const CF_META: &str = "meta";

/// Meta keys
const META_BLOCK_HEAD: &[u8] = b"block_head";
const META_KEY_SEQ: &[u8] = b"key_seq";

/// Stored balance row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct BalanceRecord {
    pub balance: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Stored block row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct BlockRecord {
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Stored account key row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct KeyRecord {
    pub seq: u64,
    pub registered_at: DateTime<Utc>,
}

/// Encoded balance row key: account id (big-endian) then currency code.
/// Byte order over these keys is the fixed global lock order for
/// multi-row operations.
pub(crate) fn balance_key(account: AccountId, currency: &Currency) -> Vec<u8> {
    let code = currency.as_str().as_bytes();
    let mut key = Vec::with_capacity(8 + code.len());
    key.extend_from_slice(&account.value().to_be_bytes());
    key.extend_from_slice(code);
    key
}

/// Encoded block row key
pub(crate) fn block_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

/// Encoded account key row: account id, one scheme length byte, scheme
/// bytes, then the raw public key. The exact triple is the primary key,
/// which is what enforces its uniqueness.
pub(crate) fn account_key_key(account: AccountId, scheme: &str, public_key: &[u8]) -> Vec<u8> {
    debug_assert!(scheme.len() <= u8::MAX as usize);
    let mut key = Vec::with_capacity(8 + 1 + scheme.len() + public_key.len());
    key.extend_from_slice(&account.value().to_be_bytes());
    key.push(scheme.len() as u8);
    key.extend_from_slice(scheme.as_bytes());
    key.extend_from_slice(public_key);
    key
}

/// Split an account key row back into (scheme, public_key)
pub(crate) fn decode_account_key(key: &[u8]) -> Result<(String, Vec<u8>)> {
    if key.len() < 9 {
        return Err(Error::Storage("truncated account key row".to_string()));
    }
    let scheme_len = key[8] as usize;
    if key.len() < 9 + scheme_len {
        return Err(Error::Storage("truncated account key scheme".to_string()));
    }
    let scheme = std::str::from_utf8(&key[9..9 + scheme_len])
        .map_err(|_| Error::Storage("account key scheme is not UTF-8".to_string()))?
        .to_string();
    let public_key = key[9 + scheme_len..].to_vec();
    Ok((scheme, public_key))
}

/// Storage wrapper for the transactional RocksDB instance
pub struct Storage {
    db: TransactionDB,
    lock_timeout_ms: i64,
    deadlock_detect: bool,
    max_retries: u32,
}

impl Storage {
    /// Open or create the database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for write-heavy workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        let mut txn_db_opts = TransactionDBOptions::default();
        txn_db_opts.set_txn_lock_timeout(config.transactions.lock_timeout_ms);
        txn_db_opts.set_default_lock_timeout(config.transactions.lock_timeout_ms);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_BALANCES, Self::cf_options_balances()),
            ColumnFamilyDescriptor::new(CF_BLOCKS, Self::cf_options_blocks()),
            ColumnFamilyDescriptor::new(CF_ACCOUNT_KEYS, Self::cf_options_account_keys()),
            ColumnFamilyDescriptor::new(CF_META, Self::cf_options_meta()),
        ];

        let db = TransactionDB::open_cf_descriptors(&db_opts, &txn_db_opts, path, cf_descriptors)?;

        tracing::info!(path = %path.display(), "opened transactional ledger store");

        Ok(Self {
            db,
            lock_timeout_ms: config.transactions.lock_timeout_ms,
            deadlock_detect: config.transactions.deadlock_detect,
            max_retries: config.transactions.max_retries,
        })
    }

    // Column family options

    fn cf_options_balances() -> Options {
        let mut opts = Options::default();
        // Hot point lookups, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_blocks() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_account_keys() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Existence probes benefit from bloom filters
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_options_meta() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("column family {} not found", name)))
    }

    // Transactions

    fn begin(&self) -> Transaction<'_, TransactionDB> {
        let mut txn_opts = TransactionOptions::default();
        txn_opts.set_deadlock_detect(self.deadlock_detect);
        txn_opts.set_lock_timeout(self.lock_timeout_ms);
        self.db.transaction_opt(&WriteOptions::default(), &txn_opts)
    }

    /// Run `body` inside a pessimistic transaction, committing on success.
    ///
    /// Conflict-kind failures (lock timeout, write-write conflict) re-run
    /// the whole body up to the configured retry budget; every retry sees
    /// freshly re-read rows. Any other error aborts immediately, and the
    /// dropped transaction rolls back.
    pub(crate) fn with_write_txn<T, F>(&self, op: &'static str, body: F) -> Result<T>
    where
        F: Fn(&Transaction<'_, TransactionDB>) -> Result<T>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let txn = self.begin();

            match body(&txn) {
                Ok(value) => match txn.commit() {
                    Ok(()) => return Ok(value),
                    Err(err) => {
                        let err = Error::from(err);
                        if err.is_retryable() && attempt <= self.max_retries {
                            tracing::warn!(op, attempt, error = %err, "commit conflict, retrying");
                            continue;
                        }
                        return Err(err);
                    }
                },
                Err(err) if err.is_retryable() && attempt <= self.max_retries => {
                    tracing::warn!(op, attempt, error = %err, "transaction conflict, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    // Balance rows

    /// Read a balance row with an exclusive lock on it
    pub(crate) fn balance_for_update(
        &self,
        txn: &Transaction<'_, TransactionDB>,
        key: &[u8],
    ) -> Result<Option<BalanceRecord>> {
        let cf = self.cf_handle(CF_BALANCES)?;
        match txn.get_for_update_cf(cf, key, true)? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    /// Write a balance row inside the transaction
    pub(crate) fn put_balance(
        &self,
        txn: &Transaction<'_, TransactionDB>,
        key: &[u8],
        record: &BalanceRecord,
    ) -> Result<()> {
        let cf = self.cf_handle(CF_BALANCES)?;
        txn.put_cf(cf, key, bincode::serialize(record)?)?;
        Ok(())
    }

    /// Read a balance outside any caller transaction
    pub fn get_balance(&self, account: AccountId, currency: &Currency) -> Result<Option<Decimal>> {
        let cf = self.cf_handle(CF_BALANCES)?;
        match self.db.get_cf(cf, balance_key(account, currency))? {
            Some(raw) => {
                let record: BalanceRecord = bincode::deserialize(&raw)?;
                Ok(Some(record.balance))
            }
            None => Ok(None),
        }
    }

    // Block rows

    /// Assign the next block id, advancing the head counter under its
    /// exclusive row lock. The lock totally orders assignment, so ids
    /// stay contiguous under concurrent appends.
    pub(crate) fn next_block_id(&self, txn: &Transaction<'_, TransactionDB>) -> Result<u64> {
        let cf = self.cf_handle(CF_META)?;
        let head = Self::counter_for_update(txn, cf, META_BLOCK_HEAD)?;
        let id = head + 1;
        txn.put_cf(cf, META_BLOCK_HEAD, id.to_be_bytes())?;
        Ok(id)
    }

    /// Write a block row inside the transaction
    pub(crate) fn put_block(
        &self,
        txn: &Transaction<'_, TransactionDB>,
        id: u64,
        record: &BlockRecord,
    ) -> Result<()> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        txn.put_cf(cf, block_key(id), bincode::serialize(record)?)?;
        Ok(())
    }

    /// Get block by id
    pub fn get_block(&self, id: u64) -> Result<Option<Block>> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        match self.db.get_cf(cf, block_key(id))? {
            Some(raw) => {
                let record: BlockRecord = bincode::deserialize(&raw)?;
                Ok(Some(Block {
                    id,
                    payload: record.payload,
                    created_at: record.created_at,
                }))
            }
            None => Ok(None),
        }
    }

    /// Highest assigned block id, 0 when the log is empty
    pub fn head_block_id(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_META)?;
        match self.db.get_cf(cf, META_BLOCK_HEAD)? {
            Some(raw) => Self::decode_counter(&raw),
            None => Ok(0),
        }
    }

    // Account key rows

    /// Read an account key row with an exclusive lock on it
    pub(crate) fn account_key_for_update(
        &self,
        txn: &Transaction<'_, TransactionDB>,
        key: &[u8],
    ) -> Result<Option<KeyRecord>> {
        let cf = self.cf_handle(CF_ACCOUNT_KEYS)?;
        match txn.get_for_update_cf(cf, key, true)? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    /// Draw the next key registration sequence number
    pub(crate) fn next_key_seq(&self, txn: &Transaction<'_, TransactionDB>) -> Result<u64> {
        let cf = self.cf_handle(CF_META)?;
        let seq = Self::counter_for_update(txn, cf, META_KEY_SEQ)? + 1;
        txn.put_cf(cf, META_KEY_SEQ, seq.to_be_bytes())?;
        Ok(seq)
    }

    /// Write an account key row inside the transaction
    pub(crate) fn put_account_key(
        &self,
        txn: &Transaction<'_, TransactionDB>,
        key: &[u8],
        record: &KeyRecord,
    ) -> Result<()> {
        let cf = self.cf_handle(CF_ACCOUNT_KEYS)?;
        txn.put_cf(cf, key, bincode::serialize(record)?)?;
        Ok(())
    }

    /// List an account's keys, optionally filtered by scheme, ordered by
    /// (scheme, registration sequence)
    pub fn list_account_keys(
        &self,
        account: AccountId,
        scheme: Option<&str>,
    ) -> Result<Vec<AccountKey>> {
        let cf = self.cf_handle(CF_ACCOUNT_KEYS)?;
        let prefix = account.value().to_be_bytes();

        let mut found: Vec<(u64, AccountKey)> = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let (key_scheme, public_key) = decode_account_key(&key)?;
            if let Some(filter) = scheme {
                if key_scheme != filter {
                    continue;
                }
            }
            let record: KeyRecord = bincode::deserialize(&value)?;
            found.push((
                record.seq,
                AccountKey {
                    scheme: key_scheme,
                    public_key,
                    registered_at: record.registered_at,
                },
            ));
        }

        found.sort_by(|(a_seq, a), (b_seq, b)| a.scheme.cmp(&b.scheme).then(a_seq.cmp(b_seq)));
        Ok(found.into_iter().map(|(_, key)| key).collect())
    }

    // Counters

    fn counter_for_update(
        txn: &Transaction<'_, TransactionDB>,
        cf: &ColumnFamily,
        key: &[u8],
    ) -> Result<u64> {
        match txn.get_for_update_cf(cf, key, true)? {
            Some(raw) => Self::decode_counter(&raw),
            None => Ok(0),
        }
    }

    fn decode_counter(raw: &[u8]) -> Result<u64> {
        let bytes: [u8; 8] = raw
            .try_into()
            .map_err(|_| Error::Storage("malformed counter value".to_string()))?;
        Ok(u64::from_be_bytes(bytes))
    }
}
