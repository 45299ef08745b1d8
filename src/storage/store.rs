// WalletStore - Persistent key-value storage using sled
//
// Provides typed access for storing:
// - The settled balance
// - The ordered ledger entry list
// - The PIN hash (its presence means "PIN set")

use crate::ledger::PendingEntry;
use rust_decimal::Decimal;
use sled::transaction::{ConflictableTransactionResult, TransactionError};
use std::path::Path;
use thiserror::Error;

/// Keys for the wallet's values
mod keys {
    pub const SETTLED_BALANCE: &[u8] = b"wallet:settled_balance";
    pub const PENDING_ENTRIES: &[u8] = b"wallet:pending_entries";
    pub const APP_PIN: &[u8] = b"wallet:app_pin";
}

/// Errors from storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    OpenFailed(String),

    #[error("Database operation failed: {0}")]
    DatabaseError(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Flush failed: {0}")]
    FlushFailed(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::DatabaseError(err.to_string())
    }
}

/// Statistics about the storage
#[derive(Clone, Debug)]
pub struct StorageStats {
    /// Number of keys in the database
    pub key_count: usize,
    /// Approximate disk size in bytes
    pub disk_size_bytes: u64,
}

/// Persistent key-value store for wallet data
///
/// Uses sled for crash-safe, embedded storage.
/// All writes are atomic and durable after flush.
pub struct WalletStore {
    db: sled::Db,
}

impl WalletStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Ok(Self { db })
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.db.is_empty())
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::FlushFailed(e.to_string()))?;
        Ok(())
    }

    /// Get storage statistics
    pub fn stats(&self) -> Result<StorageStats, StoreError> {
        Ok(StorageStats {
            key_count: self.db.len(),
            disk_size_bytes: self.db.size_on_disk().unwrap_or(0),
        })
    }

    // ========================================================================
    // RAW KEY-VALUE OPERATIONS
    // ========================================================================

    /// Put raw bytes
    pub fn put_raw(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.db.insert(key, value)?;
        Ok(())
    }

    /// Get raw bytes
    pub fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    /// Delete a key
    pub fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.db.remove(key)?;
        Ok(())
    }

    // ========================================================================
    // SETTLED BALANCE
    // ========================================================================

    pub fn has_settled_balance(&self) -> Result<bool, StoreError> {
        Ok(self.db.contains_key(keys::SETTLED_BALANCE)?)
    }

    /// Save the settled balance on its own
    pub fn save_settled_balance(&self, balance: Decimal) -> Result<(), StoreError> {
        self.put_raw(keys::SETTLED_BALANCE, &balance.serialize())
    }

    /// Load the settled balance
    pub fn load_settled_balance(&self) -> Result<Option<Decimal>, StoreError> {
        match self.get_raw(keys::SETTLED_BALANCE)? {
            Some(bytes) => {
                let raw: [u8; 16] = bytes.as_slice().try_into().map_err(|_| {
                    StoreError::DeserializationFailed("Invalid settled balance length".to_string())
                })?;
                Ok(Some(Decimal::deserialize(raw)))
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // LEDGER ENTRIES
    // ========================================================================

    /// Save the full entry list
    pub fn save_entries(&self, entries: &[PendingEntry]) -> Result<(), StoreError> {
        let bytes = encode_entries(entries)?;
        self.put_raw(keys::PENDING_ENTRIES, &bytes)
    }

    /// Load the full entry list
    pub fn load_entries(&self) -> Result<Option<Vec<PendingEntry>>, StoreError> {
        match self.get_raw(keys::PENDING_ENTRIES)? {
            Some(bytes) => {
                let entries = postcard::from_bytes(&bytes)
                    .map_err(|e| StoreError::DeserializationFailed(e.to_string()))?;
                Ok(Some(entries))
            }
            None => Ok(None),
        }
    }

    /// Write the settled balance and the entry list in one transaction
    pub fn commit_state(&self, settled_balance: Decimal, entries: &[PendingEntry]) -> Result<(), StoreError> {
        let balance_bytes = settled_balance.serialize();
        let entry_bytes = encode_entries(entries)?;

        self.db
            .transaction(|tx| -> ConflictableTransactionResult<()> {
                tx.insert(keys::SETTLED_BALANCE, &balance_bytes[..])?;
                tx.insert(keys::PENDING_ENTRIES, entry_bytes.as_slice())?;
                Ok(())
            })
            .map_err(|e: TransactionError<()>| match e {
                TransactionError::Abort(()) => {
                    StoreError::DatabaseError("transaction aborted".to_string())
                }
                TransactionError::Storage(err) => StoreError::from(err),
            })?;
        Ok(())
    }

    // ========================================================================
    // PIN
    // ========================================================================

    pub fn has_pin(&self) -> Result<bool, StoreError> {
        Ok(self.db.contains_key(keys::APP_PIN)?)
    }

    pub fn save_pin_hash(&self, hash: &str) -> Result<(), StoreError> {
        self.put_raw(keys::APP_PIN, hash.as_bytes())
    }

    pub fn load_pin_hash(&self) -> Result<Option<String>, StoreError> {
        match self.get_raw(keys::APP_PIN)? {
            Some(bytes) => {
                let hash = String::from_utf8(bytes)
                    .map_err(|e| StoreError::DeserializationFailed(e.to_string()))?;
                Ok(Some(hash))
            }
            None => Ok(None),
        }
    }

    /// Raw key names, for inspection and fault injection in tests
    pub fn settled_balance_key() -> &'static [u8] {
        keys::SETTLED_BALANCE
    }

    pub fn entries_key() -> &'static [u8] {
        keys::PENDING_ENTRIES
    }

    pub fn pin_key() -> &'static [u8] {
        keys::APP_PIN
    }
}

fn encode_entries(entries: &[PendingEntry]) -> Result<Vec<u8>, StoreError> {
    postcard::to_allocvec(entries).map_err(|e| StoreError::SerializationFailed(e.to_string()))
}
