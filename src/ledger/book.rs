// Offline Ledger - durable settled balance plus pending entries
//
// Every mutation is a read-modify-write of the whole stored state under a
// single lock, so concurrent appends never overwrite each other and an entry
// is never folded into the settled balance twice.

use crate::ledger::entry::{Direction, PendingEntry};
use crate::ledger::pin;
use crate::ledger::state::LedgerState;
use crate::storage::{StoreError, WalletStore};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from ledger operations
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid amount: {0} (must be positive)")]
    InvalidAmount(Decimal),

    #[error("Stored balances overflow the decimal range")]
    BalanceOverflow,

    #[error("PIN must be exactly 4 digits")]
    InvalidPin,

    #[error("No PIN has been set")]
    PinNotSet,

    #[error("PIN hashing failed: {0}")]
    PinHash(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

// ============================================================================
// LEDGER CONFIG
// ============================================================================

/// Configuration for the offline ledger
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Settled balance reported before anything has been stored
    pub starting_allowance: Decimal,
    /// Flush to disk after every committed mutation
    pub flush_on_write: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            starting_allowance: Decimal::from(1000),
            flush_on_write: true,
        }
    }
}

impl LedgerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_starting_allowance(mut self, allowance: Decimal) -> Self {
        self.starting_allowance = allowance;
        self
    }

    pub fn with_flush_on_write(mut self, flush: bool) -> Self {
        self.flush_on_write = flush;
        self
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.starting_allowance.is_sign_negative() {
            return Err(LedgerError::InvalidConfig(
                "starting_allowance cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// OFFLINE LEDGER
// ============================================================================

pub struct OfflineLedger {
    store: WalletStore,
    config: LedgerConfig,
    write_lock: Mutex<()>,
}

impl OfflineLedger {
    /// Open or create a ledger backed by a store at `path`
    pub fn open<P: AsRef<Path>>(path: P, config: LedgerConfig) -> Result<Self, LedgerError> {
        let store = WalletStore::open(path)?;
        Self::with_store(store, config)
    }

    pub fn with_store(store: WalletStore, config: LedgerConfig) -> Result<Self, LedgerError> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            write_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &WalletStore {
        &self.store
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn flush_if_configured(&self) -> Result<(), LedgerError> {
        if self.config.flush_on_write {
            self.store.flush()?;
        }
        Ok(())
    }

    // ========================================================================
    // READS (degrade to defaults on unreadable storage)
    // ========================================================================

    fn read_settled_balance(&self) -> Decimal {
        match self.store.load_settled_balance() {
            Ok(Some(balance)) => balance,
            Ok(None) => self.config.starting_allowance,
            Err(e) => {
                warn!(error = %e, "settled balance unreadable, using starting allowance");
                self.config.starting_allowance
            }
        }
    }

    fn read_entries(&self) -> Vec<PendingEntry> {
        match self.store.load_entries() {
            Ok(Some(entries)) => entries,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "entry list unreadable, treating as empty");
                Vec::new()
            }
        }
    }

    fn read_state(&self) -> LedgerState {
        LedgerState::new(self.read_settled_balance(), self.read_entries())
    }

    /// Snapshot of the settled balance and every entry.
    ///
    /// Taken under the ledger lock so both keys come from the same commit.
    pub fn state(&self) -> LedgerState {
        let _guard = self.lock();
        self.read_state()
    }

    /// Durable settled balance, or the starting allowance if never stored
    pub fn settled_balance(&self) -> Decimal {
        self.read_settled_balance()
    }

    /// Settled balance adjusted by every still-pending entry
    pub fn available_balance(&self) -> Result<Decimal, LedgerError> {
        self.state()
            .available_balance()
            .ok_or(LedgerError::BalanceOverflow)
    }

    /// All entries in insertion order, settled ones included
    pub fn entries(&self) -> Vec<PendingEntry> {
        self.read_entries()
    }

    pub fn pending_entries(&self) -> Vec<PendingEntry> {
        self.read_entries()
            .into_iter()
            .filter(PendingEntry::is_pending)
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.state().pending_count()
    }

    // ========================================================================
    // MUTATIONS
    // ========================================================================

    /// Append a new Pending entry. The settled balance is untouched.
    ///
    /// Amounts that could push a balance out of the decimal range are
    /// rejected as `InvalidAmount`.
    pub fn add_pending_entry(
        &self,
        amount: Decimal,
        direction: Direction,
    ) -> Result<PendingEntry, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let _guard = self.lock();
        let mut state = self.read_state();
        if !state.admits(amount, direction) {
            warn!(%amount, %direction, "entry would overflow the balance, rejected");
            return Err(LedgerError::InvalidAmount(amount));
        }

        let entry = PendingEntry::new(amount, direction);
        state.push(entry.clone());
        self.store.save_entries(state.entries())?;
        self.flush_if_configured()?;

        debug!(id = %entry.id(), %amount, %direction, "pending entry added");
        Ok(entry)
    }

    /// Fold every pending entry into the settled balance as one batch.
    ///
    /// Works on a snapshot taken under the ledger lock; the new balance and the
    /// flipped statuses are committed in a single store transaction. Returns
    /// the number of entries settled (0 if nothing was pending).
    pub fn settle(&self) -> Result<usize, LedgerError> {
        let _guard = self.lock();
        let mut state = self.read_state();

        let count = state
            .settle_pending()
            .ok_or(LedgerError::BalanceOverflow)?;
        if count == 0 {
            debug!("nothing to settle");
            return Ok(0);
        }

        let settled_balance = state.settled_balance();
        self.store.commit_state(settled_balance, state.entries())?;
        self.flush_if_configured()?;

        info!(count, %settled_balance, "settled pending entries");
        Ok(count)
    }

    /// Write an initial settled balance. Returns false if one is already stored.
    pub fn provision(&self, balance: Decimal) -> Result<bool, LedgerError> {
        if balance.is_sign_negative() {
            return Err(LedgerError::InvalidAmount(balance));
        }

        let _guard = self.lock();
        if self.store.has_settled_balance()? {
            return Ok(false);
        }
        let mut provisioned = LedgerState::new(balance, self.read_entries());
        if provisioned.available_balance().is_none() || provisioned.settle_pending().is_none() {
            return Err(LedgerError::InvalidAmount(balance));
        }
        self.store.save_settled_balance(balance)?;
        self.flush_if_configured()?;

        info!(%balance, "settled balance provisioned");
        Ok(true)
    }

    // ========================================================================
    // PIN
    // ========================================================================

    pub fn is_pin_set(&self) -> bool {
        match self.store.has_pin() {
            Ok(set) => set,
            Err(e) => {
                warn!(error = %e, "pin key unreadable");
                false
            }
        }
    }

    /// Store a new PIN. Only `pin::PIN_LENGTH` ASCII digits are accepted.
    pub fn set_pin(&self, pin: &str) -> Result<(), LedgerError> {
        let hash = pin::hash_pin(pin)?;

        let _guard = self.lock();
        self.store.save_pin_hash(&hash)?;
        self.flush_if_configured()?;

        info!("pin updated");
        Ok(())
    }

    /// Exact match against the stored PIN.
    ///
    /// `Ok(false)` on mismatch, `Err(LedgerError::PinNotSet)` when no PIN exists.
    pub fn verify_pin(&self, candidate: &str) -> Result<bool, LedgerError> {
        let stored = self.store.load_pin_hash()?.ok_or(LedgerError::PinNotSet)?;
        match pin::verify_pin_hash(candidate, &stored) {
            Ok(matched) => Ok(matched),
            Err(e) => {
                warn!(error = %e, "stored pin hash unreadable, rejecting");
                Ok(false)
            }
        }
    }
}
