// Ledger State - settled balance plus the ordered entry list

use crate::ledger::entry::{Direction, PendingEntry};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Snapshot of everything the ledger stores
///
/// Invariant: `available_balance() == settled_balance + Σ credits − Σ debits`
/// over entries that are still Pending.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    settled_balance: Decimal,
    entries: Vec<PendingEntry>,
}

impl LedgerState {
    pub fn new(settled_balance: Decimal, entries: Vec<PendingEntry>) -> Self {
        Self {
            settled_balance,
            entries,
        }
    }

    pub fn settled_balance(&self) -> Decimal {
        self.settled_balance
    }

    /// All entries in insertion order, settled ones included
    pub fn entries(&self) -> &[PendingEntry] {
        &self.entries
    }

    /// Entries still awaiting settlement, in insertion order
    pub fn pending(&self) -> impl Iterator<Item = &PendingEntry> {
        self.entries.iter().filter(|e| e.is_pending())
    }

    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    /// Net signed value of all pending entries, `None` on overflow
    pub fn pending_net(&self) -> Option<Decimal> {
        self.pending()
            .try_fold(Decimal::ZERO, |net, e| net.checked_add(e.signed_amount()))
    }

    /// Total of pending entries in one direction, `None` on overflow
    pub fn pending_total(&self, direction: Direction) -> Option<Decimal> {
        self.pending()
            .filter(|e| e.direction() == direction)
            .try_fold(Decimal::ZERO, |total, e| total.checked_add(e.amount()))
    }

    /// Settled balance adjusted by every pending entry, `None` on overflow
    pub fn available_balance(&self) -> Option<Decimal> {
        self.settled_balance.checked_add(self.pending_net()?)
    }

    /// Whether one more pending entry keeps every reachable balance representable.
    ///
    /// Every running total during settlement lies between `settled - Σ debits`
    /// and `settled + Σ credits`; both bounds must fit with the new entry counted.
    pub fn admits(&self, amount: Decimal, direction: Direction) -> bool {
        let credits = self.pending_total(Direction::Credit);
        let debits = self.pending_total(Direction::Debit);
        let (credits, debits) = match direction {
            Direction::Credit => (credits.and_then(|c| c.checked_add(amount)), debits),
            Direction::Debit => (credits, debits.and_then(|d| d.checked_add(amount))),
        };

        let high = credits.and_then(|c| self.settled_balance.checked_add(c));
        let low = debits.and_then(|d| self.settled_balance.checked_sub(d));
        high.is_some() && low.is_some()
    }

    pub fn push(&mut self, entry: PendingEntry) {
        self.entries.push(entry);
    }

    /// Fold every pending entry into the settled balance, in stored order.
    ///
    /// Returns how many entries were settled; already-settled entries are
    /// skipped. Returns `None` and leaves the state untouched if a running
    /// total overflows.
    pub fn settle_pending(&mut self) -> Option<usize> {
        let settled_balance = self
            .pending()
            .try_fold(self.settled_balance, |balance, e| {
                balance.checked_add(e.signed_amount())
            })?;

        let mut settled = 0;
        for entry in self.entries.iter_mut().filter(|e| e.is_pending()) {
            entry.mark_settled();
            settled += 1;
        }
        self.settled_balance = settled_balance;
        Some(settled)
    }
}
