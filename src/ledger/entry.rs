// Pending entries - provisional money movements awaiting settlement

use chrono::{DateTime, SubsecRound, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier of a ledger entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Generate a fresh random ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which way the money moves
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Increases the available balance
    Credit,
    /// Decreases the available balance
    Debit,
}

impl Direction {
    /// Apply the direction's sign to an unsigned amount
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            Direction::Credit => amount,
            Direction::Debit => -amount,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Credit => write!(f, "credit"),
            Direction::Debit => write!(f, "debit"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    Pending,
    Settled,
}

/// A provisional credit or debit.
///
/// Created Pending, flipped to Settled exactly once by settlement, never
/// removed afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    id: EntryId,
    #[serde(with = "amount_bytes")]
    amount: Decimal,
    direction: Direction,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    created_at: DateTime<Utc>,
    status: EntryStatus,
}

impl PendingEntry {
    /// Create a new Pending entry stamped with the current time.
    /// The stamp is truncated to the millisecond precision it is stored at.
    pub fn new(amount: Decimal, direction: Direction) -> Self {
        Self {
            id: EntryId::generate(),
            amount,
            direction,
            created_at: Utc::now().trunc_subsecs(3),
            status: EntryStatus::Pending,
        }
    }

    pub fn id(&self) -> &EntryId {
        &self.id
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> EntryStatus {
        self.status
    }

    pub fn is_pending(&self) -> bool {
        self.status == EntryStatus::Pending
    }

    /// Amount with the direction's sign applied
    pub fn signed_amount(&self) -> Decimal {
        self.direction.signed(self.amount)
    }

    pub(crate) fn mark_settled(&mut self) {
        self.status = EntryStatus::Settled;
    }
}

/// Stores a decimal as its fixed 16-byte representation
mod amount_bytes {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(amount: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
        let bytes: [u8; 16] = amount.serialize();
        bytes.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        let bytes = <[u8; 16]>::deserialize(deserializer)?;
        Ok(Decimal::deserialize(bytes))
    }
}
