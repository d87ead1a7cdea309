use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque account identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Address {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Gauges are addressed like accounts.
pub type GaugeId = Address;

/// Locked balance of one account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedBalance {
    pub amount: u128, // Locked token units
    pub end: u64,     // Week-aligned unlock time, 0 when nothing is locked
}

impl LockedBalance {
    pub fn is_active(&self, now: u64) -> bool {
        self.amount > 0 && self.end > now
    }
}

/// One vertex of a piecewise-linear voting power curve.
/// `bias` and `slope` are scaled by `VOTE_SCALE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub bias: i128,
    pub slope: i128, // -dweight / dt
    pub ts: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositKind {
    DepositFor,
    CreateLock,
    IncreaseLockAmount,
    IncreaseUnlockTime,
    LockFor,
}

/// Events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowEvent {
    Deposit {
        provider: Address,
        value: u128,
        locktime: u64,
        kind: DepositKind,
        timestamp: u64,
    },
    Withdraw {
        provider: Address,
        value: u128,
        timestamp: u64,
    },
    Supply {
        prev_supply: u128,
        supply: u128,
    },
}
