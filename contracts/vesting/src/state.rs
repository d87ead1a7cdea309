use serde::{Deserialize, Serialize};
use voting_escrow::Address;

/// One credit, released linearly from its own `start_time`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VestingTranche {
    pub amount: u128,
    pub start_time: u64,
}

/// Vesting schedule of one account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VestingRecord {
    pub total_locked: u128,
    pub total_claimed: u128,
    /// Fully released tranches folded out of `tranches`
    pub matured: u128,
    /// Still releasing, ordered by start time
    pub tranches: Vec<VestingTranche>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewardMode {
    /// Vest when vesting is configured, otherwise pay out directly
    #[default]
    Standard,
    /// Add payouts to the account's lock
    Compound,
}

/// Where a routed amount ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payout {
    Direct { amount: u128 },
    Vested { amount: u128 },
    Compounded { amount: u128 },
}

impl Payout {
    pub fn amount(&self) -> u128 {
        match *self {
            Payout::Direct { amount } | Payout::Vested { amount } | Payout::Compounded { amount } => {
                amount
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VestingEvent {
    Locked {
        account: Address,
        amount: u128,
        timestamp: u64,
    },
    Released {
        account: Address,
        amount: u128,
        timestamp: u64,
    },
    CompoundRegistered {
        account: Address,
    },
    CompoundUnregistered {
        account: Address,
    },
}
