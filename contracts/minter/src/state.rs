use serde::{Deserialize, Serialize};
use vesting::Payout;
use voting_escrow::{Address, GaugeId};

/// Emission per unit of stake accumulated by one gauge, scaled by
/// `WEIGHT_SCALE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GaugeIntegral {
    pub integral: u128,
    pub last_checkpoint: Option<u64>,
}

/// One depositor's position in a gauge's integral
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccrual {
    pub integral_snapshot: u128,
    pub accrued: u128, // Total ever earned
    pub minted: u128,  // Total ever paid out
}

impl UserAccrual {
    pub fn owed(&self) -> u128 {
        self.accrued.saturating_sub(self.minted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintReceipt {
    pub payout: Payout,
    pub total_minted: u128,
}

impl MintReceipt {
    pub fn amount(&self) -> u128 {
        self.payout.amount()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MinterEvent {
    Minted {
        recipient: Address,
        gauge: GaugeId,
        amount: u128,
        minted: u128,
        payout: Payout,
    },
    MiningParametersUpdated {
        time: u64,
        rate: u128,
        epoch: u64,
    },
}
