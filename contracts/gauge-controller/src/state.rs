use primitive_types::U256;
use serde::{Deserialize, Serialize};
use voting_escrow::{Address, GaugeId};

pub type TypeId = usize;

/// Weight of a gauge (or sum of a type) at a week boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightPoint {
    pub bias: u128,
    pub slope: u128,
}

/// One account's vote on one gauge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotedSlope {
    pub slope: u128,
    pub power: u64, // bps
    pub end: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerEvent {
    AddType {
        name: String,
        type_id: TypeId,
    },
    NewTypeWeight {
        type_id: TypeId,
        time: u64,
        weight: u128,
        total_weight: U256,
    },
    NewGauge {
        gauge: GaugeId,
        gauge_type: TypeId,
        weight: u128,
    },
    NewGaugeWeight {
        gauge: GaugeId,
        time: u64,
        weight: u128,
        total_weight: U256,
    },
    VoteForGauge {
        time: u64,
        user: Address,
        gauge: GaugeId,
        weight: u64,
    },
}
