use serde::{Deserialize, Serialize};

use gauge_controller::ControllerEvent;
use minter::MinterEvent;
use vesting::VestingEvent;
use voting_escrow::EscrowEvent;

/// Event emitted by a committed transaction, tagged with its component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineEvent {
    Escrow(EscrowEvent),
    Controller(ControllerEvent),
    Minter(MinterEvent),
    Vesting(VestingEvent),
}
