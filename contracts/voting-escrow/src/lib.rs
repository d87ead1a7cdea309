//! Vote-escrow lock ledger.
//!
//! Accounts lock tokens until a week-aligned unlock time and receive voting
//! power that decays linearly to zero at unlock. Every mutation appends a
//! point to the account history and to the global history, so voting power
//! can be reconstructed for any past timestamp.

pub mod constants;
pub mod error;
pub mod escrow;
pub mod state;

pub use constants::*;
pub use error::VotingEscrowError;
pub use escrow::VotingEscrow;
pub use state::{Address, DepositKind, EscrowEvent, GaugeId, LockedBalance, Point};

/// Return early with the given error when a precondition does not hold.
#[macro_export]
macro_rules! require {
    ($cond:expr, $err:expr $(,)?) => {
        if !($cond) {
            return Err($err.into());
        }
    };
}

/// Round a timestamp down to the start of its week.
pub fn round_to_week(timestamp: u64) -> u64 {
    timestamp / WEEK * WEEK
}
