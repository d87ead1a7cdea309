//! Redirection of minted emission.
//!
//! `VestingLedger` holds emission that releases linearly over a fixed
//! duration. `RewardRouter` decides per account whether a payout goes out
//! directly, into vesting, or back into the account's vote-escrow lock.

pub mod error;
pub mod ledger;
pub mod router;
pub mod state;

pub use error::VestingError;
pub use ledger::VestingLedger;
pub use router::RewardRouter;
pub use state::{Payout, RewardMode, VestingEvent, VestingRecord, VestingTranche};
