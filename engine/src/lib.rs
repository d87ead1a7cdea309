//! Emission engine.
//!
//! Wires the vote-escrow lock ledger, the gauge controller, the minter and
//! the vesting layer into one transactional runtime. Contract crates are
//! pure state machines; this crate reads the clock, settles token
//! movements against a [`TokenLedger`] and rolls a transaction back when
//! any step of it fails.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod ledger;
pub mod memory;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ControllerConfig, EmissionConfig, EngineConfig, VestingConfig};
pub use engine::Engine;
pub use error::{EngineError, ErrorKind};
pub use event::EngineEvent;
pub use ledger::{LedgerError, TokenLedger};
pub use memory::{MemoryLedger, MemoryStakes};

pub use gauge_controller::TypeId;
pub use minter::{MintReceipt, StakeAccounting, UserAccrual};
pub use vesting::Payout;
pub use voting_escrow::{Address, GaugeId};
