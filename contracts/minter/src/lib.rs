//! Emission integrator.
//!
//! Converts the global, per-epoch decaying emission rate into per-gauge
//! integrals of emission per unit of stake, and settles each depositor's
//! share when it claims.

pub mod error;
pub mod math;
pub mod minter;
pub mod schedule;
pub mod stake;
pub mod state;

pub use error::MinterError;
pub use minter::{Minter, Payees};
pub use schedule::EmissionSchedule;
pub use stake::StakeAccounting;
pub use state::{GaugeIntegral, MintReceipt, MinterEvent, UserAccrual};
