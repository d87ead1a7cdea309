//! Gauge weight controller.
//!
//! Keeps the registry of gauge types and gauges, turns vote-escrow voting
//! power into per-gauge weights, and answers which share of emission each
//! gauge receives in a given week. Weight changes always take effect at the
//! next week boundary.

pub mod constants;
pub mod controller;
pub mod error;
pub mod history;
pub mod state;

pub use constants::*;
pub use controller::GaugeController;
pub use error::GaugeControllerError;
pub use history::{TypeWeightHistory, WeightHistory};
pub use state::{ControllerEvent, TypeId, VotedSlope, WeightPoint};
