#![warn(missing_docs)]
//! Parking-simulation environment surface for parkrl.
//!
//! Wraps an agent-based traffic/parking simulator driven through a textual
//! scripting bridge: typed state vectors, named per-zone fee actions with
//! validity masks, and pluggable reward shaping. The bridge itself is an
//! external collaborator behind the [`SimulatorLink`] trait; a scripted
//! [`MockSimulator`] stands in for it in tests.
mod act;
mod base;
mod config;
mod link;
mod obs;
mod reward;

pub use act::{FeeActionSet, FeeChange};
pub use base::ParkingEnv;
pub use config::ParkingEnvConfig;
pub use link::{MockSimulator, MockSimulatorConfig, SimulatorLink};
pub use obs::{ParkingObs, ParkingState, ZoneState};
pub use reward::RewardFunction;

/// Priced zones of the simulation model, in report order.
pub const ZONES: [&str; 4] = ["yellow", "orange", "green", "blue"];
