//! # Sensor Box Serial Library
//!
//! A Rust library for operating the sensor box rig over point-to-point serial
//! links: a mixing condensation particle counter that reports `key=value`
//! telemetry on demand, and a stepper controller driving a three-way valve
//! that must be homed against its limit switches before it can be positioned.
//!
//! ## Features
//!
//! - Byte transport with non-blocking drain and deadline-bounded pattern reads
//! - Telemetry queries parsed into ordered, all-or-nothing readings
//! - Stepper controller homing, acknowledged moves, idle waits and latch checks
//! - Named valve positions on top of the homed controller
//!
//! ## Example
//!
//! ```no_run
//! use sensorbox_serial::{ConnectionParams, ParticleCounter, ThreeWayValve};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut counter = ParticleCounter::connect(ConnectionParams::particle_counter("/dev/ttyUSB0"))?;
//!     let mut valve = ThreeWayValve::connect(ConnectionParams::valve_controller("/dev/ttyUSB1"))?;
//!
//!     valve.home()?;
//!     valve.open_b()?;
//!     let reading = counter.reading()?;
//!     println!("concentration: {:?}", reading.get("concent"));
//!     Ok(())
//! }
//! ```

pub mod constants;
pub mod error;
pub mod motion;
pub mod telemetry;
pub mod transport;
pub mod types;
pub mod valve;

#[cfg(test)]
mod mock;

pub use error::{ErrorKind, Result, RigError};
pub use motion::MotionController;
pub use telemetry::{parse_reading, ParticleCounter};
pub use transport::{Channel, Link};
pub use types::*;
pub use valve::{PositionTable, ThreeWayValve};
