//! Protocol constants for the sensor box devices.
//!
//! This module defines the opcodes of the stepper controller's ASCII command
//! set, the sentinel bytes on both links, and the default timings and serial
//! port settings observed on the deployed rig.

use std::time::Duration;

/// Acknowledge sentinel emitted by the stepper controller after every command
pub const ACK: u8 = b'*';

/// Terminator appended to every particle counter command
pub const TELEMETRY_TERMINATOR: &str = "\r\n";

/// Go to absolute position (`<value>G`)
pub const GOTO_CMD: char = 'G';

/// Redefine the current coordinate without moving (`<value>=`)
pub const SET_POSITION_CMD: char = '=';

/// Set run speed / acceleration profile (`<value>R`)
pub const RUN_SPEED_CMD: char = 'R';

/// Report latch register
pub const LATCHES_CMD: &str = "L";

/// Acknowledge once the motor has settled
pub const WAIT_IDLE_CMD: &str = "I";

/// Controller reset
pub const RESET_CMD: &str = "!";

/// Report positions of all axes
pub const POSITION_QUERY_CMD: &str = "-1?";

/// Field index of the axis of interest in a position report
pub const POSITION_FIELD: usize = 2;

/// Field index of the bitmask in a latch report
pub const LATCHES_FIELD: usize = 1;

/// Particle counter query returning the current measurement
pub const READ_CMD: &str = "read";

/// Particle counter query returning every value it tracks
pub const ALL_CMD: &str = "all";

/// Particle counter query returning its configuration
pub const SETTINGS_CMD: &str = "settings";

/// Default particle counter baud rate
pub const TELEMETRY_BAUD_RATE: u32 = 38400;

/// Default stepper controller baud rate
pub const MOTION_BAUD_RATE: u32 = 9600;

/// Default per-byte read timeout of an opened port
pub const DEFAULT_BYTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between sending a telemetry query and draining the answer
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Deadline for a single acknowledge
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Deadline for the controller to report idle after a move
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Rough travel between the -X and +X limit switches
pub const DEFAULT_TRAVEL_WIDTH: u32 = 2000;

/// Overshoot past the expected limit switch during homing
pub const HOMING_OVERSHOOT: u32 = 1000;

/// Coordinate assigned at the limit switch to absorb trigger backlash
pub const HOMING_BACKLASH_OFFSET: i32 = -100;

/// Slack allowed around the travel range for named positions
pub const POSITION_TOLERANCE: u32 = 100;

/// Acceleration the controller accepts when none is given (pulses/s/s)
pub const DEFAULT_RUN_SPEED: u32 = 800;

/// Acceleration applied by the three-way valve after homing (pulses/s/s)
pub const VALVE_RUN_SPEED: u32 = 3200;
