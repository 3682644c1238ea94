//! Limit Switch Example
//!
//! Homes the valve controller and then prints its latch register twice a
//! second, which is handy when adjusting the limit switches by hand.
//!
//! Usage:
//!   cargo run --example limit_switch -- /dev/ttyUSB1
//!   VALVE_PORT=/dev/ttyUSB1 cargo run --example limit_switch
//!
//! Set RUST_LOG environment variable to control logging:
//!   RUST_LOG=trace cargo run --example limit_switch -- /dev/ttyUSB1

use log::{error, info};
use sensorbox_serial::{ConnectionParams, HomingParams, Latches, MotionController, Result, RigError};
use std::thread;
use std::time::Duration;

fn describe(latches: Latches) -> String {
    let names = [
        (Latches::NEGATIVE_Y, "Y-"),
        (Latches::POSITIVE_Y, "Y+"),
        (Latches::NEGATIVE_X, "X-"),
        (Latches::POSITIVE_X, "X+"),
        (Latches::RESET, "reset"),
    ];
    let set: Vec<&str> = names
        .iter()
        .filter(|(bit, _)| latches.contains(*bit))
        .map(|(_, name)| *name)
        .collect();
    format!("{:2} [{}]", latches.bits(), set.join(" "))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let port = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("VALVE_PORT").ok())
        .ok_or_else(|| RigError::Config("pass a port or set VALVE_PORT".to_string()))?;

    info!("Connecting to valve controller on {}...", port);
    let mut controller = MotionController::connect(ConnectionParams::valve_controller(port))?;

    if let Err(e) = controller.reset_and_home(&HomingParams::default()) {
        error!("Homing failed ({:?}): {}", e.kind(), e);
        return Err(e);
    }
    info!("Homed, position {}", controller.get_position()?);

    loop {
        let latches = controller.get_latches()?;
        println!("{}", describe(latches));
        thread::sleep(Duration::from_millis(500));
    }
}
