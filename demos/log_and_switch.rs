//! Log and Switch Example
//!
//! This example is the rig's default acquisition loop:
//! - Connects to the particle counter and the valve controller
//! - Homes the valve and starts on port A
//! - Samples the counter every sampling period and prints CSV rows
//! - Toggles the valve between A and B every valve period
//!
//! Configuration comes from environment variables:
//!   MCPC_PORT (required), MCPC_BAUD (38400)
//!   VALVE_PORT (required), VALVE_BAUD (9600)
//!   VALVE_PERIOD seconds (10), SAMPLING_PERIOD seconds (1)
//!
//! Usage:
//!   MCPC_PORT=/dev/ttyUSB0 VALVE_PORT=/dev/ttyUSB1 cargo run --example log_and_switch > data.csv
//!
//! Set RUST_LOG environment variable to control logging:
//!   RUST_LOG=debug cargo run --example log_and_switch

use log::{info, warn};
use sensorbox_serial::constants::{MOTION_BAUD_RATE, TELEMETRY_BAUD_RATE};
use sensorbox_serial::valve::{PORT_A, PORT_B};
use sensorbox_serial::{ConnectionParams, ParticleCounter, Result, RigError, ThreeWayValve};
use std::thread;
use std::time::{Duration, Instant};

fn env_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| RigError::Config(format!("required environment variable {name} is not set")))
}

fn env_number<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| RigError::Config(format!("{name}={value:?} is not a number"))),
        Err(_) => Ok(default),
    }
}

fn csv_row<'a>(fields: impl Iterator<Item = &'a str>) -> String {
    fields.collect::<Vec<_>>().join(",")
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mcpc_params = ConnectionParams::particle_counter(env_var("MCPC_PORT")?)
        .baud_rate(env_number("MCPC_BAUD", TELEMETRY_BAUD_RATE)?);
    let valve_params = ConnectionParams::valve_controller(env_var("VALVE_PORT")?)
        .baud_rate(env_number("VALVE_BAUD", MOTION_BAUD_RATE)?);
    let valve_period = Duration::from_secs(env_number("VALVE_PERIOD", 10u64)?);
    let sampling_period = Duration::from_secs(env_number("SAMPLING_PERIOD", 1u64)?);

    info!("Connecting to particle counter on {}...", mcpc_params.port);
    let mut counter = ParticleCounter::connect(mcpc_params)?;
    info!("Connecting to valve on {}...", valve_params.port);
    let mut valve = ThreeWayValve::connect(valve_params)?;
    valve.home()?;

    // Header comes from the field names of a first reading
    let first = counter.reading()?;
    println!("{}", csv_row(["timestamp", "valve"].into_iter().chain(first.keys())));

    valve.open_a()?;
    let mut valve_state = PORT_A;
    let mut valve_start = Instant::now();

    loop {
        match counter.reading() {
            Ok(reading) => {
                let timestamp = reading.received_at.to_rfc3339();
                let row = [timestamp.as_str(), valve_state]
                    .into_iter()
                    .chain(reading.values());
                println!("{}", csv_row(row));
            }
            Err(e) => warn!("Skipping sample: {}", e),
        }

        if valve_start.elapsed() > valve_period {
            valve_state = if valve_state == PORT_A { PORT_B } else { PORT_A };
            valve.goto_named(valve_state)?;
            info!("Valve switched to {}", valve_state);
            valve_start = Instant::now();
        }
        thread::sleep(sampling_period);
    }
}
