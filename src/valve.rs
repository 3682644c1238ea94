//! Named positions of a two-port switching valve.

use crate::constants::*;
use crate::error::{Result, RigError};
use crate::motion::MotionController;
use crate::transport::Link;
use crate::types::{ConnectionParams, HomingParams};
use log::debug;
use serialport::SerialPort;

pub const PORT_A: &str = "A";
pub const PORT_B: &str = "B";
pub const BOTH: &str = "both";

fn check_in_range(name: &str, coordinate: i64, travel_width: u32) -> Result<()> {
    let limit = u64::from(travel_width) + u64::from(POSITION_TOLERANCE);
    if coordinate.unsigned_abs() > limit {
        return Err(RigError::Config(format!(
            "position {name:?} at {coordinate} outside travel range ±{limit}"
        )));
    }
    Ok(())
}

/// Fixed mapping from position name to absolute controller coordinate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionTable {
    travel_width: u32,
    entries: Vec<(String, i64)>,
}

impl PositionTable {
    /// Build a table, checking every coordinate lies within the travel range
    /// (plus [`POSITION_TOLERANCE`]) of the homed zero.
    pub fn new<I, S>(travel_width: u32, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        let mut table: Vec<(String, i64)> = Vec::new();
        for (name, coordinate) in entries {
            let name = name.into();
            check_in_range(&name, coordinate, travel_width)?;
            if table.iter().any(|(existing, _)| *existing == name) {
                return Err(RigError::Config(format!("duplicate position {name:?}")));
            }
            table.push((name, coordinate));
        }
        Ok(PositionTable {
            travel_width,
            entries: table,
        })
    }

    /// Port A at zero, port B at full travel, both ports half way.
    pub fn three_way(travel_width: u32) -> Self {
        let width = i64::from(travel_width);
        PositionTable {
            travel_width,
            entries: vec![
                (PORT_A.to_string(), 0),
                (PORT_B.to_string(), width),
                (BOTH.to_string(), width / 2),
            ],
        }
    }

    pub fn travel_width(&self) -> u32 {
        self.travel_width
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, coordinate)| *coordinate)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }
}

/// Three-way valve driven by a stepper controller.
pub struct ThreeWayValve<L: Link = Box<dyn SerialPort>> {
    controller: MotionController<L>,
    positions: PositionTable,
    homing: HomingParams,
    run_speed: u32,
}

impl ThreeWayValve {
    /// Connect to the valve controller. The valve must be homed before use.
    pub fn connect(params: ConnectionParams) -> Result<Self> {
        Ok(Self::new(MotionController::connect(params)?))
    }
}

impl<L: Link> ThreeWayValve<L> {
    /// Valve with the default travel width and position table.
    pub fn new(controller: MotionController<L>) -> Self {
        let homing = HomingParams::default();
        let positions = PositionTable::three_way(homing.travel_width);
        ThreeWayValve {
            controller,
            positions,
            homing,
            run_speed: VALVE_RUN_SPEED,
        }
    }

    /// Valve with a custom table, which must fit the travel range the
    /// controller is homed over.
    pub fn with_positions(
        controller: MotionController<L>,
        positions: PositionTable,
        homing: HomingParams,
    ) -> Result<Self> {
        if positions.travel_width != homing.travel_width {
            return Err(RigError::Config(format!(
                "position table built for width {} but valve homes over {}",
                positions.travel_width, homing.travel_width
            )));
        }
        for (name, coordinate) in &positions.entries {
            check_in_range(name, *coordinate, homing.travel_width)?;
        }
        Ok(ThreeWayValve {
            controller,
            positions,
            homing,
            run_speed: VALVE_RUN_SPEED,
        })
    }

    /// Acceleration applied after homing
    pub fn set_run_speed(&mut self, speed: u32) {
        self.run_speed = speed;
    }

    pub fn positions(&self) -> &PositionTable {
        &self.positions
    }

    /// Home the controller, then apply the valve's acceleration profile.
    pub fn home(&mut self) -> Result<()> {
        self.controller.reset_and_home(&self.homing)?;
        self.controller.set_run_speed(self.run_speed)
    }

    /// Start moving to a named position.
    pub fn goto_named(&mut self, name: &str) -> Result<()> {
        let coordinate = self
            .positions
            .get(name)
            .ok_or_else(|| RigError::Config(format!("unknown position {name:?}")))?;
        debug!("Valve to {name} ({coordinate})");
        self.controller.move_to(coordinate)
    }

    pub fn open_a(&mut self) -> Result<()> {
        self.goto_named(PORT_A)
    }

    pub fn open_b(&mut self) -> Result<()> {
        self.goto_named(PORT_B)
    }

    pub fn open_both(&mut self) -> Result<()> {
        self.goto_named(BOTH)
    }

    pub fn controller(&self) -> &MotionController<L> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut MotionController<L> {
        &mut self.controller
    }

    pub fn into_inner(self) -> MotionController<L> {
        self.controller
    }
}
