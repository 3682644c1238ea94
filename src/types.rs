use crate::constants::*;
use crate::error::{Result, RigError};
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::time::Duration;

/// Text encoding used on a serial link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Utf8,
    Ascii,
}

impl Encoding {
    /// Decode received bytes, rejecting anything outside the encoding.
    pub fn decode(self, bytes: &[u8]) -> Result<String> {
        match self {
            Encoding::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|e| RigError::Protocol(format!("invalid utf-8 in response: {e}"))),
            Encoding::Ascii => {
                if let Some(pos) = bytes.iter().position(|b| !b.is_ascii()) {
                    return Err(RigError::Protocol(format!(
                        "non-ascii byte {:#04x} at offset {pos}",
                        bytes[pos]
                    )));
                }
                Ok(bytes.iter().map(|&b| b as char).collect())
            }
        }
    }
}

/// Parameters for opening a serial link. Fixed once the channel is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub port: String,
    pub baud_rate: u32,
    pub timeout: Duration,
    pub encoding: Encoding,
}

impl ConnectionParams {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        ConnectionParams {
            port: port.into(),
            baud_rate,
            timeout: DEFAULT_BYTE_TIMEOUT,
            encoding: Encoding::Utf8,
        }
    }

    /// Settings for the particle counter link
    pub fn particle_counter(port: impl Into<String>) -> Self {
        Self::new(port, TELEMETRY_BAUD_RATE)
    }

    /// Settings for the stepper controller link
    pub fn valve_controller(port: impl Into<String>) -> Self {
        Self::new(port, MOTION_BAUD_RATE).encoding(Encoding::Ascii)
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(RigError::Config("baud rate must be positive".to_string()));
        }
        if self.port.is_empty() {
            return Err(RigError::Config("port name is empty".to_string()));
        }
        Ok(())
    }
}

/// One parsed snapshot of `key=value` fields from the particle counter.
///
/// Fields keep the order in which they first appeared on the wire. A key that
/// repeats keeps its first position but takes the later value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryReading {
    pub received_at: DateTime<Utc>,
    #[serde(serialize_with = "fields_as_map")]
    fields: Vec<(String, String)>,
}

fn fields_as_map<S: Serializer>(
    fields: &[(String, String)],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(fields.len()))?;
    for (key, value) in fields {
        map.serialize_entry(key, value)?;
    }
    map.end()
}

impl TelemetryReading {
    pub(crate) fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut fields: Vec<(String, String)> = Vec::new();
        for (key, value) in pairs {
            match fields.iter_mut().find(|(k, _)| *k == key) {
                Some(existing) => existing.1 = value,
                None => fields.push((key, value)),
            }
        }
        TelemetryReading {
            received_at: Utc::now(),
            fields,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(_, v)| v.as_str())
    }
}

/// Motion axis of the stepper controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Axis {
    #[default]
    X,
    Y,
}

impl Axis {
    /// Command selecting this axis for subsequent moves
    pub fn select_command(self) -> &'static str {
        match self {
            Axis::X => "X",
            Axis::Y => "Y",
        }
    }

    /// Latch bit set when this axis reaches its negative limit switch
    pub fn negative_limit(self) -> Latches {
        match self {
            Axis::X => Latches::NEGATIVE_X,
            Axis::Y => Latches::NEGATIVE_Y,
        }
    }
}

/// Latch/limit status register of the stepper controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Latches(pub u32);

impl Latches {
    pub const NEGATIVE_Y: Latches = Latches(1);
    pub const POSITIVE_Y: Latches = Latches(2);
    pub const NEGATIVE_X: Latches = Latches(4);
    pub const POSITIVE_X: Latches = Latches(8);
    pub const RESET: Latches = Latches(16);

    pub fn bits(self) -> u32 {
        self.0
    }

    /// True when every bit of `other` is set.
    pub fn contains(self, other: Latches) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn reset_occurred(self) -> bool {
        self.contains(Self::RESET)
    }
}

/// Homing state of the stepper controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MotionState {
    #[default]
    Unhomed,
    Homing,
    Homed,
}

/// Parameters of the homing sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomingParams {
    /// Expected travel between the limit switches
    pub travel_width: u32,
    /// Acceleration applied before the homing move; `None` keeps the controller's
    pub home_speed: Option<u32>,
    pub overshoot_margin: u32,
    pub backlash_offset: i32,
    pub axis: Axis,
    pub ack_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for HomingParams {
    fn default() -> Self {
        HomingParams {
            travel_width: DEFAULT_TRAVEL_WIDTH,
            home_speed: None,
            overshoot_margin: HOMING_OVERSHOOT,
            backlash_offset: HOMING_BACKLASH_OFFSET,
            axis: Axis::X,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl HomingParams {
    pub fn new(travel_width: u32, home_speed: Option<u32>) -> Self {
        HomingParams {
            travel_width,
            home_speed,
            ..Default::default()
        }
    }

    /// Target of the overshooting homing move
    pub fn homing_target(&self) -> i64 {
        -(i64::from(self.travel_width) + i64::from(self.overshoot_margin))
    }

    /// Idle deadline for the homing move, stretched for slow speeds.
    pub fn homing_idle_timeout(&self) -> Duration {
        match self.home_speed {
            Some(speed) if speed > 0 => {
                let travel = self.travel_width as f64 + self.overshoot_margin as f64;
                let scaled = Duration::from_secs_f64(2.0 * travel / speed as f64);
                scaled.max(self.idle_timeout)
            }
            _ => self.idle_timeout,
        }
    }
}
