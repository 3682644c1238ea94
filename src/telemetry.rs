//! Request/response exchange with the particle counter.
//!
//! The counter answers a text command with a burst of `key=value` lines. There
//! is no end-of-response marker, so a query waits a fixed settle delay and then
//! drains whatever has arrived.

use crate::constants::*;
use crate::error::{Result, RigError};
use crate::transport::{Channel, Link};
use crate::types::{ConnectionParams, TelemetryReading};
use log::debug;
use serialport::SerialPort;
use std::thread;
use std::time::Duration;

/// Parse a raw counter response into a reading.
///
/// Lines may be separated by `\r`, `\n` or both; blank lines are skipped.
/// A line without exactly one `=` fails the whole reading.
///
/// ```
/// use sensorbox_serial::telemetry::parse_reading;
///
/// let reading = parse_reading("satfpwr=0  \rfillcnt=0     \rerr_num=0    \r\r").unwrap();
/// assert_eq!(reading.get("fillcnt"), Some("0"));
/// assert_eq!(reading.len(), 3);
/// ```
pub fn parse_reading(data: &str) -> Result<TelemetryReading> {
    let mut pairs = Vec::new();
    for line in data.split(['\r', '\n']) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.split('=');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(key), Some(value), None) => {
                pairs.push((key.trim().to_string(), value.trim().to_string()));
            }
            _ => {
                return Err(RigError::Parse {
                    line: line.to_string(),
                })
            }
        }
    }
    Ok(TelemetryReading::from_pairs(pairs))
}

/// Interface to a mixing condensation particle counter.
pub struct ParticleCounter<L: Link = Box<dyn SerialPort>> {
    channel: Channel<L>,
    settle_delay: Duration,
}

impl ParticleCounter {
    /// Open the counter's serial port.
    pub fn connect(params: ConnectionParams) -> Result<Self> {
        Ok(Self::new(Channel::open(params)?))
    }
}

impl<L: Link> ParticleCounter<L> {
    pub fn new(channel: Channel<L>) -> Self {
        ParticleCounter {
            channel,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    /// Time waited between sending a command and draining the response
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    pub fn set_settle_delay(&mut self, delay: Duration) {
        self.settle_delay = delay;
    }

    /// Send `command` and parse everything the counter returns.
    pub fn query(&mut self, command: &str) -> Result<TelemetryReading> {
        debug!("Telemetry query {command:?}");
        let framed = format!("{command}{TELEMETRY_TERMINATOR}");
        self.channel.send(framed.as_bytes())?;
        thread::sleep(self.settle_delay);

        let raw = self.channel.receive_available()?;
        if raw.is_empty() {
            return Err(RigError::Protocol("no data".to_string()));
        }
        let text = self.channel.params().encoding.decode(&raw)?;
        let reading = parse_reading(&text)?;
        debug!("Telemetry {command:?} returned {} fields", reading.len());
        Ok(reading)
    }

    /// Current measurement
    pub fn reading(&mut self) -> Result<TelemetryReading> {
        self.query(READ_CMD)
    }

    /// Every value the counter tracks
    pub fn all(&mut self) -> Result<TelemetryReading> {
        self.query(ALL_CMD)
    }

    /// Counter configuration
    pub fn settings(&mut self) -> Result<TelemetryReading> {
        self.query(SETTINGS_CMD)
    }

    pub fn channel(&self) -> &Channel<L> {
        &self.channel
    }

    pub fn close(&mut self) {
        self.channel.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mock::MockLink;

    fn counter(link: &MockLink) -> ParticleCounter<MockLink> {
        let params = ConnectionParams::particle_counter("mock");
        let mut counter = ParticleCounter::new(Channel::from_link(link.clone(), params));
        counter.set_settle_delay(Duration::ZERO);
        counter
    }

    #[test]
    fn parses_counter_output() {
        let reading = parse_reading("satfpwr=0  \rfillcnt=0     \rerr_num=0    \r\r").unwrap();
        let fields: Vec<_> = reading.iter().collect();
        assert_eq!(
            fields,
            vec![("satfpwr", "0"), ("fillcnt", "0"), ("err_num", "0")]
        );
    }

    #[test]
    fn trims_keys_and_values() {
        let reading = parse_reading("  concent = 123.4 \r\n\r\nrawconc=5\n").unwrap();
        assert_eq!(reading.get("concent"), Some("123.4"));
        assert_eq!(reading.get("rawconc"), Some("5"));
    }

    #[test]
    fn last_occurrence_wins() {
        let reading = parse_reading("a=1\ra=2\r").unwrap();
        assert_eq!(reading.len(), 1);
        assert_eq!(reading.get("a"), Some("2"));
    }

    #[test]
    fn bad_line_fails_whole_reading() {
        for bad in ["a=1\rgarbage\rb=2\r", "a=1\rx=y=z\r", "novalue\r"] {
            match parse_reading(bad) {
                Err(RigError::Parse { line }) => assert!(bad.contains(&line)),
                other => panic!("expected parse error for {bad:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn single_separator_with_empty_key_is_accepted() {
        let reading = parse_reading("=5\rflow=\r").unwrap();
        assert_eq!(reading.get(""), Some("5"));
        assert_eq!(reading.get("flow"), Some(""));
    }

    #[test]
    fn query_sends_terminated_command() {
        let link = MockLink::new();
        link.reply(b"concent=12\r\nsatt_flow=0.3\r\n");
        let mut counter = counter(&link);

        let reading = counter.reading().unwrap();
        assert_eq!(link.writes(), vec!["read\r\n"]);
        assert_eq!(reading.get("concent"), Some("12"));
        assert_eq!(reading.get("satt_flow"), Some("0.3"));
    }

    #[test]
    fn empty_response_is_protocol_error() {
        let link = MockLink::new();
        let mut counter = counter(&link);
        let err = counter.settings().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.to_string().contains("no data"));
        assert_eq!(link.writes(), vec!["settings\r\n"]);
    }

    #[test]
    fn malformed_response_returns_no_reading() {
        let link = MockLink::new();
        link.reply(b"concent=12\rnonsense\r");
        let mut counter = counter(&link);
        assert_eq!(counter.all().unwrap_err().kind(), ErrorKind::Parse);
    }
}
