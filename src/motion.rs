//! Command/acknowledge protocol of a BS1010-style stepper controller.
//!
//! Every command that changes controller state is answered with a single
//! [`ACK`] byte. Positions are only meaningful once the controller has been
//! homed against its negative limit switch, so relative commands are refused
//! until [`reset_and_home`](MotionController::reset_and_home) has succeeded.

use crate::constants::*;
use crate::error::{Result, RigError};
use crate::transport::{Channel, Link};
use crate::types::{ConnectionParams, HomingParams, Latches, MotionState};
use log::{debug, info, warn};
use serialport::SerialPort;
use std::time::Duration;

/// Interface to the stepper controller driving one valve axis.
pub struct MotionController<L: Link = Box<dyn SerialPort>> {
    channel: Channel<L>,
    state: MotionState,
    last_known_position: Option<i64>,
    latches: Option<Latches>,
    ack_timeout: Duration,
}

impl MotionController {
    /// Open the controller's serial port. The controller starts unhomed.
    pub fn connect(params: ConnectionParams) -> Result<Self> {
        Ok(Self::new(Channel::open(params)?))
    }
}

impl<L: Link> MotionController<L> {
    pub fn new(channel: Channel<L>) -> Self {
        MotionController {
            channel,
            state: MotionState::Unhomed,
            last_known_position: None,
            latches: None,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    pub fn is_homed(&self) -> bool {
        self.state == MotionState::Homed
    }

    /// Position of the last acknowledged move or query. Advisory while moving.
    pub fn last_known_position(&self) -> Option<i64> {
        self.last_known_position
    }

    /// Latch register as last reported by the controller
    pub fn last_latches(&self) -> Option<Latches> {
        self.latches
    }

    /// Deadline for acknowledges outside of homing
    pub fn set_ack_timeout(&mut self, timeout: Duration) {
        self.ack_timeout = timeout;
    }

    fn send_cmd(&mut self, cmd: &str) -> Result<()> {
        debug!("Controller command {cmd:?}");
        self.channel.send(cmd.as_bytes())
    }

    /// Wait for the acknowledge byte and return the response text before it.
    fn wait_for_ack(&mut self, cmd: &str, timeout: Duration) -> Result<String> {
        let raw = self
            .channel
            .receive_until(|buf| buf.contains(&ACK), timeout)
            .map_err(|e| match e {
                RigError::Timeout { timeout, .. } => {
                    RigError::timeout(format!("acknowledge of {cmd:?}"), timeout)
                }
                other => other,
            })?;
        let text = self.channel.params().encoding.decode(&raw)?;
        let body = match text.rfind(ACK as char) {
            Some(end) => &text[..end],
            None => text.as_str(),
        };
        Ok(body.trim().to_string())
    }

    /// Run one acknowledged command, dropping the homed state if the ack never comes.
    fn command(&mut self, cmd: &str, timeout: Duration) -> Result<String> {
        self.send_cmd(cmd)?;
        match self.wait_for_ack(cmd, timeout) {
            Err(e @ RigError::Timeout { .. }) => {
                self.invalidate(&e);
                Err(e)
            }
            other => other,
        }
    }

    fn invalidate(&mut self, cause: &RigError) {
        if self.state == MotionState::Homed {
            warn!("Controller no longer homed: {cause}");
        }
        self.state = MotionState::Unhomed;
    }

    fn field<'a>(response: &'a str, index: usize, what: &str) -> Result<&'a str> {
        response
            .split(',')
            .nth(index)
            .map(str::trim)
            .ok_or_else(|| RigError::Protocol(format!("malformed {what} report {response:?}")))
    }

    /// Reset the controller and home it against the negative limit switch.
    ///
    /// On success the controller is `Homed` at coordinate 0. Any failure leaves
    /// it `Unhomed` and is returned unchanged so the caller can retry or abort.
    pub fn reset_and_home(&mut self, params: &HomingParams) -> Result<()> {
        self.state = MotionState::Homing;
        self.last_known_position = None;
        match self.run_homing(params) {
            Ok(()) => {
                self.state = MotionState::Homed;
                info!("Controller homed (width {})", params.travel_width);
                Ok(())
            }
            Err(e) => {
                warn!("Homing aborted: {e}");
                self.state = MotionState::Unhomed;
                Err(e)
            }
        }
    }

    fn run_homing(&mut self, params: &HomingParams) -> Result<()> {
        self.channel.flush_input()?;

        self.command(RESET_CMD, params.ack_timeout)?;
        let latches = self.query_latches(params.ack_timeout)?;
        if !latches.reset_occurred() {
            return Err(RigError::Protocol(format!(
                "unexpected latch state after reset: {:#07b} lacks reset flag",
                latches.bits()
            )));
        }

        if let Some(speed) = params.home_speed {
            self.command(&format!("{speed}{RUN_SPEED_CMD}"), params.ack_timeout)?;
        }

        // Axis selection is not acknowledged
        self.send_cmd(params.axis.select_command())?;
        self.goto(params.homing_target(), params.ack_timeout)?;
        self.wait_for_idle(params.homing_idle_timeout())?;

        let latches = self.query_latches(params.ack_timeout)?;
        let limit = params.axis.negative_limit();
        if !latches.contains(limit) {
            return Err(RigError::Protocol(format!(
                "negative limit bit {:#07b} not latched after homing move (latches {:#07b})",
                limit.bits(),
                latches.bits()
            )));
        }

        self.redefine_position(i64::from(params.backlash_offset), params.ack_timeout)?;
        self.goto(0, params.ack_timeout)?;
        self.wait_for_idle(params.idle_timeout)?;
        Ok(())
    }

    fn require_homed(&self, operation: &str) -> Result<()> {
        if self.is_homed() {
            Ok(())
        } else {
            Err(RigError::State(format!(
                "{operation} requires a homed controller (state {:?})",
                self.state
            )))
        }
    }

    fn goto(&mut self, position: i64, timeout: Duration) -> Result<()> {
        self.command(&format!("{position}{GOTO_CMD}"), timeout)?;
        self.last_known_position = Some(position);
        Ok(())
    }

    /// Start a move to `position`. Returns once the controller acknowledges the
    /// command, not when the motor has stopped.
    pub fn move_to(&mut self, position: i64) -> Result<()> {
        self.require_homed("move")?;
        self.goto(position, self.ack_timeout)
    }

    /// Block until the motor has physically settled.
    pub fn wait_for_idle(&mut self, timeout: Duration) -> Result<()> {
        self.command(WAIT_IDLE_CMD, timeout).map(|_| ())
    }

    fn redefine_position(&mut self, position: i64, timeout: Duration) -> Result<()> {
        self.command(&format!("{position}{SET_POSITION_CMD}"), timeout)?;
        self.last_known_position = Some(position);
        Ok(())
    }

    /// Redefine the current coordinate without moving.
    ///
    /// The homed reference frame no longer holds afterwards, so the controller
    /// drops back to `Unhomed`.
    pub fn set_position(&mut self, position: i64) -> Result<()> {
        let timeout = self.ack_timeout;
        self.redefine_position(position, timeout)?;
        self.state = MotionState::Unhomed;
        Ok(())
    }

    /// Coordinate the controller reports for the selected axis. Meaningless before homing.
    pub fn get_position(&mut self) -> Result<i64> {
        let timeout = self.ack_timeout;
        let response = self.command(POSITION_QUERY_CMD, timeout)?;
        let field = Self::field(&response, POSITION_FIELD, "position")?;
        let position = field
            .parse::<i64>()
            .map_err(|_| RigError::Protocol(format!("bad position {field:?}")))?;
        self.last_known_position = Some(position);
        Ok(position)
    }

    fn query_latches(&mut self, timeout: Duration) -> Result<Latches> {
        let response = self.command(LATCHES_CMD, timeout)?;
        let field = Self::field(&response, LATCHES_FIELD, "latch")?;
        let bits = field
            .parse::<u32>()
            .map_err(|_| RigError::Protocol(format!("bad latch value {field:?}")))?;
        let latches = Latches(bits);
        debug!("Latches {:#07b}", latches.bits());
        self.latches = Some(latches);
        Ok(latches)
    }

    /// Read the latch/limit status register.
    pub fn get_latches(&mut self) -> Result<Latches> {
        let timeout = self.ack_timeout;
        self.query_latches(timeout)
    }

    /// Set the acceleration profile in pulses/s/s.
    pub fn set_run_speed(&mut self, speed: u32) -> Result<()> {
        let timeout = self.ack_timeout;
        self.command(&format!("{speed}{RUN_SPEED_CMD}"), timeout)
            .map(|_| ())
    }

    pub fn channel(&self) -> &Channel<L> {
        &self.channel
    }

    pub fn close(&mut self) {
        self.channel.close();
        self.state = MotionState::Unhomed;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mock::MockLink;

    pub(crate) fn short_homing() -> HomingParams {
        HomingParams {
            ack_timeout: Duration::from_millis(20),
            idle_timeout: Duration::from_millis(20),
            ..HomingParams::default()
        }
    }

    /// Replies for one successful homing run without a speed change.
    pub(crate) fn script_homing(link: &MockLink) {
        link.reply(b"*") // !
            .reply(b"0,16\r\n*") // L
            .reply(b"") // X
            .reply(b"*") // -3000G
            .reply(b"*") // I
            .reply(b"0,20\r\n*") // L
            .reply(b"*") // -100=
            .reply(b"*") // 0G
            .reply(b"*"); // I
    }

    pub(crate) fn controller(link: &MockLink) -> MotionController<MockLink> {
        let params = ConnectionParams::valve_controller("mock");
        let mut controller = MotionController::new(Channel::from_link(link.clone(), params));
        controller.set_ack_timeout(Duration::from_millis(20));
        controller
    }

    const HOMING_WRITES: [&str; 9] = ["!", "L", "X", "-3000G", "I", "L", "-100=", "0G", "I"];

    #[test]
    fn homing_runs_full_sequence() {
        let link = MockLink::new();
        script_homing(&link);
        let mut controller = controller(&link);

        controller.reset_and_home(&short_homing()).unwrap();
        assert_eq!(link.writes(), HOMING_WRITES);
        assert_eq!(controller.state(), MotionState::Homed);
        assert_eq!(controller.last_known_position(), Some(0));
        assert_eq!(controller.last_latches(), Some(Latches(20)));
    }

    #[test]
    fn homing_twice_ends_homed_at_zero() {
        let link = MockLink::new();
        script_homing(&link);
        script_homing(&link);
        let mut controller = controller(&link);

        for _ in 0..2 {
            controller.reset_and_home(&short_homing()).unwrap();
            assert!(controller.is_homed());
            assert_eq!(controller.last_known_position(), Some(0));
        }
        assert_eq!(link.writes().len(), 2 * HOMING_WRITES.len());
    }

    #[test]
    fn homing_with_speed_applies_it_first() {
        let link = MockLink::new();
        link.reply(b"*")
            .reply(b"0,16*")
            .reply(b"*")
            .reply(b"")
            .reply(b"*")
            .reply(b"*")
            .reply(b"0,4*")
            .reply(b"*")
            .reply(b"*")
            .reply(b"*");
        let mut controller = controller(&link);
        let params = HomingParams {
            home_speed: Some(3200),
            ..short_homing()
        };

        controller.reset_and_home(&params).unwrap();
        assert_eq!(link.writes()[..4].to_vec(), vec!["!", "L", "3200R", "X"]);
        assert!(controller.is_homed());
    }

    #[test]
    fn missing_reset_ack_aborts_before_redefinition() {
        let link = MockLink::new();
        let mut controller = controller(&link);

        let err = controller.reset_and_home(&short_homing()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(controller.state(), MotionState::Unhomed);
        assert_eq!(link.writes(), vec!["!"]);
        assert!(!link.writes().iter().any(|w| w.ends_with('=')));
    }

    #[test]
    fn reset_flag_must_be_latched() {
        let link = MockLink::new();
        link.reply(b"*").reply(b"0,0\r\n*");
        let mut controller = controller(&link);

        let err = controller.reset_and_home(&short_homing()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.to_string().contains("unexpected latch state after reset"));
        assert_eq!(controller.state(), MotionState::Unhomed);
        assert_eq!(link.writes(), vec!["!", "L"]);
    }

    #[test]
    fn negative_limit_must_be_latched() {
        let link = MockLink::new();
        link.reply(b"*")
            .reply(b"0,16*")
            .reply(b"")
            .reply(b"*")
            .reply(b"*")
            // positive limit hit instead of the negative one
            .reply(b"0,24*");
        let mut controller = controller(&link);

        let err = controller.reset_and_home(&short_homing()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.to_string().contains("negative limit"));
        assert_eq!(controller.state(), MotionState::Unhomed);
        assert_eq!(link.writes().len(), 6);
    }

    #[test]
    fn move_before_homing_sends_nothing() {
        let link = MockLink::new();
        let mut controller = controller(&link);

        let err = controller.move_to(500).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        assert!(link.writes().is_empty());
    }

    #[test]
    fn move_updates_position_on_ack() {
        let link = MockLink::new();
        script_homing(&link);
        link.reply(b"*");
        let mut controller = controller(&link);
        controller.reset_and_home(&short_homing()).unwrap();

        controller.move_to(1500).unwrap();
        assert_eq!(link.writes().last().map(String::as_str), Some("1500G"));
        assert_eq!(controller.last_known_position(), Some(1500));
    }

    #[test]
    fn lost_ack_unhomes_controller() {
        let link = MockLink::new();
        script_homing(&link);
        let mut controller = controller(&link);
        controller.reset_and_home(&short_homing()).unwrap();

        let err = controller.move_to(2000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(controller.state(), MotionState::Unhomed);
        assert_eq!(controller.move_to(0).unwrap_err().kind(), ErrorKind::State);
    }

    #[test]
    fn queries_parse_comma_fields() {
        let link = MockLink::new();
        link.reply(b"0, 0, 1000\r\n*").reply(b"0,9\r\n*");
        let mut controller = controller(&link);

        assert_eq!(controller.get_position().unwrap(), 1000);
        assert_eq!(controller.last_known_position(), Some(1000));
        let latches = controller.get_latches().unwrap();
        assert_eq!(latches.bits(), 9);
        assert!(latches.contains(Latches::POSITIVE_X));
        assert_eq!(link.writes(), vec!["-1?", "L"]);
    }

    #[test]
    fn short_position_report_is_protocol_error() {
        let link = MockLink::new();
        link.reply(b"12*");
        let mut controller = controller(&link);
        assert_eq!(controller.get_position().unwrap_err().kind(), ErrorKind::Protocol);
    }

    #[test]
    fn run_speed_and_idle_need_ack() {
        let link = MockLink::new();
        link.reply(b"*").reply(b"*");
        let mut controller = controller(&link);

        controller.set_run_speed(800).unwrap();
        controller.wait_for_idle(Duration::from_millis(20)).unwrap();
        assert_eq!(link.writes(), vec!["800R", "I"]);
        assert_eq!(
            controller.set_run_speed(80).unwrap_err().kind(),
            ErrorKind::Timeout
        );
    }
}
