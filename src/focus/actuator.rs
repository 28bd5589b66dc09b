use crate::api::MantisApi;
use crate::assert_invariant;
use crate::errors::AutofocusError;
use crate::timing::{CancelToken, Sleeper};
use crate::types::{CameraHandle, FocusPosition};
use std::time::Duration;

/// Raw relative focus commands for one camera.
///
/// Only [`FocusActuator`] should call these; it keeps the position
/// accumulator in step with what was sent.
pub trait FocusMotor {
    fn step_near(&mut self, steps: u32) -> Result<(), AutofocusError>;
    fn step_far(&mut self, steps: u32) -> Result<(), AutofocusError>;
}

/// Focus motor of a microcamera reached through the vendor API.
pub struct McamMotor<'a, A: MantisApi + ?Sized> {
    api: &'a A,
    camera: &'a CameraHandle,
}

impl<'a, A: MantisApi + ?Sized> McamMotor<'a, A> {
    pub fn new(api: &'a A, camera: &'a CameraHandle) -> Self {
        Self { api, camera }
    }
}

impl<A: MantisApi + ?Sized> FocusMotor for McamMotor<'_, A> {
    fn step_near(&mut self, steps: u32) -> Result<(), AutofocusError> {
        if self.api.focus_step_near(self.camera, steps) {
            Ok(())
        } else {
            Err(AutofocusError::actuator(
                self.camera.mcam_id,
                format!("step near {} rejected", steps),
            ))
        }
    }

    fn step_far(&mut self, steps: u32) -> Result<(), AutofocusError> {
        if self.api.focus_step_far(self.camera, steps) {
            Ok(())
        } else {
            Err(AutofocusError::actuator(
                self.camera.mcam_id,
                format!("step far {} rejected", steps),
            ))
        }
    }
}

/// Position-tracking wrapper around a [`FocusMotor`].
///
/// The device exposes no absolute position query, so the actuator
/// accumulates every step it issues. Position 0 is whatever the last
/// [`home`](Self::home) or [`rezero`](Self::rezero) established; "near" is
/// negative and "far" positive.
pub struct FocusActuator<'a, M: FocusMotor> {
    motor: M,
    position: FocusPosition,
    issued_near: u64,
    issued_far: u64,
    commands: u64,
    settle: Duration,
    sleeper: &'a dyn Sleeper,
    cancel: &'a CancelToken,
}

impl<'a, M: FocusMotor> FocusActuator<'a, M> {
    pub fn new(motor: M, settle: Duration, sleeper: &'a dyn Sleeper, cancel: &'a CancelToken) -> Self {
        Self {
            motor,
            position: 0,
            issued_near: 0,
            issued_far: 0,
            commands: 0,
            settle,
            sleeper,
            cancel,
        }
    }

    pub fn position(&self) -> FocusPosition {
        self.position
    }

    /// Number of commands sent to the motor, homes included.
    pub fn commands_issued(&self) -> u64 {
        self.commands
    }

    pub fn motor(&self) -> &M {
        &self.motor
    }

    pub fn into_motor(self) -> M {
        self.motor
    }

    /// Send the 0-step near command, which the focus firmware treats as
    /// "drive to the near stop", and take that stop as position zero.
    ///
    /// This is the only path that ever puts a 0-step command on the wire.
    pub fn home(&mut self) -> Result<(), AutofocusError> {
        self.cancel.check()?;
        self.motor.step_near(0)?;
        self.commands += 1;
        self.rezero();
        log::debug!("Focus motor homed");
        Ok(())
    }

    /// Declare the current physical position as zero.
    pub fn rezero(&mut self) {
        self.position = 0;
        self.issued_near = 0;
        self.issued_far = 0;
    }

    /// Move toward the near stop. A 0-step move is a local no-op.
    pub fn move_near(&mut self, steps: u32) -> Result<(), AutofocusError> {
        if steps == 0 {
            return Ok(());
        }
        self.cancel.check()?;
        self.motor.step_near(steps)?;
        self.commands += 1;
        self.issued_near += u64::from(steps);
        self.position -= i64::from(steps);
        self.after_move();
        Ok(())
    }

    /// Move toward the far stop. A 0-step move is a local no-op.
    pub fn move_far(&mut self, steps: u32) -> Result<(), AutofocusError> {
        if steps == 0 {
            return Ok(());
        }
        self.cancel.check()?;
        self.motor.step_far(steps)?;
        self.commands += 1;
        self.issued_far += u64::from(steps);
        self.position += i64::from(steps);
        self.after_move();
        Ok(())
    }

    /// Move to an absolute tracked position with relative commands.
    pub fn move_to(&mut self, target: FocusPosition) -> Result<(), AutofocusError> {
        let mut delta = target - self.position;
        while delta != 0 {
            let chunk = u32::try_from(delta.unsigned_abs()).unwrap_or(u32::MAX);
            if delta > 0 {
                self.move_far(chunk)?;
                delta -= i64::from(chunk);
            } else {
                self.move_near(chunk)?;
                delta += i64::from(chunk);
            }
        }
        Ok(())
    }

    fn after_move(&mut self) {
        assert_invariant!(
            self.position == self.issued_far as i64 - self.issued_near as i64,
            "focus position equals the sum of issued steps",
            "focus::actuator"
        );
        self.sleeper.sleep(self.settle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSleeper, ScriptedMotor};

    #[test]
    fn test_position_accumulates_relative_moves() {
        let sleeper = RecordingSleeper::new();
        let cancel = CancelToken::new();
        let mut actuator = FocusActuator::new(ScriptedMotor::new(), Duration::from_millis(5), &sleeper, &cancel);

        actuator.home().unwrap();
        actuator.move_far(300).unwrap();
        actuator.move_near(120).unwrap();
        actuator.move_far(20).unwrap();
        assert_eq!(actuator.position(), 200);
        assert_eq!(sleeper.count(), 3);
        assert_eq!(sleeper.total(), Duration::from_millis(15));
    }

    #[test]
    fn test_zero_step_move_is_not_sent() {
        let sleeper = RecordingSleeper::new();
        let cancel = CancelToken::new();
        let mut actuator = FocusActuator::new(ScriptedMotor::new(), Duration::ZERO, &sleeper, &cancel);

        actuator.move_near(0).unwrap();
        actuator.move_far(0).unwrap();
        assert_eq!(actuator.commands_issued(), 0);
        assert!(actuator.motor().moves().is_empty());

        actuator.home().unwrap();
        assert!(actuator.motor().moves().is_empty());
        assert_eq!(actuator.motor().homes(), 1);
        assert_eq!(actuator.commands_issued(), 1);
    }

    #[test]
    fn test_failed_move_keeps_position() {
        let sleeper = RecordingSleeper::new();
        let cancel = CancelToken::new();
        let motor = ScriptedMotor::new().fail_on_command(2);
        let mut actuator = FocusActuator::new(motor, Duration::ZERO, &sleeper, &cancel);

        actuator.move_far(100).unwrap();
        let err = actuator.move_far(100).unwrap_err();
        assert!(matches!(err, AutofocusError::ActuatorFault { .. }));
        assert_eq!(actuator.position(), 100);
    }

    #[test]
    fn test_cancel_stops_commands() {
        let sleeper = RecordingSleeper::new();
        let cancel = CancelToken::new();
        let mut actuator = FocusActuator::new(ScriptedMotor::new(), Duration::ZERO, &sleeper, &cancel);

        actuator.move_far(50).unwrap();
        cancel.cancel();
        assert!(matches!(actuator.move_far(50), Err(AutofocusError::Cancelled)));
        assert_eq!(actuator.position(), 50);
        assert_eq!(actuator.motor().moves().len(), 1);
    }

    #[test]
    fn test_move_to_uses_relative_steps() {
        let sleeper = RecordingSleeper::new();
        let cancel = CancelToken::new();
        let mut actuator = FocusActuator::new(ScriptedMotor::new(), Duration::ZERO, &sleeper, &cancel);

        actuator.move_to(450).unwrap();
        actuator.move_to(130).unwrap();
        assert_eq!(actuator.position(), 130);
        assert_eq!(actuator.motor().moves(), &[450, -320]);
    }
}
