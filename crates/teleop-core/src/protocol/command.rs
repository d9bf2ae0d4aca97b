//! Typed motor and servo commands, their validation, and their wire encoding.
//!
//! Raw operator input (plain integers and strings coming off the network) is
//! turned into a command only through the validating constructors below, so a
//! value of type [`MotorCommand`] or [`ServoCommand`] is always in range and
//! safe to write to a controller.
//!
//! Wire format (one line each, terminated by `\n` on the serial link):
//!
//! ```text
//! off,0
//! synchronized,<speed>,<forward|reverse>
//! differential,<s1>,<forward1|reverse1>,<s2>,<forward2|reverse2>
//! independent,<s1>,<d1>,<s2>,<d2>,<s3>,<d3>,<s4>,<d4>      dN = forwardN|reverseN
//! servo,<id>,move,<angle>,<speed>[,force_stop][,calibration]
//! servo,<id>,stop[,priority][,force_stop]
//! servo,<id>,speed,<speed>
//! servo,<id>,reverse
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ProtocolError;
use crate::domain::device::DeviceKind;

/// Highest PWM speed value accepted by the motor controller.
pub const MAX_MOTOR_SPEED: u8 = 255;

/// Servo speed steps understood by the servo firmware.
pub const MIN_SERVO_SPEED: u8 = 1;
pub const MAX_SERVO_SPEED: u8 = 3;
pub const DEFAULT_SERVO_SPEED: u8 = 2;

/// Response window for motor commands and quick servo commands.
pub const SHORT_RESPONSE_WINDOW: Duration = Duration::from_secs(1);
/// Response window for servo `move` and `stop`, which report telemetry while running.
pub const LONG_RESPONSE_WINDOW: Duration = Duration::from_secs(2);

// ── Direction ─────────────────────────────────────────────────────────────────

/// Rotation direction of a single motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

impl Direction {
    /// Maps the operator's `reverse` checkbox onto a direction.
    pub fn from_reverse(reverse: bool) -> Self {
        if reverse {
            Self::Reverse
        } else {
            Self::Forward
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Reverse => "reverse",
        }
    }

    /// Token carrying the motor index, as used by `differential` and `independent`.
    fn indexed(self, index: usize) -> String {
        format!("{}{index}", self.as_str())
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Motors ────────────────────────────────────────────────────────────────────

/// Speed and direction for one motor (or one synchronized group of motors).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotorDrive {
    pub speed: u8,
    pub direction: Direction,
}

impl MotorDrive {
    /// Validates a raw speed value and pairs it with a direction.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidParameter`] naming `field` when `speed`
    /// is outside `0..=255`.
    pub fn new(field: &'static str, speed: i64, reverse: bool) -> Result<Self, ProtocolError> {
        let speed = u8::try_from(speed).map_err(|_| {
            ProtocolError::invalid(
                field,
                format!("motor speed {speed} outside 0..={MAX_MOTOR_SPEED}"),
            )
        })?;
        Ok(Self {
            speed,
            direction: Direction::from_reverse(reverse),
        })
    }
}

/// A command for the motor controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorCommand {
    /// All four motors stop.
    Off,
    /// All four motors share one speed and direction.
    Synchronized(MotorDrive),
    /// Two pairs of motors: pair 1 is motors 1 and 3, pair 2 is motors 2 and 4.
    Differential { pair1: MotorDrive, pair2: MotorDrive },
    /// Every motor driven on its own.
    Independent([MotorDrive; 4]),
}

impl MotorCommand {
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidParameter`] when `speed` is out of range.
    pub fn synchronized(speed: i64, reverse: bool) -> Result<Self, ProtocolError> {
        Ok(Self::Synchronized(MotorDrive::new("speed", speed, reverse)?))
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidParameter`] when either speed is out of range.
    pub fn differential(
        speed1: i64,
        reverse1: bool,
        speed2: i64,
        reverse2: bool,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::Differential {
            pair1: MotorDrive::new("speed1", speed1, reverse1)?,
            pair2: MotorDrive::new("speed2", speed2, reverse2)?,
        })
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidParameter`] naming the first motor whose
    /// speed is out of range.
    pub fn independent(speeds: [i64; 4], reverses: [bool; 4]) -> Result<Self, ProtocolError> {
        const FIELDS: [&str; 4] = ["speed1", "speed2", "speed3", "speed4"];
        let mut drives = [MotorDrive::default(); 4];
        for (i, drive) in drives.iter_mut().enumerate() {
            *drive = MotorDrive::new(FIELDS[i], speeds[i], reverses[i])?;
        }
        Ok(Self::Independent(drives))
    }

    /// Mode name as reported in status snapshots.
    pub fn mode_name(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Synchronized(_) => "synchronized",
            Self::Differential { .. } => "differential",
            Self::Independent(_) => "independent",
        }
    }

    /// Encodes the command as a wire line (without the trailing newline).
    pub fn encode(&self) -> String {
        match self {
            Self::Off => "off,0".to_string(),
            Self::Synchronized(drive) => {
                format!("synchronized,{},{}", drive.speed, drive.direction)
            }
            Self::Differential { pair1, pair2 } => format!(
                "differential,{},{},{},{}",
                pair1.speed,
                pair1.direction.indexed(1),
                pair2.speed,
                pair2.direction.indexed(2)
            ),
            Self::Independent(drives) => {
                let mut line = String::from("independent");
                for (i, drive) in drives.iter().enumerate() {
                    line.push_str(&format!(",{},{}", drive.speed, drive.direction.indexed(i + 1)));
                }
                line
            }
        }
    }
}

// ── Servos ────────────────────────────────────────────────────────────────────

/// The two servos mounted on the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServoId {
    /// Positional servo, 0..=180 degrees.
    Mg995,
    /// Continuous-rotation servo, 0..=360 degrees.
    Ds04,
}

impl ServoId {
    pub const ALL: [ServoId; 2] = [ServoId::Mg995, ServoId::Ds04];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mg995 => "mg995",
            Self::Ds04 => "ds04",
        }
    }

    /// Upper bound of the angle range accepted for this servo.
    pub fn angle_limit(self) -> u16 {
        match self {
            Self::Mg995 => 180,
            Self::Ds04 => 360,
        }
    }
}

impl fmt::Display for ServoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServoId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mg995" => Ok(Self::Mg995),
            "ds04" => Ok(Self::Ds04),
            other => Err(ProtocolError::invalid(
                "servo_type",
                format!("unknown servo `{other}`"),
            )),
        }
    }
}

/// What a servo command asks the servo to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoAction {
    Move {
        angle: u16,
        speed: u8,
        force_stop: bool,
        /// Calibration moves report their target as the current angle immediately.
        calibration: bool,
    },
    Stop {
        priority: bool,
        force_stop: bool,
    },
    Speed(u8),
    Reverse,
}

impl ServoAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Move { .. } => "move",
            Self::Stop { .. } => "stop",
            Self::Speed(_) => "speed",
            Self::Reverse => "reverse",
        }
    }
}

/// Raw, unvalidated servo parameters as received from an operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServoParams {
    pub angle: Option<i64>,
    pub speed: Option<i64>,
    pub force_stop: bool,
    pub calibration: bool,
    pub priority: bool,
}

/// A command for the servo controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoCommand {
    pub servo: ServoId,
    pub action: ServoAction,
}

impl ServoCommand {
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidParameter`] when `angle` exceeds the
    /// servo's limit or `speed` is outside `1..=3`.
    pub fn move_to(
        servo: ServoId,
        angle: i64,
        speed: i64,
        force_stop: bool,
        calibration: bool,
    ) -> Result<Self, ProtocolError> {
        let limit = servo.angle_limit();
        let angle = u16::try_from(angle)
            .ok()
            .filter(|a| *a <= limit)
            .ok_or_else(|| {
                ProtocolError::invalid("angle", format!("{angle} outside 0..={limit} for {servo}"))
            })?;
        Ok(Self {
            servo,
            action: ServoAction::Move {
                angle,
                speed: validate_servo_speed(speed)?,
                force_stop,
                calibration,
            },
        })
    }

    pub fn stop(servo: ServoId, priority: bool, force_stop: bool) -> Self {
        Self {
            servo,
            action: ServoAction::Stop {
                priority,
                force_stop,
            },
        }
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidParameter`] when `speed` is outside `1..=3`.
    pub fn set_speed(servo: ServoId, speed: i64) -> Result<Self, ProtocolError> {
        Ok(Self {
            servo,
            action: ServoAction::Speed(validate_servo_speed(speed)?),
        })
    }

    pub fn reverse(servo: ServoId) -> Self {
        Self {
            servo,
            action: ServoAction::Reverse,
        }
    }

    /// Builds a command from the operator's servo name, action name and parameters.
    ///
    /// `move` requires an angle; its speed defaults to 2.  `speed` requires a speed.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidParameter`] for an unknown servo or
    /// action, a missing required parameter, or an out-of-range value.
    pub fn from_request(
        servo: &str,
        action: &str,
        params: ServoParams,
    ) -> Result<Self, ProtocolError> {
        let servo: ServoId = servo.parse()?;
        match action.trim().to_ascii_lowercase().as_str() {
            "move" => {
                let angle = params
                    .angle
                    .ok_or_else(|| ProtocolError::invalid("angle", "required for move"))?;
                let speed = params.speed.unwrap_or(i64::from(DEFAULT_SERVO_SPEED));
                Self::move_to(servo, angle, speed, params.force_stop, params.calibration)
            }
            "stop" => Ok(Self::stop(servo, params.priority, params.force_stop)),
            "speed" => {
                let speed = params
                    .speed
                    .ok_or_else(|| ProtocolError::invalid("speed", "required for speed"))?;
                Self::set_speed(servo, speed)
            }
            "reverse" => Ok(Self::reverse(servo)),
            other => Err(ProtocolError::invalid(
                "action",
                format!("unknown servo action `{other}`"),
            )),
        }
    }

    /// Encodes the command as a wire line (without the trailing newline).
    pub fn encode(&self) -> String {
        let mut line = format!("servo,{},{}", self.servo, self.action.name());
        match self.action {
            ServoAction::Move {
                angle,
                speed,
                force_stop,
                calibration,
            } => {
                line.push_str(&format!(",{angle},{speed}"));
                if force_stop {
                    line.push_str(",force_stop");
                }
                if calibration {
                    line.push_str(",calibration");
                }
            }
            ServoAction::Stop {
                priority,
                force_stop,
            } => {
                if priority {
                    line.push_str(",priority");
                }
                if force_stop {
                    line.push_str(",force_stop");
                }
            }
            ServoAction::Speed(speed) => line.push_str(&format!(",{speed}")),
            ServoAction::Reverse => {}
        }
        line
    }
}

fn validate_servo_speed(speed: i64) -> Result<u8, ProtocolError> {
    u8::try_from(speed)
        .ok()
        .filter(|s| (MIN_SERVO_SPEED..=MAX_SERVO_SPEED).contains(s))
        .ok_or_else(|| {
            ProtocolError::invalid(
                "speed",
                format!("servo speed {speed} outside {MIN_SERVO_SPEED}..={MAX_SERVO_SPEED}"),
            )
        })
}

// ── Device command ────────────────────────────────────────────────────────────

/// Any command addressed to one of the two controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    Motor(MotorCommand),
    Servo(ServoCommand),
}

impl DeviceCommand {
    /// The controller this command is routed to.
    pub fn kind(&self) -> DeviceKind {
        match self {
            Self::Motor(_) => DeviceKind::Motor,
            Self::Servo(_) => DeviceKind::Servo,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Motor(cmd) => cmd.encode(),
            Self::Servo(cmd) => cmd.encode(),
        }
    }

    /// How long to keep collecting response lines after writing this command.
    pub fn response_window(&self) -> Duration {
        match self {
            Self::Servo(ServoCommand {
                action: ServoAction::Move { .. } | ServoAction::Stop { .. },
                ..
            }) => LONG_RESPONSE_WINDOW,
            _ => SHORT_RESPONSE_WINDOW,
        }
    }
}

impl From<MotorCommand> for DeviceCommand {
    fn from(cmd: MotorCommand) -> Self {
        Self::Motor(cmd)
    }
}

impl From<ServoCommand> for DeviceCommand {
    fn from(cmd: ServoCommand) -> Self {
        Self::Servo(cmd)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Motor validation ──────────────────────────────────────────────────────

    #[test]
    fn test_motor_speed_255_is_accepted() {
        let cmd = MotorCommand::synchronized(255, false).unwrap();
        assert_eq!(cmd.encode(), "synchronized,255,forward");
    }

    #[test]
    fn test_motor_speed_256_is_rejected() {
        // Act
        let err = MotorCommand::synchronized(256, false).unwrap_err();

        // Assert
        assert!(matches!(
            err,
            ProtocolError::InvalidParameter { field: "speed", .. }
        ));
    }

    #[test]
    fn test_negative_motor_speed_is_rejected() {
        assert!(MotorCommand::synchronized(-1, true).is_err());
    }

    #[test]
    fn test_independent_rejection_names_the_offending_motor() {
        let err = MotorCommand::independent([10, 20, 300, 40], [false; 4]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidParameter { field: "speed3", .. }
        ));
    }

    // ── Motor encoding ────────────────────────────────────────────────────────

    #[test]
    fn test_off_encodes_as_off_zero() {
        assert_eq!(MotorCommand::Off.encode(), "off,0");
    }

    #[test]
    fn test_synchronized_reverse_encoding() {
        let cmd = MotorCommand::synchronized(100, true).unwrap();
        assert_eq!(cmd.encode(), "synchronized,100,reverse");
    }

    #[test]
    fn test_differential_encoding_uses_indexed_direction_tokens() {
        // Arrange
        let cmd = MotorCommand::differential(100, false, 80, true).unwrap();

        // Act / Assert
        assert_eq!(cmd.encode(), "differential,100,forward1,80,reverse2");
    }

    #[test]
    fn test_independent_encoding_interleaves_speed_and_direction() {
        let cmd =
            MotorCommand::independent([1, 2, 3, 4], [false, true, false, true]).unwrap();
        assert_eq!(
            cmd.encode(),
            "independent,1,forward1,2,reverse2,3,forward3,4,reverse4"
        );
    }

    // ── Servo validation ──────────────────────────────────────────────────────

    #[test]
    fn test_mg995_angle_180_accepted_and_181_rejected() {
        assert!(ServoCommand::move_to(ServoId::Mg995, 180, 2, false, false).is_ok());
        assert!(ServoCommand::move_to(ServoId::Mg995, 181, 2, false, false).is_err());
    }

    #[test]
    fn test_ds04_angle_360_accepted_and_361_rejected() {
        assert!(ServoCommand::move_to(ServoId::Ds04, 360, 2, false, false).is_ok());
        assert!(ServoCommand::move_to(ServoId::Ds04, 361, 2, false, false).is_err());
    }

    #[test]
    fn test_negative_angle_is_rejected() {
        assert!(ServoCommand::move_to(ServoId::Mg995, -5, 2, false, false).is_err());
    }

    #[test]
    fn test_servo_speed_bounds() {
        assert!(ServoCommand::set_speed(ServoId::Mg995, 0).is_err());
        assert!(ServoCommand::set_speed(ServoId::Mg995, 4).is_err());
        for speed in 1..=3 {
            assert!(ServoCommand::set_speed(ServoId::Mg995, speed).is_ok());
        }
    }

    #[test]
    fn test_unknown_servo_id_is_rejected() {
        let err = ServoCommand::from_request("sg90", "stop", ServoParams::default()).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidParameter {
                field: "servo_type",
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_servo_action_is_rejected() {
        let err = ServoCommand::from_request("mg995", "spin", ServoParams::default()).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidParameter { field: "action", .. }
        ));
    }

    #[test]
    fn test_move_without_angle_is_rejected() {
        let params = ServoParams {
            speed: Some(2),
            ..ServoParams::default()
        };
        assert!(ServoCommand::from_request("mg995", "move", params).is_err());
    }

    #[test]
    fn test_move_speed_defaults_to_two() {
        // Arrange
        let params = ServoParams {
            angle: Some(90),
            ..ServoParams::default()
        };

        // Act
        let cmd = ServoCommand::from_request("MG995", "move", params).unwrap();

        // Assert
        assert_eq!(cmd.encode(), "servo,mg995,move,90,2");
    }

    // ── Servo encoding ────────────────────────────────────────────────────────

    #[test]
    fn test_move_encoding_with_flags() {
        let cmd = ServoCommand::move_to(ServoId::Ds04, 270, 3, true, true).unwrap();
        assert_eq!(cmd.encode(), "servo,ds04,move,270,3,force_stop,calibration");
    }

    #[test]
    fn test_stop_encoding_with_priority() {
        let cmd = ServoCommand::stop(ServoId::Mg995, true, false);
        assert_eq!(cmd.encode(), "servo,mg995,stop,priority");
    }

    #[test]
    fn test_plain_stop_matches_servo_handshake_line() {
        assert_eq!(
            ServoCommand::stop(ServoId::Mg995, false, false).encode(),
            "servo,mg995,stop"
        );
    }

    #[test]
    fn test_speed_and_reverse_encoding() {
        assert_eq!(
            ServoCommand::set_speed(ServoId::Ds04, 1).unwrap().encode(),
            "servo,ds04,speed,1"
        );
        assert_eq!(ServoCommand::reverse(ServoId::Ds04).encode(), "servo,ds04,reverse");
    }

    // ── Routing ───────────────────────────────────────────────────────────────

    #[test]
    fn test_response_windows() {
        let motor: DeviceCommand = MotorCommand::Off.into();
        let stop: DeviceCommand = ServoCommand::stop(ServoId::Mg995, false, false).into();
        let reverse: DeviceCommand = ServoCommand::reverse(ServoId::Mg995).into();

        assert_eq!(motor.response_window(), SHORT_RESPONSE_WINDOW);
        assert_eq!(stop.response_window(), LONG_RESPONSE_WINDOW);
        assert_eq!(reverse.response_window(), SHORT_RESPONSE_WINDOW);
    }

    #[test]
    fn test_device_command_kind() {
        assert_eq!(DeviceCommand::from(MotorCommand::Off).kind(), DeviceKind::Motor);
        assert_eq!(
            DeviceCommand::from(ServoCommand::reverse(ServoId::Ds04)).kind(),
            DeviceKind::Servo
        );
    }
}
