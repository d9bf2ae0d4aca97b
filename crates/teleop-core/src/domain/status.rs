//! Motor and servo status snapshots.
//!
//! These are the values broadcast to operators as `motor_status` and
//! `servo_status`.  They change only as a side effect of a command the
//! controller accepted, or of telemetry the servo controller reported.

use serde::{Deserialize, Serialize};

use crate::protocol::command::{
    Direction, MotorCommand, MotorDrive, ServoAction, ServoCommand, ServoId, DEFAULT_SERVO_SPEED,
};

// ── Motors ────────────────────────────────────────────────────────────────────

/// Drive mode of the motor controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotorMode {
    #[default]
    Off,
    Synchronized,
    Differential,
    Independent,
}

/// Last commanded speed and direction of one motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MotorState {
    pub speed: u8,
    pub direction: Direction,
}

impl From<MotorDrive> for MotorState {
    fn from(drive: MotorDrive) -> Self {
        Self {
            speed: drive.speed,
            direction: drive.direction,
        }
    }
}

/// Snapshot of the motor controller.
///
/// Invariant: `mode == Off` implies every motor's speed is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MotorStatus {
    pub mode: MotorMode,
    pub motor1: MotorState,
    pub motor2: MotorState,
    pub motor3: MotorState,
    pub motor4: MotorState,
}

impl MotorStatus {
    pub fn motors(&self) -> [MotorState; 4] {
        [self.motor1, self.motor2, self.motor3, self.motor4]
    }

    fn set_motors(&mut self, motors: [MotorState; 4]) {
        [self.motor1, self.motor2, self.motor3, self.motor4] = motors;
    }

    /// Applies the effect of a command the motor controller accepted.
    pub fn apply(&mut self, cmd: &MotorCommand) {
        match *cmd {
            MotorCommand::Off => {
                self.mode = MotorMode::Off;
                self.set_motors([MotorState::default(); 4]);
            }
            MotorCommand::Synchronized(drive) => {
                self.mode = MotorMode::Synchronized;
                self.set_motors([drive.into(); 4]);
            }
            MotorCommand::Differential { pair1, pair2 } => {
                self.mode = MotorMode::Differential;
                self.set_motors([pair1.into(), pair2.into(), pair1.into(), pair2.into()]);
            }
            MotorCommand::Independent(drives) => {
                self.mode = MotorMode::Independent;
                self.set_motors(drives.map(MotorState::from));
            }
        }
    }
}

// ── Servos ────────────────────────────────────────────────────────────────────

/// Snapshot of one servo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServoState {
    pub angle: u16,
    pub speed: u8,
    pub moving: bool,
    pub reverse: bool,
    pub limit: u16,
}

impl ServoState {
    pub fn new(servo: ServoId) -> Self {
        Self {
            angle: 0,
            speed: DEFAULT_SERVO_SPEED,
            moving: false,
            reverse: false,
            limit: servo.angle_limit(),
        }
    }
}

/// Snapshot of both servos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServoStatus {
    pub mg995: ServoState,
    pub ds04: ServoState,
}

impl Default for ServoStatus {
    fn default() -> Self {
        Self {
            mg995: ServoState::new(ServoId::Mg995),
            ds04: ServoState::new(ServoId::Ds04),
        }
    }
}

impl ServoStatus {
    pub fn get(&self, servo: ServoId) -> &ServoState {
        match servo {
            ServoId::Mg995 => &self.mg995,
            ServoId::Ds04 => &self.ds04,
        }
    }

    pub fn get_mut(&mut self, servo: ServoId) -> &mut ServoState {
        match servo {
            ServoId::Mg995 => &mut self.mg995,
            ServoId::Ds04 => &mut self.ds04,
        }
    }

    /// Applies the effect of a command the servo controller accepted.
    pub fn apply(&mut self, cmd: &ServoCommand) {
        let state = self.get_mut(cmd.servo);
        match cmd.action {
            ServoAction::Move {
                angle,
                speed,
                calibration,
                ..
            } => {
                state.speed = speed;
                if calibration {
                    state.angle = angle;
                    state.moving = false;
                } else {
                    state.moving = true;
                }
            }
            ServoAction::Stop { .. } => state.moving = false,
            ServoAction::Speed(speed) => state.speed = speed,
            ServoAction::Reverse => state.reverse = !state.reverse,
        }
    }

    /// Records a reported position, clamped to the servo's limit.
    pub fn record_angle(&mut self, servo: ServoId, angle: u16) {
        let state = self.get_mut(servo);
        state.angle = angle.min(state.limit);
    }

    pub fn record_stopped(&mut self, servo: ServoId) {
        self.get_mut(servo).moving = false;
    }
}
