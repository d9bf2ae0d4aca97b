//! Decoding of lines received from the controllers.

use super::command::ServoId;
use super::ProtocolError;

const SERVO_ANGLE_PREFIX: &str = "servo_angle";
const SERVO_STOPPED_PREFIX: &str = "servo_stopped";

/// One line read back from a controller, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceLine {
    /// Asynchronous position report: `servo_angle,<id>,<angle>`.
    ServoAngle { servo: ServoId, angle: u16 },
    /// The servo finished moving: `servo_stopped,<id>`.
    ServoStopped { servo: ServoId },
    /// Any other non-empty line; ends a command's response window.
    Ack(String),
    /// Empty or whitespace-only line.
    Blank,
}

/// Classifies a single line received from a controller.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedTelemetry`] when a line starts with a
/// telemetry prefix but its fields cannot be parsed (unknown servo id or a
/// non-numeric angle).  Callers log and skip such lines.
pub fn decode_line(line: &str) -> Result<DeviceLine, ProtocolError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(DeviceLine::Blank);
    }

    if line.starts_with(SERVO_ANGLE_PREFIX) {
        let mut fields = line.split(',').skip(1);
        let servo = parse_servo(line, fields.next())?;
        let raw_angle = fields.next().unwrap_or("").trim();
        let angle = raw_angle.parse::<u16>().map_err(|_| malformed(line, "non-numeric angle"))?;
        return Ok(DeviceLine::ServoAngle { servo, angle });
    }

    if line.starts_with(SERVO_STOPPED_PREFIX) {
        let servo = parse_servo(line, line.split(',').nth(1))?;
        return Ok(DeviceLine::ServoStopped { servo });
    }

    Ok(DeviceLine::Ack(line.to_string()))
}

fn parse_servo(line: &str, field: Option<&str>) -> Result<ServoId, ProtocolError> {
    field
        .ok_or_else(|| malformed(line, "missing servo id"))?
        .parse()
        .map_err(|_| malformed(line, "unknown servo id"))
}

fn malformed(line: &str, reason: &str) -> ProtocolError {
    ProtocolError::MalformedTelemetry {
        line: line.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_servo_angle_line_is_decoded() {
        assert_eq!(
            decode_line("servo_angle,mg995,90\r").unwrap(),
            DeviceLine::ServoAngle {
                servo: ServoId::Mg995,
                angle: 90
            }
        );
    }

    #[test]
    fn test_servo_stopped_line_is_decoded() {
        assert_eq!(
            decode_line("servo_stopped,ds04").unwrap(),
            DeviceLine::ServoStopped {
                servo: ServoId::Ds04
            }
        );
    }

    #[test]
    fn test_non_numeric_angle_is_malformed() {
        let err = decode_line("servo_angle,mg995,abc").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedTelemetry { .. }));
    }

    #[test]
    fn test_unknown_servo_in_telemetry_is_malformed() {
        assert!(decode_line("servo_stopped,sg90").is_err());
        assert!(decode_line("servo_angle").is_err());
    }

    #[test]
    fn test_free_text_is_an_acknowledgement() {
        assert_eq!(
            decode_line("  Motores apagados  ").unwrap(),
            DeviceLine::Ack("Motores apagados".to_string())
        );
    }

    #[test]
    fn test_blank_line() {
        assert_eq!(decode_line("   \r").unwrap(), DeviceLine::Blank);
    }
}
