//! Integration tests for controller discovery and the background reconnect loop.
//!
//! These run the real [`DeviceManager`] against fake serial ports with tokio's
//! clock paused, so multi-second settle delays and backoff waits finish
//! instantly while keeping their relative timing.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use teleop_core::{Backoff, DeviceKind, MotorCommand};
use teleop_server::application::{BroadcastSink, DeviceManager, DeviceSettings};
use teleop_server::infrastructure::serial::mock::{FakeController, FakePorts};

const MOTOR_PORT: &str = "/dev/ttyACM0";
const SERVO_PORT: &str = "/dev/ttyUSB0";

fn manager(ports: &FakePorts, candidates: &[&str]) -> Arc<DeviceManager> {
    let settings = DeviceSettings {
        candidate_ports: candidates.iter().map(|p| p.to_string()).collect(),
        ..DeviceSettings::default()
    };
    Arc::new(DeviceManager::new(
        Arc::new(ports.clone()),
        settings,
        Arc::new(BroadcastSink::new()),
    ))
}

/// Polls `condition` every 50 ms of virtual time, for at most a minute.
async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(60);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    condition()
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_loop_discovers_both_controllers_on_their_own_ports() {
    // Arrange
    let ports = FakePorts::new();
    let motor = FakeController::motor();
    let servo = FakeController::servo();
    ports.attach(MOTOR_PORT, motor.clone());
    ports.attach(SERVO_PORT, servo.clone());
    let manager = manager(&ports, &[MOTOR_PORT, SERVO_PORT]);

    // Act
    manager.spawn_reconnect_loop();
    let both = wait_until(|| {
        manager.is_connected(DeviceKind::Motor) && manager.is_connected(DeviceKind::Servo)
    })
    .await;

    // Assert
    assert!(both);
    assert_eq!(manager.port(DeviceKind::Motor).as_deref(), Some(MOTOR_PORT));
    assert_eq!(manager.port(DeviceKind::Servo).as_deref(), Some(SERVO_PORT));
    assert!(motor.written().iter().all(|line| line == "off,0"));
    assert!(servo.written().iter().all(|line| line.starts_with("servo,")));
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_last_command_is_replayed_before_new_commands() {
    // Arrange: motor connected and driving.
    let ports = FakePorts::new();
    let motor = FakeController::motor();
    ports.attach(MOTOR_PORT, motor.clone());
    let manager = manager(&ports, &[MOTOR_PORT]);
    manager.spawn_reconnect_loop();
    assert!(wait_until(|| manager.is_connected(DeviceKind::Motor)).await);

    let drive = manager
        .dispatch(MotorCommand::synchronized(120, false).unwrap().into())
        .await;
    assert!(drive.accepted);

    // Act: unplug, notice it on the next write, plug back in.
    motor.set_unplugged(true);
    let lost = manager.dispatch(MotorCommand::Off.into()).await;
    assert!(!lost.accepted);
    assert!(!manager.is_connected(DeviceKind::Motor));
    motor.clear_written();
    motor.set_unplugged(false);

    assert!(wait_until(|| manager.is_connected(DeviceKind::Motor)).await);
    let next = manager
        .dispatch(MotorCommand::synchronized(30, true).unwrap().into())
        .await;

    // Assert: handshake, then the replayed drive, then the new command.
    assert!(next.accepted);
    assert_eq!(
        motor.written(),
        vec!["off,0", "synchronized,120,forward", "synchronized,30,reverse"]
    );
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_reconnects_back_off_exponentially_up_to_the_cap() {
    // Arrange: no controller anywhere.
    let ports = FakePorts::new();
    let manager = manager(&ports, &[MOTOR_PORT]);

    // Act
    manager.spawn_reconnect_loop();
    sleep(Duration::from_secs(125)).await;
    manager.shutdown().await;

    // Assert: both devices probe together, so collapse equal instants.
    let mut attempts = ports.open_times();
    attempts.dedup();
    let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();

    let mut policy = Backoff::default();
    let expected: Vec<Duration> = (0..gaps.len()).map(|_| policy.record_failure()).collect();

    assert!(gaps.len() >= 5, "only {} retries happened", gaps.len());
    for (gap, want) in gaps.iter().zip(&expected) {
        assert_close(*gap, *want);
    }
    assert_close(gaps[0], Duration::from_millis(7500));
    assert_close(gaps[4], Duration::from_secs(30));
}

/// The timer wheel has millisecond resolution.
fn assert_close(actual: Duration, expected: Duration) {
    let diff = if actual > expected { actual - expected } else { expected - actual };
    assert!(
        diff <= Duration::from_millis(2),
        "expected {expected:?}, got {actual:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_successful_reconnect_resets_the_backoff() {
    // Arrange: the motor shows up only after two failed rounds.
    let ports = FakePorts::new();
    let motor = FakeController::motor();
    let manager = manager(&ports, &[MOTOR_PORT]);
    manager.spawn_reconnect_loop();
    sleep(Duration::from_secs(10)).await;
    ports.attach(MOTOR_PORT, motor.clone());

    assert!(wait_until(|| manager.is_connected(DeviceKind::Motor)).await);

    // Act: drop the link once it is up.
    motor.set_unplugged(true);
    manager.dispatch(MotorCommand::Off.into()).await;
    let lost_at = Instant::now();
    motor.set_unplugged(false);
    assert!(wait_until(|| manager.is_connected(DeviceKind::Motor)).await);

    // Assert: the first retry after a drop does not wait out a backoff.
    assert!(Instant::now() - lost_at < Duration::from_secs(5));
    manager.shutdown().await;
}
