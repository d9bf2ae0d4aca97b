//! Teleop control service: maps operator requests onto the device manager and
//! the frame pipeline.
//!
//! One [`TeleopService`] is built at startup and shared by every operator
//! session.  The transport layer calls three things on it:
//!
//! - [`TeleopService::client_connected`] when a session opens,
//! - [`TeleopService::handle`] for every request,
//! - [`TeleopService::client_disconnected`] when the session ends.
//!
//! The video stream follows the operator count: the first operator to join
//! starts it and the last one to leave stops it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};

use teleop_core::protocol::command::DEFAULT_SERVO_SPEED;
use teleop_core::{
    DeviceCommand, DeviceKind, MotorCommand, ProtocolError, ServoCommand, ServoId, ServoParams,
};

use crate::application::broadcast::{BroadcastSink, SubscriberId, Subscription};
use crate::application::device_manager::DeviceManager;
use crate::application::frame_pipeline::{FramePipeline, StreamError};
use crate::domain::messages::{
    ClientRequest, CommandReply, ReplyStatus, ServerEvent, ServerInfo,
};

/// Pause between the two servo calibration moves.
const CALIBRATION_GAP: Duration = Duration::from_millis(500);

pub struct TeleopService {
    devices: Arc<DeviceManager>,
    pipeline: Arc<FramePipeline>,
    sink: Arc<BroadcastSink>,
    calibrate_on_connect: bool,
    /// Held while reconciling the stream with the operator count.
    stream_lifecycle: Mutex<()>,
}

impl TeleopService {
    pub fn new(
        devices: Arc<DeviceManager>,
        pipeline: Arc<FramePipeline>,
        sink: Arc<BroadcastSink>,
        calibrate_on_connect: bool,
    ) -> Self {
        Self {
            devices,
            pipeline,
            sink,
            calibrate_on_connect,
            stream_lifecycle: Mutex::new(()),
        }
    }

    pub fn devices(&self) -> &Arc<DeviceManager> {
        &self.devices
    }

    pub fn pipeline(&self) -> &Arc<FramePipeline> {
        &self.pipeline
    }

    // ── Sessions ──────────────────────────────────────────────────────────────

    /// Registers a new operator and greets it with the current status.
    pub async fn client_connected(self: &Arc<Self>) -> Subscription {
        let sub = self.sink.subscribe();
        info!(client = %sub.id, total = self.sink.subscriber_count(), "operator connected");

        self.sink.emit_to(
            sub.id,
            ServerEvent::ConnectionStatus {
                status: "connected".to_string(),
            },
        );
        self.sink
            .emit_to(sub.id, ServerEvent::MotorStatus(self.devices.motor_status().await));
        self.sink
            .emit_to(sub.id, ServerEvent::ServoStatus(self.devices.servo_status().await));

        if sub.first {
            self.reconcile_stream().await;
        }

        if self.calibrate_on_connect && self.devices.is_connected(DeviceKind::Servo) {
            let service = Arc::clone(self);
            tokio::spawn(async move { service.calibrate_servos().await });
        }
        sub
    }

    pub async fn client_disconnected(&self, id: SubscriberId) {
        let remaining = self.sink.unsubscribe(id);
        info!(client = %id, remaining, "operator disconnected");
        if remaining == 0 {
            self.reconcile_stream().await;
        }
    }

    /// Starts the stream if anyone is watching, stops it otherwise.
    async fn reconcile_stream(&self) {
        let _guard = self.stream_lifecycle.lock().await;
        if self.sink.is_empty() {
            if self.pipeline.stop().await {
                info!("last operator left; stream stopped");
            }
        } else if let Err(e) = self.pipeline.start().await {
            warn!("could not start stream: {e}");
        }
    }

    /// Drives both servos to their zero position without waiting for motion.
    async fn calibrate_servos(&self) {
        for (i, servo) in ServoId::ALL.into_iter().enumerate() {
            if i > 0 {
                sleep(CALIBRATION_GAP).await;
            }
            let command = match ServoCommand::move_to(servo, 0, i64::from(DEFAULT_SERVO_SPEED), false, true) {
                Ok(command) => command,
                Err(e) => {
                    warn!(%servo, "calibration command rejected: {e}");
                    continue;
                }
            };
            let outcome = self.devices.dispatch(command.into()).await;
            if !outcome.accepted {
                warn!(%servo, response = %outcome.response, "calibration failed");
                break;
            }
        }
    }

    /// Stops the stream and the controllers.
    pub async fn shutdown(&self) {
        self.pipeline.stop().await;
        self.devices.shutdown().await;
    }

    // ── Requests ──────────────────────────────────────────────────────────────

    pub async fn handle(&self, request: ClientRequest) -> CommandReply {
        match request {
            ClientRequest::InitMotors => {
                let connected = self.devices.connect(DeviceKind::Motor).await;
                let reply = if connected {
                    CommandReply::ok("motor controller connected")
                } else {
                    CommandReply::failed("no motor controller found")
                };
                CommandReply {
                    connected: Some(connected),
                    ..reply
                }
            }
            ClientRequest::MotorsOff => self.drive(Ok(MotorCommand::Off)).await,
            ClientRequest::SynchronizedMode { speed, reverse } => {
                self.drive(MotorCommand::synchronized(speed, reverse)).await
            }
            ClientRequest::DifferentialMode {
                speed1,
                speed2,
                reverse1,
                reverse2,
            } => {
                self.drive(MotorCommand::differential(speed1, reverse1, speed2, reverse2))
                    .await
            }
            ClientRequest::IndependentMode {
                speed1,
                speed2,
                speed3,
                speed4,
                reverse1,
                reverse2,
                reverse3,
                reverse4,
            } => {
                self.drive(MotorCommand::independent(
                    [speed1, speed2, speed3, speed4],
                    [reverse1, reverse2, reverse3, reverse4],
                ))
                .await
            }
            ClientRequest::MotorStatusRequest => status_reply(
                ReplyStatus::Motor(self.devices.motor_status().await),
                Some(self.devices.is_connected(DeviceKind::Motor)),
            ),
            ClientRequest::ControlServos {
                servo_type,
                action,
                angle,
                speed,
                force_stop,
                calibration,
                priority,
            } => {
                let params = ServoParams {
                    angle,
                    speed,
                    force_stop,
                    calibration,
                    priority,
                };
                match ServoCommand::from_request(&servo_type, &action, params) {
                    Ok(command) => self.dispatch(command.into()).await,
                    Err(e) => invalid(e),
                }
            }
            ClientRequest::ServoStatusRequest => status_reply(
                ReplyStatus::Servo(self.devices.servo_status().await),
                Some(self.devices.is_connected(DeviceKind::Servo)),
            ),
            ClientRequest::DeviceStatusRequest => {
                status_reply(ReplyStatus::Devices(self.devices.device_states()), None)
            }
            ClientRequest::StartStream {
                quality,
                width,
                height,
                fps,
            } => self.start_stream(quality, width, height, fps).await,
            ClientRequest::StopStream => {
                let _guard = self.stream_lifecycle.lock().await;
                let response = if self.pipeline.stop().await {
                    "stream stopped"
                } else {
                    "stream was not running"
                };
                CommandReply::ok(response).with_status(ReplyStatus::Stream(self.pipeline.info().await))
            }
            ClientRequest::SetQuality { quality } => {
                let result = self.pipeline.set_quality(quality);
                self.stream_setting_reply(result.map(|()| format!("quality set to {quality}")))
                    .await
            }
            ClientRequest::SetResolution { width, height } => {
                let result = self.pipeline.set_resolution(width, height).await;
                self.stream_setting_reply(result.map(|_| format!("resolution set to {width}x{height}")))
                    .await
            }
            ClientRequest::SetFps { fps } => {
                let result = self.pipeline.set_fps(fps);
                self.stream_setting_reply(result.map(|()| format!("frame rate set to {fps}")))
                    .await
            }
            ClientRequest::ServerInfo => self.server_info().await,
        }
    }

    async fn drive(&self, command: Result<MotorCommand, ProtocolError>) -> CommandReply {
        match command {
            Ok(command) => self.dispatch(command.into()).await,
            Err(e) => invalid(e),
        }
    }

    async fn dispatch(&self, command: DeviceCommand) -> CommandReply {
        let outcome = self.devices.dispatch(command).await;
        if !outcome.accepted {
            return CommandReply::failed(outcome.response);
        }
        let status = match command {
            DeviceCommand::Motor(_) => ReplyStatus::Motor(self.devices.motor_status().await),
            DeviceCommand::Servo(_) => ReplyStatus::Servo(self.devices.servo_status().await),
        };
        CommandReply::ok(outcome.response).with_status(status)
    }

    async fn start_stream(
        &self,
        quality: Option<i64>,
        width: Option<i64>,
        height: Option<i64>,
        fps: Option<i64>,
    ) -> CommandReply {
        if let Err(e) = self.pipeline.apply_settings(quality, width, height, fps).await {
            return stream_error(e);
        }
        let _guard = self.stream_lifecycle.lock().await;
        match self.pipeline.start().await {
            Ok(started) => {
                let response = if started {
                    "stream started"
                } else {
                    "stream already running"
                };
                CommandReply::ok(response).with_status(ReplyStatus::Stream(self.pipeline.info().await))
            }
            Err(e) => stream_error(e.into()),
        }
    }

    async fn stream_setting_reply(&self, result: Result<String, StreamError>) -> CommandReply {
        match result {
            Ok(response) => {
                CommandReply::ok(response).with_status(ReplyStatus::Stream(self.pipeline.info().await))
            }
            Err(e) => stream_error(e),
        }
    }

    async fn server_info(&self) -> CommandReply {
        let stream = self.pipeline.info().await;
        let info = ServerInfo {
            status: "online".to_string(),
            camera_type: stream.backend,
            stream_active: stream.active,
            clients_connected: self.sink.subscriber_count(),
            quality: stream.quality,
            resolution: format!("{}x{}", stream.width, stream.height),
            fps: stream.fps,
            devices: self.devices.device_states(),
            motor_status: self.devices.motor_status().await,
            servo_status: self.devices.servo_status().await,
        };
        status_reply(ReplyStatus::Server(Box::new(info)), None)
    }
}

fn status_reply(status: ReplyStatus, connected: Option<bool>) -> CommandReply {
    CommandReply {
        success: true,
        response: None,
        status: Some(status),
        connected,
    }
}

fn invalid(error: ProtocolError) -> CommandReply {
    warn!("rejected request: {error}");
    CommandReply::failed(error.to_string())
}

fn stream_error(error: StreamError) -> CommandReply {
    warn!("stream request failed: {error}");
    CommandReply::failed(error.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::device_manager::DeviceSettings;
    use crate::infrastructure::capture::mock::ScriptedSourceFactory;
    use crate::infrastructure::serial::mock::{FakeController, FakePorts};
    use teleop_core::{MotorMode, StreamConfig};

    const MOTOR_PORT: &str = "/dev/ttyACM0";
    const SERVO_PORT: &str = "/dev/ttyUSB0";

    struct Harness {
        service: Arc<TeleopService>,
        motor: FakeController,
        servo: FakeController,
        camera: ScriptedSourceFactory,
    }

    fn harness(calibrate: bool) -> Harness {
        let ports = FakePorts::new();
        let motor = FakeController::motor();
        let servo = FakeController::servo();
        ports.attach(MOTOR_PORT, motor.clone());
        ports.attach(SERVO_PORT, servo.clone());
        let camera = ScriptedSourceFactory::endless();

        let sink = Arc::new(BroadcastSink::new());
        let settings = DeviceSettings {
            candidate_ports: vec![MOTOR_PORT.to_string(), SERVO_PORT.to_string()],
            ..DeviceSettings::default()
        };
        let devices = Arc::new(DeviceManager::new(Arc::new(ports), settings, Arc::clone(&sink)));
        let pipeline = Arc::new(FramePipeline::new(
            Arc::new(camera.clone()),
            Arc::clone(&sink),
            StreamConfig::default(),
        ));
        let service = Arc::new(TeleopService::new(devices, pipeline, sink, calibrate));
        Harness {
            service,
            motor,
            servo,
            camera,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_operator_is_greeted_with_status() {
        // Arrange
        let h = harness(false);

        // Act
        let mut sub = h.service.client_connected().await;

        // Assert
        let names: Vec<&str> = std::iter::from_fn(|| sub.events.try_recv().ok())
            .map(|e| e.name())
            .take(3)
            .collect();
        assert_eq!(names, vec!["connection_status", "motor_status", "servo_status"]);
        h.service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_follows_operator_count() {
        // Arrange
        let h = harness(false);

        // Act / Assert
        let a = h.service.client_connected().await;
        let b = h.service.client_connected().await;
        assert!(h.service.pipeline().is_active().await);
        assert_eq!(h.camera.opens(), 1);

        h.service.client_disconnected(a.id).await;
        assert!(h.service.pipeline().is_active().await);

        h.service.client_disconnected(b.id).await;
        assert!(!h.service.pipeline().is_active().await);
        assert_eq!(h.camera.shutdowns(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_motor_speed_never_reaches_controller() {
        // Arrange
        let h = harness(false);
        h.service.devices().connect(DeviceKind::Motor).await;
        h.motor.clear_written();

        // Act
        let reply = h
            .service
            .handle(ClientRequest::SynchronizedMode {
                speed: 256,
                reverse: false,
            })
            .await;

        // Assert
        assert!(!reply.success);
        assert!(reply.response.unwrap().contains("speed"));
        assert!(h.motor.written().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_request_reports_new_status() {
        let h = harness(false);

        let reply = h
            .service
            .handle(ClientRequest::SynchronizedMode {
                speed: 120,
                reverse: true,
            })
            .await;

        assert!(reply.success);
        match reply.status {
            Some(ReplyStatus::Motor(status)) => {
                assert_eq!(status.mode, MotorMode::Synchronized);
                assert_eq!(status.motor3.speed, 120);
            }
            other => panic!("unexpected status {other:?}"),
        }
        assert_eq!(h.motor.written().last().map(String::as_str), Some("synchronized,120,reverse"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_servo_is_rejected() {
        let h = harness(false);

        let reply = h
            .service
            .handle(ClientRequest::ControlServos {
                servo_type: "sg90".to_string(),
                action: "move".to_string(),
                angle: Some(10),
                speed: None,
                force_stop: false,
                calibration: false,
                priority: false,
            })
            .await;

        assert!(!reply.success);
        assert!(h.servo.written().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibration_on_connect_moves_both_servos() {
        // Arrange
        let h = harness(true);
        h.service.devices().connect(DeviceKind::Servo).await;
        h.servo.clear_written();

        // Act
        let _sub = h.service.client_connected().await;
        sleep(Duration::from_secs(10)).await;

        // Assert
        assert_eq!(
            h.servo.written(),
            vec![
                "servo,mg995,move,0,2,calibration".to_string(),
                "servo,ds04,move,0,2,calibration".to_string(),
            ]
        );
        h.service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stream_rejects_invalid_settings_without_starting() {
        let h = harness(false);

        let reply = h
            .service
            .handle(ClientRequest::StartStream {
                quality: Some(101),
                width: None,
                height: None,
                fps: None,
            })
            .await;

        assert!(!reply.success);
        assert!(!h.service.pipeline().is_active().await);
        assert_eq!(h.camera.opens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_info_reports_clients_and_stream() {
        let h = harness(false);
        let _sub = h.service.client_connected().await;

        let reply = h.service.handle(ClientRequest::ServerInfo).await;

        match reply.status {
            Some(ReplyStatus::Server(info)) => {
                assert_eq!(info.clients_connected, 1);
                assert!(info.stream_active);
                assert_eq!(info.resolution, "640x480");
                assert_eq!(info.camera_type, "scripted");
            }
            other => panic!("unexpected status {other:?}"),
        }
        h.service.shutdown().await;
    }
}
