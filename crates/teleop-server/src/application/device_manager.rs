//! Device manager: discovery, handshake, dispatch and reconnection for the
//! motor and servo controllers.
//!
//! # Connection lifecycle
//!
//! Each controller has its own [`DeviceConnection`] guarded by its own async
//! mutex, so one slow controller never blocks the other and at most one
//! operation per controller is in flight:
//!
//! ```text
//! Disconnected ──► Probing ──► Handshaking ──► Connected
//!      ▲                                           │
//!      └──────── I/O error / no handshake ack ─────┘
//! ```
//!
//! **Probing** walks the configured candidate paths in order, skipping any
//! path the other controller has claimed.  **Handshaking** waits for the board
//! to settle after the port opens (opening resets most USB microcontrollers),
//! discards the boot chatter, writes the controller's handshake line and waits
//! for a reply containing one of its acknowledgement substrings.
//!
//! # Dispatch
//!
//! [`DeviceManager::dispatch`] writes one command and then collects reply
//! lines for the command's response window.  Servo telemetry arriving in that
//! window updates the servo status and is rebroadcast; the first plain reply
//! line ends the window early.  Every non-blank line read is part of the
//! returned reply text.  Connection-layer errors never escape: the
//! controller is marked disconnected and the caller receives a failed
//! [`DispatchOutcome`].
//!
//! # Reconnection
//!
//! A background loop retries every disconnected controller, with a separate
//! exponential [`Backoff`] per controller.  After a successful reconnect the
//! last accepted command is re-sent while the controller's lock is still held,
//! so it reaches the board before any newer command.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use teleop_core::protocol::command::{MotorCommand, ServoAction, ServoCommand, ServoId};
use teleop_core::{
    decode_line, Backoff, ConnectionState, DeviceCommand, DeviceKind, DeviceLine, MotorStatus,
    ServoStatus,
};

use crate::application::broadcast::BroadcastSink;
use crate::domain::config::AppConfig;
use crate::domain::messages::{DeviceStates, ServerEvent};
use crate::infrastructure::serial::{Link, LinkError, LinkOpener};

/// Reply text when a controller accepted a command but printed nothing.
pub const DEFAULT_RESPONSE: &str = "command sent";

/// Pause between the all-stop lines sent at shutdown.
const ALL_STOP_PAUSE: Duration = Duration::from_millis(200);

// ── Settings ──────────────────────────────────────────────────────────────────

/// Timing and matching parameters for discovery, handshake and reconnection.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    pub candidate_ports: Vec<String>,
    pub settle_delay: Duration,
    pub handshake_timeout: Duration,
    pub poll_interval: Duration,
    pub motor_ack: Vec<String>,
    pub servo_ack: Vec<String>,
    pub motor_handshake_attempts: u32,
    pub handshake_retry_pause: Duration,
    pub servo_drain: Duration,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub check_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for DeviceSettings {
    fn from(cfg: &AppConfig) -> Self {
        let serial = &cfg.serial;
        let reconnect = &cfg.reconnect;
        let secs = |value: f64, fallback: u64| {
            Duration::try_from_secs_f64(value).unwrap_or(Duration::from_secs(fallback))
        };
        Self {
            candidate_ports: serial.candidate_ports.clone(),
            settle_delay: Duration::from_millis(serial.settle_delay_ms),
            handshake_timeout: Duration::from_millis(serial.handshake_timeout_ms),
            poll_interval: Duration::from_millis(serial.poll_interval_ms.max(1)),
            motor_ack: serial.motor_ack.clone(),
            servo_ack: serial.servo_ack.iter().map(|s| s.to_lowercase()).collect(),
            motor_handshake_attempts: serial.motor_handshake_attempts.max(1),
            handshake_retry_pause: Duration::from_millis(500),
            servo_drain: Duration::from_millis(serial.servo_drain_ms),
            initial_delay: secs(reconnect.initial_delay_secs, 5),
            max_delay: secs(reconnect.max_delay_secs, 30),
            backoff_factor: reconnect.factor,
            check_interval: Duration::from_millis(reconnect.check_interval_ms.max(1)),
            shutdown_grace: Duration::from_millis(reconnect.shutdown_grace_ms),
        }
    }
}

impl DeviceSettings {
    fn backoff(&self) -> Backoff {
        Backoff::new(self.initial_delay, self.max_delay, self.backoff_factor)
    }
}

// ── Errors and outcomes ───────────────────────────────────────────────────────

/// Error type for controller operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{0} controller not connected")]
    NotConnected(DeviceKind),

    #[error("no {kind} controller acknowledged the handshake")]
    HandshakeFailed { kind: DeviceKind },

    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Result of one dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub accepted: bool,
    pub response: String,
}

impl DispatchOutcome {
    fn accepted(response: String) -> Self {
        Self {
            accepted: true,
            response,
        }
    }

    fn rejected(response: String) -> Self {
        Self {
            accepted: false,
            response,
        }
    }
}

// ── Connection record ─────────────────────────────────────────────────────────

/// Everything the manager knows about one controller.
struct DeviceConnection {
    kind: DeviceKind,
    link: Option<Box<dyn Link>>,
    state: ConnectionState,
    last_command: Option<DeviceCommand>,
    port: Option<String>,
}

impl DeviceConnection {
    fn new(kind: DeviceKind) -> Self {
        Self {
            kind,
            link: None,
            state: ConnectionState::Disconnected,
            last_command: None,
            port: None,
        }
    }
}

/// Per-controller retry schedule owned by the reconnect loop.
struct RetrySchedule {
    backoff: Backoff,
    next_attempt: Option<Instant>,
}

// ── Device manager ────────────────────────────────────────────────────────────

pub struct DeviceManager {
    opener: Arc<dyn LinkOpener>,
    settings: DeviceSettings,
    sink: Arc<BroadcastSink>,
    motor: Mutex<DeviceConnection>,
    servo: Mutex<DeviceConnection>,
    /// Mirror of each connection's state, readable without the device lock.
    states: StdMutex<HashMap<DeviceKind, ConnectionState>>,
    /// Port paths currently owned by a connected controller.
    claimed: StdMutex<HashMap<DeviceKind, String>>,
    motor_status: RwLock<MotorStatus>,
    servo_status: RwLock<ServoStatus>,
    closing: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    reconnect_task: StdMutex<Option<JoinHandle<()>>>,
}

impl DeviceManager {
    pub fn new(
        opener: Arc<dyn LinkOpener>,
        settings: DeviceSettings,
        sink: Arc<BroadcastSink>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            opener,
            settings,
            sink,
            motor: Mutex::new(DeviceConnection::new(DeviceKind::Motor)),
            servo: Mutex::new(DeviceConnection::new(DeviceKind::Servo)),
            states: StdMutex::new(HashMap::new()),
            claimed: StdMutex::new(HashMap::new()),
            motor_status: RwLock::new(MotorStatus::default()),
            servo_status: RwLock::new(ServoStatus::default()),
            closing: AtomicBool::new(false),
            shutdown_tx,
            reconnect_task: StdMutex::new(None),
        }
    }

    fn connection(&self, kind: DeviceKind) -> &Mutex<DeviceConnection> {
        match kind {
            DeviceKind::Motor => &self.motor,
            DeviceKind::Servo => &self.servo,
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn connection_state(&self, kind: DeviceKind) -> ConnectionState {
        lock(&self.states).get(&kind).copied().unwrap_or_default()
    }

    pub fn is_connected(&self, kind: DeviceKind) -> bool {
        self.connection_state(kind).is_connected()
    }

    pub fn device_states(&self) -> DeviceStates {
        DeviceStates {
            motor: self.connection_state(DeviceKind::Motor),
            servo: self.connection_state(DeviceKind::Servo),
        }
    }

    /// Port path claimed by `kind`, if connected.
    pub fn port(&self, kind: DeviceKind) -> Option<String> {
        lock(&self.claimed).get(&kind).cloned()
    }

    pub async fn motor_status(&self) -> MotorStatus {
        *self.motor_status.read().await
    }

    pub async fn servo_status(&self) -> ServoStatus {
        *self.servo_status.read().await
    }

    // ── Connect ───────────────────────────────────────────────────────────────

    /// Drops any existing link to `kind` and probes the candidate ports for it.
    ///
    /// Returns `true` once a port acknowledged the handshake.
    pub async fn connect(&self, kind: DeviceKind) -> bool {
        if self.closing.load(Ordering::SeqCst) {
            return false;
        }
        let mut conn = self.connection(kind).lock().await;
        self.connect_locked(&mut conn).await.is_ok()
    }

    async fn connect_locked(&self, conn: &mut DeviceConnection) -> Result<(), DeviceError> {
        let kind = conn.kind;
        self.drop_link(conn).await;
        self.set_state(conn, ConnectionState::Probing);

        for path in &self.settings.candidate_ports {
            if self.claimed_by_other(kind, path) {
                debug!(device = %kind, port = %path, "skipping port claimed by the other controller");
                continue;
            }

            let mut link = match self.opener.open(path).await {
                Ok(link) => link,
                Err(e) => {
                    debug!(device = %kind, port = %path, "cannot open: {e}");
                    continue;
                }
            };

            self.set_state(conn, ConnectionState::Handshaking);
            match self.handshake(kind, link.as_mut()).await {
                Ok(()) if self.try_claim(kind, path) => {
                    info!(device = %kind, port = %path, "controller connected");
                    conn.link = Some(link);
                    conn.port = Some(path.clone());
                    self.set_state(conn, ConnectionState::Connected);
                    self.announce_connected(kind).await;
                    return Ok(());
                }
                Ok(()) => {
                    debug!(device = %kind, port = %path, "port claimed concurrently; moving on");
                }
                Err(e) => {
                    debug!(device = %kind, port = %path, "handshake rejected: {e}");
                }
            }
            link.close().await;
            self.set_state(conn, ConnectionState::Probing);
        }

        self.set_state(conn, ConnectionState::Disconnected);
        warn!(device = %kind, "no controller found on any candidate port");
        Err(DeviceError::HandshakeFailed { kind })
    }

    async fn handshake(&self, kind: DeviceKind, link: &mut dyn Link) -> Result<(), DeviceError> {
        sleep(self.settings.settle_delay).await;
        link.discard_input().await?;

        let (line, attempts) = match kind {
            DeviceKind::Motor => (
                MotorCommand::Off.encode(),
                self.settings.motor_handshake_attempts,
            ),
            DeviceKind::Servo => (ServoCommand::stop(ServoId::Mg995, false, false).encode(), 1),
        };

        for attempt in 1..=attempts {
            link.write_line(&line).await?;
            if self.await_ack(kind, link).await? {
                if kind == DeviceKind::Servo {
                    self.drain(link, self.settings.servo_drain).await;
                }
                return Ok(());
            }
            if attempt < attempts {
                sleep(self.settings.handshake_retry_pause).await;
            }
        }
        Err(DeviceError::HandshakeFailed { kind })
    }

    async fn await_ack(&self, kind: DeviceKind, link: &mut dyn Link) -> Result<bool, LinkError> {
        let deadline = Instant::now() + self.settings.handshake_timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            match link.read_line((deadline - now).min(self.settings.poll_interval)).await {
                Ok(line) if self.is_ack(kind, &line) => return Ok(true),
                Ok(line) => debug!(device = %kind, %line, "ignoring line during handshake"),
                Err(LinkError::Timeout) => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn is_ack(&self, kind: DeviceKind, line: &str) -> bool {
        match kind {
            DeviceKind::Motor => self.settings.motor_ack.iter().any(|s| line.contains(s.as_str())),
            DeviceKind::Servo => {
                let line = line.to_lowercase();
                self.settings.servo_ack.iter().any(|s| line.contains(s.as_str()))
            }
        }
    }

    /// Reads and discards lines for `window`.
    async fn drain(&self, link: &mut dyn Link, window: Duration) {
        let deadline = Instant::now() + window;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match link.read_line(deadline - now).await {
                Ok(line) => debug!(%line, "drained"),
                Err(_) => break,
            }
        }
    }

    async fn announce_connected(&self, kind: DeviceKind) {
        match kind {
            DeviceKind::Motor => {
                // The handshake line is the all-off command.
                let status = {
                    let mut status = self.motor_status.write().await;
                    status.apply(&MotorCommand::Off);
                    *status
                };
                self.sink.emit(ServerEvent::MotorStatus(status));
            }
            DeviceKind::Servo => {
                let status = self.servo_status().await;
                self.sink.emit(ServerEvent::ServoStatus(status));
            }
        }
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    /// Sends `command` to its controller and collects the reply.
    ///
    /// A disconnected controller gets one inline reconnect attempt first.
    pub async fn dispatch(&self, command: DeviceCommand) -> DispatchOutcome {
        let kind = command.kind();
        if self.closing.load(Ordering::SeqCst) {
            return DispatchOutcome::rejected(DeviceError::NotConnected(kind).to_string());
        }

        let mut conn = self.connection(kind).lock().await;
        if conn.state.is_connected() && !conn.link.as_ref().is_some_and(|link| link.is_open()) {
            warn!(device = %kind, "link closed underneath; marking disconnected");
            self.drop_link(&mut conn).await;
        }
        if !conn.state.is_connected() {
            info!(device = %kind, "not connected; trying to reconnect before dispatch");
            if self.connect_locked(&mut conn).await.is_err() {
                return DispatchOutcome::rejected(DeviceError::NotConnected(kind).to_string());
            }
        }

        match self.send_locked(&mut conn, &command).await {
            Ok(response) => DispatchOutcome::accepted(response),
            Err(e) => {
                warn!(device = %kind, "dispatch failed, marking disconnected: {e}");
                self.drop_link(&mut conn).await;
                DispatchOutcome::rejected(format!("Error: {e}"))
            }
        }
    }

    async fn send_locked(
        &self,
        conn: &mut DeviceConnection,
        command: &DeviceCommand,
    ) -> Result<String, DeviceError> {
        let kind = conn.kind;
        let link = conn
            .link
            .as_mut()
            .ok_or(DeviceError::NotConnected(kind))?;
        let line = command.encode();
        link.write_line(&line).await?;
        debug!(device = %kind, port = link.path(), %line, "command written");

        conn.last_command = Some(*command);
        self.apply_command(command).await;
        self.collect_response(link.as_mut(), command.response_window())
            .await
    }

    /// Reads reply lines until an acknowledgement arrives or `window` ends.
    ///
    /// Every non-blank line is kept in the returned text, telemetry and
    /// unparseable lines included, in arrival order.
    async fn collect_response(
        &self,
        link: &mut dyn Link,
        window: Duration,
    ) -> Result<String, DeviceError> {
        let deadline = Instant::now() + window;
        let mut received: Vec<String> = Vec::new();
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let line = match link
                .read_line((deadline - now).min(self.settings.poll_interval))
                .await
            {
                Ok(line) => line,
                Err(LinkError::Timeout) => continue,
                Err(e) => return Err(e.into()),
            };
            match decode_line(&line) {
                Ok(DeviceLine::Blank) => continue,
                Ok(DeviceLine::Ack(text)) => {
                    received.push(text);
                    break;
                }
                Ok(DeviceLine::ServoAngle { servo, angle }) => {
                    self.record_angle(servo, angle).await
                }
                Ok(DeviceLine::ServoStopped { servo }) => self.record_stopped(servo).await,
                Err(e) => warn!("ignoring telemetry: {e}"),
            }
            received.push(line.trim().to_string());
        }

        if received.is_empty() {
            Ok(DEFAULT_RESPONSE.to_string())
        } else {
            Ok(received.join("\n"))
        }
    }

    async fn apply_command(&self, command: &DeviceCommand) {
        match command {
            DeviceCommand::Motor(cmd) => {
                let status = {
                    let mut status = self.motor_status.write().await;
                    status.apply(cmd);
                    *status
                };
                self.sink.emit(ServerEvent::MotorStatus(status));
            }
            DeviceCommand::Servo(cmd) => {
                let status = {
                    let mut status = self.servo_status.write().await;
                    status.apply(cmd);
                    *status
                };
                if let ServoAction::Move {
                    calibration: true, ..
                } = cmd.action
                {
                    self.sink.emit(ServerEvent::ServoAngle {
                        servo_type: cmd.servo,
                        angle: status.get(cmd.servo).angle,
                    });
                }
                self.sink.emit(ServerEvent::ServoStatus(status));
            }
        }
    }

    async fn record_angle(&self, servo: ServoId, angle: u16) {
        let angle = {
            let mut status = self.servo_status.write().await;
            status.record_angle(servo, angle);
            status.get(servo).angle
        };
        debug!(%servo, angle, "servo position reported");
        self.sink.emit(ServerEvent::ServoAngle {
            servo_type: servo,
            angle,
        });
    }

    async fn record_stopped(&self, servo: ServoId) {
        self.servo_status.write().await.record_stopped(servo);
        debug!(%servo, "servo stop reported");
        self.sink.emit(ServerEvent::ServoStopped {
            servo_type: servo,
            success: true,
        });
    }

    // ── Reconnection ──────────────────────────────────────────────────────────

    /// Reconnects `kind` if needed and replays its last accepted command.
    async fn reconnect(&self, kind: DeviceKind) -> bool {
        let mut conn = self.connection(kind).lock().await;
        if conn.state.is_connected() {
            return true;
        }
        if self.connect_locked(&mut conn).await.is_err() {
            return false;
        }
        if let Some(command) = conn.last_command {
            info!(device = %kind, line = %command.encode(), "replaying last command");
            if let Err(e) = self.send_locked(&mut conn, &command).await {
                warn!(device = %kind, "replay failed: {e}");
                self.drop_link(&mut conn).await;
                return false;
            }
        }
        true
    }

    /// Starts the background reconnect loop.  Calling it twice has no effect.
    pub fn spawn_reconnect_loop(self: &Arc<Self>) {
        let mut task = lock(&self.reconnect_task);
        if task.is_some() {
            return;
        }
        let manager = Arc::clone(self);
        let shutdown = self.shutdown_tx.subscribe();
        *task = Some(tokio::spawn(async move {
            manager.reconnect_loop(shutdown).await;
        }));
    }

    async fn reconnect_loop(&self, mut shutdown: watch::Receiver<bool>) {
        info!("reconnect loop started");
        let mut schedules: HashMap<DeviceKind, RetrySchedule> = DeviceKind::ALL
            .into_iter()
            .map(|kind| {
                let schedule = RetrySchedule {
                    backoff: self.settings.backoff(),
                    next_attempt: None,
                };
                (kind, schedule)
            })
            .collect();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let now = Instant::now();
            let mut due = HashMap::new();
            for (kind, schedule) in schedules.iter_mut() {
                if self.is_connected(*kind) {
                    schedule.next_attempt = None;
                    continue;
                }
                if schedule.next_attempt.map_or(true, |at| at <= now) {
                    due.insert(*kind, ());
                }
            }

            if !due.is_empty() {
                let attempt = |kind: DeviceKind| {
                    let is_due = due.contains_key(&kind);
                    async move {
                        if is_due {
                            Some(self.reconnect(kind).await)
                        } else {
                            None
                        }
                    }
                };
                let results = tokio::select! {
                    _ = shutdown.changed() => break,
                    results = async {
                        tokio::join!(attempt(DeviceKind::Motor), attempt(DeviceKind::Servo))
                    } => results,
                };

                let finished = Instant::now();
                for (kind, result) in [(DeviceKind::Motor, results.0), (DeviceKind::Servo, results.1)] {
                    let Some(connected) = result else { continue };
                    if let Some(schedule) = schedules.get_mut(&kind) {
                        if connected {
                            schedule.backoff.record_success();
                            schedule.next_attempt = None;
                        } else {
                            let delay = schedule.backoff.record_failure();
                            debug!(device = %kind, ?delay, failures = schedule.backoff.failures(), "reconnect failed; backing off");
                            schedule.next_attempt = Some(finished + delay);
                        }
                    }
                }
            }

            let now = Instant::now();
            let wait = schedules
                .values()
                .filter_map(|s| s.next_attempt)
                .map(|at| at.saturating_duration_since(now))
                .fold(self.settings.check_interval, Duration::min);

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = sleep(wait) => {}
            }
        }
        info!("reconnect loop stopped");
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────

    /// Stops the reconnect loop, sends all-stop to connected controllers and
    /// closes both links.
    pub async fn shutdown(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("device manager shutting down");
        let _ = self.shutdown_tx.send(true);

        {
            let mut motor = self.motor.lock().await;
            if motor.state.is_connected() {
                if let Some(link) = motor.link.as_mut() {
                    if let Err(e) = link.write_line(&MotorCommand::Off.encode()).await {
                        warn!("could not stop motors: {e}");
                    }
                }
            }
            self.drop_link(&mut motor).await;
        }

        {
            let mut servo = self.servo.lock().await;
            if servo.state.is_connected() {
                if let Some(link) = servo.link.as_mut() {
                    for id in ServoId::ALL {
                        let line = ServoCommand::stop(id, false, false).encode();
                        if let Err(e) = link.write_line(&line).await {
                            warn!(servo = %id, "could not stop servo: {e}");
                            break;
                        }
                        sleep(ALL_STOP_PAUSE).await;
                    }
                }
            }
            self.drop_link(&mut servo).await;
        }

        let task = lock(&self.reconnect_task).take();
        if let Some(mut handle) = task {
            if timeout(self.settings.shutdown_grace, &mut handle).await.is_err() {
                warn!("reconnect loop did not stop in time; aborting it");
                handle.abort();
            }
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// Closes the link (if any), releases the port claim, marks disconnected.
    async fn drop_link(&self, conn: &mut DeviceConnection) {
        if let Some(mut link) = conn.link.take() {
            link.close().await;
        }
        if conn.port.take().is_some() {
            lock(&self.claimed).remove(&conn.kind);
        }
        self.set_state(conn, ConnectionState::Disconnected);
    }

    /// Records `state`; broadcasts `device_status` when connectivity flips.
    fn set_state(&self, conn: &mut DeviceConnection, state: ConnectionState) {
        let previous = std::mem::replace(&mut conn.state, state);
        lock(&self.states).insert(conn.kind, state);
        if previous == state {
            return;
        }
        debug!(device = %conn.kind, from = ?previous, to = ?state, "connection state");
        if previous.is_connected() != state.is_connected() {
            self.sink.emit(ServerEvent::DeviceStatus(self.device_states()));
        }
    }

    fn claimed_by_other(&self, kind: DeviceKind, path: &str) -> bool {
        lock(&self.claimed)
            .get(&kind.other())
            .is_some_and(|p| p == path)
    }

    fn try_claim(&self, kind: DeviceKind, path: &str) -> bool {
        let mut claimed = lock(&self.claimed);
        if claimed.get(&kind.other()).is_some_and(|p| p == path) {
            return false;
        }
        claimed.insert(kind, path.to_string());
        true
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
