//! Scripted fake controllers for testing.
//!
//! A [`FakeController`] stands in for a microcontroller on the other end of a
//! serial line: it records every line written to it and answers with lines
//! produced by a responder closure.  [`FakePorts`] maps device paths to fake
//! controllers and implements [`LinkOpener`], so the device manager can probe,
//! handshake and dispatch against it exactly as it would against real ports.
//! Like a real tty, a fake port can only be open once at a time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{Link, LinkError, LinkOpener};

type Responder = dyn Fn(&str) -> Vec<String> + Send + Sync;

struct ControllerInner {
    responder: Box<Responder>,
    written: Mutex<Vec<String>>,
    outbox: Mutex<VecDeque<String>>,
    unplugged: AtomicBool,
    opens: AtomicUsize,
    generation: AtomicUsize,
}

/// A fake microcontroller.  Clones share the same state.
#[derive(Clone)]
pub struct FakeController {
    inner: Arc<ControllerInner>,
}

impl FakeController {
    /// Creates a controller that answers each written line with `responder(line)`.
    pub fn new(responder: impl Fn(&str) -> Vec<String> + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                responder: Box::new(responder),
                written: Mutex::new(Vec::new()),
                outbox: Mutex::new(VecDeque::new()),
                unplugged: AtomicBool::new(false),
                opens: AtomicUsize::new(0),
                generation: AtomicUsize::new(0),
            }),
        }
    }

    /// Behaves like the motor firmware: acknowledges `off,0` with
    /// `Motores apagados`, confirms the drive modes and rejects anything else.
    pub fn motor() -> Self {
        Self::new(|line| {
            let mode = line.split(',').next().unwrap_or("");
            match mode {
                "off" => vec!["Motores apagados".to_string()],
                "synchronized" | "differential" | "independent" => vec![format!("OK {line}")],
                _ => vec!["Comando desconocido".to_string()],
            }
        })
    }

    /// Behaves like the servo firmware: reports telemetry for moves and
    /// acknowledges every command with a line mentioning the servo.
    pub fn servo() -> Self {
        Self::new(|line| {
            let fields: Vec<&str> = line.split(',').collect();
            match fields.as_slice() {
                ["servo", id, "move", angle, ..] => vec![
                    format!("servo_angle,{id},{angle}"),
                    format!("servo_stopped,{id}"),
                    format!("Servo {id} en posicion"),
                ],
                ["servo", id, action, ..] => vec![format!("Servo {id} {action} OK")],
                _ => vec!["Comando desconocido".to_string()],
            }
        })
    }

    /// Never answers anything.
    pub fn silent() -> Self {
        Self::new(|_| Vec::new())
    }

    /// Every line written so far, in order.
    pub fn written(&self) -> Vec<String> {
        self.inner.written.lock().expect("lock poisoned").clone()
    }

    /// Forgets the write history.
    pub fn clear_written(&self) {
        self.inner.written.lock().expect("lock poisoned").clear();
    }

    /// Queues an unsolicited line, as if the firmware printed it on its own.
    pub fn push_line(&self, line: impl Into<String>) {
        self.inner
            .outbox
            .lock()
            .expect("lock poisoned")
            .push_back(line.into());
    }

    /// While unplugged, opening fails and open links report I/O errors.
    pub fn set_unplugged(&self, unplugged: bool) {
        self.inner.unplugged.store(unplugged, Ordering::SeqCst);
    }

    /// Closes every link currently open to this controller from the far
    /// side.  Those links report `is_open() == false`; new opens are unaffected.
    pub fn sever_links(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn generation(&self) -> usize {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub fn is_unplugged(&self) -> bool {
        self.inner.unplugged.load(Ordering::SeqCst)
    }

    /// How many times a link to this controller has been opened.
    pub fn open_count(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    fn receive(&self, line: &str) {
        self.inner
            .written
            .lock()
            .expect("lock poisoned")
            .push(line.to_string());
        let replies = (self.inner.responder)(line);
        self.inner
            .outbox
            .lock()
            .expect("lock poisoned")
            .extend(replies);
    }

    fn next_line(&self) -> Option<String> {
        self.inner.outbox.lock().expect("lock poisoned").pop_front()
    }

    fn discard(&self) {
        self.inner.outbox.lock().expect("lock poisoned").clear();
    }
}

/// A set of fake device paths.  Clones share the same set.
#[derive(Clone, Default)]
pub struct FakePorts {
    ports: Arc<Mutex<HashMap<String, FakeController>>>,
    busy: Arc<Mutex<HashSet<String>>>,
    open_log: Arc<Mutex<Vec<(String, Instant)>>>,
}

impl FakePorts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `controller` reachable at `path`.
    pub fn attach(&self, path: impl Into<String>, controller: FakeController) {
        self.ports
            .lock()
            .expect("lock poisoned")
            .insert(path.into(), controller);
    }

    pub fn detach(&self, path: &str) {
        self.ports.lock().expect("lock poisoned").remove(path);
    }

    /// Every path passed to `open`, successful or not, in order.
    pub fn open_log(&self) -> Vec<String> {
        self.open_log
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// When each `open` call happened, in order.
    pub fn open_times(&self) -> Vec<Instant> {
        self.open_log
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|(_, at)| *at)
            .collect()
    }
}

#[async_trait]
impl LinkOpener for FakePorts {
    async fn open(&self, path: &str) -> Result<Box<dyn Link>, LinkError> {
        self.open_log
            .lock()
            .expect("lock poisoned")
            .push((path.to_string(), Instant::now()));

        let controller = self.ports.lock().expect("lock poisoned").get(path).cloned();
        match controller {
            Some(controller) if !controller.is_unplugged() => {
                if !self.busy.lock().expect("lock poisoned").insert(path.to_string()) {
                    return Err(LinkError::PortUnavailable {
                        path: path.to_string(),
                        reason: "device busy".to_string(),
                    });
                }
                controller.inner.opens.fetch_add(1, Ordering::SeqCst);
                controller.discard();
                Ok(Box::new(FakeLink {
                    path: path.to_string(),
                    generation: controller.generation(),
                    controller,
                    busy: Arc::clone(&self.busy),
                    open: true,
                }))
            }
            _ => Err(LinkError::PortUnavailable {
                path: path.to_string(),
                reason: "no such device".to_string(),
            }),
        }
    }
}

/// A [`Link`] to a [`FakeController`].
pub struct FakeLink {
    path: String,
    controller: FakeController,
    busy: Arc<Mutex<HashSet<String>>>,
    generation: usize,
    open: bool,
}

impl FakeLink {
    fn release(&mut self) {
        if std::mem::replace(&mut self.open, false) {
            self.busy.lock().expect("lock poisoned").remove(&self.path);
        }
    }

    fn check(&self) -> Result<(), LinkError> {
        if !self.is_open() {
            return Err(LinkError::Closed);
        }
        if self.controller.is_unplugged() {
            return Err(LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "device unplugged",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Link for FakeLink {
    fn path(&self) -> &str {
        &self.path
    }

    async fn write_line(&mut self, line: &str) -> Result<(), LinkError> {
        self.check()?;
        self.controller.receive(line);
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<String, LinkError> {
        self.check()?;
        if let Some(line) = self.controller.next_line() {
            return Ok(line);
        }
        tokio::time::sleep(timeout).await;
        self.check()?;
        self.controller.next_line().ok_or(LinkError::Timeout)
    }

    async fn discard_input(&mut self) -> Result<(), LinkError> {
        self.check()?;
        self.controller.discard();
        Ok(())
    }

    async fn close(&mut self) {
        self.release();
    }

    fn is_open(&self) -> bool {
        self.open && self.generation == self.controller.generation()
    }
}

impl Drop for FakeLink {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fake_motor_acknowledges_off() {
        // Arrange
        let ports = FakePorts::new();
        ports.attach("/dev/ttyACM0", FakeController::motor());

        // Act
        let mut link = ports.open("/dev/ttyACM0").await.unwrap();
        link.write_line("off,0").await.unwrap();
        let reply = link.read_line(Duration::from_millis(100)).await.unwrap();

        // Assert
        assert_eq!(reply, "Motores apagados");
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_path_is_port_unavailable() {
        let ports = FakePorts::new();
        let result = ports.open("/dev/ttyUSB9").await;
        assert!(matches!(result, Err(LinkError::PortUnavailable { .. })));
        assert_eq!(ports.open_log(), vec!["/dev/ttyUSB9".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_port_is_exclusive_until_closed() {
        // Arrange
        let ports = FakePorts::new();
        ports.attach("/dev/ttyACM0", FakeController::motor());
        let mut first = ports.open("/dev/ttyACM0").await.unwrap();

        // Act
        let second = ports.open("/dev/ttyACM0").await;
        first.close().await;
        let third = ports.open("/dev/ttyACM0").await;

        // Assert
        assert!(matches!(second, Err(LinkError::PortUnavailable { .. })));
        assert!(third.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fake_motor_rejects_servo_lines() {
        let ports = FakePorts::new();
        ports.attach("/dev/ttyACM0", FakeController::motor());
        let mut link = ports.open("/dev/ttyACM0").await.unwrap();

        link.write_line("servo,mg995,stop").await.unwrap();

        let reply = link.read_line(Duration::from_millis(10)).await.unwrap();
        assert_eq!(reply, "Comando desconocido");
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_controller_times_out() {
        let ports = FakePorts::new();
        ports.attach("/dev/ttyACM0", FakeController::silent());
        let mut link = ports.open("/dev/ttyACM0").await.unwrap();

        let result = link.read_line(Duration::from_millis(50)).await;

        assert!(matches!(result, Err(LinkError::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unplugged_controller_fails_writes() {
        let controller = FakeController::motor();
        let ports = FakePorts::new();
        ports.attach("/dev/ttyACM0", controller.clone());
        let mut link = ports.open("/dev/ttyACM0").await.unwrap();

        controller.set_unplugged(true);

        assert!(matches!(
            link.write_line("off,0").await,
            Err(LinkError::Io(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fake_servo_reports_telemetry_for_moves() {
        let controller = FakeController::servo();
        let ports = FakePorts::new();
        ports.attach("/dev/ttyUSB0", controller.clone());
        let mut link = ports.open("/dev/ttyUSB0").await.unwrap();

        link.write_line("servo,mg995,move,90,2").await.unwrap();

        let first = link.read_line(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first, "servo_angle,mg995,90");
        assert_eq!(controller.written(), vec!["servo,mg995,move,90,2".to_string()]);
    }
}
