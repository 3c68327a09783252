//! In-memory collaborators for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{CommandSender, DeviceEnumerator, RelayChild, RelayLauncher, RelayProcess};
use crate::error::{EnumerationError, PersistenceError, RelayError, SendError};
use crate::midi::Command;
use crate::state::{PersistedState, StateStore};

/// Enumerator returning whatever device set the test last configured.
#[derive(Default)]
pub struct FakeEnumerator {
    devices: Mutex<BTreeSet<String>>,
    failing: Mutex<bool>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl FakeEnumerator {
    pub fn with_devices(devices: &[&str]) -> Arc<Self> {
        let fake = Self::default();
        fake.set_devices(devices);
        Arc::new(fake)
    }

    pub fn set_devices(&self, devices: &[&str]) {
        *self.devices.lock() = devices.iter().map(|d| d.to_string()).collect();
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceEnumerator for FakeEnumerator {
    fn name(&self) -> &str {
        "fake"
    }

    async fn enumerate(&self) -> Result<BTreeSet<String>, EnumerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if *self.failing.lock() {
            return Err(EnumerationError::Backend("fake enumeration failure".into()));
        }
        Ok(self.devices.lock().clone())
    }
}

/// One delivered command
#[derive(Debug, Clone)]
pub struct SentCommand {
    pub device: String,
    pub command: String,
    pub at: Instant,
}

/// Sender recording every delivery with its (paused-clock) timestamp.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<SentCommand>>,
    failing_devices: Mutex<BTreeSet<String>>,
}

impl RecordingSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_device(&self, device: &str) {
        self.failing_devices.lock().insert(device.to_string());
    }

    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent.lock().clone()
    }

    /// `"<device>: <command>"` lines in delivery order
    pub fn rendered(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|s| format!("{}: {}", s.device, s.command))
            .collect()
    }
}

#[async_trait]
impl CommandSender for RecordingSender {
    async fn send(&self, device: &str, command: &Command) -> Result<(), SendError> {
        if self.failing_devices.lock().contains(device) {
            return Err(SendError::Rejected {
                device: device.to_string(),
                status: "exit status: 1".into(),
                stderr: "device not found".into(),
            });
        }
        self.sent.lock().push(SentCommand {
            device: device.to_string(),
            command: command.to_string(),
            at: Instant::now(),
        });
        Ok(())
    }
}

/// Shared bookkeeping for [`FakeRelayLauncher`] and its processes.
#[derive(Default)]
pub struct RelayLog {
    pub launches: Mutex<Vec<(String, String, Instant)>>,
    pub terminates: AtomicUsize,
    pub running: AtomicUsize,
}

#[derive(Default)]
pub struct FakeRelayLauncher {
    pub log: Arc<RelayLog>,
    failing: Mutex<bool>,
    /// Processes ignore terminate and never exit
    stubborn: Mutex<bool>,
    output: Mutex<Vec<String>>,
}

impl FakeRelayLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn set_stubborn(&self, stubborn: bool) {
        *self.stubborn.lock() = stubborn;
    }

    pub fn set_output(&self, lines: &[&str]) {
        *self.output.lock() = lines.iter().map(|l| l.to_string()).collect();
    }

    pub fn launches(&self) -> Vec<(String, String)> {
        self.log
            .launches
            .lock()
            .iter()
            .map(|(from, to, _)| (from.clone(), to.clone()))
            .collect()
    }

    pub fn launch_times(&self) -> Vec<Instant> {
        self.log.launches.lock().iter().map(|(_, _, at)| *at).collect()
    }

    pub fn terminates(&self) -> usize {
        self.log.terminates.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.log.running.load(Ordering::SeqCst)
    }
}

impl RelayLauncher for FakeRelayLauncher {
    fn launch(&self, from: &str, to: &str) -> Result<RelayChild, RelayError> {
        if *self.failing.lock() {
            return Err(RelayError::NotFound("receivemidi".into()));
        }

        self.log
            .launches
            .lock()
            .push((from.to_string(), to.to_string(), Instant::now()));
        self.log.running.fetch_add(1, Ordering::SeqCst);

        let mut text = self.output.lock().join("\n");
        if !text.is_empty() {
            text.push('\n');
        }

        Ok(RelayChild {
            process: Box::new(FakeProcess {
                log: self.log.clone(),
                stubborn: *self.stubborn.lock(),
                exited: false,
            }),
            stdout: Box::new(Cursor::new(text.into_bytes())),
            stderr: Box::new(Cursor::new(Vec::new())),
        })
    }
}

struct FakeProcess {
    log: Arc<RelayLog>,
    stubborn: bool,
    exited: bool,
}

#[async_trait]
impl RelayProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(4242)
    }

    fn terminate(&mut self) -> std::io::Result<()> {
        self.log.terminates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn wait(&mut self) -> std::io::Result<()> {
        if self.stubborn {
            std::future::pending::<()>().await;
        }
        if !self.exited {
            self.exited = true;
            self.log.running.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// In-memory state store; records every save in order.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    current: Mutex<PersistedState>,
    history: Mutex<Vec<PersistedState>>,
    fail_saves: Mutex<bool>,
}

impl MemoryStateStore {
    pub fn new(initial: PersistedState) -> Self {
        Self {
            current: Mutex::new(initial),
            ..Default::default()
        }
    }

    /// Make subsequent saves fail (to exercise the non-fatal path).
    pub fn set_fail_saves(&self, fail: bool) {
        *self.fail_saves.lock() = fail;
    }

    /// Every state passed to `save`, oldest first.
    pub fn history(&self) -> Vec<PersistedState> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<PersistedState, PersistenceError> {
        Ok(self.current.lock().clone())
    }

    async fn save(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        if *self.fail_saves.lock() {
            return Err(PersistenceError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "store is read-only",
            )));
        }
        *self.current.lock() = state.clone();
        self.history.lock().push(state.clone());
        Ok(())
    }
}
