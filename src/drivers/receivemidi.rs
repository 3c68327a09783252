//! `receivemidi` relay process
//!
//! `receivemidi dev <from> pass <to>` forwards everything the CH2 controller emits to
//! the CH1 device. The process prints each forwarded message, so both output streams
//! are captured and handed to the supervisor for draining.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::{Child, Command as Process};
use tracing::debug;

use super::{RelayChild, RelayLauncher, RelayProcess};
use crate::error::RelayError;

#[derive(Debug, Clone)]
pub struct ReceiveMidiRelay {
    program: String,
}

impl ReceiveMidiRelay {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn relay_args(from: &str, to: &str) -> Vec<String> {
        vec![
            "dev".to_string(),
            from.to_string(),
            "pass".to_string(),
            to.to_string(),
        ]
    }
}

impl RelayLauncher for ReceiveMidiRelay {
    fn launch(&self, from: &str, to: &str) -> Result<RelayChild, RelayError> {
        let args = Self::relay_args(from, to);
        debug!("Launching relay: {} {}", self.program, args.join(" "));

        let mut child = Process::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Abandoned on stop timeout, never force-killed
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => RelayError::NotFound(self.program.clone()),
                _ => RelayError::Spawn(e),
            })?;

        let stdout = child.stdout.take().ok_or(RelayError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(RelayError::MissingPipe("stderr"))?;

        Ok(RelayChild {
            process: Box::new(ChildProcess { child }),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
        })
    }
}

struct ChildProcess {
    child: Child,
}

#[async_trait]
impl RelayProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> std::io::Result<()> {
        // Already reaped
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> std::io::Result<()> {
        // TerminateProcess is the only polite option on Windows
        self.child.start_kill()
    }

    async fn wait(&mut self) -> std::io::Result<()> {
        self.child.wait().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[test]
    fn test_relay_args() {
        assert_eq!(
            ReceiveMidiRelay::relay_args("MC8 Pro", "Quad Cortex"),
            vec!["dev", "MC8 Pro", "pass", "Quad Cortex"]
        );
    }

    #[tokio::test]
    async fn test_missing_tool_is_not_found() {
        let relay = ReceiveMidiRelay::new("/nonexistent/path/to/receivemidi");
        assert!(matches!(
            relay.launch("a", "b"),
            Err(RelayError::NotFound(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_stops_long_running_process() {
        // `yes` repeats its arguments forever, standing in for a relay that keeps printing
        let relay = ReceiveMidiRelay::new("yes");
        let mut child = relay.launch("MC8", "QC").unwrap();
        assert!(child.process.id().is_some());

        let mut lines = BufReader::new(child.stdout).lines();
        let first = lines.next_line().await.unwrap();
        assert_eq!(first.as_deref(), Some("dev MC8 pass QC"));

        child.process.terminate().unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), child.process.wait())
            .await
            .expect("relay did not exit after SIGTERM")
            .unwrap();
    }
}
