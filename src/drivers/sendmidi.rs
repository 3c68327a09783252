//! `sendmidi` command-line tool
//!
//! Used for both device enumeration (`sendmidi list`) and delivery
//! (`sendmidi dev <name> ch <n> pc <p>`). One short-lived process per call.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::process::Output;
use tokio::process::Command as Process;
use tracing::debug;

use super::{CommandSender, DeviceEnumerator};
use crate::error::{EnumerationError, SendError};
use crate::midi::Command;

#[derive(Debug, Clone)]
pub struct SendMidiTool {
    program: String,
}

impl SendMidiTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Build the argument list for delivering `command` to `device`.
    pub fn send_args(device: &str, command: &Command) -> Vec<String> {
        let mut args = vec!["dev".to_string(), device.to_string()];
        args.extend(command.to_tool_args());
        args
    }

    async fn run(&self, args: &[String]) -> std::io::Result<Output> {
        Process::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
    }
}

/// One device name per non-empty line.
pub fn parse_device_list(stdout: &str) -> BTreeSet<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl DeviceEnumerator for SendMidiTool {
    fn name(&self) -> &str {
        "sendmidi"
    }

    async fn enumerate(&self) -> Result<BTreeSet<String>, EnumerationError> {
        let output = self
            .run(&["list".to_string()])
            .await
            .map_err(EnumerationError::ToolUnavailable)?;

        if !output.status.success() {
            return Err(EnumerationError::ToolFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_device_list(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl CommandSender for SendMidiTool {
    async fn send(&self, device: &str, command: &Command) -> Result<(), SendError> {
        let args = Self::send_args(device, command);
        debug!("{} {}", self.program, args.join(" "));

        let output = self.run(&args).await.map_err(SendError::ToolUnavailable)?;

        if !output.status.success() {
            return Err(SendError::Rejected {
                device: device.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}
