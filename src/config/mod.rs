//! Configuration management for Patch GW
//!
//! Handles loading, parsing and validation of the YAML configuration file. The file
//! is read once at startup: device role bindings are immutable for a run, so a changed
//! file takes effect on the next (re)launch.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::midi::{Command, CommandSpec};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub devices: DevicesConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub enumeration: EnumerationConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub sequencer: SequencerConfig,
    #[serde(default)]
    pub patch_template: PatchTemplateConfig,
}

/// Physical device names bound to each role
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DevicesConfig {
    /// Bluetooth bridge (virtual port)
    #[serde(default = "default_bluetooth_device")]
    pub bluetooth: String,
    /// Controller receiving channel 1 traffic
    #[serde(default = "default_channel1_device")]
    pub channel1: String,
    /// Controller receiving channel 2 traffic
    #[serde(default = "default_channel2_device")]
    pub channel2: String,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            bluetooth: default_bluetooth_device(),
            channel1: default_channel1_device(),
            channel2: default_channel2_device(),
        }
    }
}

/// Paths to the external MIDI command-line tools
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default = "default_sendmidi")]
    pub sendmidi: String,
    #[serde(default = "default_receivemidi")]
    pub receivemidi: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            sendmidi: default_sendmidi(),
            receivemidi: default_receivemidi(),
        }
    }
}

/// Device enumeration backend
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnumerationBackend {
    /// `sendmidi list`
    #[default]
    Sendmidi,
    /// Native output port listing
    Midir,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnumerationConfig {
    #[serde(default)]
    pub backend: EnumerationBackend,
    #[serde(default = "default_enumeration_timeout")]
    pub timeout_ms: u64,
}

impl Default for EnumerationConfig {
    fn default() -> Self {
        Self {
            backend: EnumerationBackend::default(),
            timeout_ms: default_enumeration_timeout(),
        }
    }
}

impl EnumerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Timing constants
///
/// Tuned empirically for one specific rig; other hardware may need different values.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TimingConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_stability_threshold")]
    pub stability_threshold_ms: u64,
    #[serde(default = "default_pre_relay_pause")]
    pub pre_relay_pause_ms: u64,
    #[serde(default = "default_relay_settle")]
    pub relay_settle_ms: u64,
    #[serde(default = "default_pacing")]
    pub pacing_ms: u64,
    #[serde(default = "default_relay_stop_timeout")]
    pub relay_stop_timeout_ms: u64,
    #[serde(default = "default_drain_join_timeout")]
    pub drain_join_timeout_ms: u64,
    #[serde(default = "default_patch_debounce")]
    pub patch_debounce_ms: u64,
    #[serde(default = "default_activity_window")]
    pub activity_window_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            stability_threshold_ms: default_stability_threshold(),
            pre_relay_pause_ms: default_pre_relay_pause(),
            relay_settle_ms: default_relay_settle(),
            pacing_ms: default_pacing(),
            relay_stop_timeout_ms: default_relay_stop_timeout(),
            drain_join_timeout_ms: default_drain_join_timeout(),
            patch_debounce_ms: default_patch_debounce(),
            activity_window_ms: default_activity_window(),
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stability_threshold(&self) -> Duration {
        Duration::from_millis(self.stability_threshold_ms)
    }

    pub fn pre_relay_pause(&self) -> Duration {
        Duration::from_millis(self.pre_relay_pause_ms)
    }

    pub fn relay_settle(&self) -> Duration {
        Duration::from_millis(self.relay_settle_ms)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn relay_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_stop_timeout_ms)
    }

    pub fn drain_join_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_join_timeout_ms)
    }

    pub fn patch_debounce(&self) -> Duration {
        Duration::from_millis(self.patch_debounce_ms)
    }

    pub fn activity_window(&self) -> Duration {
        Duration::from_millis(self.activity_window_ms)
    }
}

/// Command sequencer options
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SequencerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preamble: Option<PreambleConfig>,
}

/// Wake-up command sent before every patch, repeated with a gap after each send
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PreambleConfig {
    pub command: CommandSpec,
    #[serde(default = "default_preamble_repeat")]
    pub repeat: u32,
    #[serde(default = "default_preamble_gap")]
    pub gap_ms: u64,
}

/// Commands prepended to every patch built from a patch-list entry
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PatchTemplateConfig {
    #[serde(default)]
    pub prefix: Vec<CommandSpec>,
}

impl PatchTemplateConfig {
    pub fn prefix_commands(&self) -> crate::error::Result<Vec<Command>> {
        self.prefix.iter().map(Command::try_from).collect()
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        let devices = &self.devices;
        if devices.bluetooth.trim().is_empty() {
            anyhow::bail!("devices.bluetooth cannot be empty");
        }
        if devices.channel1.trim().is_empty() {
            anyhow::bail!("devices.channel1 cannot be empty");
        }
        if devices.channel2.trim().is_empty() {
            anyhow::bail!("devices.channel2 cannot be empty");
        }
        if devices.channel1 == devices.channel2 {
            anyhow::bail!(
                "devices.channel1 and devices.channel2 must differ (both '{}')",
                devices.channel1
            );
        }

        if self.tools.sendmidi.trim().is_empty() {
            anyhow::bail!("tools.sendmidi cannot be empty");
        }
        if self.tools.receivemidi.trim().is_empty() {
            anyhow::bail!("tools.receivemidi cannot be empty");
        }

        if self.timing.poll_interval_ms == 0 {
            anyhow::bail!("timing.poll_interval_ms must be greater than 0");
        }
        if self.enumeration.timeout_ms == 0 {
            anyhow::bail!("enumeration.timeout_ms must be greater than 0");
        }

        self.patch_template
            .prefix_commands()
            .context("Invalid command in patch_template.prefix")?;

        if let Some(preamble) = &self.sequencer.preamble {
            Command::try_from(&preamble.command).context("Invalid sequencer.preamble command")?;
            if preamble.repeat == 0 {
                anyhow::bail!("sequencer.preamble.repeat must be at least 1");
            }
        }

        Ok(())
    }
}

// Default value functions
fn default_bluetooth_device() -> String { "loopMIDI Port".to_string() }
fn default_channel1_device() -> String { "Quad Cortex MIDI Control".to_string() }
fn default_channel2_device() -> String { "Morningstar MC8 Pro".to_string() }
fn default_sendmidi() -> String { "sendmidi".to_string() }
fn default_receivemidi() -> String { "receivemidi".to_string() }
fn default_enumeration_timeout() -> u64 { 3000 }
fn default_poll_interval() -> u64 { 5000 }
fn default_stability_threshold() -> u64 { 10_000 }
fn default_pre_relay_pause() -> u64 { 50 }
fn default_relay_settle() -> u64 { 1000 }
fn default_pacing() -> u64 { 250 }
fn default_relay_stop_timeout() -> u64 { 2000 }
fn default_drain_join_timeout() -> u64 { 1000 }
fn default_patch_debounce() -> u64 { 1000 }
fn default_activity_window() -> u64 { 250 }
fn default_preamble_repeat() -> u32 { 2 }
fn default_preamble_gap() -> u64 { 1500 }

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config.devices, DevicesConfig::default());
        assert_eq!(config.timing, TimingConfig::default());
        assert_eq!(config.timing.stability_threshold(), Duration::from_secs(10));
        assert_eq!(config.enumeration.backend, EnumerationBackend::Sendmidi);
        assert!(config.sequencer.preamble.is_none());
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
devices:
  bluetooth: "IAC Bus 1"
  channel1: "QC"
  channel2: "MC8"
enumeration:
  backend: midir
timing:
  poll_interval_ms: 1000
  pacing_ms: 100
sequencer:
  preamble:
    command: { channel: 2, program: 127 }
patch_template:
  prefix:
    - { channel: 1, cc: 47, value: 2 }
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.devices.bluetooth, "IAC Bus 1");
        assert_eq!(config.enumeration.backend, EnumerationBackend::Midir);
        assert_eq!(config.timing.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.timing.pacing(), Duration::from_millis(100));
        // Unspecified timing fields keep their defaults
        assert_eq!(config.timing.relay_settle(), Duration::from_secs(1));

        let preamble = config.sequencer.preamble.unwrap();
        assert_eq!(preamble.repeat, 2);
        assert_eq!(preamble.gap_ms, 1500);
        assert_eq!(config.patch_template.prefix_commands().unwrap().len(), 1);
    }

    #[test]
    fn test_validation_rejects_shared_usb_device() {
        let yaml = "devices:\n  channel1: \"Same\"\n  channel2: \"Same\"\n";
        assert!(AppConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_validation_rejects_zero_poll_interval() {
        assert!(AppConfig::from_yaml("timing:\n  poll_interval_ms: 0\n").is_err());
    }

    #[test]
    fn test_validation_rejects_bad_prefix() {
        let yaml = "patch_template:\n  prefix:\n    - { channel: 3, program: 1 }\n";
        assert!(AppConfig::from_yaml(yaml).is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "devices:\n  bluetooth: \"BT Bridge\"\n").unwrap();

        let loaded = AppConfig::load(file.path()).await.unwrap();
        assert_eq!(loaded.devices.bluetooth, "BT Bridge");
        assert_eq!(loaded.devices.channel1, DevicesConfig::default().channel1);
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_file() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "timing:\n  poll_interval_ms: 0\n").unwrap();
        assert!(AppConfig::load(file.path()).await.is_err());
    }
}
