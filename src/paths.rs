//! Application path management for portable and installed modes.
//!
//! - **Dev mode** (debug builds): `config.yaml` in the current working directory wins.
//! - **Portable mode**: a `.portable` marker next to the executable keeps every file
//!   beside it.
//! - **Installed mode** (default): data lives under the platform data directory
//!   (`%APPDATA%\Patch GW`, `~/.local/share/Patch GW`, ...).

use anyhow::Context;
use std::path::PathBuf;
use tracing::{debug, info};

/// Application name used for directories in installed mode
const APP_NAME: &str = "Patch GW";

/// Application paths for config, persisted state, and logs.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Path to the configuration file
    pub config: PathBuf,
    /// Path to the persisted mode/lock state (JSON)
    pub state_file: PathBuf,
    /// Path to the logs directory
    pub logs_dir: PathBuf,
    /// Whether running in portable mode (config next to exe)
    pub is_portable: bool,
}

impl AppPaths {
    /// Detect the appropriate paths based on environment.
    ///
    /// Called before logging is initialized, so diagnostics go to stderr.
    pub fn detect() -> Self {
        let exe_dir = exe_dir();

        #[cfg(debug_assertions)]
        eprintln!("[paths] Executable directory: {}", exe_dir.display());

        #[cfg(debug_assertions)]
        {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            if cwd.join("config.yaml").exists() {
                eprintln!(
                    "[paths] Running in DEV mode (config.yaml found in cwd: {})",
                    cwd.display()
                );
                return Self::rooted_at(cwd, true);
            }
        }

        if exe_dir.join(".portable").exists() {
            #[cfg(debug_assertions)]
            eprintln!("[paths] Running in PORTABLE mode (.portable marker found)");
            return Self::rooted_at(exe_dir, true);
        }

        let app_data = dirs::data_dir()
            .unwrap_or_else(|| {
                eprintln!("[paths] WARNING: no platform data dir, falling back to exe dir");
                exe_dir.clone()
            })
            .join(APP_NAME);

        #[cfg(debug_assertions)]
        eprintln!(
            "[paths] Running in INSTALLED mode (data dir: {})",
            app_data.display()
        );

        Self::rooted_at(app_data, false)
    }

    /// All files under one base directory.
    pub fn rooted_at(base: PathBuf, is_portable: bool) -> Self {
        Self {
            config: base.join("config.yaml"),
            state_file: base.join("state.json"),
            logs_dir: base.join("logs"),
            is_portable,
        }
    }

    /// Override the config location (from `--config`), keeping the other paths.
    pub fn with_config(mut self, config: PathBuf) -> Self {
        self.config = config;
        self
    }

    /// Get the base directory (for displaying in logs)
    pub fn base_dir(&self) -> PathBuf {
        self.config
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Ensure all required directories exist.
    ///
    /// In installed mode, also seeds the config file from `config.example.yaml` next to
    /// the executable when there is none yet.
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        if !self.logs_dir.exists() {
            debug!("Creating logs directory: {}", self.logs_dir.display());
            std::fs::create_dir_all(&self.logs_dir)?;
        }

        if let Some(state_parent) = self.state_file.parent() {
            if !state_parent.exists() {
                std::fs::create_dir_all(state_parent)?;
            }
        }

        if !self.is_portable && !self.config.exists() {
            self.copy_example_config()?;
        }

        Ok(())
    }

    fn copy_example_config(&self) -> anyhow::Result<()> {
        let candidates = [
            exe_dir().join("config.example.yaml"),
            PathBuf::from("config.example.yaml"),
        ];

        for example in candidates.iter().filter(|p| p.exists()) {
            info!("Copying example config to {}", self.config.display());
            std::fs::copy(example, &self.config).with_context(|| {
                format!(
                    "Failed to copy example config from {} to {}",
                    example.display(),
                    self.config.display()
                )
            })?;
            return Ok(());
        }

        info!(
            "No config found, using built-in defaults (create {} to customize)",
            self.config.display()
        );
        Ok(())
    }
}

fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}
