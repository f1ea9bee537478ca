// src/settings.rs
//
// Bridge settings, stored as TOML. Every field has a default so partial or
// missing files load.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::BridgeError;
use crate::io::LineParams;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BridgeSettings {
    /// How long `open` waits for the OS to answer a permission prompt
    #[serde(default = "default_permission_timeout_ms")]
    pub permission_timeout_ms: u64,
    /// Blocking slice of the background reader; bounds teardown latency
    #[serde(default = "default_reader_poll_ms")]
    pub reader_poll_ms: u64,
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
    /// Write timeout used when the caller passes 0
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_hotplug_poll_ms")]
    pub hotplug_poll_ms: u64,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Pushed to the port right after open
    #[serde(default)]
    pub default_line: LineParams,
}

fn default_permission_timeout_ms() -> u64 {
    10_000
}
fn default_reader_poll_ms() -> u64 {
    50
}
fn default_read_chunk_size() -> usize {
    4096
}
fn default_write_timeout_ms() -> u64 {
    1000
}
fn default_hotplug_poll_ms() -> u64 {
    1000
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            permission_timeout_ms: default_permission_timeout_ms(),
            reader_poll_ms: default_reader_poll_ms(),
            read_chunk_size: default_read_chunk_size(),
            write_timeout_ms: default_write_timeout_ms(),
            hotplug_poll_ms: default_hotplug_poll_ms(),
            log_dir: None,
            default_line: LineParams::default(),
        }
    }
}

impl BridgeSettings {
    /// `<config dir>/usb-serial-bridge/settings.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("usb-serial-bridge").join("settings.toml"))
    }

    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, BridgeError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Settings(format!("Failed to read settings: {}", e)))?;

        let settings: Self = toml::from_str(&content)
            .map_err(|e| BridgeError::Settings(format!("Failed to parse settings: {}", e)))?;

        settings
            .default_line
            .validate()
            .map_err(|e| BridgeError::Settings(format!("Invalid default_line: {}", e)))?;

        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), BridgeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BridgeError::Settings(format!("Failed to create config dir: {}", e)))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| BridgeError::Settings(format!("Failed to serialize settings: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| BridgeError::Settings(format!("Failed to write settings: {}", e)))
    }

    pub fn permission_timeout(&self) -> Duration {
        Duration::from_millis(self.permission_timeout_ms)
    }

    /// Never zero, so the reader thread cannot spin.
    pub fn reader_poll(&self) -> Duration {
        Duration::from_millis(self.reader_poll_ms.max(1))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn hotplug_poll(&self) -> Duration {
        Duration::from_millis(self.hotplug_poll_ms.max(10))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{Parity, StopBits};

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = BridgeSettings::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(settings, BridgeSettings::default());
        assert_eq!(settings.permission_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "permission_timeout_ms = 2500\n\n[default_line]\nbaud_rate = 9600\ndata_bits = 7\nparity = \"even\"\n",
        )
        .unwrap();

        let settings = BridgeSettings::load(&path).unwrap();
        assert_eq!(settings.permission_timeout_ms, 2500);
        assert_eq!(settings.reader_poll_ms, 50);
        assert_eq!(
            settings.default_line,
            LineParams::new(9600, 7, StopBits::One, Parity::Even)
        );
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let mut settings = BridgeSettings::default();
        settings.hotplug_poll_ms = 250;
        settings.log_dir = Some(dir.path().join("logs"));
        settings.save(&path).unwrap();

        assert_eq!(BridgeSettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_invalid_file_is_settings_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[default_line]\nbaud_rate = 0\ndata_bits = 8\n").unwrap();
        assert!(matches!(BridgeSettings::load(&path), Err(BridgeError::Settings(_))));

        std::fs::write(&path, "permission_timeout_ms = \"soon\"").unwrap();
        assert!(matches!(BridgeSettings::load(&path), Err(BridgeError::Settings(_))));
    }
}
