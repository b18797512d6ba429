use crate::domain::models::BdAddr;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable pointing at an explicit settings file.
pub const CONFIG_ENV: &str = "BALANCE_BOARD_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

/// Protocol pacing and polling intervals.
///
/// The board firmware needs spacing between commands, so
/// `command_interval_ms` is a timing contract rather than a tuning knob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    #[serde(default = "default_command_interval_ms")]
    pub command_interval_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_zero_settle_ms")]
    pub zero_settle_ms: u64,
    #[serde(default = "default_zero_sample_interval_ms")]
    pub zero_sample_interval_ms: u64,
    #[serde(default = "default_zero_samples")]
    pub zero_samples: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_pairing_step_ms")]
    pub pairing_step_ms: u64,
    #[serde(default = "default_discovery_secs")]
    pub discovery_secs: u64,
}

impl TimingSettings {
    pub fn command_interval(&self) -> Duration {
        Duration::from_millis(self.command_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn zero_settle(&self) -> Duration {
        Duration::from_millis(self.zero_settle_ms)
    }

    pub fn zero_sample_interval(&self) -> Duration {
        Duration::from_millis(self.zero_sample_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pairing_step(&self) -> Duration {
        Duration::from_millis(self.pairing_step_ms)
    }

    pub fn discovery(&self) -> Duration {
        Duration::from_secs(self.discovery_secs)
    }

    /// All delays zeroed; for driving a session against a scripted transport.
    pub fn immediate() -> Self {
        Self {
            command_interval_ms: 0,
            read_timeout_ms: 0,
            zero_settle_ms: 0,
            zero_sample_interval_ms: 0,
            zero_samples: default_zero_samples(),
            poll_interval_ms: 1,
            pairing_step_ms: 0,
            discovery_secs: 0,
        }
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            command_interval_ms: default_command_interval_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            zero_settle_ms: default_zero_settle_ms(),
            zero_sample_interval_ms: default_zero_sample_interval_ms(),
            zero_samples: default_zero_samples(),
            poll_interval_ms: default_poll_interval_ms(),
            pairing_step_ms: default_pairing_step_ms(),
            discovery_secs: default_discovery_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Name the board advertises during discovery.
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Skip discovery and pair with this address.
    #[serde(default)]
    pub address: Option<BdAddr>,

    #[serde(default)]
    pub log_settings: LogSettings,

    #[serde(default)]
    pub timings: TimingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            address: None,
            log_settings: LogSettings::default(),
            timings: TimingSettings::default(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "balance_board".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_device_name() -> String {
    "Nintendo RVL-WBC-01".to_string()
}
fn default_command_interval_ms() -> u64 {
    100
}
fn default_read_timeout_ms() -> u64 {
    1
}
fn default_zero_settle_ms() -> u64 {
    1000
}
fn default_zero_sample_interval_ms() -> u64 {
    100
}
fn default_zero_samples() -> u32 {
    5
}
fn default_poll_interval_ms() -> u64 {
    10
}
fn default_pairing_step_ms() -> u64 {
    100
}
fn default_discovery_secs() -> u64 {
    6
}

/// Read-only settings source. Nothing is ever written back.
pub struct SettingsService {
    settings: Settings,
    settings_path: Option<PathBuf>,
}

impl SettingsService {
    /// Load from `$BALANCE_BOARD_CONFIG`, else the user config directory,
    /// else fall back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::default_settings_path(),
        };

        match path {
            Some(path) if path.exists() => Self::from_path(&path),
            _ => Ok(Self {
                settings: Settings::default(),
                settings_path: None,
            }),
        }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let settings = Self::load_from_file(path)?;
        Ok(Self {
            settings,
            settings_path: Some(path.to_path_buf()),
        })
    }

    fn default_settings_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("BalanceBoard");
        path.push("settings.json");
        Some(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// File the settings came from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.settings_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.device_name, "Nintendo RVL-WBC-01");
        assert_eq!(settings.timings.command_interval(), Duration::from_millis(100));
        assert_eq!(settings.timings.zero_samples, 5);
        assert!(settings.address.is_none());
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "address": "00:19:1D:AA:BB:CC", "timings": {{ "poll_interval_ms": 25 }} }}"#
        )
        .unwrap();

        let service = SettingsService::from_path(file.path()).unwrap();
        let settings = service.get();
        assert_eq!(
            settings.address.map(|a| a.to_string()),
            Some("00:19:1D:AA:BB:CC".to_string())
        );
        assert_eq!(settings.timings.poll_interval_ms, 25);
        assert_eq!(settings.timings.command_interval_ms, 100);
        assert_eq!(settings.log_settings.level, "info");
        assert_eq!(service.path(), Some(file.path()));
    }

    #[test]
    fn test_invalid_address_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "address": "not-an-address" }}"#).unwrap();
        assert!(SettingsService::from_path(file.path()).is_err());
    }
}
