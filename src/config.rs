//! Configuration System using Figment
//!
//! Settings are layered from three sources, later ones overriding earlier ones:
//! 1. Built-in defaults (a slow two-wire resistance measurement at 0.1 V)
//! 2. A TOML file, `config/smu.toml` by default
//! 3. Environment variables prefixed with `SMU_DAQ_`, nested keys separated by `__`
//!
//! # Example
//! ```no_run
//! use smu_daq::config::Settings;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load()?;
//! settings.validate()?;
//! println!("Port: {}", settings.serial.port);
//! # Ok(())
//! # }
//! ```

use crate::acquisition::ReadCommand;
use crate::error::{AppResult, SmuError};
use crate::instrument::{SenseConfig, SourceConfig, TriggerConfig};
use crate::logging::OutputFormat;
use crate::measurement::RecordShape;
use crate::scpi::SettleMode;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the settings file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/smu.toml";

/// Top-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationSettings,
    /// Serial link parameters
    pub serial: SerialSettings,
    /// Command protocol behaviour
    pub protocol: ProtocolSettings,
    /// Source configuration applied before acquisition
    pub source: SourceConfig,
    /// Sense configuration applied before acquisition
    pub sense: SenseConfig,
    /// Arm/trigger counts
    pub trigger: TriggerConfig,
    /// Acquisition loop options
    pub acquisition: AcquisitionSettings,
    /// Where results are written
    pub storage: StorageSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log line layout (pretty, compact, json)
    #[serde(default)]
    pub log_format: OutputFormat,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: "SMU DAQ".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::default(),
        }
    }
}

/// Serial port parameters. Framing is always 8 data bits, no parity, one stop bit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Port path (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Communication speed
    pub baud_rate: u32,
    /// Read timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            timeout_ms: 3000,
        }
    }
}

impl SerialSettings {
    /// Read timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Command/response protocol settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolSettings {
    /// How to wait between sending a query and reading its reply
    pub settle: SettleMode,
    /// Fixed settle delay in milliseconds (`settle = "fixed"`)
    pub settle_ms: u64,
    /// Polling interval in milliseconds (`settle = "poll"`)
    pub poll_interval_ms: u64,
    /// Echo every command at INFO instead of DEBUG
    pub verbose: bool,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            settle: SettleMode::Fixed,
            settle_ms: 100,
            poll_interval_ms: 10,
            verbose: false,
        }
    }
}

/// Acquisition loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    /// Record layout the instrument is asked to emit
    pub shape: RecordShape,
    /// `fetch` (initiate, then fetch) or `read`
    pub read_command: ReadCommand,
    /// Refresh the live display after every reading
    pub live_display: bool,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            shape: RecordShape::Reduced,
            read_command: ReadCommand::Fetch,
            live_display: true,
        }
    }
}

/// Result persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Output directory for data files
    pub output_dir: PathBuf,
    /// Fixed file name; a timestamped name is generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            file_name: None,
        }
    }
}

impl Settings {
    /// Load settings from `config/smu.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `SMU_DAQ_`.
    /// Example: `SMU_DAQ_SERIAL__PORT=/dev/ttyUSB1`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load settings from a specific file path. A missing file leaves the defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SMU_DAQ_").split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Validate settings after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(SmuError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.serial.port.trim().is_empty() {
            return Err(SmuError::Configuration("serial.port must not be empty".into()));
        }
        if self.serial.baud_rate == 0 {
            return Err(SmuError::Configuration("serial.baud_rate must be positive".into()));
        }
        if self.serial.timeout_ms == 0 {
            return Err(SmuError::Configuration("serial.timeout_ms must be positive".into()));
        }
        if self.protocol.settle == SettleMode::Poll && self.protocol.poll_interval_ms == 0 {
            return Err(SmuError::Configuration(
                "protocol.poll_interval_ms must be positive when settle = \"poll\"".into(),
            ));
        }

        self.source.validate()?;
        self.sense.validate()?;
        self.trigger.validate()?;
        Ok(())
    }

    /// Render the effective settings as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| SmuError::Configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{SenseFunction, SourceFunction};
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.serial.baud_rate, 9600);
        assert_eq!(settings.serial.timeout(), Duration::from_secs(3));
        assert_eq!(settings.protocol.settle_ms, 100);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = Settings::load_from("does/not/exist.toml").unwrap();
        assert_eq!(settings.serial.port, "/dev/ttyUSB0");
        assert_eq!(settings.source.function, SourceFunction::Voltage);
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[serial]
port = "/dev/ttyS3"
baud_rate = 19200
timeout_ms = 500

[sense]
function = "voltage"
range = "auto"
compliance = "21"

[acquisition]
shape = "full"
read_command = "read"
live_display = false
"#
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.serial.port, "/dev/ttyS3");
        assert_eq!(settings.serial.baud_rate, 19200);
        assert_eq!(settings.sense.function, SenseFunction::Voltage);
        assert_eq!(settings.acquisition.shape, RecordShape::Full);
        assert_eq!(settings.acquisition.read_command, ReadCommand::Read);
        // untouched sections keep their defaults
        assert_eq!(settings.protocol.settle, SettleMode::Fixed);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn invalid_log_level_rejected() {
        let mut settings = Settings::default();
        settings.application.log_level = "chatty".into();
        let err = settings.validate().unwrap_err().to_string();
        assert!(err.contains("Invalid log_level 'chatty'"));
    }

    #[test]
    fn compliance_below_range_fails_validation() {
        let mut settings = Settings::default();
        settings.sense.range = "1E-3".into();
        settings.sense.compliance = "1E-6".into();
        assert!(matches!(
            settings.validate(),
            Err(SmuError::Configuration(_))
        ));
    }

    #[test]
    fn renders_as_toml() {
        let rendered = Settings::default().to_toml().unwrap();
        assert!(rendered.contains("[serial]"));
        assert!(rendered.contains("baud_rate = 9600"));
    }
}
