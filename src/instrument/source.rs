//! Source subsystem: what the SMU applies to the device under test.

use super::parse_number;
use crate::adapters::ByteChannel;
use crate::error::{AppResult, SmuError};
use crate::scpi::ScpiSession;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

/// Range sentinel selecting the lowest source range.
pub const RANGE_MINIMUM: &str = "minimum";
/// Range sentinel selecting the highest source range.
pub const RANGE_MAXIMUM: &str = "maximum";

/// Quantity the SMU sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFunction {
    /// Source voltage, measure current
    Voltage,
    /// Source current, measure voltage
    Current,
    /// Recall stored source memory locations
    Memory,
}

impl SourceFunction {
    /// SCPI keyword for `:source:function:mode`.
    pub fn keyword(self) -> &'static str {
        match self {
            SourceFunction::Voltage => "voltage",
            SourceFunction::Current => "current",
            SourceFunction::Memory => "memory",
        }
    }

    /// Subsystem holding the mode, range and level of this function.
    ///
    /// Memory sweeps step a voltage source, so they share its subsystem.
    pub fn level_subsystem(self) -> &'static str {
        match self {
            SourceFunction::Current => "current",
            SourceFunction::Voltage | SourceFunction::Memory => "voltage",
        }
    }
}

/// How the source level evolves during a burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Constant level
    Fixed,
    /// Step through a programmed list
    List,
    /// Linear or logarithmic sweep
    Sweep,
}

impl SourceMode {
    /// SCPI keyword for `:source:<subsystem>:mode`.
    pub fn keyword(self) -> &'static str {
        match self {
            SourceMode::Fixed => "fixed",
            SourceMode::List => "list",
            SourceMode::Sweep => "sweep",
        }
    }
}

/// Source configuration.
///
/// `range` and `amplitude` are kept as text so they reach the instrument exactly as
/// written; [`SourceConfig::validate`] checks that they are numbers (or a range sentinel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Sourced quantity
    pub function: SourceFunction,
    /// Level behaviour
    pub mode: SourceMode,
    /// Numeric range, `minimum` or `maximum`
    pub range: String,
    /// Source level
    pub amplitude: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            function: SourceFunction::Voltage,
            mode: SourceMode::Fixed,
            range: RANGE_MINIMUM.to_string(),
            amplitude: "0.1".to_string(),
        }
    }
}

impl SourceConfig {
    /// Build a source configuration.
    pub fn new(
        function: SourceFunction,
        mode: SourceMode,
        range: impl Into<String>,
        amplitude: impl Into<String>,
    ) -> Self {
        Self {
            function,
            mode,
            range: range.into(),
            amplitude: amplitude.into(),
        }
    }

    /// Check that the amplitude is numeric and the range is numeric or a sentinel.
    ///
    /// Whether the range can hold the amplitude is left to the instrument; see
    /// [`Self::range_below_amplitude`].
    pub fn validate(&self) -> AppResult<()> {
        self.numeric_range_and_amplitude().map(|_| ())
    }

    /// True when a numeric range cannot hold the amplitude. `apply` warns about it once.
    pub fn range_below_amplitude(&self) -> bool {
        matches!(
            self.numeric_range_and_amplitude(),
            Ok((Some(range), amplitude)) if range < amplitude.abs()
        )
    }

    /// The four commands realizing this configuration, in the order they must be sent.
    pub fn commands(&self) -> AppResult<Vec<String>> {
        self.validate()?;
        let subsystem = self.function.level_subsystem();
        let range = if self.is_sentinel_range() {
            self.range.trim().to_lowercase()
        } else {
            self.range.trim().to_string()
        };

        Ok(vec![
            format!(":source:function:mode {}", self.function.keyword()),
            format!(":source:{}:mode {}", subsystem, self.mode.keyword()),
            format!(":source:{}:range {}", subsystem, range),
            format!(
                ":source:{}:level:immediate:amplitude {}",
                subsystem,
                self.amplitude.trim()
            ),
        ])
    }

    /// Validate, then send the configuration. Nothing is sent if validation fails.
    #[instrument(skip(self, session), fields(function = self.function.keyword()), err)]
    pub fn apply<C: ByteChannel>(&self, session: &mut ScpiSession<C>) -> AppResult<()> {
        let commands = self.commands()?;
        if self.range_below_amplitude() {
            warn!(
                range = %self.range,
                amplitude = %self.amplitude,
                "source range is below the requested amplitude"
            );
        }
        session.send_all(commands)
    }

    /// Parsed range (`None` for a sentinel) and amplitude.
    fn numeric_range_and_amplitude(&self) -> AppResult<(Option<f64>, f64)> {
        let amplitude = parse_number("source amplitude", &self.amplitude)?;
        if self.is_sentinel_range() {
            return Ok((None, amplitude));
        }
        let range = parse_number("source range", &self.range).map_err(|_| {
            SmuError::Configuration(format!(
                "source range '{}' is neither a number nor one of '{}', '{}'",
                self.range, RANGE_MINIMUM, RANGE_MAXIMUM
            ))
        })?;
        Ok((Some(range), amplitude))
    }

    fn is_sentinel_range(&self) -> bool {
        let range = self.range.trim();
        range.eq_ignore_ascii_case(RANGE_MINIMUM) || range.eq_ignore_ascii_case(RANGE_MAXIMUM)
    }
}

/// Raw replies to the four source queries, exactly as the instrument sent them
/// (`VOLT`, `FIX`, ...). No normalization is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReadback {
    /// Reply to `:source:function:mode?`
    pub function: String,
    /// Reply to `:source:<subsystem>:mode?`
    pub mode: String,
    /// Reply to `:source:<subsystem>:range?`
    pub range: String,
    /// Reply to `:source:<subsystem>:level:immediate:amplitude?`
    pub amplitude: String,
}

impl SourceReadback {
    /// Query the source configuration of `function`'s subsystem.
    #[instrument(skip(session), err)]
    pub fn query<C: ByteChannel>(
        session: &mut ScpiSession<C>,
        function: SourceFunction,
    ) -> AppResult<Self> {
        let subsystem = function.level_subsystem();
        Ok(Self {
            function: session.query(":source:function:mode?")?,
            mode: session.query(&format!(":source:{}:mode?", subsystem))?,
            range: session.query(&format!(":source:{}:range?", subsystem))?,
            amplitude: session.query(&format!(
                ":source:{}:level:immediate:amplitude?",
                subsystem
            ))?,
        })
    }

    /// The replies in query order.
    pub fn as_array(&self) -> [&str; 4] {
        [&self.function, &self.mode, &self.range, &self.amplitude]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_commands_in_order() {
        let config = SourceConfig::new(SourceFunction::Voltage, SourceMode::Fixed, "minimum", "0.1");
        assert_eq!(
            config.commands().unwrap(),
            vec![
                ":source:function:mode voltage",
                ":source:voltage:mode fixed",
                ":source:voltage:range minimum",
                ":source:voltage:level:immediate:amplitude 0.1",
            ]
        );
    }

    #[test]
    fn current_source_uses_current_subsystem() {
        let config = SourceConfig::new(SourceFunction::Current, SourceMode::Sweep, "1E-3", "5E-4");
        let commands = config.commands().unwrap();
        assert_eq!(commands[0], ":source:function:mode current");
        assert_eq!(commands[1], ":source:current:mode sweep");
        assert_eq!(commands[2], ":source:current:range 1E-3");
        assert_eq!(commands[3], ":source:current:level:immediate:amplitude 5E-4");
    }

    #[test]
    fn sentinels_are_case_insensitive() {
        let config = SourceConfig::new(SourceFunction::Voltage, SourceMode::Fixed, "MAXIMUM", "10");
        assert!(config.validate().is_ok());
        assert_eq!(config.commands().unwrap()[2], ":source:voltage:range maximum");
    }

    #[test]
    fn non_numeric_amplitude_rejected() {
        let config = SourceConfig::new(SourceFunction::Voltage, SourceMode::Fixed, "minimum", "tenth");
        let err = config.commands().unwrap_err();
        assert!(matches!(err, SmuError::Configuration(_)));
        assert!(err.to_string().contains("tenth"));
    }

    #[test]
    fn non_numeric_range_rejected() {
        let config = SourceConfig::new(SourceFunction::Voltage, SourceMode::Fixed, "lowest", "0.1");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("lowest"));
    }

    #[test]
    fn range_below_amplitude_is_left_to_the_instrument() {
        let config = SourceConfig::new(SourceFunction::Voltage, SourceMode::Fixed, "0.2", "1.5");
        assert!(config.validate().is_ok());
        assert!(config.range_below_amplitude());

        let config = SourceConfig::new(SourceFunction::Voltage, SourceMode::Fixed, "2", "-1.5");
        assert!(!config.range_below_amplitude());
        let config = SourceConfig::new(SourceFunction::Voltage, SourceMode::Fixed, "minimum", "5");
        assert!(!config.range_below_amplitude());
    }
}
