//! Sense subsystem: what the SMU measures and where it clamps.

use super::parse_number;
use crate::adapters::ByteChannel;
use crate::error::{AppResult, SmuError};
use crate::scpi::ScpiSession;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

/// Range sentinel enabling auto-ranging.
pub const RANGE_AUTO: &str = "auto";

/// Measured quantity.
///
/// Only quantities with a protection node are listed: `:sense:<type>:protection` is
/// sent with every configuration, and the 2400 has none for resistance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenseFunction {
    /// DC current
    Current,
    /// DC voltage
    Voltage,
}

impl SenseFunction {
    /// SCPI keyword used in `:sense:function` and as the `:sense:<type>` node.
    pub fn keyword(self) -> &'static str {
        match self {
            SenseFunction::Current => "current",
            SenseFunction::Voltage => "voltage",
        }
    }
}

/// Sense configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenseConfig {
    /// Measured quantity
    pub function: SenseFunction,
    /// Numeric measurement range or `auto`
    pub range: String,
    /// Protection threshold
    pub compliance: String,
}

impl Default for SenseConfig {
    fn default() -> Self {
        Self {
            function: SenseFunction::Current,
            range: "1E-6".to_string(),
            compliance: "1E-3".to_string(),
        }
    }
}

impl SenseConfig {
    /// Build a sense configuration.
    pub fn new(
        function: SenseFunction,
        range: impl Into<String>,
        compliance: impl Into<String>,
    ) -> Self {
        Self {
            function,
            range: range.into(),
            compliance: compliance.into(),
        }
    }

    /// True when the range is the `auto` sentinel.
    pub fn is_auto_range(&self) -> bool {
        self.range.trim().eq_ignore_ascii_case(RANGE_AUTO)
    }

    /// Reject a compliance threshold below a fixed measurement range.
    ///
    /// A clamp lower than the range would silently cut off readings, so this is enforced
    /// here rather than left to the instrument.
    pub fn validate(&self) -> AppResult<()> {
        let compliance = parse_number("sense compliance", &self.compliance)?;
        if self.is_auto_range() {
            return Ok(());
        }

        let range = parse_number("sense range", &self.range)?;
        if compliance < range {
            return Err(SmuError::Configuration(format!(
                "{} compliance {} is below measurement range {}",
                self.function.keyword(),
                self.compliance.trim(),
                self.range.trim()
            )));
        }
        Ok(())
    }

    /// Function select, protection, then range (or auto-range enable).
    pub fn commands(&self) -> AppResult<Vec<String>> {
        self.validate()?;
        let node = self.function.keyword();
        let range = if self.is_auto_range() {
            format!(":sense:{}:range:auto on", node)
        } else {
            format!(":sense:{}:range {}", node, self.range.trim())
        };

        Ok(vec![
            format!(":sense:function '{}'", node),
            format!(":sense:{}:protection {}", node, self.compliance.trim()),
            range,
        ])
    }

    /// Validate, then send the configuration. Nothing is sent if validation fails.
    #[instrument(skip(self, session), fields(function = self.function.keyword()), err)]
    pub fn apply<C: ByteChannel>(&self, session: &mut ScpiSession<C>) -> AppResult<()> {
        let commands = self.commands()?;
        session.send_all(commands)
    }
}

/// Raw replies to the sense queries plus the decoded compliance flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenseReadback {
    /// Reply to `:sense:function?` (quoted, e.g. `"CURR:DC"`)
    pub function: String,
    /// Reply to `:sense:<type>:range?`
    pub range: String,
    /// Reply to `:sense:<type>:protection?`
    pub compliance: String,
    /// Decoded reply to `:sense:<type>:protection:tripped?`
    pub tripped: bool,
}

impl SenseReadback {
    /// Query the sense configuration of `function`.
    ///
    /// # Errors
    /// `ComplianceTripped` if the instrument reports that protection engaged; whatever
    /// else was read is discarded because the last reading is invalid.
    #[instrument(skip(session), err)]
    pub fn query<C: ByteChannel>(
        session: &mut ScpiSession<C>,
        function: SenseFunction,
    ) -> AppResult<Self> {
        let node = function.keyword();
        let readback = Self {
            function: session.query(":sense:function?")?,
            range: session.query(&format!(":sense:{}:range?", node))?,
            compliance: session.query(&format!(":sense:{}:protection?", node))?,
            tripped: parse_flag(&session.query(&format!(":sense:{}:protection:tripped?", node))?)?,
        };

        if readback.tripped {
            warn!(compliance = %readback.compliance, "compliance tripped");
            return Err(SmuError::ComplianceTripped {
                function: node.to_string(),
                compliance: readback.compliance,
            });
        }
        Ok(readback)
    }
}

fn parse_flag(reply: &str) -> AppResult<bool> {
    match reply.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(SmuError::MalformedData(format!(
            "expected '0' or '1', got '{}'",
            other
        ))),
    }
}
