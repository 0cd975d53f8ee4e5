//! Source, sense and trigger configuration, and the Keithley 2400-series driver.
//!
//! Every configuration type validates itself before producing commands, so a rejected
//! configuration never reaches the instrument.

use crate::error::{AppResult, SmuError};

pub mod keithley_2400;
pub mod sense;
pub mod source;
pub mod trigger;

pub use keithley_2400::Keithley2400;
pub use sense::{SenseConfig, SenseFunction, SenseReadback, RANGE_AUTO};
pub use source::{
    SourceConfig, SourceFunction, SourceMode, SourceReadback, RANGE_MAXIMUM, RANGE_MINIMUM,
};
pub use trigger::{TriggerConfig, MAX_SAMPLES_PER_BURST};

/// Parse a numeric configuration field, naming the field and value on failure.
pub(crate) fn parse_number(field: &str, value: &str) -> AppResult<f64> {
    match value.trim().parse::<f64>() {
        Ok(number) if number.is_finite() => Ok(number),
        _ => Err(SmuError::Configuration(format!(
            "{} '{}' is not a finite number",
            field, value
        ))),
    }
}
