//! Measurement records parsed from instrument readings.

use crate::error::{AppResult, SmuError};
use serde::{Deserialize, Serialize};

/// Status word bit set when the reading hit the compliance limit.
const STATUS_COMPLIANCE_BIT: u32 = 1 << 3;

/// Layout of one reading in a fetched blob.
///
/// The arity is always chosen by the caller; it is never guessed from the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordShape {
    /// voltage, current, resistance, timestamp, status
    Full,
    /// voltage, current, timestamp
    #[default]
    Reduced,
}

impl RecordShape {
    /// Number of comma-separated values per reading.
    pub const fn fields(self) -> usize {
        match self {
            RecordShape::Full => 5,
            RecordShape::Reduced => 3,
        }
    }

    /// Column names for persisted output.
    pub fn header(self) -> &'static [&'static str] {
        match self {
            RecordShape::Full => &["V", "I", "R", "t", "status"],
            RecordShape::Reduced => &["V", "I", "t"],
        }
    }

    /// Argument for `:format:elements` making the instrument emit this shape.
    pub fn format_elements(self) -> &'static str {
        match self {
            RecordShape::Full => "voltage,current,resistance,time,status",
            RecordShape::Reduced => "voltage,current,time",
        }
    }
}

/// One immutable reading.
///
/// Resistance is always derived as `voltage / current` at construction; a value sent by
/// the instrument in the resistance slot is discarded. Zero current gives a non-finite
/// resistance, which is kept as is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementRecord {
    voltage: f64,
    current: f64,
    resistance: f64,
    timestamp: f64,
    status: Option<f64>,
}

impl MeasurementRecord {
    /// Build a record, deriving resistance.
    pub fn new(voltage: f64, current: f64, timestamp: f64, status: Option<f64>) -> Self {
        Self {
            voltage,
            current,
            resistance: voltage / current,
            timestamp,
            status,
        }
    }

    /// Build a record from one reading's values laid out as `shape`.
    pub fn from_fields(fields: &[f64], shape: RecordShape) -> AppResult<Self> {
        if fields.len() != shape.fields() {
            return Err(SmuError::MalformedData(format!(
                "expected {} values for a {:?} record, got {}",
                shape.fields(),
                shape,
                fields.len()
            )));
        }

        Ok(match shape {
            RecordShape::Full => Self::new(fields[0], fields[1], fields[3], Some(fields[4])),
            RecordShape::Reduced => Self::new(fields[0], fields[1], fields[2], None),
        })
    }

    /// Measured voltage (V)
    pub fn voltage(&self) -> f64 {
        self.voltage
    }

    /// Measured current (A)
    pub fn current(&self) -> f64 {
        self.current
    }

    /// Derived resistance (Ω)
    pub fn resistance(&self) -> f64 {
        self.resistance
    }

    /// Instrument timestamp (s)
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Raw status value (full shape only)
    pub fn status(&self) -> Option<f64> {
        self.status
    }

    /// Status value as the instrument's integer status word.
    pub fn status_word(&self) -> Option<u32> {
        self.status
            .filter(|s| s.is_finite() && *s >= 0.0 && *s <= f64::from(u32::MAX))
            .map(|s| s as u32)
    }

    /// True if the status word flags this reading as clamped by compliance.
    pub fn in_compliance(&self) -> bool {
        self.status_word()
            .is_some_and(|word| word & STATUS_COMPLIANCE_BIT != 0)
    }

    /// Values in `shape` column order, as written to disk.
    pub fn values(&self, shape: RecordShape) -> Vec<f64> {
        match shape {
            RecordShape::Full => vec![
                self.voltage,
                self.current,
                self.resistance,
                self.timestamp,
                self.status.unwrap_or(f64::NAN),
            ],
            RecordShape::Reduced => vec![self.voltage, self.current, self.timestamp],
        }
    }
}
