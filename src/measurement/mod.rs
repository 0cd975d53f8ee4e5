// src/measurement/mod.rs

//! Measurement records and the parser that produces them.

pub mod parser;
pub mod record;

pub use parser::{parse_burst, parse_fields, parse_records};
pub use record::{MeasurementRecord, RecordShape};
