//! Persistence of acquired datasets.
pub mod storage;

pub use storage::CsvWriter;
