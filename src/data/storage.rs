//! CSV persistence of a finished run.
use crate::config::StorageSettings;
use crate::error::{AppResult, SmuError};
use crate::measurement::{MeasurementRecord, RecordShape};
use std::path::{Path, PathBuf};
use tracing::info;

/// Writes a dataset to one CSV file: a header row from the record shape, then one
/// record per line.
///
/// Called once after a run has ended, normally or by failure; never during a run.
#[derive(Debug, Clone)]
pub struct CsvWriter {
    path: PathBuf,
}

impl CsvWriter {
    /// Write to exactly `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Write inside `dir`, creating it if needed. Without a `file_name` a timestamped
    /// `session_<UTC>.csv` name is used.
    pub fn in_directory(dir: &Path, file_name: Option<&str>) -> AppResult<Self> {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| SmuError::Storage(e.to_string()))?;
        }
        let file_name = file_name
            .map(str::to_string)
            .unwrap_or_else(Self::default_file_name);
        Ok(Self::new(dir.join(file_name)))
    }

    /// Writer for the `[storage]` settings.
    pub fn from_settings(settings: &StorageSettings) -> AppResult<Self> {
        Self::in_directory(&settings.output_dir, settings.file_name.as_deref())
    }

    /// `session_<YYYYmmdd_HHMMSS>.csv` in UTC.
    pub fn default_file_name() -> String {
        format!("session_{}.csv", chrono::Utc::now().format("%Y%m%d_%H%M%S"))
    }

    /// Destination file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `records` laid out as `shape`, replacing any existing file. Returns the
    /// number of records written.
    pub fn write(&self, shape: RecordShape, records: &[MeasurementRecord]) -> AppResult<usize> {
        #[cfg(not(feature = "storage_csv"))]
        {
            let _ = (shape, records);
            return Err(SmuError::FeatureNotEnabled("storage_csv".to_string()));
        }

        #[cfg(feature = "storage_csv")]
        {
            let mut writer = csv::Writer::from_path(&self.path)
                .map_err(|e| SmuError::Storage(format!("Failed to create CSV file: {}", e)))?;
            writer
                .write_record(shape.header())
                .map_err(|e| SmuError::Storage(e.to_string()))?;
            for record in records {
                writer
                    .write_record(record.values(shape).iter().map(f64::to_string))
                    .map_err(|e| SmuError::Storage(e.to_string()))?;
            }
            writer
                .flush()
                .map_err(|e| SmuError::Storage(e.to_string()))?;

            info!(path = %self.path.display(), records = records.len(), "dataset written");
            Ok(records.len())
        }
    }
}
