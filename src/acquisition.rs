//! Continuous acquisition loop.
//!
//! Each iteration triggers one burst, reads it back, parses it and appends the records to
//! the run's dataset, then hands the dataset to an optional live display:
//!
//! ```text
//!   Idle ──run()──▶ Running ──stop flag──▶ Idle
//!                      │
//!                      └──── error ─────▶ Failed
//! ```
//!
//! An error inside an iteration never escapes [`AcquisitionLoop::run`]. It ends the run,
//! and the records gathered so far are returned alongside it. Nothing is retried: a
//! transport or parse failure mid-stream leaves the instrument in an unknown state.
//!
//! Cancellation is cooperative. The stop flag is checked once per iteration boundary, so
//! an iteration always completes or fails as a whole.

use crate::adapters::ByteChannel;
use crate::config::AcquisitionSettings;
use crate::error::{AppResult, SmuError};
use crate::instrument::TriggerConfig;
use crate::measurement::{parse_burst, MeasurementRecord, RecordShape};
use crate::scpi::ScpiSession;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, instrument};

/// How each iteration obtains its readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadCommand {
    /// `:initiate` followed by `:fetch?`
    #[default]
    Fetch,
    /// `:read?`, which initiates and fetches in one exchange
    Read,
}

/// Lifecycle of an [`AcquisitionLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    /// Not running. The initial state, and where a stopped run returns to.
    Idle,
    /// Inside [`AcquisitionLoop::run`]
    Running,
    /// The last run ended with an error
    Failed,
}

/// Receives the dataset after every iteration.
///
/// Refreshing is fire-and-forget: it cannot fail the run and only ever sees a read-only
/// view of the records.
pub trait LiveDisplay {
    /// Show the dataset as it stands after the latest iteration.
    fn refresh(&mut self, records: &[MeasurementRecord]);
}

impl<F: FnMut(&[MeasurementRecord])> LiveDisplay for F {
    fn refresh(&mut self, records: &[MeasurementRecord]) {
        self(records)
    }
}

/// Logs the newest record at INFO.
#[derive(Debug, Default)]
pub struct TracingDisplay;

impl LiveDisplay for TracingDisplay {
    fn refresh(&mut self, records: &[MeasurementRecord]) {
        if let Some(latest) = records.last() {
            info!(
                count = records.len(),
                voltage = latest.voltage(),
                current = latest.current(),
                resistance = latest.resistance(),
                t = latest.timestamp(),
                "reading"
            );
        }
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The stop flag was raised
    Stopped,
    /// An iteration failed; the error that ended the run
    Failed(SmuError),
}

/// Everything a run produced.
#[derive(Debug)]
pub struct AcquisitionRun {
    /// Records in acquisition order, including those gathered before a failure
    pub records: Vec<MeasurementRecord>,
    /// Completed iterations
    pub iterations: usize,
    /// Why the run ended
    pub outcome: RunOutcome,
}

impl AcquisitionRun {
    /// True if the run ended with an error.
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Failed(_))
    }

    /// The error that ended the run, if any.
    pub fn error(&self) -> Option<&SmuError> {
        match &self.outcome {
            RunOutcome::Failed(err) => Some(err),
            RunOutcome::Stopped => None,
        }
    }
}

/// Repeated trigger, read, parse, append.
#[derive(Debug)]
pub struct AcquisitionLoop {
    shape: RecordShape,
    read_command: ReadCommand,
    records_per_iteration: usize,
    state: AcquisitionState,
}

impl AcquisitionLoop {
    /// A loop expecting one record of `shape` per iteration.
    pub fn new(shape: RecordShape, read_command: ReadCommand) -> Self {
        Self {
            shape,
            read_command,
            records_per_iteration: 1,
            state: AcquisitionState::Idle,
        }
    }

    /// A loop for the `[acquisition]` settings, expecting one full burst per iteration.
    pub fn from_settings(settings: &AcquisitionSettings, trigger: &TriggerConfig) -> Self {
        Self::new(settings.shape, settings.read_command)
            .records_per_iteration(trigger.samples_per_burst())
    }

    /// Number of records each iteration must yield (arm count × trigger count).
    pub fn records_per_iteration(mut self, count: usize) -> Self {
        self.records_per_iteration = count;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Record shape used for parsing.
    pub fn shape(&self) -> RecordShape {
        self.shape
    }

    /// Run a single iteration in isolation.
    pub fn acquire_once<C: ByteChannel>(
        &self,
        session: &mut ScpiSession<C>,
    ) -> AppResult<Vec<MeasurementRecord>> {
        let raw = match self.read_command {
            ReadCommand::Fetch => {
                session.send(":initiate")?;
                session.query(":fetch?")?
            }
            ReadCommand::Read => session.query(":read?")?,
        };
        parse_burst(&raw, self.shape, self.records_per_iteration)
    }

    /// Iterate until `stop` is raised or an iteration fails.
    ///
    /// Never returns an error directly: a failure is reported in the returned run together
    /// with every record gathered before it.
    #[instrument(skip_all, fields(shape = ?self.shape, command = ?self.read_command))]
    pub fn run<C: ByteChannel>(
        &mut self,
        session: &mut ScpiSession<C>,
        mut display: Option<&mut dyn LiveDisplay>,
        stop: &AtomicBool,
    ) -> AcquisitionRun {
        self.state = AcquisitionState::Running;
        info!("acquisition started");

        let mut records = Vec::new();
        let mut iterations = 0;

        let outcome = loop {
            if stop.load(Ordering::SeqCst) {
                break RunOutcome::Stopped;
            }

            match self.acquire_once(session) {
                Ok(batch) => {
                    records.extend(batch);
                    iterations += 1;
                    debug!(
                        iteration = iterations,
                        at = %Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                        total = records.len(),
                        "iteration complete"
                    );
                    if let Some(display) = display.as_deref_mut() {
                        display.refresh(&records);
                    }
                }
                Err(err) => {
                    error!(iteration = iterations + 1, error = %err, "acquisition failed");
                    break RunOutcome::Failed(err);
                }
            }
        };

        self.state = match outcome {
            RunOutcome::Stopped => AcquisitionState::Idle,
            RunOutcome::Failed(_) => AcquisitionState::Failed,
        };
        info!(iterations, records = records.len(), state = ?self.state, "acquisition ended");

        AcquisitionRun {
            records,
            iterations,
            outcome,
        }
    }
}
