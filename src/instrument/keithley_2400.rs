//! Keithley 2400-series SourceMeter Driver
//!
//! Reference: Keithley Series 2400 SourceMeter User's Manual
//!
//! Protocol Overview:
//! - Format: SCPI, long-form lowercase headers
//! - Baud: 9600, 8N1, no flow control
//! - Terminator: CR on commands, line feed on replies
//! - Readings: comma-separated values selected by `:format:elements`
//!   (default voltage, current, resistance, time, status)
//!
//! # Example Usage
//!
//! ```no_run
//! use smu_daq::adapters::SerialChannel;
//! use smu_daq::config::Settings;
//! use smu_daq::instrument::{Keithley2400, SenseConfig, SourceConfig, TriggerConfig};
//! use smu_daq::measurement::RecordShape;
//! use smu_daq::scpi::ScpiSession;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load()?;
//! let channel = SerialChannel::open(&settings.serial)?;
//! let mut smu = Keithley2400::new(ScpiSession::from_settings(channel, &settings.protocol));
//!
//! smu.configure(
//!     &SourceConfig::default(),
//!     &SenseConfig::default(),
//!     &TriggerConfig::default(),
//!     RecordShape::Reduced,
//! )?;
//! smu.set_output(true)?;
//! for record in smu.read()? {
//!     println!("{} V, {} A, {} Ω", record.voltage(), record.current(), record.resistance());
//! }
//! smu.set_output(false)?;
//! smu.close();
//! # Ok(())
//! # }
//! ```

use super::{
    SenseConfig, SenseFunction, SenseReadback, SourceConfig, SourceFunction, SourceReadback,
    TriggerConfig,
};
use crate::adapters::ByteChannel;
use crate::error::AppResult;
use crate::measurement::{parse_burst, MeasurementRecord, RecordShape};
use crate::scpi::ScpiSession;
use tracing::{info, instrument};

/// Driver for the Keithley 2400-series source-measure units.
///
/// Remembers the source and sense functions it last applied so read-backs query the
/// matching subsystem, and the record shape and burst size so readings parse correctly.
pub struct Keithley2400<C: ByteChannel> {
    session: ScpiSession<C>,
    source_function: SourceFunction,
    sense_function: SenseFunction,
    shape: RecordShape,
    trigger: TriggerConfig,
}

impl<C: ByteChannel> Keithley2400<C> {
    /// Wrap an open session. Assumes the instrument is in its power-on state.
    pub fn new(session: ScpiSession<C>) -> Self {
        Self {
            session,
            source_function: SourceFunction::Voltage,
            sense_function: SenseFunction::Current,
            shape: RecordShape::Full,
            trigger: TriggerConfig::default(),
        }
    }

    /// `*IDN?` liveness check.
    pub fn identify(&mut self) -> AppResult<(bool, String)> {
        self.session.identify()
    }

    /// Return the instrument to its default state (`*RST`).
    #[instrument(skip(self), err)]
    pub fn reset(&mut self) -> AppResult<()> {
        self.session.send("*RST")?;
        self.source_function = SourceFunction::Voltage;
        self.sense_function = SenseFunction::Current;
        self.shape = RecordShape::Full;
        self.trigger = TriggerConfig::default();
        Ok(())
    }

    /// Apply a source configuration.
    pub fn apply_source(&mut self, config: &SourceConfig) -> AppResult<()> {
        config.apply(&mut self.session)?;
        self.source_function = config.function;
        Ok(())
    }

    /// Read back the source configuration as raw replies.
    pub fn read_source(&mut self) -> AppResult<SourceReadback> {
        SourceReadback::query(&mut self.session, self.source_function)
    }

    /// Apply a sense configuration. Fails before sending if compliance is below range.
    pub fn apply_sense(&mut self, config: &SenseConfig) -> AppResult<()> {
        config.apply(&mut self.session)?;
        self.sense_function = config.function;
        Ok(())
    }

    /// Read back the sense configuration; fails if compliance has tripped.
    pub fn read_sense(&mut self) -> AppResult<SenseReadback> {
        SenseReadback::query(&mut self.session, self.sense_function)
    }

    /// Apply arm and trigger counts.
    pub fn apply_trigger(&mut self, config: &TriggerConfig) -> AppResult<()> {
        config.apply(&mut self.session)?;
        self.trigger = *config;
        Ok(())
    }

    /// Select which values each reading carries.
    pub fn set_format_elements(&mut self, shape: RecordShape) -> AppResult<()> {
        self.session
            .send(&format!(":format:elements {}", shape.format_elements()))?;
        self.shape = shape;
        Ok(())
    }

    /// Validate everything first, then apply source, sense, trigger and format in turn.
    #[instrument(skip_all, err)]
    pub fn configure(
        &mut self,
        source: &SourceConfig,
        sense: &SenseConfig,
        trigger: &TriggerConfig,
        shape: RecordShape,
    ) -> AppResult<()> {
        source.validate()?;
        sense.validate()?;
        trigger.validate()?;

        self.apply_source(source)?;
        self.apply_sense(sense)?;
        self.apply_trigger(trigger)?;
        self.set_format_elements(shape)?;
        info!(
            samples_per_burst = trigger.samples_per_burst(),
            ?shape,
            "instrument configured"
        );
        Ok(())
    }

    /// Switch the source output on or off.
    pub fn set_output(&mut self, on: bool) -> AppResult<()> {
        self.session
            .send(if on { ":output on" } else { ":output off" })
    }

    /// Start a burst.
    pub fn initiate(&mut self) -> AppResult<()> {
        self.session.send(":initiate")
    }

    /// Fetch the readings of the last burst.
    pub fn fetch(&mut self) -> AppResult<Vec<MeasurementRecord>> {
        self.readings(":fetch?")
    }

    /// Initiate a burst and fetch its readings in one exchange.
    pub fn read(&mut self) -> AppResult<Vec<MeasurementRecord>> {
        self.readings(":read?")
    }

    /// One-shot measurement with the current configuration (`:measure?`).
    pub fn measure(&mut self) -> AppResult<Vec<MeasurementRecord>> {
        self.readings(":measure?")
    }

    /// Record shape readings are parsed with.
    pub fn shape(&self) -> RecordShape {
        self.shape
    }

    /// Last applied trigger configuration.
    pub fn trigger(&self) -> TriggerConfig {
        self.trigger
    }

    /// The underlying session, for the acquisition loop.
    pub fn session_mut(&mut self) -> &mut ScpiSession<C> {
        &mut self.session
    }

    /// Release the channel.
    pub fn close(&mut self) {
        self.session.close();
    }

    fn readings(&mut self, query: &str) -> AppResult<Vec<MeasurementRecord>> {
        let raw = self.session.query(query)?;
        parse_burst(&raw, self.shape, self.trigger.samples_per_burst())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SimulatedKeithley;
    use crate::error::SmuError;
    use crate::instrument::SourceMode;
    use crate::scpi::SettleStrategy;

    fn driver() -> (Keithley2400<SimulatedKeithley>, SimulatedKeithley) {
        let device = SimulatedKeithley::new();
        let probe = device.clone();
        let session = ScpiSession::with_settle(device, SettleStrategy::None);
        (Keithley2400::new(session), probe)
    }

    #[test]
    fn configure_sends_everything_in_order() {
        let (mut smu, probe) = driver();
        smu.configure(
            &SourceConfig::default(),
            &SenseConfig::default(),
            &TriggerConfig::new(1, 4),
            RecordShape::Reduced,
        )
        .unwrap();

        assert_eq!(
            probe.commands(),
            vec![
                ":source:function:mode voltage",
                ":source:voltage:mode fixed",
                ":source:voltage:range minimum",
                ":source:voltage:level:immediate:amplitude 0.1",
                ":sense:function 'current'",
                ":sense:current:protection 1E-3",
                ":sense:current:range 1E-6",
                ":arm:count 1",
                ":trigger:count 4",
                ":format:elements voltage,current,time",
            ]
        );
    }

    #[test]
    fn configure_validates_before_sending_anything() {
        let (mut smu, probe) = driver();
        let bad_sense = SenseConfig::new(SenseFunction::Current, "1E-3", "1E-6");
        let result = smu.configure(
            &SourceConfig::default(),
            &bad_sense,
            &TriggerConfig::default(),
            RecordShape::Reduced,
        );
        assert!(matches!(result, Err(SmuError::Configuration(_))));
        assert_eq!(probe.bytes_received(), 0);
    }

    #[test]
    fn rejected_source_sends_nothing() {
        let bad_amplitude =
            SourceConfig::new(SourceFunction::Voltage, SourceMode::Fixed, "minimum", "tenth");
        let bad_range = SourceConfig::new(SourceFunction::Voltage, SourceMode::Fixed, "lowest", "0.1");

        for config in [bad_amplitude, bad_range] {
            let (mut smu, probe) = driver();
            assert!(matches!(
                smu.apply_source(&config),
                Err(SmuError::Configuration(_))
            ));
            assert_eq!(probe.bytes_received(), 0);
        }
    }

    #[test]
    fn rejected_trigger_sends_nothing() {
        let (mut smu, probe) = driver();
        assert!(matches!(
            smu.apply_trigger(&TriggerConfig::new(0, 1)),
            Err(SmuError::Configuration(_))
        ));
        assert_eq!(probe.bytes_received(), 0);
        assert_eq!(smu.trigger(), TriggerConfig::default());
    }

    #[test]
    fn configure_sends_each_source_command_once() {
        let (mut smu, probe) = driver();
        let oversized = SourceConfig::new(SourceFunction::Voltage, SourceMode::Fixed, "0.21", "1.5");
        smu.configure(
            &oversized,
            &SenseConfig::default(),
            &TriggerConfig::default(),
            RecordShape::Full,
        )
        .unwrap();

        let commands = probe.commands();
        let sent = |command: &str| commands.iter().filter(|c| c.as_str() == command).count();
        assert_eq!(sent(":source:voltage:range 0.21"), 1);
        assert_eq!(sent(":source:voltage:level:immediate:amplitude 1.5"), 1);
    }

    #[test]
    fn read_returns_one_burst() {
        let (mut smu, _probe) = driver();
        smu.configure(
            &SourceConfig::default(),
            &SenseConfig::default(),
            &TriggerConfig::new(2, 3),
            RecordShape::Full,
        )
        .unwrap();
        smu.set_output(true).unwrap();

        let records = smu.read().unwrap();
        assert_eq!(records.len(), 6);
        assert!(records.iter().all(|r| r.voltage() == 0.1));
        assert!(records.windows(2).all(|w| w[0].timestamp() < w[1].timestamp()));
    }

    #[test]
    fn initiate_then_fetch() {
        let (mut smu, _probe) = driver();
        smu.set_format_elements(RecordShape::Reduced).unwrap();
        smu.initiate().unwrap();
        let records = smu.fetch().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status(), None);
    }

    #[test]
    fn read_back_follows_applied_function() {
        let (mut smu, _probe) = driver();
        smu.apply_source(&SourceConfig::new(
            SourceFunction::Current,
            SourceMode::Fixed,
            "1E-3",
            "5E-4",
        ))
        .unwrap();
        let readback = smu.read_source().unwrap();
        assert_eq!(readback.function, "CURR");
        assert_eq!(readback.amplitude, "5.000000E-04");
    }

    #[test]
    fn reset_restores_defaults() {
        let (mut smu, probe) = driver();
        smu.set_format_elements(RecordShape::Reduced).unwrap();
        smu.reset().unwrap();
        assert_eq!(smu.shape(), RecordShape::Full);
        assert_eq!(probe.commands().last().map(String::as_str), Some("*RST"));
    }
}
