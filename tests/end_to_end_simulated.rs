//! End-to-end tests against the simulated 2400-series instrument.
//!
//! Every exchange goes through the full stack: configuration model, SCPI session,
//! channel handle and the simulated device's byte stream.

use smu_daq::adapters::SimulatedKeithley;
use smu_daq::error::SmuError;
use smu_daq::instrument::{
    Keithley2400, SenseConfig, SenseFunction, SourceConfig, SourceFunction, SourceMode,
    TriggerConfig,
};
use smu_daq::measurement::RecordShape;
use smu_daq::scpi::{ScpiSession, SettleStrategy};

const IDENTITY: &str =
    "KEITHLEY INSTRUMENTS INC.,MODEL 2401,4095154,A01 Aug 25 2011 12:57:43/A02  /T/K";

fn connect(device: SimulatedKeithley) -> Keithley2400<SimulatedKeithley> {
    Keithley2400::new(ScpiSession::with_settle(device, SettleStrategy::None))
}

#[test]
fn test_identify_returns_exact_identity() {
    let mut smu = connect(SimulatedKeithley::new());
    let (open, identity) = smu.identify().unwrap();
    assert!(open);
    assert_eq!(identity, IDENTITY);
}

#[test]
fn test_source_readback_uses_instrument_vocabulary() {
    let mut smu = connect(SimulatedKeithley::new());
    smu.apply_source(&SourceConfig::new(
        SourceFunction::Voltage,
        SourceMode::Fixed,
        "minimum",
        "0.1",
    ))
    .unwrap();

    let readback = smu.read_source().unwrap();
    assert_eq!(readback.as_array(), ["VOLT", "FIX", "0.21", "1.000000E-01"]);
}

#[test]
fn test_sense_readback_uses_instrument_vocabulary() {
    let mut smu = connect(SimulatedKeithley::new());
    smu.apply_sense(&SenseConfig::new(SenseFunction::Current, "1E-6", "1E-3"))
        .unwrap();

    let readback = smu.read_sense().unwrap();
    assert_eq!(readback.function, "\"CURR:DC\"");
    assert_eq!(readback.range, "1.050000E-06");
    assert_eq!(readback.compliance, "1.000000E-03");
    assert!(!readback.tripped);
}

#[test]
fn test_compliance_below_range_sends_nothing() {
    let device = SimulatedKeithley::new();
    let probe = device.clone();
    let mut smu = connect(device);

    let result = smu.apply_sense(&SenseConfig::new(SenseFunction::Current, "1E-3", "1E-6"));
    assert!(matches!(result, Err(SmuError::Configuration(_))));
    assert_eq!(probe.bytes_received(), 0);
    assert!(probe.commands().is_empty());
}

#[test]
fn test_tripped_compliance_is_a_typed_failure() {
    // 1 V into 100 Ω wants 10 mA, far above a 1 mA clamp
    let mut smu = connect(SimulatedKeithley::new().with_load(100.0));
    smu.apply_source(&SourceConfig::new(
        SourceFunction::Voltage,
        SourceMode::Fixed,
        "2.1",
        "1",
    ))
    .unwrap();
    smu.apply_sense(&SenseConfig::new(SenseFunction::Current, "1E-3", "1E-3"))
        .unwrap();

    match smu.read_sense() {
        Err(SmuError::ComplianceTripped {
            function,
            compliance,
        }) => {
            assert_eq!(function, "current");
            assert_eq!(compliance, "1.000000E-03");
        }
        other => panic!("expected ComplianceTripped, got {:?}", other),
    }
}

#[test]
fn test_full_shape_reading_flags_compliance() {
    let mut smu = connect(SimulatedKeithley::new().with_load(100.0));
    smu.configure(
        &SourceConfig::new(SourceFunction::Voltage, SourceMode::Fixed, "2.1", "1"),
        &SenseConfig::new(SenseFunction::Current, "1E-3", "1E-3"),
        &TriggerConfig::default(),
        RecordShape::Full,
    )
    .unwrap();
    smu.set_output(true).unwrap();

    let records = smu.measure().unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].in_compliance());
    assert_eq!(records[0].current(), 1e-3);
}

#[test]
fn test_burst_matches_trigger_model() {
    let mut smu = connect(SimulatedKeithley::new());
    smu.configure(
        &SourceConfig::default(),
        &SenseConfig::default(),
        &TriggerConfig::new(3, 4),
        RecordShape::Reduced,
    )
    .unwrap();

    smu.initiate().unwrap();
    let records = smu.fetch().unwrap();
    assert_eq!(records.len(), 12);
    for record in &records {
        assert_eq!(record.resistance(), record.voltage() / record.current());
        assert!(!record.in_compliance());
    }
}

#[test]
fn test_closed_driver_reports_transport_error() {
    let mut smu = connect(SimulatedKeithley::new());
    smu.close();
    let err = smu.identify().unwrap_err();
    assert!(err.is_transport());
    // closing again is harmless
    smu.close();
}
