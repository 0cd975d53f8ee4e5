//! Simulated Keithley 2400-series SourceMeter for testing
//!
//! `SimulatedKeithley` implements [`ByteChannel`] and answers the SCPI vocabulary the
//! driver uses, without any hardware attached. It provides:
//! - A resistive load model with current and voltage compliance
//! - `:format:elements`, arm/trigger counts and burst readings
//! - Controllable fault injection (missing or malformed reading replies)
//! - A command log for test verification
//!
//! Clones share the same device, so a test keeps one clone as a probe while the session
//! owns the other.
//!
//! # Example
//!
//! ```
//! use smu_daq::adapters::SimulatedKeithley;
//! use smu_daq::scpi::{ScpiSession, SettleStrategy};
//!
//! let device = SimulatedKeithley::new();
//! let probe = device.clone();
//! let mut session = ScpiSession::with_settle(device, SettleStrategy::None);
//!
//! session.send(":output on").unwrap();
//! assert_eq!(session.query(":output?").unwrap(), "1");
//! assert_eq!(probe.commands(), vec![":output on", ":output?"]);
//! ```

use super::ByteChannel;
use crate::instrument::{SenseFunction, SourceFunction, SourceMode};
use crate::scpi::format_scientific;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace};

/// Identity string reported by `*IDN?` unless overridden.
pub const DEFAULT_IDENTITY: &str =
    "KEITHLEY INSTRUMENTS INC.,MODEL 2401,4095154,A01 Aug 25 2011 12:57:43/A02  /T/K";

/// Load connected to the simulated terminals unless overridden (Ω).
pub const DEFAULT_LOAD_OHMS: f64 = 1.0e6;

const READ_TIMEOUT: Duration = Duration::from_secs(3);
const SAMPLE_INTERVAL_S: f64 = 0.1;
/// Placeholder the 2400 emits in the resistance slot when resistance is not measured.
const RESISTANCE_PLACEHOLDER: f64 = 9.91e37;
const STATUS_COMPLIANCE: f64 = 8.0;

const VOLTAGE_RANGES: &[f64] = &[0.21, 2.1, 21.0, 210.0];
const VOLTAGE_RANGE_LABELS: &[&str] = &["0.21", "2.1", "21", "210"];
const CURRENT_RANGES: &[f64] = &[1.05e-6, 10.5e-6, 105e-6, 1.05e-3, 10.5e-3, 105e-3, 1.05];

/// What happens to reading queries once the fault triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// No reply at all; the host times out
    Silent,
    /// A reply containing a non-numeric token
    Malformed,
}

/// In-process SCPI emulator of a 2400-series SourceMeter.
#[derive(Debug, Clone)]
pub struct SimulatedKeithley {
    state: Arc<Mutex<State>>,
}

impl SimulatedKeithley {
    /// A device with the default identity and a 1 MΩ load.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::new())),
        }
    }

    /// Connect a different load resistance.
    pub fn with_load(self, ohms: f64) -> Self {
        self.lock().load_ohms = ohms;
        self
    }

    /// Report a different `*IDN?` string.
    pub fn with_identity(self, identity: impl Into<String>) -> Self {
        self.lock().identity = identity.into();
        self
    }

    /// After `readings` answered reading queries, stop answering them.
    pub fn fail_after(self, readings: usize) -> Self {
        self.lock().fault = Some((readings, Fault::Silent));
        self
    }

    /// After `readings` answered reading queries, answer with garbage.
    pub fn malformed_after(self, readings: usize) -> Self {
        self.lock().fault = Some((readings, Fault::Malformed));
        self
    }

    /// Every command received so far, exactly as sent and without terminator.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Forget the command log.
    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    /// Total bytes written by the host.
    pub fn bytes_received(&self) -> usize {
        self.lock().bytes_received
    }

    /// Reading queries (`:fetch?`, `:read?`, `:measure?`) answered so far.
    pub fn readings_served(&self) -> usize {
        self.lock().readings_served
    }

    /// Whether the source output is switched on.
    pub fn output_enabled(&self) -> bool {
        self.lock().model.output
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not take the device down with it
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimulatedKeithley {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for SimulatedKeithley {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.output.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "simulated device has nothing to send",
            ));
        }
        let count = buf.len().min(state.output.len());
        for (slot, byte) in buf.iter_mut().zip(state.output.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

impl Write for SimulatedKeithley {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        state.bytes_received += buf.len();
        for &byte in buf {
            if byte == b'\r' {
                let raw = std::mem::take(&mut state.pending);
                state.handle(&String::from_utf8_lossy(&raw));
            } else {
                state.pending.push(byte);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteChannel for SimulatedKeithley {
    fn describe(&self) -> String {
        "simulated".to_string()
    }

    fn read_timeout(&self) -> Duration {
        READ_TIMEOUT
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.lock().output.len())
    }

    fn discard_input(&mut self) -> io::Result<()> {
        let mut state = self.lock();
        if !state.output.is_empty() {
            debug!(bytes = state.output.len(), "simulated device output discarded");
            state.output.clear();
        }
        Ok(())
    }
}

#[derive(Debug)]
struct State {
    identity: String,
    load_ohms: f64,
    fault: Option<(usize, Fault)>,
    commands: Vec<String>,
    bytes_received: usize,
    readings_served: usize,
    pending: Vec<u8>,
    output: VecDeque<u8>,
    model: Model,
}

impl State {
    fn new() -> Self {
        Self {
            identity: DEFAULT_IDENTITY.to_string(),
            load_ohms: DEFAULT_LOAD_OHMS,
            fault: None,
            commands: Vec::new(),
            bytes_received: 0,
            readings_served: 0,
            pending: Vec::new(),
            output: VecDeque::new(),
            model: Model::default(),
        }
    }

    fn handle(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        self.commands.push(line.to_string());

        let lower = line.to_ascii_lowercase();
        let (header, argument) = match lower.split_once(char::is_whitespace) {
            Some((header, argument)) => (header, argument.trim()),
            None => (lower.as_str(), ""),
        };
        let (header, is_query) = match header.strip_suffix('?') {
            Some(header) => (header, true),
            None => (header, false),
        };
        let nodes: Vec<&str> = header
            .trim_start_matches(':')
            .split(':')
            .map(canonical)
            .filter(|node| !matches!(*node, "immediate" | "amplitude" | "dc"))
            .collect();

        if is_query {
            match self.answer(&nodes) {
                Some(reply) => {
                    trace!(query = line, reply = %reply, "simulated reply");
                    self.output.extend(reply.as_bytes());
                    self.output.extend(b"\r\n");
                }
                None => debug!(query = line, "simulated device left query unanswered"),
            }
        } else {
            self.apply(&nodes, argument);
        }
    }

    fn apply(&mut self, nodes: &[&str], argument: &str) {
        let model = &mut self.model;
        match nodes {
            ["*rst"] => self.model = Model::default(),
            ["source", "function", "mode"] | ["source", "function"] => {
                if let Some(function) = parse_source_function(argument) {
                    model.source_function = function;
                }
            }
            ["source", subsystem, rest @ ..] => {
                let Some(source) = model.source_mut(subsystem) else {
                    return;
                };
                match rest {
                    ["mode"] => {
                        if let Some(mode) = parse_source_mode(argument) {
                            source.mode = mode;
                        }
                    }
                    ["range"] => {
                        if let Some(index) = pick_range(source.ranges, argument) {
                            source.range = index;
                        }
                    }
                    ["level"] => {
                        if let Ok(level) = argument.parse() {
                            source.level = level;
                        }
                    }
                    _ => {}
                }
            }
            ["sense", "function"] => {
                if let Some(function) = parse_sense_function(argument) {
                    model.sense_function = function;
                }
            }
            ["sense", node, rest @ ..] => {
                let Some(function) = parse_sense_function(node) else {
                    return;
                };
                let sense = model.sense_mut(function);
                match rest {
                    ["range"] => {
                        if let Some(index) = pick_range(sense.ranges, argument) {
                            sense.range = index;
                            sense.auto = false;
                        }
                    }
                    ["range", "auto"] => {
                        if let Some(on) = parse_switch(argument) {
                            sense.auto = on;
                        }
                    }
                    ["protection"] => {
                        if let Ok(limit) = argument.parse() {
                            sense.protection = limit;
                        }
                    }
                    _ => {}
                }
            }
            ["arm", "count"] => {
                if let Ok(count) = argument.parse() {
                    model.arm_count = count;
                }
            }
            ["trigger", "count"] => {
                if let Ok(count) = argument.parse() {
                    model.trigger_count = count;
                }
            }
            ["format", "elements"] => {
                let mut elements: Vec<Element> =
                    argument.split(',').filter_map(Element::parse).collect();
                elements.sort();
                elements.dedup();
                if !elements.is_empty() {
                    model.elements = elements;
                }
            }
            ["output"] | ["output", "state"] => {
                if let Some(on) = parse_switch(argument) {
                    model.output = on;
                }
            }
            ["initiate"] => {
                let load = self.load_ohms;
                self.model.run_burst(load);
            }
            _ => debug!(?nodes, "simulated device ignored command"),
        }
    }

    fn answer(&mut self, nodes: &[&str]) -> Option<String> {
        let load = self.load_ohms;
        let model = &mut self.model;
        match nodes {
            ["*idn"] => Some(self.identity.clone()),
            ["source", "function", "mode"] | ["source", "function"] => {
                Some(model.source_function_reply().to_string())
            }
            ["source", subsystem, rest @ ..] => {
                let voltage = *subsystem == "voltage";
                let source = model.source_mut(subsystem)?;
                match rest {
                    ["mode"] => Some(source_mode_reply(source.mode).to_string()),
                    ["range"] if voltage => Some(VOLTAGE_RANGE_LABELS[source.range].to_string()),
                    ["range"] => Some(format_scientific(source.ranges[source.range])),
                    ["level"] => Some(format_scientific(source.level)),
                    _ => None,
                }
            }
            ["sense", "function"] => Some(model.sense_function_reply().to_string()),
            ["sense", node, rest @ ..] => {
                let function = parse_sense_function(node)?;
                let tripped = model.operating_point(load).2;
                let sense = model.sense_mut(function);
                match rest {
                    ["range"] => Some(format_scientific(sense.ranges[sense.range])),
                    ["range", "auto"] => Some(flag(sense.auto)),
                    ["protection"] => Some(format_scientific(sense.protection)),
                    ["protection", "tripped"] => Some(flag(tripped)),
                    _ => None,
                }
            }
            ["arm", "count"] => Some(model.arm_count.to_string()),
            ["trigger", "count"] => Some(model.trigger_count.to_string()),
            ["format", "elements"] => Some(
                model
                    .elements
                    .iter()
                    .map(|e| e.reply())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            ["output"] | ["output", "state"] => Some(flag(model.output)),
            ["fetch"] => self.readings(false),
            ["read"] | ["measure"] => self.readings(true),
            _ => None,
        }
    }

    fn readings(&mut self, initiate: bool) -> Option<String> {
        if let Some((after, fault)) = self.fault {
            if self.readings_served >= after {
                return match fault {
                    Fault::Silent => None,
                    Fault::Malformed => Some("+1.000000E-01,#OVERFLOW,+0.000000E+00".to_string()),
                };
            }
        }
        if initiate {
            let load = self.load_ohms;
            self.model.run_burst(load);
        }
        let burst = self.model.last_burst.clone()?;
        self.readings_served += 1;
        Some(burst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Element {
    Voltage,
    Current,
    Resistance,
    Time,
    Status,
}

impl Element {
    const ALL: [Element; 5] = [
        Element::Voltage,
        Element::Current,
        Element::Resistance,
        Element::Time,
        Element::Status,
    ];

    fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.starts_with("volt") {
            Some(Element::Voltage)
        } else if token.starts_with("curr") {
            Some(Element::Current)
        } else if token.starts_with("res") {
            Some(Element::Resistance)
        } else if token.starts_with("time") {
            Some(Element::Time)
        } else if token.starts_with("stat") {
            Some(Element::Status)
        } else {
            None
        }
    }

    fn reply(self) -> &'static str {
        match self {
            Element::Voltage => "VOLT",
            Element::Current => "CURR",
            Element::Resistance => "RES",
            Element::Time => "TIME",
            Element::Status => "STAT",
        }
    }
}

#[derive(Debug, Clone)]
struct SourceNode {
    ranges: &'static [f64],
    mode: SourceMode,
    range: usize,
    level: f64,
}

#[derive(Debug, Clone)]
struct SenseNode {
    ranges: &'static [f64],
    range: usize,
    auto: bool,
    protection: f64,
}

/// Instrument settings; `*RST` puts everything here back to its default.
#[derive(Debug, Clone)]
struct Model {
    source_function: SourceFunction,
    voltage_source: SourceNode,
    current_source: SourceNode,
    sense_function: SenseFunction,
    current_sense: SenseNode,
    voltage_sense: SenseNode,
    arm_count: u32,
    trigger_count: u32,
    elements: Vec<Element>,
    output: bool,
    samples: u64,
    last_burst: Option<String>,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            source_function: SourceFunction::Voltage,
            voltage_source: SourceNode {
                ranges: VOLTAGE_RANGES,
                mode: SourceMode::Fixed,
                range: 2,
                level: 0.0,
            },
            current_source: SourceNode {
                ranges: CURRENT_RANGES,
                mode: SourceMode::Fixed,
                range: 0,
                level: 0.0,
            },
            sense_function: SenseFunction::Current,
            current_sense: SenseNode {
                ranges: CURRENT_RANGES,
                range: 2,
                auto: true,
                protection: 105e-6,
            },
            voltage_sense: SenseNode {
                ranges: VOLTAGE_RANGES,
                range: 2,
                auto: true,
                protection: 21.0,
            },
            arm_count: 1,
            trigger_count: 1,
            elements: Element::ALL.to_vec(),
            output: false,
            samples: 0,
            last_burst: None,
        }
    }
}

impl Model {
    fn source_mut(&mut self, subsystem: &str) -> Option<&mut SourceNode> {
        match subsystem {
            "voltage" => Some(&mut self.voltage_source),
            "current" => Some(&mut self.current_source),
            _ => None,
        }
    }

    fn sense_mut(&mut self, function: SenseFunction) -> &mut SenseNode {
        match function {
            SenseFunction::Current => &mut self.current_sense,
            SenseFunction::Voltage => &mut self.voltage_sense,
        }
    }

    fn source_function_reply(&self) -> &'static str {
        match self.source_function {
            SourceFunction::Voltage => "VOLT",
            SourceFunction::Current => "CURR",
            SourceFunction::Memory => "MEM",
        }
    }

    fn sense_function_reply(&self) -> &'static str {
        match self.sense_function {
            SenseFunction::Current => "\"CURR:DC\"",
            SenseFunction::Voltage => "\"VOLT:DC\"",
        }
    }

    /// Voltage across and current through the load, and whether compliance clamped them.
    fn operating_point(&self, load: f64) -> (f64, f64, bool) {
        match self.source_function {
            SourceFunction::Current => {
                let current = self.current_source.level;
                let voltage = current * load;
                let limit = self.voltage_sense.protection;
                if voltage.abs() > limit {
                    let clamped = limit.copysign(voltage);
                    (clamped, clamped / load, true)
                } else {
                    (voltage, current, false)
                }
            }
            SourceFunction::Voltage | SourceFunction::Memory => {
                let voltage = self.voltage_source.level;
                let current = voltage / load;
                let limit = self.current_sense.protection;
                if current.abs() > limit {
                    let clamped = limit.copysign(current);
                    (clamped * load, clamped, true)
                } else {
                    (voltage, current, false)
                }
            }
        }
    }

    fn run_burst(&mut self, load: f64) {
        let (voltage, current, tripped) = self.operating_point(load);
        let count = u64::from(self.arm_count) * u64::from(self.trigger_count);
        let mut values = Vec::with_capacity(count as usize * self.elements.len());

        for _ in 0..count {
            let time = self.samples as f64 * SAMPLE_INTERVAL_S;
            self.samples += 1;
            for element in &self.elements {
                let value = match element {
                    Element::Voltage => voltage,
                    Element::Current => current,
                    Element::Resistance => RESISTANCE_PLACEHOLDER,
                    Element::Time => time,
                    Element::Status if tripped => STATUS_COMPLIANCE,
                    Element::Status => 0.0,
                };
                values.push(signed(value));
            }
        }
        self.last_burst = Some(values.join(","));
    }
}

/// Map SCPI short forms onto the long forms matched above.
fn canonical(node: &str) -> &str {
    match node {
        "sour" => "source",
        "func" => "function",
        "volt" => "voltage",
        "curr" => "current",
        "res" => "resistance",
        "rang" => "range",
        "lev" => "level",
        "imm" => "immediate",
        "ampl" => "amplitude",
        "sens" => "sense",
        "prot" => "protection",
        "trip" => "tripped",
        "coun" => "count",
        "trig" => "trigger",
        "form" => "format",
        "elem" => "elements",
        "outp" => "output",
        "stat" => "state",
        "init" => "initiate",
        "fetc" => "fetch",
        "meas" => "measure",
        other => other,
    }
}

fn parse_source_function(argument: &str) -> Option<SourceFunction> {
    if argument.starts_with("volt") {
        Some(SourceFunction::Voltage)
    } else if argument.starts_with("curr") {
        Some(SourceFunction::Current)
    } else if argument.starts_with("mem") {
        Some(SourceFunction::Memory)
    } else {
        None
    }
}

fn parse_source_mode(argument: &str) -> Option<SourceMode> {
    if argument.starts_with("fix") {
        Some(SourceMode::Fixed)
    } else if argument.starts_with("list") {
        Some(SourceMode::List)
    } else if argument.starts_with("swe") {
        Some(SourceMode::Sweep)
    } else {
        None
    }
}

fn source_mode_reply(mode: SourceMode) -> &'static str {
    match mode {
        SourceMode::Fixed => "FIX",
        SourceMode::List => "LIST",
        SourceMode::Sweep => "SWE",
    }
}

fn parse_sense_function(argument: &str) -> Option<SenseFunction> {
    let name = argument.trim_matches(|c| c == '\'' || c == '"');
    if name.starts_with("curr") {
        Some(SenseFunction::Current)
    } else if name.starts_with("volt") {
        Some(SenseFunction::Voltage)
    } else {
        None
    }
}

fn parse_switch(argument: &str) -> Option<bool> {
    match argument {
        "on" | "1" => Some(true),
        "off" | "0" => Some(false),
        _ => None,
    }
}

/// Index of the smallest range holding `argument`, or a sentinel's range.
fn pick_range(ranges: &[f64], argument: &str) -> Option<usize> {
    match argument {
        "minimum" | "min" => Some(0),
        "maximum" | "max" => Some(ranges.len() - 1),
        value => {
            let value: f64 = value.parse().ok()?;
            Some(
                ranges
                    .iter()
                    .position(|range| *range >= value.abs())
                    .unwrap_or(ranges.len() - 1),
            )
        }
    }
}

fn flag(on: bool) -> String {
    String::from(if on { "1" } else { "0" })
}

fn signed(value: f64) -> String {
    let formatted = format_scientific(value);
    if formatted.starts_with('-') {
        formatted
    } else {
        format!("+{}", formatted)
    }
}
