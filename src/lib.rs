//! # SMU DAQ Core Library
//!
//! This crate is the core library for the `smu_daq` application. It drives a Keithley
//! 2400-series source-measure unit over a serial SCPI link and turns its raw readings
//! into structured measurement records. Keeping it a library lets the CLI (`main.rs`)
//! and the integration tests share one implementation.
//!
//! ## Crate Structure
//!
//! The library is organized into several modules, each with a distinct responsibility:
//!
//! - **`adapters`**: The `ByteChannel` abstraction, a `serialport`-backed implementation and
//!   an in-process simulated instrument.
//! - **`scpi`**: Channel ownership and the synchronous command/query protocol, including the
//!   settle strategy applied between a query and its reply.
//! - **`instrument`**: Validated source, sense and trigger configuration, their command
//!   sequences and read-backs, and the `Keithley2400` driver.
//! - **`measurement`**: Immutable measurement records and the parser that reshapes reading
//!   blobs into them.
//! - **`acquisition`**: The continuous acquisition loop with cooperative cancellation and
//!   partial-result recovery.
//! - **`data`**: CSV persistence of a finished run.
//! - **`config`**: Layered settings loaded from TOML and the environment. See
//!   `config::Settings`.
//! - **`error`**: The `SmuError` enum used across the crate.
//! - **`logging`**: `tracing` subscriber setup.

pub mod acquisition;
pub mod adapters;
pub mod config;
pub mod data;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod measurement;
pub mod scpi;
