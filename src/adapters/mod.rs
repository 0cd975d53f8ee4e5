// src/adapters/mod.rs

//! Byte channels the SCPI layer can drive.
//!
//! A [`ByteChannel`] is any duplex byte stream with a fixed read timeout. The serial
//! implementation opens a real port; the simulated one answers in-process and is what
//! the tests and the `--simulate` CLI flag use.

use std::io::{self, Read, Write};
use std::time::Duration;

pub mod mock;
pub use mock::SimulatedKeithley;

pub mod serial;
pub use serial::SerialChannel;

/// Duplex byte stream owned by a single SCPI session.
pub trait ByteChannel: Read + Write + Send {
    /// Human readable identifier for logs (port name, "simulated", ...).
    fn describe(&self) -> String;

    /// How long a read blocks before reporting `ErrorKind::TimedOut`.
    fn read_timeout(&self) -> Duration;

    /// Number of bytes that can be read without blocking.
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Drop everything received but not yet read.
    fn discard_input(&mut self) -> io::Result<()>;
}

impl<T: ByteChannel + ?Sized> ByteChannel for Box<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn read_timeout(&self) -> Duration {
        (**self).read_timeout()
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        (**self).bytes_available()
    }

    fn discard_input(&mut self) -> io::Result<()> {
        (**self).discard_input()
    }
}
