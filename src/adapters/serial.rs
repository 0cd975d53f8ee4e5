//! Serial port byte channel
//!
//! Wraps the `serialport` crate. The port is opened with the instrument's fixed framing
//! (8 data bits, no parity, one stop bit, no flow control) and a blocking read timeout;
//! all I/O happens on the caller's thread.

use super::ByteChannel;
use crate::config::SerialSettings;
use crate::error::{AppResult, SmuError};
use std::io::{self, Read, Write};
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use serialport::{ClearBuffer, SerialPort};
#[cfg(feature = "instrument_serial")]
use tracing::debug;

/// Serial adapter for RS-232 communication
pub struct SerialChannel {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// Read timeout configured on the port
    timeout: Duration,

    #[cfg(feature = "instrument_serial")]
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Open the port described by `settings`.
    ///
    /// # Errors
    /// Returns `Transport` if the port cannot be opened, or `FeatureNotEnabled` when the
    /// crate was built without `instrument_serial`.
    pub fn open(settings: &SerialSettings) -> AppResult<Self> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = serialport::new(&settings.port, settings.baud_rate)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::One)
                .flow_control(serialport::FlowControl::None)
                .timeout(settings.timeout())
                .open()
                .map_err(|e| {
                    SmuError::Transport(format!(
                        "Failed to open serial port '{}' at {} baud: {}",
                        settings.port, settings.baud_rate, e
                    ))
                })?;

            debug!(
                "Serial port '{}' opened at {} baud",
                settings.port, settings.baud_rate
            );

            Ok(Self {
                port_name: settings.port.clone(),
                timeout: settings.timeout(),
                port,
            })
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = settings;
            Err(SmuError::FeatureNotEnabled("instrument_serial".to_string()))
        }
    }

    /// Port path this channel was opened on.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[cfg(feature = "instrument_serial")]
impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

#[cfg(feature = "instrument_serial")]
impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

#[cfg(feature = "instrument_serial")]
impl ByteChannel for SerialChannel {
    fn describe(&self) -> String {
        self.port_name.clone()
    }

    fn read_timeout(&self) -> Duration {
        self.timeout
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        let pending = self.port.bytes_to_read().map_err(io::Error::from)?;
        Ok(pending as usize)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}

// Without the serial feature a `SerialChannel` can never be constructed; these impls
// only keep the type usable in generic code.
#[cfg(not(feature = "instrument_serial"))]
impl Read for SerialChannel {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "serial support disabled"))
    }
}

#[cfg(not(feature = "instrument_serial"))]
impl Write for SerialChannel {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "serial support disabled"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(not(feature = "instrument_serial"))]
impl ByteChannel for SerialChannel {
    fn describe(&self) -> String {
        self.port_name.clone()
    }

    fn read_timeout(&self) -> Duration {
        self.timeout
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(0)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}
