//! Channel handle: exclusive ownership of an open byte channel.
//!
//! The handle is Open from construction until [`ChannelHandle::close`] (or drop). It is
//! never reopened; every write or read after closing fails with a transport error.

use crate::adapters::ByteChannel;
use crate::error::{AppResult, SmuError};
use std::io::{self, BufRead, BufReader, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Terminator the instrument appends to every reply line.
pub const RESPONSE_DELIMITER: u8 = b'\n';

/// Owns a [`ByteChannel`] for the lifetime of one session.
pub struct ChannelHandle<C: ByteChannel> {
    name: String,
    read_timeout: Duration,
    port: Option<BufReader<C>>,
}

impl<C: ByteChannel> ChannelHandle<C> {
    /// Take ownership of an already opened channel.
    pub fn open(channel: C) -> Self {
        let name = channel.describe();
        let read_timeout = channel.read_timeout();
        debug!(channel = %name, ?read_timeout, "channel open");
        Self {
            name,
            read_timeout,
            port: Some(BufReader::new(channel)),
        }
    }

    /// True until the channel has been closed.
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Name reported by the underlying channel.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read timeout of the underlying channel.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Write every byte and flush.
    pub fn write_all(&mut self, bytes: &[u8]) -> AppResult<()> {
        let timeout = self.read_timeout;
        let port = self.port_mut()?;
        let inner = port.get_mut();
        inner
            .write_all(bytes)
            .and_then(|()| inner.flush())
            .map_err(|e| io_failure(e, timeout, "write"))
    }

    /// Block until one `\n`-terminated line arrives and return it as raw bytes,
    /// terminator included.
    ///
    /// The read timeout bounds the whole line, not each port read, so a device that
    /// keeps sending without a terminator still ends in `Timeout`.
    pub fn read_line(&mut self) -> AppResult<Vec<u8>> {
        let timeout = self.read_timeout;
        let deadline = Instant::now() + timeout;
        let port = self.port_mut()?;
        let mut line = Vec::with_capacity(64);

        loop {
            let (complete, used) = {
                let available = match port.fill_buf() {
                    Ok(bytes) => bytes,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(io_failure(e, timeout, "read")),
                };
                // Stream ran dry before a terminator
                if available.is_empty() {
                    return Err(SmuError::Timeout(timeout));
                }
                match available.iter().position(|&b| b == RESPONSE_DELIMITER) {
                    Some(end) => {
                        line.extend_from_slice(&available[..=end]);
                        (true, end + 1)
                    }
                    None => {
                        line.extend_from_slice(available);
                        (false, available.len())
                    }
                }
            };
            port.consume(used);

            if complete {
                return Ok(line);
            }
            if Instant::now() >= deadline {
                debug!(bytes = line.len(), "unterminated reply dropped");
                return Err(SmuError::Timeout(timeout));
            }
        }
    }

    /// Drop buffered and pending input, leaving nothing for the next read but what
    /// arrives after this call.
    pub fn discard_input(&mut self) -> AppResult<()> {
        let port = self.port_mut()?;
        let stale = port.buffer().len();
        port.consume(stale);
        port.get_mut()
            .discard_input()
            .map_err(|e| SmuError::Transport(format!("discarding input failed: {}", e)))?;
        if stale > 0 {
            debug!(bytes = stale, "stale input discarded");
        }
        Ok(())
    }

    /// Bytes that can be read without blocking, buffered ones included.
    pub fn bytes_available(&mut self) -> AppResult<usize> {
        let port = self.port_mut()?;
        let buffered = port.buffer().len();
        let pending = port
            .get_mut()
            .bytes_available()
            .map_err(|e| SmuError::Transport(e.to_string()))?;
        Ok(buffered + pending)
    }

    /// Release the channel. Closing twice is a no-op.
    pub fn close(&mut self) {
        match self.port.take() {
            Some(port) => {
                drop(port);
                info!(channel = %self.name, "channel closed");
            }
            None => debug!(channel = %self.name, "channel already closed"),
        }
    }

    fn port_mut(&mut self) -> AppResult<&mut BufReader<C>> {
        let name = &self.name;
        self.port
            .as_mut()
            .ok_or_else(|| SmuError::Transport(format!("channel '{}' is closed", name)))
    }
}

impl<C: ByteChannel> Drop for ChannelHandle<C> {
    fn drop(&mut self) {
        if self.is_open() {
            self.close();
        }
    }
}

fn io_failure(err: io::Error, timeout: Duration, action: &str) -> SmuError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => SmuError::Timeout(timeout),
        _ => SmuError::Transport(format!("{} failed: {}", action, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SimulatedKeithley;

    #[test]
    fn starts_open_and_closes_once() {
        let mut handle = ChannelHandle::open(SimulatedKeithley::new());
        assert!(handle.is_open());
        assert_eq!(handle.name(), "simulated");

        handle.close();
        assert!(!handle.is_open());
        handle.close();
        assert!(!handle.is_open());
    }

    #[test]
    fn use_after_close_is_a_transport_error() {
        let mut handle = ChannelHandle::open(SimulatedKeithley::new());
        handle.close();

        assert!(matches!(
            handle.write_all(b"*IDN?\r"),
            Err(SmuError::Transport(_))
        ));
        assert!(matches!(handle.read_line(), Err(SmuError::Transport(_))));
    }

    #[test]
    fn read_without_reply_times_out() {
        let mut handle = ChannelHandle::open(SimulatedKeithley::new());
        match handle.read_line() {
            Err(SmuError::Timeout(timeout)) => assert_eq!(timeout, Duration::from_secs(3)),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    /// Sends one `x` per millisecond and never a line feed.
    struct Babbler;

    impl io::Read for Babbler {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            std::thread::sleep(Duration::from_millis(1));
            buf[0] = b'x';
            Ok(1)
        }
    }

    impl Write for Babbler {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ByteChannel for Babbler {
        fn describe(&self) -> String {
            "babbler".to_string()
        }

        fn read_timeout(&self) -> Duration {
            Duration::from_millis(30)
        }

        fn bytes_available(&mut self) -> io::Result<usize> {
            Ok(1)
        }

        fn discard_input(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn endless_unterminated_reply_times_out() {
        let mut handle = ChannelHandle::open(Babbler);
        let started = Instant::now();
        match handle.read_line() {
            Err(SmuError::Timeout(timeout)) => assert_eq!(timeout, Duration::from_millis(30)),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn discard_drops_buffered_and_pending_input() {
        let mut handle = ChannelHandle::open(SimulatedKeithley::new());
        handle.write_all(b"*IDN?\r:output?\r").unwrap();
        handle.read_line().unwrap();

        handle.discard_input().unwrap();
        assert_eq!(handle.bytes_available().unwrap(), 0);
        assert!(matches!(handle.read_line(), Err(SmuError::Timeout(_))));

        handle.close();
        assert!(matches!(handle.discard_input(), Err(SmuError::Transport(_))));
    }

    #[test]
    fn reads_exactly_one_line() {
        let mut handle = ChannelHandle::open(SimulatedKeithley::new());
        handle.write_all(b"*IDN?\r:source:function:mode?\r").unwrap();

        let first = handle.read_line().unwrap();
        assert!(first.starts_with(b"KEITHLEY"));
        assert_eq!(first.last(), Some(&b'\n'));

        let second = handle.read_line().unwrap();
        assert_eq!(second, b"VOLT\r\n");
        assert_eq!(handle.bytes_available().unwrap(), 0);
    }
}
