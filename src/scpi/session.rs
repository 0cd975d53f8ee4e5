//! Synchronous SCPI command/response session.
//!
//! Commands go out as text terminated by a single carriage return; replies come back one
//! line at a time. No acknowledgements are awaited after a plain command and nothing is
//! retried here: a timeout or a garbled reply goes straight back to the caller.

use super::{ChannelHandle, SettleStrategy};
use crate::adapters::ByteChannel;
use crate::config::ProtocolSettings;
use crate::error::{AppResult, SmuError};
use tracing::{debug, info, instrument};

/// Terminator appended to every outgoing command.
pub const COMMAND_TERMINATOR: char = '\r';

/// Standard identification query.
pub const IDN_QUERY: &str = "*IDN?";

/// Explicitly owned session over one [`ChannelHandle`].
///
/// `&mut self` on every I/O method means at most one query is ever in flight, so a reply
/// always belongs to the most recently sent command.
pub struct ScpiSession<C: ByteChannel> {
    channel: ChannelHandle<C>,
    settle: SettleStrategy,
    verbose: bool,
}

impl<C: ByteChannel> ScpiSession<C> {
    /// Open a session with the default 100 ms settle delay.
    pub fn new(channel: C) -> Self {
        Self::with_settle(channel, SettleStrategy::default())
    }

    /// Open a session with an explicit settle strategy.
    pub fn with_settle(channel: C, settle: SettleStrategy) -> Self {
        Self {
            channel: ChannelHandle::open(channel),
            settle,
            verbose: false,
        }
    }

    /// Open a session configured from the `[protocol]` settings.
    pub fn from_settings(channel: C, settings: &ProtocolSettings) -> Self {
        let settle = SettleStrategy::from_settings(settings, channel.read_timeout());
        Self::with_settle(channel, settle).verbose(settings.verbose)
    }

    /// Log every command at INFO instead of DEBUG.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Settle strategy in use.
    pub fn settle_strategy(&self) -> SettleStrategy {
        self.settle
    }

    /// The underlying channel handle.
    pub fn channel(&self) -> &ChannelHandle<C> {
        &self.channel
    }

    /// True until [`Self::close`] has been called.
    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Encode and transmit one command. No reply is awaited.
    pub fn send(&mut self, command: &str) -> AppResult<()> {
        let frame = encode(command)?;
        self.channel.write_all(frame.as_bytes())?;
        if self.verbose {
            info!("{}", command);
        } else {
            debug!(command, "sent");
        }
        Ok(())
    }

    /// Send several commands in order, stopping at the first failure.
    pub fn send_all<I, S>(&mut self, commands: I) -> AppResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for command in commands {
            self.send(command.as_ref())?;
        }
        Ok(())
    }

    /// Read one reply line, decoded as UTF-8 with trailing whitespace removed.
    ///
    /// # Errors
    /// `MalformedData` if the line is not valid UTF-8.
    pub fn receive_line(&mut self) -> AppResult<String> {
        let raw = self.channel.read_line()?;
        let line = String::from_utf8(raw)
            .map_err(|e| SmuError::MalformedData(format!("reply is not valid UTF-8: {}", e)))?;
        let line = line.trim_end().to_string();
        debug!(reply = %line, "received");
        Ok(line)
    }

    /// Send a query, wait according to the settle strategy, then read its reply.
    ///
    /// Unread input (a late reply to an earlier query that timed out) is discarded first,
    /// so the line returned always answers `command`.
    pub fn query(&mut self, command: &str) -> AppResult<String> {
        self.channel.discard_input()?;
        self.send(command)?;
        self.settle.settle(&mut self.channel)?;
        self.receive_line()
    }

    /// Liveness check: whether the channel was open, and the raw identity string.
    #[instrument(skip(self), err)]
    pub fn identify(&mut self) -> AppResult<(bool, String)> {
        let was_open = self.is_open();
        let identity = self.query(IDN_QUERY)?;
        info!(identity = %identity, "instrument identified");
        Ok((was_open, identity))
    }

    /// Release the channel. Later I/O fails with a transport error.
    pub fn close(&mut self) {
        self.channel.close();
    }
}

/// Frame a command for the wire: the text followed by exactly one carriage return.
pub fn encode(command: &str) -> AppResult<String> {
    if command.contains(['\r', '\n']) {
        return Err(SmuError::Configuration(format!(
            "command {:?} contains a line terminator",
            command
        )));
    }
    let mut frame = String::with_capacity(command.len() + 1);
    frame.push_str(command);
    frame.push(COMMAND_TERMINATOR);
    Ok(frame)
}
