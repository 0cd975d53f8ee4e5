//! What to do between sending a query and reading its reply.
//!
//! The instrument has no explicit "reply ready" signal, so by default the session waits a
//! fixed 100 ms. On links that can report pending input, polling for the first reply
//! byte is faster and just as safe. Either way exactly one reply is read per query.

use super::ChannelHandle;
use crate::adapters::ByteChannel;
use crate::config::ProtocolSettings;
use crate::error::AppResult;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};

/// Settle delay used when nothing else is configured.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Settle strategy as written in the settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettleMode {
    /// Read immediately
    None,
    /// Sleep for `settle_ms`
    Fixed,
    /// Poll for pending input every `poll_interval_ms`
    Poll,
}

/// Wait performed by [`super::ScpiSession::query`] before reading the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleStrategy {
    /// Read immediately; the channel's read timeout does the waiting.
    None,
    /// Sleep for a fixed duration.
    FixedDelay(Duration),
    /// Check for pending input every `interval`, giving up after `timeout`.
    PollUntilReady {
        /// Time between checks
        interval: Duration,
        /// Upper bound on polling; the read timeout still applies afterwards
        timeout: Duration,
    },
}

impl Default for SettleStrategy {
    fn default() -> Self {
        SettleStrategy::FixedDelay(DEFAULT_SETTLE_DELAY)
    }
}

impl SettleStrategy {
    /// Build the strategy described by `settings`; polling is bounded by `read_timeout`.
    pub fn from_settings(settings: &ProtocolSettings, read_timeout: Duration) -> Self {
        match settings.settle {
            SettleMode::None => SettleStrategy::None,
            SettleMode::Fixed => SettleStrategy::FixedDelay(Duration::from_millis(settings.settle_ms)),
            SettleMode::Poll => SettleStrategy::PollUntilReady {
                interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
                timeout: read_timeout,
            },
        }
    }

    pub(crate) fn settle<C: ByteChannel>(&self, channel: &mut ChannelHandle<C>) -> AppResult<()> {
        match *self {
            SettleStrategy::None => Ok(()),
            SettleStrategy::FixedDelay(delay) => {
                thread::sleep(delay);
                Ok(())
            }
            SettleStrategy::PollUntilReady { interval, timeout } => {
                let start = Instant::now();
                while channel.bytes_available()? == 0 {
                    if start.elapsed() >= timeout {
                        // let the read report the timeout
                        break;
                    }
                    thread::sleep(interval);
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_a_fixed_100ms_delay() {
        assert_eq!(
            SettleStrategy::default(),
            SettleStrategy::FixedDelay(Duration::from_millis(100))
        );
    }

    #[test]
    fn builds_from_settings() {
        let mut settings = ProtocolSettings::default();
        let timeout = Duration::from_secs(3);
        assert_eq!(
            SettleStrategy::from_settings(&settings, timeout),
            SettleStrategy::FixedDelay(Duration::from_millis(100))
        );

        settings.settle = SettleMode::Poll;
        settings.poll_interval_ms = 5;
        assert_eq!(
            SettleStrategy::from_settings(&settings, timeout),
            SettleStrategy::PollUntilReady {
                interval: Duration::from_millis(5),
                timeout,
            }
        );

        settings.settle = SettleMode::None;
        assert_eq!(SettleStrategy::from_settings(&settings, timeout), SettleStrategy::None);
    }
}
