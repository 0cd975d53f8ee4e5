//! Arm and trigger layers of the trigger model.

use crate::adapters::ByteChannel;
use crate::error::{AppResult, SmuError};
use crate::scpi::ScpiSession;
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Largest burst the 2400-series reading buffer can hold.
pub const MAX_SAMPLES_PER_BURST: u64 = 2500;

/// Arm and trigger counts. One burst yields `arm_count * trigger_count` readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Number of arm-layer passes
    pub arm_count: u32,
    /// Number of triggers per arm pass
    pub trigger_count: u32,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            arm_count: 1,
            trigger_count: 1,
        }
    }
}

impl TriggerConfig {
    /// Build a trigger configuration.
    pub fn new(arm_count: u32, trigger_count: u32) -> Self {
        Self {
            arm_count,
            trigger_count,
        }
    }

    /// Readings produced by one burst; the record count expected from a fetch.
    pub fn samples_per_burst(&self) -> usize {
        (self.arm_count as usize) * (self.trigger_count as usize)
    }

    /// Both counts must be positive and the burst must fit in the reading buffer.
    pub fn validate(&self) -> AppResult<()> {
        if self.arm_count == 0 || self.trigger_count == 0 {
            return Err(SmuError::Configuration(format!(
                "arm count {} and trigger count {} must both be positive",
                self.arm_count, self.trigger_count
            )));
        }
        let samples = u64::from(self.arm_count) * u64::from(self.trigger_count);
        if samples > MAX_SAMPLES_PER_BURST {
            return Err(SmuError::Configuration(format!(
                "burst of {} samples exceeds the {} sample buffer",
                samples, MAX_SAMPLES_PER_BURST
            )));
        }
        Ok(())
    }

    /// Arm count, then trigger count.
    pub fn commands(&self) -> AppResult<Vec<String>> {
        self.validate()?;
        Ok(vec![
            format!(":arm:count {}", self.arm_count),
            format!(":trigger:count {}", self.trigger_count),
        ])
    }

    /// Validate, then send the configuration.
    #[instrument(skip(session), err)]
    pub fn apply<C: ByteChannel>(&self, session: &mut ScpiSession<C>) -> AppResult<()> {
        let commands = self.commands()?;
        session.send_all(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_are_the_product_of_counts() {
        assert_eq!(TriggerConfig::new(4, 25).samples_per_burst(), 100);
        assert_eq!(TriggerConfig::default().samples_per_burst(), 1);
    }

    #[test]
    fn zero_counts_rejected() {
        assert!(TriggerConfig::new(0, 1).validate().is_err());
        assert!(TriggerConfig::new(1, 0).validate().is_err());
    }

    #[test]
    fn oversized_burst_rejected() {
        assert!(TriggerConfig::new(50, 50).validate().is_ok());
        assert!(TriggerConfig::new(50, 51).validate().is_err());
    }

    #[test]
    fn commands() {
        assert_eq!(
            TriggerConfig::new(2, 10).commands().unwrap(),
            vec![":arm:count 2", ":trigger:count 10"]
        );
    }
}
