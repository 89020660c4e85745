use std::time::Duration;

use anyhow::bail;
use rustc_hash::FxHashSet;

use crate::wire::ScpResult;
use crate::window::{Window, WindowSizing};

/// the UDP port the device's monitor processor listens on
pub const SCAMP_PORT: u16 = 17893;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// The time after sending a request without a response before the request is considered
    ///  lost and sent again. This is also the budget for resending requests that
    ///  the device answered with a retryable result.
    pub packet_timeout: Duration,

    /// The number of times a request is resent (for timeouts or retryable results beyond the
    ///  packet timeout) before it fails
    pub n_retries: u32,

    /// Pause before resending a request that the device answered with a retryable result
    ///  within the packet timeout. A device that is busy right now is likely to be busy a
    ///  moment later as well.
    pub retry_code_delay: Duration,

    pub window: WindowSizing,

    /// Results that mean 'try again': the device is busy or a packet got lost somewhere inside
    ///  the machine, and sending the same request again is expected to succeed.
    pub retryable_results: FxHashSet<ScpResult>,

    /// Capacity of each transport worker's command channel. Callers wait for room in this
    ///  channel when a transport falls behind.
    pub command_queue_depth: usize,
}

impl TransportConfig {
    pub fn default_config() -> TransportConfig {
        TransportConfig {
            packet_timeout: Duration::from_secs(1),
            n_retries: 10,
            retry_code_delay: Duration::from_millis(100),
            window: WindowSizing::default(),
            retryable_results: Self::default_retryable_results(),
            command_queue_depth: 64,
        }
    }

    /// fixed, conservative window for talking to many boards at once
    pub fn multi_connection() -> TransportConfig {
        TransportConfig {
            window: WindowSizing::Fixed(Window { channels: 8, intermediate_waits: 7 }),
            ..Self::default_config()
        }
    }

    /// for one-off commands where failing fast matters more than persistence
    pub fn single_command() -> TransportConfig {
        TransportConfig {
            n_retries: 3,
            ..Self::default_config()
        }
    }

    pub fn default_retryable_results() -> FxHashSet<ScpResult> {
        [ScpResult::Timeout, ScpResult::P2pTimeout, ScpResult::Len, ScpResult::P2pNoReply]
            .into_iter()
            .collect()
    }

    pub fn is_retryable(&self, result: ScpResult) -> bool {
        self.retryable_results.contains(&result)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.packet_timeout.is_zero() {
            bail!("packet timeout must be positive");
        }
        if self.retry_code_delay >= self.packet_timeout {
            bail!("retry code delay ({:?}) must be less than the packet timeout ({:?})", self.retry_code_delay, self.packet_timeout);
        }
        if let WindowSizing::Fixed(window) = &self.window {
            if window.channels == 0 {
                bail!("a fixed window needs at least one channel");
            }
            if window.intermediate_waits >= window.channels {
                bail!("intermediate waits ({}) must be less than the number of channels ({})", window.intermediate_waits, window.channels);
            }
        }
        if self.retryable_results.contains(&ScpResult::Ok) {
            bail!("OK can not be a retryable result");
        }
        if self.command_queue_depth == 0 {
            bail!("command queue depth must be positive");
        }

        Ok(())
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::default(TransportConfig::default_config(), true)]
    #[case::multi_connection(TransportConfig::multi_connection(), true)]
    #[case::single_command(TransportConfig::single_command(), true)]
    #[case::zero_timeout(TransportConfig { packet_timeout: Duration::ZERO, ..TransportConfig::default_config() }, false)]
    #[case::zero_retry_code_delay(TransportConfig { retry_code_delay: Duration::ZERO, ..TransportConfig::default_config() }, true)]
    #[case::retry_code_delay_too_long(TransportConfig { retry_code_delay: Duration::from_secs(1), ..TransportConfig::default_config() }, false)]
    #[case::zero_channels(TransportConfig { window: WindowSizing::Fixed(Window { channels: 0, intermediate_waits: 0 }), ..TransportConfig::default_config() }, false)]
    #[case::waits_too_big(TransportConfig { window: WindowSizing::Fixed(Window { channels: 4, intermediate_waits: 4 }), ..TransportConfig::default_config() }, false)]
    #[case::ok_retryable(TransportConfig { retryable_results: [ScpResult::Ok].into_iter().collect(), ..TransportConfig::default_config() }, false)]
    #[case::zero_queue(TransportConfig { command_queue_depth: 0, ..TransportConfig::default_config() }, false)]
    fn test_validate(#[case] config: TransportConfig, #[case] expected_valid: bool) {
        assert_eq!(config.validate().is_ok(), expected_valid);
    }

    #[test]
    fn test_default_retryable() {
        let config = TransportConfig::default();
        assert!(config.is_retryable(ScpResult::Timeout));
        assert!(config.is_retryable(ScpResult::P2pTimeout));
        assert!(config.is_retryable(ScpResult::Len));
        assert!(config.is_retryable(ScpResult::P2pNoReply));
        assert!(!config.is_retryable(ScpResult::Ok));
        assert!(!config.is_retryable(ScpResult::Arg));
    }
}
