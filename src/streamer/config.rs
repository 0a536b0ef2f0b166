//! Configuration for [`Streamer`](super::Streamer).

use std::time::Duration;

use crate::scheduler::SchedulerConfig;
use crate::{Error, Result};

/// Construction parameters of a streamer.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use stackio::StreamerConfig;
///
/// let config = StreamerConfig::new()
///     .idle_timeout(Duration::from_millis(20))
///     .reply_timeout(Duration::from_secs(1));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamerConfig {
    /// Tunables of the scheduling loop.
    pub scheduler: SchedulerConfig,

    /// Name of the scheduling thread.
    /// Default: "stackio-scheduler".
    pub thread_name: String,

    /// How long blocking helpers wait for the scheduling thread to answer.
    /// Default: 30 seconds.
    pub reply_timeout: Duration,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            thread_name: "stackio-scheduler".to_owned(),
            reply_timeout: Duration::from_secs(30),
        }
    }
}

impl StreamerConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long the scheduling thread sleeps when idle.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.scheduler.idle_timeout = timeout;
        self
    }

    /// Sets the name of the scheduling thread.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Sets the timeout of blocking helpers.
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Checks every value strictly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        if self.thread_name.is_empty() {
            return Err(Error::invalid_config("thread_name", "must not be empty"));
        }
        if self.reply_timeout.is_zero() {
            return Err(Error::invalid_config("reply_timeout", "must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StreamerConfig::default();
        assert_eq!(config.thread_name, "stackio-scheduler");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        assert!(StreamerConfig::new().idle_timeout(Duration::ZERO).validate().is_err());
        assert!(StreamerConfig::new().reply_timeout(Duration::ZERO).validate().is_err());
        assert!(StreamerConfig::new().thread_name("").validate().is_err());
    }
}
