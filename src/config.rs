//! Configuration for a [`SplitRetryStream`].
//!
//! The defaults reproduce the tuned behavior: a hello reply timeout of
//! `1200ms + 2 * rtt`, a split offset drawn uniformly from `[32, 64]`, and
//! 2048-byte chunks while copying through the retry buffer.
//!
//! # Example
//!
//! Use the defaults:
//! ```
//! use splitwire::Config;
//!
//! let config = Config::default();
//! ```
//!
//! Shorten the timeout and make the split offsets reproducible:
//! ```
//! use std::time::Duration;
//! use splitwire::Config;
//!
//! let config = Config::builder()
//!     .with_base_timeout(Duration::from_millis(300))
//!     .with_split_seed(7)
//!     .build();
//! ```
//!
//! [`SplitRetryStream`]: crate::SplitRetryStream
use core::ops::RangeInclusive;
use std::time::{Duration, Instant};

use crate::{
    split::{MAX_SPLIT, MIN_SPLIT, UniformSplit},
    timeout::{BASE_TIMEOUT, RTT_FACTOR, estimate_timeout_with},
};

/// Size of the chunks pulled from the source in [`read_from`] while the
/// retry question is open. Large enough to hold any ordinary first write
/// without introducing extra splitting.
///
/// [`read_from`]: crate::SplitRetryStream::read_from
pub(crate) const READ_FROM_CHUNK_LEN: usize = 2048;

/// Configuration for a [`SplitRetryStream`].
///
/// For details on building a config, refer to the [`config`] module.
///
/// [`config`]: crate::config
/// [`SplitRetryStream`]: crate::SplitRetryStream
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Config {
    pub(crate) base_timeout: Duration,
    pub(crate) rtt_factor: u32,
    pub(crate) split_range: RangeInclusive<usize>,
    pub(crate) split_seed: Option<u64>,
    pub(crate) read_from_chunk_len: usize,
}

/// A builder for creating a [`Config`] instance.
///
/// To get a [`ConfigBuilder`], use [`Config::builder`].
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ConfigBuilder {
    config: Config,
}

impl Config {
    /// Starts from the default configuration.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Returns the read timeout for a connection whose handshake started at
    /// `before` and completed at `after`.
    pub fn timeout_for(&self, before: Instant, after: Instant) -> Duration {
        estimate_timeout_with(self.base_timeout, self.rtt_factor, before, after)
    }

    pub(crate) fn split_strategy(&self) -> UniformSplit {
        match self.split_seed {
            Some(seed) => UniformSplit::with_seed(self.split_range.clone(), seed),
            None => UniformSplit::new(self.split_range.clone()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_timeout: BASE_TIMEOUT,
            rtt_factor: RTT_FACTOR,
            split_range: MIN_SPLIT..=MAX_SPLIT,
            split_seed: None,
            read_from_chunk_len: READ_FROM_CHUNK_LEN,
        }
    }
}

impl ConfigBuilder {
    /// Sets the fixed part of the hello reply timeout. The default is 1200ms.
    pub fn with_base_timeout(mut self, base: Duration) -> Self {
        self.config.base_timeout = base;
        self
    }

    /// Sets how many connect round trips are added to the base timeout.
    /// The default is 2.
    pub fn with_rtt_factor(mut self, factor: u32) -> Self {
        self.config.rtt_factor = factor;
        self
    }

    /// Sets the inclusive range the split offset is drawn from.
    /// The default is `32..=64`.
    ///
    /// ## Panic
    /// Panics if `range` is empty.
    pub fn with_split_range(mut self, range: RangeInclusive<usize>) -> Self {
        assert!(!range.is_empty(), "split range must not be empty");
        self.config.split_range = range;
        self
    }

    /// Seeds the split strategy, making the sequence of split offsets
    /// reproducible. By default the strategy is seeded from the operating
    /// system.
    pub fn with_split_seed(mut self, seed: u64) -> Self {
        self.config.split_seed = Some(seed);
        self
    }

    /// Sets the chunk size used by [`read_from`] while the retry question
    /// is open. The default is 2048 bytes.
    ///
    /// ## Panic
    /// Panics if `len` is zero.
    ///
    /// [`read_from`]: crate::SplitRetryStream::read_from
    pub fn with_read_from_chunk_len(mut self, len: usize) -> Self {
        assert!(len > 0, "chunk length must not be zero");
        self.config.read_from_chunk_len = len;
        self
    }

    /// Finishes the configuration.
    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::split::SplitStrategy;

    #[test]
    fn test_default_timeout() {
        let before = Instant::now();
        let after = before + Duration::from_millis(100);
        assert_eq!(
            Config::default().timeout_for(before, after),
            Duration::from_millis(1400)
        );
    }

    #[test]
    fn test_builder_overrides() {
        let config = Config::builder()
            .with_base_timeout(Duration::from_millis(10))
            .with_rtt_factor(1)
            .with_split_range(4..=4)
            .with_read_from_chunk_len(16)
            .build();

        let now = Instant::now();
        assert_eq!(
            config.timeout_for(now, now + Duration::from_millis(5)),
            Duration::from_millis(15)
        );
        assert_eq!(config.split_strategy().split_offset(100), 4);
        assert_eq!(config.read_from_chunk_len, 16);
    }

    #[test]
    fn test_seeded_config_is_reproducible() {
        let config = Config::builder().with_split_seed(99).build();
        let mut a = config.split_strategy();
        let mut b = config.split_strategy();
        assert_eq!(a.split_offset(500), b.split_offset(500));
    }

    #[test]
    #[should_panic]
    fn test_zero_chunk_len_panics() {
        let _ = Config::builder().with_read_from_chunk_len(0);
    }
}
