//! Selection of the offset at which a buffered hello is cut in two.
//!
//! The offset is randomized so that a network observer matching signatures
//! at a fixed position of the first segment sees a different cut on every
//! retry. It is also capped at half of the hello, so a short payload is
//! never reduced to a degenerate one-byte tail.
use core::{fmt::Debug, ops::RangeInclusive};

use rand::{Rng, SeedableRng, rngs::StdRng};

/// Smallest split offset drawn by the default strategy.
pub const MIN_SPLIT: usize = 32;

/// Largest split offset drawn by the default strategy.
pub const MAX_SPLIT: usize = 64;

/// A source of split offsets for the replayed hello.
///
/// Implementations return a raw offset; [`split_hello`] caps it at half of
/// the hello length before cutting.
pub trait SplitStrategy: Send + Debug {
    /// Returns the split offset to use for a hello of `hello_len` bytes.
    ///
    /// Only called for a non-empty hello.
    fn split_offset(&mut self, hello_len: usize) -> usize;
}

/// Draws the split offset uniformly from an inclusive range.
///
/// The default range is `[MIN_SPLIT, MAX_SPLIT]`, i.e. `[32, 64]`.
#[derive(Debug)]
pub struct UniformSplit {
    range: RangeInclusive<usize>,
    rng: StdRng,
}

impl UniformSplit {
    /// Creates a strategy over `range` seeded from the operating system.
    ///
    /// # Panics
    ///
    /// Panics if `range` is empty.
    pub fn new(range: RangeInclusive<usize>) -> Self {
        assert!(!range.is_empty(), "split range must not be empty");
        Self {
            range,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Creates a deterministic strategy over `range` from `seed`.
    ///
    /// Two strategies built from the same range and seed yield the same
    /// sequence of offsets.
    ///
    /// # Panics
    ///
    /// Panics if `range` is empty.
    pub fn with_seed(range: RangeInclusive<usize>, seed: u64) -> Self {
        assert!(!range.is_empty(), "split range must not be empty");
        Self {
            range,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for UniformSplit {
    fn default() -> Self {
        Self::new(MIN_SPLIT..=MAX_SPLIT)
    }
}

impl SplitStrategy for UniformSplit {
    fn split_offset(&mut self, _hello_len: usize) -> usize {
        self.rng.random_range(self.range.clone())
    }
}

/// Cuts `hello` into a prefix and a suffix whose concatenation is `hello`.
///
/// An empty hello yields two empty slices and does not consult the
/// strategy. Otherwise the offset drawn from `strategy` is capped at
/// `hello.len() / 2`.
pub fn split_hello<'a, S>(hello: &'a [u8], strategy: &mut S) -> (&'a [u8], &'a [u8])
where
    S: SplitStrategy + ?Sized,
{
    if hello.is_empty() {
        return (hello, hello);
    }
    let offset = strategy.split_offset(hello.len()).min(hello.len() / 2);
    hello.split_at(offset)
}
