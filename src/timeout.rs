//! Read timeout estimation from the measured connect round trip.
use std::time::{Duration, Instant};

/// Fixed part of the hello reply timeout.
pub(crate) const BASE_TIMEOUT: Duration = Duration::from_millis(1200);

/// Number of connect round trips added on top of [`BASE_TIMEOUT`].
pub(crate) const RTT_FACTOR: u32 = 2;

/// Returns how long to wait for a reply to a hello sent on a socket,
/// given timestamps taken immediately before and after its TCP handshake
/// (i.e. when the SYN was sent and the SYN-ACK was received).
///
/// The result is `1200ms + 2 * rtt`. These values keep the false positive
/// rate below 1%; a false positive triggers an unnecessary retry, while an
/// overly long timeout makes the retry slower to kick in.
pub fn estimate_timeout(before: Instant, after: Instant) -> Duration {
    estimate_timeout_with(BASE_TIMEOUT, RTT_FACTOR, before, after)
}

pub(crate) fn estimate_timeout_with(
    base: Duration,
    rtt_factor: u32,
    before: Instant,
    after: Instant,
) -> Duration {
    let rtt = after.saturating_duration_since(before);
    base.saturating_add(rtt.saturating_mul(rtt_factor))
}
