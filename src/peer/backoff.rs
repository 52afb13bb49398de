use rand::Rng;
use std::time::Duration;

/// Linear backoff for the given attempt with up to half a step of random jitter,
/// so peers retrying against the same node do not fire in lockstep.
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let base_ms = base.as_millis() as u64;
    if base_ms == 0 {
        return Duration::ZERO;
    }
    let mut rng = rand::thread_rng();
    let jitter_ms = rng.gen_range(0..=base_ms / 2);
    Duration::from_millis(base_ms * u64::from(attempt) + jitter_ms)
}
