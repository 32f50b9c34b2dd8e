//! Time sources. Wall-clock time is only trusted once the host has
//! synchronized (headless boards boot with the clock near the epoch);
//! the monotonic counter is always valid and drives pump run timing.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

/// Readings below this are an unsynchronized clock, not a real date.
const MIN_PLAUSIBLE_UNIX: i64 = 1_700_000_000; // 2023-11-14

pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { started: Instant::now() }
    }

    /// Wall-clock seconds since the epoch, or `None` until synchronized.
    pub fn wall_secs(&self) -> Option<i64> {
        let secs = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs() as i64;
        (secs >= MIN_PLAUSIBLE_UNIX).then_some(secs)
    }

    /// Milliseconds since process start. Immune to wall-clock steps.
    pub fn monotonic_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Bounded pre-loop wait for wall-clock sync, one retry per second.
/// Returns `false` if the clock never became available; the scheduler
/// copes with that (it skips due checks), so callers just log and go on.
pub async fn wait_for_sync(clock: &SystemClock, max_retries: u32) -> bool {
    for _ in 0..max_retries {
        if let Some(now) = clock.wall_secs() {
            info!(unix = now, "wall clock synchronized");
            return true;
        }
        warn!("waiting for wall-clock sync...");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    warn!("wall clock not synchronized — due checks deferred until it is");
    false
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_ms_is_nondecreasing() {
        let clock = SystemClock::new();
        let a = clock.monotonic_ms();
        let b = clock.monotonic_ms();
        assert!(b >= a);
    }

    #[test]
    fn wall_secs_is_plausible_on_test_hosts() {
        // CI machines have synced clocks; the reading must clear the floor.
        let clock = SystemClock::new();
        let now = clock.wall_secs().expect("host clock should be synced");
        assert!(now >= MIN_PLAUSIBLE_UNIX);
    }
}
