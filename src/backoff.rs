use std::thread;
use std::time::Duration;

/// The channel's doubling-sleep state machine: starts at `start_sleep_ns`
/// and doubles on every `wait` call up to `max_sleep_ns`, where it plateaus.
///
/// This mirrors `ipc_channel.c`'s `_wait_and_expand_delay`: a `nanosleep`
/// for the current delay, then `tv_nsec *= WAIT_EXPAND_FACTOR` clamped to
/// the ceiling. Every step is an actual sleep, never a spin — the caller is
/// waiting on another process publishing an entry, not a few instructions
/// of in-process contention (producers never sleep inside the buffer layer;
/// see `ring.rs`'s `write`/`peek`/`read`, which return `Locked`/`NoSpace`
/// to the caller instead).
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveBackoff {
    current_ns: u64,
    max_ns: u64,
}

/// `ipc_channel.c`'s `WAIT_EXPAND_FACTOR`.
const WAIT_EXPAND_FACTOR: u64 = 2;

impl AdaptiveBackoff {
    /// Creates a backoff starting at `start_sleep_ns`, doubling up to
    /// `max_sleep_ns`. Callers validate `0 < start_sleep_ns <= max_sleep_ns`
    /// before construction (see `ChannelConfig::new`).
    #[inline]
    pub fn new(start_sleep_ns: u64, max_sleep_ns: u64) -> Self {
        Self {
            current_ns: start_sleep_ns,
            max_ns: max_sleep_ns,
        }
    }

    /// Sleeps for the current delay, then doubles it (clamped to the
    /// ceiling) for the next call.
    pub fn wait(&mut self) {
        thread::sleep(Duration::from_nanos(self.current_ns));
        self.current_ns = self.current_ns.saturating_mul(WAIT_EXPAND_FACTOR).min(self.max_ns);
    }

    /// The delay the next `wait` call will sleep for.
    #[inline]
    pub fn current_delay(&self) -> Duration {
        Duration::from_nanos(self.current_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adaptive_backoff_doubles_and_clamps() {
        let mut b = AdaptiveBackoff::new(100, 1_000);
        assert_eq!(b.current_delay(), Duration::from_nanos(100));
        b.wait();
        assert_eq!(b.current_delay(), Duration::from_nanos(200));
        b.wait();
        assert_eq!(b.current_delay(), Duration::from_nanos(400));
        b.wait();
        assert_eq!(b.current_delay(), Duration::from_nanos(800));
        b.wait();
        assert_eq!(b.current_delay(), Duration::from_nanos(1_000));
        b.wait();
        assert_eq!(b.current_delay(), Duration::from_nanos(1_000));
    }
}
