//! Clocks and the deferred timeout registry

use std::collections::BTreeMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Time sources for `runtime.nanotime` and `runtime.walltime`
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
    origin_nanos: i64,
}

impl Clock {
    pub fn new() -> Self {
        Clock {
            origin: Instant::now(),
            origin_nanos: since_epoch().as_nanos() as i64,
        }
    }

    /// Monotonic nanoseconds, anchored to the wall clock at creation
    pub fn nanotime(&self) -> i64 {
        self.origin_nanos + self.origin.elapsed().as_nanos() as i64
    }

    /// Wall-clock (seconds, nanoseconds) since the Unix epoch
    pub fn walltime(&self) -> (i64, i32) {
        let now = since_epoch();
        (now.as_secs() as i64, now.subsec_nanos() as i32)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

fn since_epoch() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

/// Timeouts the module has scheduled and not yet cleared
///
/// A timeout stays registered after it fires; only the module's own
/// `clearTimeoutEvent` removes it.
#[derive(Debug)]
pub struct Timers {
    next_id: i32,
    scheduled: BTreeMap<i32, Instant>,
}

impl Timers {
    pub fn new() -> Self {
        Timers {
            next_id: 1,
            scheduled: BTreeMap::new(),
        }
    }

    /// Register a timeout `delay_ms` from now, returning its id.
    pub fn schedule(&mut self, delay_ms: i64) -> i32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let delay = Duration::from_millis(delay_ms.max(0) as u64);
        self.scheduled.insert(id, Instant::now() + delay);
        id
    }

    /// Returns whether `id` was still scheduled.
    pub fn clear(&mut self, id: i32) -> bool {
        self.scheduled.remove(&id).is_some()
    }

    pub fn contains(&self, id: i32) -> bool {
        self.scheduled.contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty()
    }

    /// The timeout with the earliest deadline; ties go to the lower id.
    pub fn next_due(&self) -> Option<(i32, Instant)> {
        self.scheduled
            .iter()
            .min_by_key(|(id, deadline)| (**deadline, **id))
            .map(|(id, deadline)| (*id, *deadline))
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_start_at_one() {
        let mut timers = Timers::new();
        assert_eq!(timers.schedule(10), 1);
        assert_eq!(timers.schedule(10), 2);
        assert!(timers.contains(1));
    }

    #[test]
    fn test_clear() {
        let mut timers = Timers::new();
        let id = timers.schedule(0);
        assert!(timers.clear(id));
        assert!(!timers.clear(id));
        assert!(timers.is_empty());
        assert_eq!(timers.next_due(), None);
    }

    #[test]
    fn test_next_due_is_earliest_deadline() {
        let mut timers = Timers::new();
        let late = timers.schedule(60_000);
        let soon = timers.schedule(0);
        assert_eq!(timers.next_due().map(|(id, _)| id), Some(soon));
        timers.clear(soon);
        assert_eq!(timers.next_due().map(|(id, _)| id), Some(late));
    }

    #[test]
    fn test_negative_delay_is_immediate() {
        let mut timers = Timers::new();
        timers.schedule(-5);
        let (_, deadline) = timers.next_due().unwrap();
        assert!(deadline <= Instant::now());
    }

    #[test]
    fn test_clock_is_monotonic_and_near_wall_time() {
        let clock = Clock::new();
        let a = clock.nanotime();
        let b = clock.nanotime();
        assert!(b >= a);

        let (secs, nanos) = clock.walltime();
        assert!((0..1_000_000_000).contains(&nanos));
        assert!((a / 1_000_000_000 - secs).abs() <= 1);
    }
}
