//! Ordered timeout list with monotonic 32-bit microsecond clock wraparound
//! handling, ported from the original `timer::Timer<LockGuard>` /
//! `timer::Timeout`.
//!
//! Timeouts are identified by opaque [`TimeoutId`]s handed out by [`Timer`];
//! the list itself is kept sorted by absolute expiry using signed-subtraction
//! comparison so a wraparound of the 32-bit microsecond clock never reorders
//! entries incorrectly.

use crate::scheduler::Guarded;

/// Opaque handle to a scheduled timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutId(u64);

struct Entry {
    id: TimeoutId,
    time: u32,
    cycle_time: u32,
}

struct TimerState {
    entries: Vec<Entry>,
    next_id: u64,
}

/// Signed difference `a - b`, correct across a wraparound of the 32-bit
/// microsecond clock (mirrors `Timer<LockGuard>::diff`).
fn diff(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

/// Manages cyclic and single-shot timeouts. Guarded internally by the same
/// short-scope lock used for the other cross-context shared lists.
pub struct Timer {
    state: Guarded<TimerState>,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            state: Guarded::new(TimerState {
                entries: Vec::new(),
                next_id: 0,
            }),
        }
    }

    /// Schedule a single-shot timeout `delay` microseconds after `now`.
    /// Returns `true` if this timeout will now expire before any other
    /// scheduled timeout (i.e. the caller should arm a wakeup).
    pub fn set(&self, delay: u32, now: u32) -> (TimeoutId, bool) {
        self.add(delay.wrapping_add(now), 0, now)
    }

    /// Schedule a cyclic timeout with period `period`, first firing at
    /// `now + period`.
    pub fn set_cyclic(&self, period: u32, now: u32) -> (TimeoutId, bool) {
        self.add(period.wrapping_add(now), period, now)
    }

    /// Cancel a scheduled timeout. A no-op if it isn't currently active.
    pub fn cancel(&self, id: TimeoutId) {
        let mut state = self.state.lock();
        state.entries.retain(|e| e.id != id);
    }

    pub fn is_active(&self, id: TimeoutId) -> bool {
        self.state.lock().entries.iter().any(|e| e.id == id)
    }

    /// Process at most one elapsed timeout, calling `on_expired` with its id
    /// if one fired. Returns `true` if a timeout was processed and the
    /// caller should call again to check for further elapsed timeouts (the
    /// original's `while (timer.processNextTimeout(now)) {}` loop).
    pub fn process_next_timeout(&self, now: u32, mut on_expired: impl FnMut(TimeoutId)) -> bool {
        let (id, on_time) = {
            let mut state = self.state.lock();
            if state.entries.is_empty() {
                return false;
            }
            let d = diff(state.entries[0].time, now);
            if d > 0 {
                return false;
            }
            let entry = state.entries.remove(0);
            let id = entry.id;
            let cycle_time = entry.cycle_time;
            let fire_time = entry.time;
            if cycle_time > 0 {
                drop(state);
                self.add(fire_time.wrapping_add(cycle_time), cycle_time, now);
            }
            (id, d == 0)
        };
        on_expired(id);
        on_time
    }

    /// Returns the delay until the next timeout should fire, or `None` if
    /// no timeout is scheduled. A delay of `0` means "fire immediately".
    pub fn get_next_delta(&self, now: u32) -> Option<u32> {
        let state = self.state.lock();
        let front = state.entries.first()?;
        if diff(front.time, now) < 0 {
            Some(0)
        } else {
            Some(front.time.wrapping_sub(now))
        }
    }

    fn add(&self, absolute: u32, cycle_time: u32, now: u32) -> (TimeoutId, bool) {
        let mut state = self.state.lock();
        let id = TimeoutId(state.next_id);
        state.next_id += 1;
        let target_diff = diff(absolute, now);
        let pos = state
            .entries
            .iter()
            .position(|e| diff(e.time, now) > target_diff)
            .unwrap_or(state.entries.len());
        state.entries.insert(
            pos,
            Entry {
                id,
                time: absolute,
                cycle_time,
            },
        );
        (id, pos == 0)
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_shot_fires_once() {
        let timer = Timer::new();
        let (_id, first) = timer.set(1000, 0);
        assert!(first);
        let mut fired = 0;
        assert!(!timer.process_next_timeout(500, |_| fired += 1));
        assert_eq!(fired, 0);
        assert!(timer.process_next_timeout(1000, |_| fired += 1));
        assert_eq!(fired, 1);
        assert!(!timer.process_next_timeout(2000, |_| fired += 1));
        assert_eq!(fired, 1);
    }

    #[test]
    fn cyclic_reschedules_relative_to_last_expiry() {
        let timer = Timer::new();
        timer.set_cyclic(1000, 0);
        let mut fired = 0;
        timer.process_next_timeout(1000, |_| fired += 1);
        assert_eq!(fired, 1);
        // still scheduled for the next period
        assert_eq!(timer.get_next_delta(1000), Some(1000));
        timer.process_next_timeout(2000, |_| fired += 1);
        assert_eq!(fired, 2);
    }

    #[test]
    fn cancel_removes_pending_timeout() {
        let timer = Timer::new();
        let (id, _) = timer.set(1000, 0);
        timer.cancel(id);
        assert!(!timer.is_active(id));
        assert!(!timer.process_next_timeout(5000, |_| panic!("should not fire")));
    }

    #[test]
    fn ordering_is_preserved_by_expiry() {
        let timer = Timer::new();
        let (late, _) = timer.set(5000, 0);
        let (early, first) = timer.set(1000, 0);
        assert!(first); // early timeout now expires soonest
        let mut order = Vec::new();
        timer.process_next_timeout(1000, |id| order.push(id));
        timer.process_next_timeout(5000, |id| order.push(id));
        assert_eq!(order, vec![early, late]);
    }

    #[test]
    fn survives_clock_wraparound() {
        let timer = Timer::new();
        let now = u32::MAX - 500;
        let (id, _) = timer.set(1000, now); // expiry wraps past u32::MAX
        let later = now.wrapping_add(1000);
        assert!(later < now); // sanity: we really did wrap
        let mut fired = false;
        timer.process_next_timeout(later, |fired_id| {
            assert_eq!(fired_id, id);
            fired = true;
        });
        assert!(fired);
    }

    #[test]
    fn get_next_delta_reports_overdue_as_zero() {
        let timer = Timer::new();
        timer.set(1000, 0);
        assert_eq!(timer.get_next_delta(2000), Some(0));
    }
}
