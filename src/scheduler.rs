//! Cooperative execution contexts.
//!
//! A [`Context`] identifies a serial, non-reentrant execution domain; the
//! runtime guarantees FIFO delivery of tasks posted to the same context, and
//! makes no ordering guarantee across contexts except where a layer above
//! adds an explicit barrier (shutdown, lifecycle transitions). Suspension is
//! always expressed by returning control and scheduling a later resumption
//! through this trait -- no component blocks synchronously.

use std::sync::{Arc, Mutex};
use std::collections::VecDeque;

/// Identifies a cooperative execution context. `CONTEXT_INVALID` tells a
/// caller "run this inline, in the manager's own context" -- it is never a
/// valid target for `Scheduler::post`.
pub type Context = u8;

/// Sentinel meaning "no dedicated context; run inline".
pub const CONTEXT_INVALID: Context = Context::MAX;

/// Handle to a scheduled (but not yet run) task, usable to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub u64);

/// Scheduler abstraction implemented by the host runtime (or, in tests, by
/// [`SimpleScheduler`]). Mirrors the original's `execute`/`scheduleAfterDelay`/
/// `cancel` trio.
pub trait Scheduler {
    /// Post a task for immediate (next drain) execution on `ctx`.
    fn post(&self, ctx: Context, task: Box<dyn FnMut() + Send>) -> TaskHandle;

    /// Schedule a task to run on `ctx` after `delay_us` microseconds.
    fn schedule_after(
        &self,
        ctx: Context,
        task: Box<dyn FnMut() + Send>,
        delay_us: u32,
    ) -> TaskHandle;

    /// Cancel a previously scheduled task. A no-op if it already ran.
    fn cancel(&self, handle: TaskHandle);
}

/// Short-scope critical section guard for the handful of structures shared
/// across contexts (timer list, session-listener list, pending-shutdown
/// counters). Must never bracket code that calls back into application
/// logic while held -- this is a host-simulation stand-in for the original's
/// interrupt-suspend lock, backed by a real mutex since there is no ISR here.
pub struct ScopedMutex<'a, T> {
    guard: std::sync::MutexGuard<'a, T>,
}

impl<'a, T> std::ops::Deref for ScopedMutex<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<'a, T> std::ops::DerefMut for ScopedMutex<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Wraps a value that is mutated only under a [`ScopedMutex`].
pub struct Guarded<T> {
    inner: Mutex<T>,
}

impl<T> Guarded<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> ScopedMutex<'_, T> {
        ScopedMutex {
            guard: self.inner.lock().expect("scoped mutex poisoned"),
        }
    }
}

struct Pending {
    handle: TaskHandle,
    ctx: Context,
    due_us: u32,
    task: Box<dyn FnMut() + Send>,
    cancelled: bool,
}

/// A deterministic, single-threaded scheduler used to drive the whole stack
/// in tests and demos without a real RTOS. Tasks posted to the same context
/// run in FIFO order relative to each other; `advance`/`run_until_idle` are
/// the test harness's equivalent of the hardware timer interrupt.
#[derive(Clone)]
pub struct SimpleScheduler {
    state: Arc<Mutex<SimpleSchedulerState>>,
}

struct SimpleSchedulerState {
    now_us: u32,
    next_handle: u64,
    pending: VecDeque<Pending>,
}

impl SimpleScheduler {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimpleSchedulerState {
                now_us: 0,
                next_handle: 0,
                pending: VecDeque::new(),
            })),
        }
    }

    pub fn now_us(&self) -> u32 {
        self.state.lock().unwrap().now_us
    }

    /// Number of tasks still queued (run or not) for a given context.
    /// Mainly useful for asserting per-context backlog in tests.
    pub fn pending_count_for_ctx(&self, ctx: Context) -> usize {
        self.state
            .lock()
            .unwrap()
            .pending
            .iter()
            .filter(|p| p.ctx == ctx && !p.cancelled)
            .count()
    }

    /// Run every task whose due time has already passed, in context-FIFO
    /// order, without moving the clock.
    pub fn run_until_idle(&self) {
        loop {
            let due = {
                let state = self.state.lock().unwrap();
                state.now_us
            };
            if !self.run_due(due) {
                break;
            }
        }
    }

    /// Move the clock forward by `delta_us` and run any tasks that become
    /// due, including ones they themselves schedule.
    pub fn advance(&self, delta_us: u32) {
        let target = {
            let mut state = self.state.lock().unwrap();
            state.now_us = state.now_us.wrapping_add(delta_us);
            state.now_us
        };
        while self.run_due(target) {}
    }

    fn run_due(&self, now: u32) -> bool {
        let mut task = {
            let mut state = self.state.lock().unwrap();
            let idx = state.pending.iter().position(|p| {
                !p.cancelled && (now.wrapping_sub(p.due_us) as i32) >= 0
            });
            match idx {
                Some(i) => state.pending.remove(i),
                None => None,
            }
        };
        match &mut task {
            Some(p) if !p.cancelled => {
                (p.task)();
                true
            }
            _ => false,
        }
    }
}

impl Default for SimpleScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for SimpleScheduler {
    fn post(&self, ctx: Context, task: Box<dyn FnMut() + Send>) -> TaskHandle {
        self.schedule_after(ctx, task, 0)
    }

    fn schedule_after(
        &self,
        ctx: Context,
        task: Box<dyn FnMut() + Send>,
        delay_us: u32,
    ) -> TaskHandle {
        let mut state = self.state.lock().unwrap();
        let handle = TaskHandle(state.next_handle);
        state.next_handle += 1;
        let due_us = state.now_us.wrapping_add(delay_us);
        state.pending.push_back(Pending {
            handle,
            ctx,
            due_us,
            task,
            cancelled: false,
        });
        handle
    }

    fn cancel(&self, handle: TaskHandle) {
        let mut state = self.state.lock().unwrap();
        if let Some(p) = state.pending.iter_mut().find(|p| p.handle == handle) {
            p.cancelled = true;
        }
    }
}
