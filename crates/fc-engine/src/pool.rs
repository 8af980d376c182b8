//! Workers pool
//!
//! Fixed thread pool that runs every schedulable filter. Each worker
//! repeatedly picks the due task with the earliest deadline, invokes its
//! `process()` outside the pool lock, and reschedules it from the returned
//! hint. A filter runs in at most one thread at a time (the in-flight
//! flag), slaves are never picked, and `remove_task` only returns once the
//! task is out of flight, which is what makes path removal race-free.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use fc_core::EngineClock;

use crate::filter::{FilterHandle, FilterRole, ProcessOutcome, RETRY_HINT_US};

/// Idle wait when no task has a deadline, bounded so stop/add are noticed.
const IDLE_WAIT: Duration = Duration::from_millis(5);

struct Task {
    handle: FilterHandle,
    next_due_us: u64,
    in_flight: bool,
    suspended: bool,
}

impl Task {
    fn pickable(&self) -> bool {
        !self.in_flight && !self.suspended && self.handle.role != FilterRole::Slave
    }
}

#[derive(Default)]
struct PoolState {
    tasks: HashMap<i32, Task>,
}

struct PoolInner {
    state: Mutex<PoolState>,
    cond: Condvar,
    running: AtomicBool,
    clock: Arc<EngineClock>,
}

/// Fixed-size scheduler for filter invocations.
pub struct WorkersPool {
    inner: Arc<PoolInner>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkersPool {
    /// Default worker count: at least 4, more on wide machines.
    pub fn default_threads() -> usize {
        num_cpus::get().max(4)
    }

    pub fn new(threads: usize, clock: Arc<EngineClock>) -> Self {
        let threads = threads.max(1);
        let inner = Arc::new(PoolInner {
            state: Mutex::new(PoolState::default()),
            cond: Condvar::new(),
            running: AtomicBool::new(true),
            clock,
        });

        let handles = (0..threads)
            .map(|n| {
                let inner = Arc::clone(&inner);
                thread::Builder::new()
                    .name(format!("fc-worker-{n}"))
                    .spawn(move || worker_loop(inner))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        log::debug!("workers pool started with {threads} threads");
        Self { inner, threads: handles }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn task_count(&self) -> usize {
        self.inner.state.lock().tasks.len()
    }

    /// Register a filter for scheduling. Fails on duplicate ids or after
    /// `stop`.
    pub fn add_task(&self, handle: FilterHandle) -> bool {
        if !self.is_running() {
            return false;
        }
        let mut st = self.inner.state.lock();
        if st.tasks.contains_key(&handle.id) {
            return false;
        }
        let id = handle.id;
        st.tasks.insert(
            id,
            Task { handle, next_due_us: self.inner.clock.now_us(), in_flight: false, suspended: false },
        );
        self.inner.cond.notify_all();
        true
    }

    /// Unregister a filter. Blocks until any in-flight invocation of it has
    /// completed, so the caller may safely tear the filter down afterwards.
    pub fn remove_task(&self, id: i32) -> bool {
        let mut st = self.inner.state.lock();
        loop {
            match st.tasks.get(&id) {
                None => return false,
                Some(task) if !task.in_flight => {
                    st.tasks.remove(&id);
                    self.inner.cond.notify_all();
                    return true;
                }
                Some(_) => {
                    self.inner.cond.wait(&mut st);
                }
            }
        }
    }

    /// Park a task; a pending control mutation may suspend the filters it
    /// touches.
    pub fn suspend_task(&self, id: i32) -> bool {
        let mut st = self.inner.state.lock();
        match st.tasks.get_mut(&id) {
            Some(task) => {
                task.suspended = true;
                true
            }
            None => false,
        }
    }

    pub fn resume_task(&self, id: i32) -> bool {
        let mut st = self.inner.state.lock();
        match st.tasks.get_mut(&id) {
            Some(task) => {
                task.suspended = false;
                self.inner.cond.notify_all();
                true
            }
            None => false,
        }
    }

    /// Nudge sleeping workers, e.g. after queueing events.
    pub fn wake(&self) {
        self.inner.cond.notify_all();
    }

    /// Refuse new invocations, let running ones complete, join all workers.
    pub fn stop(&mut self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner.cond.notify_all();
        if self.threads.is_empty() {
            return;
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        log::debug!("workers pool stopped");
    }
}

impl Drop for WorkersPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(inner: Arc<PoolInner>) {
    loop {
        let picked = {
            let mut st = inner.state.lock();
            loop {
                if !inner.running.load(Ordering::Acquire) {
                    return;
                }
                let now = inner.clock.now_us();
                let due = st
                    .tasks
                    .iter_mut()
                    .filter(|(_, t)| t.pickable() && t.next_due_us <= now)
                    .min_by_key(|(_, t)| t.next_due_us)
                    .map(|(id, t)| {
                        t.in_flight = true;
                        (*id, t.handle.clone())
                    });
                if let Some(pick) = due {
                    break pick;
                }

                let earliest =
                    st.tasks.values().filter(|t| t.pickable()).map(|t| t.next_due_us).min();
                let wait = match earliest {
                    Some(deadline) => {
                        inner.clock.until(deadline).clamp(Duration::from_micros(50), IDLE_WAIT)
                    }
                    None => IDLE_WAIT,
                };
                inner.cond.wait_for(&mut st, wait);
            }
        };

        let (id, handle) = picked;
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            handle.filter.lock().process()
        }));

        let mut st = inner.state.lock();
        if let Some(task) = st.tasks.get_mut(&id) {
            task.in_flight = false;
            let now = inner.clock.now_us();
            match outcome {
                Ok(ProcessOutcome::Continue { next_hint_us }) => {
                    task.next_due_us = now + next_hint_us;
                }
                Ok(ProcessOutcome::NotReady) => {
                    task.next_due_us = now + RETRY_HINT_US;
                }
                Ok(ProcessOutcome::Failed) => {
                    log::error!("filter {id} failed; detaching from the pool");
                    st.tasks.remove(&id);
                }
                Err(_) => {
                    // A crashed invocation is fatal for the whole pool.
                    log::error!("filter {id} panicked; stopping the pool");
                    st.tasks.remove(&id);
                    inner.running.store(false, Ordering::Release);
                }
            }
        }
        drop(st);
        inner.cond.notify_all();
    }
}
