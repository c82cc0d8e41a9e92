//! Cooperative single-threaded routine scheduler.
//!
//! The caller's context (UI loop, game loop, CLI loop) owns a [`Scheduler`]
//! and calls [`Scheduler::tick`] once per frame. Every registered routine is
//! stepped once per tick, on the ticking thread. Connectors use this to
//! deliver REST responses and inbound stream messages without ever running
//! user callbacks on a network task.
//!
//! Routines may register or stop other routines (or themselves) while being
//! stepped. The routine list lock is never held across a `step()` call.
//!
//! A routine that panics is logged and removed; the rest of the batch is
//! still stepped.

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Outcome of a single routine step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep the routine scheduled for the next tick
    Continue,
    /// Remove the routine
    Done,
}

/// A unit of cooperative work, stepped once per scheduler tick.
pub trait Routine: Send {
    fn step(&mut self) -> Step;
}

impl<F> Routine for F
where
    F: FnMut() -> Step + Send,
{
    fn step(&mut self) -> Step {
        self()
    }
}

/// Handle used to stop a scheduled routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutineId(u64);

#[derive(Default)]
struct RoutineTable {
    routines: Vec<(RoutineId, Box<dyn Routine>)>,
    live: HashSet<RoutineId>,
}

/// Registry of cooperative routines driven by [`tick`](Scheduler::tick).
#[derive(Default)]
pub struct Scheduler {
    next_id: AtomicU64,
    table: Mutex<RoutineTable>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a routine. It is first stepped on the next tick.
    pub fn run<R>(&self, routine: R) -> RoutineId
    where
        R: Routine + 'static,
    {
        let id = RoutineId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut table = self.table.lock();
        table.live.insert(id);
        table.routines.push((id, Box::new(routine)));
        id
    }

    /// Stop a routine. Returns `false` if it was not running.
    ///
    /// A routine stopped while it is being stepped finishes that step and is
    /// then dropped.
    pub fn stop(&self, id: RoutineId) -> bool {
        let removed = {
            let mut table = self.table.lock();
            if !table.live.remove(&id) {
                return false;
            }
            let pos = table.routines.iter().position(|(rid, _)| *rid == id);
            pos.map(|pos| table.routines.remove(pos))
        };
        // Dropped outside the lock
        drop(removed);
        true
    }

    pub fn is_running(&self, id: RoutineId) -> bool {
        self.table.lock().live.contains(&id)
    }

    /// Number of scheduled routines.
    pub fn len(&self) -> usize {
        self.table.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Step every scheduled routine once. Returns how many were stepped.
    pub fn tick(&self) -> usize {
        let batch = std::mem::take(&mut self.table.lock().routines);
        let mut kept = Vec::with_capacity(batch.len());
        let mut finished = Vec::new();
        let mut stepped = 0;

        for (id, mut routine) in batch {
            if !self.is_running(id) {
                finished.push(routine);
                continue;
            }

            stepped += 1;
            let step = match catch_unwind(AssertUnwindSafe(|| routine.step())) {
                Ok(step) => step,
                Err(panic_info) => {
                    let msg = extract_panic_message(&panic_info);
                    error!(routine = id.0, panic = %msg, "Routine panicked, removing it");
                    Step::Done
                }
            };
            match step {
                Step::Continue => kept.push((id, routine)),
                Step::Done => {
                    self.table.lock().live.remove(&id);
                    finished.push(routine);
                }
            }
        }

        {
            let mut table = self.table.lock();
            let added = std::mem::take(&mut table.routines);
            let (alive, stopped): (Vec<_>, Vec<_>) =
                kept.into_iter().partition(|(id, _)| table.live.contains(id));
            table.routines = alive;
            table.routines.extend(added);
            finished.extend(stopped.into_iter().map(|(_, routine)| routine));
        }

        drop(finished);
        stepped
    }

    /// Tick every `period` until `shutdown` is cancelled.
    ///
    /// Must run on the thread that owns the caller's context; use it from a
    /// `LocalSet`, a `current_thread` runtime, or the main task.
    pub async fn drive(&self, period: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!("Scheduler shutdown requested");
                    break;
                }

                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }
    }
}

pub(crate) fn extract_panic_message(panic_info: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic (non-string payload)".to_string()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("routines", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_routine_runs_until_done() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let id = scheduler.run(move || {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                Step::Done
            } else {
                Step::Continue
            }
        });

        assert!(scheduler.is_running(id));
        for _ in 0..5 {
            scheduler.tick();
        }

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!scheduler.is_running(id));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_stop_removes_routine() {
        let scheduler = Scheduler::new();
        let id = scheduler.run(|| Step::Continue);

        assert_eq!(scheduler.tick(), 1);
        assert!(scheduler.stop(id));
        assert!(!scheduler.stop(id));
        assert_eq!(scheduler.tick(), 0);
    }

    #[test]
    fn test_routine_can_schedule_and_stop_during_tick() {
        let scheduler = Arc::new(Scheduler::new());
        let spawned = Arc::new(AtomicUsize::new(0));

        let inner_scheduler = scheduler.clone();
        let inner_spawned = spawned.clone();
        scheduler.run(move || {
            let counter = inner_spawned.clone();
            inner_scheduler.run(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Step::Done
            });
            Step::Done
        });

        // First tick only steps the parent; the child starts next tick
        assert_eq!(scheduler.tick(), 1);
        assert_eq!(spawned.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.tick(), 1);
        assert_eq!(spawned.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_routine_stopping_itself() {
        let scheduler = Arc::new(Scheduler::new());
        let slot = Arc::new(parking_lot::Mutex::new(None::<RoutineId>));

        let inner_scheduler = scheduler.clone();
        let inner_slot = slot.clone();
        let id = scheduler.run(move || {
            if let Some(id) = *inner_slot.lock() {
                inner_scheduler.stop(id);
            }
            Step::Continue
        });
        *slot.lock() = Some(id);

        scheduler.tick();
        assert!(!scheduler.is_running(id));
        assert_eq!(scheduler.tick(), 0);
    }

    #[test]
    fn test_panicking_routine_does_not_drop_others() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let bad = scheduler.run(|| -> Step { panic!("callback failed") });
        let good = scheduler.run(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Step::Continue
        });

        assert_eq!(scheduler.tick(), 2);
        assert!(!scheduler.is_running(bad));
        assert!(scheduler.is_running(good));
        assert_eq!(scheduler.len(), 1);

        for _ in 0..3 {
            scheduler.tick();
        }
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_drive_stops_on_cancel() {
        let scheduler = Arc::new(Scheduler::new());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        scheduler.run(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Step::Continue
        });

        let shutdown = CancellationToken::new();
        let driver = {
            let scheduler = scheduler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { scheduler.drive(Duration::from_millis(5), shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        driver.await.unwrap();

        assert!(count.load(Ordering::SeqCst) >= 2);
    }
}
