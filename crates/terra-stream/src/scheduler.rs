//! Time-boxed priority task scheduler.
//!
//! Work items are queued with a priority (lower runs first, ties run in
//! submission order) and executed one at a time from [`TaskScheduler::run_tick`]
//! until the per-tick run budget is used up. Nothing is preempted: the budget
//! is checked between tasks, so a single long task can overrun it.

use ahash::AHashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{error, trace};

use crate::clock::Clock;
use crate::config::SchedulerConfig;

/// Handle for a submitted task, usable for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Returns the raw id value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What happened during one call to [`TaskScheduler::run_tick`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tasks taken off the queue and run
    pub executed: usize,
    /// Tasks whose body returned an error
    pub failed: usize,
    /// Cancelled entries discarded during selection
    pub skipped_cancelled: usize,
    /// Time between tick start and the end of the last task
    pub elapsed: Duration,
    /// The loop stopped because the budget ran out
    pub budget_exhausted: bool,
    /// The tick did not run because the inter-tick delay had not elapsed
    pub suspended: bool,
}

/// Cooperative, budgeted priority queue of work items.
pub struct TaskScheduler<T> {
    /// Ordering of pending work: smallest `(priority, id)` first
    queue: BinaryHeap<Reverse<(i32, u64)>>,
    /// Payloads of tasks that are still pending
    tasks: AHashMap<TaskId, T>,
    /// Next id to hand out
    next_id: u64,
    /// Per-tick run budget
    run_budget: Duration,
    /// Pause after an exhausted tick
    inter_tick_delay: Duration,
    /// Earliest instant the loop may run again
    resume_at: Option<Instant>,
}

impl<T> fmt::Debug for TaskScheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("pending", &self.tasks.len())
            .field("next_id", &self.next_id)
            .field("run_budget", &self.run_budget)
            .field("resume_at", &self.resume_at)
            .finish_non_exhaustive()
    }
}

impl<T> TaskScheduler<T> {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            queue: BinaryHeap::new(),
            tasks: AHashMap::new(),
            next_id: 0,
            run_budget: config.run_budget(),
            inter_tick_delay: config.inter_tick_delay(),
            resume_at: None,
        }
    }

    /// Queues `work` and returns its id.
    ///
    /// Submitting wakes a loop that is waiting out its inter-tick delay.
    pub fn submit(&mut self, work: T, priority: i32) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.queue.push(Reverse((priority, id.0)));
        self.tasks.insert(id, work);
        self.resume_at = None;
        trace!(task = id.0, priority, "Task submitted");
        id
    }

    /// Removes a pending task. Returns false if it already ran or is unknown.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let removed = self.tasks.remove(&id).is_some();
        if removed {
            trace!(task = id.0, "Task cancelled");
        }
        if self.tasks.is_empty() {
            self.queue.clear();
        }
        removed
    }

    /// Returns true while `id` is queued and has not started.
    #[must_use]
    pub fn is_pending(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Per-tick run budget.
    #[must_use]
    pub const fn run_budget(&self) -> Duration {
        self.run_budget
    }

    /// Runs queued tasks in priority order until the budget is spent or the
    /// queue is empty.
    ///
    /// `execute` receives the scheduler itself so task bodies can submit
    /// follow-up work or cancel other tasks. A failing task is logged and the
    /// tick moves on to the next one.
    pub fn run_tick<C, E, F>(&mut self, clock: &C, mut execute: F) -> TickReport
    where
        C: Clock + ?Sized,
        E: fmt::Display,
        F: FnMut(&mut Self, TaskId, T) -> Result<(), E>,
    {
        let start = clock.now();
        let mut report = TickReport::default();

        if self.tasks.is_empty() {
            self.queue.clear();
            self.resume_at = None;
            return report;
        }
        if let Some(resume_at) = self.resume_at {
            if start < resume_at {
                report.suspended = true;
                return report;
            }
        }
        self.resume_at = None;

        loop {
            if clock.now().saturating_duration_since(start) >= self.run_budget {
                report.budget_exhausted = true;
                break;
            }
            let Some((id, work)) = self.pop_next(&mut report) else {
                break;
            };
            report.executed += 1;
            if let Err(e) = execute(self, id, work) {
                report.failed += 1;
                error!(task = id.0, "Task failed: {e}");
            }
        }

        let end = clock.now();
        report.elapsed = end.saturating_duration_since(start);
        if report.budget_exhausted && !self.tasks.is_empty() {
            self.resume_at = Some(end + self.inter_tick_delay);
        }
        trace!(
            executed = report.executed,
            failed = report.failed,
            pending = self.tasks.len(),
            "Scheduler tick finished"
        );
        report
    }

    /// Takes the highest-priority live task off the queue.
    fn pop_next(&mut self, report: &mut TickReport) -> Option<(TaskId, T)> {
        while let Some(Reverse((_, raw))) = self.queue.pop() {
            let id = TaskId(raw);
            match self.tasks.remove(&id) {
                Some(work) => return Some((id, work)),
                None => report.skipped_cancelled += 1,
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::convert::Infallible;

    fn scheduler(budget_ms: f64, delay_ms: f64) -> TaskScheduler<&'static str> {
        TaskScheduler::new(&SchedulerConfig {
            run_budget_ms: budget_ms,
            inter_tick_delay_ms: delay_ms,
        })
    }

    fn run_all(
        scheduler: &mut TaskScheduler<&'static str>,
        clock: &ManualClock,
    ) -> (Vec<&'static str>, TickReport) {
        let mut ran = Vec::new();
        let report = scheduler.run_tick(clock, |_, _, work| {
            ran.push(work);
            Ok::<_, Infallible>(())
        });
        (ran, report)
    }

    #[test]
    fn test_lower_priority_value_runs_first() {
        let mut s = scheduler(100.0, 0.0);
        s.submit("late", 3);
        s.submit("early", 0);
        s.submit("middle", 1);

        let (ran, report) = run_all(&mut s, &ManualClock::new());
        assert_eq!(ran, vec!["early", "middle", "late"]);
        assert_eq!(report.executed, 3);
        assert!(!report.budget_exhausted);
        assert!(s.is_empty());
    }

    #[test]
    fn test_ties_run_in_submission_order() {
        let mut s = scheduler(100.0, 0.0);
        s.submit("a", 1);
        s.submit("b", 1);
        s.submit("c", 0);
        s.submit("d", 1);

        let (ran, _) = run_all(&mut s, &ManualClock::new());
        assert_eq!(ran, vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn test_cancelled_task_never_runs() {
        let mut s = scheduler(100.0, 0.0);
        s.submit("keep", 1);
        let doomed = s.submit("doomed", 0);
        assert!(s.cancel(doomed));
        assert!(!s.is_pending(doomed));

        let (ran, report) = run_all(&mut s, &ManualClock::new());
        assert_eq!(ran, vec!["keep"]);
        assert_eq!(report.skipped_cancelled, 1);
    }

    #[test]
    fn test_cancel_after_run_is_noop() {
        let mut s = scheduler(100.0, 0.0);
        let id = s.submit("once", 0);
        run_all(&mut s, &ManualClock::new());

        assert!(!s.cancel(id));
        assert!(!s.cancel(TaskId(999)));
        assert!(s.is_empty());
    }

    #[test]
    fn test_budget_limits_tasks_per_tick() {
        // Every clock read costs 1ms: start, then one check per task.
        let clock = ManualClock::with_step(Duration::from_millis(1));
        let mut s = scheduler(3.0, 0.0);
        for name in ["a", "b", "c", "d", "e"] {
            s.submit(name, 0);
        }

        let (ran, report) = run_all(&mut s, &clock);
        assert_eq!(ran, vec!["a", "b"]);
        assert!(report.budget_exhausted);
        assert_eq!(s.pending_len(), 3);

        let (ran, _) = run_all(&mut s, &clock);
        assert_eq!(ran, vec!["c", "d"]);
    }

    #[test]
    fn test_inter_tick_delay_suspends_until_elapsed() {
        let clock = ManualClock::with_step(Duration::from_millis(1));
        let mut s = scheduler(2.0, 50.0);
        for name in ["a", "b", "c"] {
            s.submit(name, 0);
        }

        let (ran, report) = run_all(&mut s, &clock);
        assert_eq!(ran, vec!["a"]);
        assert!(report.budget_exhausted);

        let (ran, report) = run_all(&mut s, &clock);
        assert!(ran.is_empty());
        assert!(report.suspended);

        clock.advance(Duration::from_millis(60));
        let (ran, _) = run_all(&mut s, &clock);
        assert_eq!(ran, vec!["b"]);
    }

    #[test]
    fn test_submission_wakes_suspended_loop() {
        let clock = ManualClock::with_step(Duration::from_millis(1));
        let mut s = scheduler(2.0, 1000.0);
        s.submit("a", 0);
        s.submit("b", 0);
        run_all(&mut s, &clock);

        s.submit("urgent", -1);
        let (ran, report) = run_all(&mut s, &clock);
        assert!(!report.suspended);
        assert_eq!(ran, vec!["urgent"]);
    }

    #[test]
    fn test_failed_task_does_not_abort_tick() {
        let mut s = scheduler(100.0, 0.0);
        s.submit("bad", 0);
        s.submit("good", 1);

        let mut ran = Vec::new();
        let report = s.run_tick(&ManualClock::new(), |_, _, work| {
            if work == "bad" {
                return Err("exploded");
            }
            ran.push(work);
            Ok(())
        });
        assert_eq!(ran, vec!["good"]);
        assert_eq!(report.failed, 1);
        assert_eq!(report.executed, 2);
    }

    #[test]
    fn test_task_can_submit_follow_up() {
        let mut s = scheduler(100.0, 0.0);
        s.submit("first", 5);

        let mut ran = Vec::new();
        s.run_tick(&ManualClock::new(), |s, _, work| {
            ran.push(work);
            if work == "first" {
                s.submit("second", 9);
            }
            Ok::<_, Infallible>(())
        });
        assert_eq!(ran, vec!["first", "second"]);
    }
}
