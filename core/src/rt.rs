//! Fixed-period task execution
//!
//! Estimators run inside control loops that fire at a fixed rate. A [Task] is initialised once and then updated
//! every period with the time that actually elapsed since its previous update; a [PeriodicRunner] owns the schedule
//! and a [Clock] to wait on. [SystemClock] sleeps the calling thread, [SimulatedClock] jumps straight to each
//! deadline so a run is deterministic and finishes as fast as the task allows.
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{EstimatorError, Result};

/// Periodic unit of work
pub trait Task {
    /// Called once before the first update.
    fn init(&mut self) {}
    /// Called once per period with the elapsed time since the previous update, in seconds.
    fn update(&mut self, time_lapse: f64);
}

/// Monotonic time source measured from an arbitrary origin
pub trait Clock {
    /// Time elapsed since the clock's origin
    fn now(&self) -> Duration;
    /// Block until `deadline`; returns immediately if it has already passed.
    fn sleep_until(&mut self, deadline: Duration);
}

/// Wall clock backed by [Instant]
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    origin: Instant,
}
impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            origin: Instant::now(),
        }
    }
}
impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}
impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
    fn sleep_until(&mut self, deadline: Duration) {
        let now = self.now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
    }
}

/// Deterministic clock that only moves when told to
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SimulatedClock {
    now: Duration,
}
impl SimulatedClock {
    pub fn new() -> Self {
        Self::default()
    }
    /// Move the clock forward, e.g. to model a cycle that ran long.
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }
}
impl Clock for SimulatedClock {
    fn now(&self) -> Duration {
        self.now
    }
    fn sleep_until(&mut self, deadline: Duration) {
        if deadline > self.now {
            self.now = deadline;
        }
    }
}

/// Drives a [Task] at a fixed period
#[derive(Debug)]
pub struct PeriodicRunner<C: Clock> {
    clock: C,
    period: Duration,
    deadline: Duration,
    last_update: Option<Duration>,
    cycles: u64,
    overruns: u64,
}
impl<C: Clock> PeriodicRunner<C> {
    /// Create a runner with a non-zero `period`.
    pub fn new(clock: C, period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(EstimatorError::InvalidParameter {
                name: "period",
                value: 0.0,
            });
        }
        Ok(PeriodicRunner {
            clock,
            period,
            deadline: Duration::ZERO,
            last_update: None,
            cycles: 0,
            overruns: 0,
        })
    }
    pub fn period(&self) -> Duration {
        self.period
    }
    pub fn clock(&self) -> &C {
        &self.clock
    }
    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }
    /// Number of completed cycles
    pub fn cycles(&self) -> u64 {
        self.cycles
    }
    /// Number of cycles that started after their deadline had already passed
    pub fn overruns(&self) -> u64 {
        self.overruns
    }
    /// Wait for the next deadline and update `task` once.
    ///
    /// The first call initialises the task and schedules its first update one period later. When a deadline has
    /// already passed the cycle runs immediately and the schedule restarts from the current time.
    pub fn run_cycle<T: Task + ?Sized>(&mut self, task: &mut T) {
        let last = match self.last_update {
            Some(last) => last,
            None => {
                task.init();
                let start = self.clock.now();
                self.deadline = start + self.period;
                start
            }
        };
        let now = self.clock.now();
        if now > self.deadline {
            self.overruns += 1;
            log::warn!(
                "cycle {} overran its deadline by {:?}",
                self.cycles + 1,
                now - self.deadline
            );
            self.deadline = now;
        } else {
            self.clock.sleep_until(self.deadline);
        }
        let now = self.clock.now();
        let time_lapse = now.saturating_sub(last);
        self.last_update = Some(now);
        self.deadline += self.period;
        self.cycles += 1;
        task.update(time_lapse.as_secs_f64());
    }
    /// Run `cycles` consecutive cycles.
    pub fn run<T: Task + ?Sized>(&mut self, task: &mut T, cycles: u64) {
        for _ in 0..cycles {
            self.run_cycle(task);
        }
    }
}
