//! Hourly, minute-offset scheduling of ingestion runs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Result};
use chrono::{Local, NaiveDateTime, TimeDelta, Timelike};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Source of local wall-clock time for slot computation.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Fires once an hour at `minute:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourlySchedule {
    minute: u32,
}

impl HourlySchedule {
    pub fn new(minute: u32) -> Result<Self> {
        ensure!(minute < 60, "minute must be in 0..=59, got {minute}");
        Ok(Self { minute })
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    /// This hour's slot, or the next hour's when this one is not strictly after `now`.
    pub fn next_run_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        let into_hour = TimeDelta::seconds(i64::from(now.minute() * 60 + now.second()))
            + TimeDelta::nanoseconds(i64::from(now.nanosecond()));
        let slot = now - into_hour + TimeDelta::minutes(i64::from(self.minute));
        if slot <= now {
            slot + TimeDelta::hours(1)
        } else {
            slot
        }
    }

    pub fn delay_until_next(&self, now: NaiveDateTime) -> Duration {
        (self.next_run_after(now) - now).to_std().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Runs a job eagerly, then at every slot of its schedule until shut down.
/// The next slot is computed only after a run completes, so runs never overlap.
pub struct Scheduler {
    name: String,
    schedule: HourlySchedule,
    clock: Arc<dyn Clock>,
    state: watch::Sender<SchedulerState>,
}

impl Scheduler {
    pub fn new(name: impl Into<String>, schedule: HourlySchedule) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            name: name.into(),
            schedule,
            clock: Arc::new(LocalClock),
            state,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Returns once `shutdown` flips to `true` (or its sender is dropped).
    /// A run in progress is always allowed to finish.
    pub async fn run<F, Fut>(&self, mut job: F, mut shutdown: watch::Receiver<bool>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        info!(
            scheduler = %self.name,
            minute = self.schedule.minute(),
            "scheduler started"
        );
        if !*shutdown.borrow() {
            self.run_job(&mut job).await;
        }

        loop {
            if *shutdown.borrow() {
                break;
            }
            let now = self.clock.now();
            let next = self.schedule.next_run_after(now);
            let wait = self.schedule.delay_until_next(now);
            info!(
                scheduler = %self.name,
                next_run = %next.format("%H:%M:%S"),
                wait_secs = wait.as_secs(),
                "next run scheduled"
            );

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
            self.run_job(&mut job).await;
        }
        info!(scheduler = %self.name, "scheduler stopped");
    }

    async fn run_job<F, Fut>(&self, job: &mut F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.state.send_replace(SchedulerState::Running);
        if let Err(err) = job().await {
            warn!(scheduler = %self.name, error = %format!("{err:#}"), "scheduled run failed");
        }
        self.state.send_replace(SchedulerState::Idle);
    }
}

/// Owns the shutdown channel and the spawned scheduler tasks.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Default for SchedulerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerHandle {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            tasks: Vec::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(task));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Signals every scheduler and waits for them to wind down.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "scheduler task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 13)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    struct FixedClock(NaiveDateTime);

    impl Clock for FixedClock {
        fn now(&self) -> NaiveDateTime {
            self.0
        }
    }

    #[test]
    fn next_slot_is_this_hour_or_the_next() {
        let schedule = HourlySchedule::new(15).unwrap();
        assert_eq!(schedule.next_run_after(at(10, 47, 0)), at(11, 15, 0));
        assert_eq!(schedule.next_run_after(at(10, 3, 0)), at(10, 15, 0));
        assert_eq!(schedule.next_run_after(at(10, 15, 0)), at(11, 15, 0));
        assert_eq!(schedule.next_run_after(at(10, 14, 59)), at(10, 15, 0));
        assert_eq!(
            schedule.next_run_after(at(23, 50, 0)),
            NaiveDate::from_ymd_opt(2026, 1, 14)
                .unwrap()
                .and_hms_opt(0, 15, 0)
                .unwrap()
        );
        assert_eq!(
            schedule.delay_until_next(at(10, 47, 30)),
            Duration::from_secs(27 * 60 + 30)
        );
    }

    #[test]
    fn minute_must_fit_in_an_hour() {
        assert!(HourlySchedule::new(59).is_ok());
        assert!(HourlySchedule::new(60).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_never_overlap_and_stop_on_shutdown() {
        let scheduler = Scheduler::new("test", HourlySchedule::new(15).unwrap())
            .with_clock(Arc::new(FixedClock(at(10, 47, 0))));
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);

        let job = {
            let (active, max_active, runs) = (active.clone(), max_active.clone(), runs.clone());
            move || {
                let (active, max_active, runs) = (active.clone(), max_active.clone(), runs.clone());
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(40 * 60)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    runs.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            }
        };
        let task = tokio::spawn(async move { scheduler.run(job, rx).await });

        // Runs end at 40m, 108m and 176m; the fourth would start at 204m.
        tokio::time::sleep(Duration::from_secs(180 * 60)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_lets_the_current_run_finish() {
        let scheduler = Scheduler::new("test", HourlySchedule::new(0).unwrap())
            .with_clock(Arc::new(FixedClock(at(9, 30, 0))));
        let mut state = scheduler.state();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut handle = SchedulerHandle::new();
        let rx = handle.subscribe();

        let counter = runs.clone();
        handle.spawn(async move {
            scheduler
                .run(
                    move || {
                        let counter = counter.clone();
                        async move {
                            tokio::time::sleep(Duration::from_secs(600)).await;
                            counter.fetch_add(1, Ordering::SeqCst);
                            Err::<(), _>(anyhow::anyhow!("upstream unavailable"))
                        }
                    },
                    rx,
                )
                .await
        });
        state
            .wait_for(|s| *s == SchedulerState::Running)
            .await
            .unwrap();

        handle.shutdown().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
