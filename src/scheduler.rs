use std::{future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
    sync::Semaphore,
    task::{JoinError, JoinHandle, JoinSet},
    time::{sleep, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    batch::{BatchReport, BatchRunner},
    config::OverlapPolicy,
};

/// Wall-clock source in epoch milliseconds.
pub type WallClock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> WallClock {
    Arc::new(|| Utc::now().timestamp_millis())
}

/// Time from `now_millis` to the next multiple of `period` on the wall clock.
/// A `now` that sits exactly on a boundary waits a whole period.
pub fn delay_until_next_tick(now_millis: i64, period: Duration) -> Duration {
    let period = period_millis(period);
    let rem = now_millis.rem_euclid(period);
    Duration::from_millis((period - rem) as u64)
}

fn period_millis(period: Duration) -> i64 {
    (period.as_millis() as i64).max(1)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub skipped: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub aborted: u64,
}

pub struct Scheduler {
    runner: Arc<BatchRunner>,
    period: Duration,
    overlap: OverlapPolicy,
    clock: WallClock,
}

impl Scheduler {
    pub fn new(runner: Arc<BatchRunner>, period: Duration, overlap: OverlapPolicy) -> Self {
        Self {
            runner,
            period,
            overlap,
            clock: system_clock(),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: WallClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn spawn(self) -> SchedulerHandle {
        let stop = CancellationToken::new();
        let kill = CancellationToken::new();
        let handle = tokio::spawn(self.run(stop.clone(), kill.clone()));
        SchedulerHandle { stop, kill, handle }
    }

    /// Fires once per wall-clock slot of `period`. The sleep is recomputed
    /// from the wall clock after every wake-up, so a clock step or a suspend
    /// is corrected at the next tick and missed slots are not replayed.
    #[tracing::instrument(skip_all)]
    async fn run(self, stop: CancellationToken, kill: CancellationToken) -> SchedulerStats {
        let period = period_millis(self.period);
        let now = (self.clock)();
        let mut last_slot = now.div_euclid(period);
        let first = delay_until_next_tick(now, self.period);

        info!(
            "scheduler started: period {:?}, overlap {:?}, first tick in {:?}",
            self.period, self.overlap, first
        );

        let next_tick = sleep(first);
        tokio::pin!(next_tick);

        // one permit: held by the running batch under the skip policy
        let busy = Arc::new(Semaphore::new(1));
        let mut batches = JoinSet::new();
        let mut stats = SchedulerStats::default();

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = &mut next_tick => {
                    let now = (self.clock)();
                    let slot = now.div_euclid(period);
                    // a slot fires at most once, even if the wall clock stepped back
                    if slot > last_slot {
                        last_slot = slot;
                        stats.ticks += 1;
                        self.fire(stats.ticks, &busy, &mut batches, &mut stats);
                    }
                    next_tick
                        .as_mut()
                        .reset(Instant::now() + delay_until_next_tick(now, self.period));
                },
                Some(res) = batches.join_next(), if !batches.is_empty() => {
                    Self::reap(res, &mut stats);
                },
            }
        }

        info!("scheduler stopping, waiting for {} batch(es)", batches.len());
        loop {
            tokio::select! {
                res = batches.join_next() => match res {
                    Some(res) => Self::reap(res, &mut stats),
                    None => break,
                },
                _ = kill.cancelled() => {
                    warn!("aborting {} running batch(es)", batches.len());
                    batches.abort_all();
                    while let Some(res) = batches.join_next().await {
                        Self::reap(res, &mut stats);
                    }
                    break;
                },
            }
        }
        info!("scheduler stopped: {:?}", stats);

        stats
    }

    fn fire(
        &self,
        tick: u64,
        busy: &Arc<Semaphore>,
        batches: &mut JoinSet<(u64, anyhow::Result<BatchReport>)>,
        stats: &mut SchedulerStats,
    ) {
        let permit = match self.overlap {
            OverlapPolicy::Allow => None,
            OverlapPolicy::Skip => match busy.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    warn!("tick {} skipped: previous batch still running", tick);
                    stats.skipped += 1;
                    return;
                }
            },
        };

        let runner = self.runner.clone();
        batches.spawn(async move {
            let res = runner.run().await;
            drop(permit);
            (tick, res)
        });
    }

    fn reap(
        res: Result<(u64, anyhow::Result<BatchReport>), JoinError>,
        stats: &mut SchedulerStats,
    ) {
        match res {
            Ok((tick, Ok(report))) => {
                info!(
                    "tick {}: {}/{} invocation(s) done",
                    tick, report.completed, report.drawn
                );
                stats.succeeded += 1;
            }
            Ok((tick, Err(e))) => {
                error!("tick {}: batch aborted: {:#}", tick, e);
                stats.failed += 1;
            }
            Err(e) if e.is_cancelled() => {
                stats.aborted += 1;
            }
            Err(e) => {
                error!("batch task died: {:?}", e);
                stats.failed += 1;
            }
        }
    }
}

/// Handle to a running [`Scheduler`].
#[derive(Debug)]
pub struct SchedulerHandle {
    stop: CancellationToken,
    kill: CancellationToken,
    handle: JoinHandle<SchedulerStats>,
}

impl SchedulerHandle {
    /// Stops firing ticks. Batches already running are left to finish.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Stops firing ticks and cancels the batches still running.
    pub fn abort(&self) {
        self.stop.cancel();
        self.kill.cancel();
    }

    pub async fn wait(self) -> Result<SchedulerStats, JoinError> {
        self.handle.await
    }

    /// Stops the scheduler and drains running batches. Batches still running
    /// after `grace`, or once `force` resolves, are aborted.
    pub async fn shutdown(
        mut self,
        grace: Duration,
        force: impl Future<Output = ()>,
    ) -> Result<SchedulerStats, JoinError> {
        self.stop();
        tokio::select! {
            res = &mut self.handle => return res,
            _ = sleep(grace) => warn!("batches still running after {:?}", grace),
            _ = force => warn!("forced shutdown"),
        }
        self.abort();
        self.wait().await
    }
}
