use std::sync::Arc;

use anyhow::Context;
use rand::Rng;

use crate::{
    config::{InvocationRange, Target},
    invoker::Invoke,
    record::{InvocationLog, Timestamp},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub drawn: u32,
    pub completed: u32,
}

/// Runs one tick's worth of invocations, one after another.
///
/// The first failing step aborts the rest of the batch; nothing is retried.
#[derive(Debug)]
pub struct BatchRunner {
    target: Target,
    range: InvocationRange,
    invoker: Arc<dyn Invoke>,
    log: Arc<InvocationLog>,
}

impl BatchRunner {
    pub fn new(
        target: Target,
        range: InvocationRange,
        invoker: Arc<dyn Invoke>,
        log: Arc<InvocationLog>,
    ) -> Self {
        Self {
            target,
            range,
            invoker,
            log,
        }
    }

    pub fn draw_count<R: Rng>(&self, rng: &mut R) -> u32 {
        rng.gen_range(self.range.min..=self.range.max)
    }

    pub async fn run(&self) -> anyhow::Result<BatchReport> {
        let n = self.draw_count(&mut rand::thread_rng());
        debug_assert!(self.range.contains(n));
        self.run_n(n).await
    }

    pub async fn run_n(&self, n: u32) -> anyhow::Result<BatchReport> {
        let name = self.target.function_name();
        let mut report = BatchReport {
            drawn: n,
            completed: 0,
        };

        for i in 1..=n {
            let timestamp = Timestamp::now();
            self.log.append(timestamp).await?;

            tracing::info!(
                "Function \"{}\" called @ {} - {}.",
                name,
                timestamp.to_local_string(),
                timestamp
            );

            self.invoker
                .invoke(&self.target)
                .await
                .with_context(|| format!("invocation {}/{} of \"{}\" failed", i, n, name))?;
            report.completed += 1;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{invoker::mock::RecordingInvoker, record::read_timestamps};
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn runner(range: InvocationRange, invoker: Arc<RecordingInvoker>) -> (BatchRunner, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(InvocationLog::new(dir.path().join("log.csv")));
        (BatchRunner::new(Target::default(), range, invoker, log), dir)
    }

    #[test]
    fn test_draw_count_within_range() {
        let (runner, _dir) = runner(InvocationRange::new(1, 9), Default::default());
        let mut rng = StdRng::seed_from_u64(7);

        let drawn = (0..1000)
            .map(|_| runner.draw_count(&mut rng))
            .collect::<HashSet<_>>();
        assert!(drawn.iter().all(|n| InvocationRange::new(1, 9).contains(*n)));
        // both ends are reachable
        assert!(drawn.contains(&1));
        assert!(drawn.contains(&9));
    }

    #[test]
    fn test_draw_count_fixed() {
        let (runner, _dir) = runner(InvocationRange::new(4, 4), Default::default());
        let mut rng = StdRng::seed_from_u64(0);
        assert!((0..100).all(|_| runner.draw_count(&mut rng) == 4));
    }

    #[tokio::test]
    async fn test_single_invocation() {
        let invoker = Arc::new(RecordingInvoker::default());
        let (runner, dir) = runner(InvocationRange::new(1, 1), invoker.clone());
        let started = Timestamp::now();

        let report = runner.run().await.unwrap();

        assert_eq!(report, BatchReport { drawn: 1, completed: 1 });
        assert_eq!(
            invoker.calls(),
            vec![(Target::default().url, Target::default().payload)]
        );
        let lines = read_timestamps(&dir.path().join("log.csv")).await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0] >= started);
    }

    #[tokio::test]
    async fn test_two_ticks_add_up() {
        let invoker = Arc::new(RecordingInvoker::default());
        let (runner, dir) = runner(InvocationRange::default(), invoker.clone());

        let first = runner.run().await.unwrap();
        let second = runner.run().await.unwrap();

        assert!(InvocationRange::default().contains(first.drawn));
        assert!(InvocationRange::default().contains(second.drawn));
        let total = (first.drawn + second.drawn) as usize;
        assert_eq!(invoker.calls().len(), total);
        assert_eq!(read_timestamps(&dir.path().join("log.csv")).await.len(), total);
    }

    #[tokio::test]
    async fn test_lines_are_ordered() {
        let invoker = Arc::new(RecordingInvoker::default());
        let (runner, dir) = runner(InvocationRange::new(5, 5), invoker);

        runner.run().await.unwrap();

        let lines = read_timestamps(&dir.path().join("log.csv")).await;
        assert_eq!(lines.len(), 5);
        assert!(lines.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_zero_invocations() {
        let invoker = Arc::new(RecordingInvoker::default());
        let (runner, dir) = runner(InvocationRange::new(0, 0), invoker.clone());

        let report = runner.run().await.unwrap();

        assert_eq!(report, BatchReport { drawn: 0, completed: 0 });
        assert!(invoker.calls().is_empty());
        assert!(!dir.path().join("log.csv").exists());
    }

    #[tokio::test]
    async fn test_failure_aborts_batch() {
        let invoker = Arc::new(RecordingInvoker::failing_from(2));
        let (runner, dir) = runner(InvocationRange::new(3, 3), invoker.clone());

        let err = runner.run().await.unwrap_err();

        let msg = format!("{:#}", err);
        assert!(msg.contains("invocation 2/3 of \"qrcode-go\" failed"));
        assert!(msg.contains("connection refused (mock)"));
        // the third invocation never happens
        assert_eq!(invoker.calls().len(), 2);
        assert_eq!(read_timestamps(&dir.path().join("log.csv")).await.len(), 2);
    }

    #[tokio::test]
    async fn test_log_failure_skips_call() {
        let invoker = Arc::new(RecordingInvoker::default());
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(InvocationLog::new(dir.path().join("missing").join("log.csv")));
        let runner = BatchRunner::new(
            Target::default(),
            InvocationRange::new(2, 2),
            invoker.clone(),
            log,
        );

        assert!(runner.run().await.is_err());
        assert!(invoker.calls().is_empty());
    }
}
