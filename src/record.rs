use anyhow::Context;
use chrono::{Local, TimeZone, Utc};
use std::{
    fmt,
    path::{Path, PathBuf},
};
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};

/// Milliseconds since the unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        // clamps clocks set before 1970
        Self(Utc::now().timestamp_millis().max(0) as u64)
    }

    /// Local time in the `Fri Oct 16 2026 09:00:00 GMT+0900` form. The
    /// trailing zone name of a javascript `Date()` string, e.g.
    /// `(Japan Standard Time)`, is left out.
    pub fn to_local_string(&self) -> String {
        match Local.timestamp_millis_opt(self.0 as i64).single() {
            Some(dt) => dt.format("%a %b %d %Y %H:%M:%S GMT%z").to_string(),
            None => self.0.to_string(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Append-only file of invocation timestamps, one per line.
///
/// The file is opened in append mode for every record, so it is created if it
/// goes missing and is never truncated. Overlapping batches share one log and
/// are serialized by the lock.
#[derive(Debug)]
pub struct InvocationLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl InvocationLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_owned(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub async fn append(&self, timestamp: Timestamp) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.write_all(format!("{}\n", timestamp).as_bytes())
            .await
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        file.flush().await?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn read_timestamps(path: &Path) -> Vec<Timestamp> {
    tokio::fs::read_to_string(path)
        .await
        .unwrap()
        .lines()
        .map(|line| Timestamp(line.parse().unwrap()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    #[tokio::test]
    async fn test_append_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = InvocationLog::new(dir.path().join("log.csv"));
        assert!(!log.path().exists());

        log.append(Timestamp(1_650_000_000_000)).await.unwrap();

        let text = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert_eq!(text, "1650000000000\n");
    }

    #[tokio::test]
    async fn test_append_never_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        tokio::fs::write(&path, "42\n").await.unwrap();

        // a fresh log over an existing file keeps the old lines
        let log = InvocationLog::new(&path);
        log.append(Timestamp(43)).await.unwrap();
        log.append(Timestamp(44)).await.unwrap();

        assert_eq!(
            read_timestamps(&path).await,
            vec![Timestamp(42), Timestamp(43), Timestamp(44)]
        );
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_lines_intact() {
        let dir = tempfile::tempdir().unwrap();
        let log = std::sync::Arc::new(InvocationLog::new(dir.path().join("log.csv")));

        let tasks = (0..50u64).map(|i| {
            let log = log.clone();
            tokio::spawn(async move { log.append(Timestamp(1_000_000 + i)).await })
        });
        for task in join_all(tasks).await {
            task.unwrap().unwrap();
        }

        let mut lines = read_timestamps(log.path()).await;
        lines.sort();
        assert_eq!(lines, (0..50u64).map(|i| Timestamp(1_000_000 + i)).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_append_to_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let log = InvocationLog::new(dir.path().join("no-such-dir").join("log.csv"));
        let err = log.append(Timestamp::now()).await.unwrap_err();
        assert!(err.to_string().contains("failed to open"));
    }

    #[test]
    fn test_now_is_monotone_enough() {
        let a = Timestamp::now();
        let b = Timestamp::now();
        assert!(b >= a);
        assert!(a.0 > 1_600_000_000_000);
    }

    #[test]
    fn test_local_string() {
        let s = Timestamp(1_650_000_000_000).to_local_string();
        assert!(s.contains("2022"));

        // ends at the numeric offset, no zone name
        let zone = s.rsplit(' ').next().unwrap();
        assert!(zone.starts_with("GMT+") || zone.starts_with("GMT-"));
        assert_eq!(zone.len(), "GMT+0900".len());
        assert!(!s.contains('('));
    }
}
