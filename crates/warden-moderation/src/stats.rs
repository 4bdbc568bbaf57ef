use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use warden_types::models::{Action, ActionCounts, ModerationStats, Verdict};

use crate::error::{ModerationError, Result, with_timeout};
use crate::store::StatsRepository;

const MAX_STATS_LIMIT: u32 = 500;

#[derive(Debug, Default)]
struct WindowCounters {
    allow: AtomicU64,
    flag: AtomicU64,
    queue: AtomicU64,
    block: AtomicU64,
}

impl WindowCounters {
    fn slot(&self, action: Action) -> &AtomicU64 {
        match action {
            Action::Allow => &self.allow,
            Action::Flag => &self.flag,
            Action::Queue => &self.queue,
            Action::Block => &self.block,
        }
    }

    fn add(&self, counts: &ActionCounts) {
        self.allow.fetch_add(counts.allow, Ordering::Relaxed);
        self.flag.fetch_add(counts.flag, Ordering::Relaxed);
        self.queue.fetch_add(counts.queue, Ordering::Relaxed);
        self.block.fetch_add(counts.block, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ActionCounts {
        ActionCounts {
            allow: self.allow.load(Ordering::Relaxed),
            flag: self.flag.load(Ordering::Relaxed),
            queue: self.queue.load(Ordering::Relaxed),
            block: self.block.load(Ordering::Relaxed),
        }
    }
}

/// Verdict counts per fixed window. Open windows live in memory; closed
/// windows are written once as immutable rows.
pub struct StatsAggregator {
    repo: Arc<dyn StatsRepository>,
    window_secs: i64,
    /// Keyed by window start, unix seconds.
    windows: DashMap<i64, WindowCounters>,
    timeout: Duration,
}

impl StatsAggregator {
    pub fn new(repo: Arc<dyn StatsRepository>, window_secs: i64, timeout: Duration) -> Self {
        Self {
            repo,
            window_secs: window_secs.max(1),
            windows: DashMap::new(),
            timeout,
        }
    }

    /// Start of the window `at` falls into.
    pub fn window_start(&self, at: DateTime<Utc>) -> i64 {
        at.timestamp().div_euclid(self.window_secs) * self.window_secs
    }

    pub fn record_verdict(&self, verdict: &Verdict, at: DateTime<Utc>) {
        let key = self.window_start(at);
        self.windows
            .entry(key)
            .or_default()
            .slot(verdict.action)
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Counts accumulated so far for a window that has not been flushed.
    pub fn open_counts(&self, window_start: i64) -> ActionCounts {
        self.windows
            .get(&window_start)
            .map(|counters| counters.snapshot())
            .unwrap_or_default()
    }

    /// Persist one window and drop its counters. `Ok(None)` when nothing was
    /// counted, or when a row for the window already exists (late counts are
    /// dropped rather than overwriting it). On a store error the counts are
    /// put back so the next flush retries them.
    pub async fn flush_window(&self, window_start: i64) -> Result<Option<ModerationStats>> {
        let Some((_, counters)) = self.windows.remove(&window_start) else {
            return Ok(None);
        };
        let counts = counters.snapshot();
        if counts.total() == 0 {
            return Ok(None);
        }

        let stats = ModerationStats {
            window_start: unix(window_start)?,
            window_end: unix(window_start + self.window_secs)?,
            counts,
            total_evaluated: counts.total(),
        };

        match with_timeout(self.timeout, "stats insert", self.repo.insert_stats(&stats)).await {
            Ok(true) => {
                debug!(window_start, total = stats.total_evaluated, "Stats window flushed");
                Ok(Some(stats))
            }
            Ok(false) => {
                warn!(
                    window_start,
                    dropped = stats.total_evaluated,
                    "Stats window already persisted, dropping late counts"
                );
                Ok(None)
            }
            Err(e) => {
                self.windows.entry(window_start).or_default().add(&counts);
                Err(e)
            }
        }
    }

    /// Flush every window that ended at or before `now`. Failures are logged
    /// and retried on the next call.
    pub async fn flush_closed_windows(&self, now: DateTime<Utc>) -> Vec<ModerationStats> {
        let cutoff = now.timestamp();
        self.flush_where(|start| start + self.window_secs <= cutoff).await
    }

    /// Flush every window, including the one still open. Used at shutdown so
    /// in-memory counts outlive the process; counts recorded for that window
    /// after a restart are then dropped as late.
    pub async fn flush_all(&self) -> Vec<ModerationStats> {
        self.flush_where(|_| true).await
    }

    async fn flush_where(&self, due: impl Fn(i64) -> bool) -> Vec<ModerationStats> {
        let mut starts: Vec<i64> = self
            .windows
            .iter()
            .map(|entry| *entry.key())
            .filter(|start| due(*start))
            .collect();
        starts.sort_unstable();

        let mut flushed = Vec::new();
        for start in starts {
            match self.flush_window(start).await {
                Ok(Some(stats)) => flushed.push(stats),
                Ok(None) => {}
                Err(e) => warn!(window_start = start, "Stats flush failed: {}", e),
            }
        }
        flushed
    }

    /// Most recent persisted windows first.
    pub async fn get_recent_stats(&self, limit: u32) -> Result<Vec<ModerationStats>> {
        let limit = limit.clamp(1, MAX_STATS_LIMIT);
        with_timeout(self.timeout, "stats list", self.repo.recent_stats(limit)).await
    }
}

/// Background task that writes closed windows on an interval.
pub async fn run_flush_loop(stats: Arc<StatsAggregator>, every: Duration) {
    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;

        let flushed = stats.flush_closed_windows(Utc::now()).await;
        if !flushed.is_empty() {
            info!("Stats: flushed {} closed windows", flushed.len());
        }
    }
}

fn unix(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| ModerationError::Internal(format!("window start {} out of range", secs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use warden_db::Database;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn verdict(action: Action) -> Verdict {
        Verdict {
            action,
            ..Verdict::allow()
        }
    }

    fn aggregator() -> StatsAggregator {
        let db = Arc::new(Database::open_in_memory().unwrap());
        StatsAggregator::new(Arc::new(SqliteStore::new(db)), 3600, Duration::from_secs(5))
    }

    #[test]
    fn timestamps_truncate_to_window() {
        let stats = aggregator();
        assert_eq!(stats.window_start(at(7199)), 3600);
        assert_eq!(stats.window_start(at(7200)), 7200);
    }

    #[tokio::test]
    async fn flush_writes_once_and_clears() {
        let stats = aggregator();
        stats.record_verdict(&verdict(Action::Allow), at(10));
        stats.record_verdict(&verdict(Action::Allow), at(20));
        stats.record_verdict(&verdict(Action::Block), at(30));

        let row = stats.flush_window(0).await.unwrap().unwrap();
        assert_eq!(row.counts.allow, 2);
        assert_eq!(row.counts.block, 1);
        assert_eq!(row.total_evaluated, 3);
        assert_eq!(stats.open_counts(0), ActionCounts::default());

        // A late verdict for the same window does not rewrite the row.
        stats.record_verdict(&verdict(Action::Flag), at(40));
        assert!(stats.flush_window(0).await.unwrap().is_none());

        let persisted = stats.get_recent_stats(10).await.unwrap();
        assert_eq!(persisted, vec![row]);
    }

    #[tokio::test]
    async fn only_closed_windows_flush() {
        let stats = aggregator();
        stats.record_verdict(&verdict(Action::Queue), at(100));
        stats.record_verdict(&verdict(Action::Queue), at(3700));

        let flushed = stats.flush_closed_windows(at(3700)).await;
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].window_start, at(0));
        assert_eq!(stats.open_counts(3600).queue, 1);
    }

    #[tokio::test]
    async fn flush_all_includes_the_open_window() {
        let stats = aggregator();
        stats.record_verdict(&verdict(Action::Allow), at(100));
        stats.record_verdict(&verdict(Action::Block), at(3700));

        let flushed = stats.flush_all().await;
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[1].window_start, at(3600));
        assert_eq!(flushed[1].counts.block, 1);
        assert_eq!(stats.open_counts(3600), ActionCounts::default());
        assert_eq!(stats.get_recent_stats(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_records_are_all_counted() {
        let stats = Arc::new(aggregator());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let stats = stats.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..250 {
                    stats.record_verdict(&verdict(Action::Flag), at(5));
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(stats.open_counts(0).flag, 2000);
    }

    struct FlakyRepo {
        fail: AtomicBool,
        inner: SqliteStore,
    }

    #[async_trait]
    impl StatsRepository for FlakyRepo {
        async fn insert_stats(&self, stats: &ModerationStats) -> Result<bool> {
            if self.fail.swap(false, Ordering::SeqCst) {
                return Err(ModerationError::Transient("disk full".into()));
            }
            self.inner.insert_stats(stats).await
        }

        async fn recent_stats(&self, limit: u32) -> Result<Vec<ModerationStats>> {
            self.inner.recent_stats(limit).await
        }
    }

    #[tokio::test]
    async fn failed_flush_keeps_counts() {
        let repo = FlakyRepo {
            fail: AtomicBool::new(true),
            inner: SqliteStore::new(Arc::new(Database::open_in_memory().unwrap())),
        };
        let stats = StatsAggregator::new(Arc::new(repo), 3600, Duration::from_secs(5));
        stats.record_verdict(&verdict(Action::Block), at(1));

        assert!(stats.flush_window(0).await.is_err());
        assert_eq!(stats.open_counts(0).block, 1);

        let row = stats.flush_window(0).await.unwrap().unwrap();
        assert_eq!(row.counts.block, 1);
    }
}
