//! Background channel health checks.
//!
//! A run reuses every fresh verdict from the [`HealthStore`], then probes the
//! remaining channels in sequential batches. Probes inside a batch run
//! concurrently and all of them settle before the batch is recorded, persisted
//! and published. A stop token is honoured between batches; a batch that
//! settles after the stop is discarded unsaved.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::models::{Channel, HealthRecord, HealthUpdate};
use crate::services::health_store::HealthStore;
use crate::services::metrics;
use crate::services::prober::Prober;

pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Buffered updates per subscriber before it starts lagging
const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Outcome of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: String,
    pub total: usize,
    pub reused: usize,
    pub probed: usize,
    pub healthy: usize,
    pub stopped: bool,
}

pub struct HealthChecker {
    store: HealthStore,
    prober: Arc<dyn Prober>,
    batch_delay: Duration,
    updates: broadcast::Sender<HealthUpdate>,
}

impl HealthChecker {
    pub fn new(store: HealthStore, prober: Arc<dyn Prober>, batch_delay: Duration) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            store,
            prober,
            batch_delay,
            updates,
        }
    }

    pub fn store(&self) -> &HealthStore {
        &self.store
    }

    /// Live updates of every run started after subscribing
    pub fn subscribe(&self) -> broadcast::Receiver<HealthUpdate> {
        self.updates.subscribe()
    }

    /// Check `channels`, calling `on_update` with the cumulative healthy ids
    /// once up front and once after every completed batch.
    pub async fn check_batch<F>(
        &self,
        channels: &[Channel],
        on_update: F,
        batch_size: usize,
        stop: &CancellationToken,
    ) -> RunSummary
    where
        F: FnMut(&HashSet<String>),
    {
        let run_id = uuid::Uuid::new_v4().to_string();
        self.run(&run_id, channels, on_update, batch_size, stop).await
    }

    /// [`check_batch`](Self::check_batch) under a caller-chosen run id
    pub async fn run<F>(
        &self,
        run_id: &str,
        channels: &[Channel],
        mut on_update: F,
        batch_size: usize,
        stop: &CancellationToken,
    ) -> RunSummary
    where
        F: FnMut(&HashSet<String>),
    {
        let batch_size = batch_size.max(1);
        let mut summary = RunSummary {
            run_id: run_id.to_string(),
            ..Default::default()
        };

        let mut records = self.store.load().await;
        let now = self.store.now_ms();
        let mut healthy_ids: HashSet<String> = HashSet::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut to_check: Vec<Channel> = Vec::new();

        for channel in channels {
            if !seen.insert(channel.id.as_str()) {
                continue;
            }
            match self.store.fresh(&records, &channel.id, now) {
                Some(record) => {
                    summary.reused += 1;
                    if record.healthy {
                        healthy_ids.insert(channel.id.clone());
                    }
                }
                None => to_check.push(channel.clone()),
            }
        }

        summary.total = summary.reused + to_check.len();
        let batch_count = to_check.len().div_ceil(batch_size);

        tracing::info!(
            run_id = %summary.run_id,
            total = summary.total,
            reused = summary.reused,
            to_check = to_check.len(),
            batches = batch_count,
            "health run started"
        );

        on_update(&healthy_ids);
        self.publish(&summary.run_id, &healthy_ids, summary.reused, summary.total, batch_count == 0);

        for (idx, batch) in to_check.chunks(batch_size).enumerate() {
            if stop.is_cancelled() {
                summary.stopped = true;
                break;
            }

            let verdicts = self.probe_batch(batch).await;

            // A stop during the batch (e.g. a data reset) must not write back
            // the records snapshot taken when the run started
            if stop.is_cancelled() {
                summary.stopped = true;
                break;
            }

            let checked_at = self.store.now_ms();

            for (channel, healthy) in batch.iter().zip(verdicts) {
                records.insert(channel.id.clone(), HealthRecord { healthy, checked_at });
                if healthy {
                    healthy_ids.insert(channel.id.clone());
                }
            }
            summary.probed += batch.len();

            self.store.save(&records).await;

            let last = idx + 1 == batch_count;
            on_update(&healthy_ids);
            self.publish(
                &summary.run_id,
                &healthy_ids,
                summary.reused + summary.probed,
                summary.total,
                last,
            );

            if !last && !self.batch_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.batch_delay) => {}
                    _ = stop.cancelled() => {}
                }
            }
        }

        summary.healthy = healthy_ids.len();

        if summary.stopped {
            tracing::info!(run_id = %summary.run_id, probed = summary.probed, "health run stopped");
            self.publish(
                &summary.run_id,
                &healthy_ids,
                summary.reused + summary.probed,
                summary.total,
                true,
            );
        } else {
            tracing::info!(
                run_id = %summary.run_id,
                probed = summary.probed,
                healthy = summary.healthy,
                "health run complete"
            );
        }

        summary
    }

    /// Probe one batch concurrently; a failed probe task counts as unhealthy
    async fn probe_batch(&self, batch: &[Channel]) -> Vec<bool> {
        let handles = batch.iter().cloned().map(|channel| {
            let prober = Arc::clone(&self.prober);
            tokio::spawn(async move { prober.probe(&channel).await })
        });

        join_all(handles)
            .await
            .into_iter()
            .zip(batch)
            .map(|(result, channel)| match result {
                Ok(healthy) => healthy,
                Err(e) => {
                    tracing::warn!(channel_id = %channel.id, error = %e, "probe task failed");
                    false
                }
            })
            .collect()
    }

    fn publish(
        &self,
        run_id: &str,
        healthy_ids: &HashSet<String>,
        resolved: usize,
        total: usize,
        done: bool,
    ) {
        metrics::set_healthy_channels(healthy_ids.len());

        let mut ids: Vec<String> = healthy_ids.iter().cloned().collect();
        ids.sort();

        // Err only means nobody is subscribed
        let _ = self.updates.send(HealthUpdate {
            run_id: run_id.to_string(),
            healthy_ids: ids,
            resolved,
            total,
            done,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HealthRecords;
    use crate::services::clock::ManualClock;
    use crate::services::health_store::{HealthPolicy, HEALTH_KEY};
    use crate::services::storage::{KvBackend, MemoryBackend};
    use async_trait::async_trait;
    use std::sync::Mutex;

    const HOUR: i64 = 60 * 60 * 1000;
    const NOW: i64 = 100 * HOUR;

    /// Even-numbered channels are healthy; `panic_on` blows up its probe task
    #[derive(Default)]
    struct FakeProber {
        calls: Mutex<Vec<String>>,
        panic_on: Option<String>,
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, channel: &Channel) -> bool {
            self.calls.lock().unwrap().push(channel.id.clone());
            if self.panic_on.as_deref() == Some(channel.id.as_str()) {
                panic!("probe exploded");
            }
            let n: usize = channel.id.trim_start_matches("ch").parse().unwrap();
            n % 2 == 0
        }
    }

    fn channels(count: usize) -> Vec<Channel> {
        (0..count)
            .map(|i| Channel {
                id: format!("ch{}", i),
                name: format!("Channel {}", i),
                url: format!("http://streams.example/{}.m3u8", i),
                logo: String::new(),
                group: "General".to_string(),
                language: String::new(),
                country: String::new(),
            })
            .collect()
    }

    /// Every channel is healthy, after a fixed delay
    struct SlowProber(Duration);

    #[async_trait]
    impl Prober for SlowProber {
        async fn probe(&self, _channel: &Channel) -> bool {
            tokio::time::sleep(self.0).await;
            true
        }
    }

    fn checker_on(
        backend: Arc<MemoryBackend>,
        prober: Arc<dyn Prober>,
        delay: Duration,
    ) -> (HealthChecker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(NOW));
        let store = HealthStore::new(backend, clock.clone(), 2 * HOUR, HealthPolicy::Optimistic);
        (HealthChecker::new(store, prober, delay), clock)
    }

    fn checker(prober: Arc<FakeProber>) -> (HealthChecker, Arc<ManualClock>) {
        checker_on(Arc::new(MemoryBackend::new()), prober, Duration::ZERO)
    }

    fn expected_even(count: usize) -> HashSet<String> {
        (0..count).filter(|i| i % 2 == 0).map(|i| format!("ch{}", i)).collect()
    }

    #[tokio::test]
    async fn test_batch_completeness() {
        let prober = Arc::new(FakeProber::default());
        let (checker, _) = checker(prober.clone());
        let stop = CancellationToken::new();

        let mut updates: Vec<HashSet<String>> = Vec::new();
        let summary = checker
            .check_batch(&channels(25), |ids| updates.push(ids.clone()), DEFAULT_BATCH_SIZE, &stop)
            .await;

        // ceil(25/10) + 1
        assert_eq!(updates.len(), 4);
        assert!(updates[0].is_empty());
        assert_eq!(updates[1].len(), 5);
        assert_eq!(updates.last().unwrap(), &expected_even(25));

        let calls = prober.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 25);
        assert_eq!(calls.iter().collect::<HashSet<_>>().len(), 25);

        assert_eq!(summary.probed, 25);
        assert_eq!(summary.healthy, 13);
        assert!(!summary.stopped);
    }

    #[tokio::test]
    async fn test_fresh_records_are_reused() {
        let prober = Arc::new(FakeProber::default());
        let (checker, _) = checker(prober.clone());

        let mut records = HealthRecords::new();
        // ch1 is odd (unhealthy to the prober) but has a fresh healthy verdict
        records.insert("ch1".to_string(), HealthRecord { healthy: true, checked_at: NOW - HOUR });
        records.insert("ch2".to_string(), HealthRecord { healthy: false, checked_at: NOW - HOUR });
        // stale: must be re-probed
        records.insert("ch4".to_string(), HealthRecord { healthy: false, checked_at: NOW - 3 * HOUR });
        checker.store().save(&records).await;

        let mut updates: Vec<HashSet<String>> = Vec::new();
        let summary = checker
            .check_batch(&channels(6), |ids| updates.push(ids.clone()), 10, &CancellationToken::new())
            .await;

        assert_eq!(updates[0], HashSet::from(["ch1".to_string()]));
        let probed: HashSet<String> = prober.calls.lock().unwrap().iter().cloned().collect();
        let expected_probed: HashSet<String> =
            ["ch0", "ch3", "ch4", "ch5"].iter().map(|s| s.to_string()).collect();
        assert_eq!(probed, expected_probed);

        let expected_final: HashSet<String> =
            ["ch0", "ch1", "ch4"].iter().map(|s| s.to_string()).collect();
        assert_eq!(updates.last().unwrap(), &expected_final);
        assert_eq!(summary.reused, 2);
    }

    #[tokio::test]
    async fn test_outcomes_are_persisted_with_timestamp() {
        let prober = Arc::new(FakeProber::default());
        let (checker, clock) = checker(prober);
        clock.set(NOW + 42);

        checker
            .check_batch(&channels(3), |_| {}, 10, &CancellationToken::new())
            .await;

        let records = checker.store().load().await;
        assert_eq!(records.len(), 3);
        assert_eq!(records["ch0"], HealthRecord { healthy: true, checked_at: NOW + 42 });
        assert_eq!(records["ch1"], HealthRecord { healthy: false, checked_at: NOW + 42 });
    }

    #[tokio::test]
    async fn test_failed_probe_does_not_abort_batch() {
        let prober = Arc::new(FakeProber {
            panic_on: Some("ch2".to_string()),
            ..Default::default()
        });
        let (checker, _) = checker(prober.clone());

        let mut last = HashSet::new();
        checker
            .check_batch(&channels(5), |ids| last = ids.clone(), 10, &CancellationToken::new())
            .await;

        let expected: HashSet<String> = ["ch0", "ch4"].iter().map(|s| s.to_string()).collect();
        assert_eq!(last, expected);
        let records = checker.store().load().await;
        assert!(!records["ch2"].healthy);
        assert_eq!(records.len(), 5);
    }

    #[tokio::test]
    async fn test_stop_between_batches() {
        let prober = Arc::new(FakeProber::default());
        let (checker, _) = checker(prober.clone());
        let stop = CancellationToken::new();

        let mut calls = 0;
        let stopper = stop.clone();
        let summary = checker
            .check_batch(
                &channels(30),
                |_| {
                    calls += 1;
                    if calls == 2 {
                        stopper.cancel();
                    }
                },
                10,
                &stop,
            )
            .await;

        assert_eq!(prober.calls.lock().unwrap().len(), 10);
        assert_eq!(calls, 2);
        assert!(summary.stopped);
        assert_eq!(summary.probed, 10);
    }

    #[tokio::test]
    async fn test_duplicate_ids_probed_once() {
        let prober = Arc::new(FakeProber::default());
        let (checker, _) = checker(prober.clone());
        let mut list = channels(3);
        list.extend(channels(3));

        let summary = checker
            .check_batch(&list, |_| {}, 2, &CancellationToken::new())
            .await;

        assert_eq!(prober.calls.lock().unwrap().len(), 3);
        assert_eq!(summary.total, 3);
    }

    #[tokio::test]
    async fn test_subscribers_receive_updates() {
        let prober = Arc::new(FakeProber::default());
        let (checker, _) = checker(prober);
        let mut rx = checker.subscribe();

        let summary = checker
            .check_batch(&channels(12), |_| {}, 5, &CancellationToken::new())
            .await;

        let mut received = Vec::new();
        while let Ok(update) = rx.try_recv() {
            received.push(update);
        }

        // initial + 3 batches
        assert_eq!(received.len(), 4);
        assert!(received.iter().all(|u| u.run_id == summary.run_id));
        assert_eq!(received[0].resolved, 0);
        let last = received.last().unwrap();
        assert!(last.done);
        assert_eq!(last.resolved, 12);
        assert_eq!(last.total, 12);
        assert_eq!(last.healthy_ids.len(), 6);
    }

    #[tokio::test]
    async fn test_empty_input_reports_once() {
        let prober = Arc::new(FakeProber::default());
        let (checker, _) = checker(prober);
        let mut updates = 0;
        checker
            .check_batch(&[], |_| updates += 1, 10, &CancellationToken::new())
            .await;
        assert_eq!(updates, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_batch_leaves_store_untouched() {
        let backend = Arc::new(MemoryBackend::new());
        let (checker, _) = checker_on(
            backend.clone(),
            Arc::new(SlowProber(Duration::from_millis(300))),
            Duration::ZERO,
        );
        let checker = Arc::new(checker);

        let mut seeded = HealthRecords::new();
        seeded.insert("old-channel".to_string(), HealthRecord { healthy: false, checked_at: NOW });
        checker.store().save(&seeded).await;

        let stop = CancellationToken::new();
        let run = tokio::spawn({
            let checker = Arc::clone(&checker);
            let stop = stop.clone();
            async move {
                let mut updates = 0;
                let summary = checker
                    .check_batch(&channels(3), |_| updates += 1, 10, &stop)
                    .await;
                (summary, updates)
            }
        });

        // Reset while the batch is still probing
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.cancel();
        backend.remove(HEALTH_KEY).await.unwrap();

        let (summary, updates) = run.await.unwrap();
        assert_eq!(backend.get(HEALTH_KEY).await.unwrap(), None);
        assert!(summary.stopped);
        assert_eq!(summary.probed, 0);
        // Only the initial report; the discarded batch is never announced
        assert_eq!(updates, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_between_batches_only() {
        let (checker, _) = checker_on(
            Arc::new(MemoryBackend::new()),
            Arc::new(FakeProber::default()),
            Duration::from_millis(200),
        );

        let started = tokio::time::Instant::now();
        let summary = checker
            .check_batch(&channels(25), |_| {}, 10, &CancellationToken::new())
            .await;
        let elapsed = started.elapsed();

        assert_eq!(summary.probed, 25);
        // 3 batches, 2 pauses, none after the last
        assert!(elapsed >= Duration::from_millis(400), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(600), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cuts_pause_short() {
        let prober = Arc::new(FakeProber::default());
        let (checker, _) = checker_on(
            Arc::new(MemoryBackend::new()),
            prober.clone(),
            Duration::from_secs(10),
        );

        let stop = CancellationToken::new();
        let stopper = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            stopper.cancel();
        });

        let started = tokio::time::Instant::now();
        let summary = checker.check_batch(&channels(30), |_| {}, 10, &stop).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(summary.stopped);
        assert_eq!(summary.probed, 10);
        assert_eq!(prober.calls.lock().unwrap().len(), 10);
    }
}
