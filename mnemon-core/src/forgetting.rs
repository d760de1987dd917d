//! Decay-based forgetting.
//!
//! A sweep walks the active records page by page. Each record that has not
//! been touched for the staleness threshold loses a fraction of its salience;
//! once salience drops below the eviction floor the record is archived.
//! Every record is decayed in its own atomic update, so a sweep never blocks
//! live reads and writes for longer than one record, and a cancelled sweep
//! leaves all committed progress valid.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, instrument};

use crate::clock::SharedClock;
use crate::config::MemoryConfig;
use crate::error::{ensure_unit_interval, Error, Result};
use crate::memory::{MemoryFilter, MemoryRecord, MemoryStatus, SqliteMemoryStore};

/// Outcome of a decay sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecayReport {
    /// Stale active records whose salience was (or would be) reduced
    pub memories_decayed: u64,
    /// Of those, records that fell below the eviction floor
    pub memories_archived: u64,
    /// Active records examined
    pub records_scanned: u64,
    pub dry_run: bool,
    /// The sweep stopped early on a cancellation request
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

enum DecayOutcome {
    Skipped,
    Decayed,
    Archived,
}

/// Reduces salience of stale records and archives the faded ones.
#[derive(Debug)]
pub struct ForgettingEngine {
    store: SqliteMemoryStore,
    clock: SharedClock,
    staleness: chrono::Duration,
    eviction_floor: f64,
    batch_size: usize,
    interval: std::time::Duration,
    scheduled_decay_factor: f64,
}

impl ForgettingEngine {
    pub fn new(store: SqliteMemoryStore, clock: SharedClock, config: &MemoryConfig) -> Self {
        Self {
            store,
            clock,
            staleness: chrono::Duration::milliseconds(
                (config.staleness_threshold_hours * 3_600_000.0) as i64,
            ),
            eviction_floor: config.eviction_floor,
            batch_size: config.sweep_batch_size.max(1),
            interval: std::time::Duration::from_secs(config.sweep_interval_secs.max(1)),
            scheduled_decay_factor: config.default_decay_factor,
        }
    }

    /// Override the period of scheduled sweeps.
    pub fn with_interval(mut self, interval: std::time::Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run a full sweep.
    pub fn apply_decay(&self, decay_factor: f64, dry_run: bool) -> Result<DecayReport> {
        self.apply_decay_with_cancel(decay_factor, dry_run, &AtomicBool::new(false))
    }

    /// Run a sweep that stops between records once `cancel` is set.
    #[instrument(skip(self, cancel))]
    pub fn apply_decay_with_cancel(
        &self,
        decay_factor: f64,
        dry_run: bool,
        cancel: &AtomicBool,
    ) -> Result<DecayReport> {
        ensure_unit_interval("decay_factor", decay_factor)?;

        let start = Instant::now();
        let now = self.clock.now();
        let mut report = DecayReport {
            dry_run,
            ..DecayReport::default()
        };

        let filter = MemoryFilter::active();
        for record in self.store.scan(&filter).page_size(self.batch_size) {
            if cancel.load(Ordering::Relaxed) {
                report.cancelled = true;
                break;
            }
            let record = record?;
            report.records_scanned += 1;

            if !self.is_stale(&record, now) {
                continue;
            }

            let outcome = if dry_run {
                self.preview(&record, decay_factor)
            } else {
                match self.decay_one(&record, decay_factor, now) {
                    Ok(outcome) => outcome,
                    // removed while the sweep was running
                    Err(Error::NotFound { .. }) => DecayOutcome::Skipped,
                    Err(e) => return Err(e),
                }
            };

            match outcome {
                DecayOutcome::Skipped => {}
                DecayOutcome::Decayed => report.memories_decayed += 1,
                DecayOutcome::Archived => {
                    report.memories_decayed += 1;
                    report.memories_archived += 1;
                }
            }
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            decayed = report.memories_decayed,
            archived = report.memories_archived,
            scanned = report.records_scanned,
            dry_run = report.dry_run,
            cancelled = report.cancelled,
            "Decay sweep complete in {}ms",
            report.elapsed_ms
        );
        Ok(report)
    }

    fn is_stale(&self, record: &MemoryRecord, now: DateTime<Utc>) -> bool {
        now - record.recency_anchor() >= self.staleness
    }

    fn preview(&self, record: &MemoryRecord, decay_factor: f64) -> DecayOutcome {
        if decayed_salience(record.salience, decay_factor) < self.eviction_floor {
            DecayOutcome::Archived
        } else {
            DecayOutcome::Decayed
        }
    }

    /// Decay one record against its committed value.
    ///
    /// The mutator re-checks status and staleness, since a recall or another
    /// sweep may have touched the record after the scan page was read.
    fn decay_one(
        &self,
        record: &MemoryRecord,
        decay_factor: f64,
        now: DateTime<Utc>,
    ) -> Result<DecayOutcome> {
        let mut outcome = DecayOutcome::Skipped;
        self.store.update(&record.id, |current| {
            if current.is_archived() || !self.is_stale(current, now) {
                return;
            }
            current.salience = decayed_salience(current.salience, decay_factor);
            if current.salience < self.eviction_floor {
                current.status = MemoryStatus::Archived;
                current.archived_at = Some(now);
                outcome = DecayOutcome::Archived;
            } else {
                outcome = DecayOutcome::Decayed;
            }
        })?;

        if matches!(outcome, DecayOutcome::Archived) {
            debug!(memory_id = %record.id, "Archived memory");
        }
        Ok(outcome)
    }
}

fn decayed_salience(salience: f64, decay_factor: f64) -> f64 {
    (salience * (1.0 - decay_factor)).clamp(0.0, 1.0)
}

// ==================== Scheduled Sweeps ====================

#[cfg(feature = "tokio-runtime")]
mod scheduled {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::watch;
    use tokio::task::JoinHandle;
    use tokio::time::MissedTickBehavior;
    use tracing::warn;

    impl ForgettingEngine {
        /// Run a sweep every interval until `shutdown` flips to `true` or its
        /// sender is dropped.
        ///
        /// The first sweep runs one interval after spawning. A sweep in
        /// progress at shutdown is cancelled between records.
        pub fn spawn_scheduled(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(self.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticker.tick().await;

                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    tokio::select! {
                        _ = ticker.tick() => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                            continue;
                        }
                    }

                    let cancel = Arc::new(AtomicBool::new(false));
                    let engine = Arc::clone(&self);
                    let flag = Arc::clone(&cancel);
                    let factor = self.scheduled_decay_factor;
                    let mut sweep = tokio::task::spawn_blocking(move || {
                        engine.apply_decay_with_cancel(factor, false, &flag)
                    });

                    let (result, stop) = tokio::select! {
                        result = &mut sweep => (result, false),
                        _ = shutdown.changed() => {
                            cancel.store(true, Ordering::Relaxed);
                            (sweep.await, true)
                        }
                    };

                    match result {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!(error = %e, "Scheduled decay sweep failed"),
                        Err(e) => warn!(error = %e, "Scheduled decay sweep panicked"),
                    }
                    if stop {
                        break;
                    }
                }

                debug!("Scheduled decay sweeps stopped");
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::RecallWeights;
    use crate::retrieval::RetrievalEngine;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    struct Fixture {
        store: SqliteMemoryStore,
        clock: ManualClock,
        engine: ForgettingEngine,
    }

    fn fixture(config: MemoryConfig) -> Fixture {
        let store = SqliteMemoryStore::in_memory().unwrap();
        let clock = ManualClock::starting_now();
        let engine = ForgettingEngine::new(store.clone(), Arc::new(clock.clone()), &config);
        Fixture {
            store,
            clock,
            engine,
        }
    }

    fn put(fx: &Fixture, importance: f64) -> crate::memory::MemoryId {
        fx.store
            .put(&MemoryRecord::new("fact", "decaying thought", importance, fx.clock.now()))
            .unwrap()
    }

    #[test]
    fn test_dry_run_leaves_salience_unchanged() {
        let fx = fixture(MemoryConfig::default());
        let id = put(&fx, 0.5);
        fx.clock.advance_hours(48);

        let report = fx.engine.apply_decay(0.5, true).unwrap();
        assert_eq!(report.memories_decayed, 1);
        assert!(report.dry_run);

        let record = fx.store.get(&id).unwrap();
        assert_eq!(record.salience, 0.5);
        assert_eq!(record.status, MemoryStatus::Active);
    }

    #[test]
    fn test_dry_run_predicts_real_sweep() {
        let fx = fixture(MemoryConfig::default().with_eviction_floor(0.2));
        put(&fx, 0.9);
        put(&fx, 0.3);
        put(&fx, 0.1);
        fx.clock.advance_hours(30);

        let preview = fx.engine.apply_decay(0.5, true).unwrap();
        let real = fx.engine.apply_decay(0.5, false).unwrap();
        assert_eq!(preview.memories_decayed, real.memories_decayed);
        assert_eq!(preview.memories_archived, real.memories_archived);
        assert_eq!(real.memories_archived, 2);
    }

    #[test]
    fn test_full_decay_archives_but_keeps_record() {
        let fx = fixture(MemoryConfig::default());
        let id = put(&fx, 0.5);
        fx.clock.advance_hours(25);

        let report = fx.engine.apply_decay(1.0, false).unwrap();
        assert_eq!(report.memories_decayed, 1);
        assert_eq!(report.memories_archived, 1);

        let record = fx.store.get(&id).unwrap();
        assert_eq!(record.salience, 0.0);
        assert_eq!(record.status, MemoryStatus::Archived);
        assert_eq!(record.archived_at, Some(fx.clock.now()));

        let retrieval = RetrievalEngine::new(
            fx.store.clone(),
            Arc::new(fx.clock.clone()),
            &MemoryConfig::default(),
        );
        let recalled = retrieval
            .recall_weighted("decaying thought", RecallWeights::default(), 10)
            .unwrap();
        assert!(recalled.is_empty());
    }

    #[test]
    fn test_fresh_records_are_not_decayed() {
        let fx = fixture(MemoryConfig::default());
        let stale = put(&fx, 0.8);
        fx.clock.advance_hours(30);
        let fresh = put(&fx, 0.8);

        let report = fx.engine.apply_decay(0.25, false).unwrap();
        assert_eq!(report.records_scanned, 2);
        assert_eq!(report.memories_decayed, 1);
        assert!((fx.store.get(&stale).unwrap().salience - 0.6).abs() < 1e-12);
        assert_eq!(fx.store.get(&fresh).unwrap().salience, 0.8);
    }

    #[test]
    fn test_recent_access_resets_staleness() {
        let fx = fixture(MemoryConfig::default());
        let id = put(&fx, 0.8);
        fx.clock.advance_hours(30);
        fx.store.record_access(&id, fx.clock.now()).unwrap();
        fx.clock.advance_hours(1);

        let report = fx.engine.apply_decay(0.5, false).unwrap();
        assert_eq!(report.memories_decayed, 0);
        assert_eq!(fx.store.get(&id).unwrap().salience, 0.8);
    }

    #[test]
    fn test_archived_records_are_not_rescanned() {
        let fx = fixture(MemoryConfig::default());
        put(&fx, 0.5);
        fx.clock.advance_hours(48);

        fx.engine.apply_decay(1.0, false).unwrap();
        let second = fx.engine.apply_decay(1.0, false).unwrap();
        assert_eq!(second.records_scanned, 0);
        assert_eq!(second.memories_archived, 0);
    }

    #[test]
    fn test_invalid_decay_factor_rejected_before_mutation() {
        let fx = fixture(MemoryConfig::default());
        let id = put(&fx, 0.5);
        fx.clock.advance_hours(48);

        for factor in [-0.1, 1.5, f64::NAN] {
            let err = fx.engine.apply_decay(factor, false).unwrap_err();
            assert!(err.is_validation());
        }
        assert_eq!(fx.store.get(&id).unwrap().salience, 0.5);
    }

    #[test]
    fn test_sweep_pages_through_many_records() {
        let mut config = MemoryConfig::default();
        config.sweep_batch_size = 3;
        let fx = fixture(config);
        for _ in 0..10 {
            put(&fx, 0.5);
        }
        fx.clock.advance_hours(48);

        let report = fx.engine.apply_decay(0.1, false).unwrap();
        assert_eq!(report.records_scanned, 10);
        assert_eq!(report.memories_decayed, 10);
    }

    #[test]
    fn test_cancelled_sweep_stops_early() {
        let fx = fixture(MemoryConfig::default());
        let id = put(&fx, 0.5);
        fx.clock.advance_hours(48);

        let cancel = AtomicBool::new(true);
        let report = fx
            .engine
            .apply_decay_with_cancel(0.5, false, &cancel)
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.records_scanned, 0);
        assert_eq!(fx.store.get(&id).unwrap().salience, 0.5);
    }

    #[test]
    fn test_empty_store_sweep() {
        let fx = fixture(MemoryConfig::default());
        let report = fx.engine.apply_decay(0.5, false).unwrap();
        assert_eq!(
            report,
            DecayReport {
                elapsed_ms: report.elapsed_ms,
                ..DecayReport::default()
            }
        );
    }

    #[cfg(feature = "tokio-runtime")]
    #[tokio::test]
    async fn test_scheduled_sweep_runs_and_stops() {
        use tokio::sync::watch;

        let fx = fixture(MemoryConfig::default());
        let id = put(&fx, 0.5);
        fx.clock.advance_hours(48);

        let engine = Arc::new(
            ForgettingEngine::new(
                fx.store.clone(),
                Arc::new(fx.clock.clone()),
                &MemoryConfig::default(),
            )
            .with_interval(std::time::Duration::from_millis(10)),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = engine.spawn_scheduled(shutdown_rx);

        let mut decayed = false;
        for _ in 0..200 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if fx.store.get(&id).unwrap().salience < 0.5 {
                decayed = true;
                break;
            }
        }
        assert!(decayed);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[cfg(feature = "tokio-runtime")]
    #[tokio::test]
    async fn test_dropping_shutdown_sender_stops_schedule() {
        let fx = fixture(MemoryConfig::default());
        let engine = Arc::new(
            ForgettingEngine::new(
                fx.store.clone(),
                Arc::new(fx.clock.clone()),
                &MemoryConfig::default(),
            )
            .with_interval(std::time::Duration::from_secs(3600)),
        );
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let handle = engine.spawn_scheduled(shutdown_rx);
        drop(shutdown_tx);

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
