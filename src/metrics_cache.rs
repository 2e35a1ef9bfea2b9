//! Incremental day-indexed cache of daily health metrics
//!
//! This module owns the local time series the dashboard reads from. Merges
//! replace whole-day records; range reads are pure, synchronous aggregations
//! recomputed on every call.

use crate::models::{DailyMetricsRecord, MetricsAggregate};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// ---------------------------------------------------------------------------
/// Configuration
/// ---------------------------------------------------------------------------

/// Cache is considered stale once the last fetch is older than this
const STALE_AFTER_MINUTES: i64 = 60;

/// ---------------------------------------------------------------------------
/// Metrics Cache
/// ---------------------------------------------------------------------------

/// Mapping from calendar day to its metrics record, plus the freshness
/// timestamp of the last successful fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsCache {
  records: HashMap<NaiveDate, DailyMetricsRecord>,
  last_fetched_at: Option<DateTime<Utc>>,
}

impl MetricsCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Rebuild a cache from persisted state
  pub fn from_parts(
    records: Vec<DailyMetricsRecord>,
    last_fetched_at: Option<DateTime<Utc>>,
  ) -> Self {
    Self {
      records: records.into_iter().map(|r| (r.date, r)).collect(),
      last_fetched_at,
    }
  }

  /// Upsert each record by date key and advance the freshness timestamp.
  ///
  /// The timestamp advances unconditionally: an empty successful fetch
  /// still counts as a fetch. Days outside the merged set are never
  /// touched or removed, so merging the same fetch twice is idempotent
  /// and a later fetch wins on overlap.
  pub fn merge(&mut self, records: Vec<DailyMetricsRecord>, fetched_at: DateTime<Utc>) {
    for record in records {
      self.records.insert(record.date, record);
    }
    self.last_fetched_at = Some(fetched_at);
  }

  /// Aggregate all records in the half-open interval [start, end).
  ///
  /// Pure and synchronous; returns a zero-valued aggregate when nothing
  /// falls in range.
  pub fn filter(&self, start: NaiveDate, end: NaiveDate) -> MetricsAggregate {
    let mut agg = MetricsAggregate::default();

    let mut hr_sum = 0.0;
    let mut hr_days = 0usize;
    let mut oxygen_sum = 0.0;
    let mut oxygen_days = 0usize;
    let mut latest_fitness_date: Option<NaiveDate> = None;

    for record in self.records.values() {
      if record.date < start || record.date >= end {
        continue;
      }

      agg.day_count += 1;
      agg.total_steps += record.steps;
      agg.total_distance_km += record.distance_km;
      agg.active_calories += record.active_calories;
      agg.total_calories += record.total_calories;
      agg.total_sleep_hours += record.sleep_hours;
      agg.workout_count += record.workouts.len();

      if let Some(hr) = record.avg_heart_rate {
        hr_sum += hr;
        hr_days += 1;
      }
      if let Some(oxygen) = record.blood_oxygen_pct {
        oxygen_sum += oxygen;
        oxygen_days += 1;
      }
      if let Some(fitness) = record.cardio_fitness {
        if latest_fitness_date.map_or(true, |d| record.date > d) {
          latest_fitness_date = Some(record.date);
          agg.latest_cardio_fitness = Some(fitness);
        }
      }
    }

    if hr_days > 0 {
      agg.avg_heart_rate = Some(hr_sum / hr_days as f64);
    }
    if oxygen_days > 0 {
      agg.avg_blood_oxygen_pct = Some(oxygen_sum / oxygen_days as f64);
    }
    if agg.day_count > 0 {
      agg.avg_sleep_hours = Some(agg.total_sleep_hours / agg.day_count as f64);
    }

    agg
  }

  /// Sole staleness signal driving the sync policy
  pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
    match self.last_fetched_at {
      None => true,
      Some(fetched) => now - fetched > Duration::minutes(STALE_AFTER_MINUTES),
    }
  }

  /// Whether the cache has ever been populated by a sync
  pub fn is_loaded(&self) -> bool {
    self.last_fetched_at.is_some()
  }

  pub fn last_fetched_at(&self) -> Option<DateTime<Utc>> {
    self.last_fetched_at
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  pub fn get(&self, date: NaiveDate) -> Option<&DailyMetricsRecord> {
    self.records.get(&date)
  }

  /// All records, unordered; used by the persistence layer
  pub fn records(&self) -> impl Iterator<Item = &DailyMetricsRecord> {
    self.records.values()
  }

  /// Records in [start, end), sorted by date; input to the pattern analysis
  pub fn records_in_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<DailyMetricsRecord> {
    let mut days: Vec<DailyMetricsRecord> = self
      .records
      .values()
      .filter(|r| r.date >= start && r.date < end)
      .cloned()
      .collect();
    days.sort_by_key(|r| r.date);
    days
  }
}

/// ---------------------------------------------------------------------------
/// Shared Cache (single-writer merges, snapshot reads)
/// ---------------------------------------------------------------------------

/// Thread-safe wrapper with copy-on-write snapshots.
///
/// Readers clone an `Arc` out and aggregate against an immutable snapshot,
/// so a concurrent merge can never expose a half-applied fetch. Merges
/// build the next snapshot and swap it in; the sync engine guarantees only
/// one merge is in flight at a time.
#[derive(Debug, Default)]
pub struct SharedMetricsCache {
  inner: RwLock<Arc<MetricsCache>>,
}

impl SharedMetricsCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Replace the whole cache, e.g. when loading persisted state at startup
  pub fn load(&self, cache: MetricsCache) {
    *self.inner.write() = Arc::new(cache);
  }

  /// Immutable snapshot for lock-free reads
  pub fn snapshot(&self) -> Arc<MetricsCache> {
    self.inner.read().clone()
  }

  pub fn merge(&self, records: Vec<DailyMetricsRecord>, fetched_at: DateTime<Utc>) {
    let mut guard = self.inner.write();
    let mut next = MetricsCache::clone(&guard);
    next.merge(records, fetched_at);
    *guard = Arc::new(next);
  }

  pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
    self.inner.read().needs_refresh(now)
  }

  pub fn is_loaded(&self) -> bool {
    self.inner.read().is_loaded()
  }

  pub fn last_fetched_at(&self) -> Option<DateTime<Utc>> {
    self.inner.read().last_fetched_at()
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
