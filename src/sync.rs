//! Sync policy: when and how much history to (re)fetch from the source
//!
//! Runs on app-foreground and pull-to-refresh, never on range switch. One
//! merge in flight at a time; a concurrent request is dropped. A failed
//! fetch leaves prior cache state untouched.

use crate::db::DbPool;
use crate::insight_cache::InsightResponseCache;
use crate::metrics_cache::SharedMetricsCache;
use crate::source::{HealthSource, SourceError};
use crate::store;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// ---------------------------------------------------------------------------
/// Configuration
/// ---------------------------------------------------------------------------

/// Cap on how far back the very first sync reaches (~2 years)
const FIRST_SYNC_MAX_DAYS: i64 = 730;

/// Minimum spacing between pull-to-refresh fetches
const PULL_REFRESH_COOLDOWN_MINUTES: i64 = 15;

/// ---------------------------------------------------------------------------
/// Errors and Outcomes
/// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SyncError {
  #[error("source error: {0}")]
  Source(#[from] SourceError),

  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
  /// Merge completed; `days` records were fetched
  Completed { days: usize },
  /// Another sync is already in flight; this request was dropped
  AlreadyRunning,
  /// The platform denied read access; nothing was touched
  NotAuthorized,
  /// Pull-to-refresh inside the cooldown window; no fetch performed.
  /// Informational, not an error.
  CooldownActive { wait_minutes: i64 },
  /// Foreground trigger found the cache still fresh
  Skipped,
}

/// ---------------------------------------------------------------------------
/// Fetch Window Policy (pure)
/// ---------------------------------------------------------------------------

/// Decide the date window to fetch, as a half-open [start, end).
///
/// Never-loaded caches fetch at most `FIRST_SYNC_MAX_DAYS` of history;
/// subsequent syncs are incremental from the last fetch point. Both are
/// floored at `earliest_allowed`.
pub fn decide_fetch_window(
  last_fetched_at: Option<DateTime<Utc>>,
  now: DateTime<Utc>,
  earliest_allowed: NaiveDate,
) -> (NaiveDate, NaiveDate) {
  let end = now.date_naive() + Duration::days(1);

  let start = match last_fetched_at {
    None => {
      let cap = (now - Duration::days(FIRST_SYNC_MAX_DAYS)).date_naive();
      earliest_allowed.max(cap)
    }
    Some(fetched) => earliest_allowed.max(fetched.date_naive()),
  };

  (start, end)
}

/// Minutes a pull-to-refresh still has to wait, or None if allowed.
///
/// Negative elapsed time (clock moved backward) fails open.
pub fn cooldown_wait_minutes(
  last_pull_refresh: Option<DateTime<Utc>>,
  now: DateTime<Utc>,
) -> Option<i64> {
  let last = last_pull_refresh?;
  let elapsed = now - last;

  if elapsed < Duration::zero() {
    return None;
  }

  let remaining = Duration::minutes(PULL_REFRESH_COOLDOWN_MINUTES) - elapsed;
  if remaining <= Duration::zero() {
    return None;
  }

  // Ceil to whole minutes, floored at 1
  let secs = remaining.num_seconds();
  Some(((secs + 59) / 60).max(1))
}

/// ---------------------------------------------------------------------------
/// Sync Engine
/// ---------------------------------------------------------------------------

pub struct SyncEngine {
  source: Arc<dyn HealthSource>,
  metrics: Arc<SharedMetricsCache>,
  insights: Arc<InsightResponseCache>,
  pool: Option<DbPool>,
  earliest_allowed: NaiveDate,

  /// Single-writer guard: one merge in flight at a time
  sync_in_flight: AtomicBool,
  authorized: AtomicBool,
  last_pull_refresh: Mutex<Option<DateTime<Utc>>>,
}

impl SyncEngine {
  pub fn new(
    source: Arc<dyn HealthSource>,
    metrics: Arc<SharedMetricsCache>,
    insights: Arc<InsightResponseCache>,
    pool: Option<DbPool>,
    earliest_allowed: NaiveDate,
  ) -> Self {
    Self {
      source,
      metrics,
      insights,
      pool,
      earliest_allowed,
      sync_in_flight: AtomicBool::new(false),
      authorized: AtomicBool::new(false),
      last_pull_refresh: Mutex::new(None),
    }
  }

  /// Load persisted cache contents and sync state at startup
  pub async fn hydrate(&self) -> Result<(), SyncError> {
    let Some(pool) = &self.pool else {
      return Ok(());
    };

    let cache = store::load_metrics_cache(pool).await?;
    self.metrics.load(cache);

    for (bucket, entry) in store::load_insight_entries(pool).await? {
      self.insights.load_entry(bucket, entry);
    }

    let (_, last_pull) = store::load_sync_state(pool).await?;
    *self.last_pull_refresh.lock() = last_pull;

    Ok(())
  }

  /// App-foreground trigger: refetch only if the cache has gone stale
  pub async fn on_foreground(&self, now: DateTime<Utc>) -> Result<SyncOutcome, SyncError> {
    if !self.metrics.needs_refresh(now) {
      return Ok(SyncOutcome::Skipped);
    }
    self.run_sync(now).await
  }

  /// Explicit pull-to-refresh, gated by the cooldown.
  ///
  /// The cooldown timestamp advances when a refresh starts, not when it
  /// completes, so a failed fetch still counts against the cooldown.
  pub async fn pull_to_refresh(&self, now: DateTime<Utc>) -> Result<SyncOutcome, SyncError> {
    let last = *self.last_pull_refresh.lock();
    if let Some(wait_minutes) = cooldown_wait_minutes(last, now) {
      return Ok(SyncOutcome::CooldownActive { wait_minutes });
    }

    *self.last_pull_refresh.lock() = Some(now);
    if let Some(pool) = &self.pool {
      store::set_last_pull_refresh(pool, now).await?;
    }

    self.run_sync(now).await
  }

  /// Fetch the decided window and merge it into the cache
  pub async fn run_sync(&self, now: DateTime<Utc>) -> Result<SyncOutcome, SyncError> {
    if self
      .sync_in_flight
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      return Ok(SyncOutcome::AlreadyRunning);
    }

    let result = self.run_sync_inner(now).await;
    self.sync_in_flight.store(false, Ordering::SeqCst);
    result
  }

  async fn run_sync_inner(&self, now: DateTime<Utc>) -> Result<SyncOutcome, SyncError> {
    if !self.authorized.load(Ordering::SeqCst) {
      if self.source.request_authorization().await {
        self.authorized.store(true, Ordering::SeqCst);
      } else {
        return Ok(SyncOutcome::NotAuthorized);
      }
    }

    let (start, end) = decide_fetch_window(self.metrics.last_fetched_at(), now, self.earliest_allowed);

    // A failed fetch returns here without touching cache state
    let records = self.source.fetch_daily_metrics(start, end).await?;
    let days = records.len();

    self.metrics.merge(records.clone(), now);

    if let Some(pool) = &self.pool {
      store::save_records(pool, &records).await?;
      store::set_last_fetched_at(pool, now).await?;
    }

    // Insights derived from pre-refresh metrics are now outdated
    let cleared = self.insights.invalidate_stale(now);
    if let Some(pool) = &self.pool {
      store::delete_insight_entries(pool, &cleared).await?;
    }

    Ok(SyncOutcome::Completed { days })
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
