//! Range-load orchestration
//!
//! Sequences the synchronous cache reads, the debounced generation pass, and
//! the dedicated recommendation task for each range selection. Selection
//! changes cancel the previous load session cooperatively; sub-results that
//! already finished are still written to the insight cache, only their UI
//! updates are dropped.

use crate::analysis::{BasicInsight, BodyCompositionPrediction, PatternInsights};
use crate::db::DbPool;
use crate::insight_cache::{InsightCacheEntry, InsightResponseCache, SlotValue};
use crate::llm::InsightGenerator;
use crate::metrics_cache::SharedMetricsCache;
use crate::models::{MetricsAggregate, RangeBucket, UserProfile};
use crate::source::HealthSource;
use crate::store;
use crate::sync::{SyncEngine, SyncError, SyncOutcome};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

/// ---------------------------------------------------------------------------
/// Configuration
/// ---------------------------------------------------------------------------

/// Window in which rapid range flips coalesce into one generation pass
const DEBOUNCE_MS: u64 = 150;

/// Total generator attempts per pass (1 initial + 2 retries)
const MAX_GENERATION_ATTEMPTS: usize = 3;

const RETRY_BACKOFF_SECS: u64 = 1;

/// ---------------------------------------------------------------------------
/// Errors
/// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DashboardError {
  /// No profile, or the metrics cache has never been loaded
  #[error("Dashboard not ready: metrics or profile missing")]
  NotReady,

  /// Generated content failed the validity check after all retries
  #[error("Generated insight was invalid")]
  GenerationInvalid { retry_available: bool },

  /// No generator configured; an absent capability, not a failure
  #[error("Insight generation unavailable")]
  GenerationUnavailable,

  /// Superseded by a newer range selection; never surfaced to the UI
  #[error("Load superseded by a newer selection")]
  Cancelled,

  #[error("Refresh available in {wait_minutes} minute(s)")]
  CooldownActive { wait_minutes: i64 },

  #[error("Health data access was denied")]
  NotAuthorized,

  #[error("Sync failed: {0}")]
  Sync(#[from] SyncError),
}

/// ---------------------------------------------------------------------------
/// Cancellation Tokens
/// ---------------------------------------------------------------------------

/// Cooperative cancellation flag, checked at every suspension point
#[derive(Debug, Clone)]
pub struct CancelToken {
  rx: watch::Receiver<bool>,
}

impl CancelToken {
  pub fn is_cancelled(&self) -> bool {
    *self.rx.borrow()
  }
}

#[derive(Debug)]
pub struct CancelHandle {
  tx: watch::Sender<bool>,
}

impl CancelHandle {
  pub fn new() -> (Self, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (Self { tx }, CancelToken { rx })
  }

  pub fn cancel(&self) {
    let _ = self.tx.send(true);
  }
}

/// One range selection's worth of cancellation state. The dedicated
/// recommendation task is tracked separately because its lifetime may
/// outlast the main task.
struct LoadSession {
  cancel: CancelHandle,
}

/// Live recommendation task, keyed by the bucket it computes for. The id
/// lets a finished task clear its own registration without racing a
/// successor that already replaced it.
struct RecTask {
  bucket: RangeBucket,
  id: u64,
  cancel: CancelHandle,
}

/// ---------------------------------------------------------------------------
/// UI Channel
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
  Idle,
  CacheHit { complete: bool },
  Debouncing,
  Generating,
  Settled,
}

/// Updates pushed to the presentation layer. Only ever emitted for the
/// currently selected bucket; results for a deselected bucket are cached
/// silently.
#[derive(Debug, Clone)]
pub enum DashboardUpdate {
  Aggregate {
    bucket: RangeBucket,
    aggregate: MetricsAggregate,
  },
  Entry {
    bucket: RangeBucket,
    entry: InsightCacheEntry,
  },
  Phase {
    bucket: RangeBucket,
    phase: LoadPhase,
  },
  GenerationFailed {
    bucket: RangeBucket,
    retry_available: bool,
  },
  GenerationUnavailable {
    bucket: RangeBucket,
  },
}

/// ---------------------------------------------------------------------------
/// Load Coordinator
/// ---------------------------------------------------------------------------

pub struct LoadCoordinator {
  metrics: Arc<SharedMetricsCache>,
  insights: Arc<InsightResponseCache>,
  source: Arc<dyn HealthSource>,
  generator: Option<Arc<dyn InsightGenerator>>,
  sync: Arc<SyncEngine>,
  pool: Option<DbPool>,
  updates: mpsc::UnboundedSender<DashboardUpdate>,

  profile: RwLock<Option<UserProfile>>,
  selected: Mutex<Option<RangeBucket>>,
  session: Mutex<Option<LoadSession>>,
  rec_task: Mutex<Option<RecTask>>,
  rec_task_seq: AtomicU64,
  unavailable_reported: AtomicBool,
}

impl LoadCoordinator {
  pub fn new(
    metrics: Arc<SharedMetricsCache>,
    insights: Arc<InsightResponseCache>,
    source: Arc<dyn HealthSource>,
    generator: Option<Arc<dyn InsightGenerator>>,
    sync: Arc<SyncEngine>,
    pool: Option<DbPool>,
  ) -> (Arc<Self>, mpsc::UnboundedReceiver<DashboardUpdate>) {
    let (tx, rx) = mpsc::unbounded_channel();

    let coordinator = Arc::new(Self {
      metrics,
      insights,
      source,
      generator,
      sync,
      pool,
      updates: tx,
      profile: RwLock::new(None),
      selected: Mutex::new(None),
      session: Mutex::new(None),
      rec_task: Mutex::new(None),
      rec_task_seq: AtomicU64::new(0),
      unavailable_reported: AtomicBool::new(false),
    });

    (coordinator, rx)
  }

  pub fn set_profile(&self, profile: UserProfile) {
    *self.profile.write() = Some(profile);
  }

  pub async fn load_persisted_profile(&self) -> Result<(), sqlx::Error> {
    if let Some(pool) = &self.pool {
      *self.profile.write() = store::load_profile(pool).await?;
    }
    Ok(())
  }

  /// ---------------------------------------------------------------------------
  /// Range Selection
  /// ---------------------------------------------------------------------------

  /// Select a range bucket.
  ///
  /// Reads the metrics cache synchronously so the UI updates immediately
  /// regardless of generation state, serves any cached insight slots, then
  /// schedules the debounced generation pass for whatever is missing.
  pub fn select_range(
    self: &Arc<Self>,
    bucket: RangeBucket,
    now: DateTime<Utc>,
  ) -> Result<(), DashboardError> {
    let snapshot = self.metrics.snapshot();
    if !snapshot.is_loaded() {
      return Err(DashboardError::NotReady);
    }
    let profile = self.profile.read().clone().ok_or(DashboardError::NotReady)?;

    *self.selected.lock() = Some(bucket);

    // At most one session and one recommendation task alive at a time.
    // A recommendation task for a different bucket is superseded;
    // same-bucket work keeps running.
    if let Some(prev) = self.session.lock().take() {
      prev.cancel.cancel();
    }
    {
      let mut rec = self.rec_task.lock();
      if rec.as_ref().map_or(false, |t| t.bucket != bucket) {
        if let Some(prev) = rec.take() {
          prev.cancel.cancel();
        }
      }
    }

    let (start, end) = bucket.resolve(now);
    let aggregate = snapshot.filter(start, end);
    self.push_if_selected(bucket, DashboardUpdate::Aggregate { bucket, aggregate: aggregate.clone() });

    // The basic insight is pure aggregate math; written at selection time
    let basic = BasicInsight::compute(bucket, &aggregate);
    let entry = self.insights.set_slot(bucket, SlotValue::Basic(basic), now);
    let complete = entry.is_complete();
    self.push_entry(bucket, entry);
    self.push_phase(bucket, LoadPhase::CacheHit { complete });

    if complete {
      self.push_phase(bucket, LoadPhase::Settled);
      return Ok(());
    }

    let (handle, token) = CancelHandle::new();
    *self.session.lock() = Some(LoadSession { cancel: handle });

    let this = self.clone();
    tokio::spawn(async move {
      this.run_session(bucket, profile, aggregate, now, token).await;
    });

    Ok(())
  }

  /// Debounce, then fill the missing slots for `bucket`
  async fn run_session(
    self: Arc<Self>,
    bucket: RangeBucket,
    profile: UserProfile,
    aggregate: MetricsAggregate,
    now: DateTime<Utc>,
    token: CancelToken,
  ) {
    self.push_phase(bucket, LoadPhase::Debouncing);

    // Rapid range flips land here and die quietly; no expensive call is
    // ever issued for a selection that did not survive the window
    sleep(Duration::from_millis(DEBOUNCE_MS)).await;
    if token.is_cancelled() {
      return;
    }

    self.push_phase(bucket, LoadPhase::Generating);

    if let Some(entry) = self.insights.get(bucket) {
      self.persist_entry(bucket, &entry).await;
    }

    // Body composition: best-effort refinement from supplementary reads;
    // absent optional fields never fail the step
    let measurements = self.source.fetch_body_measurements().await;
    let body = BodyCompositionPrediction::compute(&profile, &aggregate, measurements.as_ref());
    let entry = self
      .insights
      .set_slot(bucket, SlotValue::BodyComposition(body.clone()), now);
    self.persist_entry(bucket, &entry).await;
    self.push_entry(bucket, entry);
    if token.is_cancelled() {
      return;
    }

    // Pattern stats are deterministic generator input, recomputed per pass
    let (start, end) = bucket.resolve(now);
    let days = self.metrics.snapshot().records_in_range(start, end);
    let patterns = PatternInsights::compute(&days);

    match self
      .run_generation(bucket, &profile, &aggregate, &patterns, &body, now, &token)
      .await
    {
      Ok(()) => {}
      Err(DashboardError::Cancelled) => return,
      Err(DashboardError::GenerationUnavailable) => {
        if !self.unavailable_reported.swap(true, Ordering::SeqCst) {
          self.push_if_selected(bucket, DashboardUpdate::GenerationUnavailable { bucket });
        }
      }
      Err(DashboardError::GenerationInvalid { retry_available }) => {
        self.push_if_selected(
          bucket,
          DashboardUpdate::GenerationFailed { bucket, retry_available },
        );
      }
      Err(err) => eprintln!("Generation pass failed for {}: {}", bucket.as_str(), err),
    }

    self.push_phase(bucket, LoadPhase::Settled);
  }

  /// Generator-backed slots: the categorized efficiency insight (retried
  /// inline) and recommendations (dedicated task).
  #[allow(clippy::too_many_arguments)]
  async fn run_generation(
    self: &Arc<Self>,
    bucket: RangeBucket,
    profile: &UserProfile,
    aggregate: &MetricsAggregate,
    patterns: &PatternInsights,
    body: &BodyCompositionPrediction,
    now: DateTime<Utc>,
    token: &CancelToken,
  ) -> Result<(), DashboardError> {
    let generator = self
      .generator
      .clone()
      .ok_or(DashboardError::GenerationUnavailable)?;

    let entry = self.insights.get(bucket);
    let needs_insight = entry.as_ref().map_or(true, |e| e.pattern_insights.is_none());
    let needs_recommendations = entry.as_ref().map_or(true, |e| e.recommendations.is_none());

    if needs_recommendations {
      self.spawn_recommendation_task(
        generator.clone(),
        bucket,
        profile.clone(),
        patterns.clone(),
        body.clone(),
        aggregate.day_count,
        aggregate.avg_steps_per_day(),
        now,
      );
    }

    if needs_insight {
      self
        .generate_insight_with_retry(generator.as_ref(), bucket, profile, aggregate, now, token)
        .await?;
    }

    Ok(())
  }

  /// Call the generator for the efficiency insight, retrying invalid
  /// responses up to 2 more times with a fixed backoff.
  ///
  /// Every attempt's result is written to the cache immediately so a later
  /// retry's improvement overwrites the slot.
  async fn generate_insight_with_retry(
    &self,
    generator: &dyn InsightGenerator,
    bucket: RangeBucket,
    profile: &UserProfile,
    aggregate: &MetricsAggregate,
    now: DateTime<Utc>,
    token: &CancelToken,
  ) -> Result<(), DashboardError> {
    for attempt in 0..MAX_GENERATION_ATTEMPTS {
      if token.is_cancelled() {
        return Err(DashboardError::Cancelled);
      }

      match generator
        .generate_efficiency_insight(profile, aggregate, bucket)
        .await
      {
        Ok(insight) => {
          let valid = insight.is_valid();
          let entry = self.insights.set_slot(bucket, SlotValue::Patterns(insight), now);
          self.persist_entry(bucket, &entry).await;
          self.push_entry(bucket, entry);

          if valid {
            return Ok(());
          }
        }
        Err(err) => {
          eprintln!(
            "Insight generation attempt {} failed for {}: {}",
            attempt + 1,
            bucket.as_str(),
            err
          );
        }
      }

      if attempt + 1 < MAX_GENERATION_ATTEMPTS {
        sleep(Duration::from_secs(RETRY_BACKOFF_SECS)).await;
      }
    }

    Err(DashboardError::GenerationInvalid { retry_available: true })
  }

  /// Recommendations run as an independently cancellable task keyed by
  /// bucket. A completed result is cached even when the selection has moved
  /// on; only the UI update is gated on the selection still matching.
  #[allow(clippy::too_many_arguments)]
  fn spawn_recommendation_task(
    self: &Arc<Self>,
    generator: Arc<dyn InsightGenerator>,
    bucket: RangeBucket,
    profile: UserProfile,
    patterns: PatternInsights,
    body: BodyCompositionPrediction,
    day_count: usize,
    avg_steps: Option<f64>,
    now: DateTime<Utc>,
  ) {
    let id = self.rec_task_seq.fetch_add(1, Ordering::SeqCst) + 1;
    let (handle, token) = CancelHandle::new();
    {
      let mut rec = self.rec_task.lock();
      // One live task per bucket; a re-selection mid-flight reuses it
      if rec.as_ref().map_or(false, |t| t.bucket == bucket) {
        return;
      }
      if let Some(prev) = rec.replace(RecTask { bucket, id, cancel: handle }) {
        prev.cancel.cancel();
      }
    }

    let this = self.clone();
    tokio::spawn(async move {
      // Cancelled before the call started: nothing was computed, skip
      if token.is_cancelled() {
        return;
      }

      match generator
        .generate_recommendations(&profile, &patterns, &body, bucket, day_count, avg_steps)
        .await
      {
        Ok(Some(recommendations)) => {
          let entry = this
            .insights
            .set_slot(bucket, SlotValue::Recommendations(recommendations), now);
          this.persist_entry(bucket, &entry).await;
          this.push_entry(bucket, entry);
        }
        // The generator declined; the slot stays unset for this bucket
        Ok(None) => {}
        Err(err) => {
          eprintln!("Recommendation generation failed for {}: {}", bucket.as_str(), err)
        }
      }

      let mut rec = this.rec_task.lock();
      if rec.as_ref().map_or(false, |t| t.id == id) {
        *rec = None;
      }
    });
  }

  /// ---------------------------------------------------------------------------
  /// Sync Triggers
  /// ---------------------------------------------------------------------------

  /// Explicit pull-to-refresh; re-renders the current selection after a
  /// completed sync
  pub async fn refresh(self: &Arc<Self>, now: DateTime<Utc>) -> Result<(), DashboardError> {
    let outcome = self.sync.pull_to_refresh(now).await?;
    self.apply_sync_outcome(outcome, now)
  }

  /// App-foreground trigger; fetches only if the cache has gone stale
  pub async fn on_foreground(self: &Arc<Self>, now: DateTime<Utc>) -> Result<(), DashboardError> {
    let outcome = self.sync.on_foreground(now).await?;
    self.apply_sync_outcome(outcome, now)
  }

  fn apply_sync_outcome(
    self: &Arc<Self>,
    outcome: SyncOutcome,
    now: DateTime<Utc>,
  ) -> Result<(), DashboardError> {
    match outcome {
      SyncOutcome::Completed { .. } => {
        let selected = *self.selected.lock();
        if let Some(bucket) = selected {
          self.select_range(bucket, now)?;
        }
        Ok(())
      }
      SyncOutcome::CooldownActive { wait_minutes } => {
        Err(DashboardError::CooldownActive { wait_minutes })
      }
      SyncOutcome::NotAuthorized => Err(DashboardError::NotAuthorized),
      SyncOutcome::AlreadyRunning | SyncOutcome::Skipped => Ok(()),
    }
  }

  /// ---------------------------------------------------------------------------
  /// Internals
  /// ---------------------------------------------------------------------------

  async fn persist_entry(&self, bucket: RangeBucket, entry: &InsightCacheEntry) {
    if let Some(pool) = &self.pool {
      if let Err(err) = store::save_insight_entry(pool, bucket, entry).await {
        eprintln!("Failed to persist insight entry for {}: {}", bucket.as_str(), err);
      }
    }
  }

  fn push_if_selected(&self, bucket: RangeBucket, update: DashboardUpdate) {
    if *self.selected.lock() == Some(bucket) {
      let _ = self.updates.send(update);
    }
  }

  fn push_entry(&self, bucket: RangeBucket, entry: InsightCacheEntry) {
    self.push_if_selected(bucket, DashboardUpdate::Entry { bucket, entry });
  }

  fn push_phase(&self, bucket: RangeBucket, phase: LoadPhase) {
    self.push_if_selected(bucket, DashboardUpdate::Phase { bucket, phase });
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
