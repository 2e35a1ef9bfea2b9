//! Test utilities and helpers for integration and unit testing
//!
//! This module provides common test infrastructure including:
//! - Database setup/teardown
//! - Mock data factories
//! - Scripted source and generator doubles
//! - Time helpers

use crate::analysis::{BasicInsight, BodyCompositionPrediction, PatternInsights};
use crate::llm::{InsightGenerator, LlmError};
use crate::models::{
  CategorizedInsight, DailyMetricsRecord, InsightCategory, MetricsAggregate, RangeBucket,
  RecommendationItem, Recommendations, UserProfile,
};
use crate::source::{BodyMeasurements, HealthSource, SourceError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

/// ---------------------------------------------------------------------------
/// Database Test Utilities
/// ---------------------------------------------------------------------------

/// Create an in-memory SQLite database for testing
/// Runs all migrations and returns a ready-to-use pool
///
/// Uses max_connections(1) to prevent multiple pool connections from creating
/// isolated in-memory databases, which would cause intermittent test failures
pub async fn setup_test_db() -> SqlitePool {
  let pool = sqlx::sqlite::SqlitePoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .expect("Failed to create in-memory database");

  sqlx::migrate!("./migrations")
    .run(&pool)
    .await
    .expect("Failed to run migrations");

  pool
}

/// Close a test database pool
pub async fn teardown_test_db(pool: SqlitePool) {
  pool.close().await;
}

/// ---------------------------------------------------------------------------
/// Time Helpers
/// ---------------------------------------------------------------------------

/// Calendar date shorthand
pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
  NaiveDate::from_ymd_opt(year, month, day).expect("valid test date")
}

/// UTC timestamp shorthand
pub fn ts(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
  Utc
    .with_ymd_and_hms(year, month, day, hour, min, sec)
    .single()
    .expect("valid test timestamp")
}

/// ---------------------------------------------------------------------------
/// Mock Data Factories
/// ---------------------------------------------------------------------------

/// Create a baseline daily record for testing
pub fn day_record(date: NaiveDate) -> DailyMetricsRecord {
  DailyMetricsRecord {
    date,
    steps: 5000,
    distance_km: 3.5,
    active_calories: 450.0,
    total_calories: 2200.0,
    avg_heart_rate: None,
    sleep_hours: 7.5,
    blood_oxygen_pct: None,
    cardio_fitness: None,
    workouts: vec![],
  }
}

/// Baseline daily record with an explicit step count
pub fn day_record_with_steps(date: NaiveDate, steps: i64) -> DailyMetricsRecord {
  DailyMetricsRecord {
    steps,
    ..day_record(date)
  }
}

pub fn mock_profile() -> UserProfile {
  UserProfile {
    age: Some(35),
    sex: Some("male".to_string()),
    height_cm: Some(180.0),
    weight_kg: Some(81.0),
    goal: Some("maintain".to_string()),
  }
}

pub fn mock_basic_insight() -> BasicInsight {
  BasicInsight {
    headline: "Averaging 8000 steps and 7.5h sleep per day (this-week)".to_string(),
    avg_steps_per_day: Some(8000.0),
    avg_sleep_hours: Some(7.5),
    active_calories_per_day: Some(500.0),
    workout_count: 4,
  }
}

pub fn mock_categorized_insight() -> CategorizedInsight {
  CategorizedInsight {
    categories: vec![InsightCategory {
      category: "activity".to_string(),
      title: "Consistent stepper".to_string(),
      body: "Step counts held steady across the range.".to_string(),
    }],
  }
}

pub fn mock_body_composition() -> BodyCompositionPrediction {
  BodyCompositionPrediction {
    bmi: Some(25.0),
    weight_kg: Some(81.0),
    body_fat_pct: Some(21.9),
    projected_weight_delta_kg: Some(-0.39),
  }
}

pub fn mock_recommendations() -> Recommendations {
  Recommendations {
    items: vec![RecommendationItem {
      title: "Add a weekend walk".to_string(),
      detail: "Weekend steps lag weekdays; a 30 minute walk closes the gap.".to_string(),
      priority: Some(1),
    }],
    focus_area: Some("activity".to_string()),
  }
}

/// ---------------------------------------------------------------------------
/// Scripted Health Source
/// ---------------------------------------------------------------------------

/// In-memory source double. Returns a fixed record set, and can be scripted
/// to fail, deny authorization, or delay its fetch.
pub struct MockHealthSource {
  records: Mutex<Vec<DailyMetricsRecord>>,
  measurements: Mutex<Option<BodyMeasurements>>,
  failing: AtomicBool,
  authorized: AtomicBool,
  delay: Mutex<Option<StdDuration>>,
  fetch_calls: AtomicUsize,
}

impl MockHealthSource {
  pub fn with_records(records: Vec<DailyMetricsRecord>) -> Self {
    Self {
      records: Mutex::new(records),
      measurements: Mutex::new(None),
      failing: AtomicBool::new(false),
      authorized: AtomicBool::new(true),
      delay: Mutex::new(None),
      fetch_calls: AtomicUsize::new(0),
    }
  }

  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  pub fn set_authorized(&self, authorized: bool) {
    self.authorized.store(authorized, Ordering::SeqCst);
  }

  pub fn set_delay(&self, delay: StdDuration) {
    *self.delay.lock() = Some(delay);
  }

  pub fn set_measurements(&self, measurements: BodyMeasurements) {
    *self.measurements.lock() = Some(measurements);
  }

  pub fn fetch_calls(&self) -> usize {
    self.fetch_calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl HealthSource for MockHealthSource {
  async fn fetch_daily_metrics(
    &self,
    start: NaiveDate,
    end: NaiveDate,
  ) -> Result<Vec<DailyMetricsRecord>, SourceError> {
    let delay = *self.delay.lock();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    self.fetch_calls.fetch_add(1, Ordering::SeqCst);

    if self.failing.load(Ordering::SeqCst) {
      return Err(SourceError::Fetch("scripted failure".to_string()));
    }

    let records = self
      .records
      .lock()
      .iter()
      .filter(|r| r.date >= start && r.date < end)
      .cloned()
      .collect();
    Ok(records)
  }

  async fn request_authorization(&self) -> bool {
    self.authorized.load(Ordering::SeqCst)
  }

  async fn fetch_body_measurements(&self) -> Option<BodyMeasurements> {
    self.measurements.lock().clone()
  }
}

/// ---------------------------------------------------------------------------
/// Scripted Insight Generator
/// ---------------------------------------------------------------------------

/// Generator double with per-call scripting.
///
/// Efficiency-insight calls pop from a script queue and fall back to a valid
/// mock once the queue is empty; recommendation calls do the same. Call
/// counts and requested buckets are recorded for assertions.
pub struct ScriptedGenerator {
  insight_script: Mutex<VecDeque<Result<CategorizedInsight, LlmError>>>,
  rec_script: Mutex<VecDeque<Result<Option<Recommendations>, LlmError>>>,
  insight_buckets: Mutex<Vec<RangeBucket>>,
  insight_calls: AtomicUsize,
  rec_calls: AtomicUsize,
  delay: Mutex<Option<StdDuration>>,
}

impl ScriptedGenerator {
  pub fn new() -> Self {
    Self {
      insight_script: Mutex::new(VecDeque::new()),
      rec_script: Mutex::new(VecDeque::new()),
      insight_buckets: Mutex::new(Vec::new()),
      insight_calls: AtomicUsize::new(0),
      rec_calls: AtomicUsize::new(0),
      delay: Mutex::new(None),
    }
  }

  /// Queue the result of the next efficiency-insight call
  pub fn push_insight(&self, result: Result<CategorizedInsight, LlmError>) {
    self.insight_script.lock().push_back(result);
  }

  /// Queue the result of the next recommendations call
  pub fn push_recommendations(&self, result: Result<Option<Recommendations>, LlmError>) {
    self.rec_script.lock().push_back(result);
  }

  /// Delay applied before each generator call resolves
  pub fn set_delay(&self, delay: StdDuration) {
    *self.delay.lock() = Some(delay);
  }

  pub fn insight_calls(&self) -> usize {
    self.insight_calls.load(Ordering::SeqCst)
  }

  pub fn recommendation_calls(&self) -> usize {
    self.rec_calls.load(Ordering::SeqCst)
  }

  /// Buckets passed to efficiency-insight calls, in order
  pub fn insight_buckets(&self) -> Vec<RangeBucket> {
    self.insight_buckets.lock().clone()
  }
}

impl Default for ScriptedGenerator {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl InsightGenerator for ScriptedGenerator {
  async fn generate_efficiency_insight(
    &self,
    _profile: &UserProfile,
    _metrics: &MetricsAggregate,
    range_type: RangeBucket,
  ) -> Result<CategorizedInsight, LlmError> {
    let delay = *self.delay.lock();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    self.insight_calls.fetch_add(1, Ordering::SeqCst);
    self.insight_buckets.lock().push(range_type);

    self
      .insight_script
      .lock()
      .pop_front()
      .unwrap_or_else(|| Ok(mock_categorized_insight()))
  }

  async fn generate_recommendations(
    &self,
    _profile: &UserProfile,
    _patterns: &PatternInsights,
    _body_composition: &BodyCompositionPrediction,
    _range_type: RangeBucket,
    _day_count: usize,
    _avg_steps: Option<f64>,
  ) -> Result<Option<Recommendations>, LlmError> {
    let delay = *self.delay.lock();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    self.rec_calls.fetch_add(1, Ordering::SeqCst);

    self
      .rec_script
      .lock()
      .pop_front()
      .unwrap_or_else(|| Ok(Some(mock_recommendations())))
  }
}

/// ---------------------------------------------------------------------------
/// Tests for Test Utilities
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_setup_db_creates_schema() {
    let pool = setup_test_db().await;

    let tables: Vec<(String,)> = sqlx::query_as(
      "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('daily_metrics', 'sync_state', 'insight_entries', 'user_profile')"
    )
    .fetch_all(&pool)
    .await
    .expect("Failed to query tables");

    assert_eq!(tables.len(), 4);

    teardown_test_db(pool).await;
  }

  #[test]
  fn test_mock_factories_create_valid_data() {
    let record = day_record_with_steps(date(2025, 3, 10), 12000);
    assert_eq!(record.steps, 12000);
    assert_eq!(record.sleep_hours, 7.5);

    assert!(mock_categorized_insight().is_valid());
    assert!(mock_profile().bmi().is_some());
  }

  #[tokio::test]
  async fn test_mock_source_filters_to_window() {
    let source = MockHealthSource::with_records(vec![
      day_record(date(2025, 3, 9)),
      day_record(date(2025, 3, 10)),
      day_record(date(2025, 3, 11)),
    ]);

    let records = source
      .fetch_daily_metrics(date(2025, 3, 10), date(2025, 3, 11))
      .await
      .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].date, date(2025, 3, 10));
    assert_eq!(source.fetch_calls(), 1);
  }

  #[tokio::test]
  async fn test_scripted_generator_falls_back_to_valid_mock() {
    let generator = ScriptedGenerator::new();
    generator.push_insight(Err(LlmError::Api("scripted".to_string())));

    let profile = mock_profile();
    let agg = MetricsAggregate::default();

    let first = generator
      .generate_efficiency_insight(&profile, &agg, RangeBucket::Today)
      .await;
    assert!(first.is_err());

    let second = generator
      .generate_efficiency_insight(&profile, &agg, RangeBucket::Today)
      .await
      .unwrap();
    assert!(second.is_valid());
    assert_eq!(generator.insight_calls(), 2);
  }
}
