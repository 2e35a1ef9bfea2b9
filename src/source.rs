//! Platform health-data source interface
//!
//! The dashboard never talks to the platform health store directly; it
//! consumes this trait. Implementations may return partial or empty results
//! on permission denial rather than erroring.

use crate::models::DailyMetricsRecord;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
  #[error("source unavailable: {0}")]
  Unavailable(String),

  #[error("fetch failed: {0}")]
  Fetch(String),
}

/// Latest body measurements from the platform, used to refine the body
/// composition prediction. Every field is optional and best-effort.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BodyMeasurements {
  pub weight_kg: Option<f64>,
  pub body_fat_pct: Option<f64>,
}

/// Provider of per-day metric samples and workouts for a date interval,
/// plus the authorization gate.
#[async_trait]
pub trait HealthSource: Send + Sync {
  /// Fetch one record per day in [start, end). May return fewer days than
  /// requested (gaps, permission-limited categories).
  async fn fetch_daily_metrics(
    &self,
    start: NaiveDate,
    end: NaiveDate,
  ) -> Result<Vec<DailyMetricsRecord>, SourceError>;

  /// Ask the platform for read access; false means denied
  async fn request_authorization(&self) -> bool;

  /// Supplementary read for the body-composition refinement step
  async fn fetch_body_measurements(&self) -> Option<BodyMeasurements> {
    None
  }
}
