use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// ---------------------------------------------------------------------------
/// Daily Metrics Records
/// ---------------------------------------------------------------------------

/// One workout session within a day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutEntry {
  pub kind: String,
  pub started_at: DateTime<Utc>,
  pub ended_at: DateTime<Utc>,
  pub duration_minutes: f64,
}

/// One calendar day of health metrics, as fetched from the platform source.
///
/// A later fetch for the same day replaces the whole record; fields are
/// never patched individually.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetricsRecord {
  pub date: NaiveDate,
  pub steps: i64,
  pub distance_km: f64,
  pub active_calories: f64,
  pub total_calories: f64,
  pub avg_heart_rate: Option<f64>,
  pub sleep_hours: f64,
  pub blood_oxygen_pct: Option<f64>,
  pub cardio_fitness: Option<f64>,
  pub workouts: Vec<WorkoutEntry>,
}

/// ---------------------------------------------------------------------------
/// Range Aggregate
/// ---------------------------------------------------------------------------

/// Sums and averages over a filtered date range.
///
/// All sums are zero and all averages None when no records fall in range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsAggregate {
  pub day_count: usize,
  pub total_steps: i64,
  pub total_distance_km: f64,
  pub active_calories: f64,
  pub total_calories: f64,
  pub avg_heart_rate: Option<f64>,
  pub total_sleep_hours: f64,
  pub avg_sleep_hours: Option<f64>,
  pub avg_blood_oxygen_pct: Option<f64>,
  /// Most recent cardio fitness value in the range
  pub latest_cardio_fitness: Option<f64>,
  pub workout_count: usize,
}

impl MetricsAggregate {
  pub fn avg_steps_per_day(&self) -> Option<f64> {
    if self.day_count == 0 {
      None
    } else {
      Some(self.total_steps as f64 / self.day_count as f64)
    }
  }
}

/// ---------------------------------------------------------------------------
/// Range Buckets
/// ---------------------------------------------------------------------------

/// Stable identifier for a relative time range.
///
/// The key is derived from the range *type*, never from absolute dates;
/// absolute dates are recomputed from "now" each time a bucket is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RangeBucket {
  Today,
  ThisWeek,
  ThisMonth,
  LastSixMonths,
  ThisYear,
}

impl RangeBucket {
  pub fn as_str(&self) -> &'static str {
    match self {
      RangeBucket::Today => "today",
      RangeBucket::ThisWeek => "this-week",
      RangeBucket::ThisMonth => "this-month",
      RangeBucket::LastSixMonths => "last-6-months",
      RangeBucket::ThisYear => "this-year",
    }
  }

  pub fn from_str(s: &str) -> Option<Self> {
    match s {
      "today" => Some(RangeBucket::Today),
      "this-week" => Some(RangeBucket::ThisWeek),
      "this-month" => Some(RangeBucket::ThisMonth),
      "last-6-months" => Some(RangeBucket::LastSixMonths),
      "this-year" => Some(RangeBucket::ThisYear),
      _ => None,
    }
  }

  /// Resolve the bucket to a half-open date interval [start, end)
  /// relative to `now`. `end` is always tomorrow so that today's partial
  /// data is included.
  pub fn resolve(&self, now: DateTime<Utc>) -> (NaiveDate, NaiveDate) {
    let today = now.date_naive();
    let end = today + Duration::days(1);

    let start = match self {
      RangeBucket::Today => today,
      RangeBucket::ThisWeek => {
        // Monday-based week
        today - Duration::days(today.weekday().num_days_from_monday() as i64)
      }
      RangeBucket::ThisMonth => today.with_day(1).unwrap_or(today),
      RangeBucket::LastSixMonths => today - Duration::days(183),
      RangeBucket::ThisYear => today.with_ordinal(1).unwrap_or(today),
    };

    (start, end)
  }

  pub fn all() -> [RangeBucket; 5] {
    [
      RangeBucket::Today,
      RangeBucket::ThisWeek,
      RangeBucket::ThisMonth,
      RangeBucket::LastSixMonths,
      RangeBucket::ThisYear,
    ]
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
