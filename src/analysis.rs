//! Deterministic analysis layer for daily health metrics
//!
//! Everything here is cheap, local math over cached records. The generator
//! interprets these pre-computed figures rather than doing math itself, and
//! the coordinator can always show these results without waiting on it.

use crate::models::{DailyMetricsRecord, MetricsAggregate, RangeBucket, UserProfile};
use crate::source::BodyMeasurements;
use chrono::{Datelike, Weekday};
use serde::{Deserialize, Serialize};

/// ---------------------------------------------------------------------------
/// Basic Insight (written at selection time)
/// ---------------------------------------------------------------------------

/// Quick summary derived straight from the range aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicInsight {
  pub headline: String,
  pub avg_steps_per_day: Option<f64>,
  pub avg_sleep_hours: Option<f64>,
  pub active_calories_per_day: Option<f64>,
  pub workout_count: usize,
}

impl BasicInsight {
  pub fn compute(bucket: RangeBucket, agg: &MetricsAggregate) -> Self {
    let avg_steps = agg.avg_steps_per_day();
    let active_per_day = if agg.day_count > 0 {
      Some(agg.active_calories / agg.day_count as f64)
    } else {
      None
    };

    let headline = match avg_steps {
      Some(steps) => format!(
        "Averaging {:.0} steps and {:.1}h sleep per day ({})",
        steps,
        agg.avg_sleep_hours.unwrap_or(0.0),
        bucket.as_str()
      ),
      None => format!("No metrics recorded yet for {}", bucket.as_str()),
    };

    Self {
      headline,
      avg_steps_per_day: avg_steps,
      avg_sleep_hours: agg.avg_sleep_hours,
      active_calories_per_day: active_per_day,
      workout_count: agg.workout_count,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Pattern Statistics (generator input, recomputed per pass)
/// ---------------------------------------------------------------------------

/// Deterministic pattern statistics over the selected range
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternInsights {
  pub weekday_avg_steps: Option<f64>,
  pub weekend_avg_steps: Option<f64>,

  /// Share of days in range with any recorded workout (0-100)
  pub active_day_pct: Option<f64>,

  /// Step trend across the range: "improving", "stable", "declining"
  pub step_trend: Option<String>,

  /// Share of days within +/- 1hr of the range's average sleep (0-100)
  pub sleep_consistency_pct: Option<f64>,
}

impl PatternInsights {
  /// Compute pattern statistics from date-sorted records
  pub fn compute(days: &[DailyMetricsRecord]) -> Self {
    if days.is_empty() {
      return Self::default();
    }

    let (weekday_steps, weekend_steps): (Vec<i64>, Vec<i64>) = days.iter().fold(
      (Vec::new(), Vec::new()),
      |(mut wd, mut we), record| {
        match record.date.weekday() {
          Weekday::Sat | Weekday::Sun => we.push(record.steps),
          _ => wd.push(record.steps),
        }
        (wd, we)
      },
    );

    let avg = |steps: &[i64]| {
      if steps.is_empty() {
        None
      } else {
        Some(steps.iter().sum::<i64>() as f64 / steps.len() as f64)
      }
    };

    let active_days = days.iter().filter(|d| !d.workouts.is_empty()).count();
    let active_day_pct = Some(active_days as f64 / days.len() as f64 * 100.0);

    Self {
      weekday_avg_steps: avg(&weekday_steps),
      weekend_avg_steps: avg(&weekend_steps),
      active_day_pct,
      step_trend: Self::step_trend(days),
      sleep_consistency_pct: Self::sleep_consistency(days),
    }
  }

  /// Compare first-half vs second-half average steps; +/-5% counts as stable
  fn step_trend(days: &[DailyMetricsRecord]) -> Option<String> {
    if days.len() < 2 {
      return None;
    }

    let mid = days.len() / 2;
    let first: f64 = days[..mid].iter().map(|d| d.steps as f64).sum::<f64>() / mid as f64;
    let second: f64 =
      days[mid..].iter().map(|d| d.steps as f64).sum::<f64>() / (days.len() - mid) as f64;

    if first <= 0.0 {
      return if second > 0.0 {
        Some("improving".to_string())
      } else {
        Some("stable".to_string())
      };
    }

    let pct_change = (second - first) / first * 100.0;
    if pct_change > 5.0 {
      Some("improving".to_string())
    } else if pct_change < -5.0 {
      Some("declining".to_string())
    } else {
      Some("stable".to_string())
    }
  }

  fn sleep_consistency(days: &[DailyMetricsRecord]) -> Option<f64> {
    if days.is_empty() {
      return None;
    }

    let mean = days.iter().map(|d| d.sleep_hours).sum::<f64>() / days.len() as f64;
    let within = days
      .iter()
      .filter(|d| (d.sleep_hours - mean).abs() <= 1.0)
      .count();

    Some(within as f64 / days.len() as f64 * 100.0)
  }
}

/// ---------------------------------------------------------------------------
/// Body Composition Prediction (best-effort refinement)
/// ---------------------------------------------------------------------------

/// Daily active-calorie burn treated as maintenance baseline; the delta
/// against it drives the 30-day weight projection
const ACTIVITY_BASELINE_KCAL: f64 = 400.0;

/// ~7700 kcal per kg of body weight
const KCAL_PER_KG: f64 = 7700.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BodyCompositionPrediction {
  pub bmi: Option<f64>,
  pub weight_kg: Option<f64>,
  pub body_fat_pct: Option<f64>,
  /// Projected weight change over the next 30 days at the observed
  /// activity level, in kg (negative = loss)
  pub projected_weight_delta_kg: Option<f64>,
}

impl BodyCompositionPrediction {
  /// Compute from the profile and range aggregate, refined with optional
  /// platform body measurements when the source provides them. Absent
  /// optional fields never fail the computation.
  pub fn compute(
    profile: &UserProfile,
    agg: &MetricsAggregate,
    measurements: Option<&BodyMeasurements>,
  ) -> Self {
    let weight_kg = measurements
      .and_then(|m| m.weight_kg)
      .or(profile.weight_kg);

    let bmi = match (profile.height_cm, weight_kg) {
      (Some(h), Some(w)) if h > 0.0 => {
        let m = h / 100.0;
        Some(w / (m * m))
      }
      _ => None,
    };

    // Measured body fat wins; otherwise Deurenberg estimate from BMI + age
    let body_fat_pct = measurements.and_then(|m| m.body_fat_pct).or_else(|| {
      match (bmi, profile.age, profile.sex.as_deref()) {
        (Some(bmi), Some(age), Some(sex)) => {
          let sex_term = if sex.eq_ignore_ascii_case("male") { 1.0 } else { 0.0 };
          Some(1.2 * bmi + 0.23 * age as f64 - 10.8 * sex_term - 5.4)
        }
        _ => None,
      }
    });

    let projected_weight_delta_kg = if agg.day_count > 0 {
      let daily_active = agg.active_calories / agg.day_count as f64;
      Some(-(daily_active - ACTIVITY_BASELINE_KCAL) * 30.0 / KCAL_PER_KG)
    } else {
      None
    };

    Self {
      bmi,
      weight_kg,
      body_fat_pct,
      projected_weight_delta_kg,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
