//! Persistence queries for the caches and sync state
//!
//! The caches themselves are in-memory; this module is the write-through
//! layer that survives restarts. Loading happens once at startup, saving
//! after every merge and slot write.

use crate::db::DbPool;
use crate::insight_cache::InsightCacheEntry;
use crate::metrics_cache::MetricsCache;
use crate::models::{DailyMetricsRecord, RangeBucket, UserProfile, WorkoutEntry};
use chrono::{DateTime, NaiveDate, Utc};

/// ---------------------------------------------------------------------------
/// Daily Metrics Records
/// ---------------------------------------------------------------------------

/// Upsert a batch of day records
pub async fn save_records(pool: &DbPool, records: &[DailyMetricsRecord]) -> Result<(), sqlx::Error> {
  for record in records {
    let workouts_json = serde_json::to_string(&record.workouts).unwrap_or_default();

    sqlx::query(
      r#"
      INSERT INTO daily_metrics (
        date, steps, distance_km, active_calories, total_calories,
        avg_heart_rate, sleep_hours, blood_oxygen_pct, cardio_fitness, workouts_json
      )
      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
      ON CONFLICT(date) DO UPDATE SET
        steps = excluded.steps,
        distance_km = excluded.distance_km,
        active_calories = excluded.active_calories,
        total_calories = excluded.total_calories,
        avg_heart_rate = excluded.avg_heart_rate,
        sleep_hours = excluded.sleep_hours,
        blood_oxygen_pct = excluded.blood_oxygen_pct,
        cardio_fitness = excluded.cardio_fitness,
        workouts_json = excluded.workouts_json,
        updated_at = CURRENT_TIMESTAMP
      "#,
    )
    .bind(record.date)
    .bind(record.steps)
    .bind(record.distance_km)
    .bind(record.active_calories)
    .bind(record.total_calories)
    .bind(record.avg_heart_rate)
    .bind(record.sleep_hours)
    .bind(record.blood_oxygen_pct)
    .bind(record.cardio_fitness)
    .bind(&workouts_json)
    .execute(pool)
    .await?;
  }

  Ok(())
}

/// Load the full metrics cache (records + freshness timestamp)
pub async fn load_metrics_cache(pool: &DbPool) -> Result<MetricsCache, sqlx::Error> {
  let rows: Vec<(
    NaiveDate,
    i64,
    f64,
    f64,
    f64,
    Option<f64>,
    f64,
    Option<f64>,
    Option<f64>,
    String,
  )> = sqlx::query_as(
    r#"
    SELECT date, steps, distance_km, active_calories, total_calories,
           avg_heart_rate, sleep_hours, blood_oxygen_pct, cardio_fitness, workouts_json
    FROM daily_metrics
    "#,
  )
  .fetch_all(pool)
  .await?;

  let records: Vec<DailyMetricsRecord> = rows
    .into_iter()
    .map(
      |(date, steps, distance_km, active, total, hr, sleep, oxygen, fitness, workouts_json)| {
        let workouts: Vec<WorkoutEntry> =
          serde_json::from_str(&workouts_json).unwrap_or_default();

        DailyMetricsRecord {
          date,
          steps,
          distance_km,
          active_calories: active,
          total_calories: total,
          avg_heart_rate: hr,
          sleep_hours: sleep,
          blood_oxygen_pct: oxygen,
          cardio_fitness: fitness,
          workouts,
        }
      },
    )
    .collect();

  let (last_fetched_at, _) = load_sync_state(pool).await?;

  Ok(MetricsCache::from_parts(records, last_fetched_at))
}

/// ---------------------------------------------------------------------------
/// Sync State
/// ---------------------------------------------------------------------------

/// Returns (last_fetched_at, last_pull_refresh)
pub async fn load_sync_state(
  pool: &DbPool,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), sqlx::Error> {
  let row: Option<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> =
    sqlx::query_as("SELECT last_fetched_at, last_pull_refresh FROM sync_state WHERE id = 1")
      .fetch_optional(pool)
      .await?;

  Ok(row.unwrap_or((None, None)))
}

pub async fn set_last_fetched_at(
  pool: &DbPool,
  fetched_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
  sqlx::query("UPDATE sync_state SET last_fetched_at = ?1 WHERE id = 1")
    .bind(fetched_at)
    .execute(pool)
    .await?;
  Ok(())
}

pub async fn set_last_pull_refresh(
  pool: &DbPool,
  refreshed_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
  sqlx::query("UPDATE sync_state SET last_pull_refresh = ?1 WHERE id = 1")
    .bind(refreshed_at)
    .execute(pool)
    .await?;
  Ok(())
}

/// ---------------------------------------------------------------------------
/// Insight Entries
/// ---------------------------------------------------------------------------

pub async fn save_insight_entry(
  pool: &DbPool,
  bucket: RangeBucket,
  entry: &InsightCacheEntry,
) -> Result<(), sqlx::Error> {
  sqlx::query(
    r#"
    INSERT INTO insight_entries (
      bucket, basic_insight_json, pattern_insights_json,
      body_composition_json, recommendations_json, captured_at
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(bucket) DO UPDATE SET
      basic_insight_json = excluded.basic_insight_json,
      pattern_insights_json = excluded.pattern_insights_json,
      body_composition_json = excluded.body_composition_json,
      recommendations_json = excluded.recommendations_json,
      captured_at = excluded.captured_at
    "#,
  )
  .bind(bucket.as_str())
  .bind(entry.basic_insight.as_ref().map(|v| serde_json::to_string(v).unwrap_or_default()))
  .bind(entry.pattern_insights.as_ref().map(|v| serde_json::to_string(v).unwrap_or_default()))
  .bind(entry.body_composition.as_ref().map(|v| serde_json::to_string(v).unwrap_or_default()))
  .bind(entry.recommendations.as_ref().map(|v| serde_json::to_string(v).unwrap_or_default()))
  .bind(entry.captured_at)
  .execute(pool)
  .await?;

  Ok(())
}

pub async fn delete_insight_entries(
  pool: &DbPool,
  buckets: &[RangeBucket],
) -> Result<(), sqlx::Error> {
  for bucket in buckets {
    sqlx::query("DELETE FROM insight_entries WHERE bucket = ?1")
      .bind(bucket.as_str())
      .execute(pool)
      .await?;
  }
  Ok(())
}

pub async fn load_insight_entries(
  pool: &DbPool,
) -> Result<Vec<(RangeBucket, InsightCacheEntry)>, sqlx::Error> {
  let rows: Vec<(
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
  )> = sqlx::query_as(
    r#"
    SELECT bucket, basic_insight_json, pattern_insights_json,
           body_composition_json, recommendations_json, captured_at
    FROM insight_entries
    "#,
  )
  .fetch_all(pool)
  .await?;

  let entries = rows
    .into_iter()
    .filter_map(|(bucket, basic, patterns, body, recs, captured_at)| {
      let bucket = RangeBucket::from_str(&bucket)?;

      Some((
        bucket,
        InsightCacheEntry {
          basic_insight: basic.as_deref().and_then(|s| serde_json::from_str(s).ok()),
          pattern_insights: patterns.as_deref().and_then(|s| serde_json::from_str(s).ok()),
          body_composition: body.as_deref().and_then(|s| serde_json::from_str(s).ok()),
          recommendations: recs.as_deref().and_then(|s| serde_json::from_str(s).ok()),
          captured_at,
        },
      ))
    })
    .collect();

  Ok(entries)
}

/// ---------------------------------------------------------------------------
/// User Profile
/// ---------------------------------------------------------------------------

pub async fn load_profile(pool: &DbPool) -> Result<Option<UserProfile>, sqlx::Error> {
  let row: Option<(Option<i64>, Option<String>, Option<f64>, Option<f64>, Option<String>)> =
    sqlx::query_as("SELECT age, sex, height_cm, weight_kg, goal FROM user_profile WHERE id = 1")
      .fetch_optional(pool)
      .await?;

  Ok(row.map(|(age, sex, height_cm, weight_kg, goal)| UserProfile {
    age,
    sex,
    height_cm,
    weight_kg,
    goal,
  }))
}

pub async fn save_profile(pool: &DbPool, profile: &UserProfile) -> Result<(), sqlx::Error> {
  sqlx::query(
    r#"
    INSERT INTO user_profile (id, age, sex, height_cm, weight_kg, goal)
    VALUES (1, ?1, ?2, ?3, ?4, ?5)
    ON CONFLICT(id) DO UPDATE SET
      age = excluded.age,
      sex = excluded.sex,
      height_cm = excluded.height_cm,
      weight_kg = excluded.weight_kg,
      goal = excluded.goal,
      updated_at = CURRENT_TIMESTAMP
    "#,
  )
  .bind(profile.age)
  .bind(&profile.sex)
  .bind(profile.height_cm)
  .bind(profile.weight_kg)
  .bind(&profile.goal)
  .execute(pool)
  .await?;

  Ok(())
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;
  use crate::insight_cache::{InsightResponseCache, SlotValue};
  use crate::test_utils::*;
  use chrono::Duration;

  #[tokio::test]
  async fn test_records_round_trip() {
    let pool = setup_test_db().await;

    let mut record = day_record(date(2025, 3, 10));
    record.avg_heart_rate = Some(62.0);
    record.workouts.push(crate::models::WorkoutEntry {
      kind: "run".to_string(),
      started_at: ts(2025, 3, 10, 7, 0, 0),
      ended_at: ts(2025, 3, 10, 7, 40, 0),
      duration_minutes: 40.0,
    });

    save_records(&pool, &[record.clone()]).await.unwrap();
    set_last_fetched_at(&pool, ts(2025, 3, 10, 8, 0, 0)).await.unwrap();

    let cache = load_metrics_cache(&pool).await.unwrap();
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get(date(2025, 3, 10)), Some(&record));
    assert_eq!(cache.last_fetched_at(), Some(ts(2025, 3, 10, 8, 0, 0)));

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_records_upsert_replaces_whole_day() {
    let pool = setup_test_db().await;

    save_records(&pool, &[day_record_with_steps(date(2025, 3, 10), 1000)])
      .await
      .unwrap();
    save_records(&pool, &[day_record_with_steps(date(2025, 3, 10), 2000)])
      .await
      .unwrap();

    let cache = load_metrics_cache(&pool).await.unwrap();
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get(date(2025, 3, 10)).unwrap().steps, 2000);

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_sync_state_round_trip() {
    let pool = setup_test_db().await;

    let (fetched, pulled) = load_sync_state(&pool).await.unwrap();
    assert_eq!(fetched, None);
    assert_eq!(pulled, None);

    let t = ts(2025, 3, 14, 9, 30, 0);
    set_last_fetched_at(&pool, t).await.unwrap();
    set_last_pull_refresh(&pool, t + Duration::minutes(5)).await.unwrap();

    let (fetched, pulled) = load_sync_state(&pool).await.unwrap();
    assert_eq!(fetched, Some(t));
    assert_eq!(pulled, Some(t + Duration::minutes(5)));

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_insight_entry_round_trip() {
    let pool = setup_test_db().await;
    let cache = InsightResponseCache::new();
    let captured = ts(2025, 3, 14, 10, 0, 0);

    cache.set_slot(
      RangeBucket::ThisWeek,
      SlotValue::Basic(mock_basic_insight()),
      captured,
    );
    let entry = cache.set_slot(
      RangeBucket::ThisWeek,
      SlotValue::Recommendations(mock_recommendations()),
      captured,
    );

    save_insight_entry(&pool, RangeBucket::ThisWeek, &entry).await.unwrap();

    let loaded = load_insight_entries(&pool).await.unwrap();
    assert_eq!(loaded.len(), 1);
    let (bucket, loaded_entry) = &loaded[0];
    assert_eq!(*bucket, RangeBucket::ThisWeek);
    assert_eq!(loaded_entry, &entry);

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_delete_insight_entries() {
    let pool = setup_test_db().await;
    let cache = InsightResponseCache::new();
    let captured = ts(2025, 3, 14, 10, 0, 0);

    for bucket in [RangeBucket::Today, RangeBucket::ThisWeek] {
      let entry = cache.set_slot(bucket, SlotValue::Basic(mock_basic_insight()), captured);
      save_insight_entry(&pool, bucket, &entry).await.unwrap();
    }

    delete_insight_entries(&pool, &[RangeBucket::Today]).await.unwrap();

    let loaded = load_insight_entries(&pool).await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].0, RangeBucket::ThisWeek);

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_profile_round_trip() {
    let pool = setup_test_db().await;

    assert!(load_profile(&pool).await.unwrap().is_none());

    let profile = mock_profile();
    save_profile(&pool, &profile).await.unwrap();

    let loaded = load_profile(&pool).await.unwrap().unwrap();
    assert_eq!(loaded.age, profile.age);
    assert_eq!(loaded.height_cm, profile.height_cm);

    teardown_test_db(pool).await;
  }
}
