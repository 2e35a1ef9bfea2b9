//! Per-range cache of AI-derived insight artifacts
//!
//! Each range bucket owns one entry with four independently-settable slots.
//! Metrics-derived slots are cheap to recompute; generator-produced slots are
//! expensive, which is why partial entries are served immediately instead of
//! blocking on the slowest slot.

use crate::analysis::{BasicInsight, BodyCompositionPrediction};
use crate::models::{CategorizedInsight, RangeBucket, Recommendations};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// ---------------------------------------------------------------------------
/// Cache Entry
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightCacheEntry {
  pub basic_insight: Option<BasicInsight>,
  /// Categorized efficiency insight from the generator
  pub pattern_insights: Option<CategorizedInsight>,
  pub body_composition: Option<BodyCompositionPrediction>,
  pub recommendations: Option<Recommendations>,
  /// When the newest slot value was captured, relative to the metrics
  /// the slots were derived from
  pub captured_at: DateTime<Utc>,
}

impl InsightCacheEntry {
  fn new(captured_at: DateTime<Utc>) -> Self {
    Self {
      basic_insight: None,
      pattern_insights: None,
      body_composition: None,
      recommendations: None,
      captured_at,
    }
  }

  pub fn is_complete(&self) -> bool {
    self.basic_insight.is_some()
      && self.pattern_insights.is_some()
      && self.body_composition.is_some()
      && self.recommendations.is_some()
  }
}

/// One slot's worth of insight content
#[derive(Debug, Clone, PartialEq)]
pub enum SlotValue {
  Basic(BasicInsight),
  Patterns(CategorizedInsight),
  BodyComposition(BodyCompositionPrediction),
  Recommendations(Recommendations),
}

/// ---------------------------------------------------------------------------
/// Insight Response Cache
/// ---------------------------------------------------------------------------

/// Bucket-keyed insight cache. Slot writes from different in-flight tasks
/// are serialized by the entry lock; same-slot writes are last-writer-wins
/// by completion order.
#[derive(Debug, Default)]
pub struct InsightResponseCache {
  entries: Mutex<HashMap<RangeBucket, InsightCacheEntry>>,
}

impl InsightResponseCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Current entry regardless of staleness; the caller decides whether to
  /// serve-then-refresh or refresh-only via `is_stale`.
  pub fn get(&self, bucket: RangeBucket) -> Option<InsightCacheEntry> {
    self.entries.lock().get(&bucket).cloned()
  }

  /// Whether the entry for `bucket` was derived from metrics older than
  /// the latest sync
  pub fn is_stale(&self, bucket: RangeBucket, metrics_fetched_at: Option<DateTime<Utc>>) -> bool {
    match (self.get(bucket), metrics_fetched_at) {
      (Some(entry), Some(fetched)) => entry.captured_at < fetched,
      _ => false,
    }
  }

  /// Set one slot, creating the entry if needed. Returns the updated entry
  /// so the caller can persist it.
  ///
  /// `captured_at` only ever advances; a slow write landing after a newer
  /// one cannot rewind the entry's freshness.
  pub fn set_slot(
    &self,
    bucket: RangeBucket,
    value: SlotValue,
    captured_at: DateTime<Utc>,
  ) -> InsightCacheEntry {
    let mut entries = self.entries.lock();
    let entry = entries
      .entry(bucket)
      .or_insert_with(|| InsightCacheEntry::new(captured_at));

    match value {
      SlotValue::Basic(v) => entry.basic_insight = Some(v),
      SlotValue::Patterns(v) => entry.pattern_insights = Some(v),
      SlotValue::BodyComposition(v) => entry.body_composition = Some(v),
      SlotValue::Recommendations(v) => entry.recommendations = Some(v),
    }

    if captured_at > entry.captured_at {
      entry.captured_at = captured_at;
    }

    entry.clone()
  }

  /// Clear every entry derived from metrics older than `refreshed_at`.
  ///
  /// A hard refresh of the underlying metrics invalidates all previously
  /// generated insights for every bucket; entries captured at or after the
  /// refresh are preserved. Returns the buckets that were cleared.
  pub fn invalidate_stale(&self, refreshed_at: DateTime<Utc>) -> Vec<RangeBucket> {
    let mut entries = self.entries.lock();
    let stale: Vec<RangeBucket> = entries
      .iter()
      .filter(|(_, e)| e.captured_at < refreshed_at)
      .map(|(b, _)| *b)
      .collect();

    for bucket in &stale {
      entries.remove(bucket);
    }

    stale
  }

  /// Install a persisted entry at startup
  pub fn load_entry(&self, bucket: RangeBucket, entry: InsightCacheEntry) {
    self.entries.lock().insert(bucket, entry);
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
