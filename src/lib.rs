//! Core engine for a personal health-metrics dashboard.
//!
//! Keeps a day-indexed cache of daily health metrics fresh against an
//! external source, serves range-filtered aggregations synchronously, and
//! coordinates expensive AI-generated insights per range bucket with
//! debouncing, cooperative cancellation, and bounded retry. Presentation is
//! out of scope; the coordinator pushes updates to a channel the UI layer
//! subscribes to.

pub mod analysis;
pub mod coordinator;
pub mod db;
pub mod insight_cache;
pub mod llm;
pub mod metrics_cache;
pub mod models;
pub mod source;
pub mod store;
pub mod sync;

#[cfg(test)]
pub mod test_utils;

pub use coordinator::{DashboardError, DashboardUpdate, LoadCoordinator, LoadPhase};
pub use insight_cache::{InsightCacheEntry, InsightResponseCache, SlotValue};
pub use llm::{ClaudeClient, InsightGenerator, LlmError};
pub use metrics_cache::{MetricsCache, SharedMetricsCache};
pub use models::{DailyMetricsRecord, MetricsAggregate, RangeBucket, UserProfile};
pub use source::{BodyMeasurements, HealthSource, SourceError};
pub use sync::{SyncEngine, SyncError, SyncOutcome};
