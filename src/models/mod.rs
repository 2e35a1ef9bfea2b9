pub mod insight;
pub mod metrics;

pub use insight::{
  CategorizedInsight, InsightCategory, RecommendationItem, Recommendations, UserProfile,
};
pub use metrics::{DailyMetricsRecord, MetricsAggregate, RangeBucket, WorkoutEntry};
