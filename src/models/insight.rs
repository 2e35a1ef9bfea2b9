use serde::{Deserialize, Serialize};

/// ---------------------------------------------------------------------------
/// User Profile (needed for generation)
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
  pub age: Option<i64>,
  pub sex: Option<String>,
  pub height_cm: Option<f64>,
  pub weight_kg: Option<f64>,
  pub goal: Option<String>,
}

impl UserProfile {
  /// BMI from stored height/weight, if both are present
  pub fn bmi(&self) -> Option<f64> {
    match (self.height_cm, self.weight_kg) {
      (Some(h), Some(w)) if h > 0.0 => {
        let m = h / 100.0;
        Some(w / (m * m))
      }
      _ => None,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Generator-Produced Insights (expensive, cached per bucket)
/// ---------------------------------------------------------------------------

/// One category of the efficiency insight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightCategory {
  pub category: String,
  pub title: String,
  pub body: String,
}

/// Categorized efficiency insight returned by the generator.
///
/// The generator may return malformed or empty content; callers must check
/// `is_valid()` before treating the result as final.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategorizedInsight {
  pub categories: Vec<InsightCategory>,
}

impl CategorizedInsight {
  pub fn is_valid(&self) -> bool {
    !self.categories.is_empty()
      && self
        .categories
        .iter()
        .all(|c| !c.title.trim().is_empty() && !c.body.trim().is_empty())
  }
}

/// Recommendations returned by the generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
  pub items: Vec<RecommendationItem>,
  pub focus_area: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationItem {
  pub title: String,
  pub detail: String,
  pub priority: Option<i64>,
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
