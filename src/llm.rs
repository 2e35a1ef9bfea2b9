//! LLM integration for health insight generation
//!
//! This module owns the `InsightGenerator` seam the coordinator calls
//! through, and the Claude-backed implementation of it. The generator is a
//! black box: it may be slow, and it may return content that fails the
//! validity predicate, which the coordinator handles with bounded retry.

use crate::analysis::{BodyCompositionPrediction, PatternInsights};
use crate::models::{CategorizedInsight, MetricsAggregate, RangeBucket, Recommendations, UserProfile};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// ---------------------------------------------------------------------------
/// Configuration
/// ---------------------------------------------------------------------------

const CLAUDE_API_BASE: &str = "https://api.anthropic.com";
const CLAUDE_MODEL: &str = "claude-sonnet-4-20250514";
const API_VERSION: &str = "2023-06-01";

/// ---------------------------------------------------------------------------
/// Error Types
/// ---------------------------------------------------------------------------

#[derive(Error, Debug, Serialize)]
pub enum LlmError {
  #[error("API key not configured")]
  MissingApiKey,

  #[error("Request failed: {0}")]
  Request(String),

  #[error("API error: {0}")]
  Api(String),

  #[error("Parse error: {0}")]
  Parse(String),
}

/// ---------------------------------------------------------------------------
/// Insight Generator Seam
/// ---------------------------------------------------------------------------

/// Black-box generator of AI-derived insight artifacts.
///
/// `generate_efficiency_insight` results must be checked with
/// `CategorizedInsight::is_valid`; the coordinator owns the retry policy.
#[async_trait]
pub trait InsightGenerator: Send + Sync {
  async fn generate_efficiency_insight(
    &self,
    profile: &UserProfile,
    metrics: &MetricsAggregate,
    range_type: RangeBucket,
  ) -> Result<CategorizedInsight, LlmError>;

  async fn generate_recommendations(
    &self,
    profile: &UserProfile,
    patterns: &PatternInsights,
    body_composition: &BodyCompositionPrediction,
    range_type: RangeBucket,
    day_count: usize,
    avg_steps: Option<f64>,
  ) -> Result<Option<Recommendations>, LlmError>;
}

/// ---------------------------------------------------------------------------
/// Claude API Types
/// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ClaudeRequest {
  model: String,
  max_tokens: u32,
  system: String,
  messages: Vec<ClaudeMessage>,
}

#[derive(Debug, Serialize)]
struct ClaudeMessage {
  role: String,
  content: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
  content: Vec<ContentBlock>,
  #[allow(dead_code)]
  model: String,
  #[allow(dead_code)]
  stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
  #[serde(rename = "type")]
  content_type: String,
  text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClaudeErrorResponse {
  error: ClaudeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ClaudeErrorDetail {
  message: String,
}

/// ---------------------------------------------------------------------------
/// Claude Client
/// ---------------------------------------------------------------------------

pub struct ClaudeClient {
  client: Client,
  api_key: String,
  base_url: String,
}

impl ClaudeClient {
  /// Create a new Claude client, loading API key from environment.
  /// A `.env` file is picked up if present; real environment variables win.
  pub fn from_env() -> Result<Self, LlmError> {
    dotenvy::dotenv().ok();
    let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| LlmError::MissingApiKey)?;

    Ok(Self {
      client: Client::new(),
      api_key,
      base_url: CLAUDE_API_BASE.to_string(),
    })
  }

  /// Client against a non-default endpoint (mock servers in tests)
  pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
    Self {
      client: Client::new(),
      api_key: api_key.into(),
      base_url: base_url.into(),
    }
  }

  /// Call Claude with a system prompt and user message
  async fn complete(
    &self,
    system_prompt: &str,
    user_message: &str,
    max_tokens: u32,
  ) -> Result<String, LlmError> {
    let request = ClaudeRequest {
      model: CLAUDE_MODEL.to_string(),
      max_tokens,
      system: system_prompt.to_string(),
      messages: vec![ClaudeMessage {
        role: "user".to_string(),
        content: user_message.to_string(),
      }],
    };

    let response = self
      .client
      .post(format!("{}/v1/messages", self.base_url))
      .header("x-api-key", &self.api_key)
      .header("anthropic-version", API_VERSION)
      .header("content-type", "application/json")
      .json(&request)
      .send()
      .await
      .map_err(|e| LlmError::Request(e.to_string()))?;

    let status = response.status();
    let body = response
      .text()
      .await
      .map_err(|e| LlmError::Request(e.to_string()))?;

    if !status.is_success() {
      // Try to parse error response
      if let Ok(error_resp) = serde_json::from_str::<ClaudeErrorResponse>(&body) {
        return Err(LlmError::Api(error_resp.error.message));
      }
      return Err(LlmError::Api(format!("HTTP {}: {}", status, body)));
    }

    let claude_response: ClaudeResponse =
      serde_json::from_str(&body).map_err(|e| LlmError::Parse(e.to_string()))?;

    // Extract text from the first text content block
    claude_response
      .content
      .iter()
      .find(|c| c.content_type == "text")
      .and_then(|c| c.text.clone())
      .ok_or_else(|| LlmError::Parse("No text content in response".to_string()))
  }
}

#[async_trait]
impl InsightGenerator for ClaudeClient {
  async fn generate_efficiency_insight(
    &self,
    profile: &UserProfile,
    metrics: &MetricsAggregate,
    range_type: RangeBucket,
  ) -> Result<CategorizedInsight, LlmError> {
    let system_prompt = include_str!("prompts/insight_system.txt");

    let context = serde_json::json!({
      "range": range_type.as_str(),
      "profile": profile,
      "metrics": metrics,
    });

    let user_message = format!(
      r#"Generate categorized efficiency insights for this health data.

CONTEXT:
{}

Respond with valid JSON matching the OUTPUT FORMAT specified in your instructions."#,
      context
    );

    let response_text = self.complete(system_prompt, &user_message, 1024).await?;
    let json_str = extract_json(&response_text)?;

    serde_json::from_str(&json_str).map_err(|e| LlmError::Parse(format!("{}: {}", e, json_str)))
  }

  async fn generate_recommendations(
    &self,
    profile: &UserProfile,
    patterns: &PatternInsights,
    body_composition: &BodyCompositionPrediction,
    range_type: RangeBucket,
    day_count: usize,
    avg_steps: Option<f64>,
  ) -> Result<Option<Recommendations>, LlmError> {
    let system_prompt = include_str!("prompts/recommendation_system.txt");

    let context = serde_json::json!({
      "range": range_type.as_str(),
      "day_count": day_count,
      "avg_steps": avg_steps,
      "profile": profile,
      "patterns": patterns,
      "body_composition": body_composition,
    });

    let user_message = format!(
      r#"Generate personalized health recommendations from this context.

CONTEXT:
{}

Respond with valid JSON matching the OUTPUT FORMAT specified in your instructions."#,
      context
    );

    let response_text = self.complete(system_prompt, &user_message, 1024).await?;
    let json_str = extract_json(&response_text)?;

    let recommendations: Recommendations =
      serde_json::from_str(&json_str).map_err(|e| LlmError::Parse(format!("{}: {}", e, json_str)))?;

    if recommendations.items.is_empty() {
      Ok(None)
    } else {
      Ok(Some(recommendations))
    }
  }
}

/// Extract JSON from the model's response (handles markdown code blocks)
fn extract_json(text: &str) -> Result<String, LlmError> {
  // Try direct parse first
  if text.trim().starts_with('{') {
    return Ok(text.trim().to_string());
  }

  // Look for JSON in code blocks
  if let Some(start) = text.find("```json") {
    let start = start + 7;
    if let Some(end) = text[start..].find("```") {
      return Ok(text[start..start + end].trim().to_string());
    }
  }

  // Look for plain code blocks
  if let Some(start) = text.find("```") {
    let start = start + 3;
    // Skip language identifier if present
    let content_start = text[start..]
      .find('\n')
      .map(|i| start + i + 1)
      .unwrap_or(start);
    if let Some(end) = text[content_start..].find("```") {
      return Ok(text[content_start..content_start + end].trim().to_string());
    }
  }

  // Last resort: find first { to last }
  if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
    return Ok(text[start..=end].to_string());
  }

  Err(LlmError::Parse("Could not extract JSON from response".to_string()))
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
