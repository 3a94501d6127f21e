//! Decision oracle adapter.
//!
//! The oracle is a capability boundary: one call takes the marked image,
//! the element list, and the task, and returns one structured decision.
//! Everything about how the model reasons stays behind this trait so
//! tests can swap in a deterministic stub.

pub mod prompts;

use async_trait::async_trait;
use base64::Engine as _;
use marq_common::error::OracleError;
use marq_common::protocol::{ActionDecision, ActionKind, MarkerMapping, PageState, TaskSpec};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// One entry of the action history shown back to the oracle.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub action: ActionKind,
    pub description: String,
}

/// Everything the oracle gets to see for one decision.
pub struct DecisionRequest<'a> {
    pub task: &'a str,
    pub app: &'a str,
    pub marked_image_png: &'a [u8],
    pub mapping: &'a MarkerMapping,
    pub page: &'a PageState,
    pub history: &'a [HistoryEntry],
    pub is_initial: bool,
    /// Set after a failed or malformed previous decision so the oracle can
    /// correct course.
    pub corrective_note: Option<&'a str>,
}

#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(&self, request: DecisionRequest<'_>) -> Result<ActionDecision, OracleError>;

    /// Extract app + task from a natural-language query. Implementations
    /// without query parsing fall back to the raw query.
    async fn parse_query(&self, query: &str) -> Result<TaskSpec, OracleError> {
        Ok(TaskSpec::raw(query))
    }
}

/// Configuration for the OpenAI-compatible vision oracle.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout: Duration,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 1024,
            temperature: 0.7,
            request_timeout: Duration::from_secs(90),
        }
    }
}

/// Vision-capable chat-completions client used as the decision oracle.
pub struct OpenAiOracle {
    client: reqwest::Client,
    config: OracleConfig,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl OpenAiOracle {
    pub fn new(config: OracleConfig) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| OracleError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn chat(&self, messages: serde_json::Value) -> Result<String, OracleError> {
        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "response_format": { "type": "json_object" },
            "messages": messages,
        });

        let url = format!("{}/chat/completions", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(OracleError::Http(format!("{}: {}", status, text)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Decode(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| OracleError::Decode("response contained no choices".into()))
    }
}

#[async_trait]
impl DecisionOracle for OpenAiOracle {
    async fn decide(&self, request: DecisionRequest<'_>) -> Result<ActionDecision, OracleError> {
        let prompt = prompts::decision_prompt(&request);
        let image = base64::engine::general_purpose::STANDARD.encode(request.marked_image_png);
        let data_url = format!("data:image/png;base64,{}", image);

        let messages = json!([
            { "role": "system", "content": prompts::SYSTEM_PROMPT },
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": data_url, "detail": "high" } },
                ]
            }
        ]);

        let content = self.chat(messages).await?;
        let decision = parse_decision(&content)?;
        debug!(action = ?decision.action, marker = ?decision.marker_id, "oracle decision");
        Ok(decision)
    }

    async fn parse_query(&self, query: &str) -> Result<TaskSpec, OracleError> {
        let messages = json!([
            { "role": "system", "content": "You are a query parser. Respond only with valid JSON." },
            { "role": "user", "content": prompts::query_parser_prompt(query) }
        ]);

        match self.chat(messages).await {
            Ok(content) => {
                let stripped = strip_code_fences(&content);
                match serde_json::from_str::<TaskSpec>(stripped) {
                    Ok(spec) => Ok(spec),
                    Err(e) => {
                        warn!(%e, "query parse fell back to raw task");
                        Ok(TaskSpec::raw(query))
                    }
                }
            }
            Err(e) => {
                warn!(%e, "query parse request failed, using raw task");
                Ok(TaskSpec::raw(query))
            }
        }
    }
}

/// Parse an oracle reply into a validated decision. Any shape problem is
/// a contract violation, which the workflow treats as a retried no-op.
pub fn parse_decision(content: &str) -> Result<ActionDecision, OracleError> {
    let stripped = strip_code_fences(content);
    let decision: ActionDecision = serde_json::from_str(stripped)
        .map_err(|e| OracleError::Contract(format!("malformed decision JSON: {}", e)))?;
    decision
        .validate()
        .map_err(|e| OracleError::Contract(e.to_string()))?;
    Ok(decision)
}

/// Models sometimes wrap JSON in markdown fences despite instructions.
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences() {
        assert_eq!(
            strip_code_fences("```json\n{\"a\":1}\n```"),
            "{\"a\":1}"
        );
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn parse_decision_accepts_valid_click() {
        let d = parse_decision(r#"{"action":"click","element_id":2,"reasoning":"r"}"#).unwrap();
        assert_eq!(d.action, ActionKind::Click);
        assert_eq!(d.marker_id, Some(2));
    }

    #[test]
    fn parse_decision_rejects_missing_fields() {
        let err = parse_decision(r#"{"action":"fill","element_id":2}"#).unwrap_err();
        assert!(matches!(err, OracleError::Contract(_)));

        let err = parse_decision("not json at all").unwrap_err();
        assert!(matches!(err, OracleError::Contract(_)));
    }
}
