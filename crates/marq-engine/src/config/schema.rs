use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Environment variables consulted for the oracle API key, in order.
/// The key never appears in a config file.
pub const API_KEY_ENV_VARS: [&str; 2] = ["MARQ_OPENAI_API_KEY", "OPENAI_API_KEY"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarqConfig {
    #[serde(default)]
    pub oracle: OracleSection,
    #[serde(default)]
    pub workflow: WorkflowSection,
    #[serde(default)]
    pub browser: BrowserSection,
    /// App name -> base URL. Missing apps resolve to a conventional URL.
    #[serde(default = "default_apps")]
    pub apps: BTreeMap<String, String>,
}

impl MarqConfig {
    /// Base URL for an app name coming out of query parsing. Unknown apps
    /// fall back to the conventional `https://app.<name>.com`; the "other"
    /// bucket lands on a neutral page.
    pub fn resolve_app_url(&self, app: &str) -> String {
        if let Some(url) = self.apps.get(app) {
            return url.clone();
        }
        if app == "other" || app.is_empty() {
            return "https://example.com".to_string();
        }
        format!("https://app.{}.com", app)
    }

    /// API key from the environment. Keys are deliberately never read from
    /// config files.
    pub fn api_key_from_env() -> Option<String> {
        API_KEY_ENV_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for OracleSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.7
}

fn default_request_timeout_secs() -> u64 {
    90
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_step_retries")]
    pub max_step_retries: u32,
    #[serde(default = "default_extract_retries")]
    pub extract_retries: u32,
    #[serde(default = "default_element_limit")]
    pub element_limit: usize,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_pixel_tolerance")]
    pub pixel_tolerance: f32,
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,
    #[serde(default = "default_decision_timeout_secs")]
    pub decision_timeout_secs: u64,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_step_retries: default_max_step_retries(),
            extract_retries: default_extract_retries(),
            element_limit: default_element_limit(),
            settle_ms: default_settle_ms(),
            pixel_tolerance: default_pixel_tolerance(),
            action_timeout_ms: default_action_timeout_ms(),
            decision_timeout_secs: default_decision_timeout_secs(),
        }
    }
}

fn default_max_iterations() -> u32 {
    20
}

fn default_max_step_retries() -> u32 {
    3
}

fn default_extract_retries() -> u32 {
    3
}

fn default_element_limit() -> usize {
    50
}

fn default_settle_ms() -> u64 {
    2000
}

fn default_pixel_tolerance() -> f32 {
    40.0
}

fn default_action_timeout_ms() -> u64 {
    10000
}

fn default_decision_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSection {
    #[serde(default)]
    pub headless: bool,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            headless: false,
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
        }
    }
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    800
}

fn default_navigation_timeout_ms() -> u64 {
    30000
}

fn default_apps() -> BTreeMap<String, String> {
    [
        ("asana", "https://app.asana.com"),
        ("notion", "https://www.notion.so"),
        ("linear", "https://linear.app"),
        ("wikipedia", "https://www.wikipedia.org"),
        ("example", "https://example.com"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}
