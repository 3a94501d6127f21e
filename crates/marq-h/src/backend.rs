use crate::cdp::CdpClient;
use crate::inject::{self, execute};
use async_trait::async_trait;
use marq_common::protocol::{
    Candidate, Cookie, InteractiveElement, Locator, NavigationResult, PageState,
};
use marq_engine::backend::{BackendError, PageBackend};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How often actionability is re-checked while waiting out a timeout.
const ACTIONABILITY_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub visible: bool,
    /// Named session whose browser profile persists across runs.
    pub session: Option<String>,
    pub viewport: Option<(u32, u32)>,
}

pub struct HeadlessBackend {
    client: Option<CdpClient>,
    options: LaunchOptions,
}

impl HeadlessBackend {
    pub fn new(options: LaunchOptions) -> Self {
        Self {
            client: None,
            options,
        }
    }

    fn client(&self) -> Result<&CdpClient, BackendError> {
        self.client.as_ref().ok_or(BackendError::NotReady)
    }

    async fn agent(&self, params: serde_json::Value) -> Result<serde_json::Value, BackendError> {
        let client = self.client()?;
        execute(&client.page, params).await.map_err(map_agent_err)
    }

    async fn get_navigation_result(
        page: &chromiumoxide::Page,
    ) -> Result<NavigationResult, BackendError> {
        let title = page
            .get_title()
            .await
            .unwrap_or_default()
            .unwrap_or_default();
        let url = page
            .url()
            .await
            .map_err(|e| BackendError::Navigation(e.to_string()))?
            .unwrap_or_default();
        Ok(NavigationResult { url, title })
    }

    /// Poll until the token's element is actionable or the timeout runs
    /// out. Ambient overlays and animations clear within a few polls; a
    /// full timeout means the element genuinely is not interactable.
    async fn wait_actionable(
        &mut self,
        token: u32,
        timeout: Duration,
    ) -> Result<(), BackendError> {
        let deadline = Instant::now() + timeout;
        loop {
            let actionable = self
                .agent(json!({"action": "is_actionable", "token": token}))
                .await?
                .as_bool()
                .unwrap_or(false);
            if actionable {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BackendError::ActionTimeout(format!(
                    "token {} not actionable within {:?}",
                    token, timeout
                )));
            }
            tokio::time::sleep(ACTIONABILITY_POLL).await;
        }
    }
}

#[async_trait]
impl PageBackend for HeadlessBackend {
    async fn launch(&mut self) -> Result<(), BackendError> {
        info!("Launching Chromium backend...");
        let viewport = self.options.viewport.unwrap_or((1280, 800));
        let client = CdpClient::launch(self.options.visible, self.options.session.as_deref(), viewport)
            .await
            .map_err(|e| BackendError::Other(e.to_string()))?;
        self.client = Some(client);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        if let Some(client) = self.client.take() {
            client
                .close()
                .await
                .map_err(|e| BackendError::Other(e.to_string()))?;
        }
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        self.client.is_some()
    }

    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, BackendError> {
        let client = self.client()?;
        info!("Navigating to: {}", url);
        client
            .page
            .goto(url)
            .await
            .map_err(|e| BackendError::Navigation(e.to_string()))?;
        Self::get_navigation_result(&client.page).await
    }

    async fn collect_elements(&mut self) -> Result<Vec<InteractiveElement>, BackendError> {
        let value = self.agent(json!({"action": "collect"})).await?;
        let elements: Vec<InteractiveElement> = serde_json::from_value(value)?;
        debug!(count = elements.len(), "collected interactive elements");
        Ok(elements)
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BackendError> {
        let client = self.client()?;
        let bytes = client
            .page
            .screenshot(chromiumoxide::page::ScreenshotParams::builder().build())
            .await
            .map_err(|e| BackendError::Other(format!("Screenshot failed: {}", e)))?;
        Ok(bytes)
    }

    async fn page_state(&mut self) -> Result<PageState, BackendError> {
        let value = self.agent(json!({"action": "page_state"})).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn query(&mut self, locator: &Locator) -> Result<Vec<Candidate>, BackendError> {
        let value = self
            .agent(json!({"action": "query", "locator": locator}))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn click(
        &mut self,
        candidate: &Candidate,
        timeout: Duration,
    ) -> Result<(), BackendError> {
        self.wait_actionable(candidate.token, timeout).await?;
        self.agent(json!({"action": "act", "kind": "click", "token": candidate.token}))
            .await?;
        Ok(())
    }

    async fn fill(
        &mut self,
        candidate: &Candidate,
        text: &str,
        timeout: Duration,
    ) -> Result<(), BackendError> {
        self.wait_actionable(candidate.token, timeout).await?;
        self.agent(json!({
            "action": "act",
            "kind": "fill",
            "token": candidate.token,
            "text": text,
        }))
        .await?;
        Ok(())
    }

    async fn read_value(&mut self, candidate: &Candidate) -> Result<String, BackendError> {
        let value = self
            .agent(json!({"action": "read_value", "token": candidate.token}))
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn scroll(&mut self, delta_y: i64) -> Result<(), BackendError> {
        self.agent(json!({"action": "scroll", "deltaY": delta_y}))
            .await?;
        Ok(())
    }

    async fn get_cookies(&mut self) -> Result<Vec<Cookie>, BackendError> {
        let client = self.client()?;
        let cookies = client
            .page
            .get_cookies()
            .await
            .map_err(|e| BackendError::Other(format!("Get cookies failed: {}", e)))?;

        Ok(cookies
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: Some(c.domain),
                path: Some(c.path),
                expires: Some(c.expires),
            })
            .collect())
    }

    async fn set_cookie(&mut self, cookie: Cookie) -> Result<(), BackendError> {
        use chromiumoxide::cdp::browser_protocol::network::CookieParam;

        let client = self.client()?;
        let mut builder = CookieParam::builder()
            .name(cookie.name)
            .value(cookie.value);
        if let Some(domain) = cookie.domain {
            builder = builder.domain(domain);
        }
        if let Some(path) = cookie.path {
            builder = builder.path(path);
        }
        let param = builder
            .build()
            .map_err(|e| BackendError::Other(format!("Invalid cookie: {}", e)))?;

        client
            .page
            .set_cookie(param)
            .await
            .map_err(|e| BackendError::Other(format!("Set cookie failed: {}", e)))?;
        Ok(())
    }
}

/// Script-context loss during navigation is transient and surfaced as such
/// so the engine settles and retries instead of failing the run.
fn map_agent_err(e: Box<dyn std::error::Error + Send + Sync>) -> BackendError {
    let msg = e.to_string();
    if inject::is_context_error(&msg) {
        BackendError::TransientPageState(msg)
    } else {
        BackendError::Script(msg)
    }
}
