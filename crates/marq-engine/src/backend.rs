use async_trait::async_trait;
pub use marq_common::error::BackendError;
use marq_common::protocol::{
    Candidate, Cookie, InteractiveElement, Locator, NavigationResult, PageState,
};
use std::time::Duration;

/// The browser/page collaborator the core consumes.
///
/// One backend instance drives exactly one page; concurrent tasks each own
/// their own backend. Methods that mutate the page take `&mut self` so two
/// resolver calls can never race on the same DOM.
#[async_trait]
pub trait PageBackend: Send + Sync {
    /// Launch the backend (start browser, open page).
    async fn launch(&mut self) -> Result<(), BackendError>;

    /// Close the backend and clean up resources.
    async fn close(&mut self) -> Result<(), BackendError>;

    async fn is_ready(&self) -> bool;

    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, BackendError>;

    /// Currently-rendered interactive elements with bounding boxes, in DOM
    /// order. Hidden, zero-size, and covered elements are already excluded.
    /// Must not mutate page state. Fails with `TransientPageState` while
    /// the page is mid-navigation.
    async fn collect_elements(&mut self) -> Result<Vec<InteractiveElement>, BackendError>;

    /// PNG of the current viewport.
    async fn screenshot(&mut self) -> Result<Vec<u8>, BackendError>;

    /// Cheap page fingerprint for verification.
    async fn page_state(&mut self) -> Result<PageState, BackendError>;

    /// Live-page candidates for a locator, with visibility/enabled state.
    async fn query(&mut self, locator: &Locator) -> Result<Vec<Candidate>, BackendError>;

    /// Click a candidate, waiting for actionability up to `timeout`.
    /// Returns `ActionTimeout` if it never becomes actionable.
    async fn click(&mut self, candidate: &Candidate, timeout: Duration)
        -> Result<(), BackendError>;

    /// Clear the field and type `text`, waiting for actionability up to
    /// `timeout`.
    async fn fill(
        &mut self,
        candidate: &Candidate,
        text: &str,
        timeout: Duration,
    ) -> Result<(), BackendError>;

    /// Read back the current value of a form field or editable region.
    async fn read_value(&mut self, candidate: &Candidate) -> Result<String, BackendError>;

    /// Scroll the window vertically by `delta_y` CSS pixels.
    async fn scroll(&mut self, _delta_y: i64) -> Result<(), BackendError> {
        Err(BackendError::NotSupported("scroll".into()))
    }

    /// Let the page settle after an action. The default is a plain sleep;
    /// backends may wait for network or layout idle instead.
    async fn settle(&mut self, ms: u64) -> Result<(), BackendError> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }

    async fn get_cookies(&mut self) -> Result<Vec<Cookie>, BackendError> {
        Err(BackendError::NotSupported("get_cookies".into()))
    }

    async fn set_cookie(&mut self, _cookie: Cookie) -> Result<(), BackendError> {
        Err(BackendError::NotSupported("set_cookie".into()))
    }
}
