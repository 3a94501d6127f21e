//! Shared test doubles: a scripted page backend and a scripted oracle.
#![allow(dead_code)]

use async_trait::async_trait;
use marq_common::error::{BackendError, OracleError};
use marq_common::protocol::{
    ActionDecision, Candidate, InteractiveElement, Locator, NavigationResult, PageState, Rect,
    TaskSpec,
};
use marq_engine::backend::PageBackend;
use marq_engine::oracle::{DecisionOracle, DecisionRequest};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;

pub fn make_element(text: &str, role: &str, selector: &str, x: f32, y: f32) -> InteractiveElement {
    InteractiveElement {
        text: text.to_string(),
        role: role.to_string(),
        input_type: String::new(),
        bounding_box: Rect {
            x,
            y,
            width: 80.0,
            height: 24.0,
        },
        selector: selector.to_string(),
        aria_label: String::new(),
    }
}

pub fn candidate(token: u32, x: f32, y: f32) -> Candidate {
    Candidate {
        token,
        rect: Rect {
            x,
            y,
            width: 80.0,
            height: 24.0,
        },
        visible: true,
        enabled: true,
    }
}

pub fn blank_png() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(320, 240, image::Rgba([255, 255, 255, 255]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut out), image::ImageOutputFormat::Png)
        .expect("png encode");
    out
}

/// Scripted backend: query responses come from an exact-match plan, page
/// states from a queue, and every mutation is recorded for assertions.
pub struct MockBackend {
    pub elements: Vec<InteractiveElement>,
    pub query_plan: Vec<(Locator, Vec<Candidate>)>,
    pub states: VecDeque<PageState>,
    /// Errors returned by collect_elements, one per call, before the
    /// scripted elements become available.
    pub collect_errors: VecDeque<BackendError>,
    pub click_error: Option<String>,
    pub readback_override: Option<String>,

    pub query_log: Vec<Locator>,
    pub clicks: Vec<u32>,
    pub fills: Vec<(u32, String)>,
    pub collect_calls: u32,
    pub navigations: Vec<String>,
    last_fill: Option<String>,
}

impl MockBackend {
    pub fn new(elements: Vec<InteractiveElement>) -> Self {
        Self {
            elements,
            query_plan: Vec::new(),
            states: VecDeque::new(),
            collect_errors: VecDeque::new(),
            click_error: None,
            readback_override: None,
            query_log: Vec::new(),
            clicks: Vec::new(),
            fills: Vec::new(),
            collect_calls: 0,
            navigations: Vec::new(),
            last_fill: None,
        }
    }

    pub fn with_query(mut self, locator: Locator, result: Vec<Candidate>) -> Self {
        self.query_plan.push((locator, result));
        self
    }

    pub fn with_states(mut self, states: Vec<PageState>) -> Self {
        self.states = states.into();
        self
    }

    pub fn with_collect_errors(mut self, errors: Vec<BackendError>) -> Self {
        self.collect_errors = errors.into();
        self
    }
}

#[async_trait]
impl PageBackend for MockBackend {
    async fn launch(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        true
    }

    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, BackendError> {
        self.navigations.push(url.to_string());
        Ok(NavigationResult {
            url: url.to_string(),
            title: "mock".to_string(),
        })
    }

    async fn collect_elements(&mut self) -> Result<Vec<InteractiveElement>, BackendError> {
        self.collect_calls += 1;
        if let Some(err) = self.collect_errors.pop_front() {
            return Err(err);
        }
        Ok(self.elements.clone())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BackendError> {
        Ok(blank_png())
    }

    async fn page_state(&mut self) -> Result<PageState, BackendError> {
        if self.states.len() > 1 {
            Ok(self.states.pop_front().unwrap_or_default())
        } else {
            Ok(self.states.front().cloned().unwrap_or_default())
        }
    }

    async fn query(&mut self, locator: &Locator) -> Result<Vec<Candidate>, BackendError> {
        self.query_log.push(locator.clone());
        Ok(self
            .query_plan
            .iter()
            .find(|(l, _)| l == locator)
            .map(|(_, c)| c.clone())
            .unwrap_or_default())
    }

    async fn click(
        &mut self,
        candidate: &Candidate,
        _timeout: Duration,
    ) -> Result<(), BackendError> {
        if let Some(msg) = &self.click_error {
            return Err(BackendError::ActionTimeout(msg.clone()));
        }
        self.clicks.push(candidate.token);
        Ok(())
    }

    async fn fill(
        &mut self,
        candidate: &Candidate,
        text: &str,
        _timeout: Duration,
    ) -> Result<(), BackendError> {
        self.fills.push((candidate.token, text.to_string()));
        self.last_fill = Some(text.to_string());
        Ok(())
    }

    async fn read_value(&mut self, _candidate: &Candidate) -> Result<String, BackendError> {
        if let Some(v) = &self.readback_override {
            return Ok(v.clone());
        }
        Ok(self.last_fill.clone().unwrap_or_default())
    }

    async fn scroll(&mut self, _delta_y: i64) -> Result<(), BackendError> {
        Ok(())
    }

    async fn settle(&mut self, _ms: u64) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Scripted oracle: pops one result per decide() call and records the
/// corrective notes it was shown.
pub struct StubOracle {
    decisions: Mutex<VecDeque<Result<ActionDecision, OracleError>>>,
    pub notes: Mutex<Vec<Option<String>>>,
}

impl StubOracle {
    pub fn new(decisions: Vec<Result<ActionDecision, OracleError>>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
            notes: Mutex::new(Vec::new()),
        }
    }

    pub fn seen_notes(&self) -> Vec<Option<String>> {
        self.notes.lock().expect("notes lock").clone()
    }
}

#[async_trait]
impl DecisionOracle for StubOracle {
    async fn decide(&self, request: DecisionRequest<'_>) -> Result<ActionDecision, OracleError> {
        self.notes
            .lock()
            .expect("notes lock")
            .push(request.corrective_note.map(String::from));
        self.decisions
            .lock()
            .expect("decisions lock")
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::Http("script exhausted".into())))
    }

    async fn parse_query(&self, query: &str) -> Result<TaskSpec, OracleError> {
        Ok(TaskSpec::raw(query))
    }
}

/// An oracle whose decisions never arrive. The run has to be unblocked by
/// cancellation or the decision timeout.
pub struct PendingOracle;

#[async_trait]
impl DecisionOracle for PendingOracle {
    async fn decide(&self, _request: DecisionRequest<'_>) -> Result<ActionDecision, OracleError> {
        std::future::pending().await
    }
}
