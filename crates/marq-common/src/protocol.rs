use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Viewport-pixel bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Euclidean distance between the centers of two boxes.
    pub fn center_distance(&self, other: &Rect) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }

    /// A box is degenerate when it cannot be clicked.
    pub fn is_degenerate(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// One interactive DOM element captured by an extraction pass.
///
/// Snapshots are immutable: a fresh pass produces fresh elements and the
/// previous set is superseded wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractiveElement {
    /// Visible label text, possibly empty.
    #[serde(default)]
    pub text: String,
    /// Semantic role ("link", "button", "input", ...). Falls back to tag name.
    pub role: String,
    /// Input type for form fields ("text", "email", ...), empty otherwise.
    #[serde(default, rename = "inputType")]
    pub input_type: String,
    #[serde(rename = "boundingBox")]
    pub bounding_box: Rect,
    /// Structural locator captured at extraction time (CSS).
    pub selector: String,
    #[serde(default, rename = "ariaLabel")]
    pub aria_label: String,
}

impl InteractiveElement {
    /// Lowercased, whitespace-collapsed text used for duplicate detection
    /// and role+text matching.
    pub fn normalized_text(&self) -> String {
        normalize_text(&self.text)
    }

    pub fn has_label(&self) -> bool {
        !self.text.trim().is_empty() || !self.aria_label.trim().is_empty()
    }
}

/// Collapse whitespace runs and lowercase.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Marker ID -> element mapping for one snapshot.
///
/// IDs are dense starting at 1 in priority order. The mapping is only
/// meaningful paired with the marked image from the same iteration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkerMapping {
    pub markers: BTreeMap<u32, InteractiveElement>,
}

impl MarkerMapping {
    pub fn get(&self, id: u32) -> Option<&InteractiveElement> {
        self.markers.get(&id)
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Textual element list sent to the oracle alongside the marked image.
    /// Order follows marker IDs, which is priority order.
    pub fn element_list_text(&self) -> String {
        let mut lines = vec!["Available elements (numbered in screenshot):".to_string()];
        for (id, elem) in &self.markers {
            let mut text = elem.text.trim().to_string();
            if text.is_empty() {
                text = elem.aria_label.trim().to_string();
            }
            // Cap by characters, not bytes: labels can be arbitrary UTF-8.
            if text.chars().count() > 50 {
                text = text.chars().take(50).collect();
            }
            if text.is_empty() {
                lines.push(format!("  [{}] {}", id, elem.role));
            } else {
                lines.push(format!("  [{}] {}: \"{}\"", id, elem.role, text));
            }
        }
        lines.join("\n")
    }
}

/// What the oracle asked the loop to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    Fill,
    Scroll,
    Wait,
    Done,
    Abort,
}

/// A single structured decision returned by the oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDecision {
    pub action: ActionKind,
    /// Marker number from the annotated screenshot. Required for click/fill.
    #[serde(default, rename = "element_id")]
    pub marker_id: Option<u32>,
    /// Text payload. Required for fill.
    #[serde(default)]
    pub text: Option<String>,
    /// Free-form rationale, recorded but never interpreted.
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ActionDecision {
    /// Field-presence validation. A decision that fails here is an oracle
    /// contract violation, not a resolver input.
    pub fn validate(&self) -> Result<(), DecisionError> {
        match self.action {
            ActionKind::Click => {
                if self.marker_id.is_none() {
                    return Err(DecisionError::MissingMarker("click"));
                }
            }
            ActionKind::Fill => {
                if self.marker_id.is_none() {
                    return Err(DecisionError::MissingMarker("fill"));
                }
                if self.text.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    return Err(DecisionError::MissingText);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DecisionError {
    #[error("{0} decision is missing element_id")]
    MissingMarker(&'static str),
    #[error("fill decision is missing text")]
    MissingText,
    #[error("unrecognized decision payload: {0}")]
    Unrecognized(String),
}

/// Which fallback strategy re-located the element at resolution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    ExactText,
    AriaLabel,
    RoleText,
    Selector,
}

impl Strategy {
    pub const ORDER: [Strategy; 4] = [
        Strategy::ExactText,
        Strategy::AriaLabel,
        Strategy::RoleText,
        Strategy::Selector,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Succeeded,
    NotFound,
    Ambiguous,
    TimedOut,
}

/// Outcome of turning a marker into an executed DOM action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub status: ResolutionStatus,
    /// Strategy that produced the acted-on candidate, if any.
    pub strategy_used: Option<Strategy>,
    /// Number of strategies attempted against the live page.
    pub attempts_made: u32,
}

impl ResolutionResult {
    pub fn succeeded(strategy: Strategy, attempts: u32) -> Self {
        Self {
            status: ResolutionStatus::Succeeded,
            strategy_used: Some(strategy),
            attempts_made: attempts,
        }
    }

    pub fn failed(status: ResolutionStatus, attempts: u32) -> Self {
        Self {
            status,
            strategy_used: None,
            attempts_made: attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResolutionStatus::Succeeded
    }
}

/// How the resolver asks the live page for candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Locator {
    /// Exact visible-text match.
    Text { text: String },
    /// Exact aria-label match.
    AriaLabel { label: String },
    /// Role plus case/whitespace-insensitive text match.
    RoleText { role: String, text: String },
    /// Structural CSS selector captured at extraction time.
    Selector { selector: String },
}

/// A live-page element returned by a locator query. The token is an opaque
/// backend handle valid until the next navigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub token: u32,
    pub rect: Rect,
    pub visible: bool,
    pub enabled: bool,
}

/// Coarse page fingerprint used for action verification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageState {
    pub url: String,
    pub title: String,
    pub element_count: u64,
    pub modal_count: u64,
    pub form_count: u64,
}

impl PageState {
    /// Whether the transition from `self` to `after` counts as an
    /// observable effect: URL change, modal appearing/closing, or a DOM
    /// delta larger than noise.
    pub fn observable_change(&self, after: &PageState) -> bool {
        const ELEMENT_NOISE: i64 = 5;
        self.url != after.url
            || self.modal_count != after.modal_count
            || (self.element_count as i64 - after.element_count as i64).abs() > ELEMENT_NOISE
    }
}

#[derive(Debug, Clone)]
pub struct NavigationResult {
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
}

/// Parsed natural-language query: which app, and what to do there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub app: String,
    pub task: String,
}

impl TaskSpec {
    /// Fallback used when the query cannot be parsed.
    pub fn raw(query: &str) -> Self {
        Self {
            app: "other".to_string(),
            task: query.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elem(text: &str, role: &str) -> InteractiveElement {
        InteractiveElement {
            text: text.to_string(),
            role: role.to_string(),
            input_type: String::new(),
            bounding_box: Rect {
                x: 10.0,
                y: 10.0,
                width: 80.0,
                height: 24.0,
            },
            selector: "#x".to_string(),
            aria_label: String::new(),
        }
    }

    #[test]
    fn normalized_text_collapses_whitespace_and_case() {
        assert_eq!(normalize_text("  New\n  Project "), "new project");
        assert_eq!(elem("Sign  In", "button").normalized_text(), "sign in");
    }

    #[test]
    fn rect_overlap_and_distance() {
        let a = Rect {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
        };
        let b = Rect {
            x: 5.0,
            y: 5.0,
            width: 10.0,
            height: 10.0,
        };
        let c = Rect {
            x: 20.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
        };
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(a.center_distance(&a) < f32::EPSILON);
    }

    #[test]
    fn decision_validation() {
        let ok = ActionDecision {
            action: ActionKind::Fill,
            marker_id: Some(3),
            text: Some("hello".into()),
            reasoning: None,
            description: None,
        };
        assert!(ok.validate().is_ok());

        let no_marker = ActionDecision {
            action: ActionKind::Click,
            marker_id: None,
            text: None,
            reasoning: None,
            description: None,
        };
        assert_eq!(
            no_marker.validate(),
            Err(DecisionError::MissingMarker("click"))
        );

        let no_text = ActionDecision {
            action: ActionKind::Fill,
            marker_id: Some(1),
            text: Some("   ".into()),
            reasoning: None,
            description: None,
        };
        assert_eq!(no_text.validate(), Err(DecisionError::MissingText));
    }

    #[test]
    fn decision_deserializes_oracle_shape() {
        let json = r#"{"action":"click","element_id":4,"reasoning":"it is the button"}"#;
        let d: ActionDecision = serde_json::from_str(json).unwrap();
        assert_eq!(d.action, ActionKind::Click);
        assert_eq!(d.marker_id, Some(4));
        assert!(d.validate().is_ok());
    }

    #[test]
    fn element_list_text_preserves_marker_order() {
        let mut mapping = MarkerMapping::default();
        mapping.markers.insert(2, elem("Second", "link"));
        mapping.markers.insert(1, elem("First", "button"));
        let text = mapping.element_list_text();
        let first = text.find("[1] button: \"First\"").unwrap();
        let second = text.find("[2] link: \"Second\"").unwrap();
        assert!(first < second);
    }

    #[test]
    fn element_list_text_truncates_multibyte_labels_safely() {
        let mut mapping = MarkerMapping::default();
        // 20 chars, 60 bytes: a byte-indexed cut at 50 would split a char.
        mapping.markers.insert(1, elem(&"€".repeat(20), "button"));
        mapping.markers.insert(2, elem(&"€".repeat(80), "link"));
        let text = mapping.element_list_text();
        assert!(text.contains(&format!("\"{}\"", "€".repeat(20))));
        assert!(text.contains(&format!("\"{}\"", "€".repeat(50))));
        assert!(!text.contains(&"€".repeat(51)));
    }

    #[test]
    fn observable_change_thresholds() {
        let before = PageState {
            url: "https://a/".into(),
            title: "A".into(),
            element_count: 100,
            modal_count: 0,
            form_count: 0,
        };
        let mut after = before.clone();
        assert!(!before.observable_change(&after));

        after.element_count = 104;
        assert!(!before.observable_change(&after));
        after.element_count = 106;
        assert!(before.observable_change(&after));

        after = before.clone();
        after.modal_count = 1;
        assert!(before.observable_change(&after));
    }
}
