//! Priority scoring for extracted elements.
//!
//! Extraction order is marker order is what the oracle is told "roughly
//! corresponds to importance", so truncation under a limit must drop the
//! least important elements first. The policy is a pure function over
//! element attributes so it can be tuned without touching extraction or
//! annotation.

use marq_common::protocol::InteractiveElement;

/// Pure scoring policy: higher scores sort first.
pub trait PriorityPolicy: Send + Sync {
    fn score(&self, element: &InteractiveElement) -> f32;
}

/// Default policy: primary navigation roles over decorative ones, labeled
/// elements over unlabeled ones, reading order as the tiebreak.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPriority;

const LABEL_BONUS: f32 = 200.0;

impl DefaultPriority {
    fn role_weight(role: &str) -> f32 {
        match role {
            "button" | "link" | "a" => 500.0,
            "input" | "textarea" | "select" | "searchbox" | "textbox" | "combobox" => 450.0,
            "menuitem" | "tab" => 350.0,
            "checkbox" | "radio" | "switch" => 300.0,
            _ => 100.0,
        }
    }

    /// Reading-order penalty: higher/left elements lose less. The factor
    /// keeps position strictly a tiebreak below the role/label tiers.
    fn position_penalty(element: &InteractiveElement) -> f32 {
        let b = &element.bounding_box;
        (b.y + b.x / 10.0) / 100.0
    }
}

impl PriorityPolicy for DefaultPriority {
    fn score(&self, element: &InteractiveElement) -> f32 {
        let mut score = Self::role_weight(&element.role);
        if element.has_label() {
            score += LABEL_BONUS;
        }
        score - Self::position_penalty(element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marq_common::protocol::Rect;

    fn elem(role: &str, text: &str, y: f32) -> InteractiveElement {
        InteractiveElement {
            text: text.to_string(),
            role: role.to_string(),
            input_type: String::new(),
            bounding_box: Rect {
                x: 0.0,
                y,
                width: 50.0,
                height: 20.0,
            },
            selector: "div".to_string(),
            aria_label: String::new(),
        }
    }

    #[test]
    fn labeled_button_outranks_unlabeled_div() {
        let policy = DefaultPriority;
        assert!(policy.score(&elem("button", "Save", 500.0)) > policy.score(&elem("div", "", 0.0)));
    }

    #[test]
    fn position_breaks_ties_in_reading_order() {
        let policy = DefaultPriority;
        let high = elem("link", "Home", 10.0);
        let low = elem("link", "Footer", 900.0);
        assert!(policy.score(&high) > policy.score(&low));
    }

    #[test]
    fn position_never_outweighs_role_tier() {
        let policy = DefaultPriority;
        // A button at the very bottom of a tall page still beats a
        // decorative element at the top.
        let bottom_button = elem("button", "Submit", 5000.0);
        let top_div = elem("div", "banner", 0.0);
        assert!(policy.score(&bottom_button) > policy.score(&top_div));
    }
}
