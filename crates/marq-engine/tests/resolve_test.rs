mod common;

use common::{candidate, make_element, MockBackend};
use marq_common::protocol::{
    ActionDecision, ActionKind, Locator, MarkerMapping, ResolutionStatus, Strategy,
};
use marq_engine::resolve::Resolver;

fn click(marker: u32) -> ActionDecision {
    ActionDecision {
        action: ActionKind::Click,
        marker_id: Some(marker),
        text: None,
        reasoning: None,
        description: None,
    }
}

fn fill(marker: u32, text: &str) -> ActionDecision {
    ActionDecision {
        action: ActionKind::Fill,
        marker_id: Some(marker),
        text: Some(text.to_string()),
        reasoning: None,
        description: None,
    }
}

fn mapping_with(id: u32, element: marq_common::protocol::InteractiveElement) -> MarkerMapping {
    let mut mapping = MarkerMapping::default();
    mapping.markers.insert(id, element);
    mapping
}

#[tokio::test]
async fn hallucinated_marker_gets_no_dom_access() {
    let mapping = mapping_with(1, make_element("Save", "button", "#save", 10.0, 10.0));
    let mut backend = MockBackend::new(vec![]);

    let result = Resolver::default()
        .resolve(&click(99), &mapping, &mut backend)
        .await
        .unwrap();

    assert_eq!(result.status, ResolutionStatus::NotFound);
    assert_eq!(result.attempts_made, 0);
    assert!(backend.query_log.is_empty());
    assert!(backend.clicks.is_empty());
}

#[tokio::test]
async fn aria_label_wins_after_exact_text_misses() {
    let mut element = make_element("Save", "button", "#save", 10.0, 10.0);
    element.aria_label = "Save changes".to_string();
    let mapping = mapping_with(1, element);

    let mut backend = MockBackend::new(vec![])
        .with_query(
            Locator::Text {
                text: "Save".into(),
            },
            vec![],
        )
        .with_query(
            Locator::AriaLabel {
                label: "Save changes".into(),
            },
            vec![candidate(7, 10.0, 10.0)],
        );

    let result = Resolver::default()
        .resolve(&click(1), &mapping, &mut backend)
        .await
        .unwrap();

    assert_eq!(result.status, ResolutionStatus::Succeeded);
    assert_eq!(result.strategy_used, Some(Strategy::AriaLabel));
    assert_eq!(result.attempts_made, 2);
    assert_eq!(backend.clicks, vec![7]);
}

#[tokio::test]
async fn multiple_distant_candidates_yield_ambiguous_without_acting() {
    let element = make_element("Edit", "button", "", 0.0, 0.0);
    let mapping = mapping_with(1, element);

    // Both candidates are far outside the pixel tolerance; no other
    // strategy matches anything.
    let mut backend = MockBackend::new(vec![]).with_query(
        Locator::Text {
            text: "Edit".into(),
        },
        vec![candidate(1, 500.0, 500.0), candidate(2, 700.0, 700.0)],
    );

    let result = Resolver::default()
        .resolve(&click(1), &mapping, &mut backend)
        .await
        .unwrap();

    assert_eq!(result.status, ResolutionStatus::Ambiguous);
    assert!(backend.clicks.is_empty());
    assert!(backend.fills.is_empty());
}

#[tokio::test]
async fn nearest_candidate_within_tolerance_disambiguates() {
    let element = make_element("Edit", "button", "#edit", 10.0, 10.0);
    let mapping = mapping_with(1, element);

    let mut backend = MockBackend::new(vec![]).with_query(
        Locator::Text {
            text: "Edit".into(),
        },
        vec![candidate(5, 12.0, 11.0), candidate(6, 400.0, 400.0)],
    );

    let result = Resolver::default()
        .resolve(&click(1), &mapping, &mut backend)
        .await
        .unwrap();

    assert_eq!(result.status, ResolutionStatus::Succeeded);
    assert_eq!(backend.clicks, vec![5]);
}

#[tokio::test]
async fn fill_readback_mismatch_reports_timed_out() {
    let element = make_element("Name", "input", "#name", 10.0, 10.0);
    let mapping = mapping_with(2, element);

    let mut backend = MockBackend::new(vec![]).with_query(
        Locator::Text {
            text: "Name".into(),
        },
        vec![candidate(3, 10.0, 10.0)],
    );
    backend.readback_override = Some("Na".to_string());

    let result = Resolver::default()
        .resolve(&fill(2, "Nautilus"), &mapping, &mut backend)
        .await
        .unwrap();

    assert_eq!(result.status, ResolutionStatus::TimedOut);
    assert_eq!(result.strategy_used, Some(Strategy::ExactText));
    assert_eq!(backend.fills, vec![(3, "Nautilus".to_string())]);
}

#[tokio::test]
async fn actionability_timeout_reports_timed_out_with_strategy() {
    let element = make_element("Save", "button", "#save", 10.0, 10.0);
    let mapping = mapping_with(1, element);

    let mut backend = MockBackend::new(vec![]).with_query(
        Locator::Text {
            text: "Save".into(),
        },
        vec![candidate(4, 10.0, 10.0)],
    );
    backend.click_error = Some("covered by overlay".to_string());

    let result = Resolver::default()
        .resolve(&click(1), &mapping, &mut backend)
        .await
        .unwrap();

    assert_eq!(result.status, ResolutionStatus::TimedOut);
    assert_eq!(result.strategy_used, Some(Strategy::ExactText));
    assert!(backend.clicks.is_empty());
}

#[tokio::test]
async fn invisible_candidates_are_filtered_before_counting() {
    let element = make_element("Open", "link", "#open", 10.0, 10.0);
    let mapping = mapping_with(1, element);

    let mut hidden = candidate(8, 10.0, 10.0);
    hidden.visible = false;
    let mut disabled = candidate(9, 10.0, 10.0);
    disabled.enabled = false;

    // Two unusable candidates plus one good one: still a unique match.
    let mut backend = MockBackend::new(vec![]).with_query(
        Locator::Text {
            text: "Open".into(),
        },
        vec![hidden, disabled, candidate(10, 10.0, 10.0)],
    );

    let result = Resolver::default()
        .resolve(&click(1), &mapping, &mut backend)
        .await
        .unwrap();

    assert_eq!(result.status, ResolutionStatus::Succeeded);
    assert_eq!(backend.clicks, vec![10]);
}
