//! Marker-to-element resolution against the live page.
//!
//! The page may have re-rendered since extraction: text shifted, elements
//! removed, a modal opened. Resolution therefore re-locates the element
//! with an ordered fallback chain that privileges semantic matches (what
//! the oracle "meant") over structural ones (fragile to reflow):
//!
//! 1. exact visible text
//! 2. exact aria-label
//! 3. role + normalized text
//! 4. structural selector captured at extraction time
//!
//! A strategy wins only when it yields exactly one visible, enabled
//! candidate, or when a multi-candidate set has a unique nearest box
//! within the pixel tolerance of the extraction-time coordinates.

use crate::backend::PageBackend;
use marq_common::error::BackendError;
use marq_common::protocol::{
    ActionDecision, ActionKind, Candidate, InteractiveElement, Locator, MarkerMapping,
    ResolutionResult, ResolutionStatus, Strategy,
};
use std::time::Duration;
use tracing::{debug, warn};

/// Default distance (px) within which a disambiguated candidate must sit
/// relative to the extraction-time box center.
pub const DEFAULT_PIXEL_TOLERANCE: f32 = 40.0;

pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Resolver {
    pub pixel_tolerance: f32,
    pub action_timeout: Duration,
}

impl Default for Resolver {
    fn default() -> Self {
        Self {
            pixel_tolerance: DEFAULT_PIXEL_TOLERANCE,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }
}

impl Resolver {
    /// Resolve the decision's marker and perform its action. Side effects
    /// happen inside this call; the returned result only says whether the
    /// DOM interaction itself succeeded, not whether it had the intended
    /// application effect (that check belongs to the workflow loop).
    pub async fn resolve<B: PageBackend + ?Sized>(
        &self,
        decision: &ActionDecision,
        mapping: &MarkerMapping,
        backend: &mut B,
    ) -> Result<ResolutionResult, BackendError> {
        let marker_id = match decision.marker_id {
            Some(id) => id,
            None => return Ok(ResolutionResult::failed(ResolutionStatus::NotFound, 0)),
        };

        // Correctness boundary: an out-of-mapping ID gets no DOM search at
        // all, so a hallucinated marker can never click an unrelated
        // element.
        let element = match mapping.get(marker_id) {
            Some(e) => e,
            None => {
                warn!(marker_id, "marker not present in current mapping");
                return Ok(ResolutionResult::failed(ResolutionStatus::NotFound, 0));
            }
        };

        let mut attempts = 0u32;
        let mut saw_ambiguity = false;

        for strategy in strategies_for(element) {
            attempts += 1;
            let locator = locator_for(strategy, element);
            let candidates = backend.query(&locator).await?;
            let usable: Vec<Candidate> = candidates
                .into_iter()
                .filter(|c| c.visible && c.enabled)
                .collect();

            let chosen = match usable.len() {
                0 => continue,
                1 => usable.into_iter().next(),
                _ => match self.nearest_within_tolerance(element, usable) {
                    Some(c) => Some(c),
                    None => {
                        saw_ambiguity = true;
                        continue;
                    }
                },
            };

            if let Some(candidate) = chosen {
                debug!(marker_id, ?strategy, token = candidate.token, "resolved");
                return self
                    .act(decision, &candidate, strategy, attempts, backend)
                    .await;
            }
        }

        let status = if saw_ambiguity {
            ResolutionStatus::Ambiguous
        } else {
            ResolutionStatus::NotFound
        };
        debug!(marker_id, ?status, attempts, "resolution failed");
        Ok(ResolutionResult::failed(status, attempts))
    }

    /// Disambiguate a multi-candidate set by proximity to the recorded
    /// box. Guessing is worse than retrying, so anything outside the
    /// tolerance is rejected.
    fn nearest_within_tolerance(
        &self,
        element: &InteractiveElement,
        candidates: Vec<Candidate>,
    ) -> Option<Candidate> {
        candidates
            .into_iter()
            .map(|c| (element.bounding_box.center_distance(&c.rect), c))
            .filter(|(d, _)| *d <= self.pixel_tolerance)
            .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, c)| c)
    }

    async fn act<B: PageBackend + ?Sized>(
        &self,
        decision: &ActionDecision,
        candidate: &Candidate,
        strategy: Strategy,
        attempts: u32,
        backend: &mut B,
    ) -> Result<ResolutionResult, BackendError> {
        let outcome = match decision.action {
            ActionKind::Click => backend.click(candidate, self.action_timeout).await,
            ActionKind::Fill => {
                let text = decision.text.as_deref().unwrap_or_default();
                match backend.fill(candidate, text, self.action_timeout).await {
                    Ok(()) => {
                        let value = backend.read_value(candidate).await?;
                        if value == text {
                            Ok(())
                        } else {
                            // The field silently rejected the input; the
                            // action never took effect within its bound.
                            warn!(expected = text, got = %value, "fill readback mismatch");
                            return Ok(ResolutionResult {
                                status: ResolutionStatus::TimedOut,
                                strategy_used: Some(strategy),
                                attempts_made: attempts,
                            });
                        }
                    }
                    Err(e) => Err(e),
                }
            }
            // Non-element actions never reach the resolver.
            _ => Ok(()),
        };

        match outcome {
            Ok(()) => Ok(ResolutionResult::succeeded(strategy, attempts)),
            Err(BackendError::ActionTimeout(msg)) => {
                warn!(%msg, "target never became actionable");
                Ok(ResolutionResult {
                    status: ResolutionStatus::TimedOut,
                    strategy_used: Some(strategy),
                    attempts_made: attempts,
                })
            }
            Err(e) => Err(e),
        }
    }
}

/// The ordered strategy chain for an element, skipping strategies the
/// element cannot support (empty text, missing aria-label).
fn strategies_for(element: &InteractiveElement) -> Vec<Strategy> {
    Strategy::ORDER
        .into_iter()
        .filter(|s| match s {
            Strategy::ExactText => !element.text.trim().is_empty(),
            Strategy::AriaLabel => !element.aria_label.trim().is_empty(),
            Strategy::RoleText => !element.normalized_text().is_empty(),
            Strategy::Selector => !element.selector.trim().is_empty(),
        })
        .collect()
}

fn locator_for(strategy: Strategy, element: &InteractiveElement) -> Locator {
    match strategy {
        Strategy::ExactText => Locator::Text {
            text: element.text.trim().to_string(),
        },
        Strategy::AriaLabel => Locator::AriaLabel {
            label: element.aria_label.trim().to_string(),
        },
        Strategy::RoleText => Locator::RoleText {
            role: element.role.clone(),
            text: element.normalized_text(),
        },
        Strategy::Selector => Locator::Selector {
            selector: element.selector.clone(),
        },
    }
}
