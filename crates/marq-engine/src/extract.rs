//! Snapshot extraction of interactive elements.
//!
//! Extraction is a pure read of the live page: it never mutates page
//! state, and a fresh pass supersedes the previous one entirely. Ordering
//! of the returned sequence is priority order (see [`crate::score`]), so a
//! `limit` truncates the least important elements first.

use crate::backend::PageBackend;
use crate::score::PriorityPolicy;
use marq_common::error::BackendError;
use marq_common::protocol::InteractiveElement;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_LIMIT: usize = 50;

/// Extractor bound to a scoring policy. Carries no mutable state and may
/// be shared across tasks.
#[derive(Clone)]
pub struct Extractor {
    policy: Arc<dyn PriorityPolicy>,
}

impl Extractor {
    pub fn new(policy: Arc<dyn PriorityPolicy>) -> Self {
        Self { policy }
    }

    /// One extraction pass: collect, drop degenerate boxes, rank, truncate.
    ///
    /// Fails with `TransientPageState` while the page is mid-navigation;
    /// the caller retries after a settle delay.
    pub async fn extract<B: PageBackend + ?Sized>(
        &self,
        backend: &mut B,
        limit: usize,
    ) -> Result<Vec<InteractiveElement>, BackendError> {
        let raw = backend.collect_elements().await?;
        let total = raw.len();

        let mut scored: Vec<(f32, InteractiveElement)> = raw
            .into_iter()
            .filter(|e| !e.bounding_box.is_degenerate())
            .map(|e| (self.policy.score(&e), e))
            .collect();

        // Stable sort keeps DOM order for equal scores.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let kept = scored.len().min(limit);
        debug!(total, usable = scored.len(), kept, "extraction pass");

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, e)| e)
            .collect())
    }
}
