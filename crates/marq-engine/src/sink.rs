//! Trace sinks: where per-iteration artifacts go.
//!
//! The engine emits the marked screenshot and marker mapping for every
//! iteration plus a final run summary. Persistence is a CLI concern; the
//! engine only talks to this trait.

use crate::workflow::RunReport;
use async_trait::async_trait;
use marq_common::protocol::MarkerMapping;

#[async_trait]
pub trait TraceSink: Send + Sync {
    /// Record the annotated screenshot and mapping for one iteration.
    /// Iterations are numbered from 1.
    async fn record_iteration(
        &self,
        iteration: u32,
        marked_png: &[u8],
        mapping: &MarkerMapping,
    ) -> std::io::Result<()>;

    /// Record the final run summary once the loop terminates.
    async fn record_summary(&self, report: &RunReport) -> std::io::Result<()>;
}

/// Discards everything. Used by tests and by callers that only want the
/// returned report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl TraceSink for NullSink {
    async fn record_iteration(
        &self,
        _iteration: u32,
        _marked_png: &[u8],
        _mapping: &MarkerMapping,
    ) -> std::io::Result<()> {
        Ok(())
    }

    async fn record_summary(&self, _report: &RunReport) -> std::io::Result<()> {
        Ok(())
    }
}
