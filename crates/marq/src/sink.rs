//! Filesystem trace sink.
//!
//! Lays out one directory per run: `<out>/<app>/<task-slug>_<ts>/` holding
//! `NN_marked.png` and `NN_mapping.json` per iteration plus a final
//! `run_summary.json`. The marked image and mapping share an iteration
//! prefix because neither is meaningful without the other.

use async_trait::async_trait;
use marq_common::protocol::{MarkerMapping, TaskSpec};
use marq_engine::sink::TraceSink;
use marq_engine::workflow::RunReport;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    /// Create the run directory for one task.
    pub async fn create(out_root: &Path, spec: &TaskSpec) -> std::io::Result<Self> {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| std::io::Error::other(e.to_string()))?
            .as_secs();
        let dir = out_root
            .join(slugify(&spec.app))
            .join(format!("{}_{}", slugify(&spec.task), ts));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl TraceSink for FileSink {
    async fn record_iteration(
        &self,
        iteration: u32,
        marked_png: &[u8],
        mapping: &MarkerMapping,
    ) -> std::io::Result<()> {
        let png_path = self.dir.join(format!("{:02}_marked.png", iteration));
        tokio::fs::write(&png_path, marked_png).await?;

        let mapping_json = serde_json::to_vec_pretty(mapping)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let mapping_path = self.dir.join(format!("{:02}_mapping.json", iteration));
        tokio::fs::write(&mapping_path, mapping_json).await?;
        Ok(())
    }

    async fn record_summary(&self, report: &RunReport) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(report)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        tokio::fs::write(self.dir.join("run_summary.json"), json).await
    }
}

/// Directory-safe slug, truncated so long task descriptions do not blow
/// past path limits.
fn slugify(text: &str) -> String {
    let mut slug: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    slug.truncate(60);
    let trimmed = slug.trim_matches('_').to_string();
    if trimmed.is_empty() {
        "task".to_string()
    } else {
        trimmed
    }
}
