//! Per-call diagnostics written as JSON files.

use std::path::{Path, PathBuf};

use serde_json::json;
use tracing::warn;

use veille_consensus::{Exchange, ExchangeSink};
use veille_core::Result;

/// Writes `<label>-<stage>.json` with the prompt and the decoded answer
/// (or the error) of every oracle exchange.
pub struct DiagnosticsSink {
    dir: PathBuf,
}

impl DiagnosticsSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, label: &str, stage: &str) -> PathBuf {
        let label: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}-{}.json", label, stage))
    }
}

impl ExchangeSink for DiagnosticsSink {
    fn record(&self, exchange: &Exchange<'_>) {
        let mut doc = json!({
            "label": exchange.label,
            "stage": exchange.stage.as_str(),
            "recorded_at": chrono::Utc::now().to_rfc3339(),
            "prompt": exchange.prompt,
        });
        match &exchange.outcome {
            Ok(response) => doc["response"] = response.clone(),
            Err(error) => doc["error"] = json!(error),
        }

        let path = self.path_for(exchange.label, exchange.stage.as_str());
        let written = serde_json::to_string_pretty(&doc)
            .map_err(std::io::Error::from)
            .and_then(|body| std::fs::write(&path, body));
        if let Err(e) = written {
            warn!("Failed to write diagnostics {}: {}", path.display(), e);
        }
    }
}
