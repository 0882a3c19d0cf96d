//! Diagnostic artifacts
//!
//! Screenshots and JSON dumps written during a run, plus a manifest with a
//! sha256 per file so a results directory can be checked after the fact.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::driver::BrowserDriver;
use crate::error::HarnessResult;

pub const MANIFEST_FILE: &str = "artifacts.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub name: String,
    pub path: PathBuf,
    pub sha256: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

pub struct ArtifactStore {
    root: PathBuf,
    entries: Mutex<Vec<ArtifactEntry>>,
}

impl ArtifactStore {
    pub fn new(root: &Path) -> HarnessResult<Self> {
        std::fs::create_dir_all(root.join("screenshots"))?;
        std::fs::create_dir_all(root.join("diagnostics"))?;
        Ok(Self {
            root: root.to_path_buf(),
            entries: Mutex::new(Vec::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full-page screenshot under `screenshots/<name>.png`
    pub async fn screenshot(&self, driver: &dyn BrowserDriver, name: &str) -> HarnessResult<PathBuf> {
        let path = self
            .root
            .join("screenshots")
            .join(format!("{}.png", sanitize(name)));
        driver.screenshot(&path, true).await?;
        self.record(name, &path)?;
        info!("Screenshot saved: {}", path.display());
        Ok(path)
    }

    /// Pretty JSON under `diagnostics/<name>.json`
    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> HarnessResult<PathBuf> {
        let path = self
            .root
            .join("diagnostics")
            .join(format!("{}.json", sanitize(name)));
        std::fs::write(&path, serde_json::to_vec_pretty(value)?)?;
        self.record(name, &path)?;
        debug!("Diagnostic written: {}", path.display());
        Ok(path)
    }

    fn record(&self, name: &str, path: &Path) -> HarnessResult<()> {
        // A driver may legitimately skip writing (e.g. a headless stub)
        if !path.exists() {
            return Ok(());
        }
        let bytes = std::fs::read(path)?;
        let entry = ArtifactEntry {
            name: name.to_string(),
            path: path.strip_prefix(&self.root).unwrap_or(path).to_path_buf(),
            sha256: hex::encode(Sha256::digest(&bytes)),
            size: bytes.len() as u64,
            created_at: Utc::now(),
        };
        self.entries.lock().push(entry);
        Ok(())
    }

    pub fn entries(&self) -> Vec<ArtifactEntry> {
        self.entries.lock().clone()
    }

    pub fn write_manifest(&self) -> HarnessResult<PathBuf> {
        let path = self.root.join(MANIFEST_FILE);
        std::fs::write(&path, serde_json::to_vec_pretty(&self.entries())?)?;
        Ok(path)
    }
}

/// File-name-safe version of a test or step name
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let collapsed = cleaned
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if collapsed.is_empty() {
        "artifact".to_string()
    } else {
        collapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("Ticket cancel: /participation"), "ticket-cancel-participation");
        assert_eq!(sanitize("///"), "artifact");
    }

    #[test]
    fn test_json_artifact_is_hashed_into_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        store
            .write_json("page state", &serde_json::json!({"url": "/events"}))
            .unwrap();

        let entries = store.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, PathBuf::from("diagnostics/page-state.json"));
        assert_eq!(entries[0].sha256.len(), 64);

        let manifest = store.write_manifest().unwrap();
        let parsed: Vec<ArtifactEntry> =
            serde_json::from_slice(&std::fs::read(manifest).unwrap()).unwrap();
        assert_eq!(parsed, entries);
    }
}
