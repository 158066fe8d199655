//! Persisted machine id
//!
//! The kernel only returns the machine id on first registration; later
//! registrations are rejected as "already registered", so the agent keeps
//! the id on disk to resume heartbeating after a restart.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub struct MachineIdStore {
    path: PathBuf,
}

impl MachineIdStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// `<data dir>/healthnet-agent/<client name>.id`
    pub fn default_for(client_name: &str) -> Result<Self> {
        let mut path = dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        path.push("healthnet-agent");
        path.push(format!("{}.id", file_stem(client_name)));
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Option<Uuid>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let id = Uuid::parse_str(content.trim())
            .with_context(|| format!("Corrupted machine id in {}", self.path.display()))?;
        Ok(Some(id))
    }

    pub async fn save(&self, id: Uuid) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, id.to_string())
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

/// Client names are free text; keep only characters that cannot leave the directory
fn file_stem(client_name: &str) -> String {
    let stem: String = client_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "client".to_string()
    } else {
        stem
    }
}
