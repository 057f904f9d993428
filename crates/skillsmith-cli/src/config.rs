//! `.skillsmith.toml` configuration loading: sync frequency, rate-limit
//! presets, and embedding provider selection. Falls back to defaults when
//! no file is found, walking up from the current directory the way a
//! project-root config file is conventionally discovered.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = ".skillsmith.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SkillsmithConfig {
    #[serde(default)]
    pub sync: SyncConfigSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    /// Embedding provider name ("fastembed" is the only one wired today).
    pub embedding_provider: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfigSection {
    /// "daily" or "weekly" - the only two frequencies C5 supports.
    #[serde(default = "default_sync_frequency")]
    pub frequency: String,
    #[serde(default = "default_sync_enabled")]
    pub enabled: bool,
}

impl Default for SyncConfigSection {
    fn default() -> Self {
        Self { frequency: default_sync_frequency(), enabled: default_sync_enabled() }
    }
}

fn default_sync_frequency() -> String {
    "daily".to_string()
}

fn default_sync_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RateLimitSection {
    pub requests_per_minute: Option<u32>,
    pub burst: Option<u32>,
}

impl SkillsmithConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&content).context("failed to parse .skillsmith.toml")
    }

    /// Walk up from `start_dir` looking for a config file, the way
    /// `SkillManifest::find` walks up for `.skill-engine.toml`.
    pub fn find(start_dir: &Path) -> Option<PathBuf> {
        let mut current = start_dir.to_path_buf();
        loop {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Load from an explicit path, auto-detect upward from the current
    /// directory, or fall back to defaults if nothing is found.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let cwd = std::env::current_dir()?;
        if let Some(found) = Self::find(&cwd) {
            tracing::info!("loaded config from {}", found.display());
            return Self::load(&found);
        }
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_sections_are_missing() {
        let config: SkillsmithConfig = toml::from_str("").unwrap();
        assert_eq!(config.sync.frequency, "daily");
        assert!(config.sync.enabled);
        assert!(config.embedding_provider.is_none());
    }

    #[test]
    fn a_partial_toml_file_overrides_only_the_given_fields() {
        let config: SkillsmithConfig = toml::from_str(
            r#"
            embedding_provider = "fastembed"

            [sync]
            frequency = "weekly"
            "#,
        )
        .unwrap();
        assert_eq!(config.sync.frequency, "weekly");
        assert!(config.sync.enabled);
        assert_eq!(config.embedding_provider.as_deref(), Some("fastembed"));
    }

    #[test]
    fn find_walks_up_to_an_ancestor_directory() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE_NAME), "").unwrap();
        let nested = tmp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        let found = SkillsmithConfig::find(&nested).unwrap();
        assert_eq!(found, tmp.path().join(CONFIG_FILE_NAME));
    }
}
