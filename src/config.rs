//! Engine configuration
//!
//! Read once at store construction. Environment variables:
//! - `PHLOEM_DATA_DIR`: override the storage directory
//! - `PHLOEM_AIR_GAPPED`: truthy forces the local embedder
//! - `PHLOEM_EMBEDDINGS`: embedder backend name (local, openai, voyage, ollama)

use std::path::{Path, PathBuf};

use crate::error::{PhloemError, Result};

/// Database file name inside the data directory
pub const DB_FILE: &str = "memories.db";

/// Pre-migration backup file name
pub const BACKUP_FILE: &str = "memories.db.backup";

/// Configuration for the memory engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding memories.db and friends
    pub data_dir: PathBuf,
    /// Embedder backend name (overridden to "local" when air-gapped)
    pub embeddings: String,
    /// When set, no outbound network is permitted
    pub air_gapped: bool,
    /// Minimum similarity for an extracted phrase to become a causal edge
    pub causal_floor: f32,
    /// Maximum BFS depth for ancestor/descendant traversal
    pub traversal_depth: u32,
    /// Maximum nodes visited per traversal
    pub traversal_budget: usize,
    /// Citation confidence decay rate per day (lambda)
    pub decay_lambda: f64,
    /// Citations below this confidence may be pruned by the decay sweep
    pub confidence_floor: f32,
    /// When set, citation paths must stay under this directory
    pub working_root: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            embeddings: "local".to_string(),
            air_gapped: false,
            causal_floor: 0.25,
            traversal_depth: 3,
            traversal_budget: 64,
            decay_lambda: 1.0 / 90.0,
            confidence_floor: 0.1,
            working_root: None,
        }
    }
}

impl EngineConfig {
    /// Build a config from the process environment
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("PHLOEM_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = PathBuf::from(shellexpand::tilde(&dir).to_string());
            }
        }
        if let Ok(backend) = std::env::var("PHLOEM_EMBEDDINGS") {
            if !backend.is_empty() {
                config.embeddings = backend;
            }
        }
        config.air_gapped = std::env::var("PHLOEM_AIR_GAPPED")
            .map(|v| is_truthy(&v))
            .unwrap_or(false);

        config
    }

    /// Path to the primary database file
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    /// Path to the pre-migration backup
    pub fn backup_path(&self) -> PathBuf {
        self.data_dir.join(BACKUP_FILE)
    }

    /// Create the data directory with owner-only permissions
    pub fn ensure_data_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .map_err(|e| PhloemError::io_at(self.data_dir.clone(), e))?;
        restrict_dir_permissions(&self.data_dir)?;
        Ok(())
    }
}

/// Default storage directory under the user's home
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".phloem")
}

/// Interpret an environment value as a boolean
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(unix)]
fn restrict_dir_permissions(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o700);
    std::fs::set_permissions(dir, perms).map_err(|e| PhloemError::io_at(dir.to_path_buf(), e))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_dir_permissions(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Set owner-only permissions on a database file
#[cfg(unix)]
pub fn restrict_file_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if path.exists() {
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .map_err(|e| PhloemError::io_at(path.to_path_buf(), e))?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn restrict_file_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("TRUE"));
        assert!(is_truthy(" yes "));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("off"));
        assert!(!is_truthy(""));
    }

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.embeddings, "local");
        assert!((config.causal_floor - 0.25).abs() < f32::EPSILON);
        assert_eq!(config.traversal_depth, 3);
        assert_eq!(config.traversal_budget, 64);
        assert!(config.data_dir.ends_with(".phloem"));
    }
}
