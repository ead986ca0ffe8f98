//! Engine configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{EngineError, Result};

/// Root configuration for the Tessera engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory under which container roots are mounted.
    pub mount_root: PathBuf,
    /// Filesystem type of disk images.
    pub image_fs_type: String,
    /// Working directory of the container process.
    pub workdir: PathBuf,
    /// Hostname set inside the container.
    pub hostname: String,
    /// Staging directory name used by `pivot_root`.
    pub pivot_staging_dir: String,
    /// Environment every container process starts with.
    pub base_env: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let base_env = [
            ("PS1", constants::DEFAULT_PS1),
            ("TERM", constants::DEFAULT_TERM),
            ("HOME", constants::DEFAULT_HOME),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            mount_root: PathBuf::from(constants::DEFAULT_MOUNT_ROOT),
            image_fs_type: constants::IMAGE_FS_TYPE.to_string(),
            workdir: PathBuf::from(constants::CONTAINER_WORKDIR),
            hostname: constants::CONTAINER_HOSTNAME.to_string(),
            pivot_staging_dir: constants::PIVOT_STAGING_DIR.to_string(),
            base_env,
        }
    }
}

impl EngineConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// Missing fields fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that paths are absolute and names are usable.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if !self.mount_root.is_absolute() {
            return Err(EngineError::Config {
                message: format!("mount_root must be absolute: {}", self.mount_root.display()),
            });
        }
        if !self.workdir.is_absolute() {
            return Err(EngineError::Config {
                message: format!("workdir must be absolute: {}", self.workdir.display()),
            });
        }
        if self.image_fs_type.is_empty() {
            return Err(EngineError::Config {
                message: "image_fs_type must not be empty".into(),
            });
        }
        if self.pivot_staging_dir.is_empty() || self.pivot_staging_dir.contains('/') {
            return Err(EngineError::Config {
                message: format!(
                    "pivot_staging_dir must be a single path component: {:?}",
                    self.pivot_staging_dir
                ),
            });
        }
        if self.base_env.keys().any(|k| k.is_empty() || k.contains('=')) {
            return Err(EngineError::Config {
                message: "base_env keys must be non-empty and contain no '='".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.image_fs_type, "ext4");
        assert_eq!(config.base_env.get("TERM").map(String::as_str), Some("xterm"));
        assert_eq!(config.base_env.get("HOME").map(String::as_str), Some("/root"));
        assert!(config.base_env.contains_key("PS1"));
    }

    #[test]
    fn load_fills_missing_fields_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"mount_root": "/srv/tessera", "hostname": "box"}"#)
            .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.mount_root, PathBuf::from("/srv/tessera"));
        assert_eq!(config.hostname, "box");
        assert_eq!(config.workdir, PathBuf::from("/root"));
    }

    #[test]
    fn load_rejects_relative_mount_root() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"mount_root": "mnt"}"#).unwrap();

        let err = EngineConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, EngineError::Config { .. }));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
    }

    #[test]
    fn validate_rejects_nested_staging_dir() {
        let config = EngineConfig {
            pivot_staging_dir: "a/b".into(),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
