//! Packager configuration.
//!
//! Loaded from a YAML file; every field is optional:
//!
//! ```yaml
//! project_dir: /home/boincadm/project
//! download_dir: /home/boincadm/project/download   # default: <project_dir>/download
//! fanout: 1024
//! docker_binary: docker
//! create_work_binary: /home/boincadm/project/bin/create_work
//! appname: boinc2docker
//! ```
//!
//! Without `--config`, `<config dir>/wupack/config.yaml` is used if it
//! exists, otherwise the defaults apply.

use crate::constants::{CREATE_WORK_BIN, DEFAULT_APPNAME, DEFAULT_FANOUT, DOWNLOAD_DIR};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Packager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackConfig {
    /// Scheduler project root.
    pub project_dir: PathBuf,
    /// Download hierarchy root; `<project_dir>/download` when unset.
    pub download_dir: Option<PathBuf>,
    /// Number of download hierarchy buckets.
    pub fanout: u32,
    /// Container runtime client.
    pub docker_binary: PathBuf,
    /// Work creation program; `<project_dir>/bin/create_work` when unset.
    pub create_work_binary: Option<PathBuf>,
    /// Default application name.
    pub appname: String,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            download_dir: None,
            fanout: DEFAULT_FANOUT,
            docker_binary: PathBuf::from("docker"),
            create_work_binary: None,
            appname: DEFAULT_APPNAME.to_string(),
        }
    }
}

impl PackConfig {
    /// Parses a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| Error::Config {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate(Path::new("<inline>"))?;
        Ok(config)
    }

    /// Loads a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let config_err = |reason: String| Error::Config {
            path: path.to_path_buf(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| config_err(e.to_string()))?;
        let config: Self = serde_yaml::from_str(&text).map_err(|e| config_err(e.to_string()))?;
        config.validate(path)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Loads `path` if given, else the default file if present, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if self.fanout == 0 {
            return Err(Error::Config {
                path: path.to_path_buf(),
                reason: "fanout must be positive".to_string(),
            });
        }
        if self.appname.is_empty() {
            return Err(Error::Config {
                path: path.to_path_buf(),
                reason: "appname must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Returns the effective download hierarchy root.
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(|| self.project_dir.join(DOWNLOAD_DIR))
    }

    /// Returns the effective work creation program.
    pub fn create_work_binary(&self) -> PathBuf {
        self.create_work_binary
            .clone()
            .unwrap_or_else(|| self.project_dir.join(CREATE_WORK_BIN))
    }
}

/// Returns `<config dir>/wupack/config.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("wupack").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PackConfig::default();
        assert_eq!(config.fanout, 1024);
        assert_eq!(config.appname, "boinc2docker");
        assert_eq!(config.download_dir(), PathBuf::from("./download"));
        assert_eq!(config.create_work_binary(), PathBuf::from("./bin/create_work"));
    }

    #[test]
    fn test_partial_yaml() {
        let config = PackConfig::from_yaml("project_dir: /srv/project\nfanout: 256\n").unwrap();
        assert_eq!(config.fanout, 256);
        assert_eq!(config.download_dir(), PathBuf::from("/srv/project/download"));
        assert_eq!(config.docker_binary, PathBuf::from("docker"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(PackConfig::from_yaml("fanout: 0\n").is_err());
        assert!(PackConfig::from_yaml("unknown_key: 1\n").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = PackConfig::load(Path::new("/nonexistent/wupack.yaml")).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
