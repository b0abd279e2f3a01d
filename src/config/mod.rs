//! Cache settings and YAML config files.
//!
//! ```yaml
//! # cache.yaml
//! ttl_secs: 300
//! memory_budget_mib: 64
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

const MIB: u64 = 1024 * 1024;

/// Errors produced while reading or writing a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_yaml::Error),
}

/// Response cache settings.
///
/// Unknown keys are rejected so typos surface at startup instead of being
/// silently ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    /// Server-side entry lifetime in seconds. `0` leaves entries to eviction
    /// and gives clients the 24 hour fallback.
    pub ttl_secs: u64,
    /// Total cost budget of the shared store, in MiB.
    pub memory_budget_mib: u64,
}

impl CacheSettings {
    pub const DEFAULT_MEMORY_BUDGET_MIB: u64 = 64;

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// The memory budget expressed in store cost units.
    pub fn max_cost(&self) -> u64 {
        self.memory_budget_mib.saturating_mul(MIB)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 0,
            memory_budget_mib: Self::DEFAULT_MEMORY_BUDGET_MIB,
        }
    }
}

/// Reads a YAML config file into `T`.
///
/// # Errors
///
/// - [`ConfigError::Io`] — the file cannot be read.
/// - [`ConfigError::Parse`] — the content does not match `T`.
pub fn read_config<T>(path: impl AsRef<Path>) -> Result<T, ConfigError>
where
    T: DeserializeOwned,
{
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_owned(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_owned(),
        source,
    })
}

/// Writes `config` to `path` as YAML, replacing any existing file.
///
/// On Unix the file is created with mode `0600`.
///
/// # Errors
///
/// - [`ConfigError::Serialize`] — `config` cannot be represented as YAML.
/// - [`ConfigError::Io`] — the file cannot be written.
pub fn write_config<T>(path: impl AsRef<Path>, config: &T) -> Result<(), ConfigError>
where
    T: Serialize,
{
    let path = path.as_ref();
    let yaml = serde_yaml::to_string(config).map_err(ConfigError::Serialize)?;
    write_private(path, yaml.as_bytes()).map_err(|source| ConfigError::Io {
        path: path.to_owned(),
        source,
    })
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = CacheSettings::default();
        assert_eq!(settings.ttl(), Duration::ZERO);
        assert_eq!(settings.max_cost(), 64 * 1024 * 1024);
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.yaml");
        let settings = CacheSettings {
            ttl_secs: 300,
            memory_budget_mib: 8,
        };

        write_config(&path, &settings).unwrap();
        let loaded: CacheSettings = read_config(&path).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.ttl(), Duration::from_secs(300));
    }

    #[cfg(unix)]
    #[test]
    fn written_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.yaml");
        write_config(&path, &CacheSettings::default()).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.yaml");
        fs::write(&path, "ttl_secs: 60\n").unwrap();

        let loaded: CacheSettings = read_config(&path).unwrap();
        assert_eq!(loaded.ttl_secs, 60);
        assert_eq!(
            loaded.memory_budget_mib,
            CacheSettings::DEFAULT_MEMORY_BUDGET_MIB
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.yaml");
        fs::write(&path, "ttl_secs: 60\nttl_minutes: 1\n").unwrap();

        let err = read_config::<CacheSettings>(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_config::<CacheSettings>(dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
