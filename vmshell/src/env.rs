//! Versioned environment snapshot shared between test steps.
//!
//! The snapshot is a version number plus an ordered keyed mapping, stored
//! as JSON. Loading never fails: an unusable file is replaced by a fresh
//! empty snapshot, and the reason is handed back as an [`EnvWarning`].

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::{EnvError, Result};

/// Why a stored snapshot was discarded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvWarning {
    /// No snapshot file exists yet
    #[error("Env file {path} does not exist")]
    Missing { path: PathBuf },

    /// The snapshot was written by an older, incompatible version
    #[error("Incompatible env file found (version {found}, need {required}). Not using it.")]
    VersionTooOld { found: u32, required: u32 },

    /// The file could not be read
    #[error("Could not read env file {path}: {message}")]
    Unreadable { path: PathBuf, message: String },

    /// The file is not a valid snapshot
    #[error("Could not parse env file {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
}

/// The environment snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Env {
    #[serde(default)]
    version: u32,

    #[serde(default)]
    data: IndexMap<String, Value>,
}

/// Result of [`Env::load`].
#[derive(Debug, Clone)]
pub struct LoadedEnv {
    pub env: Env,

    /// Set when the stored snapshot was not used.
    pub warning: Option<EnvWarning>,
}

impl Env {
    /// Create an empty snapshot.
    pub fn new(version: u32) -> Self {
        Self {
            version,
            data: IndexMap::new(),
        }
    }

    /// Load the snapshot at `path`, requiring at least `version`.
    pub fn load(path: impl AsRef<Path>, version: u32) -> LoadedEnv {
        let path = path.as_ref();
        match Self::try_load(path, version) {
            Ok(env) => LoadedEnv { env, warning: None },
            Err(warning) => {
                warn!("{}", warning);
                LoadedEnv {
                    env: Self::new(version),
                    warning: Some(warning),
                }
            }
        }
    }

    fn try_load(path: &Path, version: u32) -> std::result::Result<Self, EnvWarning> {
        let text = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EnvWarning::Missing {
                path: path.to_path_buf(),
            },
            _ => EnvWarning::Unreadable {
                path: path.to_path_buf(),
                message: e.to_string(),
            },
        })?;

        let env: Env = serde_json::from_str(&text).map_err(|e| EnvWarning::Corrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        if env.version < version {
            return Err(EnvWarning::VersionTooOld {
                found: env.version,
                required: version,
            });
        }
        Ok(env)
    }

    /// Write the snapshot to `path`, replacing it atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = serde_json::to_vec_pretty(self).map_err(EnvError::from)?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let write = |target: &Path| -> std::io::Result<()> {
            fs::write(target, &data)?;
            fs::rename(target, path)
        };
        write(&tmp).map_err(|source| EnvError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Insert or replace a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.data.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
