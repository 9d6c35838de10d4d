//! Engine configuration.
//!
//! Configuration is an INI file with three sections:
//!
//! ```ini
//! [pool]
//! max-idle-per-protocol = 6
//!
//! [reuse]
//! ; "shared" lets any idle worker of the protocol serve any binding,
//! ; "exact" restricts reuse to an identical (host, user, credential).
//! ftp = exact
//!
//! [workers]
//! http = /usr/libexec/stevedore/http-worker
//! ftp = /usr/libexec/stevedore/ftp-worker
//! ```
//!
//! All sections are optional; [`EngineConfig::default`] yields a usable
//! engine with an empty worker map.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

use crate::pool::{PoolConfig, ReusePolicy};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load {path}: {message}")]
    Load { path: String, message: String },

    #[error("invalid value for '{key}': {value}")]
    InvalidValue { key: String, value: String },
}

/// Everything the engine needs at construction time.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub pool: PoolConfig,
    /// Protocol name to worker executable.
    pub workers: HashMap<String, PathBuf>,
}

impl EngineConfig {
    /// Loads configuration from an INI file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let mut config = Self::default();

        if let Some(pool) = ini.section(Some("pool")) {
            if let Some(value) = pool.get("max-idle-per-protocol") {
                config.pool.max_idle_per_protocol =
                    value.parse().map_err(|_| ConfigError::InvalidValue {
                        key: "pool.max-idle-per-protocol".into(),
                        value: value.into(),
                    })?;
            }
        }

        if let Some(reuse) = ini.section(Some("reuse")) {
            for (protocol, value) in reuse.iter() {
                let policy = match value {
                    "shared" => ReusePolicy::ProtocolWide,
                    "exact" => ReusePolicy::ExactBinding,
                    _ => {
                        return Err(ConfigError::InvalidValue {
                            key: format!("reuse.{protocol}"),
                            value: value.into(),
                        })
                    }
                };
                config
                    .pool
                    .reuse_overrides
                    .insert(protocol.to_ascii_lowercase(), policy);
            }
        }

        if let Some(workers) = ini.section(Some("workers")) {
            for (protocol, executable) in workers.iter() {
                config
                    .workers
                    .insert(protocol.to_ascii_lowercase(), PathBuf::from(executable));
            }
        }

        Ok(config)
    }
}
