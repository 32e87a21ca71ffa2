//! Runtime configuration.

use crate::errors::{CoreError, Result};
use config::{Config, Environment, File as ConfigFile};
use fileledger_types::{DEFAULT_DIFFICULTY, MAX_DIFFICULTY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of environment variable overrides, e.g. `FILELEDGER_DIFFICULTY=3`.
pub const ENV_PREFIX: &str = "FILELEDGER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLedgerConfig {
    pub data_dir: PathBuf,
    /// Leading zero hex digits required of every sealed block hash.
    pub difficulty: u32,
    pub ledger_file: String,
    pub contracts_file: String,
    pub verifications_file: String,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for FileLedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            difficulty: DEFAULT_DIFFICULTY,
            ledger_file: "blockchain.json".to_string(),
            contracts_file: "contracts.json".to_string(),
            verifications_file: "verifications.json".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl FileLedgerConfig {
    /// Layer an optional TOML file and `FILELEDGER_*` environment variables
    /// over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(CoreError::InvalidConfig(format!(
                    "configuration file {} not found",
                    path.display()
                )));
            }
            builder = builder.add_source(ConfigFile::from(path));
        }

        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(CoreError::InvalidConfig(format!(
                "difficulty {} exceeds maximum {}",
                self.difficulty, MAX_DIFFICULTY
            )));
        }
        for (key, name) in [
            ("ledger_file", &self.ledger_file),
            ("contracts_file", &self.contracts_file),
            ("verifications_file", &self.verifications_file),
        ] {
            if name.trim().is_empty() {
                return Err(CoreError::InvalidConfig(format!("{key} must not be empty")));
            }
        }
        Ok(())
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(&self.ledger_file)
    }

    pub fn contracts_path(&self) -> PathBuf {
        self.data_dir.join(&self.contracts_file)
    }

    pub fn verifications_path(&self) -> PathBuf {
        self.data_dir.join(&self.verifications_file)
    }
}
