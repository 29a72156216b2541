//! Region configuration — transactions, destinations, maps and runtime settings.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bms::MapSpec;
use crate::registry::DestinationEntry;
use crate::{CicsError, CicsResult};

/// Top-level region configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Runtime settings.
    #[serde(default)]
    pub region: RegionSettings,
    /// Transaction code to program name (the PCT).
    #[serde(default)]
    pub transactions: BTreeMap<String, String>,
    /// Transient data destinations (the DCT).
    #[serde(default)]
    pub destinations: Vec<DestinationEntry>,
    /// BMS maps.
    #[serde(default)]
    pub maps: Vec<MapSpec>,
    /// Maps sent as error overlays, as `MAPSET.MAP`.
    #[serde(default)]
    pub error_maps: Vec<String>,
}

/// Runtime settings of the region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionSettings {
    /// Terminal id used when a session does not supply one.
    #[serde(default = "default_terminal")]
    pub default_terminal: String,
    /// User id used when a session does not supply one.
    #[serde(default = "default_user")]
    pub default_user: String,
    /// Fixed application date (`YYYY-MM-DD`); time of day stays live.
    #[serde(default)]
    pub application_date: Option<String>,
    /// Fallback poll interval while waiting for a resource lock.
    #[serde(default = "default_lock_poll_interval_ms")]
    pub lock_poll_interval_ms: u64,
}

impl Default for RegionSettings {
    fn default() -> Self {
        Self {
            default_terminal: default_terminal(),
            default_user: default_user(),
            application_date: None,
            lock_poll_interval_ms: default_lock_poll_interval_ms(),
        }
    }
}

fn default_terminal() -> String {
    "T001".to_string()
}

fn default_user() -> String {
    "CICSUSER".to_string()
}

fn default_lock_poll_interval_ms() -> u64 {
    100
}

impl RegionConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> CicsResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> CicsResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-references that serde cannot.
    pub fn validate(&self) -> CicsResult<()> {
        let terminal = &self.region.default_terminal;
        if terminal.is_empty() || terminal.len() > 4 {
            return Err(CicsError::Config(format!(
                "default_terminal '{terminal}' must be 1-4 characters"
            )));
        }
        let user = &self.region.default_user;
        if user.is_empty() || user.len() > 8 {
            return Err(CicsError::Config(format!(
                "default_user '{user}' must be 1-8 characters"
            )));
        }
        if self.region.lock_poll_interval_ms == 0 {
            return Err(CicsError::Config(
                "lock_poll_interval_ms must be positive".to_string(),
            ));
        }
        for (code, program) in &self.transactions {
            if code.is_empty() || code.len() > 4 {
                return Err(CicsError::Config(format!(
                    "transaction code '{code}' must be 1-4 characters"
                )));
            }
            if program.is_empty() {
                return Err(CicsError::Config(format!(
                    "transaction '{code}' has no program"
                )));
            }
        }
        for name in &self.error_maps {
            if name.split_once('.').is_none() {
                return Err(CicsError::Config(format!(
                    "error map '{name}' must be written MAPSET.MAP"
                )));
            }
        }
        Ok(())
    }

    /// Add a transaction definition.
    pub fn with_transaction(mut self, code: &str, program: &str) -> Self {
        self.transactions
            .insert(code.to_uppercase(), program.to_uppercase());
        self
    }

    /// Add a destination definition.
    pub fn with_destination(mut self, entry: DestinationEntry) -> Self {
        self.destinations.push(entry);
        self
    }
}
