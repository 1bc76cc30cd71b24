// JBasic Configuration
// VM settings loaded from a JSON file (jbasic.json)

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::vm::session::Permission;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown permission '{0}'")]
    UnknownPermission(String),
}

/// Runtime settings shared by every session of a process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Coerce stores by variable-name suffix in every program
    pub static_types: bool,
    /// STORE may create variables that do not exist yet
    pub dynamic_symbols: bool,
    /// Granted permission names, or "ALL"
    pub permissions: Vec<String>,
    pub max_call_depth: usize,
    /// Largest array a program may build, and longest string REPEAT may produce
    pub max_elements: usize,
    /// Upper bound for a single SLEEP
    pub max_sleep_ms: u64,
    /// tracing-subscriber filter directive used by the CLI
    pub log_filter: String,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            static_types: false,
            dynamic_symbols: true,
            permissions: vec!["ALL".to_string()],
            max_call_depth: 256,
            max_elements: 1 << 24,
            max_sleep_ms: 10_000,
            log_filter: "warn".to_string(),
        }
    }
}

impl VmConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: VmConfig = serde_json::from_str(&text)?;
        config.granted()?;
        Ok(config)
    }

    /// Configuration that grants nothing privileged
    pub fn sandboxed() -> Self {
        Self {
            permissions: Vec::new(),
            ..Self::default()
        }
    }

    /// Resolve the permission names
    pub fn granted(&self) -> Result<Vec<Permission>, ConfigError> {
        let mut granted = Vec::new();
        for name in &self.permissions {
            if name.eq_ignore_ascii_case("ALL") {
                return Ok(Permission::ALL.to_vec());
            }
            let permission = Permission::from_name(name)
                .ok_or_else(|| ConfigError::UnknownPermission(name.clone()))?;
            granted.push(permission);
        }
        Ok(granted)
    }
}
