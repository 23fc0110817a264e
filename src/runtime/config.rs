use crate::error::BridgeError;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Service type used when publish/browse parameters omit one. Identifies
/// the host framework's own service namespace.
pub const DEFAULT_SERVICE_TYPE: &str = "_zconf._tcp";

/// Bridge Configuration
/// Every field has a default; an empty JSON object is a valid config.
#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    /// Service type applied when params omit one (default: `_zconf._tcp`)
    #[serde(default = "default_service_type")]
    pub default_service_type: String,
    /// Service name applied when params omit one. Falls back to the
    /// machine hostname when unset.
    #[serde(default)]
    pub device_name: Option<String>,
    /// Diagnostic hook: log resolve failures at debug level instead of
    /// dropping them completely silently (default: false)
    #[serde(default)]
    pub log_resolve_failures: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            default_service_type: default_service_type(),
            device_name: None,
            log_resolve_failures: false,
        }
    }
}

fn default_service_type() -> String {
    DEFAULT_SERVICE_TYPE.to_string()
}

impl BridgeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let file = File::open(path.as_ref())
            .map_err(|e| BridgeError::Config(format!("{}: {e}", path.as_ref().display())))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| BridgeError::Config(e.to_string()))
    }
}
