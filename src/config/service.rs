//! Service identity and deployment profile configuration types.

use std::fmt;

use serde::Deserialize;

/// Deployment profile.
///
/// `Local` is the lowest-trust profile: developer machines and LocalStack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Local,
    #[serde(alias = "development")]
    Dev,
    Staging,
    #[serde(alias = "production")]
    Prod,
}

impl Profile {
    pub fn is_local(self) -> bool {
        self == Profile::Local
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Local => "local",
            Profile::Dev => "dev",
            Profile::Staging => "staging",
            Profile::Prod => "prod",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Service identity and logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name, stamped on every envelope as `producer_service`.
    pub name: String,
    /// Service version (log metadata only).
    pub version: String,
    /// Deployment profile.
    pub profile: Profile,
    /// Default log filter when `DUOBUS_LOG` is unset.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "duobus".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            profile: Profile::Local,
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }
}
