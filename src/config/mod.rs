//! Application configuration.
//!
//! Aggregates service and messaging configuration into a single `Settings`
//! struct that can be loaded from YAML files or environment variables.

mod messaging;
mod service;

pub use messaging::{KafkaSettings, MessagingSettings, SqsSettings};
pub use service::{LogFormat, Profile, ServiceSettings};

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "duobus.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "DUOBUS_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "DUOBUS";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "DUOBUS_LOG";

/// Unprefixed variables still honored from older deployments, mapped onto settings keys.
const LEGACY_ENV_VARS: &[(&str, &str)] = &[
    ("ENVIRONMENT", "service.profile"),
    ("SERVICE_NAME", "service.name"),
    ("SERVICE_VERSION", "service.version"),
    ("LOG_LEVEL", "service.log_level"),
    ("KAFKA_BOOTSTRAP_SERVERS", "messaging.kafka.bootstrap_servers"),
    ("SQS_ENDPOINT", "messaging.sqs.endpoint_override"),
    ("SQS_QUEUE_URL", "messaging.sqs.queue_url"),
    ("AWS_REGION", "messaging.sqs.region"),
];

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Service identity and logging.
    pub service: ServiceSettings,
    /// Messaging backends.
    pub messaging: MessagingSettings,
}

impl Settings {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `duobus.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    /// 5. Legacy unprefixed variables (`KAFKA_BOOTSTRAP_SERVERS`, `SQS_ENDPOINT`, ...)
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder().add_source(
            File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false),
        );

        if let Some(config_path) = path {
            builder = builder.add_source(File::from(config_path).format(FileFormat::Yaml));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(CONFIG_ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        for (var, key) in LEGACY_ENV_VARS {
            builder = builder.set_override_option(*key, std::env::var(var).ok())?;
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that would produce unusable envelopes or destinations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::Invalid("service name is empty".to_string()));
        }

        if let Some((topic, _)) = self
            .messaging
            .sqs
            .queue_urls
            .iter()
            .find(|(_, url)| url.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "queue URL for topic '{}' is empty",
                topic
            )));
        }

        Ok(())
    }

    /// Endpoint override for the queue client: honored only in the `local` profile.
    pub fn queue_endpoint_override(&self) -> Option<&str> {
        if self.service.profile.is_local() {
            self.messaging.sqs.endpoint_override.as_deref()
        } else {
            None
        }
    }

    /// Create settings for testing: a named service in the given profile.
    pub fn for_test(service_name: &str, profile: Profile) -> Self {
        let mut settings = Self::default();
        settings.service.name = service_name.to_string();
        settings.service.profile = profile;
        settings
    }
}

/// Source of configuration for producers and consumers.
///
/// Read once per successful `initialize()`; a failed read leaves the
/// caller uninitialized and retryable.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<Settings, ConfigError>;
}

/// Layered file + environment configuration (see [`Settings::load`]).
#[derive(Debug, Clone, Default)]
pub struct FileConfigSource {
    path: Option<PathBuf>,
}

impl FileConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<Settings, ConfigError> {
        Settings::load(self.path.as_deref())
    }
}

/// Fixed, already-built settings.
#[derive(Debug, Clone)]
pub struct StaticConfigSource {
    settings: Settings,
}

impl StaticConfigSource {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> Result<Settings, ConfigError> {
        self.settings.validate()?;
        Ok(self.settings.clone())
    }
}
