//! Bootstrap utilities for duobus binaries and host services.

use tracing::{info_span, Span};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ServiceSettings, LOG_ENV_VAR};

/// Initialize tracing with the DUOBUS_LOG environment variable.
///
/// Falls back to the configured `log_level` if DUOBUS_LOG is not set.
/// A subscriber that is already installed is left in place.
pub fn init_tracing(service: &ServiceSettings) {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_new(&service.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (json, text) = match service.log_format {
        LogFormat::Json => (Some(fmt::layer().json().with_current_span(true)), None),
        LogFormat::Text => (None, Some(fmt::layer())),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .try_init();
}

/// Root span carrying service identity; enter it for the life of the process.
pub fn service_span(service: &ServiceSettings) -> Span {
    info_span!(
        "service",
        service = %service.name,
        version = %service.version,
        environment = %service.profile,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_does_not_panic() {
        let service = ServiceSettings::default();
        init_tracing(&service);
        init_tracing(&service);
    }
}
