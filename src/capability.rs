//! Transport capability detection.
//!
//! A backend is available when its client library was compiled in
//! (`kafka` / `sqs` features). Detection does no network I/O; an absent
//! backend is a normal outcome, not an error.

use std::sync::OnceLock;

use tracing::{info, warn};

static DETECTED: OnceLock<CapabilityFlags> = OnceLock::new();

/// Which transport client libraries are usable in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityFlags {
    pub streaming_available: bool,
    pub queue_available: bool,
}

impl CapabilityFlags {
    /// Both backends available.
    pub const ALL: CapabilityFlags = CapabilityFlags {
        streaming_available: true,
        queue_available: true,
    };

    /// Neither backend available.
    pub const NONE: CapabilityFlags = CapabilityFlags {
        streaming_available: false,
        queue_available: false,
    };

    pub fn new(streaming_available: bool, queue_available: bool) -> Self {
        Self {
            streaming_available,
            queue_available,
        }
    }

    fn compiled() -> Self {
        Self {
            streaming_available: cfg!(feature = "kafka"),
            queue_available: cfg!(feature = "sqs"),
        }
    }
}

/// Resolve capability flags once per process.
///
/// Logs the outcome on the first call only.
pub fn detect() -> CapabilityFlags {
    *DETECTED.get_or_init(|| {
        let flags = CapabilityFlags::compiled();

        if flags.streaming_available {
            info!("Kafka client available");
        } else {
            warn!("Kafka client not compiled in (feature 'kafka'), Kafka functionality disabled");
        }

        if flags.queue_available {
            info!("SQS client available");
        } else {
            warn!("SQS client not compiled in (feature 'sqs'), SQS functionality disabled");
        }

        flags
    })
}
