//! Process-wide shared producer.
//!
//! Double-checked acquisition: a lock-free read of the shared slot first,
//! then construction under an async mutex. The mutex guards construction
//! only; sends on the shared instance never touch it.

use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use tokio::sync::Mutex;
use tracing::info;

use crate::envelope::Payload;
use crate::error::Result;
use crate::producer::MessageProducer;

type ProducerBuilder = Box<dyn Fn() -> MessageProducer + Send + Sync>;

/// Holder of one lazily-initialized shared [`MessageProducer`].
pub struct ProducerRegistry {
    shared: RwLock<Option<Arc<MessageProducer>>>,
    init_lock: Mutex<()>,
    builder: ProducerBuilder,
}

impl ProducerRegistry {
    /// Registry building producers with `builder` on first use.
    pub fn new<F>(builder: F) -> Self
    where
        F: Fn() -> MessageProducer + Send + Sync + 'static,
    {
        Self {
            shared: RwLock::new(None),
            init_lock: Mutex::new(()),
            builder: Box::new(builder),
        }
    }

    /// Registry building producers from file/env configuration.
    pub fn from_env() -> Self {
        Self::new(MessageProducer::from_env)
    }

    fn current(&self) -> Option<Arc<MessageProducer>> {
        self.shared
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Return the shared producer, building and initializing it on first call.
    ///
    /// Only a fully initialized producer is ever published. If
    /// initialization fails nothing is stored and the next caller retries.
    pub async fn get_or_init(&self) -> Result<Arc<MessageProducer>> {
        if let Some(producer) = self.current() {
            return Ok(producer);
        }

        let _guard = self.init_lock.lock().await;
        if let Some(producer) = self.current() {
            return Ok(producer);
        }

        let producer = Arc::new((self.builder)());
        producer.initialize().await?;
        *self.shared.write().unwrap_or_else(PoisonError::into_inner) = Some(producer.clone());
        info!("Shared message producer created");
        Ok(producer)
    }

    pub fn is_initialized(&self) -> bool {
        self.current().is_some()
    }

    /// Close and forget the shared producer. A later `get_or_init` builds a new one.
    pub async fn shutdown(&self) {
        let _guard = self.init_lock.lock().await;
        let producer = self
            .shared
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(producer) = producer {
            producer.close().await;
            info!("Shared message producer closed");
        }
    }
}

static GLOBAL: LazyLock<ProducerRegistry> = LazyLock::new(ProducerRegistry::from_env);

/// The process-wide registry.
pub fn global() -> &'static ProducerRegistry {
    &GLOBAL
}

/// Shared producer from the process-wide registry.
pub async fn shared_producer() -> Result<Arc<MessageProducer>> {
    GLOBAL.get_or_init().await
}

/// Close the process-wide shared producer, if one was created.
pub async fn shutdown_shared_producer() {
    GLOBAL.shutdown().await;
}

/// Send through the shared producer.
pub async fn send_message(topic: &str, message: &Payload, key: Option<&str>) -> Result<bool> {
    shared_producer().await?.send(topic, message, key, None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityFlags;
    use crate::config::{Profile, Settings, StaticConfigSource};
    use crate::producer::ProducerState;
    use crate::transport::MockTransportFactory;

    fn registry(factory: Arc<MockTransportFactory>, service: &'static str) -> ProducerRegistry {
        ProducerRegistry::new(move || {
            MessageProducer::new(
                Arc::new(StaticConfigSource::new(Settings::for_test(service, Profile::Prod))),
                factory.clone(),
                CapabilityFlags::ALL,
            )
        })
    }

    #[tokio::test]
    async fn test_get_or_init_returns_same_instance() {
        let registry = registry(Arc::new(MockTransportFactory::new()), "svc");
        assert!(!registry.is_initialized());

        let a = registry.get_or_init().await.unwrap();
        let b = registry.get_or_init().await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.state().await, ProducerState::Ready);
        assert!(registry.is_initialized());
    }

    #[tokio::test]
    async fn test_failed_init_is_not_published() {
        let registry = registry(Arc::new(MockTransportFactory::new()), "");

        assert!(registry.get_or_init().await.is_err());
        assert!(!registry.is_initialized());
    }

    #[tokio::test]
    async fn test_shutdown_closes_and_clears() {
        let factory = Arc::new(MockTransportFactory::new());
        let registry = registry(factory.clone(), "svc");

        let first = registry.get_or_init().await.unwrap();
        registry.shutdown().await;

        assert_eq!(first.state().await, ProducerState::Closed);
        assert!(!registry.is_initialized());

        let second = registry.get_or_init().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(factory.streaming_producer_builds(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_without_producer_is_noop() {
        let registry = registry(Arc::new(MockTransportFactory::new()), "svc");
        registry.shutdown().await;
        assert!(!registry.is_initialized());
    }
}
