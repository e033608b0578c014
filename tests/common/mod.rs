// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pubsub_registry::{
    // ---
    Adapter,
    AdapterFactory,
    AdapterPtr,
    ConnectionConfig,
    Envelope,
    Result,
    Subscription,
    SubscriptionHandle,
};

/// Adapter that records nothing and is only compared by identity.
pub struct MockAdapter;

#[async_trait::async_trait]
impl Adapter for MockAdapter {
    async fn publish(&self, _env: Envelope) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&self, _sub: Subscription) -> Result<SubscriptionHandle> {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        Ok(SubscriptionHandle { inbox: rx })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub fn mock_adapter() -> AdapterPtr {
    Arc::new(MockAdapter)
}

/// Factory stub that returns a fresh `MockAdapter` and records every call.
#[derive(Default)]
pub struct CountingFactory {
    pub calls: AtomicUsize,
    pub seen: std::sync::Mutex<Vec<(String, ConnectionConfig)>>,
    pub delay: Option<Duration>,
}

impl CountingFactory {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AdapterFactory for CountingFactory {
    async fn make(&self, driver: &str, config: &ConnectionConfig) -> Result<AdapterPtr> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((driver.to_string(), config.clone()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(mock_adapter())
    }
}

#[cfg(feature = "logging")]
mod imp {
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn init() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }
}

#[cfg(not(feature = "logging"))]
mod imp {
    #[inline]
    pub fn init() {}
}

pub fn init_logging() {
    imp::init();
}
