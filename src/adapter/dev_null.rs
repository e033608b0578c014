// src/adapter/dev_null.rs

//! `/dev/null` adapter.
//!
//! Accepts every publish and drops it. Subscriptions succeed but their
//! inbox is already closed, so `recv()` returns `None` immediately.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    // ---
    log_debug,
    Adapter,
    AdapterPtr,
    Driver,
    Envelope,
    Result,
    Subscription,
    SubscriptionHandle,
};

struct DevNullAdapter;

#[async_trait::async_trait]
impl Adapter for DevNullAdapter {
    // ---
    async fn publish(&self, _env: Envelope) -> Result<()> {
        log_debug!("/dev/null: discarding message for {}", _env.address);
        Ok(())
    }

    async fn publish_batch(&self, _envs: Vec<Envelope>) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&self, _sub: Subscription) -> Result<SubscriptionHandle> {
        // Sender dropped on return; the inbox never yields.
        let (_tx, rx) = mpsc::channel(1);
        Ok(SubscriptionHandle { inbox: rx })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn driver(&self) -> Option<Driver> {
        Some(Driver::DevNull)
    }
}

/// Create an adapter that discards everything.
pub fn create_adapter() -> AdapterPtr {
    Arc::new(DevNullAdapter)
}
