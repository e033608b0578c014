// src/adapter/local.rs

//! In-process adapter.
//!
//! Routes messages between subscribers of the *same adapter instance*
//! entirely in memory. Two `local` connections never see each other's
//! messages; share the `AdapterPtr` to share the bus.
//!
//! ## Semantics
//!
//! - Once `subscribe()` returns, later publishes to the same channel are
//!   delivered to the returned inbox.
//! - Matching is exact string equality between channel and subscription.
//! - Delivery is deterministic within the process and waits for inbox
//!   capacity rather than dropping.
//! - Dropped `SubscriptionHandle`s are evicted on the next publish to
//!   their channel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

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

/// Buffered messages per subscriber before `publish()` waits.
const INBOX_CAPACITY: usize = 64;

type SubscriberMap = RwLock<HashMap<Subscription, Vec<mpsc::Sender<Envelope>>>>;

struct LocalAdapter {
    // ---
    subscriptions: SubscriberMap,
}

impl LocalAdapter {
    /// Drop senders whose `SubscriptionHandle` has gone away.
    async fn evict_closed(&self, sub: &Subscription) {
        let mut subs = self.subscriptions.write().await;
        if let Some(senders) = subs.get_mut(sub) {
            senders.retain(|tx| !tx.is_closed());
            if senders.is_empty() {
                subs.remove(sub);
            }
        }
    }
}

#[async_trait::async_trait]
impl Adapter for LocalAdapter {
    // ---
    async fn publish(&self, env: Envelope) -> Result<()> {
        // ---
        let sub = Subscription::from(env.address.clone());

        // Clone senders out so the lock is not held while waiting on capacity.
        let senders = {
            let subs = self.subscriptions.read().await;
            subs.get(&sub).cloned().unwrap_or_default()
        };

        let mut saw_closed = false;
        for sender in senders {
            if sender.send(env.clone()).await.is_err() {
                saw_closed = true;
            }
        }

        if saw_closed {
            log_debug!("local: evicting closed subscribers on {}", env.address);
            self.evict_closed(&sub).await;
        }

        Ok(())
    }

    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle> {
        // ---
        log_debug!("local: subscribe to {:?}", sub);

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.subscriptions
            .write()
            .await
            .entry(sub)
            .or_default()
            .push(tx);

        Ok(SubscriptionHandle { inbox: rx })
    }

    /// Drops every subscription; open inboxes see `None` once drained.
    async fn close(&self) -> Result<()> {
        self.subscriptions.write().await.clear();
        Ok(())
    }

    fn driver(&self) -> Option<Driver> {
        Some(Driver::Local)
    }
}

/// Create a new in-process adapter with its own, empty bus.
pub fn create_adapter() -> AdapterPtr {
    Arc::new(LocalAdapter {
        subscriptions: RwLock::new(HashMap::new()),
    })
}
