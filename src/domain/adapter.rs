// src/domain/adapter.rs

//! Adapter domain abstractions.
//!
//! Every messaging backend the registry can hand out implements the
//! [`Adapter`] trait defined here. The trait intentionally avoids any
//! reference to concrete protocols, brokers, or client libraries; the
//! registry and its callers only ever see an [`AdapterPtr`].
//!
//! Concrete implementations live under `src/adapter/`.
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Built-in driver identifiers understood by the default factory.
///
/// Parsing is the dispatch table's key lookup: every string that does not
/// map to a variant is an unsupported driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Driver {
    // ---
    /// Discards every publish, never delivers anything.
    DevNull,

    /// In-process fan-out, no external resources.
    Local,

    /// Redis Pub/Sub.
    Redis,

    /// Google Cloud Pub/Sub over its REST API.
    Gcloud,

    /// Publishes over HTTP, subscribes through a nested connection.
    Http,
}

impl Driver {
    /// Canonical identifier as it appears in a connection config.
    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::DevNull => "/dev/null",
            Driver::Local => "local",
            Driver::Redis => "redis",
            Driver::Gcloud => "gcloud",
            Driver::Http => "http",
        }
    }
}

impl FromStr for Driver {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "/dev/null" | "null" | "nodriver" => Ok(Driver::DevNull),
            "local" => Ok(Driver::Local),
            "redis" => Ok(Driver::Redis),
            "gcloud" => Ok(Driver::Gcloud),
            "http" => Ok(Driver::Http),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A channel name messages are published to.
///
/// Its interpretation is backend-specific (Redis channel, Cloud Pub/Sub
/// topic, HTTP path segment) but at the domain level it is an opaque,
/// cheaply cloneable identifier.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Address(pub Arc<str>);

impl<T> From<T> for Address
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Address(value.into())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request to receive messages published to a channel.
///
/// All built-in adapters match a subscription against an address by exact
/// string equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Subscription(pub Arc<str>);

impl From<Address> for Subscription {
    fn from(address: Address) -> Self {
        // ---
        Subscription(address.0)
    }
}

impl<T> From<T> for Subscription
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Subscription(value.into())
    }
}

/// An opaque message envelope.
///
/// The adapter layer does not interpret the payload; it only moves it to
/// subscribers of the same address.
///
/// ```
/// # use pubsub_registry::{Envelope, Address};
/// # use bytes::Bytes;
/// let env = Envelope::new(Address::from("orders"), Bytes::from_static(b"{\"id\":1}"))
///     .with_content_type("application/json");
/// assert_eq!(env.address.0.as_ref(), "orders");
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    // ---
    /// Channel the message is published to.
    pub address: Address,

    /// Opaque payload bytes.
    pub payload: Bytes,

    /// Optional content type metadata (e.g. "application/json").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<Arc<str>>,
}

impl Envelope {
    // ---
    /// Create an envelope with no content type.
    pub fn new(address: impl Into<Address>, payload: impl Into<Bytes>) -> Self {
        Self {
            address: address.into(),
            payload: payload.into(),
            content_type: None,
        }
    }

    /// Serialize `value` as JSON and wrap it in an `application/json` envelope.
    pub fn json<T: Serialize>(address: impl Into<Address>, value: &T) -> Result<Self> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self::new(address, payload).with_content_type("application/json"))
    }

    /// Attach a content type.
    pub fn with_content_type(mut self, content_type: impl Into<Arc<str>>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Handle returned from a successful subscription.
///
/// Dropping the handle closes the inbox; adapters evict closed senders the
/// next time they deliver to that channel.
///
/// ```no_run
/// # use pubsub_registry::{ConnectionRegistry, PubSubConfig, Subscription};
/// # async fn example() -> pubsub_registry::Result<()> {
/// let registry = ConnectionRegistry::new(PubSubConfig::from_env());
/// let adapter = registry.connection(Some("local")).await?;
///
/// let mut handle = adapter.subscribe(Subscription::from("notifications")).await?;
/// while let Some(envelope) = handle.inbox.recv().await {
///     println!("received: {:?}", envelope);
/// }
/// # Ok(())
/// # }
/// ```
pub struct SubscriptionHandle {
    // ---
    /// Receiver channel for delivered envelopes matching this subscription.
    pub inbox: mpsc::Receiver<Envelope>,
}

/// Uniform publish/subscribe capability exposed by every backend.
///
/// Implementations must ensure that:
/// - Once `subscribe()` returns successfully, messages published *after*
///   that point to the same channel are deliverable.
/// - `publish()` does not wait for subscribers to consume.
///
/// No ordering, durability, or retry guarantees are made beyond what an
/// implementation documents.
///
/// Custom backends implement this trait and are plugged into a registry
/// with [`ConnectionRegistry::extend`](crate::ConnectionRegistry::extend).
#[async_trait::async_trait]
pub trait Adapter: Send + Sync {
    // ---
    /// Publish a single envelope.
    async fn publish(&self, env: Envelope) -> Result<()>;

    /// Publish several envelopes.
    ///
    /// Default implementation publishes them one by one and stops at the
    /// first failure. Backends with a native batch API override it.
    async fn publish_batch(&self, envs: Vec<Envelope>) -> Result<()> {
        for env in envs {
            self.publish(env).await?;
        }
        Ok(())
    }

    /// Register a subscription and return a handle for receiving messages.
    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle>;

    /// Close the adapter and release any associated resources.
    async fn close(&self) -> Result<()>;

    /// The built-in driver that produced this adapter, if any.
    ///
    /// Adapters supplied through override resolvers keep the default `None`.
    fn driver(&self) -> Option<Driver> {
        None
    }
}

/// Shared adapter pointer.
///
/// `.clone()` only bumps a reference count; every clone talks to the same
/// underlying connection. The registry caches one of these per name.
pub type AdapterPtr = Arc<dyn Adapter>;
