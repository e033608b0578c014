//! Named pub/sub connections over pluggable messaging drivers
//!
//! This library gives an application one place to obtain publish/subscribe
//! connections by name. Each name maps to a driver-specific config; the
//! [`ConnectionRegistry`] builds the adapter on first use and hands out the
//! same instance from then on.
//!
//! Built-in drivers: `/dev/null`, `local`, `redis`, `gcloud` and `http`.
//! Anything else can be plugged in per name with
//! [`ConnectionRegistry::extend`].
//!
//! ```no_run
//! use pubsub_registry::{ConnectionRegistry, Envelope};
//!
//! # async fn example() -> pubsub_registry::Result<()> {
//! let registry = ConnectionRegistry::from_env();
//!
//! let redis = registry.connection(None).await?;
//! redis.publish(Envelope::new("orders", "{\"id\":1}")).await?;
//! # Ok(())
//! # }
//! ```

// Import all sub modules once...
mod adapter;
mod adapter_factory;
mod domain;
mod error;
mod macros;
mod pubsub_config;
mod registry;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use registry::ConnectionRegistry;

pub use adapter_factory::{AdapterFactory, DriverFactory, SUBSCRIBE_CONNECTION_KEY};
pub use pubsub_config::{ConnectionConfig, PubSubConfig, FALLBACK_CONNECTION};

pub use error::{PubSubError, Result};

pub use adapter::{
    //
    create_dev_null_adapter,
    create_gcloud_adapter,
    create_http_adapter,
    create_local_adapter,
    create_redis_adapter,
    HttpEndpoint,
};

// --- public re-exports
pub use domain::{
    //
    Adapter,
    AdapterPtr,
    Address,
    Driver,
    Envelope,
    Subscription,
    SubscriptionHandle,
};
