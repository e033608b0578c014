//! Driver dispatch.
//!
//! [`AdapterFactory`] turns a driver identifier plus its connection config
//! into an adapter. [`DriverFactory`] is the built-in dispatch table; the
//! registry accepts any implementation, which is how tests count or stub
//! constructions.

use crate::adapter::{
    // ---
    create_dev_null_adapter,
    create_gcloud_adapter,
    create_http_adapter,
    create_local_adapter,
    create_redis_adapter,
    HttpEndpoint,
};
use crate::{log_debug, AdapterPtr, ConnectionConfig, Driver, PubSubError, Result};

/// Config key holding the HTTP bridge's subscribe-side connection.
pub const SUBSCRIBE_CONNECTION_KEY: &str = "subscribe_connection_config";

/// Builds one adapter per call.
///
/// # Notes
///
/// This trait uses `async_trait`; consumers should treat `make` as a normal
/// `async fn`. The boxed future also lets drivers recurse into `make` for
/// nested connections.
#[async_trait::async_trait]
pub trait AdapterFactory: Send + Sync {
    // ---
    /// Construct an adapter for `driver` from `config`.
    ///
    /// # Errors
    ///
    /// `UnsupportedDriver` if `driver` is unknown; otherwise whatever the
    /// backend's construction reports.
    async fn make(&self, driver: &str, config: &ConnectionConfig) -> Result<AdapterPtr>;
}

/// The built-in driver dispatch table.
///
/// | driver | adapter |
/// |---|---|
/// | `/dev/null` (also `null`, `nodriver`) | discards everything |
/// | `local` | in-process fan-out |
/// | `redis` | Redis Pub/Sub |
/// | `gcloud` | Google Cloud Pub/Sub |
/// | `http` | HTTP bridge + nested subscribe connection |
///
/// # Example
///
/// ```
/// use pubsub_registry::{AdapterFactory, ConnectionConfig, Driver, DriverFactory};
///
/// # async fn example() -> pubsub_registry::Result<()> {
/// let adapter = DriverFactory.make("local", &ConnectionConfig::new()).await?;
/// assert_eq!(adapter.driver(), Some(Driver::Local));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct DriverFactory;

impl DriverFactory {
    /// HTTP bridge: validate the bridge URL, resolve the nested subscribe
    /// connection through this same factory, then wrap it.
    ///
    /// The nested connection may open network resources, so it is only
    /// built once the bridge's own config is known to be usable.
    async fn make_http(&self, config: &ConnectionConfig) -> Result<AdapterPtr> {
        // ---
        let endpoint = HttpEndpoint::from_config(config)?;

        let nested = config
            .get_object(SUBSCRIBE_CONNECTION_KEY, "http")?
            .ok_or_else(|| {
                PubSubError::invalid_config("http", format!("`{SUBSCRIBE_CONNECTION_KEY}` is required"))
            })?;

        let driver = nested.driver().ok_or_else(|| {
            PubSubError::invalid_config(
                "http",
                format!("`{SUBSCRIBE_CONNECTION_KEY}` is missing a \"driver\" config var"),
            )
        })?;

        let subscribe_adapter = self.make(driver, &nested).await?;
        create_http_adapter(endpoint, subscribe_adapter)
    }
}

#[async_trait::async_trait]
impl AdapterFactory for DriverFactory {
    // ---
    async fn make(&self, driver: &str, config: &ConnectionConfig) -> Result<AdapterPtr> {
        // ---
        let driver: Driver = driver.parse().map_err(PubSubError::UnsupportedDriver)?;

        log_debug!("factory: constructing {driver} adapter");

        match driver {
            Driver::DevNull => Ok(create_dev_null_adapter()),
            Driver::Local => Ok(create_local_adapter()),
            Driver::Redis => create_redis_adapter(config).await,
            Driver::Gcloud => create_gcloud_adapter(config).await,
            Driver::Http => self.make_http(config).await,
        }
    }
}
