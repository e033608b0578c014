//! Redis Pub/Sub adapter.
//!
//! Built only with the `driver_redis` feature. Without it the constructor
//! still exists and reports that the driver is unavailable, so the factory's
//! dispatch table does not change shape between builds.

#[cfg(feature = "driver_redis")]
#[allow(clippy::module_inception)]
mod redis;

#[cfg(feature = "driver_redis")]
pub use self::redis::create_adapter;

#[cfg(not(feature = "driver_redis"))]
pub async fn create_adapter(
    _config: &crate::ConnectionConfig,
) -> crate::Result<crate::AdapterPtr> {
    Err(crate::PubSubError::Backend(
        "driver_redis feature is not enabled".into(),
    ))
}
