//! Google Cloud Pub/Sub adapter.
//!
//! Talks to the Pub/Sub REST API (or an emulator) with `reqwest`. Built only
//! with the `driver_gcloud` feature.

#[cfg(feature = "driver_gcloud")]
mod auth;

#[cfg(feature = "driver_gcloud")]
#[allow(clippy::module_inception)]
mod gcloud;

#[cfg(feature = "driver_gcloud")]
pub use self::gcloud::create_adapter;

#[cfg(not(feature = "driver_gcloud"))]
pub async fn create_adapter(
    _config: &crate::ConnectionConfig,
) -> crate::Result<crate::AdapterPtr> {
    Err(crate::PubSubError::Backend(
        "driver_gcloud feature is not enabled".into(),
    ))
}
