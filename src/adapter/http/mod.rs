//! HTTP-bridged adapter.
//!
//! Publishes by POSTing to an HTTP pub-sub bridge and subscribes through a
//! second, nested connection. Built only with the `driver_http` feature.

#[cfg(feature = "driver_http")]
#[allow(clippy::module_inception)]
mod http;

#[cfg(feature = "driver_http")]
pub use self::http::{create_adapter, HttpEndpoint};

#[cfg(not(feature = "driver_http"))]
fn disabled() -> crate::PubSubError {
    crate::PubSubError::Backend("driver_http feature is not enabled".into())
}

/// Never constructed without the `driver_http` feature.
#[cfg(not(feature = "driver_http"))]
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    _private: (),
}

#[cfg(not(feature = "driver_http"))]
impl HttpEndpoint {
    pub fn from_config(_config: &crate::ConnectionConfig) -> crate::Result<Self> {
        Err(disabled())
    }
}

#[cfg(not(feature = "driver_http"))]
pub fn create_adapter(
    _endpoint: HttpEndpoint,
    _subscribe_adapter: crate::AdapterPtr,
) -> crate::Result<crate::AdapterPtr> {
    Err(disabled())
}
