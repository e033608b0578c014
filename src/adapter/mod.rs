//! Adapter implementations.
//!
//! Concrete implementations of the domain-level `Adapter` trait, one per
//! built-in driver. Each is exposed only through a constructor function;
//! the concrete types stay private.
//!
//! Backends with external dependencies sit behind feature flags. Their
//! constructors exist in every build and fail when the feature is off.

mod dev_null;
mod gcloud;
mod http;
mod local;
mod redis;

pub use dev_null::create_adapter as create_dev_null_adapter;
pub use gcloud::create_adapter as create_gcloud_adapter;
pub use self::http::{create_adapter as create_http_adapter, HttpEndpoint};
pub use local::create_adapter as create_local_adapter;
pub use self::redis::create_adapter as create_redis_adapter;
