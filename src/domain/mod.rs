//! Domain layer public interface.
//!
//! Backend-independent abstractions: the `Adapter` capability every
//! messaging backend exposes, and the message types it moves.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod adapter;

// --- Adapter domain re-exports ---

pub use adapter::{
    //
    Adapter,
    AdapterPtr,
    Address,
    Driver,
    Envelope,
    Subscription,
    SubscriptionHandle,
};
