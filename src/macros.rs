// src/macros.rs

//
// Logging macros
//
// `logging` feature enabled  → tracing events under the `pubsub_registry` target
// `logging` feature disabled → only log_error prints to stderr, the rest compile away
//

#![allow(unused_macros)]

#[cfg(feature = "logging")]
mod enabled {
    macro_rules! log_error {
        ($($arg:tt)*) => { tracing::error!(target: "pubsub_registry", $($arg)*) };
    }

    macro_rules! log_warn {
        ($($arg:tt)*) => { tracing::warn!(target: "pubsub_registry", $($arg)*) };
    }

    macro_rules! log_info {
        ($($arg:tt)*) => { tracing::info!(target: "pubsub_registry", $($arg)*) };
    }

    macro_rules! log_debug {
        ($($arg:tt)*) => { tracing::debug!(target: "pubsub_registry", $($arg)*) };
    }

    pub(crate) use {log_debug, log_error, log_info, log_warn};
}

#[cfg(not(feature = "logging"))]
mod enabled {
    macro_rules! log_error {
        ($($arg:tt)*) => { eprintln!("[pubsub_registry] error: {}", format_args!($($arg)*)) };
    }

    macro_rules! log_warn {
        ($($arg:tt)*) => {};
    }

    macro_rules! log_info {
        ($($arg:tt)*) => {};
    }

    macro_rules! log_debug {
        ($($arg:tt)*) => {};
    }

    pub(crate) use {log_debug, log_error, log_info, log_warn};
}

pub(crate) use enabled::{log_debug, log_error, log_info, log_warn};
