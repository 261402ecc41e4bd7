//! FILENAME: core/engine/src/logging.rs
// PURPOSE: Category-tagged logging helpers on top of the `log` facade.
//
// Every line is written as "[CATEGORY] message". The library never installs
// a logger; hosts pick one (env_logger, a platform plugin, ...).

#[doc(hidden)]
pub use log as __log;

#[macro_export]
macro_rules! log_debug {
    ($category:expr, $($arg:tt)+) => {
        $crate::logging::__log::debug!("[{}] {}", $category, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_info {
    ($category:expr, $($arg:tt)+) => {
        $crate::logging::__log::info!("[{}] {}", $category, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($category:expr, $($arg:tt)+) => {
        $crate::logging::__log::warn!("[{}] {}", $category, format_args!($($arg)+))
    };
}
