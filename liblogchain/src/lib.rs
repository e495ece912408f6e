/*
 * liblogchain: structured logging through a chain of handlers
 *
 * A Logger turns leveled calls into Records, enriches them with extra
 * processors and walks them down an ordered chain of handlers (console,
 * rotating file, HTTP, chat robot). Dispatch is synchronous by default or
 * queued onto a supervised background drain with `enable_async`.
 *
 * The `log_*!` macros take a logger and `format!` style arguments:
 *
 *     log_error!(logger, "payment {} failed: {}", id, reason);
 *
 * Formatting only happens when some handler accepts the level.
 */

mod config;
mod error;
mod extra;
mod formatter;
mod handler;
pub mod handlers;
mod level;
mod logger;
mod record;
mod runtime;
mod supervisor;

pub use config::{
    ConsoleConfig, ExtraKind, FileConfig, FormatKind, HandlerConfig, HttpConfig, LoggerConfig, RobotEndpoint,
    RobotPoolConfig,
};
pub use error::{CloseError, LogError};
pub use extra::{CallerLocation, ExtraProcessor, HostIp, StaticFields};
pub use formatter::{Formatter, JsonFormatter, LineFormatter};
pub use handler::{any_accepts, dispatch, Handler};
pub use handlers::{ConsoleHandler, FileHandler, HttpHandler, Robot, RobotOptions, RobotPool, RobotTextFormatter};
pub use level::Level;
pub use logger::{Logger, DEFAULT_CLOSE_TIMEOUT};
pub use record::Record;

// Leveled macros, one per severity
#[macro_export]
macro_rules! log_emergency {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log_fmt($crate::Level::Emergency, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_alert {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log_fmt($crate::Level::Alert, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_critical {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log_fmt($crate::Level::Critical, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log_fmt($crate::Level::Error, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_warning {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log_fmt($crate::Level::Warning, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_notice {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log_fmt($crate::Level::Notice, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log_fmt($crate::Level::Info, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log_fmt($crate::Level::Debug, format_args!($($arg)+))
    };
}
