/*
 * Concrete handlers
 *
 * - console: stdout, with an optional stderr split
 * - file: dated files with size rotation and optional buffering
 * - http: one POST per record
 * - robot: rate limited, deduplicated chat robot notifications
 */

pub mod console;
pub mod file;
pub mod http;
pub mod robot;

pub use console::ConsoleHandler;
pub use file::FileHandler;
pub use http::HttpHandler;
pub use robot::{DedupWindow, Robot, RobotOptions, RobotPool, RobotTextFormatter};
