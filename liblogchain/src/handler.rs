/*
 * Handler contract
 *
 * Every sink (console, file, HTTP, chat robot) implements Handler. The logger
 * keeps an ordered chain of them and walks it for each record:
 * - handlers that do not accept the record's level are skipped
 * - a handler returning false from `handle` ends the walk
 * - a handler returning true lets the record bubble to the next one
 *
 * Handlers report success with their configured bubble flag and always
 * bubble on failure, so a broken sink never swallows a record that a later
 * sink could still deliver.
 */

use std::sync::Arc;

use crate::error::LogError;
use crate::level::Level;
use crate::record::Record;

pub trait Handler: Send + Sync {
    /// Pure threshold check, callable concurrently with `handle`.
    fn accepts(&self, level: Level) -> bool;

    /// Performs the side effect. Returns true to let dispatch continue.
    fn handle(&self, record: &Record) -> bool;

    /// Releases owned resources. Safe to call without any prior `handle`
    /// and safe to call again.
    fn close(&self) -> Result<(), LogError>;
}

/// Walks `handlers` in order for one record.
pub fn dispatch(handlers: &[Arc<dyn Handler>], record: &Record) {
    for handler in handlers {
        if handler.accepts(record.level) && !handler.handle(record) {
            break;
        }
    }
}

/// Cheap pre-check done before a record is even built.
pub fn any_accepts(handlers: &[Arc<dyn Handler>], level: Level) -> bool {
    handlers.iter().any(|handler| handler.accepts(level))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records every message it handles.
    pub struct Capture {
        pub level: Level,
        pub bubble: bool,
        pub seen: Mutex<Vec<String>>,
        pub closes: AtomicUsize,
        pub fail_close: bool,
    }

    impl Capture {
        pub fn new(level: Level, bubble: bool) -> Arc<Self> {
            Arc::new(Capture {
                level,
                bubble,
                seen: Mutex::new(Vec::new()),
                closes: AtomicUsize::new(0),
                fail_close: false,
            })
        }

        pub fn failing_close(level: Level) -> Arc<Self> {
            Arc::new(Capture {
                level,
                bubble: true,
                seen: Mutex::new(Vec::new()),
                closes: AtomicUsize::new(0),
                fail_close: true,
            })
        }

        pub fn messages(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Handler for Capture {
        fn accepts(&self, level: Level) -> bool {
            level.is_at_least(self.level)
        }

        fn handle(&self, record: &Record) -> bool {
            self.seen.lock().unwrap().push(record.message.clone());
            self.bubble
        }

        fn close(&self) -> Result<(), LogError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(LogError::Runtime("capture refused to close".to_owned()));
            }
            Ok(())
        }
    }
}
