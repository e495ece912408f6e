/*
 * Console handler
 *
 * Writes formatted records to stdout. When a split level is set, records at
 * that severity or worse go to stderr instead. Any writer can stand in for
 * stdout, which is how tests and pipes capture output.
 */

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::LogError;
use crate::formatter::Formatter;
use crate::handler::Handler;
use crate::level::Level;
use crate::record::Record;

type SharedWriter = Mutex<Box<dyn Write + Send>>;

pub struct ConsoleHandler {
    level: Level,
    formatter: Arc<dyn Formatter>,
    bubble: bool,
    out: SharedWriter,
    err: Option<(Level, SharedWriter)>,
}

impl ConsoleHandler {
    pub fn new(level: Level, formatter: Arc<dyn Formatter>) -> Self {
        Self::with_writer(level, formatter, Box::new(io::stdout()))
    }

    pub fn with_writer(level: Level, formatter: Arc<dyn Formatter>, writer: Box<dyn Write + Send>) -> Self {
        ConsoleHandler {
            level,
            formatter,
            bubble: false,
            out: Mutex::new(writer),
            err: None,
        }
    }

    pub fn with_bubble(mut self, bubble: bool) -> Self {
        self.bubble = bubble;
        self
    }

    /// Sends records at `split` severity or worse to stderr.
    pub fn with_stderr_split(self, split: Level) -> Self {
        self.with_split_writer(split, Box::new(io::stderr()))
    }

    pub fn with_split_writer(mut self, split: Level, writer: Box<dyn Write + Send>) -> Self {
        self.err = Some((split, Mutex::new(writer)));
        self
    }

    fn target(&self, level: Level) -> &SharedWriter {
        match &self.err {
            Some((split, writer)) if level.is_at_least(*split) => writer,
            _ => &self.out,
        }
    }
}

impl Handler for ConsoleHandler {
    fn accepts(&self, level: Level) -> bool {
        level.is_at_least(self.level)
    }

    fn handle(&self, record: &Record) -> bool {
        let mut writer = self
            .target(record.level)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match self.formatter.write_to(&mut **writer, record) {
            Ok(_) => self.bubble,
            Err(e) => {
                tracing::warn!(error = %e, "console handler failed to write record");
                true
            }
        }
    }

    fn close(&self) -> Result<(), LogError> {
        self.out
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()?;
        if let Some((_, writer)) = &self.err {
            writer.lock().unwrap_or_else(PoisonError::into_inner).flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::LineFormatter;

    /// Writer handing its bytes to a shared buffer the test can inspect.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writes_accepted_records() {
        let out = SharedBuf::default();
        let handler = ConsoleHandler::with_writer(Level::Info, Arc::new(LineFormatter::new()), Box::new(out.clone()));
        assert!(handler.accepts(Level::Error));
        assert!(!handler.accepts(Level::Debug));
        assert!(!handler.handle(&Record::new("app", Level::Info, "hello")));
        assert!(out.text().ends_with("app.INFO hello\n"));
    }

    #[test]
    fn split_level_routes_severe_records() {
        let out = SharedBuf::default();
        let err = SharedBuf::default();
        let handler = ConsoleHandler::with_writer(Level::Debug, Arc::new(LineFormatter::new()), Box::new(out.clone()))
            .with_split_writer(Level::Error, Box::new(err.clone()))
            .with_bubble(true);
        assert!(handler.handle(&Record::new("app", Level::Notice, "fine")));
        assert!(handler.handle(&Record::new("app", Level::Critical, "bad")));
        assert!(out.text().contains("fine"));
        assert!(!out.text().contains("bad"));
        assert!(err.text().contains("bad"));
    }

    #[test]
    fn write_failure_bubbles() {
        let handler = ConsoleHandler::with_writer(Level::Debug, Arc::new(LineFormatter::new()), Box::new(BrokenPipe));
        assert!(handler.handle(&Record::new("app", Level::Info, "lost")));
        assert!(handler.close().is_ok());
    }
}
