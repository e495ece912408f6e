mod common;

use common::{file_lines, SharedBuf};
use liblogchain::{log_debug, log_error, ConsoleHandler, FileHandler, Handler, Level, LineFormatter, Logger};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn console(level: Level, out: &SharedBuf) -> Arc<dyn Handler> {
    Arc::new(ConsoleHandler::with_writer(level, Arc::new(LineFormatter::new()), Box::new(out.clone())))
}

fn buffered_file(level: Level, dir: &std::path::Path) -> Arc<dyn Handler> {
    let file = FileHandler::new(level, Arc::new(LineFormatter::new()), dir).unwrap();
    file.set_buffer(64 * 1024, Duration::from_secs(60)).unwrap();
    Arc::new(file)
}

#[test]
fn console_and_buffered_file_split_by_level() {
    let dir = tempfile::tempdir().unwrap();
    let out = SharedBuf::default();
    // The error file comes first and does not bubble, debug falls through to the console
    let logger = Logger::with_handlers(
        "e2e",
        vec![buffered_file(Level::Error, dir.path()), console(Level::Debug, &out)],
    );

    logger.debug("just looking", None);
    logger.error("it broke", Some(json!({"order": 17})));
    logger.close().unwrap();

    let console_lines = out.lines();
    assert_eq!(console_lines.len(), 1);
    assert!(console_lines[0].contains("e2e.DEBUG just looking"));

    let lines = file_lines(dir.path());
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("ERROR"));
    assert!(lines[0].contains(r#"{"order":17}"#));
}

#[test]
fn async_logger_with_console_and_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = SharedBuf::default();
    let logger = Logger::with_handlers(
        "queued",
        vec![buffered_file(Level::Error, dir.path()), console(Level::Debug, &out)],
    );
    logger.enable_async(4).unwrap();

    log_debug!(logger, "step {}", 1);
    log_error!(logger, "step {} failed", 2);
    logger.close().unwrap();

    assert_eq!(out.lines().len(), 1);
    assert!(out.text().contains("queued.DEBUG step 1"));
    let lines = file_lines(dir.path());
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("queued.ERROR step 2 failed"));
}

#[test]
fn bubbling_console_lets_errors_reach_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = SharedBuf::default();
    let console = Arc::new(
        ConsoleHandler::with_writer(Level::Debug, Arc::new(LineFormatter::new()), Box::new(out.clone()))
            .with_bubble(true),
    );
    let logger = Logger::new("chain", console);
    logger.push_handler(Arc::new(FileHandler::new(Level::Error, Arc::new(LineFormatter::new()), dir.path()).unwrap()));

    logger.info("info", None);
    logger.critical("critical", None);
    logger.close().unwrap();

    assert_eq!(out.lines().len(), 2);
    let lines = file_lines(dir.path());
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("CRITICAL critical"));
}

#[test]
fn closed_handler_passes_records_on() {
    let dir = tempfile::tempdir().unwrap();
    let out = SharedBuf::default();
    let file = Arc::new(FileHandler::new(Level::Debug, Arc::new(LineFormatter::new()), dir.path()).unwrap());
    file.close().unwrap();
    let logger = Logger::with_handlers("fallback", vec![file as Arc<dyn Handler>, console(Level::Debug, &out)]);

    logger.warning("file is gone", None);

    assert!(out.text().contains("WARNING file is gone"));
    assert!(file_lines(dir.path()).is_empty());
}

#[test]
fn many_producers_one_async_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = FileHandler::new(Level::Debug, Arc::new(LineFormatter::new()), dir.path())
        .unwrap()
        .with_max_size(4096);
    let logger = Arc::new(Logger::new("load", Arc::new(file)));
    logger.enable_async(16).unwrap();

    let producers: Vec<_> = (0..6)
        .map(|p| {
            let logger = Arc::clone(&logger);
            thread::spawn(move || {
                for n in 0..200 {
                    logger.notice_fmt(format_args!("producer {} line {}", p, n));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    logger.close().unwrap();

    assert_eq!(file_lines(dir.path()).len(), 1200);
    for entry in std::fs::read_dir(dir.path()).unwrap() {
        assert!(entry.unwrap().metadata().unwrap().len() <= 4096);
    }
}
