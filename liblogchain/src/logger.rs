/*
 * Logger: the dispatcher
 *
 * A Logger owns an ordered handler chain and an ordered list of extra
 * processors. Every leveled call:
 * - returns at once if the logger is closed or no handler accepts the level
 * - builds a Record and runs the extra processors over it
 * - dispatches it on the caller's thread, or queues it when async mode is on
 *
 * In async mode one supervised drain task on the shared runtime pulls records
 * off a bounded queue in FIFO order. A full queue blocks the producer until
 * there is room; records are never dropped on overflow.
 *
 * Closing marks the logger closed, waits (up to a timeout) for the queue to
 * drain, then closes every handler in order. The outcome of the first close
 * is kept and handed back to every later caller.
 */

use serde_json::Value;
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::error::{CloseError, LogError};
use crate::extra::ExtraProcessor;
use crate::handler::{any_accepts, dispatch, Handler};
use crate::level::Level;
use crate::record::Record;
use crate::runtime::{runtime, wait};
use crate::supervisor::supervise_blocking;

pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type HandlerChain = Arc<RwLock<Vec<Arc<dyn Handler>>>>;

struct AsyncQueue {
    sender: mpsc::Sender<Record>,
    drain: JoinHandle<()>,
}

pub struct Logger {
    channel: String,
    handlers: HandlerChain,
    extras: RwLock<Vec<Box<dyn ExtraProcessor>>>,
    closed: AtomicBool,
    queue: RwLock<Option<AsyncQueue>>,
    // Set when close gave up waiting; the drain task then discards the rest
    abandon: Arc<AtomicBool>,
    close_timeout: Duration,
    close_outcome: Mutex<Option<Result<(), CloseError>>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

macro_rules! leveled_methods {
    ($($level:ident => $plain:ident, $formatted:ident;)+) => {
        $(
            #[doc = concat!("Logs `message` at ", stringify!($level), " level.")]
            #[track_caller]
            pub fn $plain(&self, message: &str, context: Option<Value>) {
                self.log(Level::$level, message, context);
            }

            #[doc = concat!("Logs preformatted arguments at ", stringify!($level), " level.")]
            #[track_caller]
            pub fn $formatted(&self, args: fmt::Arguments<'_>) {
                self.log_fmt(Level::$level, args);
            }
        )+
    };
}

impl Logger {
    /// Creates a synchronous logger with a single handler.
    pub fn new(channel: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self::with_handlers(channel, vec![handler])
    }

    pub fn with_handlers(channel: impl Into<String>, handlers: Vec<Arc<dyn Handler>>) -> Self {
        Logger {
            channel: channel.into(),
            handlers: Arc::new(RwLock::new(handlers)),
            extras: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
            queue: RwLock::new(None),
            abandon: Arc::new(AtomicBool::new(false)),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            close_outcome: Mutex::new(None),
        }
    }

    /// How long `close` waits for the async queue to drain.
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Snapshot of the handler chain in dispatch order.
    pub fn handlers(&self) -> Vec<Arc<dyn Handler>> {
        read(&self.handlers).clone()
    }

    pub fn extras_len(&self) -> usize {
        read(&self.extras).len()
    }

    pub fn is_async(&self) -> bool {
        read(&self.queue).is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn push_handler(&self, handler: Arc<dyn Handler>) -> &Self {
        write(&self.handlers).push(handler);
        self
    }

    pub fn pop_handler(&self) -> Option<Arc<dyn Handler>> {
        write(&self.handlers).pop()
    }

    pub fn push_extra(&self, extra: Box<dyn ExtraProcessor>) -> &Self {
        write(&self.extras).push(extra);
        self
    }

    pub fn pop_extra(&self) -> Option<Box<dyn ExtraProcessor>> {
        write(&self.extras).pop()
    }

    /// Switches to queued dispatch with a queue of `capacity` records.
    ///
    /// Calling it again while already async does nothing.
    pub fn enable_async(&self, capacity: usize) -> Result<(), LogError> {
        let mut queue = write(&self.queue);
        if queue.is_some() {
            return Ok(());
        }
        if self.is_closed() {
            return Err(LogError::Closed);
        }

        let (sender, mut receiver) = mpsc::channel::<Record>(capacity.max(1));
        let handlers = Arc::clone(&self.handlers);
        let abandon = Arc::clone(&self.abandon);
        let drain = runtime()?.spawn_blocking(move || {
            supervise_blocking("async log drain", || {
                while let Some(record) = receiver.blocking_recv() {
                    if abandon.load(Ordering::SeqCst) {
                        continue;
                    }
                    dispatch(&read(&handlers), &record);
                }
            })
        });

        *queue = Some(AsyncQueue { sender, drain });
        tracing::debug!(channel = %self.channel, capacity, "async dispatch enabled");
        Ok(())
    }

    /// True when the logger is open and some handler takes `level`.
    pub fn enabled(&self, level: Level) -> bool {
        !self.is_closed() && any_accepts(&read(&self.handlers), level)
    }

    #[track_caller]
    pub fn log(&self, level: Level, message: &str, context: Option<Value>) {
        self.add_record(level, message, context);
    }

    #[track_caller]
    pub fn log_fmt(&self, level: Level, args: fmt::Arguments<'_>) {
        let location = Location::caller();
        if !self.enabled(level) {
            return;
        }
        self.submit(level, args.to_string(), None, location);
    }

    /// Builds and routes one record. Returns false when it was not taken,
    /// because the logger is closed or no handler accepts `level`.
    #[track_caller]
    pub fn add_record(&self, level: Level, message: &str, context: Option<Value>) -> bool {
        let location = Location::caller();
        if !self.enabled(level) {
            return false;
        }
        self.submit(level, message.to_string(), context, location)
    }

    leveled_methods! {
        Emergency => emergency, emergency_fmt;
        Alert => alert, alert_fmt;
        Critical => critical, critical_fmt;
        Error => error, error_fmt;
        Warning => warning, warning_fmt;
        Notice => notice, notice_fmt;
        Info => info, info_fmt;
        Debug => debug, debug_fmt;
    }

    fn submit(
        &self,
        level: Level,
        message: String,
        context: Option<Value>,
        location: &'static Location<'static>,
    ) -> bool {
        let mut record = Record::new(self.channel.as_str(), level, message);
        record.context = context;
        record.location = Some(location);
        for extra in read(&self.extras).iter() {
            extra.process(&mut record);
        }

        let sender = read(&self.queue).as_ref().map(|queue| queue.sender.clone());
        match sender {
            Some(sender) => enqueue(&sender, record),
            // Closed between the level check and here
            None if self.is_closed() => false,
            None => {
                dispatch(&read(&self.handlers), &record);
                true
            }
        }
    }

    /// Closes with the default timeout.
    pub fn close(&self) -> Result<(), CloseError> {
        self.close_with_timeout(self.close_timeout)
    }

    /// Stops intake, drains the queue for at most `timeout`, then closes
    /// every handler in order. Only the first call does any work.
    pub fn close_with_timeout(&self, timeout: Duration) -> Result<(), CloseError> {
        let mut outcome = self
            .close_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(result) = outcome.as_ref() {
            return result.clone();
        }

        self.closed.store(true, Ordering::SeqCst);
        let queue = write(&self.queue).take();
        if let Some(AsyncQueue { sender, drain }) = queue {
            drop(sender);
            self.settle(drain, timeout);
        }

        let failures: Vec<String> = self
            .handlers()
            .iter()
            .filter_map(|handler| handler.close().err().map(|e| e.to_string()))
            .collect();
        let result = match CloseError::from_failures(failures) {
            Some(err) => Err(err),
            None => Ok(()),
        };
        match &result {
            Ok(()) => tracing::debug!(channel = %self.channel, "logger closed"),
            Err(e) => tracing::warn!(channel = %self.channel, error = %e, "logger closed with errors"),
        }
        *outcome = Some(result.clone());
        result
    }

    // Waits for the drain task to see the closed channel and finish
    fn settle(&self, drain: JoinHandle<()>, timeout: Duration) {
        let drained = runtime().and_then(|runtime| {
            let waiter = runtime.spawn(async move { tokio::time::timeout(timeout, drain).await.is_ok() });
            wait(waiter).map_err(|e| LogError::Runtime(e.to_string()))
        });
        match drained {
            Ok(true) => {}
            Ok(false) => {
                self.abandon.store(true, Ordering::SeqCst);
                tracing::warn!(
                    channel = %self.channel,
                    timeout_ms = timeout.as_millis() as u64,
                    "async queue not drained in time, dropping remaining records"
                );
            }
            Err(e) => {
                self.abandon.store(true, Ordering::SeqCst);
                tracing::warn!(channel = %self.channel, error = %e, "could not wait for async queue");
            }
        }
    }
}

fn enqueue(sender: &mpsc::Sender<Record>, record: Record) -> bool {
    match sender.try_send(record) {
        Ok(()) => true,
        // Queue full: block the producer until the drain makes room
        Err(TrySendError::Full(record)) => wait(sender.send(record)).is_ok(),
        Err(TrySendError::Closed(_)) => false,
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("channel", &self.channel)
            .field("handlers", &read(&self.handlers).len())
            .field("extras", &self.extras_len())
            .field("async", &self.is_async())
            .field("closed", &self.is_closed())
            .finish()
    }
}
