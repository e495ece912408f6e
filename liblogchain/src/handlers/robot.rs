/*
 * Chat robot (webhook) handler
 *
 * A RobotPool spreads records over one or more Robots round-robin. Each
 * Robot owns a small queue and one delivery worker that sends at most one
 * message per tick, which keeps us under the chat service's rate limit
 * (about 20 messages a minute per robot).
 *
 * Delivery is best effort:
 * - a full robot queue drops the new record
 * - delivery errors are logged, client side timeouts are expected and ignored
 * - the pool always lets the record bubble to the next handler
 *
 * With dedup enabled the pool also suppresses messages it has already seen
 * in the current window (60 seconds, or 10,000 distinct messages).
 */

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use serde::Serialize;
use sha2::Sha256;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::LogError;
use crate::formatter::{check_time_format, format_time, render_value, Formatter};
use crate::handler::Handler;
use crate::level::Level;
use crate::record::Record;
use crate::runtime::runtime;
use crate::supervisor::supervise_async;

pub const DEDUP_WINDOW_SECS: i64 = 60;
pub const DEDUP_MAX_ENTRIES: usize = 10_000;

type HmacSha256 = Hmac<Sha256>;

/// Who the robot mentions in each message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct At {
    #[serde(rename = "atMobiles", skip_serializing_if = "Vec::is_empty")]
    pub at_mobiles: Vec<String>,
    #[serde(rename = "isAtAll", skip_serializing_if = "std::ops::Not::not")]
    pub is_at_all: bool,
}

#[derive(Serialize)]
struct TextMessage<'a> {
    msgtype: &'static str,
    #[serde(rename = "At")]
    at: &'a At,
    text: TextContent,
}

#[derive(Serialize)]
struct TextContent {
    content: String,
}

/// Renders records as the robot's `text` message JSON.
#[derive(Debug, Clone, Default)]
pub struct RobotTextFormatter {
    at: At,
    time_format: Option<String>,
}

impl RobotTextFormatter {
    pub fn new() -> Self {
        RobotTextFormatter::default()
    }

    pub fn at_mobile(mut self, mobile: impl Into<String>) -> Self {
        self.at.at_mobiles.push(mobile.into());
        self
    }

    pub fn at_all(mut self, at_all: bool) -> Self {
        self.at.is_at_all = at_all;
        self
    }

    /// Fails on patterns chrono cannot render.
    pub fn with_time_format(mut self, format: impl Into<String>) -> Result<Self, LogError> {
        let format = format.into();
        check_time_format(&format)?;
        self.time_format = Some(format);
        Ok(self)
    }

    fn content(&self, record: &Record) -> Result<String, LogError> {
        let time = format_time(&record.timestamp, self.time_format.as_deref())?;
        let mut content = format!("[{}] {}.{} {}", time, record.channel, record.level, record.message);
        if let Some(context) = &record.context {
            content.push('\n');
            content.push_str(&context.to_string());
        }
        for (key, value) in &record.extra {
            content.push('\n');
            content.push_str(key);
            content.push_str(": ");
            content.push_str(&render_value(value));
        }
        Ok(content)
    }
}

impl Formatter for RobotTextFormatter {
    fn to_bytes(&self, record: &Record) -> Result<Vec<u8>, LogError> {
        let message = TextMessage {
            msgtype: "text",
            at: &self.at,
            text: TextContent {
                content: self.content(record)?,
            },
        };
        let mut bytes = serde_json::to_vec(&message)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    fn content_type(&self) -> &'static str {
        "application/json;charset=utf-8"
    }
}

/// `base64(HMAC-SHA256(secret, "<timestamp_ms>\n<secret>"))`
pub fn sign(secret: &[u8], timestamp_ms: i64) -> Result<String, LogError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| LogError::Config {
            field: "secret".to_string(),
            reason: e.to_string(),
        })?;
    mac.update(timestamp_ms.to_string().as_bytes());
    mac.update(b"\n");
    mac.update(secret);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Appends `timestamp` and `sign` query parameters to `url`.
pub fn signed_url(url: &Url, secret: &[u8], timestamp_ms: i64) -> Result<Url, LogError> {
    let signature = sign(secret, timestamp_ms)?;
    let mut url = url.clone();
    url.query_pairs_mut()
        .append_pair("timestamp", &timestamp_ms.to_string())
        .append_pair("sign", &signature);
    Ok(url)
}

/// Tuning knobs for a single robot.
#[derive(Debug, Clone)]
pub struct RobotOptions {
    /// Pause between two deliveries
    pub interval: Duration,
    pub timeout: Duration,
    pub queue_capacity: usize,
    /// Wait before restarting a worker that panicked
    pub restart_delay: Duration,
}

impl Default for RobotOptions {
    fn default() -> Self {
        RobotOptions {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(3),
            queue_capacity: 200,
            restart_delay: Duration::from_secs(10),
        }
    }
}

struct Worker {
    url: Url,
    secret: Option<Vec<u8>>,
    formatter: Arc<dyn Formatter>,
    client: Client,
    options: RobotOptions,
    queue: tokio::sync::Mutex<mpsc::Receiver<Record>>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.options.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let record = {
                let mut queue = self.queue.lock().await;
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    record = queue.recv() => record,
                }
            };
            match record {
                Some(record) => self.deliver(&record).await,
                None => return,
            }
        }
    }

    fn target(&self) -> Result<Url, LogError> {
        match &self.secret {
            Some(secret) => signed_url(&self.url, secret, Utc::now().timestamp_millis()),
            None => Ok(self.url.clone()),
        }
    }

    async fn deliver(&self, record: &Record) {
        let prepared = self
            .formatter
            .to_bytes(record)
            .and_then(|body| Ok((self.target()?, body)));
        let (url, body) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!(error = %e, "robot failed to prepare message");
                return;
            }
        };

        let result = self
            .client
            .post(url)
            .header(CONTENT_TYPE, self.formatter.content_type())
            .timeout(self.options.timeout)
            .body(body)
            .send()
            .await;
        match result {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(url = %self.url, status = %response.status(), "robot delivery rejected");
            }
            Ok(_) => {}
            Err(e) if e.is_timeout() => {}
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "robot delivery failed");
            }
        }
    }
}

/// One webhook endpoint with its own queue and delivery worker.
pub struct Robot {
    url: Url,
    sender: Mutex<Option<mpsc::Sender<Record>>>,
    cancel: CancellationToken,
    dropped: AtomicU64,
}

impl Robot {
    pub fn new(url: &str, secret: Option<&str>, formatter: Arc<dyn Formatter>) -> Result<Self, LogError> {
        Self::with_options(url, secret, formatter, RobotOptions::default())
    }

    /// Starts the robot's delivery worker on the background runtime.
    pub fn with_options(
        url: &str,
        secret: Option<&str>,
        formatter: Arc<dyn Formatter>,
        options: RobotOptions,
    ) -> Result<Self, LogError> {
        let url = Url::parse(url).map_err(|e| LogError::Config {
            field: "url".to_string(),
            reason: format!("invalid robot url '{}': {}", url, e),
        })?;
        let (sender, receiver) = mpsc::channel(options.queue_capacity.max(1));
        let cancel = CancellationToken::new();
        let restart_delay = options.restart_delay;
        let worker = Arc::new(Worker {
            url: url.clone(),
            secret: secret.filter(|s| !s.is_empty()).map(|s| s.as_bytes().to_vec()),
            formatter,
            client: Client::builder().build()?,
            options,
            queue: tokio::sync::Mutex::new(receiver),
            cancel: cancel.clone(),
        });

        runtime()?.spawn(async move {
            supervise_async("robot delivery", restart_delay, || Arc::clone(&worker).run()).await
        });

        Ok(Robot {
            url,
            sender: Mutex::new(Some(sender)),
            cancel,
            dropped: AtomicU64::new(0),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Records dropped because the queue was full or the robot closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queues a record without ever blocking. Returns false if it was dropped.
    pub fn send(&self, record: Record) -> bool {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let result = match sender.as_ref() {
            Some(sender) => sender.try_send(record),
            None => Err(TrySendError::Closed(record)),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if let TrySendError::Full(_) = e {
                    tracing::debug!(url = %self.url, "robot queue full, record dropped");
                }
                false
            }
        }
    }

    /// Stops accepting records and stops the worker. Repeat calls are no-ops.
    pub fn close(&self) {
        self.cancel.cancel();
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

impl Drop for Robot {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Recently seen messages, reset when stale or overgrown.
#[derive(Debug)]
pub struct DedupWindow {
    seen: HashSet<String>,
    started_at: i64,
    window_secs: i64,
    max_entries: usize,
}

impl DedupWindow {
    pub fn new() -> Self {
        Self::with_limits(DEDUP_WINDOW_SECS, DEDUP_MAX_ENTRIES)
    }

    pub fn with_limits(window_secs: i64, max_entries: usize) -> Self {
        DedupWindow {
            seen: HashSet::new(),
            started_at: 0,
            window_secs,
            max_entries,
        }
    }

    /// Returns true the first time `message` is seen in the current window.
    ///
    /// `now` is a unix timestamp in seconds.
    pub fn admit(&mut self, message: &str, now: i64) -> bool {
        if now - self.started_at > self.window_secs || self.seen.len() > self.max_entries {
            self.seen.clear();
            self.started_at = now;
        }
        if self.seen.contains(message) {
            return false;
        }
        self.seen.insert(message.to_string())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RobotPool {
    level: Level,
    robots: Vec<Robot>,
    next: AtomicUsize,
    dedup: Option<Mutex<DedupWindow>>,
}

impl RobotPool {
    pub fn new(level: Level, robots: Vec<Robot>, dedup: bool) -> Result<Self, LogError> {
        Self::with_dedup_window(level, robots, dedup.then(DedupWindow::new))
    }

    pub fn with_dedup_window(level: Level, robots: Vec<Robot>, dedup: Option<DedupWindow>) -> Result<Self, LogError> {
        if robots.is_empty() {
            return Err(LogError::Config {
                field: "robots".to_string(),
                reason: "a robot pool needs at least one robot".to_string(),
            });
        }
        Ok(RobotPool {
            level,
            robots,
            next: AtomicUsize::new(0),
            dedup: dedup.map(Mutex::new),
        })
    }

    pub fn robots(&self) -> &[Robot] {
        &self.robots
    }

    fn pick(&self) -> &Robot {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.robots.len();
        &self.robots[index]
    }

    fn is_duplicate(&self, record: &Record) -> bool {
        match &self.dedup {
            Some(window) => !window
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .admit(&record.message, record.timestamp.timestamp()),
            None => false,
        }
    }
}

impl Handler for RobotPool {
    fn accepts(&self, level: Level) -> bool {
        level.is_at_least(self.level)
    }

    fn handle(&self, record: &Record) -> bool {
        if self.is_duplicate(record) {
            return true;
        }
        self.pick().send(record.clone());
        true
    }

    fn close(&self) -> Result<(), LogError> {
        for robot in &self.robots {
            robot.close();
        }
        Ok(())
    }
}
