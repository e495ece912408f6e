/*
 * HTTP handler
 *
 * POSTs every accepted record, formatted, to a fixed endpoint and waits for
 * the answer before returning. The request itself runs on the library's
 * background runtime so producers do not need one.
 */

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::error::LogError;
use crate::formatter::Formatter;
use crate::handler::Handler;
use crate::level::Level;
use crate::record::Record;
use crate::runtime::{runtime, wait};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1500);

pub struct HttpHandler {
    level: Level,
    formatter: Arc<dyn Formatter>,
    bubble: bool,
    endpoint: String,
    headers: HeaderMap,
    timeout: Duration,
    client: Client,
}

impl HttpHandler {
    pub fn new(level: Level, formatter: Arc<dyn Formatter>, endpoint: &str) -> Result<Self, LogError> {
        let client = Client::builder().build()?;
        Ok(HttpHandler {
            level,
            formatter,
            bubble: false,
            endpoint: endpoint.to_string(),
            headers: HeaderMap::new(),
            timeout: DEFAULT_TIMEOUT,
            client,
        })
    }

    pub fn with_bubble(mut self, bubble: bool) -> Self {
        self.bubble = bubble;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds a request header. An explicit Content-Type wins over the formatter's.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, LogError> {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| LogError::Config {
            field: "headers".to_string(),
            reason: format!("invalid header name '{}': {}", name, e),
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| LogError::Config {
            field: "headers".to_string(),
            reason: format!("invalid value for header '{}': {}", name, e),
        })?;
        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    fn headers_for_request(&self) -> HeaderMap {
        let mut headers = self.headers.clone();
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(self.formatter.content_type()));
        }
        headers
    }

    fn deliver(&self, record: &Record) -> Result<(), LogError> {
        let body = self.formatter.to_bytes(record)?;
        let request = self
            .client
            .post(&self.endpoint)
            .headers(self.headers_for_request())
            .timeout(self.timeout)
            .body(body);

        let task = runtime()?.spawn(async move {
            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(LogError::Status(response.status()));
            }
            Ok::<(), LogError>(())
        });
        wait(task).map_err(|e| LogError::Runtime(format!("http delivery task failed: {}", e)))?
    }
}

impl Handler for HttpHandler {
    fn accepts(&self, level: Level) -> bool {
        level.is_at_least(self.level)
    }

    fn handle(&self, record: &Record) -> bool {
        match self.deliver(record) {
            Ok(()) => self.bubble,
            Err(e) => {
                tracing::warn!(endpoint = %self.endpoint, error = %e, "http handler failed to deliver record");
                true
            }
        }
    }

    fn close(&self) -> Result<(), LogError> {
        Ok(())
    }
}
