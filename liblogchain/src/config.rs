/*
 * TOML configuration
 *
 * Describes a whole logger (channel, extras, async queue, handler chain) in
 * a `[logging]` table, or bare at the top level of the file. Handlers are
 * listed as `[[logging.handlers]]` entries tagged by `type`:
 * console, file, http or robot.
 *
 * Enum values (levels, formats, extras) are case-insensitive.
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::LogError;
use crate::extra::{CallerLocation, ExtraProcessor, HostIp};
use crate::formatter::{Formatter, JsonFormatter, LineFormatter};
use crate::handler::Handler;
use crate::handlers::{ConsoleHandler, FileHandler, HttpHandler, Robot, RobotOptions, RobotPool, RobotTextFormatter};
use crate::level::Level;
use crate::logger::Logger;

/// Record serialization used by a handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    #[default]
    Line,
    Json,
}

// Separate implementation of Deserialize to handle case-insensitive values
impl<'de> Deserialize<'de> for FormatKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "line" | "text" => Ok(FormatKind::Line),
            "json" => Ok(FormatKind::Json),
            _ => Err(serde::de::Error::unknown_variant(&s, &["line", "text", "json"])),
        }
    }
}

impl FormatKind {
    fn formatter(self) -> Arc<dyn Formatter> {
        match self {
            FormatKind::Line => Arc::new(LineFormatter::new()),
            FormatKind::Json => Arc::new(JsonFormatter::new()),
        }
    }
}

/// Built-in extra processors that can be named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraKind {
    Caller,
    HostIp,
}

impl<'de> Deserialize<'de> for ExtraKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_lowercase().replace('-', "_").as_str() {
            "caller" => Ok(ExtraKind::Caller),
            "host_ip" | "ip" => Ok(ExtraKind::HostIp),
            _ => Err(serde::de::Error::unknown_variant(&s, &["caller", "host_ip"])),
        }
    }
}

impl ExtraKind {
    fn build(self) -> Box<dyn ExtraProcessor> {
        match self {
            ExtraKind::Caller => Box::new(CallerLocation),
            ExtraKind::HostIp => Box::new(HostIp::new()),
        }
    }
}

fn default_channel() -> String {
    "app".to_string()
}

fn default_level() -> Level {
    Level::Debug
}

fn default_close_timeout_ms() -> u64 {
    2000
}

fn default_flush_interval_ms() -> u64 {
    1000
}

/// Full description of one logger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Queue size for async dispatch; absent means synchronous
    #[serde(default)]
    pub async_capacity: Option<usize>,

    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,

    #[serde(default)]
    pub extras: Vec<ExtraKind>,

    /// Handler chain, in dispatch order
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            channel: default_channel(),
            async_capacity: None,
            close_timeout_ms: default_close_timeout_ms(),
            extras: Vec::new(),
            handlers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HandlerConfig {
    Console(ConsoleConfig),
    File(FileConfig),
    Http(HttpConfig),
    Robot(RobotPoolConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default = "default_level")]
    pub level: Level,
    #[serde(default)]
    pub format: FormatKind,
    #[serde(default)]
    pub bubble: bool,
    /// Records this severe or worse go to stderr
    #[serde(default)]
    pub stderr_level: Option<Level>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default = "default_level")]
    pub level: Level,
    #[serde(default)]
    pub format: FormatKind,
    #[serde(default)]
    pub bubble: bool,
    pub dir: PathBuf,
    #[serde(default)]
    pub prefix: Option<String>,
    /// Bytes per file, 0 for unlimited
    #[serde(default)]
    pub max_size: Option<u64>,
    #[serde(default)]
    pub perm: Option<u32>,
    #[serde(default)]
    pub buffer_size: Option<usize>,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_level")]
    pub level: Level,
    #[serde(default)]
    pub format: FormatKind,
    #[serde(default)]
    pub bubble: bool,
    pub url: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotPoolConfig {
    #[serde(default = "default_level")]
    pub level: Level,
    #[serde(default)]
    pub dedup: bool,
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    /// chrono strftime pattern for the message time
    #[serde(default)]
    pub time_format: Option<String>,
    pub robots: Vec<RobotEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotEndpoint {
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub at_mobiles: Vec<String>,
    #[serde(default)]
    pub at_all: bool,
}

impl LoggerConfig {
    /// Reads a TOML file, see [`LoggerConfig::from_toml`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| LogError::Config {
            field: "path".to_string(),
            reason: format!("could not read '{}': {}", path.as_ref().display(), e),
        })?;
        Self::from_toml(&text)
    }

    /// Parses a `[logging]` table, or a bare config when there is none.
    pub fn from_toml(text: &str) -> Result<Self, LogError> {
        let mut table: toml::Table = toml::from_str(text)?;
        let config: LoggerConfig = match table.remove("logging") {
            Some(logging) => logging.try_into()?,
            None => toml::Value::Table(table).try_into()?,
        };
        Ok(config)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

impl HandlerConfig {
    /// Builds the handler, creating directories and starting workers.
    pub fn build(&self) -> Result<Arc<dyn Handler>, LogError> {
        let handler: Arc<dyn Handler> = match self {
            HandlerConfig::Console(config) => {
                let mut handler = ConsoleHandler::new(config.level, config.format.formatter()).with_bubble(config.bubble);
                if let Some(split) = config.stderr_level {
                    handler = handler.with_stderr_split(split);
                }
                Arc::new(handler)
            }
            HandlerConfig::File(config) => {
                let mut handler = FileHandler::new(config.level, config.format.formatter(), &config.dir)?
                    .with_bubble(config.bubble);
                if let Some(prefix) = &config.prefix {
                    handler = handler.with_prefix(prefix.clone());
                }
                if let Some(max_size) = config.max_size {
                    handler = handler.with_max_size(max_size);
                }
                if let Some(perm) = config.perm {
                    handler = handler.with_perm(perm);
                }
                if let Some(size) = config.buffer_size {
                    handler.set_buffer(size, Duration::from_millis(config.flush_interval_ms))?;
                }
                Arc::new(handler)
            }
            HandlerConfig::Http(config) => {
                let mut handler = HttpHandler::new(config.level, config.format.formatter(), &config.url)?
                    .with_bubble(config.bubble);
                if let Some(ms) = config.timeout_ms {
                    handler = handler.with_timeout(Duration::from_millis(ms));
                }
                for (name, value) in &config.headers {
                    handler = handler.with_header(name, value)?;
                }
                Arc::new(handler)
            }
            HandlerConfig::Robot(config) => Arc::new(config.build()?),
        };
        Ok(handler)
    }
}

impl RobotPoolConfig {
    fn options(&self) -> RobotOptions {
        let mut options = RobotOptions::default();
        if let Some(ms) = self.interval_ms {
            options.interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.timeout_ms {
            options.timeout = Duration::from_millis(ms);
        }
        if let Some(capacity) = self.queue_capacity {
            options.queue_capacity = capacity;
        }
        options
    }

    fn build(&self) -> Result<RobotPool, LogError> {
        let robots = self
            .robots
            .iter()
            .map(|endpoint| {
                let mut formatter = endpoint
                    .at_mobiles
                    .iter()
                    .fold(RobotTextFormatter::new(), |f, mobile| f.at_mobile(mobile.clone()))
                    .at_all(endpoint.at_all);
                if let Some(format) = &self.time_format {
                    formatter = formatter.with_time_format(format.clone())?;
                }
                Robot::with_options(&endpoint.url, endpoint.secret.as_deref(), Arc::new(formatter), self.options())
            })
            .collect::<Result<Vec<_>, _>>()?;
        RobotPool::new(self.level, robots, self.dedup)
    }
}

impl Logger {
    /// Builds a logger from configuration: handlers in order, then extras,
    /// then async dispatch if a capacity is given.
    pub fn from_config(config: &LoggerConfig) -> Result<Logger, LogError> {
        let handlers = config
            .handlers
            .iter()
            .map(HandlerConfig::build)
            .collect::<Result<Vec<_>, _>>()?;
        let logger = Logger::with_handlers(config.channel.as_str(), handlers).with_close_timeout(config.close_timeout());
        for extra in &config.extras {
            logger.push_extra(extra.build());
        }
        if let Some(capacity) = config.async_capacity {
            logger.enable_async(capacity)?;
        }
        tracing::debug!(
            channel = %config.channel,
            handlers = config.handlers.len(),
            async_capacity = ?config.async_capacity,
            "logger built from config"
        );
        Ok(logger)
    }

    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Logger, LogError> {
        Self::from_config(&LoggerConfig::from_file(path)?)
    }
}
