//! JSON logging for Kubernetes-style stdout capture.
//!
//! One JSON object per line. Required fields: `timestamp`, `level`,
//! `message`, `logger`. Structured context travels under `extra_fields`;
//! failure records additionally carry `error` and `error_type`.

use std::fmt;
use std::io;
use std::str::FromStr;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

#[derive(Serialize)]
struct LogRecord<'a> {
    timestamp: String,
    level: &'static str,
    message: &'a str,
    logger: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extra_fields: Option<&'a Value>,
}

/// Level-filtered JSON-line logger writing to stdout.
#[derive(Debug, Clone)]
pub struct JsonLogger {
    name: &'static str,
    level: LogLevel,
}

impl JsonLogger {
    pub fn new(name: &'static str, level: LogLevel) -> Self {
        Self { name, level }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.level
    }

    pub fn debug_enabled(&self) -> bool {
        self.enabled(LogLevel::Debug)
    }

    fn format_record(
        &self,
        level: LogLevel,
        message: &str,
        extra: Option<&Value>,
        error: Option<(String, String)>,
    ) -> String {
        let (error, error_type) = match error {
            Some((text, kind)) => (Some(text), Some(kind)),
            None => (None, None),
        };
        let record = LogRecord {
            timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            level: level.as_str(),
            message,
            logger: self.name,
            error,
            error_type,
            extra_fields: extra,
        };
        serde_json::to_string(&record).unwrap_or_else(|_| String::from("{}"))
    }

    pub fn log(&self, level: LogLevel, message: &str, extra: Option<Value>) {
        if !self.enabled(level) {
            return;
        }
        println!("{}", self.format_record(level, message, extra.as_ref(), None));
    }

    /// Log an I/O failure with `error` and `error_type` fields attached.
    pub fn log_io_error(
        &self,
        level: LogLevel,
        message: &str,
        err: &io::Error,
        extra: Option<Value>,
    ) {
        if !self.enabled(level) {
            return;
        }
        let detail = (err.to_string(), format!("{:?}", err.kind()));
        println!(
            "{}",
            self.format_record(level, message, extra.as_ref(), Some(detail))
        );
    }

    pub fn debug(&self, message: &str, extra: Option<Value>) {
        self.log(LogLevel::Debug, message, extra);
    }

    pub fn info(&self, message: &str, extra: Option<Value>) {
        self.log(LogLevel::Info, message, extra);
    }

    pub fn warning(&self, message: &str, extra: Option<Value>) {
        self.log(LogLevel::Warning, message, extra);
    }

    pub fn error(&self, message: &str, extra: Option<Value>) {
        self.log(LogLevel::Error, message, extra);
    }
}
