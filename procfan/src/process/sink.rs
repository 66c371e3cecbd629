//! Line sinks: where each line of child output ends up.
//!
//! A caller describes a sink with an [`OutputHandler`] (a callback or the name
//! of a logging destination) or leaves it out to get the default destination.
//! [`LineSink::resolve`] turns that description into the concrete sink once,
//! before the process starts; the per-line path never re-inspects it.
//!
//! Logging destinations are `tracing` events with target [`OUTPUT_TARGET`]
//! and a `destination` field, so subscribers can filter child output
//! separately from the library's own diagnostics.

use std::borrow::Cow;
use std::fmt;

use tracing::{event, Level};

/// Target of every tracing event that carries a line of child output.
pub const OUTPUT_TARGET: &str = "procfan::output";

/// Callback receiving one decoded line, without its terminator.
pub type LineCallback = Box<dyn FnMut(&str) + Send>;

/// How the caller wants one output stream handled.
pub enum OutputHandler {
    /// Hand every line to this callback, untouched.
    Callback(LineCallback),
    /// Log every line to the named destination.
    Destination(String),
}

impl OutputHandler {
    pub fn callback<F>(callback: F) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        Self::Callback(Box::new(callback))
    }

    pub fn destination(name: impl Into<String>) -> Self {
        Self::Destination(name.into())
    }
}

impl fmt::Debug for OutputHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("Callback(..)"),
            Self::Destination(name) => f.debug_tuple("Destination").field(name).finish(),
        }
    }
}

/// Handling of one output stream: handler, severity, and line prefix.
///
/// Severity and prefix only apply when lines are logged; a callback always
/// receives the bare line.
#[derive(Debug)]
pub struct OutputOptions {
    /// `None` logs to the default destination (derived from the program).
    pub handler: Option<OutputHandler>,

    /// Severity of logged lines.
    pub level: Level,

    /// Prepended to every logged line.
    pub prefix: String,
}

impl OutputOptions {
    /// Defaults for standard output: logged at INFO.
    pub const fn stdout() -> Self {
        Self {
            handler: None,
            level: Level::INFO,
            prefix: String::new(),
        }
    }

    /// Defaults for standard error: logged at WARN.
    pub const fn stderr() -> Self {
        Self {
            handler: None,
            level: Level::WARN,
            prefix: String::new(),
        }
    }

    pub fn handler(mut self, handler: OutputHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn callback<F>(self, callback: F) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.handler(OutputHandler::callback(callback))
    }

    pub fn destination(self, name: impl Into<String>) -> Self {
        self.handler(OutputHandler::destination(name))
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Resolve into a concrete sink, using `default_destination` if no
    /// handler was given.
    pub fn into_sink(self, default_destination: &str) -> LineSink {
        LineSink::resolve(self.handler, default_destination, self.level, &self.prefix)
    }
}

/// A line sink that logs to a named destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSink {
    destination: String,
    level: Level,
    prefix: String,
}

impl LogSink {
    /// Log to `destination` at INFO with no prefix.
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            level: Level::INFO,
            prefix: String::new(),
        }
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Emit one already-decoded line.
    pub fn emit(&self, line: &str) {
        let destination = self.destination.as_str();
        let prefix = self.prefix.as_str();

        // Event levels must be constants, hence one arm per level.
        match self.level {
            Level::ERROR => {
                event!(target: OUTPUT_TARGET, Level::ERROR, destination, "{prefix}{line}");
            }
            Level::WARN => {
                event!(target: OUTPUT_TARGET, Level::WARN, destination, "{prefix}{line}");
            }
            Level::INFO => {
                event!(target: OUTPUT_TARGET, Level::INFO, destination, "{prefix}{line}");
            }
            Level::DEBUG => {
                event!(target: OUTPUT_TARGET, Level::DEBUG, destination, "{prefix}{line}");
            }
            _ => {
                event!(target: OUTPUT_TARGET, Level::TRACE, destination, "{prefix}{line}");
            }
        }
    }
}

/// Resolved handler for one output stream.
pub enum LineSink {
    Callback(LineCallback),
    Log(LogSink),
}

impl LineSink {
    /// Turn a handler description into a sink.
    ///
    /// A callback is used as-is. A named destination, or the absence of a
    /// handler (meaning `default_destination`), becomes a [`LogSink`] at
    /// `default_level` with `prefix`.
    pub fn resolve(
        handler: Option<OutputHandler>,
        default_destination: &str,
        default_level: Level,
        prefix: &str,
    ) -> Self {
        let destination = match handler {
            Some(OutputHandler::Callback(callback)) => return Self::Callback(callback),
            Some(OutputHandler::Destination(name)) => name,
            None => default_destination.to_string(),
        };
        Self::Log(LogSink::new(destination).level(default_level).prefix(prefix))
    }

    /// Handle one raw line as read from the pipe, terminator included.
    pub fn line(&mut self, raw: &[u8]) {
        let decoded = decode_line(raw);
        let line: &str = &decoded;
        match self {
            Self::Callback(callback) => callback(line),
            Self::Log(sink) => sink.emit(line),
        }
    }
}

impl From<LogSink> for LineSink {
    fn from(sink: LogSink) -> Self {
        Self::Log(sink)
    }
}

impl fmt::Debug for LineSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("Callback(..)"),
            Self::Log(sink) => f.debug_tuple("Log").field(sink).finish(),
        }
    }
}

/// Strip one trailing `\n` or `\r\n` and decode, replacing invalid UTF-8
/// with U+FFFD.
pub fn decode_line(raw: &[u8]) -> Cow<'_, str> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw)
}
