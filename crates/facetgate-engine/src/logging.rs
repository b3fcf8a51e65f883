//! Structured logging for applications embedding the engine.
//!
//! The engine, the domain core and the storage layer only emit `tracing`
//! events. [`init_logging`] installs a global subscriber whose default
//! filter raises the facetgate crates to the configured level while every
//! other target stays at `warn`. `RUST_LOG` replaces the default filter.
//!
//! Tests install a thread-scoped subscriber instead, see
//! [`init_test_logging`] and [`test_subscriber`].
//!
//! # Usage
//!
//! ```ignore
//! use facetgate_engine::logging::{init_logging, LoggingConfig};
//!
//! init_logging(
//!     LoggingConfig::json()
//!         .with_level(tracing::Level::DEBUG)
//!         .with_directive("facetgate_domain::cache=trace"),
//! );
//! ```

use tracing::subscriber::DefaultGuard;
use tracing::{Level, Subscriber};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    prelude::*,
    EnvFilter,
};

/// Targets raised to the configured level by the default filter.
pub const FACETGATE_TARGETS: [&str; 3] =
    ["facetgate_storage", "facetgate_domain", "facetgate_engine"];

/// Level for targets outside the facetgate crates.
const FOREIGN_LEVEL: Level = Level::WARN;

/// Output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable, multi-line.
    Text,
    /// One JSON object per event.
    Json,
}

/// Configuration for structured logging.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Level of the facetgate crates when `RUST_LOG` is not set.
    pub default_level: Level,
    /// Additional `target=level` directives appended to the default filter.
    pub directives: Vec<String>,
    /// Whether to log span enter and exit.
    pub include_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            default_level: Level::INFO,
            directives: Vec::new(),
            include_spans: false,
        }
    }
}

impl LoggingConfig {
    pub fn json() -> Self {
        Self {
            format: LogFormat::Json,
            ..Default::default()
        }
    }

    pub fn text() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    /// Adds a filter directive such as `facetgate_domain::projection=trace`.
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.include_spans = true;
        self
    }

    /// The default filter, e.g. `warn,facetgate_storage=info,...`.
    pub fn filter_directives(&self) -> String {
        let level = self.default_level.as_str().to_lowercase();
        let mut directives = vec![FOREIGN_LEVEL.as_str().to_lowercase()];
        directives.extend(
            FACETGATE_TARGETS
                .iter()
                .map(|target| format!("{target}={level}")),
        );
        directives.extend(self.directives.iter().cloned());
        directives.join(",")
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.filter_directives()))
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::ENTER | FmtSpan::EXIT
        } else {
            FmtSpan::NONE
        }
    }
}

/// Initializes the global subscriber. Returns false when one was already
/// installed, in which case the call has no effect.
pub fn init_logging(config: LoggingConfig) -> bool {
    let filter = config.env_filter();
    let span_events = config.span_events();
    let installed = match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .json()
                    .with_span_events(span_events)
                    .with_current_span(true)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            ),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .pretty()
                    .with_span_events(span_events)
                    .with_target(true),
            ),
        ),
    };
    installed.is_ok()
}

/// A JSON subscriber for the facetgate targets at `level`, writing to
/// `writer`. Ignores `RUST_LOG` so captured output is deterministic.
pub fn test_subscriber<W>(writer: W, level: Level) -> impl Subscriber + Send + Sync
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let config = LoggingConfig::json().with_level(level);
    tracing_subscriber::registry()
        .with(EnvFilter::new(config.filter_directives()))
        .with(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_current_span(true),
        )
}

/// Routes facetgate debug logs of the current thread through the libtest
/// output capture, so they show up for failing tests only.
pub fn init_test_logging() -> DefaultGuard {
    tracing::subscriber::set_default(test_subscriber(fmt::TestWriter::new(), Level::DEBUG))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct CaptureWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl CaptureWriter {
        fn lines(&self) -> Vec<serde_json::Value> {
            String::from_utf8_lossy(&self.buffer.lock())
                .lines()
                .filter(|line| !line.is_empty())
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    impl std::io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buffer.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CaptureWriter {
        type Writer = CaptureWriter;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_default_filter_scopes_level_to_facetgate_crates() {
        let config = LoggingConfig::text().with_level(Level::DEBUG);
        assert_eq!(
            config.filter_directives(),
            "warn,facetgate_storage=debug,facetgate_domain=debug,facetgate_engine=debug"
        );
        assert_eq!(config.format, LogFormat::Text);
    }

    #[test]
    fn test_extra_directives_are_appended() {
        let config = LoggingConfig::json()
            .with_directive("facetgate_domain::cache=trace")
            .with_spans();
        assert!(config
            .filter_directives()
            .ends_with(",facetgate_engine=info,facetgate_domain::cache=trace"));
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.span_events(), FmtSpan::ENTER | FmtSpan::EXIT);
    }

    #[test]
    fn test_subscriber_keeps_facetgate_events_and_drops_foreign_ones() {
        let writer = CaptureWriter::default();
        let subscriber = test_subscriber(writer.clone(), Level::DEBUG);

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!(target: "facetgate_domain::authorizer", node = "/content/doc", "resolved decision");
            tracing::info!(target: "hyper::proto", "foreign chatter");
            tracing::warn!(target: "hyper::proto", "foreign warning");
        });

        let lines = writer.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["target"], "facetgate_domain::authorizer");
        assert_eq!(lines[0]["fields"]["node"], "/content/doc");
        assert_eq!(lines[1]["level"], "WARN");
    }
}
