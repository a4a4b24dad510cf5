// SPDX-License-Identifier: GPL-3.0-or-later

//! Structured logging setup: the modern replacement for the original's
//! `openlog(3)`/`syslog(3)` calls, built on `tracing` rather than hand-rolled
//! formatting so every log line carries structured fields (peer addresses,
//! termination reasons) instead of pre-rendered strings.
//!
//! The JSON output path uses a small custom [`FormatEvent`] impl rather than
//! `tracing_subscriber`'s built-in `.json()` formatter, in the style of the
//! teacher crate's own `JsonFormatter`/`JsonVisitor` — trimmed here of the
//! teacher's span-field capture layer and `fastrace` distributed-tracing
//! integration, which have no counterpart in a single-process relay with no
//! cross-service request correlation to track.

use std::fmt::Debug;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{field::Visit, Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt,
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    EnvFilter, Registry,
};

use super::config::LogConfig;

/// Must be kept alive for the lifetime of the process when logging to a
/// file: dropping it stops the background flush thread.
pub struct LoggerGuard(#[allow(dead_code)] Option<WorkerGuard>);

/// Installs the global `tracing` subscriber according to `config`. Returns a
/// guard that must be held until shutdown.
pub fn init(config: &LogConfig) -> LoggerGuard {
    let filter = config
        .filter
        .clone()
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::new("info"));

    match &config.file {
        Some(path) => {
            let directory = std::path::Path::new(path)
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = std::path::Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "l4proxy.log".to_string());
            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            if config.json {
                install_json(filter, writer);
            } else {
                fmt().with_env_filter(filter).with_writer(writer).with_ansi(false).init();
            }
            LoggerGuard(Some(guard))
        },
        None => {
            if config.json {
                install_json(filter, std::io::stdout);
            } else {
                fmt().with_env_filter(filter).init();
            }
            LoggerGuard(None)
        },
    }
}

fn fmt() -> fmt::SubscriberBuilder {
    tracing_subscriber::fmt()
}

fn install_json<W>(filter: EnvFilter, writer: W)
where
    W: for<'a> fmt::MakeWriter<'a> + Send + Sync + 'static,
{
    let json_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .event_format(JsonFormatter)
        .fmt_fields(fmt::format::JsonFields::default());

    let subscriber = Registry::default().with(filter).with(json_layer);
    // Installing the global subscriber can only fail if one is already set,
    // which cannot happen this early in `main`.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// One structured JSON log line: timestamp, level, target, source line, and
/// whatever fields the event carried. Mirrors the shape of the teacher
/// crate's own `LogEntry`, minus the `module_path`/visibility toggles that
/// came from iSCSI-specific config knobs this crate has no equivalent of.
#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    level: String,
    target: String,
    line: Option<u32>,
    fields: Map<String, Value>,
}

struct JsonFormatter;

impl<S, N> FormatEvent<S, N> for JsonFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: event.metadata().level().to_string(),
            target: event.metadata().target().to_string(),
            line: event.metadata().line(),
            fields: visitor.fields,
        };

        writeln!(writer, "{}", serde_json::to_string(&entry).map_err(|_| std::fmt::Error)?)
    }
}

#[derive(Default)]
struct JsonVisitor {
    fields: Map<String, Value>,
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn Debug) {
        self.fields.insert(field.name().to_string(), json!(format!("{value:?}")));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields.insert(field.name().to_string(), json!(value));
    }
}
