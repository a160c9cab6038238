use devpod_config::Environment;
use serde_json::{Map, Value};
use std::io::{Error, Write};
use std::sync::{Arc, Once};
use thiserror::Error;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::{LogTracer, log_tracer::SetLoggerError};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber, Registry, fmt, layer::SubscriberExt};

const APP_KEY_IN_LOG: &str = "app";
const PROJECT_KEY_IN_LOG: &str = "project";

/// Errors that can occur during tracing initialization.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to init log tracer: {0}")]
    InitLogTracer(#[from] SetLoggerError),

    #[error("failed to set global default subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),

    #[error("an io error occurred: {0}")]
    Io(#[from] Error),
}

/// Keeps the background log writer alive.
///
/// Dropping it flushes the JSON lines still queued for stderr. Console logging writes
/// synchronously and holds nothing.
#[must_use]
pub struct LogFlusher(Option<WorkerGuard>);

static INIT_TEST_TRACING: Once = Once::new();

/// Initializes tracing for tests.
///
/// Call once at the beginning of a test and set `ENABLE_TRACING=1` to view tracing output:
/// ```bash
/// ENABLE_TRACING=1 cargo test test_name
/// ```
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_ok() {
            Environment::Dev.set();
            let _log_flusher =
                init_tracing("test", None).expect("Failed to initialize tracing for tests");
        }
    });
}

/// Adds the fields of `extra` missing from a JSON log line.
///
/// Returns `None` when the line is not a JSON object or already carries every field.
fn inject_fields(line: &str, extra: &Map<String, Value>) -> Option<String> {
    let Value::Object(mut map) = serde_json::from_str::<Value>(line).ok()? else {
        return None;
    };

    let mut changed = false;
    for (key, value) in extra {
        if !map.contains_key(key) {
            map.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    if !changed {
        return None;
    }

    let modified = serde_json::to_string(&map).ok()?;
    if line.ends_with('\n') {
        Some(format!("{modified}\n"))
    } else {
        Some(modified)
    }
}

/// Writer that tags every JSON log line with the app and project it belongs to.
struct FieldInjectingWriter<W> {
    inner: W,
    fields: Arc<Map<String, Value>>,
}

impl<W> Write for FieldInjectingWriter<W>
where
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(line) = std::str::from_utf8(buf)
            && let Some(output) = inject_fields(line, &self.fields)
        {
            // The caller only knows about its own buffer, so report its length back.
            self.inner.write_all(output.as_bytes())?;
            return Ok(buf.len());
        }

        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Initializes tracing for a dev pod binary.
///
/// Production-like environments log JSON lines to stderr tagged with `app_name` and
/// `project`. Development logs pretty output to the console.
pub fn init_tracing(app_name: &str, project: Option<String>) -> Result<LogFlusher, TracingError> {
    // Captures logs emitted through the `log` crate, e.g. by the http stack of `kube`.
    LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    if Environment::load()?.is_prod() {
        let mut fields = Map::new();
        fields.insert(APP_KEY_IN_LOG.to_string(), Value::from(app_name));
        if let Some(project) = project {
            fields.insert(PROJECT_KEY_IN_LOG.to_string(), Value::from(project));
        }
        configure_json_tracing(filter, Arc::new(fields))
    } else {
        configure_console_tracing(filter)
    }
}

fn configure_json_tracing(
    filter: EnvFilter,
    fields: Arc<Map<String, Value>>,
) -> Result<LogFlusher, TracingError> {
    let (stderr, guard) = tracing_appender::non_blocking(std::io::stderr());

    let format = fmt::format()
        .with_level(true)
        .with_ansi(false)
        .with_target(false);

    let subscriber = Registry::default().with(filter).with(
        fmt::layer()
            .event_format(format)
            .with_writer(move || FieldInjectingWriter {
                inner: stderr.make_writer(),
                fields: fields.clone(),
            })
            .json()
            .with_current_span(true)
            .with_span_list(true),
    );

    set_global_default(subscriber)?;

    Ok(LogFlusher(Some(guard)))
}

fn configure_console_tracing(filter: EnvFilter) -> Result<LogFlusher, TracingError> {
    let format = fmt::format()
        .with_level(true)
        .with_ansi(true)
        .pretty()
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let subscriber = FmtSubscriber::builder()
        .event_format(format)
        .with_env_filter(filter)
        .finish();

    set_global_default(subscriber)?;

    Ok(LogFlusher(None))
}
