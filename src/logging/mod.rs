//! Log capture and logging configuration
//!
//! Every `run` opens a [`LogCapture`] scope. While it is open, events that
//! belong to steps are copied into the step's [`LogRecords`] by the
//! [`CaptureLayer`], which must be part of the installed subscriber.

pub mod config;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{reload, EnvFilter, Layer, Registry};

pub use config::{LogConfig, LogConfigError, LogConfigGuard};

use crate::core::step::ROOT_LOGGER;

/// One captured log event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    /// Qualified name of the step that emitted the event, when known
    pub step: Option<String>,
    pub message: String,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} - {} - {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.step.as_deref().unwrap_or(&self.target),
            self.level,
            self.message
        )
    }
}

/// Shared, growable list of captured records
#[derive(Debug, Clone, Default)]
pub struct LogRecords(Arc<Mutex<Vec<LogRecord>>>);

impl LogRecords {
    pub fn push(&self, record: LogRecord) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(record);
    }

    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn messages(&self) -> Vec<String> {
        self.snapshot().into_iter().map(|record| record.message).collect()
    }
}

thread_local! {
    static CAPTURES: RefCell<Vec<LogRecords>> = const { RefCell::new(Vec::new()) };
}

/// Scope during which step events are captured into a [`LogRecords`].
///
/// Scopes nest: an event is recorded by every open scope on the thread, so
/// a pipeline also sees what its sub-steps logged.
#[must_use]
pub struct LogCapture {
    records: LogRecords,
}

impl LogCapture {
    /// Clear `records` and start capturing into it
    pub fn begin(records: &LogRecords) -> Self {
        records.0.lock().unwrap_or_else(PoisonError::into_inner).clear();
        CAPTURES.with(|stack| stack.borrow_mut().push(records.clone()));
        Self {
            records: records.clone(),
        }
    }

    pub fn records(&self) -> &LogRecords {
        &self.records
    }
}

impl Drop for LogCapture {
    fn drop(&mut self) {
        CAPTURES.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|r| Arc::ptr_eq(&r.0, &self.records.0)) {
                stack.remove(pos);
            }
        });
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    step: Option<String>,
    extra: Vec<String>,
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "step" => self.step = Some(value.to_string()),
            name => self.extra.push(format!("{}={}", name, value)),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            "step" => self.step = Some(format!("{:?}", value)),
            name => self.extra.push(format!("{}={:?}", name, value)),
        }
    }
}

/// Layer feeding open [`LogCapture`] scopes
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureLayer;

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let active = CAPTURES.with(|stack| !stack.borrow().is_empty());
        if !active {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);
        let target = event.metadata().target();
        if visitor.step.is_none() && !target.starts_with(ROOT_LOGGER) {
            return;
        }

        let mut message = visitor.message;
        if !visitor.extra.is_empty() {
            message = format!("{} {}", message, visitor.extra.join(" "));
        }
        let record = LogRecord {
            timestamp: Utc::now(),
            level: event.metadata().level().to_string(),
            target: target.to_string(),
            step: visitor.step,
            message,
        };
        CAPTURES.with(|stack| {
            for records in stack.borrow().iter() {
                records.push(record.clone());
            }
        });
    }
}

/// Subscriber that only captures, for embedding and tests
pub fn capture_subscriber() -> impl Subscriber + Send + Sync {
    Registry::default().with(CaptureLayer)
}

/// Install the process-wide subscriber: a reloadable filter, formatted
/// output on stderr and step log capture.
pub fn init_subscriber(base: &LogConfig) -> Result<(), LogConfigError> {
    let filter = base.filter()?;
    let (filter, handle) = reload::Layer::new(filter);
    let subscriber = Registry::default()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(CaptureLayer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| LogConfigError::Install(e.to_string()))?;

    config::install_reloader(base.level.clone(), move |directive: &str| {
        let filter = EnvFilter::try_new(directive).map_err(|e| e.to_string())?;
        handle.reload(filter).map_err(|e| e.to_string())
    });
    Ok(())
}
