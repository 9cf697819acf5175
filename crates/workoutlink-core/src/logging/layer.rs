//! Tracing layer that writes JSONL entries

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use super::entry::LinkLogEntry;
use super::writer::InstanceLogWriter;

/// Writes every event to the JSONL file of the instance that logged it.
///
/// Span fields are inherited by the events inside the span, innermost value
/// winning, so events logged by a peer task carry that peer's `role` and
/// `instance`. Each `instance` gets its own file, opened on first use.
/// Events outside any peer span go to the default instance's file.
pub struct JsonlLayer {
    logs_dir: PathBuf,
    default: Arc<InstanceLogWriter>,
    writers: Mutex<HashMap<String, Arc<InstanceLogWriter>>>,
}

impl JsonlLayer {
    /// Layer writing under `logs_dir`, with `instance` as the default file
    pub fn new(logs_dir: impl AsRef<Path>, instance: impl Into<String>) -> std::io::Result<Self> {
        let logs_dir = logs_dir.as_ref().to_path_buf();
        Ok(Self {
            default: Arc::new(InstanceLogWriter::new(&logs_dir, instance)?),
            logs_dir,
            writers: Mutex::new(HashMap::new()),
        })
    }

    /// File for events logged outside any peer
    pub fn log_path(&self) -> &Path {
        self.default.path()
    }

    /// Default instance name
    pub fn instance(&self) -> &str {
        self.default.instance()
    }

    fn writer_for(&self, instance: Option<&str>) -> Arc<InstanceLogWriter> {
        let instance = match instance {
            Some(name) if name != self.default.instance() => file_safe(name),
            _ => return self.default.clone(),
        };

        let mut writers = self.writers.lock();
        if let Some(writer) = writers.get(&instance) {
            return writer.clone();
        }
        match InstanceLogWriter::new(&self.logs_dir, instance.as_str()) {
            Ok(writer) => {
                let writer = Arc::new(writer);
                writers.insert(instance, writer.clone());
                writer
            }
            Err(_) => self.default.clone(),
        }
    }
}

/// Instance names end up in file names
fn file_safe(instance: &str) -> String {
    instance.replace(['/', '\\'], "_")
}

/// Fields recorded on a span, stored in its extensions
struct SpanFields(Map<String, Value>);

impl<S> Layer<S> for JsonlLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        span.extensions_mut().insert(SpanFields(visitor.fields));
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut visitor = FieldVisitor::default();
        values.record(&mut visitor);
        let mut extensions = span.extensions_mut();
        if let Some(SpanFields(fields)) = extensions.get_mut::<SpanFields>() {
            fields.extend(visitor.fields);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut fields = Map::new();
        let mut span_names = Vec::new();

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                span_names.push(span.name());
                if let Some(SpanFields(span_fields)) = span.extensions().get::<SpanFields>() {
                    fields.extend(span_fields.clone());
                }
            }
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        fields.extend(visitor.fields);
        let instance = match fields.remove("instance") {
            Some(Value::String(name)) => Some(name),
            _ => None,
        };
        let writer = self.writer_for(instance.as_deref());

        let mut entry = LinkLogEntry::new(
            metadata.level().as_str().to_lowercase(),
            writer.instance(),
            metadata.target(),
            visitor.message.unwrap_or_default(),
        )
        .with_fields(fields);
        if !span_names.is_empty() {
            entry
                .fields
                .insert("span".to_string(), Value::String(span_names.join(" > ")));
        }

        // A failed log write must never take the peer down.
        let _ = writer.write(&entry);
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let mut buf = String::new();
        let _ = write!(buf, "{:?}", value);
        if field.name() == "message" {
            self.message = Some(buf);
        } else {
            self.insert(field, Value::String(buf));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Value::String(value.to_string()));
    }
}
