// Copyright (C) 2022 Electronic Arts, Inc. All rights reserved.

//! Logging layer.
//!
//! Forwards every event to a channel so an embedding application can show or store the
//! messages of a resolution next to its own output.
use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tracing::Level;
use tracing_subscriber::Layer;

/// A `tracing` layer that sends each event as a [`LogEntry`].
pub struct CaptureLayer {
    tx: mpsc::UnboundedSender<LogEntry>,
}

impl CaptureLayer {
    pub const fn new(tx: mpsc::UnboundedSender<LogEntry>) -> Self {
        CaptureLayer { tx }
    }

    /// Create a layer together with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LogEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

#[derive(Clone, Debug)]
pub struct LogEntry {
    pub target: String,
    pub name: String,
    pub level: Level,
    pub message: String,
    /// Structured fields of the event, not including the message.
    pub fields: BTreeMap<String, serde_json::Value>,
    /// Names of the spans the event was emitted in, outermost first.
    pub spans: Vec<String>,
}

impl LogEntry {
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(serde_json::Value::as_str)
    }
}

impl<S> Layer<S> for CaptureLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut fields = BTreeMap::new();
        let mut visitor = JsonVisitor(&mut fields);
        event.record(&mut visitor);

        let message = match fields.remove("message") {
            Some(serde_json::Value::String(message)) => message,
            Some(other) => other.to_string(),
            None => "No Message".to_string(),
        };

        let spans = ctx
            .event_scope(event)
            .map(|scope| {
                scope
                    .from_root()
                    .map(|span| span.name().to_string())
                    .collect()
            })
            .unwrap_or_default();

        let entry = LogEntry {
            target: event.metadata().target().into(),
            name: event.metadata().name().into(),
            level: *event.metadata().level(),
            message,
            fields,
            spans,
        };

        // The receiver may already be gone.
        let _ = self.tx.send(entry);
    }
}

struct JsonVisitor<'a>(&'a mut BTreeMap<String, serde_json::Value>);

impl tracing::field::Visit for JsonVisitor<'_> {
    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.0
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_error(
        &mut self,
        field: &tracing::field::Field,
        value: &(dyn std::error::Error + 'static),
    ) {
        self.0.insert(
            field.name().to_string(),
            serde_json::json!(value.to_string()),
        );
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.insert(
            field.name().to_string(),
            serde_json::json!(format!("{value:?}")),
        );
    }
}
