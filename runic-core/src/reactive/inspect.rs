//! Instrumentation
//!
//! Diagnostic taps that observe reactive values without joining the graph.
//!
//! # How It Works
//!
//! Each `log*` call resolves its arguments to JSON inside an `Inspect` frame.
//! Serializing a [`State`](super::State) or [`Derived`](super::Derived) reads
//! through to its current value, so nested reactive values resolve deeply.
//! The frame records those reads but never turns them into edges, and the
//! caller's frame does not see them.
//!
//! The resolved values go to the runtime's [`InspectSink`]. The default
//! [`TracingSink`] emits `tracing` events on target `runic::inspect`.
//!
//! `log_trace` additionally watches every source cell the logged values were
//! computed from. A later write to one of those cells emits a
//! [`InspectKind::Mutation`] event carrying the location of the write.

use std::fmt;
use std::panic::Location;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::FrameKind;
use super::runtime::{Runtime, Shared};
use crate::graph::NodeId;

/// Anything that can be resolved for instrumentation.
///
/// Implemented for every `Serialize` type.
pub trait Inspect {
    fn to_value(&self) -> Result<Value, serde_json::Error>;
}

impl<T: Serialize + ?Sized> Inspect for T {
    fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InspectKind {
    Log,
    Trace,
    Table,
    Break,
    /// A write to a cell watched by an earlier `log_trace`.
    Mutation,
}

/// One instrumentation event.
#[derive(Debug, Clone)]
pub struct InspectEvent {
    pub kind: InspectKind,
    /// Resolved values, in argument order. Empty for mutations.
    pub values: Vec<Value>,
    /// Call-site of the `log*` call, or of the write for mutations.
    pub location: &'static Location<'static>,
    /// The written cell, for mutations.
    pub node: Option<NodeId>,
    /// Version of the cell after the write, for mutations.
    pub version: Option<u64>,
    /// Call-site of the `log_trace` that started watching the cell.
    pub origin: Option<&'static Location<'static>>,
}

impl InspectEvent {
    fn new(kind: InspectKind, values: Vec<Value>, location: &'static Location<'static>) -> Self {
        Self {
            kind,
            values,
            location,
            node: None,
            version: None,
            origin: None,
        }
    }

    pub(crate) fn mutation(
        cell: NodeId,
        version: u64,
        location: &'static Location<'static>,
        origin: &'static Location<'static>,
    ) -> Self {
        Self {
            kind: InspectKind::Mutation,
            values: Vec::new(),
            location,
            node: Some(cell),
            version: Some(version),
            origin: Some(origin),
        }
    }

    /// Flatten the values into `(key, value)` rows.
    ///
    /// Arrays contribute one row per element keyed by index, objects one row
    /// per field, scalars a single row keyed by argument position. With more
    /// than one argument, keys are prefixed with the argument position.
    pub fn rows(&self) -> Vec<(String, Value)> {
        let prefixed = self.values.len() > 1;
        let mut rows = Vec::new();

        for (position, value) in self.values.iter().enumerate() {
            let key = |k: &dyn fmt::Display| {
                if prefixed {
                    format!("{position}.{k}")
                } else {
                    k.to_string()
                }
            };
            match value {
                Value::Array(items) => {
                    rows.extend(items.iter().enumerate().map(|(i, v)| (key(&i), v.clone())));
                }
                Value::Object(fields) => {
                    rows.extend(fields.iter().map(|(k, v)| (key(k), v.clone())));
                }
                scalar => rows.push((position.to_string(), scalar.clone())),
            }
        }
        rows
    }

    fn joined(&self) -> String {
        self.values
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Receiver of instrumentation events.
pub trait InspectSink: Send + Sync {
    fn emit(&self, event: &InspectEvent);

    /// Called after `emit` for `log_break`. A host may suspend here for
    /// interactive inspection; the default does nothing.
    fn on_break(&self, _event: &InspectEvent) {}
}

/// Sink that forwards events to `tracing` on target `runic::inspect`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl InspectSink for TracingSink {
    fn emit(&self, event: &InspectEvent) {
        let at = event.location;
        match event.kind {
            InspectKind::Log => {
                tracing::info!(target: "runic::inspect", %at, values = %event.joined(), "log");
            }
            InspectKind::Trace => {
                tracing::info!(target: "runic::inspect", %at, values = %event.joined(), "trace");
            }
            InspectKind::Table => {
                for (key, value) in event.rows() {
                    tracing::info!(target: "runic::inspect", %at, %key, %value, "table row");
                }
            }
            InspectKind::Break => {
                tracing::warn!(target: "runic::inspect", %at, values = %event.joined(), "break");
            }
            InspectKind::Mutation => {
                tracing::info!(
                    target: "runic::inspect",
                    %at,
                    cell = ?event.node,
                    version = ?event.version,
                    traced_at = ?event.origin.map(ToString::to_string),
                    "mutation"
                );
            }
        }
    }
}

impl Shared {
    fn inspect(&self, kind: InspectKind, values: &[&dyn Inspect], location: &'static Location<'static>) {
        if !self.config.inspect {
            return;
        }

        let frame = self.enter(FrameKind::Inspect, None);
        let resolved: Vec<Value> = values
            .iter()
            .map(|value| {
                value
                    .to_value()
                    .unwrap_or_else(|err| Value::String(format!("<unresolved: {err}>")))
            })
            .collect();
        let reads = frame.finish();

        let sink = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            if kind == InspectKind::Trace {
                for source in st.graph.sources_of(reads) {
                    st.traced.insert(source, location);
                }
            }
            st.sink.clone()
        };

        let event = InspectEvent::new(kind, resolved, location);
        sink.emit(&event);
        if kind == InspectKind::Break {
            sink.on_break(&event);
        }
    }
}

impl Runtime {
    /// Log the current values.
    #[track_caller]
    pub fn log(&self, values: &[&dyn Inspect]) {
        self.shared().inspect(InspectKind::Log, values, Location::caller());
    }

    /// Log the current values and report every later write to a cell they
    /// were computed from.
    #[track_caller]
    pub fn log_trace(&self, values: &[&dyn Inspect]) {
        self.shared().inspect(InspectKind::Trace, values, Location::caller());
    }

    /// Log the values as rows.
    #[track_caller]
    pub fn log_table(&self, values: &[&dyn Inspect]) {
        self.shared().inspect(InspectKind::Table, values, Location::caller());
    }

    /// Log the values, then hand control to [`InspectSink::on_break`].
    #[track_caller]
    pub fn log_break(&self, values: &[&dyn Inspect]) {
        self.shared().inspect(InspectKind::Break, values, Location::caller());
    }
}
