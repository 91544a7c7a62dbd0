//! Side-channel tracing for the normalization pipeline.
//!
//! Recoverable degradations — a string annotation that fails to re-parse, an
//! f-string fragment that gets dropped — are reported through a trait so the
//! host decides where they go. All hooks default to no-ops; with
//! [`NoopTracer`] the calls compile away entirely via monomorphization.
//! Tracing must never influence the produced AST.

use crate::location::Location;

/// A degradation event recorded during preprocessing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A string annotation did not parse; the sentinel access was
    /// substituted.
    UnparsedAnnotation {
        location: Location,
        text: String,
        message: String,
    },
    /// A brace-delimited f-string fragment did not parse and was dropped.
    DroppedFormatFragment {
        location: Location,
        text: String,
        message: String,
    },
}

/// Trait for pipeline tracing. Implementations only override the hooks they
/// care about.
pub trait PipelineTracer {
    /// A string annotation failed to parse as an expression.
    fn on_unparsed_annotation(&mut self, _location: Location, _text: &str, _message: &str) {}

    /// An extracted f-string fragment failed to parse and was dropped.
    fn on_dropped_format_fragment(&mut self, _location: Location, _text: &str, _message: &str) {}
}

/// Zero-cost tracer for production runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl PipelineTracer for NoopTracer {}

/// Records every event, for assertions in tests and post-mortem dumps.
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    pub events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PipelineTracer for RecordingTracer {
    fn on_unparsed_annotation(&mut self, location: Location, text: &str, message: &str) {
        self.events.push(TraceEvent::UnparsedAnnotation {
            location,
            text: text.to_owned(),
            message: message.to_owned(),
        });
    }

    fn on_dropped_format_fragment(&mut self, location: Location, text: &str, message: &str) {
        self.events.push(TraceEvent::DroppedFormatFragment {
            location,
            text: text.to_owned(),
            message: message.to_owned(),
        });
    }
}
