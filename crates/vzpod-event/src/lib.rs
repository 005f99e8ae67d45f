//! Structured lifecycle-event recording.
//!
//! Every long-running component (image downloader, VM manager, container
//! manager, pod engine) reports notable lifecycle transitions through the
//! [`EventRecorder`] trait. Two implementations are provided:
//!
//! - [`LogEventRecorder`] writes structured log lines via `tracing`.
//! - [`NodeEventRecorder`] forwards typed [`NodeEvent`]s, tagged with the
//!   pod's [`ObjectReference`], to a pluggable [`EventSink`]; the hosting
//!   harness connects the sink to the control plane's event API. Events
//!   recorded without an object reference are dropped.

mod recorder;
mod sink;

pub use recorder::{EventRecorder, LogEventRecorder};
pub use sink::{ChannelEventSink, EventKind, EventSink, NodeEvent, NodeEventRecorder, ObjectReference};
