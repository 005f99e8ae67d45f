//! Typed node events forwarded to the control plane.

use std::fmt::Display;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::recorder::EventRecorder;

/// Reference to the pod an event is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectReference {
    /// Pod namespace.
    pub namespace: String,
    /// Pod name.
    pub name: String,
    /// Stable pod UID.
    pub uid: String,
}

/// Whether the event reports normal progress or a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Expected lifecycle progress.
    Normal,
    /// A failure or back-off condition.
    Warning,
}

/// A single typed lifecycle event bound to a pod.
#[derive(Debug, Clone)]
pub struct NodeEvent {
    /// The pod the event is about.
    pub object: ObjectReference,
    /// `spec.containers{<name>}` when the event concerns one container.
    pub field_path: Option<String>,
    /// Machine-readable reason (e.g. `PullingImage`, `FailedPostStartHook`).
    pub reason: &'static str,
    /// Normal or Warning.
    pub kind: EventKind,
    /// Human-readable message.
    pub message: String,
}

/// Destination for [`NodeEvent`]s, implemented by the hosting harness.
pub trait EventSink: Send + Sync {
    /// Delivers one event. Must not block.
    fn publish(&self, event: NodeEvent);
}

/// An [`EventSink`] backed by an unbounded channel, for harnesses (and
/// tests) that drain events asynchronously.
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<NodeEvent>,
}

impl ChannelEventSink {
    /// Creates a sink and the receiving half.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NodeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn publish(&self, event: NodeEvent) {
        let _ = self.tx.send(event);
    }
}

/// Event recorder that forwards typed events to an [`EventSink`].
///
/// Events recorded through a handle without an object reference are
/// dropped; [`EventRecorder::with_object_ref`] produces a scoped handle.
pub struct NodeEventRecorder {
    sink: Arc<dyn EventSink>,
    object: Option<ObjectReference>,
}

impl NodeEventRecorder {
    /// Creates a recorder without an object reference attached.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink, object: None }
    }

    fn publish(
        &self,
        reason: &'static str,
        kind: EventKind,
        container_name: Option<&str>,
        message: String,
    ) {
        let Some(object) = &self.object else {
            return;
        };
        self.sink.publish(NodeEvent {
            object: object.clone(),
            field_path: container_name
                .filter(|name| !name.is_empty())
                .map(|name| format!("spec.containers{{{name}}}")),
            reason,
            kind,
            message,
        });
    }
}

impl EventRecorder for NodeEventRecorder {
    fn pulling_image(&self, image: &str, container_name: &str) {
        self.publish(
            "PullingImage",
            EventKind::Normal,
            Some(container_name),
            format!("Pulling image \"{image}\""),
        );
    }

    fn pulled_image(&self, image: &str, container_name: &str, duration: &str) {
        self.publish(
            "PulledImage",
            EventKind::Normal,
            Some(container_name),
            format!("Successfully pulled image \"{image}\" in {duration}"),
        );
    }

    fn failed_to_validate_oci(&self, content: &str) {
        self.publish(
            "FailedToValidateOCI",
            EventKind::Warning,
            None,
            format!("Failed to validate OCI content: {content}"),
        );
    }

    fn failed_to_pull_image(&self, image: &str, container_name: &str, err: &dyn Display) {
        self.publish(
            "FailedToPullImage",
            EventKind::Warning,
            Some(container_name),
            format!("Failed to pull image \"{image}\": {err}"),
        );
    }

    fn back_off_pull_image(&self, image: &str, container_name: &str, err: &dyn Display) {
        self.publish(
            "BackOffPullImage",
            EventKind::Warning,
            Some(container_name),
            format!("Back-off pulling image \"{image}\": {err}"),
        );
    }

    fn created_container(&self, container_name: &str) {
        self.publish(
            "CreatedContainer",
            EventKind::Normal,
            Some(container_name),
            format!("Created container {container_name}"),
        );
    }

    fn started_container(&self, container_name: &str) {
        self.publish(
            "StartedContainer",
            EventKind::Normal,
            Some(container_name),
            format!("Started container {container_name}"),
        );
    }

    fn failed_to_create_container(&self, container_name: &str, err: &dyn Display) {
        self.publish(
            "FailedToCreateContainer",
            EventKind::Warning,
            Some(container_name),
            format!("Failed to create container {container_name}: {err}"),
        );
    }

    fn failed_to_start_container(&self, container_name: &str, err: &dyn Display) {
        self.publish(
            "FailedToStartContainer",
            EventKind::Warning,
            Some(container_name),
            format!("Failed to start container {container_name}: {err}"),
        );
    }

    fn failed_post_start_hook(&self, container_name: &str, cmd: &[String], err: &dyn Display) {
        self.publish(
            "FailedPostStartHook",
            EventKind::Warning,
            Some(container_name),
            format!(
                "Exec lifecycle hook ([{}]) for container \"{container_name}\" failed: {err}",
                cmd.join(", ")
            ),
        );
    }

    fn failed_pre_stop_hook(&self, container_name: &str, cmd: &[String], err: &dyn Display) {
        self.publish(
            "FailedPreStopHook",
            EventKind::Warning,
            Some(container_name),
            format!(
                "Exec lifecycle hook ([{}]) for container \"{container_name}\" failed: {err}",
                cmd.join(", ")
            ),
        );
    }

    fn with_object_ref(self: Arc<Self>, object: ObjectReference) -> Arc<dyn EventRecorder> {
        Arc::new(Self {
            sink: Arc::clone(&self.sink),
            object: Some(object),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object() -> ObjectReference {
        ObjectReference {
            namespace: "e2e".to_string(),
            name: "p1".to_string(),
            uid: "U1".to_string(),
        }
    }

    #[test]
    fn test_events_without_object_ref_are_dropped() {
        let (sink, mut rx) = ChannelEventSink::new();
        let recorder = NodeEventRecorder::new(Arc::new(sink));
        recorder.pulling_image("localhost:5000/macos:latest", "macos");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_field_path_carries_container_name() {
        let (sink, mut rx) = ChannelEventSink::new();
        let recorder = Arc::new(NodeEventRecorder::new(Arc::new(sink))).with_object_ref(object());
        recorder.created_container("sidecar");

        let event = rx.try_recv().unwrap();
        assert_eq!(event.reason, "CreatedContainer");
        assert_eq!(event.kind, EventKind::Normal);
        assert_eq!(event.field_path.as_deref(), Some("spec.containers{sidecar}"));
        assert_eq!(event.object.uid, "U1");
    }

    #[test]
    fn test_warning_events() {
        let (sink, mut rx) = ChannelEventSink::new();
        let recorder = Arc::new(NodeEventRecorder::new(Arc::new(sink))).with_object_ref(object());
        recorder.back_off_pull_image("img", "macos", &"registry unreachable");

        let event = rx.try_recv().unwrap();
        assert_eq!(event.reason, "BackOffPullImage");
        assert_eq!(event.kind, EventKind::Warning);
        assert!(event.message.contains("registry unreachable"));
    }

    #[test]
    fn test_hook_message_joins_command() {
        let (sink, mut rx) = ChannelEventSink::new();
        let recorder = Arc::new(NodeEventRecorder::new(Arc::new(sink))).with_object_ref(object());
        recorder.failed_post_start_hook(
            "sidecar",
            &["echo".to_string(), "hello".to_string()],
            &"exit status 1",
        );

        let event = rx.try_recv().unwrap();
        assert_eq!(event.reason, "FailedPostStartHook");
        assert!(event.message.contains("[echo, hello]"));
    }
}
