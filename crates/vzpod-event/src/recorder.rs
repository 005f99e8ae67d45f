//! The event recorder trait and the log-backed implementation.

use std::fmt::Display;
use std::sync::Arc;

use crate::sink::ObjectReference;

/// Receiver for lifecycle events emitted by the node's components.
///
/// The vocabulary mirrors the reasons the control plane understands, so a
/// recorder implementation can surface them as pod events verbatim.
pub trait EventRecorder: Send + Sync {
    /// An image pull has started.
    fn pulling_image(&self, image: &str, container_name: &str);

    /// An image pull completed; `duration` is a human-readable elapsed time.
    fn pulled_image(&self, image: &str, container_name: &str, duration: &str);

    /// A locally cached artifact failed validation and will be re-fetched.
    fn failed_to_validate_oci(&self, content: &str);

    /// A single pull attempt failed; retries may follow.
    fn failed_to_pull_image(&self, image: &str, container_name: &str, err: &dyn Display);

    /// All pull attempts were exhausted; the image is in back-off.
    fn back_off_pull_image(&self, image: &str, container_name: &str, err: &dyn Display);

    /// A container (or the VM standing in for one) was created.
    fn created_container(&self, container_name: &str);

    /// A container (or the VM standing in for one) was started.
    fn started_container(&self, container_name: &str);

    /// Container creation failed.
    fn failed_to_create_container(&self, container_name: &str, err: &dyn Display);

    /// Container start failed.
    fn failed_to_start_container(&self, container_name: &str, err: &dyn Display);

    /// The post-start exec hook failed; the container keeps running.
    fn failed_post_start_hook(&self, container_name: &str, cmd: &[String], err: &dyn Display);

    /// A pre-stop exec hook failed during teardown.
    fn failed_pre_stop_hook(&self, container_name: &str, cmd: &[String], err: &dyn Display);

    /// Returns a recorder scoped to the given object reference.
    ///
    /// Recorders that report to the control plane attach the reference to
    /// every event; the log recorder ignores it.
    fn with_object_ref(self: Arc<Self>, object: ObjectReference) -> Arc<dyn EventRecorder>;
}

/// Event recorder that writes structured log lines.
#[derive(Debug, Default, Clone)]
pub struct LogEventRecorder;

impl EventRecorder for LogEventRecorder {
    fn pulling_image(&self, image: &str, _container_name: &str) {
        tracing::info!(image, "Pulling image");
    }

    fn pulled_image(&self, image: &str, _container_name: &str, duration: &str) {
        tracing::info!(image, duration, "Successfully pulled image");
    }

    fn failed_to_validate_oci(&self, content: &str) {
        tracing::warn!(content, "Failed to validate OCI content");
    }

    fn failed_to_pull_image(&self, image: &str, _container_name: &str, err: &dyn Display) {
        tracing::warn!(image, error = %err, "Failed to pull image");
    }

    fn back_off_pull_image(&self, image: &str, _container_name: &str, err: &dyn Display) {
        tracing::error!(image, error = %err, "Back-off pulling image");
    }

    fn created_container(&self, container_name: &str) {
        tracing::info!(container = container_name, "Created container");
    }

    fn started_container(&self, container_name: &str) {
        tracing::info!(container = container_name, "Started container");
    }

    fn failed_to_create_container(&self, container_name: &str, err: &dyn Display) {
        tracing::error!(container = container_name, error = %err, "Failed to create container");
    }

    fn failed_to_start_container(&self, container_name: &str, err: &dyn Display) {
        tracing::error!(container = container_name, error = %err, "Failed to start container");
    }

    fn failed_post_start_hook(&self, container_name: &str, cmd: &[String], err: &dyn Display) {
        tracing::error!(
            container = container_name,
            command = cmd.join(", "),
            error = %err,
            "PostStart lifecycle hook failed"
        );
    }

    fn failed_pre_stop_hook(&self, container_name: &str, cmd: &[String], err: &dyn Display) {
        tracing::error!(
            container = container_name,
            command = cmd.join(", "),
            error = %err,
            "PreStop lifecycle hook failed"
        );
    }

    fn with_object_ref(self: Arc<Self>, _object: ObjectReference) -> Arc<dyn EventRecorder> {
        self
    }
}
