//! Event stream finalization for workflow runs.
//!
//! Every run ends its event feed with a diagnostic carrying
//! [`STREAM_END_SCOPE`] so consumers can treat the stream as finite; the
//! message reports completed/suspended/error status.

use crate::event_bus::{Event, EventBus, STREAM_END_SCOPE};

/// Why a run's event stream is ending.
pub(crate) enum StreamEndReason {
    /// The workflow completed.
    Completed { step: u64 },
    /// The workflow suspended on an interrupt.
    Suspended { step: u64, kind: String },
    /// The workflow ended due to an error.
    Error { step: Option<u64>, error: String },
}

impl StreamEndReason {
    /// Format the stream end reason as a diagnostic message.
    pub fn format_message(&self, session_id: &str) -> String {
        match self {
            StreamEndReason::Completed { step } => {
                format!("session={session_id} status=completed step={step}")
            }
            StreamEndReason::Suspended { step, kind } => {
                format!("session={session_id} status=suspended step={step} kind={kind}")
            }
            StreamEndReason::Error { step, error } => step
                .map(|s| format!("session={session_id} status=error step={s} error={error}"))
                .unwrap_or_else(|| format!("session={session_id} status=error error={error}")),
        }
    }
}

/// Emit the stream termination event.
///
/// Subscriptions treat the marker itself as end-of-stream, so nothing is
/// torn down here; the broadcast feed closes once the bus and its emitters
/// drop.
pub(crate) fn finalize_event_stream(event_bus: &EventBus, session_id: &str, reason: StreamEndReason) {
    let message = reason.format_message(session_id);

    if let Err(err) = event_bus
        .get_emitter()
        .emit(Event::diagnostic(STREAM_END_SCOPE, message.clone()))
    {
        tracing::debug!(
            session = %session_id,
            scope = STREAM_END_SCOPE,
            completion_message = %message,
            error = ?err,
            "failed to emit stream termination event"
        );
    }
}
