//! Event stream plumbing.
//!
//! Plan executions write events into a bounded channel; this module
//! drains that channel into the HTTP response body as line-delimited
//! JSON, records audit entries for write-side events *before* they reach
//! the client, and retains the terminal event for reconnecting clients.

use axum::body::{Body, Bytes};
use axum::http::header;
use axum::response::Response;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::OwnedSemaphorePermit;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use opsdeck_engine::{ExecutionEvent, ExecutionHandle};
use opsdeck_state::AuditEntry;

use crate::AppState;

/// Content type of execution streams.
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// Turn a live execution into a streaming response.
///
/// The forwarder task owns the pool permit for the lifetime of the
/// execution and keeps draining events after the client disconnects so
/// the terminal event is always recorded and replayable.
pub fn execution_response(
    state: Arc<AppState>,
    mut handle: ExecutionHandle,
    permit: Option<OwnedSemaphorePermit>,
    operation_id: String,
    tool_id: String,
) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(64);
    let plan_id = handle.plan_id.clone();

    tokio::spawn(async move {
        let _permit = permit;
        let card = format!("install:{tool_id}");
        let mut client_gone = false;

        while let Some(event) = handle.events.recv().await {
            match &event {
                ExecutionEvent::StepFailed {
                    step_idx,
                    exit_code,
                    ..
                } => {
                    let mut entry =
                        AuditEntry::new(&card, "step_failed", &tool_id, &operation_id);
                    entry.after_state = Some(serde_json::json!({
                        "step_idx": step_idx,
                        "exit_code": exit_code,
                    }));
                    state.audit.record(&entry).await;
                }
                ExecutionEvent::Done { ok, cancelled, .. } => {
                    // Write-before-ack: the audit entry lands before the
                    // terminal event reaches any client.
                    let action = if *cancelled {
                        "cancelled"
                    } else if *ok {
                        "done"
                    } else {
                        "failed"
                    };
                    let mut entry = AuditEntry::new(&card, action, &tool_id, &operation_id);
                    entry.after_state =
                        Some(serde_json::json!({"ok": ok, "plan_id": plan_id.clone()}));
                    state.audit.record(&entry).await;
                    state.store_completion(&plan_id, event.clone()).await;
                }
                _ => {}
            }

            if !client_gone {
                let line = format!("{}\n", event.to_wire_line());
                if tx.send(Ok(Bytes::from(line))).await.is_err() {
                    debug!("client for plan {plan_id} disconnected, draining");
                    client_gone = true;
                }
            }
        }
    });

    stream_response(Body::from_stream(ReceiverStream::new(rx)))
}

/// A one-event stream carrying a previously recorded terminal event.
pub fn replay_response(event: &ExecutionEvent) -> Response {
    let line = format!("{}\n", event.to_wire_line());
    stream_response(Body::from(line))
}

fn stream_response(body: Body) -> Response {
    Response::builder()
        .header(header::CONTENT_TYPE, EVENT_STREAM_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
