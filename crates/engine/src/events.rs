//! Execution event stream model.
//!
//! A plan execution emits an ordered, finite stream of these events and
//! ends with exactly one `done`. The wire form is one JSON object per
//! line, tagged by the `event` field.

use serde::{Deserialize, Serialize};

use crate::chain::ChainSummary;
use crate::remediate::RemediationResponse;

/// One event in a plan execution stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// A step began.
    StepStart {
        step_idx: usize,
        total: usize,
        label: String,
    },
    /// One line of child output, stdout and stderr interleaved.
    Log { step_idx: usize, line: String },
    /// A step finished with its expected exit status.
    StepDone {
        step_idx: usize,
        exit_code: i32,
        duration_ms: u64,
    },
    /// A step failed; `exit_code` is absent for timeouts and kills.
    StepFailed {
        step_idx: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        stderr_tail: String,
    },
    /// Terminal event; exactly one per stream.
    Done {
        ok: bool,
        #[serde(default)]
        cancelled: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remediation: Option<Box<RemediationResponse>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chain: Option<ChainSummary>,
        plan_id: String,
    },
}

impl ExecutionEvent {
    /// True for the terminal event.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    /// Serialize to the wire form (one JSON object, no trailing newline).
    #[must_use]
    pub fn to_wire_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            // Event types only hold serializable data; a failure here is a
            // programming bug, surfaced as a valid error line.
            r#"{"event":"log","step_idx":0,"line":"<event serialization failed>"}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tagging() {
        let event = ExecutionEvent::StepStart {
            step_idx: 0,
            total: 3,
            label: "Install jq".to_string(),
        };
        let json: serde_json::Value = serde_json::from_str(&event.to_wire_line()).unwrap();
        assert_eq!(json["event"], "step_start");
        assert_eq!(json["total"], 3);
    }

    #[test]
    fn test_done_omits_empty_fields() {
        let event = ExecutionEvent::Done {
            ok: true,
            cancelled: false,
            remediation: None,
            chain: None,
            plan_id: "p1".to_string(),
        };
        let line = event.to_wire_line();
        assert!(!line.contains("remediation"));
        assert!(!line.contains("chain"));
        assert!(line.contains("\"plan_id\":\"p1\""));
    }

    #[test]
    fn test_terminal_detection() {
        let done = ExecutionEvent::Done {
            ok: false,
            cancelled: true,
            remediation: None,
            chain: None,
            plan_id: "p1".to_string(),
        };
        assert!(done.is_terminal());

        let log = ExecutionEvent::Log {
            step_idx: 1,
            line: "x".to_string(),
        };
        assert!(!log.is_terminal());
    }

    #[test]
    fn test_roundtrip() {
        let event = ExecutionEvent::StepFailed {
            step_idx: 2,
            exit_code: Some(1),
            stderr_tail: "boom".to_string(),
        };
        let back: ExecutionEvent =
            serde_json::from_str(&event.to_wire_line()).unwrap();
        assert_eq!(event, back);
    }
}
