use serde::{Deserialize, Serialize};

use crate::{
    classifier::Outcome,
    models::{DocumentInfo, SaveInfo},
};

use super::TimerStatus;

/// Signals from the host application. Tagged so a bridge can send JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostEvent {
    DocumentOpened(DocumentInfo),
    Activity,
    DocumentSaved(SaveInfo),
    DocumentClosed,
    PromptAnswered { accepted: bool },
    UndoRequested,
    ResetRequested,
}

/// Why a pending decision stopped being pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FinalizeReason {
    Answered,
    Expired,
    Closed,
    Reset,
    Saved,
    Superseded,
}

/// Notifications for the UI collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TrackerEvent {
    #[serde(rename_all = "camelCase")]
    StateChanged { status: TimerStatus, seconds: u64 },
    #[serde(rename_all = "camelCase")]
    PromptRequested {
        idle_seconds: u64,
        confidence: f64,
        suggestion: Option<Outcome>,
        expires_in_secs: u64,
    },
    #[serde(rename_all = "camelCase")]
    AutoDecided {
        accepted: bool,
        seconds: u64,
        confidence: f64,
        undo_window_secs: u64,
    },
    #[serde(rename_all = "camelCase")]
    DecisionFinalized {
        idle_seconds: u64,
        outcome: Outcome,
        reason: FinalizeReason,
    },
    /// An automatic decision was undone; `outcome` is what now applies.
    #[serde(rename_all = "camelCase")]
    DecisionReverted { idle_seconds: u64, outcome: Outcome },
    #[serde(rename_all = "camelCase")]
    IdleDiscarded {
        idle_seconds: u64,
        idle_limit_secs: u64,
    },
    Untracked { reason: String },
    PersistFailed { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_events_parse_from_bridge_json() {
        let event: HostEvent = serde_json::from_str(
            r#"{"type": "documentOpened", "uuid": "abc", "saved": true, "editingTimeSecs": 600}"#,
        )
        .unwrap();
        match event {
            HostEvent::DocumentOpened(info) => {
                assert_eq!(info.uuid.as_deref(), Some("abc"));
                assert!(info.saved);
                assert_eq!(info.editing_time_secs, Some(600));
                assert!(info.probe.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }

        let event: HostEvent =
            serde_json::from_str(r#"{"type": "promptAnswered", "accepted": false}"#).unwrap();
        assert_eq!(event, HostEvent::PromptAnswered { accepted: false });
        let event: HostEvent = serde_json::from_str(r#"{"type": "activity"}"#).unwrap();
        assert_eq!(event, HostEvent::Activity);
    }

    #[test]
    fn tracker_events_serialize_tagged() {
        let json = serde_json::to_value(TrackerEvent::IdleDiscarded {
            idle_seconds: 2_000,
            idle_limit_secs: 1_200,
        })
        .unwrap();
        assert_eq!(json["type"], "idleDiscarded");
        assert_eq!(json["idleLimitSecs"], 1_200);
    }
}
