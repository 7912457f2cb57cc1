//! Batch progress events and orchestrator state.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Channel a caller hands to `match_all` to receive progress.
pub type ProgressSink = mpsc::Sender<ProgressEvent>;

/// Typed progress event, emitted strictly in processing order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Initializing {
        owner_id: String,
        reference_faces: usize,
        total_photos: usize,
    },
    Processing {
        /// 1-based index of the photo about to be processed.
        current: usize,
        total: usize,
        photo_id: String,
        /// Estimated time remaining; absent before the first photo finishes.
        eta_ms: Option<u64>,
    },
    MatchFound {
        photo_id: String,
        confidence: f32,
        distance: f32,
    },
    Completed {
        total_matches: usize,
        average_confidence: f32,
        elapsed_ms: u64,
        failed_photos: usize,
    },
    Cancelled {
        processed: usize,
        total: usize,
    },
    Failed {
        reason: String,
    },
}

/// Orchestrator lifecycle, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    #[default]
    Idle,
    Initializing,
    Processing,
    Completed,
    Cancelled,
    Failed,
}

impl BatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BatchState::Completed | BatchState::Cancelled | BatchState::Failed)
    }
}

/// Estimated remaining time: mean time per finished photo times photos left.
pub fn eta_ms(elapsed_ms: u64, done: usize, total: usize) -> Option<u64> {
    if done == 0 {
        return None;
    }
    let remaining = total.saturating_sub(done) as u64;
    Some(elapsed_ms / done as u64 * remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = ProgressEvent::Processing {
            current: 2,
            total: 5,
            photo_id: "p2".into(),
            eta_ms: Some(300),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "processing");
        assert_eq!(json["current"], 2);
        assert_eq!(json["eta_ms"], 300);

        let json = serde_json::to_value(ProgressEvent::MatchFound {
            photo_id: "p".into(),
            confidence: 0.5,
            distance: 0.5,
        })
        .unwrap();
        assert_eq!(json["type"], "match_found");
    }

    #[test]
    fn test_eta() {
        assert_eq!(eta_ms(0, 0, 10), None);
        assert_eq!(eta_ms(400, 2, 10), Some(1600));
        assert_eq!(eta_ms(900, 3, 3), Some(0));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!BatchState::Idle.is_terminal());
        assert!(!BatchState::Processing.is_terminal());
        assert!(BatchState::Cancelled.is_terminal());
        assert!(BatchState::Failed.is_terminal());
    }
}
