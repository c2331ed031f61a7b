use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    #[default]
    Idle,
    BackupPending,
    BackupFailed,
    Optimizing,
    RecordingHistory,
    Done,
}

impl RunPhase {
    pub fn can_advance_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Idle, BackupPending)
                | (BackupPending, BackupFailed)
                | (BackupPending, Optimizing)
                | (Optimizing, RecordingHistory)
                | (RecordingHistory, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::BackupFailed | RunPhase::Done)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::BackupPending => "backup_pending",
            RunPhase::BackupFailed => "backup_failed",
            RunPhase::Optimizing => "optimizing",
            RunPhase::RecordingHistory => "recording_history",
            RunPhase::Done => "done",
        };
        f.write_str(name)
    }
}
