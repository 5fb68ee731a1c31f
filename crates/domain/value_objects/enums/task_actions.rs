use std::fmt::Display;

pub const STOP_RECORDING: &str = "stop_recording";
pub const STOP_RECORDING_DIRECT: &str = "stop_recording_direct";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskAction {
    StopRecording,
    StopRecordingDirect,
    Other(String),
}

impl TaskAction {
    /// Only stop/finalize actions are turned into recordings.
    pub fn is_finalize(&self) -> bool {
        matches!(
            self,
            TaskAction::StopRecording | TaskAction::StopRecordingDirect
        )
    }
}

impl From<&str> for TaskAction {
    fn from(value: &str) -> Self {
        match value {
            STOP_RECORDING => TaskAction::StopRecording,
            STOP_RECORDING_DIRECT => TaskAction::StopRecordingDirect,
            other => TaskAction::Other(other.to_string()),
        }
    }
}

impl Display for TaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskAction::StopRecording => write!(f, "{}", STOP_RECORDING),
            TaskAction::StopRecordingDirect => write!(f, "{}", STOP_RECORDING_DIRECT),
            TaskAction::Other(action) => write!(f, "{}", action),
        }
    }
}
