use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

/// Lifecycle label shared with the task service.
///
/// `running` is the only label ever emitted for a stream with live input;
/// `live` is still accepted from older callers and folded into `Running`.
#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    #[default]
    Stopped,
    Waiting,
    #[serde(alias = "live")]
    Running,
    Error,
}

impl Display for StreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stream_status = match self {
            StreamStatus::Stopped => "stopped",
            StreamStatus::Waiting => "waiting",
            StreamStatus::Running => "running",
            StreamStatus::Error => "error",
        };
        write!(f, "{}", stream_status)
    }
}

impl FromStr for StreamStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stopped" => Ok(StreamStatus::Stopped),
            "waiting" => Ok(StreamStatus::Waiting),
            "running" | "live" => Ok(StreamStatus::Running),
            "error" => Ok(StreamStatus::Error),
            other => Err(anyhow::anyhow!("unsupported stream status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_is_folded_into_running() {
        assert_eq!(StreamStatus::from_str("live").unwrap(), StreamStatus::Running);
        assert_eq!(StreamStatus::from_str(" Running ").unwrap(), StreamStatus::Running);

        let parsed: StreamStatus = serde_json::from_str("\"live\"").unwrap();
        assert_eq!(parsed, StreamStatus::Running);
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"running\"");
    }

    #[test]
    fn rejects_unknown_labels() {
        assert!(StreamStatus::from_str("paused").is_err());
    }
}
