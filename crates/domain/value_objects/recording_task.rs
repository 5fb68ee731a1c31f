use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{
    enums::task_actions::STOP_RECORDING,
    owner::OwnerIdentity,
    queue_message::QueueMessage,
};

pub const RECORDING_TASKS_TOPIC: &str = "recording.tasks";
pub const COMPLETED_TASK_STATUS: &str = "completed";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordingTask {
    pub stream_id: String,
    #[serde(default)]
    pub user_id: i32,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub title: String,
    pub action: String,
    #[serde(default)]
    pub hls_path: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub duration_seconds: i64,
    #[serde(default)]
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

impl RecordingTask {
    /// Builds the stop event for a finished session.
    ///
    /// `started_at` is `None` for sessions adopted by recovery; those get
    /// `default_duration_secs` instead of a measured duration.
    pub fn stop_recording(
        stream_id: &str,
        owner: OwnerIdentity,
        started_at: Option<DateTime<Utc>>,
        ended_at: DateTime<Utc>,
        default_duration_secs: i64,
    ) -> Self {
        let (start_time, duration_seconds) = match started_at {
            Some(start) if start <= ended_at => (start, (ended_at - start).num_seconds()),
            _ => (
                ended_at - chrono::Duration::seconds(default_duration_secs),
                default_duration_secs,
            ),
        };

        Self {
            stream_id: stream_id.to_string(),
            user_id: owner.user_id,
            username: owner.username,
            title: owner.title,
            action: STOP_RECORDING.to_string(),
            hls_path: format!("/hls/{stream_id}/"),
            start_time,
            end_time: ended_at,
            duration_seconds,
            status: COMPLETED_TASK_STATUS.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn owner(&self) -> OwnerIdentity {
        OwnerIdentity {
            user_id: self.user_id,
            username: self.username.clone(),
            title: self.title.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream_id.trim().is_empty() {
            bail!("recording task stream_id cannot be empty");
        }
        if self.action.trim().is_empty() {
            bail!("recording task action cannot be empty");
        }
        Ok(())
    }

    /// Partitioned by stream id so one stream's events stay in order.
    pub fn to_queue_message(&self, source: &str) -> Result<QueueMessage> {
        self.validate()?;
        Ok(QueueMessage {
            topic: RECORDING_TASKS_TOPIC.to_string(),
            key: self.stream_id.clone(),
            action: self.action.clone(),
            source: source.to_string(),
            payload: serde_json::to_value(self)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn owner() -> OwnerIdentity {
        OwnerIdentity {
            user_id: 7,
            username: "alice".to_string(),
            title: "Morning".to_string(),
        }
    }

    #[test]
    fn duration_is_whole_seconds_between_start_and_stop() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::milliseconds(754_900);

        let task = RecordingTask::stop_recording("s1", owner(), Some(t0), t1, 60);

        assert_eq!(task.duration_seconds, 754);
        assert_eq!(task.start_time, t0);
        assert_eq!(task.end_time, t1);
        assert_eq!(task.action, "stop_recording");
        assert_eq!(task.hls_path, "/hls/s1/");
        assert_eq!(task.status, "completed");
    }

    #[test]
    fn missing_start_time_uses_default_duration() {
        let t1 = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();

        let task = RecordingTask::stop_recording("s1", owner(), None, t1, 60);

        assert_eq!(task.duration_seconds, 60);
        assert_eq!(task.end_time - task.start_time, chrono::Duration::seconds(60));
    }

    #[test]
    fn queue_message_is_keyed_by_stream() {
        let now = Utc::now();
        let task = RecordingTask::stop_recording("s9", owner(), Some(now), now, 60);

        let message = task.to_queue_message("ingest").unwrap();

        assert_eq!(message.topic, RECORDING_TASKS_TOPIC);
        assert_eq!(message.key, "s9");
        assert_eq!(message.action, "stop_recording");
        let decoded: RecordingTask = serde_json::from_value(message.payload).unwrap();
        assert_eq!(decoded, task);
    }

    #[test]
    fn empty_stream_id_is_rejected() {
        let now = Utc::now();
        let task = RecordingTask::stop_recording(" ", owner(), Some(now), now, 60);
        assert!(task.to_queue_message("ingest").is_err());
    }
}
