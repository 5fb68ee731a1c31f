use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::{
    entities::recordings::{RecordingReadyEntity, UpsertRecordingEntity},
    value_objects::{enums::recording_statuses::RecordingStatus, owner::OwnerIdentity},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingRecordingModel {
    pub stream_id: String,
    pub owner: OwnerIdentity,
    pub duration_seconds: i32,
}

impl ProcessingRecordingModel {
    pub fn to_entity(&self) -> UpsertRecordingEntity {
        let now = Utc::now();
        UpsertRecordingEntity {
            stream_id: self.stream_id.clone(),
            user_id: self.owner.user_id,
            username: self.owner.username.clone(),
            title: self.owner.title.clone(),
            duration_seconds: self.duration_seconds,
            file_path: String::new(),
            thumbnail_path: String::new(),
            file_size_bytes: 0,
            status: RecordingStatus::Processing.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadyRecordingModel {
    pub duration_seconds: i32,
    pub file_path: String,
    pub thumbnail_path: Option<String>,
    pub file_size_bytes: i64,
}

impl ReadyRecordingModel {
    pub fn to_entity(&self) -> RecordingReadyEntity {
        RecordingReadyEntity {
            duration_seconds: self.duration_seconds,
            file_path: self.file_path.clone(),
            thumbnail_path: self.thumbnail_path.clone().unwrap_or_default(),
            file_size_bytes: self.file_size_bytes,
            status: RecordingStatus::Ready.to_string(),
            updated_at: Utc::now(),
        }
    }
}
