use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{enums::stream_statuses::StreamStatus, owner::OwnerIdentity};

/// A task record as returned by the task service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveTask {
    #[serde(default)]
    pub id: i64,
    pub stream_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user_id: i32,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub status: String,
}

impl ActiveTask {
    /// `None` for labels this pipeline does not know.
    pub fn stream_status(&self) -> Option<StreamStatus> {
        self.status.parse().ok()
    }

    pub fn owner(&self) -> OwnerIdentity {
        OwnerIdentity {
            user_id: self.user_id,
            username: self.username.clone(),
            title: self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamStatusUpdate {
    pub stream_id: String,
    pub status: StreamStatus,
}
