use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::db::postgres::schema::recordings;

#[derive(Debug, Clone, Selectable, Queryable)]
#[diesel(table_name = recordings)]
pub struct RecordingEntity {
    pub id: Uuid,
    pub stream_id: String,
    pub user_id: i32,
    pub username: String,
    pub title: String,
    pub duration_seconds: i32,
    pub file_path: String,
    pub thumbnail_path: String,
    pub file_size_bytes: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = recordings)]
pub struct UpsertRecordingEntity {
    pub stream_id: String,
    pub user_id: i32,
    pub username: String,
    pub title: String,
    pub duration_seconds: i32,
    pub file_path: String,
    pub thumbnail_path: String,
    pub file_size_bytes: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = recordings)]
pub struct RecordingReadyEntity {
    pub duration_seconds: i32,
    pub file_path: String,
    pub thumbnail_path: String,
    pub file_size_bytes: i64,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}
