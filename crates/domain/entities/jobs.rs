use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::db::postgres::schema::jobs;

#[derive(Debug, Clone, Selectable, Queryable, QueryableByName)]
#[diesel(table_name = jobs)]
pub struct JobEntity {
    pub id: Uuid,
    pub topic: String,
    pub message_key: String,
    pub action: String,
    pub source: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = jobs)]
pub struct InsertJobEntity {
    pub topic: String,
    pub message_key: String,
    pub action: String,
    pub source: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
