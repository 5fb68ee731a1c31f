use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use diesel::{prelude::*, upsert::excluded};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain::{
        entities::recordings::RecordingEntity,
        repositories::recording::RecordingRepository,
        value_objects::{
            enums::recording_statuses::RecordingStatus,
            recordings::{ProcessingRecordingModel, ReadyRecordingModel},
        },
    },
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::recordings},
};

pub struct RecordingPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl RecordingPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl RecordingRepository for RecordingPostgres {
    async fn upsert_processing(&self, model: ProcessingRecordingModel) -> Result<Uuid> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let insert_entity = model.to_entity();

        let id = diesel::insert_into(recordings::table)
            .values(&insert_entity)
            .on_conflict(recordings::stream_id)
            .do_update()
            .set((
                recordings::user_id.eq(excluded(recordings::user_id)),
                recordings::username.eq(excluded(recordings::username)),
                recordings::title.eq(excluded(recordings::title)),
                recordings::duration_seconds.eq(excluded(recordings::duration_seconds)),
                recordings::status.eq(excluded(recordings::status)),
                recordings::updated_at.eq(excluded(recordings::updated_at)),
            ))
            .returning(recordings::id)
            .get_result::<Uuid>(&mut conn)?;

        Ok(id)
    }

    async fn mark_failed(&self, stream_id: String) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let updated = diesel::update(recordings::table)
            .filter(recordings::stream_id.eq(&stream_id))
            .set((
                recordings::status.eq(RecordingStatus::Failed.to_string()),
                recordings::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        if updated == 0 {
            bail!("recording for stream {stream_id} not found");
        }
        Ok(())
    }

    async fn mark_ready(&self, stream_id: String, model: ReadyRecordingModel) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let updated = diesel::update(recordings::table)
            .filter(recordings::stream_id.eq(&stream_id))
            .set(&model.to_entity())
            .execute(&mut conn)?;

        if updated == 0 {
            bail!("recording for stream {stream_id} not found");
        }
        Ok(())
    }

    async fn find_by_stream_id(&self, stream_id: String) -> Result<Option<RecordingEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let recording = recordings::table
            .filter(recordings::stream_id.eq(stream_id))
            .select(RecordingEntity::as_select())
            .first::<RecordingEntity>(&mut conn)
            .optional()?;

        Ok(recording)
    }
}
