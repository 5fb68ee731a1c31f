use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{
    prelude::*,
    sql_types::{Text, Timestamptz},
};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain::{
        entities::jobs::{InsertJobEntity, JobEntity},
        repositories::task_queue::{TaskQueueConsumer, TaskQueueProducer},
        value_objects::{enums::job_statuses::JobStatus, queue_message::QueueMessage},
    },
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::jobs},
};

// Oldest deliverable row per topic. A key is skipped while one of its rows is
// claimed or an older row of the same key is still waiting, which keeps
// per-stream ordering across consumers.
const LOCK_NEXT_SQL: &str = r#"
UPDATE jobs
SET status = 'running', locked_at = $1, locked_by = $2
WHERE id = (
    SELECT j.id
    FROM jobs j
    WHERE j.topic = $3
      AND j.status = 'queued'
      AND j.run_at <= $1
      AND NOT EXISTS (
          SELECT 1 FROM jobs r
          WHERE r.topic = j.topic
            AND r.message_key = j.message_key
            AND r.status = 'running'
      )
      AND NOT EXISTS (
          SELECT 1 FROM jobs e
          WHERE e.topic = j.topic
            AND e.message_key = j.message_key
            AND e.status = 'queued'
            AND e.created_at < j.created_at
      )
    ORDER BY j.created_at ASC
    LIMIT 1
    FOR UPDATE SKIP LOCKED
)
RETURNING id, topic, message_key, action, source, payload, status, attempts,
          run_at, locked_at, locked_by, error, created_at
"#;

pub struct TaskQueuePostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl TaskQueuePostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl TaskQueueProducer for TaskQueuePostgres {
    async fn publish(&self, message: QueueMessage) -> Result<Uuid> {
        if message.key.trim().is_empty() {
            bail!("queue message key cannot be empty");
        }
        if message.action.trim().is_empty() {
            bail!("queue message action cannot be empty");
        }

        let mut conn = Arc::clone(&self.db_pool).get()?;
        let now = Utc::now();

        let insert_entity = InsertJobEntity {
            topic: message.topic,
            message_key: message.key,
            action: message.action,
            source: message.source,
            payload: message.payload,
            status: JobStatus::Queued.to_string(),
            attempts: 0,
            run_at: now,
            created_at: now,
        };

        let result = diesel::insert_into(jobs::table)
            .values(&insert_entity)
            .returning(jobs::id)
            .get_result::<Uuid>(&mut conn)?;

        Ok(result)
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        diesel::sql_query("SELECT 1").execute(&mut conn)?;
        Ok(())
    }
}

#[async_trait]
impl TaskQueueConsumer for TaskQueuePostgres {
    async fn lock_next(&self, topic: String, consumer: String) -> Result<Option<JobEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let current_time = Utc::now();

        let job = diesel::sql_query(LOCK_NEXT_SQL)
            .bind::<Timestamptz, _>(current_time)
            .bind::<Text, _>(consumer)
            .bind::<Text, _>(topic)
            .get_result::<JobEntity>(&mut conn)
            .optional()?;

        Ok(job)
    }

    async fn ack(&self, job_id: Uuid, status: JobStatus) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        diesel::update(jobs::table.find(job_id))
            .set((
                jobs::status.eq(status.to_string()),
                jobs::locked_at.eq::<Option<DateTime<Utc>>>(None),
                jobs::locked_by.eq::<Option<String>>(None),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn requeue(&self, job_id: Uuid, delay_secs: i64, reason: String) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let next_run_at = Utc::now() + chrono::Duration::seconds(delay_secs);

        diesel::update(jobs::table.find(job_id))
            .set((
                jobs::status.eq(JobStatus::Queued.to_string()),
                jobs::attempts.eq(jobs::attempts + 1),
                jobs::error.eq(Some(reason)),
                jobs::run_at.eq(next_run_at),
                jobs::locked_at.eq::<Option<DateTime<Utc>>>(None),
                jobs::locked_by.eq::<Option<String>>(None),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn mark_dead(&self, job_id: Uuid, reason: String) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        diesel::update(jobs::table.find(job_id))
            .set((
                jobs::status.eq(JobStatus::Dead.to_string()),
                jobs::error.eq(Some(reason)),
                jobs::locked_at.eq::<Option<DateTime<Utc>>>(None),
                jobs::locked_by.eq::<Option<String>>(None),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn release_stale(&self, topic: String, older_than_secs: i64) -> Result<usize> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let cutoff = Utc::now() - chrono::Duration::seconds(older_than_secs);

        let released = diesel::update(jobs::table)
            .filter(jobs::topic.eq(topic))
            .filter(jobs::status.eq(JobStatus::Running.to_string()))
            .filter(jobs::locked_at.lt(cutoff))
            .set((
                jobs::status.eq(JobStatus::Queued.to_string()),
                jobs::locked_at.eq::<Option<DateTime<Utc>>>(None),
                jobs::locked_by.eq::<Option<String>>(None),
            ))
            .execute(&mut conn)?;

        Ok(released)
    }
}
