pub mod job_statuses;
pub mod recording_statuses;
pub mod stream_statuses;
pub mod task_actions;
