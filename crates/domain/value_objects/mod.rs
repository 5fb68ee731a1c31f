pub mod enums;
pub mod owner;
pub mod queue_message;
pub mod recording_task;
pub mod recordings;
pub mod storage;
pub mod task_service;
