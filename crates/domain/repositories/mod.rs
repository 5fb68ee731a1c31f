pub mod recording;
pub mod storage;
pub mod task_queue;
pub mod task_service;
