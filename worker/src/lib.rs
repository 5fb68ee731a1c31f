pub mod config;
pub mod converter;
pub mod segment_fetch;
pub mod task_consumer;
pub mod usecases;
pub mod worker_pool;
