pub mod recordings;
pub mod task_queue;
