pub mod db;
pub mod storages;
pub mod task_service;
