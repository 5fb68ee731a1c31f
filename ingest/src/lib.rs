pub mod axum_http;
pub mod config;
pub mod ports;
pub mod registry;
pub mod segment_upload;
pub mod status_dispatch;
pub mod supervisor;
pub mod usecases;
