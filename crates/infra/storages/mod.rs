pub mod s3;
pub mod segment_storage;
pub mod vod_storage;
