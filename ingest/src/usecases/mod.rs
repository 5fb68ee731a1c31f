pub mod cleanup;
pub mod recovery;
pub mod stream_lifecycle;
