pub mod recording_processor;
