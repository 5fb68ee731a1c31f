use serde_json::Value;

/// One durable queue record before it is written.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub topic: String,
    pub key: String,
    pub action: String,
    pub source: String,
    pub payload: Value,
}
