use serde::{Deserialize, Serialize};

pub const SYSTEM_USER_ID: i32 = 1;
pub const UNKNOWN_USER_ID: i32 = 0;

/// Who a stream belongs to, as far as the pipeline knows.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerIdentity {
    pub user_id: i32,
    pub username: String,
    pub title: String,
}

impl OwnerIdentity {
    /// Sentinel published when the owner cannot be resolved in time.
    pub fn unknown(stream_id: &str) -> Self {
        Self {
            user_id: UNKNOWN_USER_ID,
            username: "unknown".to_string(),
            title: format!("Stream {stream_id}"),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.user_id > 0 && !self.username.trim().is_empty()
    }

    /// Fills the gaps with safe defaults so processing never waits on metadata.
    pub fn normalized(mut self, stream_id: &str) -> Self {
        if self.user_id <= 0 {
            self.user_id = SYSTEM_USER_ID;
            if self.username.trim().is_empty() || self.username == "unknown" {
                self.username = "system".to_string();
            }
        }
        if self.username.trim().is_empty() {
            self.username = format!("user_{}", self.user_id);
        }
        if self.title.trim().is_empty() {
            self.title = format!("Stream {stream_id}");
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_owner_becomes_system() {
        let owner = OwnerIdentity::default().normalized("s1");
        assert_eq!(owner.user_id, SYSTEM_USER_ID);
        assert_eq!(owner.username, "system");
        assert_eq!(owner.title, "Stream s1");
    }

    #[test]
    fn missing_username_is_derived_from_id() {
        let owner = OwnerIdentity {
            user_id: 42,
            username: " ".to_string(),
            title: "Evening show".to_string(),
        }
        .normalized("s1");
        assert_eq!(owner.username, "user_42");
        assert_eq!(owner.title, "Evening show");
    }

    #[test]
    fn unknown_sentinel_is_not_resolved() {
        assert!(!OwnerIdentity::unknown("s1").is_resolved());
    }
}
