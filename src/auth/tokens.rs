//! Token storage and management

use serde::{Deserialize, Serialize};

/// Stored session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: String,
    pub expires_at: Option<i64>,
}

impl StoredToken {
    pub fn new(token: String, expires_in_secs: Option<u64>) -> Self {
        let expires_at = expires_in_secs.map(|secs| chrono::Utc::now().timestamp() + secs as i64);
        Self { token, expires_at }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => {
                // Consider expired if less than 5 minutes remaining
                chrono::Utc::now().timestamp() + 300 >= exp
            }
            None => false,
        }
    }
}
