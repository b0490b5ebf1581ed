//! User profile and login payloads.

use serde::{Deserialize, Serialize};

/// Authenticated user profile, as issued by the directory service at login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(rename = "isAdmin", default)]
    pub is_admin: bool,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub name: String,
    pub email: String,
    #[serde(rename = "isAdmin", skip_serializing_if = "std::ops::Not::not")]
    pub is_admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub user: UserProfile,
}
