//! Room metadata as served by the directory service.

use serde::{Deserialize, Serialize};

/// One managed room.
#[derive(Debug, Clone, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    /// Join target for the media session client.
    pub url: String,
    #[serde(rename = "participantCount", default)]
    pub participant_count: u32,
    #[serde(rename = "createdBy")]
    pub created_by: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RoomsResponse {
    pub success: bool,
    pub rooms: Vec<Room>,
}

#[derive(Debug, Deserialize)]
pub struct RoomResponse {
    pub success: bool,
    pub room: Room,
}

#[derive(Debug, Serialize)]
pub struct CreateRoomRequest {
    pub name: String,
}

/// Join target plus an optional per-room media token.
#[derive(Debug, Deserialize)]
pub struct RoomJoinResponse {
    pub success: bool,
    pub room: Room,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRoomResponse {
    pub success: bool,
    pub message: Option<String>,
}
