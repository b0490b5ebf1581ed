//! API client module for the room directory service

pub mod client;
mod rooms;

use anyhow::Result;

pub use client::DirectoryClient;
pub use rooms::fetch_join_target;

/// List rooms with participant counts
pub async fn list_rooms(limit: usize) -> Result<()> {
    rooms::list_rooms(limit).await
}

/// Create a room
pub async fn create_room(name: &str) -> Result<()> {
    rooms::create_room(name).await
}

/// Delete a room
pub async fn delete_room(name: &str) -> Result<()> {
    rooms::delete_room(name).await
}
