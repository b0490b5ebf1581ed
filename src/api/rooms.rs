//! Room CRUD against the directory service.

use anyhow::{bail, Context, Result};

use super::client::DirectoryClient;
use crate::models::{
    CreateRoomRequest, DeleteRoomResponse, Room, RoomJoinResponse, RoomsResponse,
};

/// Fetch all rooms.
pub async fn fetch_rooms(client: &DirectoryClient) -> Result<Vec<Room>> {
    let resp = client.get("/rooms").await?;
    let rooms: RoomsResponse = resp.json().await.context("Failed to parse rooms list")?;
    if !rooms.success {
        bail!("Directory service reported a failure listing rooms");
    }
    Ok(rooms.rooms)
}

/// Resolve a room's join target (URL) by name.
pub async fn fetch_join_target(client: &DirectoryClient, name: &str) -> Result<Room> {
    let resp = client.get(&format!("/rooms/{}/join", name)).await?;
    let join: RoomJoinResponse = resp
        .json()
        .await
        .context("Failed to parse room join response")?;
    if !join.success {
        bail!("Directory service refused the join for room '{}'", name);
    }
    if join.token.is_some() {
        tracing::debug!("Directory service issued a media token for room '{}'", name);
    }
    Ok(join.room)
}

/// List rooms, most recent first.
pub async fn list_rooms(limit: usize) -> Result<()> {
    let client = DirectoryClient::new()?;
    let mut rooms = fetch_rooms(&client).await?;
    rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    if rooms.is_empty() {
        println!("No rooms. Create one with 'rooms-cli create <name>'.");
        return Ok(());
    }

    println!(
        "{:<24} {:>12}  {:<16}  {}",
        "NAME", "PARTICIPANTS", "CREATED BY", "URL"
    );
    for room in rooms.iter().take(limit) {
        println!(
            "{:<24} {:>12}  {:<16}  {}",
            room.name,
            room.participant_count,
            room.created_by.as_deref().unwrap_or("-"),
            room.url
        );
    }
    Ok(())
}

/// Room names are slugs: lowercase alphanumerics and single dashes.
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.trim().to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        } else if (ch == '-' || ch.is_whitespace()) && !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Create a room.
pub async fn create_room(name: &str) -> Result<()> {
    let name = slugify(name);
    if name.is_empty() {
        bail!("Room name is required");
    }

    let client = DirectoryClient::new()?;
    let body = serde_json::to_value(CreateRoomRequest { name: name.clone() })
        .context("Failed to serialize create-room request")?;
    let resp = client.post("/rooms", &body).await?;
    let created: crate::models::RoomResponse = resp
        .json()
        .await
        .context("Failed to parse create-room response")?;
    if !created.success {
        bail!("Directory service reported a failure creating the room");
    }

    println!("Created room '{}' (id {})", created.room.name, created.room.id);
    println!("  url: {}", created.room.url);
    Ok(())
}

/// Delete a room by name.
pub async fn delete_room(name: &str) -> Result<()> {
    let client = DirectoryClient::new()?;
    let resp = client.delete(&format!("/rooms/{}", name)).await?;
    let deleted: DeleteRoomResponse = resp
        .json()
        .await
        .context("Failed to parse delete-room response")?;
    if !deleted.success {
        bail!("Directory service reported a failure deleting '{}'", name);
    }

    match deleted.message {
        Some(message) => println!("{}", message),
        None => println!("Deleted room '{}'", name),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_lowercases_and_dashes() {
        assert_eq!(slugify("Team Standup"), "team-standup");
        assert_eq!(slugify("demo"), "demo");
    }

    #[test]
    fn test_slugify_collapses_separators_and_junk() {
        assert_eq!(slugify("  Big -- Room!!  "), "big-room");
        assert_eq!(slugify("!!!"), "");
    }
}
