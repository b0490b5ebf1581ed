//! Data models for directory-service entities

mod room;
mod user;

pub use room::*;
pub use user::*;
