//! Call-session lifecycle controller.
//!
//! A single-instance state machine governing one real-time media session
//! (join -> active -> leave/teardown): deduplicates concurrent join attempts,
//! reconciles local toggle state against asynchronous provider events, binds
//! media tracks to render targets, and guarantees cleanup on every exit path.

pub mod client;
pub mod lifecycle;
pub mod reconcile;
pub mod runner;
pub mod tracks;

use std::time::Duration;

use thiserror::Error;

use client::{ClientError, ParticipantId};

pub use lifecycle::SessionController;

/// One member of the active session, as consumed by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Session-scoped id (stable per connection, not per person).
    pub id: ParticipantId,
    /// For the local participant this comes from the authenticated user
    /// profile, not from the media client.
    pub display_name: String,
    pub is_local: bool,
    /// Derived from live track state, not from last-requested state.
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub is_owner: bool,
}

/// State of one local media control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ToggleState {
    pub desired: bool,
    /// Re-entrancy guard: a new toggle request is rejected while a prior one
    /// is in flight.
    pub applying: bool,
}

/// Local audio/video control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Toggles {
    pub audio: ToggleState,
    pub video: ToggleState,
}

impl Toggles {
    /// Seed for a fresh join: audio on, video off.
    pub fn join_defaults() -> Self {
        Self {
            audio: ToggleState {
                desired: true,
                applying: false,
            },
            video: ToggleState::default(),
        }
    }
}

/// Snapshot published to the presentation layer on every state change.
#[derive(Debug, Clone, Default)]
pub struct RosterSnapshot {
    pub participants: Vec<Participant>,
    pub toggles: Toggles,
}

/// What happens to the session handle on `leave()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeavePolicy {
    /// Destroy the handle after leaving; the next join constructs a fresh one.
    #[default]
    DestroyOnLeave,
    /// Keep the handle around in a terminal state and reuse it on rejoin.
    RetainForRejoin,
}

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Fallback when the caller passes an empty display name.
    pub default_display_name: String,
    pub leave_policy: LeavePolicy,
    /// Bounded wait for a stale handle's leave acknowledgment during join;
    /// after this, teardown proceeds forcibly.
    pub stale_leave_timeout: Duration,
    /// Delay before the single track-binding retry when a render target has
    /// not been registered yet.
    pub bind_retry_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            default_display_name: "User".to_string(),
            leave_policy: LeavePolicy::default(),
            stale_leave_timeout: Duration::from_millis(400),
            bind_retry_delay: Duration::from_millis(500),
        }
    }
}

/// Join failures. `Clone` so all coalesced callers observe the same resolution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("invalid join target")]
    InvalidTarget,
    #[error("provider rejected join: {0}")]
    Rejected(ClientError),
    #[error("stale session cleanup failed: {0}")]
    StaleCleanup(ClientError),
    #[error("join attempt was abandoned")]
    Abandoned,
}

/// Leave failures. Local cleanup proceeds regardless.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LeaveError {
    #[error("provider leave request failed: {0}")]
    Provider(ClientError),
}

/// Toggle failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToggleError {
    #[error("no active session")]
    NoSession,
    #[error("a toggle for this control is already in flight")]
    InFlight,
    #[error("provider rejected toggle: {0}")]
    Rejected(ClientError),
}

/// Non-fatal reports surfaced to the presentation layer. The controller
/// never auto-leaves on a session error; that decision is left to the caller.
#[derive(Debug, Clone)]
pub enum SessionNotice {
    /// Provider reported a session error; the call remains nominally active.
    SessionError { message: String },
    /// Provider reported the session ended on its side.
    SessionLeft,
    /// A best-effort leave during teardown failed (reported, never propagated).
    LeaveFailed { message: String },
}
