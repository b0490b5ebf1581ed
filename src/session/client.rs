//! Media session client contract: the provider-neutral surface the
//! lifecycle controller drives.
//!
//! Any real-time media provider (or the in-process loopback used by the
//! `join` command) plugs in by implementing [`MediaClient`] and
//! [`SessionHandle`]. Event payloads are advisory: reconciliation always
//! re-reads `current_participants()` rather than trusting deltas.

use thiserror::Error;
use tokio::sync::mpsc;

/// Session-scoped participant identifier (stable per connection, not per person).
pub type ParticipantId = String;

/// Kind of media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

/// Opaque handle to a concrete media track owned by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackHandle {
    pub id: String,
    pub kind: TrackKind,
}

/// Live state of one track as reported by the provider.
///
/// "Enabled" in the participant model means `Playable` (currently producing
/// a live track), which distinguishes "muted but permitted" from "never
/// started".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackState {
    #[default]
    Off,
    Loading,
    Playable,
    Interrupted,
    Blocked,
}

impl TrackState {
    pub fn is_live(self) -> bool {
        matches!(self, TrackState::Playable)
    }
}

/// Per-kind track status for one participant.
#[derive(Debug, Clone, Default)]
pub struct TrackInfo {
    pub state: TrackState,
    pub track: Option<TrackHandle>,
}

/// One participant as reported by the provider's live listing.
#[derive(Debug, Clone)]
pub struct ProviderParticipant {
    pub session_id: ParticipantId,
    pub user_name: Option<String>,
    pub local: bool,
    pub owner: bool,
    pub audio: TrackInfo,
    pub video: TrackInfo,
}

impl ProviderParticipant {
    pub fn track(&self, kind: TrackKind) -> &TrackInfo {
        match kind {
            TrackKind::Audio => &self.audio,
            TrackKind::Video => &self.video,
        }
    }
}

/// Provider-reported session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderSessionState {
    NotJoined,
    Joining,
    Joined,
    Left,
    Error,
}

impl ProviderSessionState {
    /// Terminal states need no leave before the handle can be destroyed or reused.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProviderSessionState::NotJoined
                | ProviderSessionState::Left
                | ProviderSessionState::Error
        )
    }
}

/// Inbound session event from the provider.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ParticipantJoined { id: ParticipantId },
    ParticipantLeft { id: ParticipantId },
    ParticipantUpdated { id: ParticipantId },
    TrackStarted {
        participant: ParticipantId,
        local: bool,
        track: TrackHandle,
    },
    TrackStopped {
        participant: ParticipantId,
        kind: TrackKind,
    },
    SessionJoined,
    SessionLeft,
    SessionError { message: String },
}

/// Opaque provider-side failure. `Clone` so single-flight join waiters can
/// all observe the same resolution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ClientError(pub String);

/// Factory for session handles.
pub trait MediaClient: Send + Sync + 'static {
    type Handle: SessionHandle;

    fn create_session(&self) -> Self::Handle;
}

/// One connection to the media provider.
///
/// Exclusively owned by the lifecycle manager; other components only get
/// short-lived borrows during a single call.
pub trait SessionHandle: Send + Sync + 'static {
    fn join(
        &self,
        target: &str,
        display_name: &str,
        audio_enabled: bool,
        video_enabled: bool,
    ) -> impl std::future::Future<Output = Result<(), ClientError>> + Send;

    fn leave(&self) -> impl std::future::Future<Output = Result<(), ClientError>> + Send;

    fn destroy(&self) -> impl std::future::Future<Output = Result<(), ClientError>> + Send;

    fn set_local_audio(
        &self,
        enabled: bool,
    ) -> impl std::future::Future<Output = Result<(), ClientError>> + Send;

    fn set_local_video(
        &self,
        enabled: bool,
    ) -> impl std::future::Future<Output = Result<(), ClientError>> + Send;

    /// Authoritative live participant listing.
    fn current_participants(&self) -> Vec<ProviderParticipant>;

    /// Subscribe to session events. The controller owns exactly one
    /// subscription per join cycle and tears it down at leave/teardown.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent>;

    fn session_state(&self) -> ProviderSessionState;

    /// Canonical accessor for the current local video track, preferred over
    /// raw event track handles when both are available (reflects post-toggle
    /// state more reliably).
    fn local_video_track(&self) -> Option<TrackHandle>;
}

/// Render surface a video/audio track can be attached to.
pub trait RenderTarget: Send + Sync {
    fn attach(&self, track: &TrackHandle);
    fn detach(&self);
}
