//! In-process loopback media client.
//!
//! Simulates a provider session so the `join` command can exercise the full
//! controller pipeline without a vendor SDK: the local participant's track
//! state follows the toggle calls, and an optional simulated peer joins
//! shortly after the session does (echo-bot style).

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::session::client::{
    ClientError, MediaClient, ProviderParticipant, ProviderSessionState, SessionEvent,
    SessionHandle, TrackHandle, TrackInfo, TrackKind, TrackState,
};

const PEER_JOIN_DELAY: Duration = Duration::from_millis(800);

/// Factory for loopback sessions.
pub struct LoopbackClient {
    /// Display name for the simulated remote peer; `None` for a solo session.
    peer_name: Option<String>,
}

impl LoopbackClient {
    pub fn new(peer_name: Option<String>) -> Self {
        Self { peer_name }
    }
}

impl MediaClient for LoopbackClient {
    type Handle = LoopbackSession;

    fn create_session(&self) -> LoopbackSession {
        LoopbackSession {
            inner: Arc::new(Inner {
                local_id: format!("local-{}", uuid::Uuid::new_v4()),
                peer_name: self.peer_name.clone(),
                state: Mutex::new(ProviderSessionState::NotJoined),
                participants: Mutex::new(Vec::new()),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }
}

struct Inner {
    local_id: String,
    peer_name: Option<String>,
    state: Mutex<ProviderSessionState>,
    participants: Mutex<Vec<ProviderParticipant>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
}

impl Inner {
    fn lock_participants(&self) -> MutexGuard<'_, Vec<ProviderParticipant>> {
        self.participants.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ProviderSessionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn emit(&self, event: SessionEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn track_info(&self, owner: &str, kind: TrackKind, live: bool) -> TrackInfo {
        TrackInfo {
            state: if live { TrackState::Playable } else { TrackState::Off },
            track: live.then_some(TrackHandle {
                id: format!("{owner}-{kind}"),
                kind,
            }),
        }
    }

    /// Flip a local track and emit the events a real provider would.
    fn set_local_track(&self, kind: TrackKind, enabled: bool) {
        let track = {
            let mut participants = self.lock_participants();
            let Some(local) = participants.iter_mut().find(|p| p.local) else {
                return;
            };
            let info = self.track_info(&self.local_id, kind, enabled);
            let track = info.track.clone();
            match kind {
                TrackKind::Audio => local.audio = info,
                TrackKind::Video => local.video = info,
            }
            track
        };

        self.emit(SessionEvent::ParticipantUpdated {
            id: self.local_id.clone(),
        });
        match track {
            Some(track) => self.emit(SessionEvent::TrackStarted {
                participant: self.local_id.clone(),
                local: true,
                track,
            }),
            None => self.emit(SessionEvent::TrackStopped {
                participant: self.local_id.clone(),
                kind,
            }),
        }
    }
}

/// One simulated provider connection.
pub struct LoopbackSession {
    inner: Arc<Inner>,
}

impl SessionHandle for LoopbackSession {
    async fn join(
        &self,
        target: &str,
        display_name: &str,
        audio_enabled: bool,
        video_enabled: bool,
    ) -> Result<(), ClientError> {
        if target.trim().is_empty() {
            self.inner.set_state(ProviderSessionState::Error);
            return Err(ClientError("empty join target".to_string()));
        }
        self.inner.set_state(ProviderSessionState::Joining);
        tracing::debug!("loopback join: {target} as {display_name}");

        {
            let mut participants = self.inner.lock_participants();
            participants.clear();
            participants.push(ProviderParticipant {
                session_id: self.inner.local_id.clone(),
                user_name: Some(display_name.to_string()),
                local: true,
                owner: true,
                audio: self
                    .inner
                    .track_info(&self.inner.local_id, TrackKind::Audio, audio_enabled),
                video: self
                    .inner
                    .track_info(&self.inner.local_id, TrackKind::Video, video_enabled),
            });
        }
        self.inner.set_state(ProviderSessionState::Joined);
        self.inner.emit(SessionEvent::SessionJoined);

        if let Some(peer_name) = self.inner.peer_name.clone() {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                tokio::time::sleep(PEER_JOIN_DELAY).await;
                let peer_id = format!("peer-{}", uuid::Uuid::new_v4());
                let audio = inner.track_info(&peer_id, TrackKind::Audio, true);
                let video = inner.track_info(&peer_id, TrackKind::Video, true);
                {
                    let mut participants = inner.lock_participants();
                    // The session may have been left in the meantime.
                    if participants.is_empty() {
                        return;
                    }
                    participants.push(ProviderParticipant {
                        session_id: peer_id.clone(),
                        user_name: Some(peer_name),
                        local: false,
                        owner: false,
                        audio: audio.clone(),
                        video: video.clone(),
                    });
                }
                inner.emit(SessionEvent::ParticipantJoined {
                    id: peer_id.clone(),
                });
                for info in [audio, video] {
                    if let Some(track) = info.track {
                        inner.emit(SessionEvent::TrackStarted {
                            participant: peer_id.clone(),
                            local: false,
                            track,
                        });
                    }
                }
            });
        }
        Ok(())
    }

    async fn leave(&self) -> Result<(), ClientError> {
        self.inner.lock_participants().clear();
        self.inner.set_state(ProviderSessionState::Left);
        self.inner.emit(SessionEvent::SessionLeft);
        Ok(())
    }

    async fn destroy(&self) -> Result<(), ClientError> {
        self.inner.set_state(ProviderSessionState::NotJoined);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }

    async fn set_local_audio(&self, enabled: bool) -> Result<(), ClientError> {
        self.inner.set_local_track(TrackKind::Audio, enabled);
        Ok(())
    }

    async fn set_local_video(&self, enabled: bool) -> Result<(), ClientError> {
        self.inner.set_local_track(TrackKind::Video, enabled);
        Ok(())
    }

    fn current_participants(&self) -> Vec<ProviderParticipant> {
        self.inner.lock_participants().clone()
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    fn session_state(&self) -> ProviderSessionState {
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn local_video_track(&self) -> Option<TrackHandle> {
        self.inner
            .lock_participants()
            .iter()
            .find(|p| p.local)
            .and_then(|p| p.video.track.clone())
    }
}
