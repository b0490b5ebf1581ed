//! Lifecycle manager: owns the session handle and enforces exactly-once
//! session establishment and clean teardown.
//!
//! State machine: Idle -> Joining -> Active -> Leaving -> Idle, with
//! Joining -> Idle on failure. `teardown` is reachable from any state and
//! always terminates in Idle with the handle destroyed. At most one session
//! handle is live per controller instance at any time.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use super::client::{
    MediaClient, ParticipantId, RenderTarget, SessionEvent, SessionHandle, TrackKind,
};
use super::reconcile;
use super::tracks::TrackRegistry;
use super::{
    JoinError, LeaveError, LeavePolicy, RosterSnapshot, SessionNotice, SessionOptions,
    ToggleError, Toggles,
};

/// Controller lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Joining,
    Active,
    Leaving,
}

type JoinProgress = Option<Result<(), JoinError>>;

/// State shared with the event pump task.
struct Shared {
    toggles: StdMutex<Toggles>,
    local_name: StdMutex<String>,
    tracks: TrackRegistry,
    roster_tx: watch::Sender<RosterSnapshot>,
    notice_tx: mpsc::UnboundedSender<SessionNotice>,
}

impl Shared {
    fn lock_toggles(&self) -> MutexGuard<'_, Toggles> {
        self.toggles.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_local_name(&self) -> MutexGuard<'_, String> {
        self.local_name.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct Inner<H> {
    phase: Phase,
    handle: Option<Arc<H>>,
    /// Shared resolution channel for coalesced join callers.
    join_rx: Option<watch::Receiver<JoinProgress>>,
    pump: Option<JoinHandle<()>>,
    notice_rx: Option<mpsc::UnboundedReceiver<SessionNotice>>,
}

/// Single-instance state machine governing one media session.
pub struct SessionController<C: MediaClient> {
    client: C,
    opts: SessionOptions,
    /// Serializes join/leave/teardown; toggles only need the Active phase.
    ops: Mutex<()>,
    inner: Mutex<Inner<C::Handle>>,
    shared: Arc<Shared>,
}

impl<C: MediaClient> SessionController<C> {
    pub fn new(client: C, opts: SessionOptions) -> Self {
        let (roster_tx, _) = watch::channel(RosterSnapshot::default());
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let tracks = TrackRegistry::new(opts.bind_retry_delay);
        Self {
            client,
            opts,
            ops: Mutex::new(()),
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                handle: None,
                join_rx: None,
                pump: None,
                notice_rx: Some(notice_rx),
            }),
            shared: Arc::new(Shared {
                toggles: StdMutex::new(Toggles::default()),
                local_name: StdMutex::new(String::new()),
                tracks,
                roster_tx,
                notice_tx,
            }),
        }
    }

    /// Subscribe to roster/toggle snapshots. The presentation layer only ever
    /// reads these; it never mutates controller state directly.
    pub fn snapshots(&self) -> watch::Receiver<RosterSnapshot> {
        self.shared.roster_tx.subscribe()
    }

    /// Take the non-fatal notice stream (session errors, teardown reports).
    /// Single consumer; returns `None` once taken.
    pub async fn take_notices(&self) -> Option<mpsc::UnboundedReceiver<SessionNotice>> {
        self.inner.lock().await.notice_rx.take()
    }

    /// Register a render target for (participant, kind). Idempotent; a track
    /// that arrived first is bound immediately.
    pub fn register_target(
        &self,
        participant: &ParticipantId,
        kind: TrackKind,
        target: Arc<dyn RenderTarget>,
    ) {
        self.shared.tracks.register_target(participant, kind, target);
    }

    pub async fn phase(&self) -> Phase {
        self.inner.lock().await.phase
    }

    /// Join a session. Single-flight: concurrent calls while one join is in
    /// flight coalesce onto the same attempt and observe the same resolution;
    /// a join while Active is an idempotent no-op success.
    pub async fn join(&self, target: &str, display_name: &str) -> Result<(), JoinError> {
        if target.trim().is_empty() {
            return Err(JoinError::InvalidTarget);
        }
        let display_name = {
            let trimmed = display_name.trim();
            if trimmed.is_empty() {
                self.opts.default_display_name.clone()
            } else {
                trimmed.to_string()
            }
        };

        // Coalesce onto an in-flight attempt before contending for the op lock.
        {
            let inner = self.inner.lock().await;
            match inner.phase {
                Phase::Active => return Ok(()),
                Phase::Joining => {
                    if let Some(rx) = inner.join_rx.clone() {
                        drop(inner);
                        tracing::debug!("join already in flight, awaiting its resolution");
                        return wait_join(rx).await;
                    }
                }
                _ => {}
            }
        }

        let _op = self.ops.lock().await;

        // Re-check: a coalesced join may have completed while we waited.
        let tx = {
            let mut inner = self.inner.lock().await;
            if inner.phase == Phase::Active {
                return Ok(());
            }
            let (tx, rx) = watch::channel(None);
            inner.phase = Phase::Joining;
            inner.join_rx = Some(rx);
            tx
        };

        let result = match self.establish(target, &display_name).await {
            Ok(handle) => {
                *self.shared.lock_toggles() = Toggles::join_defaults();
                *self.shared.lock_local_name() = display_name;
                {
                    let mut inner = self.inner.lock().await;
                    inner.phase = Phase::Active;
                    inner.handle = Some(handle.clone());
                    inner.join_rx = None;
                    inner.pump = Some(spawn_pump(self.shared.clone(), handle.clone()));
                }
                // Initial roster, before the first provider event lands.
                publish_roster(&self.shared, handle.as_ref());
                tracing::info!("joined session at {target}");
                Ok(())
            }
            Err(e) => {
                let mut inner = self.inner.lock().await;
                inner.phase = Phase::Idle;
                inner.join_rx = None;
                Err(e)
            }
        };
        let _ = tx.send(Some(result.clone()));
        result
    }

    /// Strictly ordered join side effects: stale cleanup, handle
    /// construction, provider join. On any failure the partial handle is
    /// destroyed; no leaked handles.
    async fn establish(
        &self,
        target: &str,
        display_name: &str,
    ) -> Result<Arc<C::Handle>, JoinError> {
        // (1) stale handle in a non-terminal state: request leave, bounded
        // wait, then destroy. A hung leave must not block joins indefinitely.
        let stale = self.inner.lock().await.handle.take();
        let mut retained = None;
        if let Some(stale) = stale {
            if stale.session_state().is_terminal() {
                if self.opts.leave_policy == LeavePolicy::RetainForRejoin {
                    retained = Some(stale);
                } else if let Err(e) = stale.destroy().await {
                    return Err(JoinError::StaleCleanup(e));
                }
            } else {
                match tokio::time::timeout(self.opts.stale_leave_timeout, stale.leave()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!("stale session leave failed: {e}"),
                    Err(_) => tracing::warn!(
                        "stale session leave timed out after {:?}, destroying anyway",
                        self.opts.stale_leave_timeout
                    ),
                }
                if let Err(e) = stale.destroy().await {
                    return Err(JoinError::StaleCleanup(e));
                }
            }
        }

        // (2) construct a fresh handle, or reuse a retained terminal one.
        let handle = retained.unwrap_or_else(|| Arc::new(self.client.create_session()));

        // (3) provider join: local video off, local audio on by default.
        if let Err(e) = handle.join(target, display_name, true, false).await {
            if let Err(destroy_err) = handle.destroy().await {
                tracing::debug!("destroying partial session handle failed: {destroy_err}");
            }
            return Err(JoinError::Rejected(e));
        }
        Ok(handle)
    }

    /// Leave the session. No-op success when no session is active. Provider
    /// failure is surfaced but never blocks local cleanup: after this returns
    /// no track is referenced by any render target and a fresh join can
    /// proceed immediately.
    pub async fn leave(&self) -> Result<(), LeaveError> {
        let _op = self.ops.lock().await;
        let handle = {
            let mut inner = self.inner.lock().await;
            if inner.phase != Phase::Active {
                return Ok(());
            }
            inner.phase = Phase::Leaving;
            if let Some(pump) = inner.pump.take() {
                pump.abort();
            }
            inner.handle.take()
        };

        let result = match &handle {
            Some(handle) => handle.leave().await,
            None => Ok(()),
        };
        if let Err(e) = &result {
            tracing::warn!("provider leave failed: {e}; forcing local cleanup");
        }

        self.shared.tracks.clear();
        *self.shared.lock_toggles() = Toggles::default();
        self.shared.roster_tx.send_replace(RosterSnapshot::default());

        if let Some(handle) = handle {
            match self.opts.leave_policy {
                LeavePolicy::DestroyOnLeave => {
                    if let Err(e) = handle.destroy().await {
                        tracing::debug!("destroying session handle failed: {e}");
                    }
                }
                LeavePolicy::RetainForRejoin => {
                    self.inner.lock().await.handle = Some(handle);
                }
            }
        }

        self.inner.lock().await.phase = Phase::Idle;
        tracing::info!("left session");
        result.map_err(LeaveError::Provider)
    }

    /// Dispose of the controller's session resources. Runs during cleanup, so
    /// errors are swallowed and reported as notices, never propagated.
    pub async fn teardown(&self) {
        let _op = self.ops.lock().await;
        let handle = {
            let mut inner = self.inner.lock().await;
            inner.phase = Phase::Idle;
            inner.join_rx = None;
            if let Some(pump) = inner.pump.take() {
                pump.abort();
            }
            inner.handle.take()
        };

        if let Some(handle) = handle {
            if !handle.session_state().is_terminal() {
                let report = match tokio::time::timeout(self.opts.stale_leave_timeout, handle.leave()).await
                {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => Some("leave timed out".to_string()),
                };
                if let Some(message) = report {
                    tracing::warn!("leave during teardown failed: {message}");
                    let _ = self
                        .shared
                        .notice_tx
                        .send(SessionNotice::LeaveFailed { message });
                }
            }
            if let Err(e) = handle.destroy().await {
                tracing::debug!("destroying session handle during teardown failed: {e}");
            }
        }

        self.shared.tracks.clear();
        *self.shared.lock_toggles() = Toggles::default();
        self.shared.roster_tx.send_replace(RosterSnapshot::default());
    }

    pub async fn toggle_audio(&self) -> Result<bool, ToggleError> {
        self.toggle(TrackKind::Audio).await
    }

    pub async fn toggle_video(&self) -> Result<bool, ToggleError> {
        self.toggle(TrackKind::Video).await
    }

    /// Flip one local control. Rejected while no session is active (including
    /// while a join is pending) and while a prior toggle of the same kind is
    /// in flight. On provider failure `desired` rolls back to its pre-request
    /// value.
    async fn toggle(&self, kind: TrackKind) -> Result<bool, ToggleError> {
        let handle = {
            let inner = self.inner.lock().await;
            match (inner.phase, &inner.handle) {
                (Phase::Active, Some(handle)) => handle.clone(),
                _ => return Err(ToggleError::NoSession),
            }
        };

        let desired = {
            let mut toggles = self.shared.lock_toggles();
            let control = match kind {
                TrackKind::Audio => &mut toggles.audio,
                TrackKind::Video => &mut toggles.video,
            };
            if control.applying {
                return Err(ToggleError::InFlight);
            }
            control.applying = true;
            control.desired = !control.desired;
            control.desired
        };
        self.publish_toggles();

        let result = match kind {
            TrackKind::Audio => handle.set_local_audio(desired).await,
            TrackKind::Video => handle.set_local_video(desired).await,
        };

        {
            let mut toggles = self.shared.lock_toggles();
            let control = match kind {
                TrackKind::Audio => &mut toggles.audio,
                TrackKind::Video => &mut toggles.video,
            };
            control.applying = false;
            if result.is_err() {
                control.desired = !desired;
            }
        }
        self.publish_toggles();

        match result {
            Ok(()) => {
                tracing::info!("local {kind} {}", if desired { "enabled" } else { "disabled" });
                Ok(desired)
            }
            Err(e) => {
                tracing::warn!("toggling local {kind} failed: {e}");
                Err(ToggleError::Rejected(e))
            }
        }
    }

    fn publish_toggles(&self) {
        let toggles = *self.shared.lock_toggles();
        self.shared
            .roster_tx
            .send_modify(|snapshot| snapshot.toggles = toggles);
    }
}

async fn wait_join(mut rx: watch::Receiver<JoinProgress>) -> Result<(), JoinError> {
    loop {
        let resolved = rx.borrow_and_update().clone();
        if let Some(result) = resolved {
            return result;
        }
        if rx.changed().await.is_err() {
            return Err(JoinError::Abandoned);
        }
    }
}

/// Drain provider events until the subscription closes or the pump is
/// aborted at leave/teardown. One subscription per join cycle, so repeated
/// join cycles never stack duplicate handlers.
fn spawn_pump<H: SessionHandle>(shared: Arc<Shared>, handle: Arc<H>) -> JoinHandle<()> {
    let mut events = handle.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            handle_event(&shared, handle.as_ref(), event);
        }
    })
}

fn handle_event<H: SessionHandle>(shared: &Shared, handle: &H, event: SessionEvent) {
    match &event {
        SessionEvent::TrackStarted {
            participant,
            local,
            track,
        } => {
            // For local video prefer the client's canonical accessor; it
            // reflects post-toggle state more reliably than the event handle.
            let track = if *local && track.kind == TrackKind::Video {
                handle.local_video_track().unwrap_or_else(|| track.clone())
            } else {
                track.clone()
            };
            let kind = track.kind;
            shared.tracks.bind_track(participant, kind, track);
        }
        SessionEvent::TrackStopped { participant, kind } => {
            shared.tracks.unbind_track(participant, *kind);
        }
        SessionEvent::SessionError { message } => {
            // Non-fatal: reported, never escalated into a leave.
            tracing::warn!("provider session error: {message}");
            let _ = shared.notice_tx.send(SessionNotice::SessionError {
                message: message.clone(),
            });
        }
        SessionEvent::SessionLeft => {
            let _ = shared.notice_tx.send(SessionNotice::SessionLeft);
        }
        _ => {}
    }

    if reconcile::touches_roster(&event) {
        publish_roster(shared, handle);
    }
}

/// Recompute the roster from the authoritative listing and publish it along
/// with resynchronized toggle state.
fn publish_roster<H: SessionHandle>(shared: &Shared, handle: &H) {
    let listing = handle.current_participants();
    let toggles = {
        let mut toggles = shared.lock_toggles();
        reconcile::resync_local_toggles(&mut toggles, &listing);
        *toggles
    };
    let local_name = shared.lock_local_name().clone();
    let participants = reconcile::recompute_participants(&listing, &local_name);
    shared
        .roster_tx
        .send_replace(RosterSnapshot {
            participants,
            toggles,
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::client::{
        ClientError, ProviderParticipant, ProviderSessionState, TrackHandle, TrackInfo,
        TrackState,
    };
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    // ------------------------------------------------------------------
    // Scripted fake media client
    // ------------------------------------------------------------------

    #[derive(Clone, Default)]
    struct Behavior {
        join_delay: Duration,
        toggle_delay: Duration,
        fail_next_join: Arc<AtomicBool>,
        fail_audio_toggle: Arc<AtomicBool>,
        fail_leave: Arc<AtomicBool>,
        hang_leave: Arc<AtomicBool>,
    }

    struct FakeSession {
        local_id: String,
        state: StdMutex<ProviderSessionState>,
        participants: StdMutex<Vec<ProviderParticipant>>,
        subscribers: StdMutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
        join_calls: AtomicUsize,
        join_args: StdMutex<Option<(String, String, bool, bool)>>,
        leave_calls: AtomicUsize,
        destroy_calls: AtomicUsize,
        audio_set_calls: AtomicUsize,
        video_set_calls: AtomicUsize,
        behavior: Behavior,
    }

    impl FakeSession {
        fn new(behavior: Behavior) -> Self {
            Self {
                local_id: "local-1".to_string(),
                state: StdMutex::new(ProviderSessionState::NotJoined),
                participants: StdMutex::new(Vec::new()),
                subscribers: StdMutex::new(Vec::new()),
                join_calls: AtomicUsize::new(0),
                join_args: StdMutex::new(None),
                leave_calls: AtomicUsize::new(0),
                destroy_calls: AtomicUsize::new(0),
                audio_set_calls: AtomicUsize::new(0),
                video_set_calls: AtomicUsize::new(0),
                behavior,
            }
        }

        fn emit(&self, event: SessionEvent) {
            let subscribers = self.subscribers.lock().unwrap();
            for tx in subscribers.iter() {
                let _ = tx.send(event.clone());
            }
        }

        fn set_listing(&self, listing: Vec<ProviderParticipant>) {
            *self.participants.lock().unwrap() = listing;
        }

        fn set_local_track(&self, kind: TrackKind, state: TrackState) {
            let mut listing = self.participants.lock().unwrap();
            if let Some(local) = listing.iter_mut().find(|p| p.local) {
                let id = format!("{}-{kind}", self.local_id);
                let info = TrackInfo {
                    state,
                    track: state.is_live().then_some(TrackHandle { id, kind }),
                };
                match kind {
                    TrackKind::Audio => local.audio = info,
                    TrackKind::Video => local.video = info,
                }
            }
        }
    }

    #[derive(Clone)]
    struct FakeHandle(Arc<FakeSession>);

    impl SessionHandle for FakeHandle {
        async fn join(
            &self,
            target: &str,
            display_name: &str,
            audio_enabled: bool,
            video_enabled: bool,
        ) -> Result<(), ClientError> {
            if !self.0.behavior.join_delay.is_zero() {
                tokio::time::sleep(self.0.behavior.join_delay).await;
            }
            self.0.join_calls.fetch_add(1, Ordering::SeqCst);
            *self.0.join_args.lock().unwrap() = Some((
                target.to_string(),
                display_name.to_string(),
                audio_enabled,
                video_enabled,
            ));
            if self.0.behavior.fail_next_join.swap(false, Ordering::SeqCst) {
                *self.0.state.lock().unwrap() = ProviderSessionState::Error;
                return Err(ClientError("join rejected".to_string()));
            }
            *self.0.state.lock().unwrap() = ProviderSessionState::Joined;
            self.0.set_listing(vec![ProviderParticipant {
                session_id: self.0.local_id.clone(),
                user_name: None,
                local: true,
                owner: false,
                audio: TrackInfo {
                    state: if audio_enabled {
                        TrackState::Playable
                    } else {
                        TrackState::Off
                    },
                    track: audio_enabled.then_some(TrackHandle {
                        id: format!("{}-audio", self.0.local_id),
                        kind: TrackKind::Audio,
                    }),
                },
                video: TrackInfo::default(),
            }]);
            self.0.emit(SessionEvent::SessionJoined);
            Ok(())
        }

        async fn leave(&self) -> Result<(), ClientError> {
            if self.0.behavior.hang_leave.load(Ordering::SeqCst) {
                // Never acknowledges; the controller's bounded wait must fire.
                std::future::pending::<()>().await;
            }
            self.0.leave_calls.fetch_add(1, Ordering::SeqCst);
            if self.0.behavior.fail_leave.load(Ordering::SeqCst) {
                return Err(ClientError("leave failed".to_string()));
            }
            *self.0.state.lock().unwrap() = ProviderSessionState::Left;
            Ok(())
        }

        async fn destroy(&self) -> Result<(), ClientError> {
            self.0.destroy_calls.fetch_add(1, Ordering::SeqCst);
            *self.0.state.lock().unwrap() = ProviderSessionState::NotJoined;
            Ok(())
        }

        async fn set_local_audio(&self, enabled: bool) -> Result<(), ClientError> {
            if !self.0.behavior.toggle_delay.is_zero() {
                tokio::time::sleep(self.0.behavior.toggle_delay).await;
            }
            self.0.audio_set_calls.fetch_add(1, Ordering::SeqCst);
            if self.0.behavior.fail_audio_toggle.load(Ordering::SeqCst) {
                return Err(ClientError("device busy".to_string()));
            }
            self.0.set_local_track(
                TrackKind::Audio,
                if enabled {
                    TrackState::Playable
                } else {
                    TrackState::Off
                },
            );
            self.0.emit(SessionEvent::ParticipantUpdated {
                id: self.0.local_id.clone(),
            });
            Ok(())
        }

        async fn set_local_video(&self, enabled: bool) -> Result<(), ClientError> {
            if !self.0.behavior.toggle_delay.is_zero() {
                tokio::time::sleep(self.0.behavior.toggle_delay).await;
            }
            self.0.video_set_calls.fetch_add(1, Ordering::SeqCst);
            self.0.set_local_track(
                TrackKind::Video,
                if enabled {
                    TrackState::Playable
                } else {
                    TrackState::Off
                },
            );
            self.0.emit(SessionEvent::ParticipantUpdated {
                id: self.0.local_id.clone(),
            });
            Ok(())
        }

        fn current_participants(&self) -> Vec<ProviderParticipant> {
            self.0.participants.lock().unwrap().clone()
        }

        fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.0.subscribers.lock().unwrap().push(tx);
            rx
        }

        fn session_state(&self) -> ProviderSessionState {
            *self.0.state.lock().unwrap()
        }

        fn local_video_track(&self) -> Option<TrackHandle> {
            self.0
                .participants
                .lock()
                .unwrap()
                .iter()
                .find(|p| p.local)
                .and_then(|p| p.video.track.clone())
        }
    }

    #[derive(Clone, Default)]
    struct FakeClient {
        behavior: Behavior,
        created: Arc<StdMutex<Vec<Arc<FakeSession>>>>,
    }

    impl FakeClient {
        fn session(&self, index: usize) -> Arc<FakeSession> {
            self.created.lock().unwrap()[index].clone()
        }

        fn session_count(&self) -> usize {
            self.created.lock().unwrap().len()
        }
    }

    impl MediaClient for FakeClient {
        type Handle = FakeHandle;

        fn create_session(&self) -> FakeHandle {
            let session = Arc::new(FakeSession::new(self.behavior.clone()));
            self.created.lock().unwrap().push(session.clone());
            FakeHandle(session)
        }
    }

    fn controller(behavior: Behavior, opts: SessionOptions) -> (SessionController<FakeClient>, FakeClient) {
        let client = FakeClient {
            behavior,
            created: Arc::default(),
        };
        (SessionController::new(client.clone(), opts), client)
    }

    async fn wait_snapshot<F>(rx: &mut watch::Receiver<RosterSnapshot>, mut pred: F) -> RosterSnapshot
    where
        F: FnMut(&RosterSnapshot) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let snapshot = rx.borrow_and_update().clone();
                if pred(&snapshot) {
                    return snapshot;
                }
                rx.changed().await.expect("snapshot channel closed");
            }
        })
        .await
        .expect("snapshot condition not reached")
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_join_single_flight() {
        let behavior = Behavior {
            join_delay: Duration::from_millis(30),
            ..Behavior::default()
        };
        let (ctrl, client) = controller(behavior, SessionOptions::default());

        let attempts: Vec<_> = (0..5).map(|_| ctrl.join("room-1", "Alice")).collect();
        let results = futures::future::join_all(attempts).await;
        assert!(results.iter().all(|r| r == &Ok(())));

        // Exactly one provider join across all callers.
        assert_eq!(client.session_count(), 1);
        assert_eq!(client.session(0).join_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctrl.phase().await, Phase::Active);
    }

    #[tokio::test]
    async fn test_concurrent_join_failure_shared_by_all_callers() {
        let behavior = Behavior {
            join_delay: Duration::from_millis(30),
            ..Behavior::default()
        };
        behavior.fail_next_join.store(true, Ordering::SeqCst);
        let (ctrl, client) = controller(behavior, SessionOptions::default());

        let (a, b) = tokio::join!(ctrl.join("room-1", "Alice"), ctrl.join("room-1", "Alice"));
        assert!(matches!(a, Err(JoinError::Rejected(_))));
        assert_eq!(a, b);
        assert_eq!(client.session(0).join_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctrl.phase().await, Phase::Idle);
    }

    #[tokio::test]
    async fn test_join_idempotent_while_active() {
        let (ctrl, client) = controller(Behavior::default(), SessionOptions::default());
        ctrl.join("room-1", "Alice").await.expect("first join");
        ctrl.join("room-1", "Alice").await.expect("second join");

        assert_eq!(client.session_count(), 1);
        assert_eq!(client.session(0).join_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_join_rejects_empty_target_before_provider_call() {
        let (ctrl, client) = controller(Behavior::default(), SessionOptions::default());
        assert_eq!(ctrl.join("  ", "Alice").await, Err(JoinError::InvalidTarget));
        assert_eq!(client.session_count(), 0);
        assert_eq!(ctrl.phase().await, Phase::Idle);
    }

    #[tokio::test]
    async fn test_join_defaults_audio_on_video_off() {
        let (ctrl, client) = controller(Behavior::default(), SessionOptions::default());
        ctrl.join("room-1", "").await.expect("join");

        let args = client.session(0).join_args.lock().unwrap().clone().expect("join args");
        // Empty display name falls back to the configured default.
        assert_eq!(args, ("room-1".to_string(), "User".to_string(), true, false));

        let snapshot = ctrl.snapshots().borrow().clone();
        assert!(snapshot.toggles.audio.desired);
        assert!(!snapshot.toggles.video.desired);
    }

    #[tokio::test]
    async fn test_no_leaked_handle_on_join_failure() {
        let behavior = Behavior::default();
        behavior.fail_next_join.store(true, Ordering::SeqCst);
        let (ctrl, client) = controller(behavior, SessionOptions::default());

        assert!(matches!(
            ctrl.join("room-1", "Alice").await,
            Err(JoinError::Rejected(_))
        ));
        // The partial handle was destroyed and the controller is Idle.
        assert_eq!(client.session(0).destroy_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctrl.phase().await, Phase::Idle);

        // A fresh attempt proceeds without stale-handle errors.
        ctrl.join("room-1", "Alice").await.expect("retry join");
        assert_eq!(ctrl.phase().await, Phase::Active);
        assert_eq!(client.session_count(), 2);
    }

    #[tokio::test]
    async fn test_leave_is_idempotent_with_no_provider_calls() {
        let (ctrl, client) = controller(Behavior::default(), SessionOptions::default());
        assert_eq!(ctrl.leave().await, Ok(()));
        assert_eq!(client.session_count(), 0);
    }

    #[tokio::test]
    async fn test_leave_destroys_handle_and_resets_state() {
        let (ctrl, client) = controller(Behavior::default(), SessionOptions::default());
        ctrl.join("room-1", "Alice").await.expect("join");
        ctrl.leave().await.expect("leave");

        let session = client.session(0);
        assert_eq!(session.leave_calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.destroy_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctrl.phase().await, Phase::Idle);

        let snapshot = ctrl.snapshots().borrow().clone();
        assert!(snapshot.participants.is_empty());
        assert_eq!(snapshot.toggles, Toggles::default());
    }

    #[tokio::test]
    async fn test_leave_failure_still_cleans_up() {
        let behavior = Behavior::default();
        behavior.fail_leave.store(true, Ordering::SeqCst);
        let (ctrl, client) = controller(behavior, SessionOptions::default());
        ctrl.join("room-1", "Alice").await.expect("join");

        assert!(matches!(ctrl.leave().await, Err(LeaveError::Provider(_))));
        // Cleanup proceeded regardless: handle destroyed, state reset.
        assert_eq!(client.session(0).destroy_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctrl.phase().await, Phase::Idle);
        assert!(ctrl.snapshots().borrow().participants.is_empty());

        // And the single-flight guard is clear for an immediate rejoin.
        ctrl.join("room-1", "Alice").await.expect("rejoin");
    }

    #[tokio::test]
    async fn test_retain_policy_reuses_handle_on_rejoin() {
        let opts = SessionOptions {
            leave_policy: LeavePolicy::RetainForRejoin,
            ..SessionOptions::default()
        };
        let (ctrl, client) = controller(Behavior::default(), opts);

        ctrl.join("room-1", "Alice").await.expect("join");
        ctrl.leave().await.expect("leave");
        assert_eq!(client.session(0).destroy_calls.load(Ordering::SeqCst), 0);

        ctrl.join("room-1", "Alice").await.expect("rejoin");
        // Same handle, no second session constructed.
        assert_eq!(client.session_count(), 1);
        assert_eq!(client.session(0).join_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_handle_leave_bounded_by_timeout() {
        let opts = SessionOptions {
            leave_policy: LeavePolicy::RetainForRejoin,
            stale_leave_timeout: Duration::from_millis(400),
            ..SessionOptions::default()
        };
        let behavior = Behavior::default();
        let (ctrl, client) = controller(behavior.clone(), opts);

        ctrl.join("room-1", "Alice").await.expect("join");
        // The provider rejects the leave, so the retained handle is stuck in
        // a non-terminal state.
        behavior.fail_leave.store(true, Ordering::SeqCst);
        let _ = ctrl.leave().await;
        assert_eq!(
            client.session(0).session_state_for_test(),
            ProviderSessionState::Joined
        );

        // Now the provider stops acknowledging entirely. The next join must
        // not hang: bounded wait, forced destroy, fresh handle.
        behavior.hang_leave.store(true, Ordering::SeqCst);
        ctrl.join("room-1", "Alice").await.expect("rejoin");
        assert_eq!(client.session(0).destroy_calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.session_count(), 2);
        assert_eq!(ctrl.phase().await, Phase::Active);
    }

    #[tokio::test]
    async fn test_teardown_never_fails_and_ends_idle() {
        let behavior = Behavior::default();
        behavior.fail_leave.store(true, Ordering::SeqCst);
        let (ctrl, client) = controller(behavior, SessionOptions::default());
        let mut notices = ctrl.take_notices().await.expect("notice stream");

        ctrl.join("room-1", "Alice").await.expect("join");
        ctrl.teardown().await;

        assert_eq!(ctrl.phase().await, Phase::Idle);
        assert_eq!(client.session(0).destroy_calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            notices.try_recv(),
            Ok(SessionNotice::LeaveFailed { .. })
        ));

        // Reachable from any state: tearing down again is harmless.
        ctrl.teardown().await;
    }

    // ------------------------------------------------------------------
    // Toggles
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_toggle_rejected_without_session() {
        let (ctrl, _client) = controller(Behavior::default(), SessionOptions::default());
        assert_eq!(ctrl.toggle_audio().await, Err(ToggleError::NoSession));
        assert_eq!(ctrl.toggle_video().await, Err(ToggleError::NoSession));
    }

    #[tokio::test]
    async fn test_toggle_rejected_while_join_pending() {
        let behavior = Behavior {
            join_delay: Duration::from_millis(30),
            ..Behavior::default()
        };
        let (ctrl, _client) = controller(behavior, SessionOptions::default());

        let (join, toggle) = tokio::join!(ctrl.join("room-1", "Alice"), async {
            // Fire while the join is suspended on the provider.
            tokio::time::sleep(Duration::from_millis(5)).await;
            ctrl.toggle_video().await
        });
        join.expect("join");
        assert_eq!(toggle, Err(ToggleError::NoSession));
    }

    #[tokio::test]
    async fn test_toggle_audio_rollback_on_failure() {
        let behavior = Behavior::default();
        behavior.fail_audio_toggle.store(true, Ordering::SeqCst);
        let (ctrl, _client) = controller(behavior, SessionOptions::default());
        ctrl.join("room-1", "Alice").await.expect("join");

        // Audio is on after join; the failed mute must roll desired back.
        let before = ctrl.snapshots().borrow().toggles.audio;
        assert!(before.desired);

        assert!(matches!(
            ctrl.toggle_audio().await,
            Err(ToggleError::Rejected(_))
        ));
        let after = ctrl.snapshots().borrow().toggles.audio;
        assert_eq!(after.desired, before.desired);
        assert!(!after.applying);
    }

    #[tokio::test]
    async fn test_rapid_double_toggle_second_rejected() {
        let behavior = Behavior {
            toggle_delay: Duration::from_millis(30),
            ..Behavior::default()
        };
        let (ctrl, client) = controller(behavior, SessionOptions::default());
        ctrl.join("room-1", "Alice").await.expect("join");

        let (first, second) = tokio::join!(ctrl.toggle_video(), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            ctrl.toggle_video().await
        });
        assert_eq!(first, Ok(true));
        assert_eq!(second, Err(ToggleError::InFlight));

        // Final state reflects only the first call's outcome.
        assert_eq!(client.session(0).video_set_calls.load(Ordering::SeqCst), 1);
        assert!(ctrl.snapshots().borrow().toggles.video.desired);
    }

    // ------------------------------------------------------------------
    // Reconciliation through the pump
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_track_started_reconciles_from_live_state() {
        let (ctrl, client) = controller(Behavior::default(), SessionOptions::default());
        let mut snapshots = ctrl.snapshots();
        ctrl.join("room-1", "Alice").await.expect("join");

        // Local video goes live on the provider side; the event alone does
        // not flip anything; reconciliation re-reads the listing.
        let session = client.session(0);
        session.set_local_track(TrackKind::Video, TrackState::Playable);
        session.emit(SessionEvent::TrackStarted {
            participant: "local-1".to_string(),
            local: true,
            track: TrackHandle {
                id: "local-1-video".to_string(),
                kind: TrackKind::Video,
            },
        });

        let snapshot = wait_snapshot(&mut snapshots, |s| {
            s.participants.first().is_some_and(|p| p.video_enabled)
        })
        .await;
        assert!(snapshot.toggles.video.desired);
        assert_eq!(snapshot.participants[0].display_name, "Alice");
    }

    #[tokio::test]
    async fn test_remote_participant_join_and_leave() {
        let (ctrl, client) = controller(Behavior::default(), SessionOptions::default());
        let mut snapshots = ctrl.snapshots();
        ctrl.join("room-1", "Alice").await.expect("join");

        let session = client.session(0);
        let remote = ProviderParticipant {
            session_id: "remote-9".to_string(),
            user_name: Some("Bob".to_string()),
            local: false,
            owner: true,
            audio: TrackInfo {
                state: TrackState::Playable,
                track: None,
            },
            video: TrackInfo::default(),
        };
        {
            let mut listing = session.participants.lock().unwrap();
            listing.push(remote);
        }
        // Replaying the trigger event any number of times converges to the
        // same set as a single recomputation.
        session.emit(SessionEvent::ParticipantJoined {
            id: "remote-9".to_string(),
        });
        session.emit(SessionEvent::ParticipantJoined {
            id: "remote-9".to_string(),
        });

        let snapshot = wait_snapshot(&mut snapshots, |s| s.participants.len() == 2).await;
        assert!(snapshot.participants[0].is_local);
        assert_eq!(snapshot.participants[1].display_name, "Bob");
        assert!(snapshot.participants[1].is_owner);

        {
            let mut listing = session.participants.lock().unwrap();
            listing.retain(|p| p.local);
        }
        session.emit(SessionEvent::ParticipantLeft {
            id: "remote-9".to_string(),
        });
        wait_snapshot(&mut snapshots, |s| s.participants.len() == 1).await;
    }

    #[tokio::test]
    async fn test_session_error_is_reported_not_escalated() {
        let (ctrl, client) = controller(Behavior::default(), SessionOptions::default());
        let mut notices = ctrl.take_notices().await.expect("notice stream");
        ctrl.join("room-1", "Alice").await.expect("join");

        client.session(0).emit(SessionEvent::SessionError {
            message: "ice restart failed".to_string(),
        });

        let notice = tokio::time::timeout(Duration::from_secs(2), notices.recv())
            .await
            .expect("notice in time")
            .expect("notice");
        assert!(matches!(notice, SessionNotice::SessionError { message } if message.contains("ice")));
        // The call remains nominally active.
        assert_eq!(ctrl.phase().await, Phase::Active);
    }

    impl FakeSession {
        fn session_state_for_test(&self) -> ProviderSessionState {
            *self.state.lock().unwrap()
        }
    }
}
