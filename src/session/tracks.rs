//! Media track binding: attach/detach tracks to render targets.
//!
//! Bindings are keyed by (participant id, track kind), at most one per key.
//! A render target may be registered before its track exists (target-first)
//! or a track may arrive before its target is mounted (track-first); both
//! orderings converge to the same bound state. The track-first path schedules
//! exactly one deferred retry instead of polling; if the target still has not
//! mounted by then the track is dropped silently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::client::{ParticipantId, RenderTarget, TrackHandle, TrackKind};

type BindKey = (ParticipantId, TrackKind);

#[derive(Default)]
struct Slot {
    target: Option<Arc<dyn RenderTarget>>,
    /// Track that arrived before any target was registered.
    pending: Option<TrackHandle>,
    attached: Option<TrackHandle>,
}

/// Registry of render targets and their attached tracks.
#[derive(Clone)]
pub struct TrackRegistry {
    slots: Arc<Mutex<HashMap<BindKey, Slot>>>,
    retry_delay: Duration,
}

impl TrackRegistry {
    pub fn new(retry_delay: Duration) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            retry_delay,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<BindKey, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a render target for a key. Idempotent; last registration
    /// wins. A track that arrived first (or was attached to the previous
    /// target) is bound to the new target immediately.
    pub fn register_target(
        &self,
        participant: &ParticipantId,
        kind: TrackKind,
        target: Arc<dyn RenderTarget>,
    ) {
        let rebind = {
            let mut slots = self.lock();
            let slot = slots.entry((participant.clone(), kind)).or_default();
            slot.target = Some(target.clone());
            if let Some(track) = slot.pending.take().or_else(|| slot.attached.clone()) {
                slot.attached = Some(track.clone());
                Some(track)
            } else {
                None
            }
        };
        // Attach outside the lock: targets are caller-owned code.
        if let Some(track) = rebind {
            target.attach(&track);
        }
    }

    /// Attach a track to the registered target for its key. With no target
    /// registered yet, park the track and schedule one bounded retry.
    pub fn bind_track(&self, participant: &ParticipantId, kind: TrackKind, track: TrackHandle) {
        let attach_to = {
            let mut slots = self.lock();
            let slot = slots.entry((participant.clone(), kind)).or_default();
            match slot.target.clone() {
                Some(target) => {
                    slot.pending = None;
                    slot.attached = Some(track.clone());
                    Some(target)
                }
                None => {
                    slot.pending = Some(track.clone());
                    None
                }
            }
        };

        match attach_to {
            Some(target) => target.attach(&track),
            None => {
                tracing::debug!(
                    "no render target for {} {} yet, retrying once in {:?}",
                    participant,
                    kind,
                    self.retry_delay
                );
                let registry = self.clone();
                let participant = participant.clone();
                let delay = self.retry_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    registry.retry_bind(&participant, kind, track);
                });
            }
        }
    }

    fn retry_bind(&self, participant: &ParticipantId, kind: TrackKind, track: TrackHandle) {
        let attach_to = {
            let mut slots = self.lock();
            let Some(slot) = slots.get_mut(&(participant.clone(), kind)) else {
                return;
            };
            // A newer track or a register_target call may have settled the
            // slot in the meantime; this retry then becomes a no-op.
            if slot.pending.as_ref() != Some(&track) {
                return;
            }
            slot.pending = None;
            match slot.target.clone() {
                Some(target) => {
                    slot.attached = Some(track.clone());
                    Some(target)
                }
                None => None,
            }
        };
        match attach_to {
            Some(target) => target.attach(&track),
            None => {
                // Transient UI timing, not a user-facing failure.
                tracing::debug!("render target for {} {} never mounted, dropping track", participant, kind);
            }
        }
    }

    /// Detach the attached track for a key. The render target itself stays
    /// registered and may be rebound later.
    pub fn unbind_track(&self, participant: &ParticipantId, kind: TrackKind) {
        let detach = {
            let mut slots = self.lock();
            match slots.get_mut(&(participant.clone(), kind)) {
                Some(slot) => {
                    slot.pending = None;
                    if slot.attached.take().is_some() {
                        slot.target.clone()
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        if let Some(target) = detach {
            target.detach();
        }
    }

    /// Detach everything and drop all registrations. After this no track is
    /// referenced by any render target.
    pub fn clear(&self) {
        let targets: Vec<Arc<dyn RenderTarget>> = {
            let mut slots = self.lock();
            slots
                .drain()
                .filter_map(|(_, slot)| {
                    if slot.attached.is_some() {
                        slot.target
                    } else {
                        None
                    }
                })
                .collect()
        };
        for target in targets {
            target.detach();
        }
    }

    #[cfg(test)]
    pub(crate) fn attached(&self, participant: &ParticipantId, kind: TrackKind) -> Option<TrackHandle> {
        self.lock()
            .get(&(participant.clone(), kind))
            .and_then(|s| s.attached.clone())
    }
}
