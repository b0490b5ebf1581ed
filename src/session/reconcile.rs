//! Event reconciliation: provider events to participant-set updates.
//!
//! The participant set is always recomputed in full from the provider's live
//! listing, never incrementally patched from event payloads. Payloads are
//! provider-specific and can race or arrive out of order; re-reading the
//! authoritative listing after each event makes reconciliation idempotent and
//! order-insensitive.

use super::client::{ProviderParticipant, SessionEvent, TrackKind};
use super::{Participant, Toggles};

/// Recompute the full participant set from the authoritative listing.
///
/// The local participant's display name comes from the authenticated user
/// profile, not the media client. Audio/video enabled flags derive from live
/// track state (`playable`), not from permission booleans. Output ordering is
/// stable: local participant first, then by session id.
pub fn recompute_participants(
    listing: &[ProviderParticipant],
    local_display_name: &str,
) -> Vec<Participant> {
    let mut participants: Vec<Participant> = listing
        .iter()
        .map(|p| Participant {
            id: p.session_id.clone(),
            display_name: if p.local {
                local_display_name.to_string()
            } else {
                p.user_name
                    .clone()
                    .unwrap_or_else(|| "Unknown User".to_string())
            },
            is_local: p.local,
            audio_enabled: p.track(TrackKind::Audio).state.is_live(),
            video_enabled: p.track(TrackKind::Video).state.is_live(),
            is_owner: p.owner,
        })
        .collect();

    participants.sort_by(|a, b| {
        b.is_local
            .cmp(&a.is_local)
            .then_with(|| a.id.cmp(&b.id))
    });
    participants
}

/// Resynchronize local toggle desired-state from the provider's live track
/// state. A control that is mid-toggle keeps its in-flight value until the
/// operation settles (success confirms it, failure rolls it back).
pub fn resync_local_toggles(toggles: &mut Toggles, listing: &[ProviderParticipant]) {
    let Some(local) = listing.iter().find(|p| p.local) else {
        return;
    };
    if !toggles.audio.applying {
        toggles.audio.desired = local.audio.state.is_live();
    }
    if !toggles.video.applying {
        toggles.video.desired = local.video.state.is_live();
    }
}

/// Whether an event invalidates the participant set and requires a
/// recomputation from the live listing.
pub fn touches_roster(event: &SessionEvent) -> bool {
    matches!(
        event,
        SessionEvent::ParticipantJoined { .. }
            | SessionEvent::ParticipantLeft { .. }
            | SessionEvent::ParticipantUpdated { .. }
            | SessionEvent::TrackStarted { .. }
            | SessionEvent::TrackStopped { .. }
            | SessionEvent::SessionJoined
    )
}
