//! Interactive `join` command driver.
//!
//! Resolves the room through the directory service, drives a
//! `SessionController` over the loopback media client, renders roster
//! snapshots to the terminal, and maps key commands to controller operations.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncBufReadExt;

use crate::api::{self, DirectoryClient};
use crate::config::Config;
use crate::media::LoopbackClient;
use crate::session::client::{RenderTarget, TrackHandle, TrackKind};
use crate::session::{LeavePolicy, RosterSnapshot, SessionController, SessionOptions};

/// Terminal stand-in for a video surface / audio sink.
struct ConsoleTile {
    participant: String,
    kind: TrackKind,
}

impl RenderTarget for ConsoleTile {
    fn attach(&self, track: &TrackHandle) {
        println!("  >> {} track '{}' attached for {}", self.kind, track.id, self.participant);
    }

    fn detach(&self) {
        println!("  >> {} track detached for {}", self.kind, self.participant);
    }
}

/// Join a room and stay in the session until the duration elapses or the
/// user quits. `m`/`v` toggle mic/camera, `q` leaves.
pub async fn run_join(room: &str, duration: u64, echo: bool, retain: bool) -> Result<()> {
    let config = Config::load()?;
    let user = config
        .get_user()
        .context("Not logged in. Run 'rooms-cli login' first.")?;

    // Direct URLs bypass the directory lookup.
    let target = if room.starts_with("http://") || room.starts_with("https://") {
        room.to_string()
    } else {
        let client = DirectoryClient::new()?;
        let resolved = api::fetch_join_target(&client, room).await?;
        tracing::info!("Resolved room '{}' -> {}", resolved.name, resolved.url);
        resolved.url
    };

    let opts = SessionOptions {
        leave_policy: if retain || config.retain_session_on_leave {
            LeavePolicy::RetainForRejoin
        } else {
            LeavePolicy::DestroyOnLeave
        },
        ..SessionOptions::default()
    };
    let peer = echo.then(|| "Echo".to_string());
    let controller = SessionController::new(LoopbackClient::new(peer), opts);

    let mut snapshots = controller.snapshots();
    let mut notices = controller
        .take_notices()
        .await
        .context("notice stream already taken")?;

    controller
        .join(&target, &user.name)
        .await
        .with_context(|| format!("Failed to join {}", room))?;
    println!("Joined room: {}", room);
    println!("controls: m = toggle mic, v = toggle camera, q = leave\n");

    let mut registered: HashSet<(String, TrackKind)> = HashSet::new();
    register_tiles(&controller, &snapshots.borrow(), &mut registered);
    render_roster(room, &snapshots.borrow());

    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let deadline = tokio::time::sleep(if duration == 0 {
        // Effectively unbounded; q or Ctrl-C ends the session.
        Duration::from_secs(30 * 24 * 60 * 60)
    } else {
        Duration::from_secs(duration)
    });
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                println!("Session time limit reached.");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted.");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                register_tiles(&controller, &snapshot, &mut registered);
                render_roster(room, &snapshot);
            }
            notice = notices.recv() => {
                if let Some(notice) = notice {
                    println!("  !! {:?}", notice);
                }
            }
            line = stdin.next_line() => {
                let Ok(Some(line)) = line else { break };
                match line.trim() {
                    "m" => {
                        if let Err(e) = controller.toggle_audio().await {
                            println!("  !! toggle mic failed: {e}");
                        }
                    }
                    "v" => {
                        if let Err(e) = controller.toggle_video().await {
                            println!("  !! toggle camera failed: {e}");
                        }
                    }
                    "q" => break,
                    "" => {}
                    other => println!("  ?? unknown command '{other}' (m/v/q)"),
                }
            }
        }
    }

    if let Err(e) = controller.leave().await {
        tracing::warn!("Leave reported an error: {e}");
    }
    controller.teardown().await;
    println!("Left room: {}", room);
    Ok(())
}

/// The presentation layer registers render targets for every participant it
/// learns about; tracks that arrived first are bound immediately.
fn register_tiles(
    controller: &SessionController<LoopbackClient>,
    snapshot: &RosterSnapshot,
    registered: &mut HashSet<(String, TrackKind)>,
) {
    for participant in &snapshot.participants {
        let mut kinds = vec![TrackKind::Video];
        if !participant.is_local {
            // Remote audio gets a sink; local audio is the microphone.
            kinds.push(TrackKind::Audio);
        }
        for kind in kinds {
            if registered.insert((participant.id.clone(), kind)) {
                controller.register_target(
                    &participant.id,
                    kind,
                    Arc::new(ConsoleTile {
                        participant: participant.display_name.clone(),
                        kind,
                    }),
                );
            }
        }
    }
}

fn render_roster(room: &str, snapshot: &RosterSnapshot) {
    println!(
        "--- {} ({} participant{}) ---",
        room,
        snapshot.participants.len(),
        if snapshot.participants.len() == 1 { "" } else { "s" }
    );
    for p in &snapshot.participants {
        println!(
            "  {} {:<20} [mic {}] [cam {}]{}",
            if p.is_local { "*" } else { " " },
            p.display_name,
            if p.audio_enabled { "on " } else { "off" },
            if p.video_enabled { "on " } else { "off" },
            if p.is_owner { "  (owner)" } else { "" },
        );
    }
}
