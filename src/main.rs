use std::{sync::Arc, time::Duration};

use anyhow::Context;
use colored::Colorize;
use jam_collab::{Jam, SessionController};
use jam_core::{AudioTransport, Introspect, LocalPlayer, MemoryStore, SyncConfig, Track};
use log::{error, info};
use url::Url;

mod logging;

const DRIFT_THRESHOLD_VAR: &str = "JAM_DRIFT_THRESHOLD";
const INVITE_BASE_URL: &str = "https://jam.localhost/listen";

type Client = Jam<MemoryStore, LocalPlayer>;

fn config_from_env() -> anyhow::Result<SyncConfig> {
    let mut config = SyncConfig::default();

    if let Ok(value) = std::env::var(DRIFT_THRESHOLD_VAR) {
        config.drift_threshold_in_seconds = value
            .parse()
            .with_context(|| format!("{} must be a number of seconds", DRIFT_THRESHOLD_VAR))?;
    }

    Ok(config)
}

fn demo_queue() -> Vec<Track> {
    vec![
        Track::new("t1", "Windowlicker")
            .with_artist("Aphex Twin")
            .with_duration(367.),
        Track::new("t2", "Roygbiv")
            .with_artist("Boards of Canada")
            .with_duration(151.),
        Track::new("t3", "Avril 14th")
            .with_artist("Aphex Twin")
            .with_duration(125.),
    ]
}

/// Gives the spawned engines time to deliver what was just changed
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn log_player(name: &str, client: &Client) {
    let player = client.transport().introspect();

    info!(
        "{}: {} at {:.1}s, {}, queue {:?}",
        name.bold(),
        player.current_track.as_deref().unwrap_or("nothing"),
        player.position,
        if player.paused { "paused" } else { "playing" },
        player.queue
    );
}

async fn run() -> anyhow::Result<()> {
    let config = config_from_env()?;
    let base_url = Url::parse(INVITE_BASE_URL)?;

    let store = Arc::new(MemoryStore::with_id_length(
        "jam_sessions",
        config.record_id_length,
    ));

    let host = Arc::new(Jam::new(
        store.clone(),
        Arc::new(LocalPlayer::new()),
        config.clone(),
    ));
    host.auth.login("alice");
    host.transport().load_queue(demo_queue(), 0)?;

    let guest = Arc::new(Jam::new(
        store.clone(),
        Arc::new(LocalPlayer::new()),
        config,
    ));
    guest.auth.login("bob");

    let host_ui = SessionController::new(&host, base_url.clone());
    let guest_ui = SessionController::new(&guest, base_url);

    host_ui.start().await?;
    let link = host_ui
        .state()
        .invite_link
        .context("Started a session without an invite link")?;

    info!("Invite link: {}", link);

    guest_ui.join_from_link(link.as_str()).await?;
    log_player("bob", &guest);

    host.transport().set_current_time(42.);
    host.transport().play_track_from_queue(1, 0.)?;
    host.transport().set_current_time(30.);
    host.transport().pause();
    settle().await;
    log_player("alice", &host);
    log_player("bob", &guest);

    // Queue edits are rejected while the host doesn't allow them
    host_ui.toggle_participant_queueing().await;
    settle().await;
    guest_ui.process_events();

    let mut edited = guest.transport().queue();
    edited.push(Track::new("t4", "Xtal").with_artist("Aphex Twin"));
    guest.transport().set_queue(edited.clone(), 1);
    settle().await;
    log_player("alice", &host);

    host_ui.toggle_participant_queueing().await;
    settle().await;
    guest_ui.process_events();

    guest.transport().set_queue(edited, 1);
    settle().await;
    log_player("alice", &host);

    guest_ui.leave().await;
    host_ui.leave().await;
    settle().await;

    let stats = store.introspect();
    info!(
        "Done: {} sessions left, {} created, {} updates, {} deleted",
        stats.records, stats.creates, stats.updates, stats.deletes
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = logging::init_logger() {
        eprintln!("Could not initialize logging: {}", e);
    }

    if let Err(e) = run().await {
        error!("{} {:#}", "The jam demo failed:".bold().red(), e);
    }
}
