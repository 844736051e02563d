use std::{sync::Arc, time::Duration};

use chrono::Utc;
use jam_core::{
    AudioTransport, Introspect, LocalEvent, LocalPlayer, MemoryStore, Record, RecordAction,
    RecordEvent, RecordStore, SyncConfig, Track,
};
use serde_json::Map;

use super::*;
use crate::{Jam, JamEvent, LeaveReason, PlaybackState, SessionPatch};

struct Client {
    jam: Jam<MemoryStore, LocalPlayer>,
}

impl Client {
    fn new(store: &Arc<MemoryStore>, name: &str) -> Self {
        let jam = Jam::new(
            store.clone(),
            Arc::new(LocalPlayer::new()),
            SyncConfig::default(),
        );
        jam.auth.login(name);

        Self { jam }
    }

    fn engine(&self) -> &Arc<SyncEngine<MemoryStore, LocalPlayer>> {
        &self.jam.engine
    }

    fn player(&self) -> &Arc<LocalPlayer> {
        self.jam.transport()
    }

    fn events(&self) -> Vec<JamEvent> {
        self.jam.events().try_iter().collect()
    }

    async fn session(&self, session_id: &str) -> SessionRecord {
        self.jam.repository.session(session_id).await.unwrap()
    }
}

fn tracks(ids: &[&str]) -> Vec<Track> {
    ids.iter().map(|id| Track::mock(id)).collect()
}

fn ids(tracks: &[Track]) -> Vec<String> {
    tracks.iter().map(|t| t.id.clone()).collect()
}

fn current_track(client: &Client) -> Option<String> {
    client.player().current_track().map(|t| t.id)
}

/// A host playing the first of `queue`, and a participant that joined it
async fn hosted_session(queue: &[&str]) -> (Arc<MemoryStore>, Client, Client, SessionId) {
    let store = Arc::new(MemoryStore::new("jam_sessions"));

    let host = Client::new(&store, "H");
    host.player().load_queue(tracks(queue), 0).unwrap();
    let session_id = host.engine().start_session().await.unwrap();

    let participant = Client::new(&store, "P");
    participant.engine().join_session(&session_id).await.unwrap();

    host.engine().pump().await;
    host.events();
    participant.events();

    (store, host, participant, session_id)
}

#[tokio::test]
async fn full_session_lifecycle() {
    let store = Arc::new(MemoryStore::new("jam_sessions"));

    let host = Client::new(&store, "H");
    host.player().load_queue(tracks(&["t1"]), 0).unwrap();

    let session_id = host.engine().start_session().await.unwrap();
    let token = match host.events().as_slice() {
        [JamEvent::SessionStarted { session_id: id, token }] if *id == session_id => token.clone(),
        events => panic!("Unexpected events {:?}", events),
    };

    let session = host.session(&session_id).await;
    assert_eq!(session.host, "H");
    assert_eq!(session.participants, vec!["H".to_string()]);
    assert_eq!(session.current_track.map(|t| t.id).as_deref(), Some("t1"));
    assert_eq!(session.playback_state, PlaybackState::Playing);
    assert!(session.allow_participant_queueing);

    // A participant joins through the invite token
    let participant = Client::new(&store, "P");
    let resolved = participant
        .jam
        .repository
        .resolve_invite_token(&token)
        .await
        .unwrap();
    assert_eq!(resolved, session_id);

    participant.engine().join_session(&resolved).await.unwrap();

    assert_eq!(current_track(&participant).as_deref(), Some("t1"));
    assert!(!participant.player().is_paused());
    assert_eq!(participant.engine().pending(), 0);
    assert_eq!(
        participant.events(),
        vec![JamEvent::SessionJoined {
            session_id: session_id.clone()
        }]
    );

    // The host moves on and pauses
    host.engine().pump().await;
    host.player().advance(5.);
    host.player().pause();
    assert_eq!(host.engine().flush().await, 1);

    let session = host.session(&session_id).await;
    assert_eq!(session.playback_state, PlaybackState::Paused);
    assert_eq!(session.position, Some(5.));

    let updates = store.introspect().updates;

    assert_eq!(participant.engine().pump().await, 1);
    assert!(participant.player().is_paused());
    assert_eq!(participant.player().current_time(), 5.);

    // Applying the host's state must not be broadcast back
    assert_eq!(participant.engine().flush().await, 0);
    assert_eq!(store.introspect().updates, updates);

    // The participant leaves, the session goes on
    participant.engine().leave_session().await;
    assert_eq!(participant.engine().phase(), Phase::Idle);
    assert_eq!(
        host.session(&session_id).await.participants,
        vec!["H".to_string()]
    );

    let late = Client::new(&store, "Q");
    late.engine().join_session(&session_id).await.unwrap();
    late.events();

    // The host leaving ends it for everyone
    host.engine().leave_session().await;
    assert!(store.get(&session_id).await.is_err());

    late.engine().pump().await;
    assert_eq!(late.engine().phase(), Phase::Idle);
    assert_eq!(
        late.events(),
        vec![JamEvent::SessionLeft {
            session_id,
            reason: LeaveReason::Ended
        }]
    );
}

#[tokio::test]
async fn small_drift_is_tolerated() {
    let (_, host, participant, _) = hosted_session(&["t1"]).await;
    let seeks = participant.player().introspect().seeks;

    host.player().set_current_time(1.);
    host.engine().flush().await;
    participant.engine().pump().await;

    assert_eq!(participant.player().introspect().seeks, seeks);
    assert_eq!(participant.player().current_time(), 0.);

    host.player().set_current_time(3.5);
    host.engine().flush().await;
    participant.engine().pump().await;

    assert_eq!(participant.player().introspect().seeks, seeks + 1);
    assert_eq!(participant.player().current_time(), 3.5);
}

#[tokio::test]
async fn track_changes_follow_the_queue() {
    let (_, host, participant, _) = hosted_session(&["a", "t", "b"]).await;

    host.player().play_track_from_queue(1, 0.).unwrap();
    host.engine().flush().await;
    participant.engine().pump().await;

    assert_eq!(current_track(&participant).as_deref(), Some("t"));
    assert_eq!(participant.player().current_queue_index(), Some(1));
    assert_eq!(ids(&participant.player().queue()), vec!["a", "t", "b"]);
}

#[tokio::test]
async fn unknown_tracks_play_alone() {
    let (_, host, participant, session_id) = hosted_session(&["a", "t", "b"]).await;

    host.jam
        .repository
        .update_state(
            &session_id,
            SessionPatch::default().current_track(Track::mock("x")),
        )
        .await
        .unwrap();
    participant.engine().pump().await;

    assert_eq!(current_track(&participant).as_deref(), Some("x"));
    assert_eq!(ids(&participant.player().queue()), vec!["x"]);
    assert_eq!(participant.player().current_queue_index(), Some(0));
}

#[tokio::test]
async fn tracks_from_the_previous_queue_restore_it() {
    let (_, host, participant, session_id) = hosted_session(&["a", "t", "b"]).await;

    host.jam
        .repository
        .update_state(
            &session_id,
            SessionPatch::default()
                .queue(tracks(&["c"]))
                .current_track(Track::mock("b")),
        )
        .await
        .unwrap();
    participant.engine().pump().await;

    assert_eq!(current_track(&participant).as_deref(), Some("b"));
    assert_eq!(ids(&participant.player().queue()), vec!["a", "t", "b"]);
    assert_eq!(participant.player().current_queue_index(), Some(2));
}

#[tokio::test]
async fn host_restores_queue_when_participants_may_not_edit_it() {
    let (store, host, participant, session_id) = hosted_session(&["a", "t", "b"]).await;

    host.engine().toggle_participant_queueing(false).await;
    participant.engine().pump().await;

    assert_eq!(
        participant.events(),
        vec![JamEvent::PermissionsChanged {
            allow_participant_queueing: false
        }]
    );

    // The engine keeps local edits to itself
    participant.player().set_queue(tracks(&["x"]), 0);
    assert_eq!(participant.engine().pending(), 0);

    // Someone writes anyway
    participant
        .jam
        .repository
        .update_state(&session_id, SessionPatch::default().queue(tracks(&["x"])))
        .await
        .unwrap();
    let updates = store.introspect().updates;

    host.engine().pump().await;

    assert_eq!(store.introspect().updates, updates + 1);
    assert_eq!(
        ids(&host.session(&session_id).await.queue),
        vec!["a", "t", "b"]
    );
    assert_eq!(ids(&host.player().queue()), vec!["a", "t", "b"]);

    // The participant briefly sees the rejected queue, then the restored one
    participant.engine().pump().await;
    assert_eq!(ids(&participant.player().queue()), vec!["a", "t", "b"]);
}

#[tokio::test]
async fn host_adopts_queue_edits_when_allowed() {
    let (store, host, participant, session_id) = hosted_session(&["a", "t", "b"]).await;

    participant
        .player()
        .set_queue(tracks(&["a", "t", "b", "c"]), 0);
    assert_eq!(participant.engine().flush().await, 1);

    let updates = store.introspect().updates;
    host.engine().pump().await;

    assert_eq!(ids(&host.player().queue()), vec!["a", "t", "b", "c"]);
    assert_eq!(current_track(&host).as_deref(), Some("a"));
    assert_eq!(host.player().current_queue_index(), Some(0));

    // Adopting is not broadcast again
    assert_eq!(host.engine().pending(), 0);
    assert_eq!(store.introspect().updates, updates);
    assert_eq!(
        ids(&host.session(&session_id).await.queue),
        vec!["a", "t", "b", "c"]
    );
}

#[tokio::test]
async fn host_ignores_its_own_echoes() {
    let (store, host, _, session_id) = hosted_session(&["a", "t", "b"]).await;

    host.player().set_queue(tracks(&["a", "b"]), 0);
    host.player().set_queue(tracks(&["a", "b", "c"]), 0);
    assert_eq!(host.engine().flush().await, 2);

    let updates = store.introspect().updates;

    // The first echo carries a queue that is outdated locally
    assert_eq!(host.engine().pump().await, 2);

    assert_eq!(ids(&host.player().queue()), vec!["a", "b", "c"]);
    assert_eq!(store.introspect().updates, updates);
    assert_eq!(
        ids(&host.session(&session_id).await.queue),
        vec!["a", "b", "c"]
    );
}

#[tokio::test]
async fn host_drops_its_unsent_queue_after_adopting_one() {
    let (store, host, participant, session_id) = hosted_session(&["a", "t", "b"]).await;

    host.player().set_queue(tracks(&["a", "b"]), 0);
    assert_eq!(host.engine().pending(), 1);

    participant.player().set_queue(tracks(&["x"]), 0);
    assert_eq!(participant.engine().flush().await, 1);

    host.engine().pump().await;
    assert_eq!(host.engine().pending(), 0);
    assert_eq!(host.engine().flush().await, 0);

    host.engine().pump().await;
    participant.engine().pump().await;

    assert_eq!(ids(&host.player().queue()), vec!["x"]);
    assert_eq!(ids(&participant.player().queue()), vec!["x"]);
    assert_eq!(ids(&host.session(&session_id).await.queue), vec!["x"]);
    assert_eq!(store.introspect().records, 1);
}

#[tokio::test]
async fn participant_drops_its_unsent_queue_after_a_remote_one() {
    let (_, host, participant, session_id) = hosted_session(&["a", "t", "b"]).await;

    participant
        .player()
        .set_queue(tracks(&["a", "t", "b", "c"]), 0);
    assert_eq!(participant.engine().pending(), 1);

    host.player().set_queue(tracks(&["a", "t"]), 0);
    assert_eq!(host.engine().flush().await, 1);

    participant.engine().pump().await;
    assert_eq!(participant.engine().pending(), 0);
    assert_eq!(participant.engine().flush().await, 0);

    host.engine().pump().await;

    assert_eq!(ids(&host.player().queue()), vec!["a", "t"]);
    assert_eq!(ids(&participant.player().queue()), vec!["a", "t"]);
    assert_eq!(ids(&host.session(&session_id).await.queue), vec!["a", "t"]);
}

#[tokio::test]
async fn host_keeps_unsent_playback_changes_after_adopting_a_queue() {
    let (_, host, participant, session_id) = hosted_session(&["a", "t", "b"]).await;

    host.player().set_queue(tracks(&["a", "b"]), 0);
    host.player().pause();
    assert_eq!(host.engine().pending(), 2);

    participant.player().set_queue(tracks(&["a", "x"]), 0);
    participant.engine().flush().await;

    host.engine().pump().await;
    assert_eq!(host.engine().pending(), 1);
    assert_eq!(host.engine().flush().await, 1);

    let session = host.session(&session_id).await;
    assert_eq!(ids(&session.queue), vec!["a", "x"]);
    assert_eq!(session.playback_state, PlaybackState::Paused);
}

#[tokio::test]
async fn participants_only_broadcast_queue_changes() {
    let (_, _, participant, _) = hosted_session(&["a", "t"]).await;

    assert!(!participant.engine().notify_local(LocalEvent::Pause));
    assert!(!participant.engine().notify_local(LocalEvent::Seek(12.)));
    assert!(!participant.engine().notify_local(LocalEvent::TrackChanged));
    assert!(participant.engine().notify_local(LocalEvent::QueueChanged));

    assert_eq!(participant.engine().pending(), 1);
}

#[tokio::test]
async fn local_events_are_ignored_outside_of_sessions() {
    let store = Arc::new(MemoryStore::new("jam_sessions"));
    let client = Client::new(&store, "H");

    client.player().load_queue(tracks(&["a"]), 0).unwrap();
    client.player().pause();

    assert_eq!(client.engine().pending(), 0);
    assert!(!client.engine().is_applying_remote_update());
}

#[tokio::test]
async fn failed_broadcasts_are_dropped() {
    let (store, host, _, session_id) = hosted_session(&["a"]).await;

    store.set_available(false);
    host.player().pause();

    assert_eq!(host.engine().flush().await, 0);
    assert_eq!(host.engine().pending(), 0);
    assert_eq!(host.engine().phase(), Phase::Active);

    store.set_available(true);
    host.player().set_current_time(30.);

    assert_eq!(host.engine().flush().await, 1);

    let session = host.session(&session_id).await;
    assert_eq!(session.position, Some(30.));
    // The pause was lost with the outage
    assert_eq!(session.playback_state, PlaybackState::Playing);
}

#[tokio::test]
async fn blocked_autoplay_does_not_fail_joining() {
    let store = Arc::new(MemoryStore::new("jam_sessions"));

    let host = Client::new(&store, "H");
    host.player().load_queue(tracks(&["t1"]), 0).unwrap();
    let session_id = host.engine().start_session().await.unwrap();

    let participant = Client::new(&store, "P");
    participant.player().set_autoplay_blocked(true);

    participant.engine().join_session(&session_id).await.unwrap();

    assert_eq!(current_track(&participant).as_deref(), Some("t1"));
    assert!(participant.player().is_paused());
    assert_eq!(participant.engine().phase(), Phase::Active);
}

#[tokio::test]
async fn deletions_of_other_sessions_are_ignored() {
    let (_, host, _, session_id) = hosted_session(&["a"]).await;

    let now = Utc::now();
    let event = RecordEvent {
        action: RecordAction::Deleted,
        record: Record {
            id: "someone-elses".to_string(),
            created: now,
            updated: now,
            fields: Map::new(),
        },
    };

    host.engine().handle_record_event(event).await;

    assert_eq!(host.engine().phase(), Phase::Active);
    assert_eq!(
        host.engine().handle().map(|h| h.session_id),
        Some(session_id)
    );
}

#[tokio::test]
async fn one_session_at_a_time() {
    let (_, host, participant, session_id) = hosted_session(&["a"]).await;

    assert!(matches!(
        host.engine().start_session().await,
        Err(SyncError::AlreadyInSession)
    ));
    assert!(matches!(
        participant.engine().join_session(&session_id).await,
        Err(SyncError::AlreadyInSession)
    ));
    assert_eq!(host.engine().phase(), Phase::Active);
    assert!(host.engine().handle().unwrap().is_host());
}

#[tokio::test]
async fn failed_joins_return_to_idle() {
    let store = Arc::new(MemoryStore::new("jam_sessions"));
    let client = Client::new(&store, "P");

    let result = client.engine().join_session("missing").await;

    assert!(matches!(
        result,
        Err(SyncError::Repository(RepositoryError::SessionNotFound(_)))
    ));
    assert_eq!(client.engine().phase(), Phase::Idle);
    assert!(client.events().is_empty());
}

#[tokio::test]
async fn only_the_host_changes_permissions() {
    let (_, host, participant, session_id) = hosted_session(&["a"]).await;

    participant.engine().toggle_participant_queueing(false).await;

    assert!(host.session(&session_id).await.allow_participant_queueing);
    assert!(
        participant
            .engine()
            .handle()
            .unwrap()
            .allow_participant_queueing
    );
    assert!(participant.events().is_empty());
}

#[tokio::test]
async fn only_the_host_ends_sessions() {
    let (store, host, participant, session_id) = hosted_session(&["a"]).await;

    assert!(matches!(
        participant.engine().end_session().await,
        Err(SyncError::NotHost)
    ));

    host.engine().end_session().await.unwrap();

    assert!(store.get(&session_id).await.is_err());
    assert_eq!(
        host.events(),
        vec![JamEvent::SessionLeft {
            session_id: session_id.clone(),
            reason: LeaveReason::Ended
        }]
    );
    assert!(matches!(
        host.engine().end_session().await,
        Err(SyncError::NotActive)
    ));

    participant.engine().pump().await;
    assert_eq!(participant.engine().phase(), Phase::Idle);
}

#[tokio::test]
async fn running_engine_syncs_until_leaving() {
    let (_, host, participant, session_id) = hosted_session(&["a"]).await;
    let task = tokio::spawn(participant.engine().clone().run());

    host.player().pause();
    host.engine().flush().await;

    tokio::time::timeout(Duration::from_secs(1), async {
        while !participant.player().is_paused() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    participant.engine().leave_session().await;

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(participant.engine().phase(), Phase::Idle);
    assert_eq!(
        host.session(&session_id).await.participants,
        vec!["H".to_string()]
    );
}
