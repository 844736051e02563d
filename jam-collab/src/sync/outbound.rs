use jam_core::{AudioTransport, LocalEvent, PlaybackListener, RecordStore};
use log::{debug, warn};

use super::{Role, SessionState, SyncEngine};
use crate::{PlaybackState, SessionPatch};

impl<S, T> SyncEngine<S, T>
where
    S: RecordStore,
    T: AudioTransport,
{
    /// Turns a local playback change into a pending broadcast.
    /// Returns true if something was queued.
    ///
    /// This reads the transport right away, so the patch reflects the state at the time of the event.
    pub fn notify_local(&self, event: LocalEvent) -> bool {
        if self.applying_remote_update.load() {
            return false;
        }

        let (role, allow_participant_queueing) = match &*self.state.lock() {
            SessionState::Active { handle, .. } => (handle.role, handle.allow_participant_queueing),
            _ => return false,
        };

        let patch = match role {
            Role::Host => self.host_patch(&event),
            Role::Participant => self.participant_patch(&event, allow_participant_queueing),
        };

        match patch {
            Some(patch) => {
                self.enqueue(patch);
                true
            }
            None => false,
        }
    }

    /// Sends every pending broadcast to the store, in order. Returns how many were written.
    /// Failed writes are logged and dropped.
    pub async fn flush(&self) -> usize {
        let mut sent = 0;

        while let Some(patch) = self.next_outbound() {
            let Some(handle) = self.handle() else {
                self.outbound.lock().clear();
                break;
            };

            let patch = patch.origin(self.next_origin());

            match self
                .repository
                .update_state(&handle.session_id, patch)
                .await
            {
                Ok(_) => sent += 1,
                Err(e) => warn!(
                    "Failed to broadcast to session {}: {}",
                    handle.session_id, e
                ),
            }
        }

        sent
    }

    /// How many broadcasts are waiting for [SyncEngine::flush]
    pub fn pending(&self) -> usize {
        self.outbound.lock().len()
    }

    pub(super) fn enqueue(&self, patch: SessionPatch) {
        self.outbound.lock().push_back(patch);
        self.outbound_notify.notify_one();
    }

    /// Forgets the queue of every pending broadcast, once the local queue was replaced by remote
    /// state. Patches left with nothing to write are dropped.
    pub(super) fn discard_pending_queue(&self) {
        let mut outbound = self.outbound.lock();
        let before = outbound.len();

        outbound.retain_mut(|patch| {
            patch.queue = None;
            *patch != SessionPatch::default()
        });

        if outbound.len() < before {
            debug!(
                "Dropped {} queue broadcasts made stale by a remote queue",
                before - outbound.len()
            );
        }
    }

    fn next_outbound(&self) -> Option<SessionPatch> {
        self.outbound.lock().pop_front()
    }

    fn host_patch(&self, event: &LocalEvent) -> Option<SessionPatch> {
        let patch = SessionPatch::default();

        let patch = match event {
            LocalEvent::Play => patch
                .playback_state(PlaybackState::Playing)
                .position(self.transport.current_time()),
            LocalEvent::Pause => patch
                .playback_state(PlaybackState::Paused)
                .position(self.transport.current_time()),
            LocalEvent::Seek(seconds) => patch.position(*seconds),
            LocalEvent::TrackChanged => {
                let Some(track) = self.transport.current_track() else {
                    debug!("Track changed to nothing, not broadcasting");
                    return None;
                };

                patch
                    .current_track(track)
                    .playback_state(PlaybackState::Playing)
                    .queue(self.transport.queue())
            }
            LocalEvent::QueueChanged => patch.queue(self.transport.queue()),
        };

        Some(patch)
    }

    /// The host owns track, playback state and position, so participants only ever broadcast
    /// their queue, and only while the host allows it. A participant whose permission mirror is
    /// current never writes a queue the host would reject; the host's restoring write only
    /// happens for a stale mirror or a write made around the engine.
    fn participant_patch(&self, event: &LocalEvent, allowed: bool) -> Option<SessionPatch> {
        match event {
            LocalEvent::QueueChanged if allowed => {
                Some(SessionPatch::default().queue(self.transport.queue()))
            }
            LocalEvent::QueueChanged => {
                debug!("Participants may not edit the queue, not broadcasting");
                None
            }
            event => {
                debug!("Only the host broadcasts {:?}", event);
                None
            }
        }
    }
}

impl<S, T> PlaybackListener for SyncEngine<S, T>
where
    S: RecordStore,
    T: AudioTransport,
{
    fn on_playback_event(&self, event: LocalEvent) {
        self.notify_local(event);
    }
}
