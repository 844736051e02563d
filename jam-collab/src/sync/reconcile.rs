use crossbeam::atomic::AtomicCell;
use jam_core::{AudioTransport, RecordStore, Track};
use log::{debug, info, warn};

use super::{SessionState, SyncEngine};
use crate::{JamEvent, PlaybackState, SessionPatch, SessionRecord};

/// Marks remote state as being applied for as long as it lives
struct RemoteUpdateGuard<'a> {
    flag: &'a AtomicCell<bool>,
}

impl<'a> RemoteUpdateGuard<'a> {
    fn new(flag: &'a AtomicCell<bool>) -> Self {
        flag.store(true);
        Self { flag }
    }
}

impl Drop for RemoteUpdateGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false);
    }
}

impl<S, T> SyncEngine<S, T>
where
    S: RecordStore,
    T: AudioTransport,
{
    /// Brings the local transport in line with a session record
    pub(super) fn reconcile(&self, session: &SessionRecord) {
        let _guard = RemoteUpdateGuard::new(&self.applying_remote_update);

        self.mirror_permissions(session.allow_participant_queueing);

        let previous_queue = self.transport.queue();
        let local_track = self.transport.current_track();

        if previous_queue != session.queue {
            let index = self.index_in_new_queue(local_track.as_ref(), &session.queue);

            debug!("Replacing the queue with {} tracks", session.queue.len());
            self.discard_pending_queue();
            self.transport.set_queue(session.queue.clone(), index);
        }

        if let Some(track) = &session.current_track {
            if local_track.as_ref().map(|t| &t.id) != Some(&track.id) {
                self.load_remote_track(track, &session.queue, previous_queue);
            }
        }

        if let Some(position) = session.position {
            let local = self.transport.current_time();

            if self.config.exceeds_drift(local, position) {
                debug!("At {:.1}s while the session is at {:.1}s, seeking", local, position);
                self.transport.set_current_time(position);
            }
        }

        match session.playback_state {
            PlaybackState::Playing if self.transport.is_paused() => {
                if let Err(e) = self.transport.play() {
                    warn!("Could not resume playback: {}", e);
                }
            }
            PlaybackState::Paused if !self.transport.is_paused() => self.transport.pause(),
            _ => {}
        }
    }

    /// Decides what happens to a queue written by someone else. Only the host does this.
    pub(super) async fn arbitrate_queue(&self, session: &SessionRecord, allowed: bool) {
        if session.written_by(&self.client_id) {
            debug!("Ignoring echo of our own write to {}", session.id);
            return;
        }

        let local_queue = self.transport.queue();

        if local_queue == session.queue {
            return;
        }

        if allowed {
            let _guard = RemoteUpdateGuard::new(&self.applying_remote_update);

            let local_track = self.transport.current_track();
            let index = self.index_in_new_queue(local_track.as_ref(), &session.queue);

            info!("Adopting the queue edited by a participant");
            self.discard_pending_queue();
            self.transport.set_queue(session.queue.clone(), index);
        } else {
            info!("Participants may not edit the queue, restoring it");

            self.enqueue(SessionPatch::default().queue(local_queue));
            self.flush().await;
        }
    }

    fn mirror_permissions(&self, allow: bool) {
        let changed = {
            let mut state = self.state.lock();

            match &mut *state {
                SessionState::Active { handle, .. }
                    if handle.allow_participant_queueing != allow =>
                {
                    handle.allow_participant_queueing = allow;
                    true
                }
                _ => false,
            }
        };

        if changed {
            info!(
                "The host {} queue edits",
                if allow { "now allows" } else { "no longer allows" }
            );

            self.emit(JamEvent::PermissionsChanged {
                allow_participant_queueing: allow,
            });
        }
    }

    /// Where the current track is in `queue`, or the current index clamped to it
    fn index_in_new_queue(&self, track: Option<&Track>, queue: &[Track]) -> usize {
        track.and_then(|t| t.index_in(queue)).unwrap_or_else(|| {
            self.transport
                .current_queue_index()
                .unwrap_or(0)
                .min(queue.len().saturating_sub(1))
        })
    }

    fn load_remote_track(&self, track: &Track, queue: &[Track], previous_queue: Vec<Track>) {
        let index = if let Some(index) = track.index_in(queue) {
            index
        } else if let Some(index) = track.index_in(&previous_queue) {
            debug!("Track {} is only in the previous queue, restoring it", track.id);
            self.discard_pending_queue();
            self.transport.set_queue(previous_queue, index);
            index
        } else {
            debug!("Track {} is in no queue, playing it alone", track.id);
            self.discard_pending_queue();
            self.transport.set_queue(vec![track.clone()], 0);
            0
        };

        if let Err(e) = self.transport.play_track_from_queue(index, 0.) {
            warn!("Could not play track {}: {}", track.id, e);
        }
    }
}
