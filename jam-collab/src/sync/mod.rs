mod outbound;
mod reconcile;

#[cfg(test)]
mod tests;

use std::{collections::VecDeque, sync::Arc};

use crossbeam::atomic::AtomicCell;
use futures_util::StreamExt;
use jam_core::{
    random_string, AudioTransport, RecordAction, RecordEvent, RecordStore, Subscription,
    SubscriptionHandle, SyncConfig,
};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, Notify};

use crate::{
    ClientId, EventSender, JamEvent, LeaveReason, NewSession, Origin, PlaybackState,
    RepositoryError, SessionId, SessionPatch, SessionRecord, SessionRepository,
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Already in a session, leave it first")]
    AlreadyInSession,
    #[error("Not in a session")]
    NotActive,
    #[error("Only the host of the session can do this")]
    NotHost,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Created the session, owns the track, playback state and position
    Host,
    /// Follows the host, may write the queue if allowed
    Participant,
}

/// The coarse state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    Joining,
    Active,
}

/// What a client knows about the session it is in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub role: Role,
    pub allow_participant_queueing: bool,
}

impl SessionHandle {
    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }
}

#[derive(Default)]
enum SessionState {
    #[default]
    Idle,
    Starting,
    Joining,
    Active {
        handle: SessionHandle,
        subscription: SubscriptionHandle,
    },
}

/// Keeps the local audio transport and a shared session converged.
///
/// Local changes are reported through [jam_core::PlaybackListener] and broadcast as partial
/// updates. Remote changes arrive through the session's subscription: participants reconcile
/// every record they receive, the host only arbitrates queue writes made by participants.
pub struct SyncEngine<S, T> {
    client_id: ClientId,
    config: SyncConfig,
    repository: Arc<SessionRepository<S>>,
    transport: Arc<T>,
    events: EventSender,

    state: Mutex<SessionState>,
    /// Set while remote state is applied to the transport, so its events aren't broadcast back
    applying_remote_update: AtomicCell<bool>,
    seq: AtomicCell<u64>,

    outbound: Mutex<VecDeque<SessionPatch>>,
    outbound_notify: Notify,
    inbound: AsyncMutex<Option<Subscription>>,
}

impl<S, T> SyncEngine<S, T>
where
    S: RecordStore,
    T: AudioTransport,
{
    const CLIENT_ID_LENGTH: usize = 16;

    pub fn new(
        repository: &Arc<SessionRepository<S>>,
        transport: &Arc<T>,
        config: &SyncConfig,
        events: EventSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            client_id: random_string(Self::CLIENT_ID_LENGTH),
            config: config.clone(),
            repository: repository.clone(),
            transport: transport.clone(),
            events,
            state: Default::default(),
            applying_remote_update: false.into(),
            seq: AtomicCell::new(0),
            outbound: Default::default(),
            outbound_notify: Notify::new(),
            inbound: AsyncMutex::new(None),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn phase(&self) -> Phase {
        match &*self.state.lock() {
            SessionState::Idle => Phase::Idle,
            SessionState::Starting => Phase::Starting,
            SessionState::Joining => Phase::Joining,
            SessionState::Active { .. } => Phase::Active,
        }
    }

    /// Returns the active session, if any
    pub fn handle(&self) -> Option<SessionHandle> {
        match &*self.state.lock() {
            SessionState::Active { handle, .. } => Some(handle.clone()),
            _ => None,
        }
    }

    /// Whether remote state is being applied right now
    pub fn is_applying_remote_update(&self) -> bool {
        self.applying_remote_update.load()
    }

    /// Hosts a new session with the current local playback state
    pub async fn start_session(&self) -> Result<SessionId, SyncError> {
        self.begin(SessionState::Starting)?;

        match self.create_and_subscribe().await {
            Ok((token, subscription)) => {
                let session_id = subscription.record_id().to_string();

                self.activate(
                    SessionHandle {
                        session_id: session_id.clone(),
                        role: Role::Host,
                        allow_participant_queueing: true,
                    },
                    subscription,
                )
                .await;

                info!("Hosting session {}", session_id);
                self.emit(JamEvent::SessionStarted {
                    session_id: session_id.clone(),
                    token,
                });

                Ok(session_id)
            }
            Err(e) => {
                error!("Failed to start a session: {}", e);
                *self.state.lock() = SessionState::Idle;

                Err(e.into())
            }
        }
    }

    /// Joins a session as a participant and converges on its state
    pub async fn join_session(&self, session_id: &str) -> Result<SessionRecord, SyncError> {
        self.begin(SessionState::Joining)?;

        match self.join_and_subscribe(session_id).await {
            Ok((session, subscription)) => {
                self.activate(
                    SessionHandle {
                        session_id: session.id.clone(),
                        role: Role::Participant,
                        allow_participant_queueing: session.allow_participant_queueing,
                    },
                    subscription,
                )
                .await;

                info!("Joined session {} hosted by {}", session.id, session.host);
                self.emit(JamEvent::SessionJoined {
                    session_id: session.id.clone(),
                });

                self.reconcile(&session);

                Ok(session)
            }
            Err(e) => {
                error!("Failed to join session {}: {}", session_id, e);
                *self.state.lock() = SessionState::Idle;

                Err(e.into())
            }
        }
    }

    /// Stops syncing and leaves the session.
    /// Local state is always cleared, telling the store is best-effort.
    pub async fn leave_session(&self) {
        let Some(handle) = self.teardown() else {
            debug!("Not in a session, nothing to leave");
            return;
        };

        self.repository.leave_session(&handle.session_id).await;

        info!("Left session {}", handle.session_id);
        self.emit(JamEvent::SessionLeft {
            session_id: handle.session_id,
            reason: LeaveReason::Left,
        });
    }

    /// Ends the session for everyone. Only the host may do this.
    pub async fn end_session(&self) -> Result<(), SyncError> {
        match self.handle() {
            None => return Err(SyncError::NotActive),
            Some(handle) if !handle.is_host() => return Err(SyncError::NotHost),
            Some(_) => {}
        }

        let Some(handle) = self.teardown() else {
            return Err(SyncError::NotActive);
        };

        let result = self.repository.end_session(&handle.session_id).await;

        self.emit(JamEvent::SessionLeft {
            session_id: handle.session_id.clone(),
            reason: LeaveReason::Ended,
        });

        match result {
            Ok(()) => {
                info!("Ended session {}", handle.session_id);
                Ok(())
            }
            Err(e) => {
                error!("Failed to end session {}: {}", handle.session_id, e);
                Err(e.into())
            }
        }
    }

    /// Lets participants edit the queue, or stops them from doing so.
    /// Does nothing unless this client hosts the active session.
    pub async fn toggle_participant_queueing(&self, allow: bool) {
        let is_host = {
            let mut state = self.state.lock();

            match &mut *state {
                SessionState::Active { handle, .. } if handle.is_host() => {
                    handle.allow_participant_queueing = allow;
                    true
                }
                _ => false,
            }
        };

        if !is_host {
            debug!("Only the host can change queue permissions");
            return;
        }

        info!(
            "Participants {} edit the queue",
            if allow { "may now" } else { "may no longer" }
        );

        self.emit(JamEvent::PermissionsChanged {
            allow_participant_queueing: allow,
        });

        self.enqueue(SessionPatch::default().allow_participant_queueing(allow));
        self.flush().await;
    }

    /// Applies a change pushed by the store
    pub async fn handle_record_event(&self, event: RecordEvent) {
        let Some(handle) = self.handle() else {
            debug!(
                "Ignoring event for {} outside of a session",
                event.record.id
            );
            return;
        };

        if handle.session_id != event.record.id {
            debug!("Ignoring event for unrelated record {}", event.record.id);
            return;
        }

        if event.action == RecordAction::Deleted {
            self.end_locally(&handle.session_id);
            return;
        }

        let session = match SessionRecord::from_record(&event.record) {
            Ok(session) => session,
            Err(e) => {
                warn!("Ignoring malformed update of {}: {}", event.record.id, e);
                return;
            }
        };

        match handle.role {
            Role::Participant => self.reconcile(&session),
            Role::Host => {
                self.arbitrate_queue(&session, handle.allow_participant_queueing)
                    .await
            }
        }
    }

    /// Handles every event that has already been delivered, without waiting for more.
    /// Returns how many events were handled.
    ///
    /// Not to be used while [SyncEngine::run] is running, which owns the subscription then.
    pub async fn pump(&self) -> usize {
        let mut inbound = self.inbound.lock().await;
        let mut handled = 0;

        while let Some(event) = inbound.as_mut().and_then(|s| s.try_recv()) {
            self.handle_record_event(event).await;
            handled += 1;
        }

        if self.phase() != Phase::Active {
            *inbound = None;
        }

        handled
    }

    /// Handles remote events and flushes local broadcasts as they come in,
    /// until the subscription of the active session ends.
    pub async fn run(self: Arc<Self>) {
        let mut inbound = self.inbound.lock().await;

        let Some(subscription) = inbound.as_mut() else {
            debug!("No subscription to run");
            return;
        };

        loop {
            tokio::select! {
                event = subscription.next() => match event {
                    Some(event) => self.handle_record_event(event).await,
                    None => break,
                },
                _ = self.outbound_notify.notified() => {
                    self.flush().await;
                }
            }
        }

        *inbound = None;

        // Dropped subscriptions are not retried
        if let Some(handle) = self.handle() {
            warn!(
                "Lost the subscription to session {}, leave and join again to resume syncing",
                handle.session_id
            );
        }
    }

    fn begin(&self, next: SessionState) -> Result<(), SyncError> {
        let mut state = self.state.lock();

        if !matches!(*state, SessionState::Idle) {
            return Err(SyncError::AlreadyInSession);
        }

        *state = next;
        Ok(())
    }

    async fn activate(&self, handle: SessionHandle, subscription: Subscription) {
        let subscription_handle = subscription.handle();
        *self.inbound.lock().await = Some(subscription);

        *self.state.lock() = SessionState::Active {
            handle,
            subscription: subscription_handle,
        };
    }

    /// Unsubscribes, then clears the session state. Returns the session that was active.
    fn teardown(&self) -> Option<SessionHandle> {
        let handle = {
            let mut state = self.state.lock();

            if !matches!(*state, SessionState::Active { .. }) {
                return None;
            }

            let SessionState::Active {
                handle,
                subscription,
            } = std::mem::take(&mut *state)
            else {
                return None;
            };

            subscription.unsubscribe();
            handle
        };

        self.outbound.lock().clear();

        // If the subscription is in use, its user clears it once it sees the stream end
        if let Ok(mut inbound) = self.inbound.try_lock() {
            *inbound = None;
        }

        Some(handle)
    }

    fn end_locally(&self, session_id: &str) {
        if self.teardown().is_some() {
            info!("Session {} was ended by its host", session_id);

            self.emit(JamEvent::SessionLeft {
                session_id: session_id.to_string(),
                reason: LeaveReason::Ended,
            });
        }
    }

    async fn create_and_subscribe(&self) -> Result<(String, Subscription), RepositoryError> {
        let new_session = NewSession {
            origin: Some(self.next_origin()),
            ..NewSession::new(
                self.transport.current_track(),
                PlaybackState::from_paused(self.transport.is_paused()),
                self.transport.current_time(),
                self.transport.queue(),
            )
        };

        let session_id = self.repository.create_session(new_session).await?;

        let subscribed = async {
            let invite = self.repository.generate_invite_info(&session_id).await?;
            let subscription = self.repository.subscribe(&session_id).await?;

            Ok((invite.token, subscription))
        }
        .await;

        if subscribed.is_err() {
            // Don't leave a session behind that nobody is syncing
            self.repository.leave_session(&session_id).await;
        }

        subscribed
    }

    async fn join_and_subscribe(
        &self,
        session_id: &str,
    ) -> Result<(SessionRecord, Subscription), RepositoryError> {
        let session = self.repository.join_session(session_id).await?;

        match self.repository.subscribe(session_id).await {
            Ok(subscription) => Ok((session, subscription)),
            Err(e) => {
                self.repository.leave_session(session_id).await;
                Err(e)
            }
        }
    }

    fn next_origin(&self) -> Origin {
        Origin {
            client: self.client_id.clone(),
            seq: self.seq.fetch_add(1) + 1,
        }
    }

    fn emit(&self, event: JamEvent) {
        if self.events.send(event).is_err() {
            debug!("Nobody is listening to session events");
        }
    }
}
