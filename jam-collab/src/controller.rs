use std::sync::Arc;

use jam_core::{AudioTransport, RecordStore};
use log::{debug, error, info};
use parking_lot::Mutex;
use thiserror::Error;
use url::Url;

use crate::{
    invite_link, token_from_link, Jam, JamEvent, RepositoryError, SessionId, SessionRecord,
    SyncError,
};

pub type ControllerResult<T> = Result<T, ControllerError>;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("That is not a valid link: {0}")]
    InvalidLink(#[from] url::ParseError),
    #[error("The link does not contain an invite")]
    NoInviteInLink,
    #[error("The player is not ready yet, try again in a moment")]
    TransportNotReady,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// What a session UI shows
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ControllerState {
    pub session_id: Option<SessionId>,
    pub is_host: bool,
    pub allow_participant_queueing: bool,
    pub invite_link: Option<Url>,
    /// The last error, for display
    pub notice: Option<String>,
}

/// Drives a [Jam] on behalf of a user interface, and keeps the state it displays.
pub struct SessionController<S, T> {
    jam: Arc<Jam<S, T>>,
    base_url: Url,
    state: Arc<Mutex<ControllerState>>,
}

impl<S, T> SessionController<S, T>
where
    S: RecordStore,
    T: AudioTransport,
{
    /// `base_url` is the address invite links point to
    pub fn new(jam: &Arc<Jam<S, T>>, base_url: Url) -> Self {
        Self {
            jam: jam.clone(),
            base_url,
            state: Default::default(),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state.lock().clone()
    }

    /// Hosts a new session with what is playing right now
    pub async fn start(&self) -> ControllerResult<SessionId> {
        let result = self.jam.engine.start_session().await.map_err(Into::into);
        let session_id = self.remember(result)?;

        self.spawn_engine();
        self.process_events();

        Ok(session_id)
    }

    pub async fn join(&self, session_id: &str) -> ControllerResult<SessionRecord> {
        let result = self.jam.engine.join_session(session_id).await.map_err(Into::into);
        let session = self.remember(result)?;

        self.state.lock().invite_link = Some(self.link_for(&session.token));

        self.spawn_engine();
        self.process_events();

        Ok(session)
    }

    /// Joins the session an invite link points to, once the local player is ready
    pub async fn join_from_link(&self, link: &str) -> ControllerResult<SessionRecord> {
        let result = self.resolve_link(link).await;
        let session_id = self.remember(result)?;

        self.join(&session_id).await
    }

    pub async fn leave(&self) {
        self.jam.engine.leave_session().await;
        self.process_events();
    }

    /// Flips whether participants may edit the queue. Only does something for the host.
    pub async fn toggle_participant_queueing(&self) {
        let allow = !self.state.lock().allow_participant_queueing;

        self.jam.engine.toggle_participant_queueing(allow).await;
        self.process_events();
    }

    /// Applies every pending engine event to the state. Returns how many there were.
    ///
    /// The engine task also does this once it stops, so a session ended by its host shows up
    /// without a call here.
    pub fn process_events(&self) -> usize {
        drain_events(&self.jam, &self.base_url, &self.state)
    }

    async fn resolve_link(&self, link: &str) -> ControllerResult<SessionId> {
        let config = self.jam.config();
        let link = Url::parse(link)?;

        let token = token_from_link(&link, &config.invite_query_parameter)
            .ok_or(ControllerError::NoInviteInLink)?;

        let session_id = self.jam.repository.resolve_invite_token(&token).await?;
        self.wait_until_ready().await?;

        Ok(session_id)
    }

    async fn wait_until_ready(&self) -> ControllerResult<()> {
        let config = self.jam.config();

        for attempt in 0..config.readiness_max_attempts {
            if self.jam.transport().is_ready() {
                return Ok(());
            }

            debug!("Player not ready yet, attempt {}", attempt + 1);
            tokio::time::sleep(config.readiness_poll_interval).await;
        }

        Err(ControllerError::TransportNotReady)
    }

    fn spawn_engine(&self) {
        let jam = self.jam.clone();
        let base_url = self.base_url.clone();
        let state = self.state.clone();

        tokio::spawn(async move {
            jam.engine.clone().run().await;
            info!("Stopped syncing");

            drain_events(&jam, &base_url, &state);
        });
    }

    /// Keeps the error as the notice, or clears the notice on success
    fn remember<R>(&self, result: ControllerResult<R>) -> ControllerResult<R> {
        let mut state = self.state.lock();

        match &result {
            Ok(_) => state.notice = None,
            Err(e) => {
                error!("{}", e);
                state.notice = Some(e.to_string());
            }
        }

        result
    }

    fn link_for(&self, token: &str) -> Url {
        link_for(&self.jam, &self.base_url, token)
    }
}

/// The state stays locked while draining, so events apply in the order they were sent.
fn drain_events<S, T>(jam: &Jam<S, T>, base_url: &Url, state: &Mutex<ControllerState>) -> usize
where
    S: RecordStore,
    T: AudioTransport,
{
    let mut state = state.lock();
    let mut processed = 0;

    while let Ok(event) = jam.events().try_recv() {
        apply(jam, base_url, &mut state, event);
        processed += 1;
    }

    processed
}

fn apply<S, T>(jam: &Jam<S, T>, base_url: &Url, state: &mut ControllerState, event: JamEvent)
where
    S: RecordStore,
    T: AudioTransport,
{
    match event {
        JamEvent::SessionStarted { session_id, token } => {
            state.session_id = Some(session_id);
            state.is_host = true;
            state.allow_participant_queueing = true;
            state.invite_link = Some(link_for(jam, base_url, &token));
        }
        JamEvent::SessionJoined { session_id } => {
            let allow = jam
                .engine
                .handle()
                .is_some_and(|h| h.allow_participant_queueing);

            state.session_id = Some(session_id);
            state.is_host = false;
            state.allow_participant_queueing = allow;
        }
        JamEvent::SessionLeft { session_id, reason } => {
            debug!("Left session {} ({:?})", session_id, reason);

            let notice = state.notice.take();
            *state = ControllerState {
                notice,
                ..Default::default()
            };
        }
        JamEvent::PermissionsChanged {
            allow_participant_queueing,
        } => state.allow_participant_queueing = allow_participant_queueing,
    }
}

fn link_for<S, T>(jam: &Jam<S, T>, base_url: &Url, token: &str) -> Url
where
    S: RecordStore,
    T: AudioTransport,
{
    invite_link(base_url, &jam.config().invite_query_parameter, token)
}
