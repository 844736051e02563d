use std::sync::Arc;

use jam_core::{
    encode_fields, random_string, RecordStore, StoreError, StoreResultExt, Subscription,
    SyncConfig,
};
use log::{debug, info, warn};
use serde_json::Value;
use thiserror::Error;

use crate::{
    Auth, InviteInfo, NewSession, ParticipantId, SessionId, SessionPatch, SessionRecord,
};

pub type Result<T> = std::result::Result<T, RepositoryError>;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("You need to be logged in to do this")]
    AuthRequired,
    #[error("Session {0} doesn't exist")]
    SessionNotFound(SessionId),
    #[error("The invite is not valid anymore")]
    InvalidToken,
    #[error("Only the host of a session can do this")]
    NotHost,
    #[error("Could not generate an unused invite token")]
    TokenExhausted,
    /// Something else went wrong with the store
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Helper trait to reduce boilerplate
trait IntoRepositoryError {
    /// Turns a missing record into [RepositoryError::SessionNotFound]
    fn session_not_found_or(self, session_id: &str) -> RepositoryError;
}

impl IntoRepositoryError for StoreError {
    fn session_not_found_or(self, session_id: &str) -> RepositoryError {
        if self.is_not_found() {
            RepositoryError::SessionNotFound(session_id.to_string())
        } else {
            RepositoryError::Store(self)
        }
    }
}

/// Session lifecycle on top of a [RecordStore]: creating, joining, leaving, and invites.
pub struct SessionRepository<S> {
    store: Arc<S>,
    auth: Arc<Auth>,
    config: SyncConfig,
}

impl<S> SessionRepository<S>
where
    S: RecordStore,
{
    const TOKEN_FIELD: &'static str = "token";

    pub fn new(store: &Arc<S>, auth: &Arc<Auth>, config: &SyncConfig) -> Self {
        Self {
            store: store.clone(),
            auth: auth.clone(),
            config: config.clone(),
        }
    }

    /// Creates a session hosted by the logged in participant, returning its id
    pub async fn create_session(&self, new_session: NewSession) -> Result<SessionId> {
        let host = self.caller()?;
        let token = self.unused_token().await?;

        let session = SessionRecord {
            id: SessionId::new(),
            host: host.clone(),
            current_track: new_session.current_track,
            playback_state: new_session.playback_state,
            position: Some(new_session.position),
            queue: new_session.queue,
            participants: vec![host.clone()],
            allow_participant_queueing: new_session.allow_participant_queueing,
            token,
            origin: new_session.origin,
        };

        let record = self.store.create(encode_fields(&session)?).await?;
        info!("Session {} created, hosted by {}", record.id, host);

        Ok(record.id)
    }

    /// Adds the logged in participant to a session.
    /// Joining a session one is already part of writes nothing.
    pub async fn join_session(&self, session_id: &str) -> Result<SessionRecord> {
        let caller = self.caller()?;
        let session = self.session(session_id).await?;

        if session.has_participant(&caller) {
            debug!("{} is already part of session {}", caller, session_id);
            return Ok(session);
        }

        let mut participants = session.participants;
        participants.push(caller.clone());

        let updated = self
            .store
            .update(
                session_id,
                SessionPatch::default()
                    .participants(participants)
                    .into_fields()?,
            )
            .await
            .map_err(|e| e.session_not_found_or(session_id))?;

        info!("{} joined session {}", caller, session_id);
        Ok(SessionRecord::from_record(&updated)?)
    }

    /// Removes the logged in participant from a session.
    ///
    /// The session is deleted when nobody is left, or when the host leaves, since a session
    /// can't exist without its host. This never fails, problems are only logged.
    pub async fn leave_session(&self, session_id: &str) {
        let Some(caller) = self.auth.current() else {
            warn!("Cannot leave session {} without being logged in", session_id);
            return;
        };

        if let Err(e) = self.remove_participant(session_id, &caller).await {
            warn!(
                "Could not tell session {} that {} left: {}",
                session_id, caller, e
            );
        }
    }

    /// Deletes a session. Only the host may do this.
    pub async fn end_session(&self, session_id: &str) -> Result<()> {
        let caller = self.caller()?;
        let session = self.session(session_id).await?;

        if !session.is_host(&caller) {
            return Err(RepositoryError::NotHost);
        }

        self.store
            .delete(session_id)
            .await
            .map_err(|e| e.session_not_found_or(session_id))?;

        info!("Session {} was ended by {}", session_id, caller);
        Ok(())
    }

    /// Writes a partial update of the session state
    pub async fn update_state(&self, session_id: &str, patch: SessionPatch) -> Result<SessionRecord> {
        let record = self
            .store
            .update(session_id, patch.into_fields()?)
            .await
            .map_err(|e| e.session_not_found_or(session_id))?;

        Ok(SessionRecord::from_record(&record)?)
    }

    /// Returns the id of the session an invite token belongs to
    pub async fn resolve_invite_token(&self, token: &str) -> Result<SessionId> {
        let record = self
            .store
            .find_by_field(Self::TOKEN_FIELD, &Value::String(token.to_string()))
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    RepositoryError::InvalidToken
                } else {
                    RepositoryError::Store(e)
                }
            })?;

        Ok(record.id)
    }

    /// Reads the invite token of a session
    pub async fn generate_invite_info(&self, session_id: &str) -> Result<InviteInfo> {
        let session = self.session(session_id).await?;

        Ok(InviteInfo {
            session_id: session.id,
            token: session.token,
        })
    }

    pub async fn session(&self, session_id: &str) -> Result<SessionRecord> {
        let record = self
            .store
            .get(session_id)
            .await
            .map_err(|e| e.session_not_found_or(session_id))?;

        Ok(SessionRecord::from_record(&record)?)
    }

    /// Subscribes to changes of a session
    pub async fn subscribe(&self, session_id: &str) -> Result<Subscription> {
        self.store
            .subscribe(session_id)
            .await
            .map_err(|e| e.session_not_found_or(session_id))
    }

    fn caller(&self) -> Result<ParticipantId> {
        self.auth.current().ok_or(RepositoryError::AuthRequired)
    }

    async fn remove_participant(&self, session_id: &str, caller: &str) -> Result<()> {
        let Some(record) = self.store.get(session_id).await.found()? else {
            debug!("Session {} is already gone", session_id);
            return Ok(());
        };

        let session = SessionRecord::from_record(&record)?;

        if !session.has_participant(caller) {
            debug!("{} is not part of session {}", caller, session_id);
            return Ok(());
        }

        let remaining: Vec<_> = session
            .participants
            .iter()
            .filter(|p| *p != caller)
            .cloned()
            .collect();

        if remaining.is_empty() || session.is_host(caller) {
            // Someone else may have deleted it in the meantime, which is fine
            self.store.delete(session_id).await.found()?;
            info!("{} left session {}, which is now closed", caller, session_id);

            return Ok(());
        }

        self.store
            .update(
                session_id,
                SessionPatch::default().participants(remaining).into_fields()?,
            )
            .await?;

        info!("{} left session {}", caller, session_id);
        Ok(())
    }

    async fn unused_token(&self) -> Result<String> {
        for _ in 0..self.config.token_attempts {
            let token = random_string(self.config.token_length);

            let existing = self
                .store
                .find_by_field(Self::TOKEN_FIELD, &Value::String(token.clone()))
                .await
                .found()?;

            match existing {
                None => return Ok(token),
                Some(record) => warn!("Token collided with session {}, retrying", record.id),
            }
        }

        Err(RepositoryError::TokenExhausted)
    }
}
