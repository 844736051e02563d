use jam_core::{encode_fields, Fields, Record, RecordId, StoreError, Track};
use serde::{Deserialize, Serialize};

/// The id of a session record
pub type SessionId = RecordId;

/// Identifies an authenticated listener
pub type ParticipantId = String;

/// Identifies one running client instance, used to recognize its own writes
pub type ClientId = String;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    #[default]
    Paused,
}

impl PlaybackState {
    pub fn from_paused(paused: bool) -> Self {
        if paused {
            Self::Paused
        } else {
            Self::Playing
        }
    }
}

/// Stamped on every write so the writer can recognize it when it is delivered back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub client: ClientId,
    /// Increases with every write of the client
    pub seq: u64,
}

/// The shared state of a jam session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(skip)]
    pub id: SessionId,
    /// The participant that created the session, never changes
    pub host: ParticipantId,
    #[serde(default)]
    pub current_track: Option<Track>,
    #[serde(default)]
    pub playback_state: PlaybackState,
    /// Seconds into `current_track`
    #[serde(default)]
    pub position: Option<f64>,
    #[serde(default)]
    pub queue: Vec<Track>,
    /// Everyone in the session, including the host. Never contains duplicates.
    #[serde(default)]
    pub participants: Vec<ParticipantId>,
    #[serde(default = "allow_by_default")]
    pub allow_participant_queueing: bool,
    /// Used to resolve invites, never changes
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
}

fn allow_by_default() -> bool {
    true
}

impl SessionRecord {
    pub fn from_record(record: &Record) -> Result<Self, StoreError> {
        let mut session: Self = record.decode()?;
        session.id = record.id.clone();

        Ok(session)
    }

    pub fn has_participant(&self, participant: &str) -> bool {
        self.participants.iter().any(|p| p == participant)
    }

    pub fn is_host(&self, participant: &str) -> bool {
        self.host == participant
    }

    /// Returns true if the record was written by the given client
    pub fn written_by(&self, client: &str) -> bool {
        self.origin.as_ref().is_some_and(|o| o.client == client)
    }
}

/// The initial state of a new session
#[derive(Debug, Clone)]
pub struct NewSession {
    pub current_track: Option<Track>,
    pub playback_state: PlaybackState,
    pub position: f64,
    pub queue: Vec<Track>,
    pub allow_participant_queueing: bool,
    pub origin: Option<Origin>,
}

impl NewSession {
    pub fn new(
        current_track: Option<Track>,
        playback_state: PlaybackState,
        position: f64,
        queue: Vec<Track>,
    ) -> Self {
        Self {
            current_track,
            playback_state,
            position,
            queue,
            allow_participant_queueing: true,
            origin: None,
        }
    }
}

/// A partial update of a session. Only the fields that are set are written.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_track: Option<Track>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_state: Option<PlaybackState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<Vec<Track>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<ParticipantId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_participant_queueing: Option<bool>,
    /// Always written, a patch without an origin clears the previous writer's
    pub origin: Option<Origin>,
}

impl SessionPatch {
    /// Changes the track. The position is reset with it, it only means something for one track.
    pub fn current_track(mut self, track: Track) -> Self {
        self.current_track = Some(track);
        self.position = Some(0.);
        self
    }

    pub fn playback_state(mut self, state: PlaybackState) -> Self {
        self.playback_state = Some(state);
        self
    }

    pub fn position(mut self, seconds: f64) -> Self {
        self.position = Some(seconds);
        self
    }

    pub fn queue(mut self, queue: Vec<Track>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn participants(mut self, participants: Vec<ParticipantId>) -> Self {
        self.participants = Some(participants);
        self
    }

    pub fn allow_participant_queueing(mut self, allow: bool) -> Self {
        self.allow_participant_queueing = Some(allow);
        self
    }

    pub fn origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn into_fields(self) -> Result<Fields, StoreError> {
        encode_fields(&self)
    }
}

/// What is needed to invite someone to a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteInfo {
    pub session_id: SessionId,
    pub token: String,
}
