use crossbeam::channel::{Receiver, Sender};

use crate::SessionId;

pub type EventSender = Sender<JamEvent>;
pub type EventReceiver = Receiver<JamEvent>;

/// Events emitted by the sync engine, for the UI to react to
#[derive(Debug, Clone, PartialEq)]
pub enum JamEvent {
    /// This client created a session and hosts it
    SessionStarted { session_id: SessionId, token: String },
    /// This client joined someone else's session
    SessionJoined { session_id: SessionId },
    /// This client is not part of the session anymore
    SessionLeft {
        session_id: SessionId,
        reason: LeaveReason,
    },
    /// The host changed whether participants may edit the queue
    PermissionsChanged { allow_participant_queueing: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// The user left
    Left,
    /// The session was ended or deleted by its host
    Ended,
}
