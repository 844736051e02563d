use log::info;
use parking_lot::RwLock;

use crate::ParticipantId;

/// Knows who is using this client.
/// Hosting and joining sessions require someone to be logged in.
#[derive(Debug, Default)]
pub struct Auth {
    current: RwLock<Option<ParticipantId>>,
}

impl Auth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn login(&self, participant: impl Into<ParticipantId>) {
        let participant = participant.into();
        info!("Logged in as {}", participant);

        *self.current.write() = Some(participant);
    }

    pub fn logout(&self) {
        if let Some(participant) = self.current.write().take() {
            info!("{} logged out", participant);
        }
    }

    /// Returns the logged in participant, if any
    pub fn current(&self) -> Option<ParticipantId> {
        self.current.read().clone()
    }
}
