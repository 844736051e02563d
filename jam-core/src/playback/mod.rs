use std::sync::Weak;

use thiserror::Error;

mod player;

pub use player::*;

use crate::Track;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The environment refused to start playback, e.g. autoplay restrictions
    #[error("Playback was rejected: {0}")]
    PlaybackRejected(String),
    #[error("Queue index {index} is out of range for a queue of {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

/// The fixed set of capabilities a local audio engine must provide to take part in a session.
pub trait AudioTransport
where
    Self: Send + Sync + 'static,
{
    /// Registers the listener that is told about every change made through this transport.
    /// Only one listener is kept, registering another replaces it.
    fn set_listener(&self, listener: Weak<dyn PlaybackListener>);

    /// The track that is currently loaded, if any
    fn current_track(&self) -> Option<Track>;

    /// The upcoming tracks, in order
    fn queue(&self) -> Vec<Track>;

    fn current_queue_index(&self) -> Option<usize>;

    /// Playback position into the current track, in seconds
    fn current_time(&self) -> f64;

    fn set_current_time(&self, seconds: f64);

    fn is_paused(&self) -> bool;

    /// Resumes or starts playback
    fn play(&self) -> Result<(), TransportError>;

    fn pause(&self);

    /// Replaces the queue and points the queue index at `start_index`.
    /// The loaded track keeps playing.
    fn set_queue(&self, tracks: Vec<Track>, start_index: usize);

    /// Loads the track at `index` of the queue and plays it from `start_position` seconds
    fn play_track_from_queue(&self, index: usize, start_position: f64)
        -> Result<(), TransportError>;

    /// Whether the transport has finished initializing
    fn is_ready(&self) -> bool {
        true
    }
}

/// A playback change that originated locally
#[derive(Debug, Clone, PartialEq)]
pub enum LocalEvent {
    Play,
    Pause,
    /// The position was changed, in seconds
    Seek(f64),
    TrackChanged,
    QueueChanged,
}

/// Receives local playback changes as they happen
pub trait PlaybackListener
where
    Self: Send + Sync,
{
    fn on_playback_event(&self, event: LocalEvent);
}
