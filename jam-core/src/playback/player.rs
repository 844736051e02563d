use std::sync::Weak;

use crossbeam::atomic::AtomicCell;
use parking_lot::Mutex;

use crate::{
    AudioTransport, Id, IdType, Introspect, LocalEvent, PlaybackListener, Track, TransportError,
};

pub type PlayerId = Id<LocalPlayer>;

/// An in-memory audio transport.
///
/// It keeps the loaded track, queue, and position, but produces no sound. Time only moves
/// when [LocalPlayer::advance] is called. Every change made through it is reported to the
/// registered [PlaybackListener] after the player's own lock is released, so the listener
/// may read the player back.
pub struct LocalPlayer {
    pub id: PlayerId,
    state: Mutex<PlayerState>,
    listener: Mutex<Option<Weak<dyn PlaybackListener>>>,
    ready: AtomicCell<bool>,
    autoplay_blocked: AtomicCell<bool>,
    counters: PlayerCounters,
}

#[derive(Debug, Default, Clone)]
struct PlayerState {
    current_track: Option<Track>,
    queue: Vec<Track>,
    index: Option<usize>,
    position: f64,
    paused: bool,
}

#[derive(Default)]
struct PlayerCounters {
    plays: AtomicCell<u64>,
    pauses: AtomicCell<u64>,
    seeks: AtomicCell<u64>,
    loads: AtomicCell<u64>,
    queue_replacements: AtomicCell<u64>,
}

impl LocalPlayer {
    pub fn new() -> Self {
        Self {
            id: PlayerId::new(),
            state: Mutex::new(PlayerState {
                paused: true,
                ..Default::default()
            }),
            listener: Default::default(),
            ready: true.into(),
            autoplay_blocked: false.into(),
            counters: Default::default(),
        }
    }

    /// Marks the player as initialized or not
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready)
    }

    /// While blocked, [AudioTransport::play] fails like a browser refusing autoplay
    pub fn set_autoplay_blocked(&self, blocked: bool) {
        self.autoplay_blocked.store(blocked)
    }

    /// Moves the position forward if the player is playing.
    /// This does not notify the listener, like regular playback progress.
    pub fn advance(&self, seconds: f64) {
        let mut state = self.state.lock();

        if !state.paused && state.current_track.is_some() {
            state.position += seconds;
        }
    }

    /// Replaces the queue and immediately starts playing the track at `index`
    pub fn load_queue(&self, tracks: Vec<Track>, index: usize) -> Result<(), TransportError> {
        self.set_queue(tracks, index);
        self.play_track_from_queue(index, 0.)
    }

    fn emit(&self, event: LocalEvent) {
        let listener = self.listener.lock().clone();

        if let Some(listener) = listener.and_then(|l| l.upgrade()) {
            listener.on_playback_event(event)
        }
    }
}

impl Default for LocalPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioTransport for LocalPlayer {
    fn set_listener(&self, listener: Weak<dyn PlaybackListener>) {
        *self.listener.lock() = Some(listener);
    }

    fn current_track(&self) -> Option<Track> {
        self.state.lock().current_track.clone()
    }

    fn queue(&self) -> Vec<Track> {
        self.state.lock().queue.clone()
    }

    fn current_queue_index(&self) -> Option<usize> {
        self.state.lock().index
    }

    fn current_time(&self) -> f64 {
        self.state.lock().position
    }

    fn set_current_time(&self, seconds: f64) {
        let seconds = seconds.max(0.);

        self.state.lock().position = seconds;
        self.counters.seeks.fetch_add(1);

        self.emit(LocalEvent::Seek(seconds))
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn play(&self) -> Result<(), TransportError> {
        if self.autoplay_blocked.load() {
            return Err(TransportError::PlaybackRejected(
                "autoplay is not allowed".to_string(),
            ));
        }

        let was_paused = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.paused, false)
        };

        if was_paused {
            self.counters.plays.fetch_add(1);
            self.emit(LocalEvent::Play)
        }

        Ok(())
    }

    fn pause(&self) {
        let was_paused = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.paused, true)
        };

        if !was_paused {
            self.counters.pauses.fetch_add(1);
            self.emit(LocalEvent::Pause)
        }
    }

    fn set_queue(&self, tracks: Vec<Track>, start_index: usize) {
        {
            let mut state = self.state.lock();

            state.index = if tracks.is_empty() {
                None
            } else {
                Some(start_index.min(tracks.len() - 1))
            };
            state.queue = tracks;
        }

        self.counters.queue_replacements.fetch_add(1);
        self.emit(LocalEvent::QueueChanged)
    }

    fn play_track_from_queue(
        &self,
        index: usize,
        start_position: f64,
    ) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock();
            let len = state.queue.len();

            let track = state
                .queue
                .get(index)
                .cloned()
                .ok_or(TransportError::IndexOutOfRange { index, len })?;

            state.current_track = Some(track);
            state.index = Some(index);
            state.position = start_position.max(0.);
        }

        self.counters.loads.fetch_add(1);
        self.emit(LocalEvent::TrackChanged);

        self.play()
    }

    fn is_ready(&self) -> bool {
        self.ready.load()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerIntrospection {
    pub id: IdType,
    pub current_track: Option<String>,
    pub queue: Vec<String>,
    pub index: Option<usize>,
    pub position: f64,
    pub paused: bool,
    pub plays: u64,
    pub pauses: u64,
    pub seeks: u64,
    pub loads: u64,
    pub queue_replacements: u64,
}

impl Introspect<PlayerIntrospection> for LocalPlayer {
    fn introspect(&self) -> PlayerIntrospection {
        let state = self.state.lock().clone();

        PlayerIntrospection {
            id: self.id.value(),
            current_track: state.current_track.map(|t| t.id),
            queue: state.queue.into_iter().map(|t| t.id).collect(),
            index: state.index,
            position: state.position,
            paused: state.paused,
            plays: self.counters.plays.load(),
            pauses: self.counters.pauses.load(),
            seeks: self.counters.seeks.load(),
            loads: self.counters.loads.load(),
            queue_replacements: self.counters.queue_replacements.load(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<LocalEvent>>,
    }

    impl RecordingListener {
        fn take(&self) -> Vec<LocalEvent> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    impl PlaybackListener for RecordingListener {
        fn on_playback_event(&self, event: LocalEvent) {
            self.events.lock().push(event)
        }
    }

    fn tracks(ids: &[&str]) -> Vec<Track> {
        ids.iter().map(|id| Track::mock(id)).collect()
    }

    #[test]
    fn reports_changes_to_listener() {
        let player = LocalPlayer::new();
        let listener = Arc::new(RecordingListener::default());
        let weak = Arc::downgrade(&listener);
        let weak: Weak<dyn PlaybackListener> = weak;
        player.set_listener(weak);

        player.load_queue(tracks(&["a", "b"]), 1).unwrap();
        player.set_current_time(42.);
        player.pause();
        // Already paused, nothing happens
        player.pause();

        assert_eq!(
            listener.take(),
            vec![
                LocalEvent::QueueChanged,
                LocalEvent::TrackChanged,
                LocalEvent::Play,
                LocalEvent::Seek(42.),
                LocalEvent::Pause,
            ]
        );
    }

    #[test]
    fn set_queue_keeps_the_loaded_track() {
        let player = LocalPlayer::new();
        player.load_queue(tracks(&["a", "b"]), 0).unwrap();

        player.set_queue(tracks(&["x", "y", "z"]), 7);

        let state = player.introspect();
        assert_eq!(state.current_track.as_deref(), Some("a"));
        assert_eq!(state.index, Some(2));
        assert!(!state.paused);
    }

    #[test]
    fn blocked_autoplay_leaves_track_loaded_but_paused() {
        let player = LocalPlayer::new();
        player.set_queue(tracks(&["a"]), 0);
        player.set_autoplay_blocked(true);

        let result = player.play_track_from_queue(0, 5.);

        assert!(matches!(result, Err(TransportError::PlaybackRejected(_))));
        assert_eq!(player.current_track().map(|t| t.id).as_deref(), Some("a"));
        assert!(player.is_paused());
        assert_eq!(player.current_time(), 5.);
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let player = LocalPlayer::new();
        player.set_queue(tracks(&["a"]), 0);

        assert!(matches!(
            player.play_track_from_queue(3, 0.),
            Err(TransportError::IndexOutOfRange { index: 3, len: 1 })
        ));
    }

    #[test]
    fn advance_only_moves_while_playing() {
        let player = LocalPlayer::new();
        player.load_queue(tracks(&["a"]), 0).unwrap();

        player.advance(3.);
        player.pause();
        player.advance(10.);

        assert_eq!(player.current_time(), 3.);
    }
}
