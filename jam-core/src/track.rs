use serde::{Deserialize, Serialize};

/// A track descriptor as it is shared between clients.
/// Only `id` is used for identity, the rest is display metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    /// Length of the track in seconds, if known
    #[serde(default)]
    pub duration: Option<f64>,
}

impl Track {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: None,
            album: None,
            duration: None,
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    /// Returns the index of the track with the same id in the given list
    pub fn index_in(&self, tracks: &[Track]) -> Option<usize> {
        tracks.iter().position(|t| t.id == self.id)
    }

    /// A track with the given id, used in tests
    pub fn mock(id: &str) -> Self {
        Self::new(id, format!("Track {}", id)).with_duration(180.)
    }
}
