//! Building blocks shared by every client of a jam session: the record store contract that
//! carries session state between clients, and the audio transport contract that plays it.

mod config;
mod playback;
mod store;
mod track;
mod util;

pub use config::*;
pub use playback::*;
pub use store::*;
pub use track::*;
pub use util::*;
