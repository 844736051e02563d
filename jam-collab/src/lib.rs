mod auth;
mod controller;
mod data;
mod events;
mod invite;
mod repository;
mod sync;

use std::sync::{Arc, Weak};

pub use auth::*;
pub use controller::*;
pub use data::*;
pub use events::*;
pub use invite::*;
pub use repository::*;
pub use sync::*;

use jam_core::{AudioTransport, PlaybackListener, RecordStore, SyncConfig};

/// The jam system of one client, tying a record store and a local audio transport together.
pub struct Jam<S, T> {
    config: SyncConfig,
    transport: Arc<T>,
    events: EventReceiver,

    pub auth: Arc<Auth>,
    pub repository: Arc<SessionRepository<S>>,
    pub engine: Arc<SyncEngine<S, T>>,
}

impl<S, T> Jam<S, T>
where
    S: RecordStore,
    T: AudioTransport,
{
    pub fn new(store: Arc<S>, transport: Arc<T>, config: SyncConfig) -> Self {
        let auth = Arc::new(Auth::new());
        let repository = Arc::new(SessionRepository::new(&store, &auth, &config));
        let (sender, events) = crossbeam::channel::unbounded();

        let engine = SyncEngine::new(&repository, &transport, &config, sender);

        let weak = Arc::downgrade(&engine);
        let listener: Weak<dyn PlaybackListener> = weak;
        transport.set_listener(listener);

        Self {
            config,
            transport,
            events,
            auth,
            repository,
            engine,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Events emitted by the sync engine
    pub fn events(&self) -> &EventReceiver {
        &self.events
    }
}
