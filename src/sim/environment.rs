//! Bundles the in-memory fakes into one `Environment` (§9 design notes:
//! "Global singletons for RTC and row-store clients. Replace with explicit
//! injected dependencies on each engine instance so tests can substitute
//! in-memory fakes.").

use std::sync::{Arc, Mutex};

use crate::common::Result;
use crate::engine::Environment;
use crate::rtc::RtcObserver;
use crate::sim::media::SimMediaProvider;
use crate::sim::row_store::SimBackend;
use crate::sim::rtc::SimPeerConnection;

struct Inner {
    backend: Arc<SimBackend>,
    media: Arc<SimMediaProvider>,
    created_connections: Mutex<Vec<SimPeerConnection>>,
}

/// A cheap, `Clone`-able handle onto one endpoint's fakes. `CallEngine::new`
/// takes its `Environment` by value, so tests keep one clone to drive the
/// fakes (`last_connection`, `backend`, ...) after handing another clone to
/// the engine -- both clones share the same underlying state.
#[derive(Clone)]
pub struct SimEnvironment(Arc<Inner>);

impl SimEnvironment {
    pub fn new(backend: Arc<SimBackend>) -> Self {
        SimEnvironment(Arc::new(Inner {
            backend,
            media: Arc::new(SimMediaProvider::default()),
            created_connections: Mutex::new(Vec::new()),
        }))
    }

    pub fn backend(&self) -> Arc<SimBackend> {
        self.0.backend.clone()
    }

    pub fn media_provider(&self) -> Arc<SimMediaProvider> {
        self.0.media.clone()
    }

    /// The most recently created peer connection. Since `SimPeerConnection`
    /// is a cheap handle to shared state, the returned clone drives the
    /// exact connection the engine is holding (`fire_*` methods).
    pub fn last_connection(&self) -> SimPeerConnection {
        self.0
            .created_connections
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("a connection must have been created first")
    }
}

impl Environment for SimEnvironment {
    type Store = SimBackend;
    type Realtime = SimBackend;
    type Connection = SimPeerConnection;
    type Media = SimMediaProvider;

    fn store(&self) -> Arc<Self::Store> {
        self.0.backend.clone()
    }

    fn realtime(&self) -> Arc<Self::Realtime> {
        self.0.backend.clone()
    }

    fn media(&self) -> Arc<Self::Media> {
        self.0.media.clone()
    }

    fn create_connection(&self, observer: Arc<dyn RtcObserver>) -> Result<Self::Connection> {
        let pc = SimPeerConnection::new(observer);
        self.0.created_connections.lock().unwrap().push(pc.clone());
        Ok(pc)
    }
}
