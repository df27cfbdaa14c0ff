//! System orchestration: shared state, backend and mapping threads.

pub mod backend;
pub mod mapping;
pub mod shared_state;

pub use backend::{Backend, BackendStats, LoopClosureEvent};
pub use mapping::Mapping;
pub use shared_state::SharedState;

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use tracing::info;

use crate::frontend::Frontend;

const EVENT_QUEUE_CAPACITY: usize = 16;

/// Owns the shared state and the backend/mapping threads.
///
/// Loop-closure events are queued on a bounded channel and handled strictly
/// in arrival order by the single backend thread.
pub struct System {
    shared: Arc<SharedState>,
    frontend: Arc<Frontend>,
    events: Sender<LoopClosureEvent>,
    backend_handle: JoinHandle<()>,
    mapping_handle: JoinHandle<()>,
}

impl System {
    pub fn start() -> Self {
        let shared = Arc::new(SharedState::new());
        let frontend = Arc::new(Frontend::new());
        let (events, receiver) = crossbeam_channel::bounded(EVENT_QUEUE_CAPACITY);

        let backend = Backend::new(shared.clone(), frontend.clone());
        let backend_handle = std::thread::spawn(move || backend.run(receiver));

        let mut mapping = Mapping::new(shared.clone());
        let mapping_handle = std::thread::spawn(move || mapping.run());

        info!("slam system started");
        Self {
            shared,
            frontend,
            events,
            backend_handle,
            mapping_handle,
        }
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn frontend(&self) -> &Arc<Frontend> {
        &self.frontend
    }

    /// Queue a loop-closure event for the backend. Blocks while the queue is
    /// full; fails only if the backend thread is gone.
    pub fn notify_loop_closure(&self, event: LoopClosureEvent) -> anyhow::Result<()> {
        self.events
            .send(event)
            .map_err(|_| anyhow::anyhow!("backend thread is no longer running"))
    }

    /// Stop both worker threads and wait for them.
    pub fn shutdown(self) {
        let System {
            shared,
            frontend: _,
            events,
            backend_handle,
            mapping_handle,
        } = self;
        shared.request_shutdown();
        drop(events);
        // a worker panic (e.g. atlas/map desync) must not look like a clean
        // shutdown
        if let Err(payload) = backend_handle.join() {
            std::panic::resume_unwind(payload);
        }
        if let Err(payload) = mapping_handle.join() {
            std::panic::resume_unwind(payload);
        }
        info!("slam system stopped");
    }
}
