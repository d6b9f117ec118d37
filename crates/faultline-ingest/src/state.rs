use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use faultline_core::store::EventStore;
use faultline_harness::throttle::ThrottleGate;
use faultline_types::IngestTaskMessage;

use crate::dedup::EventDedup;

/// Shared state for the ingest HTTP surface (spec §5 "network tier").
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<EventStore>,
    pub throttle: Arc<ThrottleGate>,
    pub dedup: Arc<EventDedup>,
    pub sender: flume::Sender<IngestTaskMessage>,
    pub maintenance_freeze: Arc<AtomicBool>,
    pub max_request_bytes: usize,
}

impl AppState {
    pub fn new(
        store: Arc<EventStore>,
        throttle: Arc<ThrottleGate>,
        dedup: Arc<EventDedup>,
        sender: flume::Sender<IngestTaskMessage>,
        max_request_bytes: usize,
    ) -> Self {
        Self {
            store,
            throttle,
            dedup,
            sender,
            maintenance_freeze: Arc::new(AtomicBool::new(false)),
            max_request_bytes,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.maintenance_freeze.load(Ordering::Relaxed)
    }

    pub fn set_frozen(&self, frozen: bool) {
        self.maintenance_freeze.store(frozen, Ordering::Relaxed);
    }
}
