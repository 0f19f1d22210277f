use std::sync::Arc;

use crate::geo::directions::Directions;
use crate::observability::metrics::Metrics;
use crate::store::memory::MemoryBackend;

pub struct AppState {
    pub backend: Arc<MemoryBackend>,
    pub directions: Option<Arc<dyn Directions>>,
}

impl AppState {
    pub fn new(event_buffer_size: usize) -> Self {
        Self {
            backend: Arc::new(MemoryBackend::new(event_buffer_size, Metrics::new())),
            directions: None,
        }
    }

    pub fn with_directions(mut self, directions: Arc<dyn Directions>) -> Self {
        self.directions = Some(directions);
        self
    }

    pub fn metrics(&self) -> &Metrics {
        self.backend.metrics()
    }
}
