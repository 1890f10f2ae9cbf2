use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FastCGIConnectionID(pub u64);

/// Hands out ids used to correlate log lines and template metadata with the
/// FastCGI connection a request arrived on.
#[derive(Debug)]
pub struct FastCGIConnectionIDFactory {
    next_connection_id: AtomicU64,
}

impl FastCGIConnectionIDFactory {
    pub fn new() -> Self {
        Self {
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn new_connection_id(&self) -> FastCGIConnectionID {
        FastCGIConnectionID(self.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }
}
