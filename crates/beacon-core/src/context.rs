//! Execution context shared with the sensing subsystem.
//!
//! Links sensing components to platform facilities: a boot identity for log
//! correlation and named logging sinks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug_span, Span};
use uuid::Uuid;

/// Platform context handed to the payload supplier and sensing subsystem.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    boot_id: Uuid,
    booted_at: DateTime<Utc>,
}

impl ExecutionContext {
    /// Create a context for the current boot.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            boot_id: Uuid::new_v4(),
            booted_at: Utc::now(),
        })
    }

    /// Identifier unique to this boot cycle.
    #[must_use]
    pub const fn boot_id(&self) -> Uuid {
        self.boot_id
    }

    /// Wall-clock time the context was created.
    #[must_use]
    pub const fn booted_at(&self) -> DateTime<Utc> {
        self.booted_at
    }

    /// A logging sink for one subsystem/category pair.
    ///
    /// Events recorded inside the returned span carry both names and the boot id.
    #[must_use]
    pub fn logging_sink(&self, subsystem: &'static str, category: &'static str) -> Span {
        debug_span!("sink", subsystem, category, boot_id = %self.boot_id)
    }
}
