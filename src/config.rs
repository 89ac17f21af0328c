use crate::storage::backend::TransactionMode;
use std::time::Duration;

/// Storage mechanisms in the order they are probed when connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Ordered key-range cursor store.
    Ordered,
    /// Relational store driven by SQL text.
    Relational,
    /// Flat key-value store without native cursors.
    Flat,
    /// In-process ordered store.
    Memory,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Ordered => "ordered",
            BackendKind::Relational => "relational",
            BackendKind::Flat => "flat",
            BackendKind::Memory => "memory",
        }
    }

    /// Whether queries against this backend compile to SQL text.
    pub fn prefers_sql(self) -> bool {
        matches!(self, BackendKind::Relational)
    }
}

pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 1000;

/// Runtime configuration for a [`crate::Storage`] connection.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Pending transaction requests kept while the connection is not ready.
    /// Past this depth the oldest request is dropped.
    pub max_queue_depth: usize,
    /// Pushing onto a queue that has not moved for this long logs a warning.
    pub queue_stall_warning: Duration,
    pub preference: Vec<BackendKind>,
    pub default_mode: TransactionMode,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
            queue_stall_warning: Duration::from_millis(3000),
            preference: vec![
                BackendKind::Ordered,
                BackendKind::Relational,
                BackendKind::Flat,
                BackendKind::Memory,
            ],
            default_mode: TransactionMode::ReadOnly,
        }
    }
}

impl StorageConfig {
    /// Short stall warning and a small queue so starvation shows up early.
    pub fn development() -> Self {
        Self {
            max_queue_depth: 100,
            queue_stall_warning: Duration::from_millis(500),
            ..Self::default()
        }
    }

    pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    pub fn with_preference(mut self, preference: Vec<BackendKind>) -> Self {
        self.preference = preference;
        self
    }

    pub fn with_queue_stall_warning(mut self, after: Duration) -> Self {
        self.queue_stall_warning = after;
        self
    }
}
