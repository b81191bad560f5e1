/// Default nesting limit applied when decoding transported values.
pub const DEFAULT_MAX_DECODE_DEPTH: usize = 64;

/// Configuration for a [`crate::SubscriptionSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Values nested deeper than this are rejected with `DecodeError::TooDeep`.
    pub max_decode_depth: usize,
    /// Capacity of the outbound transport hint queue. Hints that do not fit
    /// are dropped with a warning.
    pub hint_queue_size: usize,
    /// Seed newly created watches from the connection's last known snapshot.
    pub seed_from_snapshot: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_decode_depth: DEFAULT_MAX_DECODE_DEPTH,
            hint_queue_size: 256,
            seed_from_snapshot: true,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_decode_depth(mut self, depth: usize) -> Self {
        self.max_decode_depth = depth;
        self
    }

    pub fn with_hint_queue_size(mut self, size: usize) -> Self {
        self.hint_queue_size = size;
        self
    }

    pub fn with_seed_from_snapshot(mut self, enabled: bool) -> Self {
        self.seed_from_snapshot = enabled;
        self
    }
}

/// Channel sizing and scheduling for [`crate::SessionRuntime`].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub event_queue_size: usize,
    pub command_queue_size: usize,
    /// Consecutive transport events applied before a waiting command gets
    /// a turn.
    pub event_burst: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_queue_size: 1000,
            command_queue_size: 100,
            event_burst: 64,
        }
    }
}

impl RuntimeConfig {
    pub fn with_event_queue_size(mut self, size: usize) -> Self {
        self.event_queue_size = size;
        self
    }

    pub fn with_command_queue_size(mut self, size: usize) -> Self {
        self.command_queue_size = size;
        self
    }

    pub fn with_event_burst(mut self, burst: usize) -> Self {
        self.event_burst = burst;
        self
    }
}
