use std::time::Duration;

/// Tunables for the workflow engine and session lifecycle.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Items per checkpointable batch.
    pub batch_size: u32,
    /// Maximum number of heal restarts before a failure turns fatal.
    pub max_heal_depth: u32,
    /// Consecutive session errors before an unconditional recover.
    pub max_consecutive_errors: u32,
    /// Sessions older than this fail the health probe and are recycled.
    pub session_max_age: Duration,
    /// Upper bound on the trivial-evaluation health probe.
    pub health_probe_timeout: Duration,
    /// Upper bound on a single page navigation.
    pub navigation_timeout: Duration,
    /// How long to wait for a manual security challenge to be cleared.
    /// `Duration::ZERO` means wait indefinitely: an operator may need
    /// unbounded time to resolve a challenge by hand before automation
    /// can resume. This is a deliberate escape hatch.
    pub challenge_timeout: Duration,
    /// How often to re-check whether a pending challenge was cleared.
    pub challenge_poll_interval: Duration,
    /// Buffer size of the heal supervisor's restart queue.
    pub supervisor_buffer: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_heal_depth: 3,
            max_consecutive_errors: 5,
            session_max_age: Duration::from_secs(30 * 60),
            health_probe_timeout: Duration::from_secs(5),
            navigation_timeout: Duration::from_secs(30),
            challenge_timeout: Duration::ZERO,
            challenge_poll_interval: Duration::from_secs(5),
            supervisor_buffer: 16,
        }
    }
}

impl HarvestConfig {
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_heal_depth(mut self, depth: u32) -> Self {
        self.max_heal_depth = depth;
        self
    }

    pub fn with_max_consecutive_errors(mut self, threshold: u32) -> Self {
        self.max_consecutive_errors = threshold;
        self
    }

    pub fn with_session_max_age(mut self, age: Duration) -> Self {
        self.session_max_age = age;
        self
    }

    pub fn with_challenge_timeout(mut self, timeout: Duration) -> Self {
        self.challenge_timeout = timeout;
        self
    }
}
