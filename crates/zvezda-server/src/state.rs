use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use zvezda_core::{ActuationRegistry, AuthGate};

/// How long a request may wait for a verification slot before it is shed.
pub const DEFAULT_VERIFICATION_WAIT: Duration = Duration::from_secs(2);

/// Concurrent Argon2 verifications allowed by default: one per core, but at
/// least four so a browser's parallel page load is never shed.
fn default_verification_limit() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(4)
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ActuationRegistry>,
    pub gate: Arc<AuthGate>,
    /// Each Argon2 verification allocates its full memory cost, so the number
    /// in flight is capped.
    pub verifications: Arc<Semaphore>,
    pub verification_wait: Duration,
}

impl AppState {
    pub fn new(registry: ActuationRegistry, gate: AuthGate) -> Self {
        Self {
            registry: Arc::new(registry),
            gate: Arc::new(gate),
            verifications: Arc::new(Semaphore::new(default_verification_limit())),
            verification_wait: DEFAULT_VERIFICATION_WAIT,
        }
    }

    /// Replace the verification limit. `permits` is clamped to at least one.
    pub fn with_verification_limit(mut self, permits: usize, wait: Duration) -> Self {
        self.verifications = Arc::new(Semaphore::new(permits.max(1)));
        self.verification_wait = wait;
        self
    }
}
