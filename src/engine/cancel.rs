use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Cooperative cancellation flag for one run. The orchestrator checks it at
/// every step boundary; a tool call already in flight always completes and is
/// recorded before cancellation is honored.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Run-id keyed token table shared between the lifecycle surface and the
/// per-run worker threads.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    tokens: Mutex<BTreeMap<String, CancelToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, CancelToken>> {
        self.tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn token(&self, run_id: &str) -> CancelToken {
        self.lock().entry(run_id.to_string()).or_default().clone()
    }

    pub fn request(&self, run_id: &str) {
        self.token(run_id).cancel();
    }

    pub fn clear(&self, run_id: &str) {
        self.lock().remove(run_id);
    }
}
