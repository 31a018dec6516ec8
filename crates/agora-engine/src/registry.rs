//! Per-run cancellation state. An explicit instance shared by reference,
//! never process-wide state.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type AbortFn = Box<dyn Fn() + Send + Sync>;

struct RunControl {
    secret: String,
    cancelled: bool,
    signal: CancellationToken,
    abort: Option<AbortFn>,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

/// Handed to the party that started the run; holding the secret is what
/// authorizes cancellation.
#[derive(Debug, Clone)]
pub struct RunTicket {
    pub secret: String,
    pub signal: CancellationToken,
}

/// Tracks live runs and mediates cancellation by run id + secret.
#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<String, RunControl>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run and mint its cancellation secret.
    pub fn register(&self, run_id: &str) -> RunTicket {
        let secret = new_secret();
        let signal = CancellationToken::new();
        self.runs.lock().unwrap().insert(
            run_id.to_string(),
            RunControl {
                secret: secret.clone(),
                cancelled: false,
                signal: signal.clone(),
                abort: None,
                created_at: Utc::now(),
            },
        );
        debug!(run_id, "run registered");
        RunTicket { secret, signal }
    }

    /// Attach a callback fired when the run is cancelled.
    pub fn attach_abort(&self, run_id: &str, abort: impl Fn() + Send + Sync + 'static) {
        if let Some(control) = self.runs.lock().unwrap().get_mut(run_id) {
            control.abort = Some(Box::new(abort));
        }
    }

    /// Cancel a run. Succeeds only when the secret matches; a wrong secret
    /// changes nothing. The abort callback fires at most once, after the
    /// registry lock is released, so it may call back into the registry.
    pub fn cancel(&self, run_id: &str, secret: &str) -> bool {
        let abort = {
            let mut runs = self.runs.lock().unwrap();
            let Some(control) = runs.get_mut(run_id) else {
                return false;
            };
            if control.secret != secret {
                warn!(run_id, "cancel refused: secret mismatch");
                return false;
            }
            control.cancelled = true;
            control.signal.cancel();
            control.abort.take()
        };
        if let Some(abort) = abort {
            abort();
        }
        debug!(run_id, "run cancelled");
        true
    }

    pub fn is_cancelled(&self, run_id: &str) -> bool {
        self.runs
            .lock()
            .unwrap()
            .get(run_id)
            .map(|c| c.cancelled)
            .unwrap_or(false)
    }

    /// The run's cancellation token, for threading into backend calls.
    pub fn signal(&self, run_id: &str) -> Option<CancellationToken> {
        self.runs.lock().unwrap().get(run_id).map(|c| c.signal.clone())
    }

    /// Drop the run's control entry once it has finished.
    pub fn complete(&self, run_id: &str) {
        self.runs.lock().unwrap().remove(run_id);
        debug!(run_id, "run completed");
    }

    pub fn len(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.lock().unwrap().is_empty()
    }
}

fn new_secret() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_secret_is_32_hex_chars() {
        let registry = RunRegistry::new();
        let ticket = registry.register("r1");
        assert_eq!(ticket.secret.len(), 32);
        assert!(ticket.secret.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_cancel_requires_matching_secret() {
        let registry = RunRegistry::new();
        let ticket = registry.register("r1");

        assert!(!registry.cancel("r1", "wrong-secret"));
        assert!(!registry.is_cancelled("r1"));
        assert!(!ticket.signal.is_cancelled());

        assert!(registry.cancel("r1", &ticket.secret));
        assert!(registry.is_cancelled("r1"));
        assert!(ticket.signal.is_cancelled());
    }

    #[test]
    fn test_cancel_fires_abort_callback() {
        let registry = RunRegistry::new();
        let ticket = registry.register("r1");
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        registry.attach_abort("r1", move || flag.store(true, Ordering::SeqCst));

        registry.cancel("r1", &ticket.secret);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_abort_callback_may_reenter_registry() {
        let registry = Arc::new(RunRegistry::new());
        let ticket = registry.register("r1");
        let observed = Arc::new(AtomicBool::new(false));
        let inner = registry.clone();
        let flag = observed.clone();
        registry.attach_abort("r1", move || {
            // Deadlocks if cancel still holds the runs lock here.
            flag.store(inner.is_cancelled("r1"), Ordering::SeqCst);
        });

        assert!(registry.cancel("r1", &ticket.secret));
        assert!(observed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancel_unknown_run_is_false() {
        let registry = RunRegistry::new();
        assert!(!registry.cancel("ghost", "anything"));
        assert!(!registry.is_cancelled("ghost"));
    }

    #[test]
    fn test_complete_removes_entry() {
        let registry = RunRegistry::new();
        let ticket = registry.register("r1");
        assert_eq!(registry.len(), 1);
        registry.complete("r1");
        assert!(registry.is_empty());
        assert!(registry.signal("r1").is_none());
        // Stale secrets stop working once the run is gone.
        assert!(!registry.cancel("r1", &ticket.secret));
    }
}
