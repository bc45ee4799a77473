//! Process-global worker pool tuning (§6, §9 design note).
//!
//! Unlike a thread-pool-based runtime, tokio's multi-threaded scheduler
//! is configured once, at `Runtime` construction, and cannot be resized
//! afterwards. [`WorkerPoolConfig`] is therefore applied at most once per
//! process: the first server to call [`apply`] wins, and every later
//! caller is told whether its request was honored or silently ignored
//! because a prior server already configured the runtime.
use crate::config::WorkerPoolConfig;
use std::sync::OnceLock;
use tracing::warn;

static APPLIED: OnceLock<WorkerPoolConfig> = OnceLock::new();

/// Records `config` as the process' worker pool tuning if none has been
/// recorded yet. Returns `true` if this call was the one that took
/// effect, `false` if an earlier server already set it (in which case
/// `config` is ignored and a warning is logged when it differs from what
/// is already in effect).
pub fn apply(config: WorkerPoolConfig) -> bool {
    match APPLIED.set(config) {
        Ok(()) => true,
        Err(_) => {
            let existing = *APPLIED.get().expect("OnceLock::set failed implies a value is present");
            if existing != config {
                warn!(
                    ?existing,
                    requested = ?config,
                    "worker pool already configured by an earlier server in this process; ignoring"
                );
            }
            false
        }
    }
}

pub fn current() -> Option<WorkerPoolConfig> {
    APPLIED.get().copied()
}
