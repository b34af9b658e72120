//! Shared test helpers for `drakeward-cli`.

use std::sync::{Mutex, MutexGuard};

/// Serializes tests that mutate process environment variables
/// (`DRAKEWARD_AGENT_TOKEN`, `DATABASE_URL`, config-path overrides), which
/// would otherwise race across the crate's parallel test threads.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

pub fn lock_env() -> MutexGuard<'static, ()> {
    match ENV_MUTEX.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
