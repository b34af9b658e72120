//! Resource Governor: admission control over how many agents of each kind
//! may run concurrently per project.
//!
//! Generalizes the teacher's single `tokio::sync::Semaphore` (which only
//! bounded concurrent Workers within one orchestrator run) into a
//! per-`(project, kind)` atomic counter map shared process-wide.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use uuid::Uuid;

/// The kind of agent an admission request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    Worker,
    Supervisor,
    Wyrm,
    Wyvern,
}

impl AgentKind {
    fn default_limit(self) -> usize {
        1
    }
}

/// Per-project, per-kind concurrency limits. Defaults to 1 of each kind,
/// matching the teacher's single-Semaphore-per-run behavior.
#[derive(Debug, Clone, Copy)]
pub struct GovernorLimits {
    pub max_workers: usize,
    pub max_supervisors: usize,
    pub max_wyrms: usize,
    pub max_wyverns: usize,
}

impl Default for GovernorLimits {
    fn default() -> Self {
        Self {
            max_workers: AgentKind::Worker.default_limit(),
            max_supervisors: AgentKind::Supervisor.default_limit(),
            max_wyrms: AgentKind::Wyrm.default_limit(),
            max_wyverns: AgentKind::Wyvern.default_limit(),
        }
    }
}

impl GovernorLimits {
    fn limit_for(&self, kind: AgentKind) -> usize {
        match kind {
            AgentKind::Worker => self.max_workers,
            AgentKind::Supervisor => self.max_supervisors,
            AgentKind::Wyrm => self.max_wyrms,
            AgentKind::Wyvern => self.max_wyverns,
        }
    }
}

/// Returned by [`ResourceGovernor::admit`] when the caller must not proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitExceeded {
    pub kind: AgentKind,
    pub limit: usize,
}

/// A released admission slot. Dropping it decrements the live count for
/// `(project_id, kind)`. Hold it for the lifetime of the agent.
pub struct AdmissionGuard<'a> {
    governor: &'a ResourceGovernor,
    key: (Uuid, AgentKind),
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        self.governor.release(self.key.0, self.key.1);
    }
}

/// Tracks live per-(project, kind) agent counts and admits or rejects new
/// agent spawns against configured limits.
///
/// Eviction occurs only on normal termination: the caller must hold the
/// returned [`AdmissionGuard`] until the agent exits, whether it succeeded,
/// failed, or was cancelled.
pub struct ResourceGovernor {
    limits: HashMap<Uuid, GovernorLimits>,
    default_limits: GovernorLimits,
    counts: Mutex<HashMap<(Uuid, AgentKind), AtomicUsize>>,
}

impl Default for ResourceGovernor {
    fn default() -> Self {
        Self::new(GovernorLimits::default())
    }
}

impl ResourceGovernor {
    /// Create a governor using `default_limits` for any project without an
    /// explicit override.
    pub fn new(default_limits: GovernorLimits) -> Self {
        Self {
            limits: HashMap::new(),
            default_limits,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Set an explicit limit override for one project.
    pub fn set_project_limits(&mut self, project_id: Uuid, limits: GovernorLimits) {
        self.limits.insert(project_id, limits);
    }

    /// Attempt to admit one agent of `kind` for `project_id`.
    ///
    /// On success, returns an [`AdmissionGuard`] that must be held for the
    /// agent's lifetime; dropping it releases the slot. On failure, returns
    /// [`LimitExceeded`] and the live count is left unchanged.
    pub fn admit(&self, project_id: Uuid, kind: AgentKind) -> Result<AdmissionGuard<'_>, LimitExceeded> {
        let limit = self
            .limits
            .get(&project_id)
            .copied()
            .unwrap_or(self.default_limits)
            .limit_for(kind);

        let mut counts = self.counts.lock().expect("governor counts lock poisoned");
        let counter = counts.entry((project_id, kind)).or_insert_with(|| AtomicUsize::new(0));

        let mut current = counter.load(Ordering::SeqCst);
        loop {
            if current >= limit {
                return Err(LimitExceeded { kind, limit });
            }
            match counter.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }

        Ok(AdmissionGuard {
            governor: self,
            key: (project_id, kind),
        })
    }

    fn release(&self, project_id: Uuid, kind: AgentKind) {
        let counts = self.counts.lock().expect("governor counts lock poisoned");
        if let Some(counter) = counts.get(&(project_id, kind)) {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Current live count for `(project_id, kind)`, for diagnostics/tests.
    pub fn live_count(&self, project_id: Uuid, kind: AgentKind) -> usize {
        let counts = self.counts.lock().expect("governor counts lock poisoned");
        counts
            .get(&(project_id, kind))
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_limit() {
        let governor = ResourceGovernor::default();
        let project = Uuid::new_v4();

        let guard = governor.admit(project, AgentKind::Worker);
        assert!(guard.is_ok());
        assert_eq!(governor.live_count(project, AgentKind::Worker), 1);
    }

    #[test]
    fn rejects_past_limit() {
        let governor = ResourceGovernor::default();
        let project = Uuid::new_v4();

        let _first = governor.admit(project, AgentKind::Worker).unwrap();
        let second = governor.admit(project, AgentKind::Worker);
        assert!(second.is_err());
    }

    #[test]
    fn releasing_guard_frees_slot() {
        let governor = ResourceGovernor::default();
        let project = Uuid::new_v4();

        {
            let _guard = governor.admit(project, AgentKind::Worker).unwrap();
            assert_eq!(governor.live_count(project, AgentKind::Worker), 1);
        }
        assert_eq!(governor.live_count(project, AgentKind::Worker), 0);

        assert!(governor.admit(project, AgentKind::Worker).is_ok());
    }

    #[test]
    fn projects_are_independent() {
        let governor = ResourceGovernor::default();
        let project_a = Uuid::new_v4();
        let project_b = Uuid::new_v4();

        let _guard_a = governor.admit(project_a, AgentKind::Worker).unwrap();
        assert!(governor.admit(project_b, AgentKind::Worker).is_ok());
    }

    #[test]
    fn kinds_have_independent_limits() {
        let governor = ResourceGovernor::default();
        let project = Uuid::new_v4();

        let _worker = governor.admit(project, AgentKind::Worker).unwrap();
        assert!(governor.admit(project, AgentKind::Wyrm).is_ok());
    }

    #[test]
    fn per_project_override_raises_limit() {
        let mut governor = ResourceGovernor::default();
        let project = Uuid::new_v4();
        governor.set_project_limits(
            project,
            GovernorLimits {
                max_workers: 3,
                ..GovernorLimits::default()
            },
        );

        let _a = governor.admit(project, AgentKind::Worker).unwrap();
        let _b = governor.admit(project, AgentKind::Worker).unwrap();
        let _c = governor.admit(project, AgentKind::Worker).unwrap();
        assert!(governor.admit(project, AgentKind::Worker).is_err());
    }
}
