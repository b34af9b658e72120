//! Gate verdict evaluator: translates a [`GateVerdict`] into a concrete
//! [`GateAction`] based on the task's gate policy and retry eligibility.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use drakeward_db::models::GatePolicy;
use drakeward_db::queries::tasks as task_db;

use crate::classify::classify_error;
use crate::state::dispatch;

use super::{GateFailure, GateVerdict};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The action to take after evaluating a gate verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateAction {
    /// All invariants passed and the task has been transitioned to `passed`.
    AutoPassed,
    /// One or more invariants failed and the task has been transitioned to
    /// `failed`.
    AutoFailed {
        /// Whether the task is eligible for another retry.
        can_retry: bool,
    },
    /// The task's gate policy requires human intervention. The task remains
    /// in `checking` state.
    HumanRequired,
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Evaluate a gate verdict for a task and take the appropriate action.
///
/// Behavior depends on the task's `gate_policy`:
///
/// - **`auto`**: Automatically transition the task to `done` or `failed`
///   based on the verdict. When failing, checks retry eligibility and
///   records an [`ErrorCategory`] accordingly.
/// - **`human_review`** / **`human_approve`**: Leave the task in `working`
///   state and return [`GateAction::HumanRequired`].
pub async fn evaluate_verdict(
    pool: &PgPool,
    task_id: Uuid,
    verdict: &GateVerdict,
) -> Result<GateAction> {
    let task = task_db::get_task(pool, task_id)
        .await?
        .with_context(|| format!("task {} not found", task_id))?;

    match task.gate_policy {
        GatePolicy::Auto => match verdict {
            GateVerdict::Passed => {
                dispatch::complete_task(pool, task_id).await?;
                Ok(GateAction::AutoPassed)
            }
            GateVerdict::Failed { failures } => {
                let message = summarize_failures(failures);
                let category = classify_error(&message);
                let can_retry = category.is_retry_eligible() && task.attempt < task.retry_max;
                dispatch::fail_task(pool, task_id, &message, category).await?;
                Ok(GateAction::AutoFailed { can_retry })
            }
        },
        GatePolicy::HumanReview | GatePolicy::HumanApprove => {
            // Leave the task in working state for human decision.
            Ok(GateAction::HumanRequired)
        }
    }
}

/// Build a one-line summary of gate failures for the task's error_message.
fn summarize_failures(failures: &[GateFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} (exit {:?})", f.invariant_name, f.exit_code))
        .collect::<Vec<_>>()
        .join("; ")
}
