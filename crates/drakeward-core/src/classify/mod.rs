//! Error classification and retry backoff.
//!
//! Generalizes the teacher's `invariant::runner` timeout-vs-exit-code
//! distinction and the orchestrator's ad hoc lifecycle-error handling into a
//! single classification function and a single backoff schedule, reused by
//! every retry site (the gate evaluator, the lifecycle timeout path, and the
//! failure-recovery ticker).

use std::time::Duration;

use drakeward_db::models::ErrorCategory;

/// Classify a raw error message into an [`ErrorCategory`].
///
/// This is a best-effort text classifier: Harnesses and Providers do not
/// return typed errors, only strings (from subprocess stderr, or HTTP
/// response bodies), so the classifier pattern-matches on well-known
/// substrings. Anything unrecognized is treated as `Permanent` -- refusing
/// to retry is the safe default for an error we can't explain.
pub fn classify_error(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();

    if lower.contains("cancelled") || lower.contains("canceled") {
        return ErrorCategory::UserCancel;
    }
    if lower.contains("circuit") && lower.contains("open") {
        return ErrorCategory::ProviderUnavailable;
    }
    if lower.contains("stuck") || lower.contains("inactivity") {
        return ErrorCategory::Stuck;
    }
    if lower.contains("timed out") || lower.contains("timeout") {
        return ErrorCategory::Transient;
    }
    if lower.contains("connection")
        || lower.contains("network")
        || lower.contains("reset by peer")
        || lower.contains("502")
        || lower.contains("503")
        || lower.contains("504")
    {
        return ErrorCategory::Transient;
    }
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("overloaded") {
        return ErrorCategory::Transient;
    }
    if lower.contains("not found") {
        return ErrorCategory::NotFound;
    }
    if lower.contains("invalid") || lower.contains("bad request") || lower.contains("schema") {
        return ErrorCategory::InvalidInput;
    }

    ErrorCategory::Permanent
}

/// Maximum retry attempts before a task is left permanently `Failed`.
pub const MAX_RETRY_ATTEMPTS: i32 = 5;

/// Compute the delay before the next retry attempt, given the attempt
/// number that just failed (1-indexed: the first failure is attempt 1).
///
/// The first retry is scheduled 60s out; subsequent retries back off
/// exponentially (60s, 120s, 240s, 480s, ...), capped at 1 hour.
pub fn retry_delay(attempt: i32) -> Duration {
    let attempt = attempt.max(1) as u32;
    let secs = 60u64.saturating_mul(1u64 << (attempt - 1).min(10));
    Duration::from_secs(secs.min(3600))
}
