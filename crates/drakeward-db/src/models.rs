use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a project.
///
/// `SpecificationModified` is the one non-monotonic edge: it is reachable
/// from `Analyzed` or later and always returns to `WyrmAssigned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Prototype,
    New,
    WyrmAssigned,
    Analyzed,
    InProgress,
    Completed,
    Failed,
    SpecificationModified,
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Prototype => "prototype",
            Self::New => "new",
            Self::WyrmAssigned => "wyrm_assigned",
            Self::Analyzed => "analyzed",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::SpecificationModified => "specification_modified",
        };
        f.write_str(s)
    }
}

impl FromStr for ProjectStatus {
    type Err = ProjectStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prototype" => Ok(Self::Prototype),
            "new" => Ok(Self::New),
            "wyrm_assigned" => Ok(Self::WyrmAssigned),
            "analyzed" => Ok(Self::Analyzed),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "specification_modified" => Ok(Self::SpecificationModified),
            other => Err(ProjectStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ProjectStatus`] string.
#[derive(Debug, Clone)]
pub struct ProjectStatusParseError(pub String);

impl fmt::Display for ProjectStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid project status: {:?}", self.0)
    }
}

impl std::error::Error for ProjectStatusParseError {}

// ---------------------------------------------------------------------------

/// Execution state of a project, orthogonal to [`ProjectStatus`].
///
/// Only `Running` projects are advanced by the lifecycle tickers.
/// `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Running,
    Paused,
    Suspended,
    Cancelled,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Suspended => "suspended",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for ExecutionState {
    type Err = ExecutionStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "suspended" => Ok(Self::Suspended),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ExecutionStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ExecutionState`] string.
#[derive(Debug, Clone)]
pub struct ExecutionStateParseError(pub String);

impl fmt::Display for ExecutionStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid execution state: {:?}", self.0)
    }
}

impl std::error::Error for ExecutionStateParseError {}

// ---------------------------------------------------------------------------

/// Status of a feature within a specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    New,
    AssignedToWyvern,
    InProgress,
    Completed,
}

impl fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::AssignedToWyvern => "assigned_to_wyvern",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl FromStr for FeatureStatus {
    type Err = FeatureStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "assigned_to_wyvern" => Ok(Self::AssignedToWyvern),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(FeatureStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`FeatureStatus`] string.
#[derive(Debug, Clone)]
pub struct FeatureStatusParseError(pub String);

impl fmt::Display for FeatureStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid feature status: {:?}", self.0)
    }
}

impl std::error::Error for FeatureStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a task.
///
/// Narrower than a typical agent-dispatch state machine: the `Working`
/// status folds together assignment, execution, and gate-checking, since
/// those sub-phases are tracked at finer grain by the task's [`PlanStep`]
/// rows rather than by the task row itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Unassigned,
    NotInitialized,
    Working,
    Done,
    Failed,
    BlockedByFailure,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unassigned => "unassigned",
            Self::NotInitialized => "notinitialized",
            Self::Working => "working",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::BlockedByFailure => "blockedbyfailure",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unassigned" => Ok(Self::Unassigned),
            "notinitialized" => Ok(Self::NotInitialized),
            "working" => Ok(Self::Working),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "blockedbyfailure" => Ok(Self::BlockedByFailure),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a single plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanStepStatus {
    Pending,
    Current,
    Done,
    Failed,
}

impl fmt::Display for PlanStepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Current => "current",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for PlanStepStatus {
    type Err = PlanStepStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "current" => Ok(Self::Current),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(PlanStepStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`PlanStepStatus`] string.
#[derive(Debug, Clone)]
pub struct PlanStepStatusParseError(pub String);

impl fmt::Display for PlanStepStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid plan step status: {:?}", self.0)
    }
}

impl std::error::Error for PlanStepStatusParseError {}

// ---------------------------------------------------------------------------

/// Scope level of a task -- determines the gating strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ScopeLevel {
    Narrow,
    Medium,
    Broad,
}

impl fmt::Display for ScopeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Narrow => "narrow",
            Self::Medium => "medium",
            Self::Broad => "broad",
        };
        f.write_str(s)
    }
}

impl FromStr for ScopeLevel {
    type Err = ScopeLevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "narrow" => Ok(Self::Narrow),
            "medium" => Ok(Self::Medium),
            "broad" => Ok(Self::Broad),
            other => Err(ScopeLevelParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ScopeLevel`] string.
#[derive(Debug, Clone)]
pub struct ScopeLevelParseError(pub String);

impl fmt::Display for ScopeLevelParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid scope level: {:?}", self.0)
    }
}

impl std::error::Error for ScopeLevelParseError {}

// ---------------------------------------------------------------------------

/// Gate policy that determines how a task's completion is verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GatePolicy {
    Auto,
    HumanReview,
    HumanApprove,
}

impl fmt::Display for GatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::HumanReview => "human_review",
            Self::HumanApprove => "human_approve",
        };
        f.write_str(s)
    }
}

impl FromStr for GatePolicy {
    type Err = GatePolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "human_review" => Ok(Self::HumanReview),
            "human_approve" => Ok(Self::HumanApprove),
            other => Err(GatePolicyParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`GatePolicy`] string.
#[derive(Debug, Clone)]
pub struct GatePolicyParseError(pub String);

impl fmt::Display for GatePolicyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid gate policy: {:?}", self.0)
    }
}

impl std::error::Error for GatePolicyParseError {}

// ---------------------------------------------------------------------------

/// Kind of invariant check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvariantKind {
    TestSuite,
    Typecheck,
    Lint,
    Coverage,
    Custom,
}

impl fmt::Display for InvariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TestSuite => "test_suite",
            Self::Typecheck => "typecheck",
            Self::Lint => "lint",
            Self::Coverage => "coverage",
            Self::Custom => "custom",
        };
        f.write_str(s)
    }
}

impl FromStr for InvariantKind {
    type Err = InvariantKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test_suite" => Ok(Self::TestSuite),
            "typecheck" => Ok(Self::Typecheck),
            "lint" => Ok(Self::Lint),
            "coverage" => Ok(Self::Coverage),
            "custom" => Ok(Self::Custom),
            other => Err(InvariantKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`InvariantKind`] string.
#[derive(Debug, Clone)]
pub struct InvariantKindParseError(pub String);

impl fmt::Display for InvariantKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid invariant kind: {:?}", self.0)
    }
}

impl std::error::Error for InvariantKindParseError {}

// ---------------------------------------------------------------------------

/// Scope of an invariant -- global or project-level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvariantScope {
    Global,
    Project,
}

impl fmt::Display for InvariantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Global => "global",
            Self::Project => "project",
        };
        f.write_str(s)
    }
}

impl FromStr for InvariantScope {
    type Err = InvariantScopeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Self::Global),
            "project" => Ok(Self::Project),
            other => Err(InvariantScopeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`InvariantScope`] string.
#[derive(Debug, Clone)]
pub struct InvariantScopeParseError(pub String);

impl fmt::Display for InvariantScopeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid invariant scope: {:?}", self.0)
    }
}

impl std::error::Error for InvariantScopeParseError {}

// ---------------------------------------------------------------------------

/// Failure taxonomy used to decide retry eligibility (see the error
/// handling design notes). Only `Transient` and `ProviderUnavailable`
/// are retry-eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    InvalidInput,
    NotFound,
    Transient,
    ProviderUnavailable,
    Stuck,
    Permanent,
    UserCancel,
}

impl ErrorCategory {
    /// Whether a task/project in this error category should be retried
    /// by the failure-recovery ticker.
    pub fn is_retry_eligible(self) -> bool {
        matches!(self, Self::Transient | Self::ProviderUnavailable)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidInput => "invalid_input",
            Self::NotFound => "not_found",
            Self::Transient => "transient",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::Stuck => "stuck",
            Self::Permanent => "permanent",
            Self::UserCancel => "user_cancel",
        };
        f.write_str(s)
    }
}

impl FromStr for ErrorCategory {
    type Err = ErrorCategoryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invalid_input" => Ok(Self::InvalidInput),
            "not_found" => Ok(Self::NotFound),
            "transient" => Ok(Self::Transient),
            "provider_unavailable" => Ok(Self::ProviderUnavailable),
            "stuck" => Ok(Self::Stuck),
            "permanent" => Ok(Self::Permanent),
            "user_cancel" => Ok(Self::UserCancel),
            other => Err(ErrorCategoryParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ErrorCategory`] string.
#[derive(Debug, Clone)]
pub struct ErrorCategoryParseError(pub String);

impl fmt::Display for ErrorCategoryParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error category: {:?}", self.0)
    }
}

impl std::error::Error for ErrorCategoryParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A project -- the top-level unit of work.
///
/// Renamed and extended from a flat "plan" concept: a project owns a
/// [`Specification`], a set of [`Feature`]s, and one task file per work
/// area, in addition to the workspace/harness settings a plan used to
/// carry alone.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub project_path: String,
    pub base_branch: String,
    pub status: ProjectStatus,
    pub execution_state: ExecutionState,
    pub token_budget: Option<i64>,
    pub default_harness: String,
    pub isolation: String,
    pub container_image: Option<String>,
    pub security_allowlist: Vec<String>,
    pub assigned_planner: Option<String>,
    pub last_processed_hash: Option<String>,
    pub pending_work_areas: Vec<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A specification -- the markdown content a project is built from.
///
/// `content_hash` and `version` back the round-trip law in the testable
/// properties: any content change bumps `version` and appends a row to
/// `specification_history`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Specification {
    pub id: Uuid,
    pub project_id: Uuid,
    pub content: String,
    pub content_hash: String,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One append-only entry in a specification's edit history.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SpecificationHistoryEntry {
    pub id: Uuid,
    pub specification_id: Uuid,
    pub version: i32,
    pub content_hash: String,
    pub recorded_at: DateTime<Utc>,
}

/// A named sub-requirement within a specification.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Feature {
    pub id: Uuid,
    pub specification_id: Uuid,
    pub name: String,
    pub description: String,
    pub status: FeatureStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A task -- a unit of work within a project's task file.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub work_area: String,
    pub feature_id: Option<Uuid>,
    pub name: String,
    pub description: String,
    pub scope_level: ScopeLevel,
    pub gate_policy: GatePolicy,
    pub retry_max: i32,
    pub status: TaskStatus,
    pub priority: i32,
    pub dependency_level: i32,
    pub requested_harness: Option<String>,
    pub assigned_harness: Option<String>,
    pub worktree_path: Option<String>,
    pub attempt: i32,
    pub specification_version: Option<i32>,
    pub error_message: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub commit_sha: Option<String>,
    pub changed_files: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// An edge in the task dependency DAG.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskDependency {
    pub task_id: Uuid,
    pub depends_on: Uuid,
}

/// One step of a task's plan.
///
/// Exactly one step per task may be `Current` at a time; see
/// [`PlanStepStatus`].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlanStep {
    pub id: Uuid,
    pub task_id: Uuid,
    pub ordinal: i32,
    pub title: String,
    pub description: String,
    pub status: PlanStepStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A reusable invariant definition.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invariant {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub kind: InvariantKind,
    pub command: String,
    pub args: Vec<String>,
    pub expected_exit_code: i32,
    pub threshold: Option<f32>,
    pub scope: InvariantScope,
    pub timeout_secs: i64,
    pub created_at: DateTime<Utc>,
}

/// Join row linking a task to an invariant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskInvariant {
    pub task_id: Uuid,
    pub invariant_id: Uuid,
}

/// Result of running an invariant gate check.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GateResult {
    pub id: Uuid,
    pub task_id: Uuid,
    pub invariant_id: Uuid,
    pub attempt: i32,
    pub passed: bool,
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub duration_ms: Option<i32>,
    pub checked_at: DateTime<Utc>,
}

/// An event recorded from an agent's execution stream.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AgentEvent {
    pub id: i64,
    pub task_id: Uuid,
    pub attempt: i32,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
