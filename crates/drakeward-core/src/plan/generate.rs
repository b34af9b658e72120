//! Wyvern prompt construction and response validation.
//!
//! Assembles project context into a system prompt for Wyvern, the
//! authoritative planner agent, which is invoked as a single direct
//! completion (via [`crate::runner`]) rather than a file-editing harness.
//! This module contains pure logic: no I/O, no subprocess spawning.

use crate::plan::parser::PlanParseError;
use crate::plan::toml_format::WyvernPlanToml;
use crate::presets::{self, InvariantPreset};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Context assembled for a Wyvern decomposition prompt.
#[derive(Debug, Clone)]
pub struct GenerateContext {
    /// Work area Wyvern is decomposing (e.g. "auth", "billing").
    pub work_area: String,
    /// Feature name this work area was recommended under, if any.
    pub feature_name: Option<String>,
    /// Wyrm's recommendation for this work area, verbatim.
    pub wyrm_recommendation: String,
    /// Detected project type (e.g. "rust", "node"), if any.
    pub project_type: Option<String>,
    /// Available invariants to reference in the decomposition.
    pub invariants: Vec<InvariantInfo>,
}

/// Simplified invariant description for prompt inclusion.
#[derive(Debug, Clone)]
pub struct InvariantInfo {
    /// Unique invariant name (e.g. `rust_build`).
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Kind: test_suite, typecheck, lint, coverage, custom.
    pub kind: String,
    /// Command to execute.
    pub command: String,
    /// Arguments to pass to the command.
    pub args: Vec<String>,
}

impl From<InvariantPreset> for InvariantInfo {
    fn from(p: InvariantPreset) -> Self {
        Self {
            name: p.name,
            description: p.description,
            kind: p.kind,
            command: p.command,
            args: p.args,
        }
    }
}

// ---------------------------------------------------------------------------
// Invariant presets
// ---------------------------------------------------------------------------

/// Load invariant presets matching a project type.
///
/// If `project_type` is `None` or matches no presets, returns all presets
/// so the prompt includes the full invariant library for Wyvern to choose from.
pub fn invariants_from_presets(project_type: Option<&str>) -> Vec<InvariantInfo> {
    let presets = match project_type {
        Some(pt) => {
            let matched = presets::presets_for_project_type(pt);
            if matched.is_empty() {
                presets::load_presets()
            } else {
                matched
            }
        }
        None => presets::load_presets(),
    };
    presets.into_iter().map(InvariantInfo::from).collect()
}

// ---------------------------------------------------------------------------
// System prompt construction
// ---------------------------------------------------------------------------

/// TOML schema reference included in the system prompt.
const SCHEMA_REFERENCE: &str = r#"## Output Schema

Respond with ONLY a TOML document of this shape, nothing else:

```toml
[plan]
work_area = "string"        # REQUIRED. Echo the work area you were given.
# feature_name = "string"   # Optional. Echo the feature name if one was given.

[[tasks]]
name = "string"              # REQUIRED. Unique task identifier (kebab-case).
description = """             # REQUIRED. Multi-line description for the worker.
Detailed instructions...
"""
scope = "narrow"              # REQUIRED. "narrow", "medium", or "broad".
gate = "auto"                  # REQUIRED. "auto", "human_review", or "human_approve".
# retry_max = 3                # Optional. Max retry attempts (default: 3).
# priority = 0                 # Optional. Higher runs first among ready tasks.
# depends_on = ["other"]       # Optional. Task names this depends on.
invariants = ["name"]          # REQUIRED (should not be empty). Invariant names to check.
# harness = "claude-code"      # Optional. Override the project default harness.

# [[tasks.steps]]               # Optional. Break a large task into ordered steps.
# title = "string"
# description = "string"
```

### Scope levels
- **narrow**: Single file or small change. Use `gate = "auto"`.
- **medium**: Multiple files, one module. Use `gate = "human_review"`.
- **broad**: Cross-cutting changes. Use `gate = "human_approve"`.
"#;

/// Task decomposition guidelines included in the system prompt.
const DECOMPOSITION_GUIDELINES: &str = r#"## Decomposition Guidelines

1. **Prefer narrow tasks.** Each task should touch as few files as possible.
2. **Define types first.** If multiple tasks share types or interfaces, create a task that defines them first and make others depend on it.
3. **Maximize parallelism.** Tasks without dependencies run concurrently.
4. **Write thorough descriptions.** The worker sees ONLY the task description (plus the codebase). Include specific files, function signatures, edge cases, and what NOT to change.
5. **Every task needs invariants.** Tasks without invariants cannot be auto-gated.
6. **Use `depends_on` for data dependencies**, never for ordering preference alone.
7. **Use `steps` for large tasks** so a worker can resume mid-task after a crash without re-reading everything.
8. **Keep task names kebab-case.** They become git branch suffixes.
"#;

/// Build the full Wyvern system prompt.
pub fn build_system_prompt(ctx: &GenerateContext) -> String {
    let mut prompt = String::with_capacity(4096);

    prompt.push_str("# Wyvern: Task Decomposition\n\n");
    prompt.push_str(
        "You are Wyvern, the authoritative task planner for Drakeward. \
         Your job is to decompose a single work area into a dependency-ordered \
         set of tasks that worker agents will execute independently.\n\n",
    );
    prompt.push_str(
        "IMPORTANT: You are writing a decomposition, not implementing the feature. \
         Do NOT create or modify source code files. Your sole deliverable is the \
         TOML document described below.\n\n",
    );

    prompt.push_str(&format!("## Work Area\n\n`{}`\n\n", ctx.work_area));
    if let Some(feature) = &ctx.feature_name {
        prompt.push_str(&format!("Part of feature: **{feature}**\n\n"));
    }

    prompt.push_str("## Wyrm's Recommendation\n\n");
    prompt.push_str(ctx.wyrm_recommendation.trim());
    prompt.push_str("\n\n");

    prompt.push_str(SCHEMA_REFERENCE);
    prompt.push('\n');
    prompt.push_str(DECOMPOSITION_GUIDELINES);
    prompt.push('\n');

    prompt.push_str("## Project Context\n\n");
    match &ctx.project_type {
        Some(pt) => prompt.push_str(&format!("- **Project type:** {pt}\n")),
        None => prompt.push_str("- **Project type:** unknown (could not auto-detect)\n"),
    }

    if ctx.invariants.is_empty() {
        prompt.push_str("- **Available invariants:** none detected\n");
    } else {
        prompt.push_str("\n### Available Invariants\n\n");
        prompt.push_str(
            "Use these names in each task's `invariants` array. \
             Every task should include at least the build and test invariants.\n\n",
        );
        for inv in &ctx.invariants {
            prompt.push_str(&format!(
                "- `{}` ({}) -- {} (`{} {}`)\n",
                inv.name,
                inv.kind,
                inv.description,
                inv.command,
                inv.args.join(" ")
            ));
        }
    }

    prompt
}

// ---------------------------------------------------------------------------
// Response validation
// ---------------------------------------------------------------------------

/// Parse and validate Wyvern's raw text response.
///
/// Strips a leading/trailing Markdown code fence if present (models
/// sometimes wrap TOML output in ```toml fences despite instructions not to).
pub fn parse_wyvern_response(raw: &str) -> Result<WyvernPlanToml, PlanParseError> {
    let trimmed = strip_code_fence(raw.trim());
    crate::plan::parse_plan_toml(trimmed)
}

fn strip_code_fence(s: &str) -> &str {
    let s = s
        .strip_prefix("```toml")
        .or_else(|| s.strip_prefix("```"))
        .unwrap_or(s);
    s.strip_suffix("```").unwrap_or(s).trim()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_invariants() -> Vec<InvariantInfo> {
        vec![
            InvariantInfo {
                name: "rust_build".to_string(),
                description: "Build the workspace".to_string(),
                kind: "typecheck".to_string(),
                command: "cargo".to_string(),
                args: vec!["build".to_string(), "--workspace".to_string()],
            },
            InvariantInfo {
                name: "rust_test".to_string(),
                description: "Run all tests".to_string(),
                kind: "test_suite".to_string(),
                command: "cargo".to_string(),
                args: vec!["test".to_string(), "--workspace".to_string()],
            },
        ]
    }

    fn sample_context() -> GenerateContext {
        GenerateContext {
            work_area: "auth".to_string(),
            feature_name: Some("user authentication".to_string()),
            wyrm_recommendation: "Start by defining the Claims struct.".to_string(),
            project_type: Some("rust".to_string()),
            invariants: sample_invariants(),
        }
    }

    #[test]
    fn prompt_contains_schema_markers() {
        let prompt = build_system_prompt(&sample_context());
        assert!(prompt.contains("Output Schema"));
        assert!(prompt.contains("[plan]"));
        assert!(prompt.contains("[[tasks]]"));
        assert!(prompt.contains("scope ="));
        assert!(prompt.contains("gate ="));
        assert!(prompt.contains("invariants ="));
    }

    #[test]
    fn prompt_contains_decomposition_guidelines() {
        let prompt = build_system_prompt(&sample_context());
        assert!(prompt.contains("Decomposition Guidelines"));
        assert!(prompt.contains("Prefer narrow tasks"));
    }

    #[test]
    fn prompt_includes_invariants() {
        let prompt = build_system_prompt(&sample_context());
        assert!(prompt.contains("rust_build"));
        assert!(prompt.contains("cargo build --workspace"));
    }

    #[test]
    fn prompt_includes_work_area_and_feature() {
        let prompt = build_system_prompt(&sample_context());
        assert!(prompt.contains("`auth`"));
        assert!(prompt.contains("user authentication"));
    }

    #[test]
    fn prompt_includes_wyrm_recommendation() {
        let prompt = build_system_prompt(&sample_context());
        assert!(prompt.contains("Start by defining the Claims struct."));
    }

    #[test]
    fn prompt_handles_empty_invariants() {
        let ctx = GenerateContext {
            invariants: vec![],
            ..sample_context()
        };
        let prompt = build_system_prompt(&ctx);
        assert!(prompt.contains("none detected"));
        assert!(!prompt.contains("Available Invariants"));
    }

    #[test]
    fn prompt_handles_unknown_project_type() {
        let ctx = GenerateContext {
            project_type: None,
            ..sample_context()
        };
        let prompt = build_system_prompt(&ctx);
        assert!(prompt.contains("unknown (could not auto-detect)"));
    }

    #[test]
    fn invariants_for_rust() {
        let invs = invariants_from_presets(Some("rust"));
        let names: Vec<&str> = invs.iter().map(|i| i.name.as_str()).collect();
        assert!(names.contains(&"rust_build"));
        assert!(names.contains(&"rust_test"));
        assert!(names.contains(&"rust_clippy"));
    }

    #[test]
    fn invariants_for_unknown_returns_all() {
        let invs = invariants_from_presets(Some("brainfuck"));
        assert!(invs.len() >= 4, "expected all presets, got {}", invs.len());
    }

    #[test]
    fn invariants_for_none_returns_all() {
        let invs = invariants_from_presets(None);
        assert!(invs.len() >= 4, "expected all presets, got {}", invs.len());
    }

    #[test]
    fn invariant_info_from_preset() {
        let preset = InvariantPreset {
            name: "rust_build".to_string(),
            project_type: "rust".to_string(),
            description: "Build".to_string(),
            kind: "typecheck".to_string(),
            command: "cargo".to_string(),
            args: vec!["build".to_string()],
        };
        let info = InvariantInfo::from(preset);
        assert_eq!(info.name, "rust_build");
        assert_eq!(info.command, "cargo");
    }

    #[test]
    fn parse_wyvern_response_plain() {
        let raw = r#"
[plan]
work_area = "auth"

[[tasks]]
name = "t1"
description = "Do something"
scope = "narrow"
gate = "auto"
invariants = ["check"]
"#;
        let plan = parse_wyvern_response(raw).expect("should parse");
        assert_eq!(plan.plan.work_area, "auth");
    }

    #[test]
    fn parse_wyvern_response_strips_code_fence() {
        let raw = "```toml\n[plan]\nwork_area = \"auth\"\n\n[[tasks]]\nname = \"t1\"\ndescription = \"x\"\nscope = \"narrow\"\ngate = \"auto\"\n```";
        let plan = parse_wyvern_response(raw).expect("should parse");
        assert_eq!(plan.plan.work_area, "auth");
    }
}
