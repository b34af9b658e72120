//! Operator-mode CLI handlers for `drakeward invariant` subcommands.
//!
//! Implements:
//! - `drakeward invariant add`           -- create a new invariant definition
//! - `drakeward invariant list`          -- list all invariants in table format
//! - `drakeward invariant test`          -- test-run an invariant in the current directory
//! - `drakeward invariant presets list`  -- list available preset invariants
//! - `drakeward invariant presets install` -- register preset invariants in the database

use anyhow::{Context, Result, bail};
use sqlx::PgPool;

use drakeward_core::invariant::runner::{self, InvariantResult};
use drakeward_core::presets;
use drakeward_db::models::{InvariantKind, InvariantScope};
use drakeward_db::queries::invariants;

use crate::{InvariantCommands, PresetCommands};

// -----------------------------------------------------------------------
// Public entry point
// -----------------------------------------------------------------------

/// Dispatch an `InvariantCommands` variant to the appropriate handler.
pub async fn run_invariant_command(command: InvariantCommands, pool: &PgPool) -> Result<()> {
    match command {
        InvariantCommands::Add {
            name,
            kind,
            command: cmd,
            args,
            description,
            expected_exit_code,
            threshold,
            scope,
            timeout,
        } => {
            cmd_add(
                pool,
                AddParams {
                    name,
                    kind,
                    command: cmd,
                    args,
                    description,
                    expected_exit_code,
                    threshold,
                    scope,
                    timeout,
                },
            )
            .await
        }
        InvariantCommands::List { verbose } => cmd_list(pool, verbose).await,
        InvariantCommands::Test { name } => cmd_test(pool, &name).await,
        InvariantCommands::Presets { command } => match command {
            PresetCommands::List { project_type } => {
                cmd_presets_list(project_type.as_deref())
            }
            PresetCommands::Install { project_type } => {
                cmd_presets_install(pool, project_type.as_deref()).await
            }
        },
    }
}

// -----------------------------------------------------------------------
// drakeward invariant add
// -----------------------------------------------------------------------

/// Grouped parameters for the `add` command to avoid too many function args.
struct AddParams {
    name: String,
    kind: String,
    command: String,
    args: Option<String>,
    description: Option<String>,
    expected_exit_code: i32,
    threshold: Option<f32>,
    scope: String,
    timeout: i32,
}

/// Create a new invariant definition and insert it into the database.
async fn cmd_add(pool: &PgPool, params: AddParams) -> Result<()> {
    // Parse the kind enum.
    let kind: InvariantKind = params.kind.parse().map_err(|_| {
        anyhow::anyhow!(
            "invalid invariant kind {:?}; expected one of: \
             test_suite, typecheck, lint, coverage, custom",
            params.kind,
        )
    })?;

    // Parse the scope enum.
    let scope: InvariantScope = params.scope.parse().map_err(|_| {
        anyhow::anyhow!(
            "invalid invariant scope {:?}; expected one of: global, project",
            params.scope,
        )
    })?;

    // Parse comma-separated args into a Vec<String>.
    let args_vec: Vec<String> = match params.args.as_deref() {
        Some(s) if !s.is_empty() => s.split(',').map(|a| a.to_owned()).collect(),
        _ => Vec::new(),
    };

    let new = invariants::NewInvariant {
        name: &params.name,
        description: params.description.as_deref(),
        kind,
        command: &params.command,
        args: &args_vec,
        expected_exit_code: params.expected_exit_code,
        threshold: params.threshold,
        scope,
        timeout_secs: params.timeout as i64,
    };

    let invariant = invariants::insert_invariant(pool, &new)
        .await
        .with_context(|| {
            format!(
                "failed to add invariant {:?} (is the name already taken?)",
                params.name,
            )
        })?;

    println!("Invariant created:");
    println!("  ID:      {}", invariant.id);
    println!("  Name:    {}", invariant.name);
    println!("  Kind:    {}", invariant.kind);
    println!("  Command: {}", invariant.command);
    if !invariant.args.is_empty() {
        println!("  Args:    {}", invariant.args.join(" "));
    }
    println!("  Scope:   {}", invariant.scope);

    Ok(())
}

// -----------------------------------------------------------------------
// drakeward invariant list
// -----------------------------------------------------------------------

/// List all invariants in a table format, optionally with full details.
async fn cmd_list(pool: &PgPool, verbose: bool) -> Result<()> {
    let invs = invariants::list_invariants(pool).await?;

    if invs.is_empty() {
        println!("No invariants found. Use `drakeward invariant add` to create one.");
        return Ok(());
    }

    if verbose {
        for (i, inv) in invs.iter().enumerate() {
            if i > 0 {
                println!("---");
            }
            println!("Name:              {}", inv.name);
            println!("ID:                {}", inv.id);
            println!("Kind:              {}", inv.kind);
            println!("Command:           {}", inv.command);
            if !inv.args.is_empty() {
                println!("Args:              {}", inv.args.join(" "));
            }
            if let Some(desc) = &inv.description {
                println!("Description:       {}", desc);
            }
            println!("Expected exit:     {}", inv.expected_exit_code);
            if let Some(t) = inv.threshold {
                println!("Threshold:         {}", t);
            }
            println!("Scope:             {}", inv.scope);
            println!("Created:           {}", inv.created_at);
        }
    } else {
        // Table format: fixed-width columns.
        // Compute column widths.
        let name_w = invs.iter().map(|i| i.name.len()).max().unwrap_or(4).max(4);
        let kind_w = invs
            .iter()
            .map(|i| i.kind.to_string().len())
            .max()
            .unwrap_or(4)
            .max(4);
        let cmd_w = invs
            .iter()
            .map(|i| i.command.len())
            .max()
            .unwrap_or(7)
            .max(7);
        let scope_w = invs
            .iter()
            .map(|i| i.scope.to_string().len())
            .max()
            .unwrap_or(5)
            .max(5);

        // Header
        println!(
            "{:<name_w$}  {:<kind_w$}  {:<cmd_w$}  {:<scope_w$}",
            "NAME", "KIND", "COMMAND", "SCOPE",
        );

        // Rows
        for inv in &invs {
            println!(
                "{:<name_w$}  {:<kind_w$}  {:<cmd_w$}  {:<scope_w$}",
                inv.name, inv.kind, inv.command, inv.scope,
            );
        }
    }

    Ok(())
}

// -----------------------------------------------------------------------
// drakeward invariant test <name>
// -----------------------------------------------------------------------

/// Look up an invariant by name, run it in the current working directory,
/// and print the results.
///
/// Exits with code 0 if the invariant passed, or returns an error (which
/// causes the process to exit with code 1) if it failed.
async fn cmd_test(pool: &PgPool, name: &str) -> Result<()> {
    let invariant = invariants::get_invariant_by_name(pool, name)
        .await?
        .with_context(|| format!("invariant {:?} not found", name))?;

    let cwd = std::env::current_dir().context("failed to get current directory")?;

    println!("Running invariant {:?}...", invariant.name);
    println!(
        "  command: {} {}",
        invariant.command,
        invariant.args.join(" "),
    );
    println!("  working directory: {}", cwd.display());
    println!();

    let result: InvariantResult = runner::run_invariant(&invariant, &cwd).await?;

    // Status line
    let status_label = if result.passed { "PASSED" } else { "FAILED" };
    println!("Result: {}", status_label);
    println!(
        "  Exit code: {}",
        result
            .exit_code
            .map_or("unknown (signal)".to_owned(), |c| c.to_string()),
    );
    println!("  Duration:  {}ms", result.duration_ms);

    // Stdout (truncated)
    if !result.stdout.is_empty() {
        println!();
        println!("--- stdout (truncated) ---");
        print_truncated(&result.stdout, 2000);
    }

    // Stderr (truncated)
    if !result.stderr.is_empty() {
        println!();
        println!("--- stderr (truncated) ---");
        print_truncated(&result.stderr, 2000);
    }

    if result.passed {
        Ok(())
    } else {
        bail!(
            "invariant {:?} failed (exit code {:?})",
            name,
            result.exit_code,
        );
    }
}

/// Print `text`, truncating to at most `max_chars` characters.
fn print_truncated(text: &str, max_chars: usize) {
    let trimmed = text.trim();
    if trimmed.len() <= max_chars {
        println!("{}", trimmed);
    } else {
        println!("{}...", &trimmed[..max_chars]);
    }
}

// -----------------------------------------------------------------------
// drakeward invariant presets list [--project-type <type>]
// -----------------------------------------------------------------------

/// List available preset invariants, optionally filtered by project type.
fn cmd_presets_list(project_type_filter: Option<&str>) -> Result<()> {
    let all_presets = presets::load_presets();

    let filtered: Vec<&presets::InvariantPreset> = match project_type_filter {
        Some(pt) => {
            let known = presets::available_project_types();
            if !known.contains(&pt.to_string()) {
                bail!(
                    "unknown project type {:?}; available types: {}",
                    pt,
                    known.join(", ")
                );
            }
            all_presets.iter().filter(|p| p.project_type == pt).collect()
        }
        None => all_presets.iter().collect(),
    };

    if filtered.is_empty() {
        println!("No presets found.");
        return Ok(());
    }

    // Compute column widths.
    let name_w = filtered
        .iter()
        .map(|p| p.name.len())
        .max()
        .unwrap_or(4)
        .max(4);
    let type_w = filtered
        .iter()
        .map(|p| p.project_type.len())
        .max()
        .unwrap_or(4)
        .max(4);
    let kind_w = filtered
        .iter()
        .map(|p| p.kind.len())
        .max()
        .unwrap_or(4)
        .max(4);

    // Header
    println!(
        "{:<name_w$}  {:<type_w$}  {:<kind_w$}  DESCRIPTION",
        "NAME", "TYPE", "KIND",
    );

    // Rows
    for preset in &filtered {
        println!(
            "{:<name_w$}  {:<type_w$}  {:<kind_w$}  {}",
            preset.name, preset.project_type, preset.kind, preset.description,
        );
    }

    println!();
    println!(
        "{} preset(s) available.",
        filtered.len()
    );

    Ok(())
}

// -----------------------------------------------------------------------
// drakeward invariant presets install [--project-type <type>]
// -----------------------------------------------------------------------

/// Detect project type (or use override) and register matching preset
/// invariants in the database. Skips any that already exist.
async fn cmd_presets_install(pool: &PgPool, project_type_override: Option<&str>) -> Result<()> {
    let project_type = match project_type_override {
        Some(pt) => {
            let known = presets::available_project_types();
            if !known.contains(&pt.to_string()) {
                bail!(
                    "unknown project type {:?}; available types: {}",
                    pt,
                    known.join(", ")
                );
            }
            pt.to_string()
        }
        None => {
            let cwd = std::env::current_dir().context("failed to get current directory")?;
            match presets::detect_project_type(&cwd) {
                Some(pt) => {
                    println!("Detected project type: {}", pt);
                    pt
                }
                None => {
                    bail!(
                        "could not detect project type. Use --project-type to specify one of: {}",
                        presets::available_project_types().join(", ")
                    );
                }
            }
        }
    };

    let matching = presets::presets_for_project_type(&project_type);
    if matching.is_empty() {
        println!("No presets defined for project type {:?}.", project_type);
        return Ok(());
    }

    let mut registered = vec![];
    let mut skipped = vec![];

    for preset in &matching {
        let existing = invariants::get_invariant_by_name(pool, &preset.name).await?;
        if existing.is_some() {
            skipped.push(preset.name.clone());
            continue;
        }

        let kind: InvariantKind = preset.kind.parse().map_err(|_| {
            anyhow::anyhow!(
                "preset {:?} has invalid kind {:?}",
                preset.name,
                preset.kind
            )
        })?;

        let new = invariants::NewInvariant {
            name: &preset.name,
            description: Some(&preset.description),
            kind,
            command: &preset.command,
            args: &preset.args,
            expected_exit_code: 0,
            threshold: None,
            scope: InvariantScope::Project,
            timeout_secs: 300,
        };

        invariants::insert_invariant(pool, &new).await?;
        registered.push(preset.name.clone());
    }

    if !registered.is_empty() {
        println!(
            "Registered {} invariant(s): {}",
            registered.len(),
            registered.join(", ")
        );
    }
    if !skipped.is_empty() {
        println!(
            "Skipped {} invariant(s) (already exist): {}",
            skipped.len(),
            skipped.join(", ")
        );
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
