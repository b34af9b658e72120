mod agent;
mod cleanup_cmd;
mod config;
mod dispatch_cmd;
mod engine_cmd;
mod export_cmd;
mod gate_cmd;
mod invariant_cmds;
mod log_cmd;
mod merge_cmd;
mod project_cmds;
mod report_cmd;
mod resolve;
mod serve_cmd;
mod status_cmd;
#[cfg(test)]
mod test_util;
mod tui;

use anyhow::Context;
use clap::{Parser, Subcommand};

use drakeward_core::token::guard;
use drakeward_db::pool;

use config::DrakewardConfig;

#[derive(Parser)]
#[command(name = "drakeward", about = "LLM coding agent fleet orchestrator")]
struct Cli {
    /// Database URL (overrides DRAKEWARD_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a drakeward config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/drakeward")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the drakeward database (requires config file or env vars)
    DbInit,
    /// Project management
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Invariant management
    Invariant {
        #[command(subcommand)]
        command: InvariantCommands,
    },
    /// Dispatch a project for execution
    Dispatch {
        /// Project ID to dispatch
        project_id: String,
        /// Maximum number of concurrent agents
        #[arg(long, default_value_t = 4)]
        max_agents: usize,
        /// Timeout per task in seconds
        #[arg(long, default_value_t = 1800)]
        timeout: u64,
    },
    /// Show project status and task progress (omit project_id to list all projects)
    Status {
        /// Project ID to show status for (omit to list all projects)
        project_id: Option<String>,
    },
    /// Show agent event log for a task
    Log {
        /// Task ID to show events for
        task_id: String,
        /// Filter to a specific attempt number
        #[arg(long)]
        attempt: Option<i32>,
    },
    /// Approve a task awaiting human review
    Approve {
        /// Task ID to approve
        task_id: String,
    },
    /// Reject a task awaiting human review (sends to failed for retry/escalation)
    Reject {
        /// Task ID to reject
        task_id: String,
    },
    /// Retry a failed or blocked task
    Retry {
        /// Task ID to retry
        task_id: String,
        /// Override retry_max limit
        #[arg(long)]
        force: bool,
    },
    /// View gate results for a task
    Gate {
        /// Task ID to view gate results for
        task_id: String,
    },
    /// Show token usage and duration report for a project
    Report {
        /// Project ID to report on
        project_id: String,
    },
    /// Remove worktrees for completed tasks in a project
    Cleanup {
        /// Project ID to clean up
        project_id: String,
        /// Remove worktrees for all tasks (not just done)
        #[arg(long)]
        all: bool,
    },
    /// Merge completed task branches into the base branch
    Merge {
        /// Project ID to merge
        project_id: String,
        /// Show what would be merged without doing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Export task data as CSV
    Export {
        /// Project ID to export (omit to export every project)
        project_id: Option<String>,
        /// Output file path (defaults to stdout)
        #[arg(long)]
        output: Option<String>,
    },
    /// Serve the read-only operator HTTP API
    Serve {
        /// Address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8420)]
        port: u16,
    },
    /// Run the Lifecycle Engine: automatically advance every running
    /// project through New -> WyrmAssigned -> Analyzed -> InProgress -> Done
    Engine {
        /// Repository root the shared isolation backend operates under
        /// (defaults to the config file's projects_path, or the current directory)
        #[arg(long)]
        projects_path: Option<String>,
        /// Model name passed to the direct-call provider used by Wyrm/Wyvern
        #[arg(long, default_value = "claude-sonnet-4-5")]
        model: String,
    },
    /// Launch interactive TUI dashboard
    Dashboard,
    /// Read your assigned task (agent mode)
    Task,
    /// Run invariants for your task (agent mode)
    Check,
    /// Report progress (agent mode)
    Progress {
        /// Progress message to report
        message: String,
    },
    /// Signal task completion (agent mode)
    Done,
}

#[derive(Subcommand)]
pub enum ProjectCommands {
    /// Create a project and its initial specification from a TOML file
    Create {
        /// Path to the project TOML file
        file: String,
    },
    /// Show project details (or list all projects)
    Show {
        /// Project ID to show (omit to list all)
        project_id: Option<String>,
    },
    /// Approve a project for execution (prototype -> new)
    Approve {
        /// Project ID to approve
        project_id: String,
    },
    /// Export a project registry entry as JSON
    Export {
        /// Project ID to export
        project_id: String,
        /// Output file path (merges with existing entries if present)
        #[arg(long)]
        output: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum InvariantCommands {
    /// Add a new invariant definition
    Add {
        /// Unique invariant name (e.g. rust_build)
        name: String,
        /// Kind of invariant: test_suite, typecheck, lint, coverage, custom
        #[arg(long)]
        kind: String,
        /// Command to execute (e.g. "cargo")
        #[arg(long)]
        command: String,
        /// Comma-separated arguments (e.g. "build,--workspace")
        #[arg(long)]
        args: Option<String>,
        /// Human-readable description
        #[arg(long)]
        description: Option<String>,
        /// Expected exit code (default: 0)
        #[arg(long, default_value_t = 0)]
        expected_exit_code: i32,
        /// Numeric threshold (e.g. coverage percentage)
        #[arg(long)]
        threshold: Option<f32>,
        /// Scope: global or project (default: project)
        #[arg(long, default_value = "project")]
        scope: String,
        /// Timeout in seconds (default: 300)
        #[arg(long, default_value_t = 300)]
        timeout: i32,
    },
    /// List all invariants
    List {
        /// Show full details for each invariant
        #[arg(long)]
        verbose: bool,
    },
    /// Test-run an invariant in the current directory
    Test {
        /// Invariant name to test
        name: String,
    },
    /// Preset invariant bundles
    Presets {
        #[command(subcommand)]
        command: PresetCommands,
    },
}

#[derive(Subcommand)]
pub enum PresetCommands {
    /// List available preset invariants
    List {
        /// Filter to a specific project type (e.g. rust, node)
        #[arg(long)]
        project_type: Option<String>,
    },
    /// Register preset invariants in the database
    Install {
        /// Restrict installation to a specific project type
        #[arg(long)]
        project_type: Option<String>,
    },
}

/// Execute the `drakeward init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let token_secret = config::generate_token_secret();

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        auth: config::AuthSection {
            token_secret: token_secret.clone(),
        },
        default_provider: None,
        projects_path: None,
        limits: config::LimitsSection::default(),
        planning: config::PlanningSection::default(),
        iterations: config::IterationsSection::default(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  auth.token_secret = {}...{}", &token_secret[..8], &token_secret[56..]);
    println!();
    println!("Next: run `drakeward db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `drakeward db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = DrakewardConfig::resolve(cli_db_url)?;

    println!("Initializing drakeward database...");

    // 1. Create the database if it does not exist.
    pool::ensure_database_exists(&resolved.db_config).await?;

    // 2. Connect to the target database.
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    // 3. Run migrations.
    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    // 4. Print success with table counts.
    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    // 5. Clean shutdown.
    db_pool.close().await;

    println!("drakeward db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // -----------------------------------------------------------------
    // Agent-mode detection: if DRAKEWARD_AGENT_TOKEN is set, restrict the
    // command surface to the four agent-mode commands.
    // -----------------------------------------------------------------
    if guard::is_agent_mode() {
        // Resolve config for DB URL (best-effort).
        let db_config = DrakewardConfig::resolve(cli.database_url.as_deref())
            .map(|c| c.db_config)
            .unwrap_or_else(|_| drakeward_db::config::DbConfig::from_env());

        let pool_result = pool::create_pool(&db_config).await;
        let pool = pool_result.ok();

        let result = agent::run_agent_mode(cli.command, pool.as_ref()).await;

        // Clean shutdown if we have a pool.
        if let Some(p) = pool {
            p.close().await;
        }

        if let Err(e) = result {
            eprintln!("{e:#}");
            std::process::exit(1);
        }
        return Ok(());
    }

    // -----------------------------------------------------------------
    // Operator mode (default): full command surface.
    // -----------------------------------------------------------------
    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Project { command } => {
            let resolved = DrakewardConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = project_cmds::run_project_command(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Invariant { command } => {
            let resolved = DrakewardConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = invariant_cmds::run_invariant_command(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Dispatch {
            project_id,
            max_agents,
            timeout,
        } => {
            let resolved = DrakewardConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = dispatch_cmd::run_dispatch(
                &db_pool,
                &project_id,
                max_agents,
                timeout,
                &resolved.token_config,
            )
            .await;
            db_pool.close().await;
            result?;
        }
        Commands::Status { project_id } => {
            let resolved = DrakewardConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = status_cmd::run_status(&db_pool, project_id.as_deref()).await;
            db_pool.close().await;
            result?;
        }
        Commands::Log { task_id, attempt } => {
            let resolved = DrakewardConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = log_cmd::run_log(&db_pool, &task_id, attempt).await;
            db_pool.close().await;
            result?;
        }
        Commands::Approve { task_id } => {
            let resolved = DrakewardConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let id = uuid::Uuid::parse_str(&task_id)
                .with_context(|| format!("invalid task ID: {task_id}"))?;
            let result = drakeward_core::state::dispatch::approve_task(&db_pool, id).await;
            db_pool.close().await;
            result?;
            println!("Task {task_id} approved.");
        }
        Commands::Reject { task_id } => {
            let resolved = DrakewardConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let id = uuid::Uuid::parse_str(&task_id)
                .with_context(|| format!("invalid task ID: {task_id}"))?;
            let result = drakeward_core::state::dispatch::reject_task(&db_pool, id).await;
            db_pool.close().await;
            result?;
            println!("Task {task_id} rejected.");
        }
        Commands::Retry { task_id, force } => {
            let resolved = DrakewardConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let id = uuid::Uuid::parse_str(&task_id)
                .with_context(|| format!("invalid task ID: {task_id}"))?;
            let result =
                drakeward_core::state::dispatch::operator_retry_task(&db_pool, id, force).await;
            db_pool.close().await;
            result?;
            println!("Task {task_id} reset for retry.");
        }
        Commands::Gate { task_id } => {
            let resolved = DrakewardConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = gate_cmd::run_gate(&db_pool, &task_id).await;
            db_pool.close().await;
            result?;
        }
        Commands::Report { project_id } => {
            let resolved = DrakewardConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = report_cmd::run_report(&db_pool, &project_id).await;
            db_pool.close().await;
            result?;
        }
        Commands::Cleanup { project_id, all } => {
            let resolved = DrakewardConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = cleanup_cmd::run_cleanup(&db_pool, &project_id, all).await;
            db_pool.close().await;
            result?;
        }
        Commands::Merge { project_id, dry_run } => {
            let resolved = DrakewardConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = merge_cmd::run_merge(&db_pool, &project_id, dry_run).await;
            db_pool.close().await;
            result?;
        }
        Commands::Export { project_id, output } => {
            let resolved = DrakewardConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result =
                export_cmd::run_export_csv(&db_pool, project_id.as_deref(), output.as_deref())
                    .await;
            db_pool.close().await;
            result?;
        }
        Commands::Serve { bind, port } => {
            let resolved = DrakewardConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            serve_cmd::run_serve(db_pool, &bind, port).await?;
        }
        Commands::Engine { projects_path, model } => {
            let resolved = DrakewardConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let file_projects_path = config::load_config().ok().and_then(|c| c.projects_path);
            let effective_path = projects_path.or(file_projects_path);
            engine_cmd::run_engine(db_pool, &resolved, effective_path.as_deref(), &model).await?;
        }
        Commands::Dashboard => {
            let resolved = DrakewardConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = tui::run_dashboard(db_pool.clone()).await;
            db_pool.close().await;
            result?;
        }
        Commands::Task => {
            println!("drakeward task: not available in operator mode (set DRAKEWARD_AGENT_TOKEN)");
        }
        Commands::Check => {
            println!("drakeward check: not available in operator mode (set DRAKEWARD_AGENT_TOKEN)");
        }
        Commands::Progress { message } => {
            println!("drakeward progress: not available in operator mode (set DRAKEWARD_AGENT_TOKEN)");
            let _ = message;
        }
        Commands::Done => {
            println!("drakeward done: not available in operator mode (set DRAKEWARD_AGENT_TOKEN)");
        }
    }

    Ok(())
}
