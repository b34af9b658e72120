//! Configuration file management for drakeward.
//!
//! Provides a TOML-based config file at `~/.config/drakeward/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use drakeward_core::engine::{EngineIntervals, PlannerIterations};
use drakeward_core::governor::GovernorLimits;
use drakeward_core::orchestrator::OrchestratorConfig;
use drakeward_core::token::TokenConfig;
use drakeward_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    pub auth: AuthSection,
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub projects_path: Option<String>,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub planning: PlanningSection,
    #[serde(default)]
    pub iterations: IterationsSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthSection {
    /// Hex-encoded token secret (64 hex chars = 32 bytes).
    pub token_secret: String,
}

/// Concurrency and timeout limits, threaded into the Resource Governor,
/// the Lifecycle Engine's monitoring ticker, and the orchestrator's
/// per-task timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub max_parallel_kobolds: usize,
    pub max_parallel_drakes: usize,
    pub max_parallel_wyrms: usize,
    pub max_parallel_wyverns: usize,
    pub monitoring_interval_seconds: u64,
    pub stuck_kobold_timeout_minutes: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_parallel_kobolds: 4,
            max_parallel_drakes: 1,
            max_parallel_wyrms: 1,
            max_parallel_wyverns: 1,
            monitoring_interval_seconds: 60,
            stuck_kobold_timeout_minutes: 30,
        }
    }
}

/// Plan-step execution policy. Parsed for schema completeness; task
/// execution in this crate stays task-scoped rather than plan-step-scoped
/// (see DESIGN.md), so only `enabled` and `max_planning_iterations` have a
/// consumer today.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningSection {
    pub enabled: bool,
    pub max_planning_iterations: u32,
    pub save_plan_progress: bool,
    pub resume_from_plan: bool,
    pub use_enhanced_execution: bool,
    pub use_progressive_detail_reveal: bool,
    pub medium_detail_step_count: u32,
    pub execution_mode: String,
    pub allow_plan_modifications: bool,
    pub auto_approve_modifications: bool,
    pub max_parallel_steps: usize,
}

impl Default for PlanningSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_planning_iterations: 8,
            save_plan_progress: true,
            resume_from_plan: true,
            use_enhanced_execution: false,
            use_progressive_detail_reveal: false,
            medium_detail_step_count: 5,
            execution_mode: "multi-step".to_string(),
            allow_plan_modifications: true,
            auto_approve_modifications: false,
            max_parallel_steps: 1,
        }
    }
}

/// Per-agent iteration caps. Only `max_wyrm_iterations`/`max_wyvern_iterations`
/// are wired to an enforcement point today (the planner's retry loops);
/// the rest have no internal loop to cap in this architecture (Kobold's
/// iteration count lives inside the external Harness subprocess, Dragon is
/// driven one turn at a time by its caller) and are parsed for schema
/// completeness only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IterationsSection {
    pub max_kobold_iterations: u32,
    pub max_dragon_initial_iterations: u32,
    pub max_dragon_continue_iterations: u32,
    pub max_wyrm_iterations: u32,
    pub max_wyvern_iterations: u32,
    pub max_sub_agent_iterations: u32,
}

impl Default for IterationsSection {
    fn default() -> Self {
        Self {
            max_kobold_iterations: 50,
            max_dragon_initial_iterations: 20,
            max_dragon_continue_iterations: 20,
            max_wyrm_iterations: 8,
            max_wyvern_iterations: 1,
            max_sub_agent_iterations: 10,
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the drakeward config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/drakeward` or `~/.config/drakeward`.
/// We intentionally ignore the platform-specific `dirs::config_dir()`
/// (which returns `~/Library/Application Support` on macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("drakeward");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("drakeward")
}

/// Return the path to the drakeward config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    // Set permissions to 0600 (owner read/write only) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Token secret generation
// -----------------------------------------------------------------------

/// Generate a random token secret: 32 random bytes, hex-encoded (64 chars).
pub fn generate_token_secret() -> String {
    use rand::Rng;
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct DrakewardConfig {
    pub db_config: DbConfig,
    pub token_config: TokenConfig,
    pub governor_limits: GovernorLimits,
    pub engine_intervals: EngineIntervals,
    pub orchestrator_config: OrchestratorConfig,
    pub planner_iterations: PlannerIterations,
}

impl DrakewardConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `DRAKEWARD_DATABASE_URL` env > `config_file.database.url` > `DbConfig::DEFAULT_URL`
    /// - Token secret: `DRAKEWARD_TOKEN_SECRET` env > `config_file.auth.token_secret` (hex-decoded) > error
    /// - `limits`/`iterations`: config file section > built-in default (see
    ///   [`LimitsSection`]/[`IterationsSection`]); `EngineIntervals`'s other
    ///   tickers (wyrm/wyvern/supervisor/recovery/grace_period) have no
    ///   config-file knob and keep their built-in cadence.
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();

        // DB URL resolution.
        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var("DRAKEWARD_DATABASE_URL") {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };
        let db_config = DbConfig::new(db_url);

        // Token secret resolution.
        let token_config = if let Ok(secret_hex) = std::env::var("DRAKEWARD_TOKEN_SECRET") {
            let bytes = hex::decode(&secret_hex)
                .context("DRAKEWARD_TOKEN_SECRET env var is not valid hex")?;
            TokenConfig::new(bytes)
        } else if let Some(ref cfg) = file_config {
            let bytes = hex::decode(&cfg.auth.token_secret)
                .context("invalid hex in config file token_secret")?;
            TokenConfig::new(bytes)
        } else {
            bail!(
                "token secret not found; set DRAKEWARD_TOKEN_SECRET or run `drakeward init` to create a config file"
            );
        };

        let limits = file_config
            .as_ref()
            .map(|c| c.limits.clone())
            .unwrap_or_default();
        let iterations = file_config
            .as_ref()
            .map(|c| c.iterations.clone())
            .unwrap_or_default();

        let governor_limits = GovernorLimits {
            max_workers: limits.max_parallel_kobolds,
            max_supervisors: limits.max_parallel_drakes,
            max_wyrms: limits.max_parallel_wyrms,
            max_wyverns: limits.max_parallel_wyverns,
        };

        let mut engine_intervals = EngineIntervals::default();
        engine_intervals.monitoring = Duration::from_secs(limits.monitoring_interval_seconds);

        let orchestrator_config = OrchestratorConfig {
            max_agents: limits.max_parallel_kobolds,
            task_timeout: Duration::from_secs(limits.stuck_kobold_timeout_minutes * 60),
        };

        let planner_iterations = PlannerIterations {
            wyrm: iterations.max_wyrm_iterations,
            wyvern: iterations.max_wyvern_iterations,
        };

        Ok(Self {
            db_config,
            token_config,
            governor_limits,
            engine_intervals,
            orchestrator_config,
            planner_iterations,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
