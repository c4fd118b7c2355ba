//! Application configuration management.

use serde::Deserialize;
use uuid::Uuid;

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Transaction wrapper configuration.
    pub engine: EngineConfig,
    /// Billing period policy.
    pub billing: BillingConfig,
    /// Approval workflow settings.
    pub approval: ApprovalConfig,
    /// Periodic sweep configuration.
    pub scheduler: SchedulerConfig,
    /// Workflow templates registered at startup.
    pub workflows: Vec<WorkflowConfig>,
}

/// Retry configuration for the engine's transaction wrapper.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Retries after the first attempt for transient store failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Linear backoff step between attempts, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    25
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Billing period policy.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Mandatory nursing charge posted when a period opens.
    #[serde(default)]
    pub nursing_charge: i64,
    /// Whether OVERDUE periods still accept optional charges.
    #[serde(default)]
    pub overdue_accepts_charges: bool,
    /// Role allowed to verify or reject bank transfers.
    #[serde(default = "default_verifier_role")]
    pub verifier_role: String,
}

fn default_verifier_role() -> String {
    "BENDAHARA".to_string()
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            nursing_charge: 0,
            overdue_accepts_charges: false,
            verifier_role: default_verifier_role(),
        }
    }
}

/// Approval workflow settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalConfig {
    /// Step timeout applied when a step does not configure its own.
    #[serde(default)]
    pub default_step_timeout_hours: Option<u32>,
    /// Role that may cancel approvals it did not request.
    #[serde(default = "default_admin_role")]
    pub admin_role: String,
}

fn default_admin_role() -> String {
    "ADMIN".to_string()
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_hours: None,
            admin_role: default_admin_role(),
        }
    }
}

/// Periodic sweep configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between timeout/overdue sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Organization the configured workflows are registered for.
    #[serde(default)]
    pub organization_id: Option<Uuid>,
}

fn default_sweep_interval() -> u64 {
    300 // 5 minutes
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            organization_id: None,
        }
    }
}

/// A workflow template as written in configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    /// Unique workflow name.
    pub name: String,
    /// Resource type the workflow gates (e.g. `OPERATIONAL_EXPENSE`).
    pub resource_type: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Whether new approvals may use this workflow.
    #[serde(default = "default_true")]
    pub active: bool,
    /// Ordered steps.
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// A workflow step as written in configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    /// Position in the chain, starting at 1.
    pub order: u32,
    /// Role that must act on the step.
    pub role: String,
    /// Step applies only when the amount is at least this.
    #[serde(default)]
    pub min_amount: Option<i64>,
    /// Step applies only when the amount is at most this.
    #[serde(default)]
    pub max_amount: Option<i64>,
    /// Hours before a pending step times out.
    #[serde(default)]
    pub timeout_hours: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(
                config::Environment::with_prefix("CAREHOME")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Loads configuration from a TOML string, ignoring files and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed.
    pub fn from_toml(document: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(document, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
