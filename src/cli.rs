use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cumulo")]
#[command(version)]
#[command(about = "Provision always-free cloud compute, without leaving the free tier", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Discover, validate and converge the account to the desired config
    Deploy(DeployArgs),

    /// Validate a desired config against the free-tier headroom
    Validate(TargetArgs),

    /// Show everything that currently exists in the account
    Inventory(TargetArgs),

    /// Run health checks (CLIs on PATH, authentication, state dir)
    Doctor(TargetArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderArg {
    Oci,
    Gcp,
}

impl ProviderArg {
    pub fn name(self) -> &'static str {
        match self {
            Self::Oci => "oci",
            Self::Gcp => "gcp",
        }
    }
}

#[derive(Parser)]
pub struct TargetArgs {
    /// Cloud provider
    #[arg(long, value_enum, env = "CLOUD_PROVIDER", default_value = "oci")]
    pub provider: ProviderArg,

    /// Tenancy/compartment OCID (OCI) or project id (GCP)
    #[arg(long, env = "CLOUD_PROJECT")]
    pub project: String,

    /// Region; defaults to the provider's home/free region
    #[arg(long, env = "CLOUD_REGION")]
    pub region: Option<String>,

    /// Explicit desired config (TOML)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Adopt whatever already exists as the desired config
    #[arg(long, env = "USE_EXISTING")]
    pub use_existing: bool,

    /// Target the maximum the free tier allows
    #[arg(long)]
    pub max: bool,

    /// Treat free-tier overruns as warnings instead of rejections
    #[arg(long, env = "ALLOW_PAID_RESOURCES")]
    pub allow_paid: bool,

    /// Never prompt; decline anything that would need confirmation
    #[arg(long, env = "NON_INTERACTIVE")]
    pub non_interactive: bool,

    /// Per-command timeout for provider CLI queries, in seconds
    #[arg(long, default_value = "30")]
    pub command_timeout: u64,
}

#[derive(Parser)]
pub struct DeployArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Apply without asking
    #[arg(long, env = "AUTO_APPLY")]
    pub auto_apply: bool,

    /// Terraform working directory (defaults under ~/.local/state/cumulo)
    #[arg(long, value_name = "DIR")]
    pub terraform_dir: Option<PathBuf>,

    /// SSH public key for the instances: literal key material or @path
    #[arg(long, value_name = "KEY")]
    pub ssh_public_key: Option<String>,

    /// Give up after this many apply attempts
    #[arg(long, env = "RETRY_MAX_ATTEMPTS", default_value = "8")]
    pub retry_max_attempts: u32,

    /// First backoff delay in seconds; doubles every attempt
    #[arg(long, env = "RETRY_BASE_DELAY", default_value = "15")]
    pub retry_base_delay: u64,

    /// Per-invocation timeout for terraform, in seconds
    #[arg(long, default_value = "1800")]
    pub apply_timeout: u64,
}
