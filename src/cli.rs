use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kube-medic")]
#[command(about = "Log-driven Kubernetes error detection and auto-remediation")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, short, global = true, default_value = "kube-medic.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Display application version
    Version,

    /// Check connectivity to the log backend and the Kubernetes cluster
    Check,

    /// Start the detection and remediation controller
    Run,

    /// Validate and test classification rules
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
}

#[derive(Subcommand)]
pub enum RulesAction {
    /// Compile every rule in the config file and report per-rule results
    Validate,

    /// Try a pattern against a sample line
    Test {
        #[arg(long)]
        pattern: String,

        #[arg(long)]
        sample: String,
    },
}
