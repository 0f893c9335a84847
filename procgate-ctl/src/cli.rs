use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "procgate-ctl")]
#[command(version, about = "Hold gated application processes at birth for an agent", long_about = None)]
#[command(after_help = "EXAMPLES:
    # Gate one package, handing matches to an agent
    procgate-ctl --agent /usr/libexec/procgate-agent --rule com.x

    # A package whose gated process name differs from the package name
    procgate-ctl --agent /usr/libexec/procgate-agent --rule com.x:com.x:push

    # Off-device layout, e.g. for integration testing
    procgate-ctl --agent ./agent.sh --package-db ./packages.xml --app-process ./app_process

    # Probe what this host supports
    procgate-ctl check
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Gate rule as PACKAGE[:PROCESS]; PROCESS defaults to PACKAGE (repeatable)
    #[arg(short, long = "rule", value_name = "PKG[:PROC]", global = true)]
    pub rules: Vec<String>,

    /// Agent program invoked with each target PID
    #[arg(short, long, value_name = "PATH", global = true)]
    pub agent: Option<PathBuf>,

    /// Package database path
    #[arg(long, value_name = "PATH", global = true)]
    pub package_db: Option<PathBuf>,

    /// Interpreter binary path (base, without the 32/64 suffix)
    #[arg(long, value_name = "PATH", global = true)]
    pub app_process: Option<PathBuf>,

    /// Command-line prefix identifying spawner processes
    #[arg(long, value_name = "PREFIX", global = true)]
    pub spawner_prefix: Option<String>,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the process monitor (default when no subcommand is given)
    Run,
    /// Check monitor requirements on this host
    Check,
}
