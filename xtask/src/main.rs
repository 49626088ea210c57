use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for revlog")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run fmt, clippy, tests and doc in sequence
    Check,
    /// Run cargo fmt --check on all crates
    Fmt,
    /// Run clippy on all crates with warnings denied
    Clippy,
    /// Run the workspace test suite
    Test,
    /// Run cargo deny check
    Deny,
    /// Build rustdoc for the workspace
    Doc,
    /// Build the entire workspace
    Build,
    /// Run the history kernel benchmarks in release mode
    Bench,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            for task in [Commands::Fmt, Commands::Clippy, Commands::Test, Commands::Doc] {
                run_task(task)?;
            }
        }
        task => run_task(task)?,
    }

    Ok(())
}

fn run_task(task: Commands) -> Result<()> {
    match task {
        Commands::Fmt => cargo("fmt --check", &["fmt", "--all", "--", "--check"]),
        Commands::Clippy => cargo(
            "clippy",
            &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
        ),
        Commands::Test => cargo("test", &["test", "--workspace"]),
        Commands::Deny => cargo(
            "deny check (licenses bans sources)",
            &["deny", "check", "licenses", "bans", "sources"],
        ),
        Commands::Doc => cargo("doc", &["doc", "--workspace", "--no-deps"]),
        Commands::Build => cargo("build", &["build", "--workspace"]),
        Commands::Bench => cargo(
            "bench",
            &["bench", "-p", "revlog-kernel", "--bench", "bench_history"],
        ),
        Commands::Check => anyhow::bail!("check is not a single task"),
    }
}

fn cargo(step: &str, args: &[&str]) -> Result<()> {
    println!("==> Running cargo {step}");
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("cargo {step} failed");
    }
    Ok(())
}
