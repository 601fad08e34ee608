// src/main.rs

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Compile {
            metadata,
            config,
            out,
            ninja,
            ninja_toolchain,
        } => commands::cmd_compile(&metadata, &config, &out, ninja.as_deref(), &ninja_toolchain),

        Commands::Run {
            plan,
            toolchain,
            config,
            jobs,
            shim,
            keep_envs,
        } => commands::cmd_run(&plan, &toolchain, &config, jobs, shim.as_deref(), keep_envs).await,

        Commands::Redirect {
            toolchain,
            out,
            shim,
            audit_dir,
        } => commands::cmd_redirect(&toolchain, &out, shim.as_deref(), &audit_dir),

        Commands::Classify {
            results_dir,
            patterns,
        } => commands::cmd_classify(&results_dir, patterns.as_deref()),

        Commands::Summary { results_dir } => commands::cmd_summary(&results_dir),
    }
}
