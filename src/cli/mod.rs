//! CLI module for a3sist
//!
//! Provides commands:
//! - `serve`: Run the engine over newline-delimited requests on stdin
//! - `dispatch`: Run a single request and wait for its result
//! - `health`: Check the configured tool servers
//! - `status`: Print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod dispatch;
pub mod health;
pub mod status;

/// a3sist task orchestration engine CLI
#[derive(Parser, Debug)]
#[command(name = "a3sist")]
#[command(about = "Multi-agent task orchestration engine")]
#[command(version)]
pub struct Cli {
    /// Extra configuration file layered over the defaults
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read requests from stdin (JSON or bare prompt per line) and print results
    Serve,
    /// Dispatch one request
    Dispatch {
        /// What to do
        prompt: String,
        /// Payload, e.g. source code
        #[arg(long)]
        content: Option<String>,
        /// File or project path
        #[arg(long)]
        file: Option<String>,
        /// Preferred agent
        #[arg(long)]
        agent: Option<String>,
    },
    /// Check every configured tool server
    Health,
    /// Show the effective configuration
    Status,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let Some(command) = cli.command else {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    };

    let config = crate::server::load_config(cli.config.as_deref())?;
    match command {
        Commands::Serve => crate::server::run(config).await,
        Commands::Dispatch {
            prompt,
            content,
            file,
            agent,
        } => {
            let args = dispatch::DispatchArgs {
                prompt,
                content,
                file,
                agent,
            };
            dispatch::run(config, args).await
        }
        Commands::Health => health::run(config).await,
        Commands::Status => status::run(&config),
    }
}
