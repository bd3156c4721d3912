// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tagsmith_cli::commands;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tagsmith")]
#[command(author = "Maravilla Labs")]
#[command(version)]
#[command(about = "Extensible tag-template compiler CLI", long_about = None)]
struct Cli {
    /// Log level: error, warn, info, debug, trace
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a template by name, resolving its includes
    Render {
        /// Template name, relative to the template directory, without extension
        name: String,
        /// JSON file with the render data
        #[arg(short, long)]
        data: Option<PathBuf>,
        /// Inline JSON render data
        #[arg(long)]
        json: Option<String>,
        /// Write the output to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compile every template and report errors
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with the specified log level
    let filter = EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Render {
            name,
            data,
            json,
            output,
        } => {
            commands::render::run(&name, data.as_deref(), json.as_deref(), output.as_deref()).await
        }
        Commands::Check => commands::check::run().await,
    }
}
