//! sandbox-runner - run code snippets in isolated containers
//!
//! Serves the execution API by default. The other subcommands run one-off
//! maintenance tasks against the same configuration.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sandbox_runner::app::{shutdown_signal, App};
use sandbox_runner::config::loader::write_env_template;
use sandbox_runner::config::{Config, ConfigLoader};
use sandbox_runner::spec;
use sandbox_runner::ExecutionRequest;

/// sandbox-runner - sandboxed code execution service
#[derive(Parser)]
#[command(name = "sandbox-runner")]
#[command(about = "Run code snippets in isolated, resource-bounded containers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides the configuration.
    #[arg(short, long)]
    log_level: Option<String>,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP and websocket API (default)
    Serve,

    /// Run a single code file and print its output
    Exec {
        /// Language spec to run the file with
        language: String,

        /// File containing the code
        file: PathBuf,

        /// Treat the file content as an inline expression
        #[arg(long)]
        inline: bool,

        /// Arguments passed to the executed program
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Pull the images of all specs
    Prepare {
        /// Pull even if the image is already present
        #[arg(long)]
        force: bool,
    },

    /// Print the resolved spec map
    Specs,

    /// Write a .env template with all configuration keys
    GenEnv {
        /// Output file, stdout if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Template generation needs neither configuration nor logging
    if let Some(Commands::GenEnv { output }) = &cli.command {
        return gen_env(output.as_ref());
    }

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_file(path);
    }
    let config = loader.load().context("Failed to load configuration")?;

    // Initialize logging
    let level = cli.log_level.clone().unwrap_or_else(|| {
        if config.debug {
            "debug".to_string()
        } else {
            config.log.level.clone()
        }
    });
    let log_level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .init();

    match cli.command {
        None | Some(Commands::Serve) => serve(config).await,
        Some(Commands::Exec {
            language,
            file,
            inline,
            args,
        }) => exec(config, language, file, inline, args).await,
        Some(Commands::Prepare { force }) => {
            let app = App::bootstrap(config).await?;
            app.prepare(force).await?;
            Ok(())
        }
        Some(Commands::Specs) => print_specs(&config).await,
        Some(Commands::GenEnv { .. }) => Ok(()),
    }
}

async fn serve(config: Config) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "starting sandbox-runner");
    let app = App::bootstrap(config).await?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    app.serve(shutdown).await?;
    Ok(())
}

async fn exec(
    config: Config,
    language: String,
    file: PathBuf,
    inline: bool,
    args: Vec<String>,
) -> Result<()> {
    let code = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let app = App::bootstrap(config).await?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    let mut request = ExecutionRequest::new(language, code);
    request.arguments = args;
    request.inline_expression = inline;

    let result = app.manager().execute(&cancel, request).await;
    let cleanup_errors = app.manager().cleanup(&CancellationToken::new()).await;
    let response = result?;

    let mut stdout = std::io::stdout();
    stdout.write_all(response.stdout.as_bytes())?;
    stdout.flush()?;
    let mut stderr = std::io::stderr();
    stderr.write_all(response.stderr.as_bytes())?;
    stderr.flush()?;

    info!(exec_time_ms = response.exec_time_ms, "execution finished");
    if !cleanup_errors.is_empty() {
        anyhow::bail!("{} sandboxes could not be cleaned up", cleanup_errors.len());
    }
    Ok(())
}

async fn print_specs(config: &Config) -> Result<()> {
    let specs = spec::provider::from_location(&config.spec_file);
    specs.load().await?;
    let resolved = specs.registry().resolved();
    print!("{}", serde_yaml::to_string(&resolved)?);
    Ok(())
}

fn gen_env(output: Option<&PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            let mut file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_env_template(&mut file)?;
            println!("Wrote {}", path.display());
        }
        None => write_env_template(&mut std::io::stdout())?,
    }
    Ok(())
}
