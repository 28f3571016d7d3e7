use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod agent;
mod commands;
mod config;
mod files;
mod reconcile;
mod redact;
mod runner;
mod sandbox;
mod service;
mod session;
mod tasks;

#[derive(Parser)]
#[command(name = "taskbox")]
#[command(
    author,
    version,
    about = "Run coding agents in disposable sandboxes and reconcile their work with git"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print the raw JSON response instead of a summary
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding task records and logs (default: ~/.taskbox)
    #[arg(long, global = true, env = "TASKBOX_HOME")]
    home: Option<PathBuf>,

    /// User owning the tasks
    #[arg(long, global = true, env = "TASKBOX_USER", default_value = "local")]
    user: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a sandbox for a repository and optionally run an agent in it
    Create(commands::create::CreateArgs),

    /// Run the task's agent with a prompt
    Run {
        task_id: String,
        prompt: String,

        /// Model passed to the agent CLI
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Commit local changes and push them to the task branch
    Sync {
        task_id: String,

        /// Commit message
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Checkpoint local changes, then reset to the remote task branch
    Reset {
        task_id: String,

        /// Checkpoint commit message
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Create a folder in the project
    Mkdir { task_id: String, name: String },

    /// Delete a file from the project
    Rm { task_id: String, name: String },

    /// Copy a file or folder, optionally into a target folder
    Cp {
        task_id: String,
        source: String,
        target: Option<String>,
    },

    /// Move a file or folder, optionally into a target folder
    Mv {
        task_id: String,
        source: String,
        target: Option<String>,
    },

    /// Write a file in the project from a local file or stdin
    Save {
        task_id: String,
        name: String,

        /// Local file to upload (default: read stdin)
        #[arg(long)]
        from: Option<PathBuf>,
    },

    /// Stop the task's sandbox
    Stop { task_id: String },

    /// Stop the task's sandbox and delete the task
    Delete { task_id: String },
}

fn init_logging(verbose: bool, home: &std::path::Path) -> Result<WorkerGuard> {
    let filter = if verbose {
        EnvFilter::new("taskbox=debug")
    } else {
        EnvFilter::new("taskbox=info")
    };

    let log_dir = home.join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "taskbox.log"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .with(filter)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let home = config::taskbox_home(cli.home.as_deref())?;
    let _guard = init_logging(cli.verbose, &home)?;

    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let config = config::Config::load(&cwd)?;
    let app = commands::App::new(&config, &home, cli.user, cli.json)?;

    match cli.command {
        Commands::Create(args) => commands::create::run(&app, &config, args).await,
        Commands::Run {
            task_id,
            prompt,
            model,
        } => {
            let model = model.or_else(|| config.agent.model.clone());
            let envelope = app
                .service
                .run_agent(&task_id, &app.user, &prompt, model.as_deref())
                .await;
            app.report(&envelope)
        }
        Commands::Sync { task_id, message } => {
            let envelope = app
                .service
                .sync_changes(&task_id, &app.user, message.as_deref())
                .await;
            app.report(&envelope)
        }
        Commands::Reset { task_id, message } => {
            let envelope = app
                .service
                .reset_changes(&task_id, &app.user, message.as_deref())
                .await;
            app.report(&envelope)
        }
        Commands::Mkdir { task_id, name } => {
            let envelope = app.service.create_folder(&task_id, &app.user, &name).await;
            app.report(&envelope)
        }
        Commands::Rm { task_id, name } => {
            let envelope = app.service.delete_file(&task_id, &app.user, &name).await;
            app.report(&envelope)
        }
        Commands::Cp {
            task_id,
            source,
            target,
        } => {
            let envelope = app
                .service
                .file_operation(&task_id, &app.user, "copy", &source, target.as_deref())
                .await;
            app.report(&envelope)
        }
        Commands::Mv {
            task_id,
            source,
            target,
        } => {
            let envelope = app
                .service
                .file_operation(&task_id, &app.user, "cut", &source, target.as_deref())
                .await;
            app.report(&envelope)
        }
        Commands::Save {
            task_id,
            name,
            from,
        } => {
            let content = commands::read_content(from.as_deref())?;
            let envelope = app
                .service
                .save_file(&task_id, &app.user, &name, &content)
                .await;
            app.report(&envelope)
        }
        Commands::Stop { task_id } => {
            let envelope = app.service.stop_sandbox(&task_id, &app.user).await;
            app.report(&envelope)
        }
        Commands::Delete { task_id } => {
            let envelope = app.service.delete_task(&task_id, &app.user).await;
            app.report(&envelope)
        }
    }
}
