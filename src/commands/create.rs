use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

use super::App;
use crate::agent::Agent;
use crate::config::Config;
use crate::session::SandboxConfig;

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Repository to clone
    pub repo: String,

    /// Agent to run: claude, codex, cursor or gemini (default from taskbox.toml)
    #[arg(short, long)]
    pub agent: Option<String>,

    /// Model passed to the agent CLI
    #[arg(short, long)]
    pub model: Option<String>,

    /// Branch to work on (default: a new agent/<timestamp>-<id> branch)
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Sandbox lifetime in minutes
    #[arg(short, long)]
    pub timeout: Option<String>,

    /// Ports to expose; the first one is the dev server port
    #[arg(long = "port")]
    pub ports: Vec<u16>,

    /// Skip dependency installation
    #[arg(long)]
    pub no_install: bool,

    /// Keep the sandbox running after the agent finishes
    #[arg(long)]
    pub keep_alive: bool,

    /// Run the agent with this prompt once the sandbox is ready
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Token used to clone and push over https
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,
}

pub async fn run(app: &App, config: &Config, args: CreateArgs) -> Result<()> {
    let agent: Agent = args.agent.as_deref().unwrap_or(&config.agent.provider).parse()?;
    let task_id = uuid::Uuid::new_v4().to_string();

    let mut session = SandboxConfig::new(&task_id, &args.repo, agent)
        .with_token(args.github_token)
        .with_timeout(args.timeout)
        .with_ports(args.ports)
        .with_install_dependencies(config.sandbox.install_dependencies && !args.no_install)
        .with_keep_alive(args.keep_alive || config.sandbox.keep_alive)
        .with_branch(args.branch)
        .with_cancellation(cancel_on_ctrl_c());

    if let Ok(key) = std::env::var(agent.api_key_var()) {
        session = session.with_api_key(agent.api_key_var(), key);
    }
    if !app.json() {
        session = session.with_progress(Arc::new(|percent, message| {
            eprintln!("{} {message}", format!("[{percent:>3}%]").dimmed());
        }));
    }

    let envelope = app.service.create_session(&app.user, session).await;
    app.report(&envelope)?;

    let Some(prompt) = args.prompt else {
        return Ok(());
    };
    let model = args.model.or_else(|| config.agent.model.clone());
    let envelope = app
        .service
        .run_agent(&task_id, &app.user, &prompt, model.as_deref())
        .await;
    app.report(&envelope)
}

/// First Ctrl-C cancels at the next checkpoint; a second one aborts.
fn cancel_on_ctrl_c() -> Arc<dyn Fn() -> bool + Send + Sync> {
    let cancelled = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&cancelled);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancelling after the current step (press Ctrl-C again to abort)");
            flag.store(true, Ordering::SeqCst);
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });

    Arc::new(move || cancelled.load(Ordering::SeqCst))
}
