//! CLI command implementations.
//!
//! Commands are thin: they build inputs for the [`TaskService`] and print
//! the envelope it returns, either as a colored summary or as raw JSON.

pub mod create;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::sandbox::{DockerTransport, SandboxRegistry};
use crate::service::{Envelope, TaskService};
use crate::session::BuilderSettings;
use crate::tasks::FileTaskStore;

/// Everything a command needs.
pub struct App {
    pub service: TaskService,
    pub user: String,
    json: bool,
}

impl App {
    pub fn new(config: &Config, home: &Path, user: String, json: bool) -> Result<Self> {
        let transport = DockerTransport::new(&config.sandbox)?;
        let service = TaskService::new(
            Arc::new(FileTaskStore::new(home)),
            Arc::new(transport),
            Arc::new(SandboxRegistry::new()),
            BuilderSettings::from(config),
        );

        Ok(Self {
            service,
            user,
            json,
        })
    }

    /// Whether output is machine-readable.
    pub fn json(&self) -> bool {
        self.json
    }

    /// Prints an envelope; a failed one becomes the command's error.
    pub fn report(&self, envelope: &Envelope) -> Result<()> {
        if self.json {
            let text = serde_json::to_string_pretty(envelope).context("Failed to serialize response")?;
            println!("{text}");
        } else if envelope.success {
            print_summary(envelope);
        }

        if !envelope.success {
            bail!(
                "{} (status {})",
                envelope.error.as_deref().unwrap_or("Request failed"),
                envelope.status
            );
        }
        Ok(())
    }
}

fn print_summary(envelope: &Envelope) {
    println!(
        "{} {}",
        "✓".green(),
        envelope.message.as_deref().unwrap_or("Done").bold()
    );

    let Some(fields) = envelope.data.as_object() else {
        return;
    };
    for (key, value) in fields {
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => continue,
            other => other.to_string(),
        };
        println!("  {:<16} {}", format!("{key}:"), value.cyan());
    }
}

/// Reads file content from a local path, or stdin when none is given.
pub fn read_content(from: Option<&Path>) -> Result<String> {
    match from {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {}", path.display())),
        None => {
            let mut content = String::new();
            std::io::stdin()
                .read_to_string(&mut content)
                .context("Failed to read stdin")?;
            Ok(content)
        }
    }
}
