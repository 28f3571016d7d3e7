//! File mutations inside the project directory.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::Path;

use crate::runner;
use crate::sandbox::{SandboxError, SandboxHandle};

/// Whether a transfer keeps the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Copy,
    Move,
}

impl std::str::FromStr for Transfer {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "copy" => Ok(Self::Copy),
            "cut" | "move" => Ok(Self::Move),
            other => Err(SandboxError::config(format!(
                "Unknown file operation: '{other}'. Supported: copy, cut"
            ))),
        }
    }
}

pub async fn create_folder(sandbox: &dyn SandboxHandle, name: &str) -> Result<(), SandboxError> {
    let name = required(name, "Folder name")?;
    run(sandbox, "mkdir", &["-p", name]).await
}

pub async fn delete_file(sandbox: &dyn SandboxHandle, name: &str) -> Result<(), SandboxError> {
    let name = required(name, "File name")?;
    run(sandbox, "rm", &[name]).await
}

/// Copies or moves `source` into `target_dir`, keeping its file name.
///
/// Without a target directory the file lands in the project root.
pub async fn transfer(
    sandbox: &dyn SandboxHandle,
    operation: Transfer,
    source: &str,
    target_dir: Option<&str>,
) -> Result<(), SandboxError> {
    let source = required(source, "Source path")?;
    let target = transfer_target(source, target_dir);

    match operation {
        Transfer::Copy => run(sandbox, "cp", &["-r", source, &target]).await,
        Transfer::Move => run(sandbox, "mv", &[source, &target]).await,
    }
}

/// Replaces the file's content.
///
/// The content travels base64-encoded through the shell so arbitrary bytes
/// survive quoting.
pub async fn save_file(sandbox: &dyn SandboxHandle, name: &str, content: &str) -> Result<(), SandboxError> {
    let name = required(name, "File name")?;
    let encoded = STANDARD.encode(content.as_bytes());
    let script = format!(
        "echo '{encoded}' | base64 -d > {}",
        shell_words::quote(name)
    );
    run(sandbox, "sh", &["-c", &script]).await
}

fn transfer_target(source: &str, target_dir: Option<&str>) -> String {
    let file_name = Path::new(source.trim_end_matches('/'))
        .file_name()
        .map_or_else(|| source.to_string(), |n| n.to_string_lossy().to_string());

    match target_dir.map(|d| d.trim_end_matches('/')).filter(|d| !d.is_empty()) {
        Some(dir) => format!("{dir}/{file_name}"),
        None => file_name,
    }
}

fn required<'a>(value: &'a str, what: &str) -> Result<&'a str, SandboxError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(SandboxError::config(format!("{what} is required")));
    }
    Ok(value)
}

async fn run(sandbox: &dyn SandboxHandle, command: &str, args: &[&str]) -> Result<(), SandboxError> {
    runner::run_in_project(sandbox, command, args)
        .await
        .check()
        .map(|_| ())
}
