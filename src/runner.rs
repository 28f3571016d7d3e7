//! Command execution inside a sandbox.
//!
//! The runner never lets a transport failure escape: a command that could
//! not be dispatched comes back as a failed [`CommandResult`] with no exit
//! code, and callers decide whether that is fatal via [`CommandResult::check`].

use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use crate::redact::redact;
use crate::sandbox::{ErrorKind, LineCallback, OutputSinks, ProcessSpec, SandboxError, SandboxHandle};

/// Directory the repository is cloned into.
pub const PROJECT_DIR: &str = "/home/user/project";

/// Callback receiving stdout lines that parsed as JSON.
pub type JsonCallback = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

/// Normalized outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// `exit_code == Some(0)`.
    pub success: bool,
    /// Absent when the command never ran.
    pub exit_code: Option<i32>,
    pub stdout: String,
    /// Process stderr, or the dispatch error when the command never ran.
    pub stderr: String,
    /// `command` and its args joined by spaces.
    pub command: String,
    /// Classification of the dispatch failure, if any.
    pub dispatch_error: Option<ErrorKind>,
}

impl CommandResult {
    fn completed(command: String, exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            success: exit_code == 0,
            exit_code: Some(exit_code),
            stdout,
            stderr,
            command,
            dispatch_error: None,
        }
    }

    fn dispatch_failed(command: String, err: &SandboxError) -> Self {
        Self {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: err.to_string(),
            command,
            dispatch_error: Some(err.kind()),
        }
    }

    /// Converts a failed result into a typed error.
    pub fn check(self) -> Result<Self, SandboxError> {
        if self.success {
            return Ok(self);
        }
        match self.dispatch_error {
            Some(kind) => Err(SandboxError::from_kind(kind, self.stderr)),
            None => Err(SandboxError::command(
                self.command,
                self.exit_code,
                self.stderr,
            )),
        }
    }

    /// Trimmed stdout.
    pub fn output(&self) -> &str {
        self.stdout.trim()
    }
}

/// Line-level callbacks for [`run_streaming`].
#[derive(Clone, Default)]
pub struct StreamHandlers {
    pub on_stdout: Option<LineCallback>,
    pub on_stderr: Option<LineCallback>,
    pub on_json_line: Option<JsonCallback>,
}

fn full_command(command: &str, args: &[&str]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{command} {}", args.join(" "))
    }
}

/// Runs a command and waits for it to finish.
pub async fn run(
    sandbox: &dyn SandboxHandle,
    command: &str,
    args: &[&str],
    cwd: &str,
) -> CommandResult {
    let line = full_command(command, args);
    let spec = ProcessSpec::new(command, args, cwd);

    let process = match sandbox.start_process(spec, OutputSinks::default()).await {
        Ok(process) => process,
        Err(e) => return CommandResult::dispatch_failed(line, &e),
    };

    match process.wait().await {
        Ok(out) => CommandResult::completed(line, out.exit_code, out.stdout, out.stderr),
        Err(e) => CommandResult::dispatch_failed(line, &e),
    }
}

/// Runs a command in [`PROJECT_DIR`].
pub async fn run_in_project(sandbox: &dyn SandboxHandle, command: &str, args: &[&str]) -> CommandResult {
    run(sandbox, command, args, PROJECT_DIR).await
}

/// Runs a command, delivering output line by line as it arrives.
///
/// Stdout lines that parse as JSON are also handed to `on_json_line`;
/// anything else is plain text.
pub async fn run_streaming(
    sandbox: &dyn SandboxHandle,
    command: &str,
    args: &[&str],
    cwd: &str,
    handlers: StreamHandlers,
) -> CommandResult {
    let line = full_command(command, args);
    let stdout_lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let stderr_lines = Arc::new(Mutex::new(Vec::<String>::new()));

    let on_stdout: LineCallback = {
        let lines = Arc::clone(&stdout_lines);
        let StreamHandlers {
            on_stdout,
            on_json_line,
            ..
        } = handlers.clone();
        Arc::new(move |text: &str| {
            push_line(&lines, text);
            if let Some(cb) = &on_stdout {
                cb(text);
            }
            if let (Some(cb), Some(value)) = (&on_json_line, parse_json_line(text)) {
                cb(&value);
            }
        })
    };
    let on_stderr: LineCallback = {
        let lines = Arc::clone(&stderr_lines);
        let callback = handlers.on_stderr;
        Arc::new(move |text: &str| {
            push_line(&lines, text);
            if let Some(cb) = &callback {
                cb(text);
            }
        })
    };

    let sinks = OutputSinks {
        on_stdout: Some(on_stdout),
        on_stderr: Some(on_stderr),
    };
    let process = match sandbox
        .start_process(ProcessSpec::new(command, args, cwd), sinks)
        .await
    {
        Ok(process) => process,
        Err(e) => return CommandResult::dispatch_failed(line, &e),
    };

    match process.wait().await {
        Ok(out) => CommandResult::completed(
            line,
            out.exit_code,
            joined(&stdout_lines),
            joined(&stderr_lines),
        ),
        Err(e) => CommandResult::dispatch_failed(line, &e),
    }
}

/// Runs a command and logs the redacted command line and output.
pub async fn run_and_log(
    sandbox: &dyn SandboxHandle,
    command: &str,
    args: &[&str],
    cwd: &str,
) -> CommandResult {
    let mut words = vec![command];
    words.extend_from_slice(args);
    info!("$ {}", redact(&shell_words::join(words)));

    let result = run(sandbox, command, args, cwd).await;

    if !result.output().is_empty() {
        info!("{}", redact(result.output()));
    }
    let stderr = result.stderr.trim();
    if !stderr.is_empty() {
        if result.success {
            debug!("{}", redact(stderr));
        } else {
            error!("{}", redact(stderr));
        }
    }

    result
}

fn parse_json_line(text: &str) -> Option<serde_json::Value> {
    serde_json::from_str(text).ok()
}

fn push_line(lines: &Mutex<Vec<String>>, text: &str) {
    lines
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .push(text.to_string());
}

fn joined(lines: &Mutex<Vec<String>>) -> String {
    lines
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .join("\n")
}
