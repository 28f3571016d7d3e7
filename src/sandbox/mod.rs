//! Remote execution sandboxes.
//!
//! A sandbox is an ephemeral, isolated environment that can start processes
//! and receive files. The orchestrator only talks to the traits defined here;
//! [`DockerTransport`] backs them with local Docker containers.

mod docker;
mod error;
#[cfg(test)]
pub(crate) mod mock;
mod registry;

pub(crate) use docker::{task_labels, DockerTransport};
pub use error::{classify, ErrorKind, SandboxError};
pub(crate) use registry::SandboxRegistry;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Callback invoked once per line of process output.
pub type LineCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Options for creating a new sandbox.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Lifetime of the sandbox in seconds, enforced by the environment.
    pub timeout_secs: u64,
    /// Ports that should be reachable from outside the sandbox.
    pub ports: Vec<u16>,
    /// Environment variables made available to every process.
    pub env: HashMap<String, String>,
    /// Free-form labels attached to the sandbox (task id, etc.).
    pub labels: HashMap<String, String>,
}

/// A process to start inside a sandbox.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: String,
}

impl ProcessSpec {
    /// Creates a process spec.
    pub fn new(command: &str, args: &[&str], cwd: &str) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
            cwd: cwd.to_string(),
        }
    }
}

/// Line callbacks attached to a started process.
#[derive(Clone, Default)]
pub struct OutputSinks {
    pub on_stdout: Option<LineCallback>,
    pub on_stderr: Option<LineCallback>,
}

impl std::fmt::Debug for OutputSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSinks")
            .field("on_stdout", &self.on_stdout.is_some())
            .field("on_stderr", &self.on_stderr.is_some())
            .finish()
    }
}

/// Final output of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Creates sandboxes and reconnects to existing ones.
#[async_trait]
pub trait SandboxTransport: Send + Sync {
    /// Provisions a new sandbox.
    async fn create(&self, options: &CreateOptions) -> Result<Arc<dyn SandboxHandle>, SandboxError>;

    /// Reattaches to a sandbox created earlier, by its persisted id.
    async fn reconnect(&self, sandbox_id: &str) -> Result<Arc<dyn SandboxHandle>, SandboxError>;
}

/// A live connection to one sandbox.
#[async_trait]
pub trait SandboxHandle: Send + Sync {
    /// Returns the transport-level id used to reconnect later.
    fn id(&self) -> &str;

    /// Starts a process. Output lines are delivered to `sinks` as they arrive.
    async fn start_process(
        &self,
        spec: ProcessSpec,
        sinks: OutputSinks,
    ) -> Result<Box<dyn SandboxProcess>, SandboxError>;

    /// Writes a file at an absolute path inside the sandbox.
    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), SandboxError>;

    /// Resolves the public host for a port exposed by the sandbox.
    async fn hostname(&self, port: u16) -> Result<String, SandboxError>;

    /// Tears the sandbox down.
    async fn close(&self) -> Result<(), SandboxError>;
}

/// A process running inside a sandbox.
///
/// Dropping a process without waiting detaches it; it keeps running.
#[async_trait]
pub trait SandboxProcess: Send {
    /// Blocks until the process exits.
    async fn wait(self: Box<Self>) -> Result<ProcessOutput, SandboxError>;
}
