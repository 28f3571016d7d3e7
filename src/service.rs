//! Task-level operations, answered with status envelopes.
//!
//! Every operation looks the task up for the calling user, finds a live
//! handle for its sandbox (registry first, then reconnect by the persisted
//! id) and maps the outcome to an [`Envelope`]. Internal error text is
//! logged; callers only ever see the generic message for the operation.

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::agent::{self, Agent};
use crate::files::{self, Transfer};
use crate::redact::redact;
use crate::reconcile;
use crate::sandbox::{ErrorKind, SandboxError, SandboxHandle, SandboxRegistry, SandboxTransport};
use crate::session::{BuilderSettings, SandboxConfig, SessionBuilder, SessionOutcome, SessionResult};
use crate::tasks::{TaskRecord, TaskStore};

/// Non-standard status for a session the caller cancelled.
const STATUS_CANCELLED: u16 = 499;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Task not found")]
    TaskNotFound,

    #[error("Sandbox not available")]
    SandboxNotAvailable,

    #[error("Branch not available")]
    BranchNotAvailable,

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("Task store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn status(&self) -> u16 {
        match self {
            Self::TaskNotFound => 404,
            Self::SandboxNotAvailable | Self::BranchNotAvailable => 400,
            Self::Sandbox(err) => match err.kind() {
                ErrorKind::Config => 400,
                ErrorKind::Gone => 410,
                _ => 500,
            },
            Self::Store(_) => 500,
        }
    }

    fn is_gone(&self) -> bool {
        matches!(self, Self::Sandbox(err) if err.is_gone())
    }
}

/// Operations the service answers for; each has its own generic failure text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateSession,
    RunAgent,
    Sync,
    Reset,
    CreateFolder,
    DeleteFile,
    FileOperation,
    SaveFile,
    StopSandbox,
    DeleteTask,
}

impl Operation {
    fn failure_message(self) -> &'static str {
        match self {
            Self::CreateSession => "An error occurred while creating the sandbox",
            Self::RunAgent => "An error occurred while running the agent",
            Self::Sync => "An error occurred while syncing changes",
            Self::Reset => "An error occurred while resetting changes",
            Self::CreateFolder => "An error occurred while creating the folder",
            Self::DeleteFile => "An error occurred while deleting the file",
            Self::FileOperation => "An error occurred while performing the file operation",
            Self::SaveFile => "An error occurred while saving the file",
            Self::StopSandbox => "An error occurred while stopping the sandbox",
            Self::DeleteTask => "An error occurred while deleting the task",
        }
    }
}

/// Response handed to the request layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub success: bool,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Envelope {
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            status: 200,
            message: Some(message.into()),
            error: None,
            data,
        }
    }

    pub fn failure(status: u16, error: impl Into<String>) -> Self {
        Self {
            success: false,
            status,
            message: None,
            error: Some(error.into()),
            data: Value::Null,
        }
    }

    fn from_error(operation: Operation, err: &ServiceError) -> Self {
        let status = err.status();
        let text = match err {
            ServiceError::Sandbox(inner) if inner.is_gone() => "Sandbox is not running".to_string(),
            ServiceError::Sandbox(SandboxError::Config { message }) => message.clone(),
            // Creation timeouts carry a fixed, user-facing hint.
            ServiceError::Sandbox(inner)
                if operation == Operation::CreateSession && inner.is_timeout() =>
            {
                inner.to_string()
            }
            ServiceError::Sandbox(_) | ServiceError::Store(_) => {
                error!("{operation:?} failed: {}", redact(&err.to_string()));
                operation.failure_message().to_string()
            }
            other => other.to_string(),
        };
        Self::failure(status, text)
    }
}

pub struct TaskService {
    store: Arc<dyn TaskStore>,
    transport: Arc<dyn SandboxTransport>,
    registry: Arc<SandboxRegistry>,
    builder: SessionBuilder,
}

impl TaskService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        transport: Arc<dyn SandboxTransport>,
        registry: Arc<SandboxRegistry>,
        settings: BuilderSettings,
    ) -> Self {
        let builder = SessionBuilder::new(Arc::clone(&transport), Arc::clone(&registry), settings);
        Self {
            store,
            transport,
            registry,
            builder,
        }
    }

    /// Creates a task and its sandbox. The task id is taken from `config`.
    pub async fn create_session(&self, user_id: &str, config: SandboxConfig) -> Envelope {
        let mut task = TaskRecord::new(user_id, &config.repo_url, &config.agent.to_string());
        task.id.clone_from(&config.task_id);
        task.keep_alive = config.keep_alive;

        let outcome = self.builder.create(&config).await;
        let summary = SessionResult::from(&outcome);

        let session = match outcome {
            Ok(SessionOutcome::Ready(session)) => session,
            Ok(SessionOutcome::Cancelled) => {
                return Envelope::failure(STATUS_CANCELLED, "Sandbox creation cancelled");
            }
            Err(err) => return Envelope::from_error(Operation::CreateSession, &err.into()),
        };

        task.sandbox_id = Some(session.sandbox.id().to_string());
        task.branch_name = Some(session.branch_name.clone());
        if let Err(err) = self.store.save(&task) {
            // Without a saved record the sandbox could never be found again.
            self.registry.remove(&task.id);
            if let Err(close_err) = session.sandbox.close().await {
                warn!(task_id = %task.id, "Failed to close sandbox: {}", redact(&close_err.to_string()));
            }
            return Envelope::from_error(Operation::CreateSession, &err.into());
        }

        info!(task_id = %task.id, sandbox_id = session.sandbox.id(), "Session ready");
        let mut data = json!(summary);
        data["taskId"] = json!(task.id);
        Envelope::ok("Sandbox created", data)
    }

    /// Runs the task's agent, then closes the sandbox unless it is kept alive.
    pub async fn run_agent(&self, task_id: &str, user_id: &str, prompt: &str, model: Option<&str>) -> Envelope {
        let result: Result<_, ServiceError> = async {
            let mut task = self.find(task_id, user_id)?;
            let agent = task
                .agent
                .parse::<Agent>()
                .map_err(|e| SandboxError::config(e.to_string()))?;
            let sandbox = self.resolve(&task).await?;

            let run = agent::run_agent(sandbox.as_ref(), agent, prompt, model).await;

            if !self.registry.should_keep_alive(task_id) {
                self.shut_down(&mut task, sandbox.as_ref()).await?;
            }
            Ok(run?)
        }
        .await;

        self.finish(task_id, Operation::RunAgent, result, |run| {
            ("Agent finished".to_string(), json!({ "events": run.events, "result": run.result }))
        })
    }

    pub async fn sync_changes(&self, task_id: &str, user_id: &str, message: Option<&str>) -> Envelope {
        let result: Result<_, ServiceError> = async {
            let (task, branch) = self.find_with_branch(task_id, user_id)?;
            let sandbox = self.resolve(&task).await?;
            Ok(reconcile::sync(sandbox.as_ref(), &branch, message).await?)
        }
        .await;

        self.finish(task_id, Operation::Sync, result, |outcome| {
            let message = if outcome.committed {
                "Changes synced"
            } else {
                "No changes to sync"
            };
            (message.to_string(), json!(outcome))
        })
    }

    pub async fn reset_changes(&self, task_id: &str, user_id: &str, message: Option<&str>) -> Envelope {
        let result: Result<_, ServiceError> = async {
            let (task, branch) = self.find_with_branch(task_id, user_id)?;
            let sandbox = self.resolve(&task).await?;
            Ok(reconcile::reset(sandbox.as_ref(), &branch, message).await?)
        }
        .await;

        self.finish(task_id, Operation::Reset, result, |outcome| {
            ("Changes reset".to_string(), json!(outcome))
        })
    }

    pub async fn create_folder(&self, task_id: &str, user_id: &str, name: &str) -> Envelope {
        let result: Result<_, ServiceError> = async {
            let sandbox = self.sandbox_for(task_id, user_id).await?;
            Ok(files::create_folder(sandbox.as_ref(), name).await?)
        }
        .await;

        self.finish(task_id, Operation::CreateFolder, result, |()| {
            (format!("Folder '{name}' created"), Value::Null)
        })
    }

    pub async fn delete_file(&self, task_id: &str, user_id: &str, name: &str) -> Envelope {
        let result: Result<_, ServiceError> = async {
            let sandbox = self.sandbox_for(task_id, user_id).await?;
            Ok(files::delete_file(sandbox.as_ref(), name).await?)
        }
        .await;

        self.finish(task_id, Operation::DeleteFile, result, |()| {
            (format!("File '{name}' deleted"), Value::Null)
        })
    }

    /// `operation` is `copy` or `cut`.
    pub async fn file_operation(
        &self,
        task_id: &str,
        user_id: &str,
        operation: &str,
        source: &str,
        target_dir: Option<&str>,
    ) -> Envelope {
        let result: Result<_, ServiceError> = async {
            let transfer: Transfer = operation.parse()?;
            let sandbox = self.sandbox_for(task_id, user_id).await?;
            files::transfer(sandbox.as_ref(), transfer, source, target_dir).await?;
            Ok(transfer)
        }
        .await;

        self.finish(task_id, Operation::FileOperation, result, |transfer| {
            let verb = match transfer {
                Transfer::Copy => "copied",
                Transfer::Move => "moved",
            };
            (format!("'{source}' {verb}"), Value::Null)
        })
    }

    pub async fn save_file(&self, task_id: &str, user_id: &str, name: &str, content: &str) -> Envelope {
        let result: Result<_, ServiceError> = async {
            let sandbox = self.sandbox_for(task_id, user_id).await?;
            Ok(files::save_file(sandbox.as_ref(), name, content).await?)
        }
        .await;

        self.finish(task_id, Operation::SaveFile, result, |()| {
            (format!("File '{name}' saved"), Value::Null)
        })
    }

    /// Closes the sandbox and detaches it from the task.
    pub async fn stop_sandbox(&self, task_id: &str, user_id: &str) -> Envelope {
        let result: Result<_, ServiceError> = async {
            let mut task = self.find(task_id, user_id)?;
            if task.sandbox_id.is_none() {
                return Err(ServiceError::SandboxNotAvailable);
            }
            self.stop(&mut task).await
        }
        .await;

        self.finish(task_id, Operation::StopSandbox, result, |()| {
            ("Sandbox stopped".to_string(), Value::Null)
        })
    }

    /// Stops the task's sandbox, if any, and soft-deletes the task.
    pub async fn delete_task(&self, task_id: &str, user_id: &str) -> Envelope {
        let result: Result<_, ServiceError> = async {
            let mut task = self.find(task_id, user_id)?;
            if task.sandbox_id.is_some() {
                self.stop(&mut task).await?;
            }
            task.deleted_at = Some(chrono::Utc::now());
            task.touch();
            self.store.save(&task)?;
            Ok(())
        }
        .await;

        self.finish(task_id, Operation::DeleteTask, result, |()| {
            ("Task deleted".to_string(), Value::Null)
        })
    }

    fn find(&self, task_id: &str, user_id: &str) -> Result<TaskRecord, ServiceError> {
        self.store
            .find_task(task_id, user_id)?
            .ok_or(ServiceError::TaskNotFound)
    }

    fn find_with_branch(&self, task_id: &str, user_id: &str) -> Result<(TaskRecord, String), ServiceError> {
        let task = self.find(task_id, user_id)?;
        if task.sandbox_id.is_none() {
            return Err(ServiceError::SandboxNotAvailable);
        }
        let branch = task
            .branch_name
            .clone()
            .ok_or(ServiceError::BranchNotAvailable)?;
        Ok((task, branch))
    }

    async fn sandbox_for(&self, task_id: &str, user_id: &str) -> Result<Arc<dyn SandboxHandle>, ServiceError> {
        let task = self.find(task_id, user_id)?;
        self.resolve(&task).await
    }

    /// Registry first, then reconnect by the persisted id.
    async fn resolve(&self, task: &TaskRecord) -> Result<Arc<dyn SandboxHandle>, ServiceError> {
        let sandbox_id = task
            .sandbox_id
            .as_deref()
            .ok_or(ServiceError::SandboxNotAvailable)?;

        if let Some(handle) = self.registry.get(&task.id) {
            return Ok(handle);
        }

        let handle = self.transport.reconnect(sandbox_id).await?;
        self.registry.register(&task.id, &handle, task.keep_alive);
        Ok(handle)
    }

    /// Closes whatever sandbox the task has; a sandbox that is already gone counts as stopped.
    async fn stop(&self, task: &mut TaskRecord) -> Result<(), ServiceError> {
        match self.resolve(task).await {
            Ok(sandbox) => self.shut_down(task, sandbox.as_ref()).await,
            Err(err) if err.is_gone() => {
                info!(task_id = %task.id, "Sandbox already gone");
                self.detach(task)
            }
            Err(err) => Err(err),
        }
    }

    async fn shut_down(&self, task: &mut TaskRecord, sandbox: &dyn SandboxHandle) -> Result<(), ServiceError> {
        if let Err(err) = sandbox.close().await {
            if !err.is_gone() {
                return Err(err.into());
            }
        }
        info!(task_id = %task.id, sandbox_id = sandbox.id(), "Sandbox closed");
        self.detach(task)
    }

    fn detach(&self, task: &mut TaskRecord) -> Result<(), ServiceError> {
        self.registry.remove(&task.id);
        task.sandbox_id = None;
        task.touch();
        self.store.save(task)?;
        Ok(())
    }

    fn finish<T>(
        &self,
        task_id: &str,
        operation: Operation,
        result: Result<T, ServiceError>,
        on_success: impl FnOnce(T) -> (String, Value),
    ) -> Envelope {
        match result {
            Ok(value) => {
                let (message, data) = on_success(value);
                Envelope::ok(message, data)
            }
            Err(err) => {
                if err.is_gone() {
                    warn!(task_id, "Sandbox is no longer running");
                    self.registry.remove(task_id);
                }
                Envelope::from_error(operation, &err)
            }
        }
    }
}
