use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::Agent;
use crate::redact::redact;
use crate::runner::{self, StreamHandlers, PROJECT_DIR};
use crate::sandbox::{SandboxError, SandboxHandle};

/// Summary of one agent run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct AgentRun {
    /// Number of JSON events the agent emitted.
    pub events: usize,
    /// Final answer reported by the agent, if it sent one.
    pub result: Option<String>,
}

#[derive(Default)]
struct EventLog {
    events: usize,
    result: Option<String>,
}

/// Installs the agent CLI if needed and runs it against the project.
pub(crate) async fn run_agent(
    sandbox: &dyn SandboxHandle,
    agent: Agent,
    prompt: &str,
    model: Option<&str>,
) -> Result<AgentRun, SandboxError> {
    ensure_installed(sandbox, agent).await?;

    info!("Running {agent} agent");
    let log = Arc::new(Mutex::new(EventLog::default()));

    let handlers = StreamHandlers {
        on_stdout: None,
        on_stderr: Some(Arc::new(|line: &str| debug!("[AGENT] {}", redact(line)))),
        on_json_line: Some({
            let log = Arc::clone(&log);
            Arc::new(move |value: &serde_json::Value| record_event(&log, value))
        }),
    };

    let args = agent.args(prompt, model);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    runner::run_streaming(sandbox, agent.binary(), &args, PROJECT_DIR, handlers)
        .await
        .check()?;

    let log = log.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    info!("Agent finished after {} events", log.events);
    Ok(AgentRun {
        events: log.events,
        result: log.result.clone(),
    })
}

async fn ensure_installed(sandbox: &dyn SandboxHandle, agent: Agent) -> Result<(), SandboxError> {
    if runner::run(sandbox, "which", &[agent.binary()], "/").await.success {
        return Ok(());
    }

    warn!("{} not found in sandbox, installing", agent.binary());
    let (command, args) = agent.install_command();
    runner::run_and_log(sandbox, command, &args, "/")
        .await
        .check()
        .map(|_| ())
}

fn record_event(log: &Mutex<EventLog>, value: &serde_json::Value) {
    if !value.is_object() {
        return;
    }
    let kind = value.get("type").and_then(|t| t.as_str()).unwrap_or("unknown");
    debug!("agent event: {kind}");

    let mut log = log.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    log.events += 1;

    if let Some(text) = final_text(kind, value) {
        log.result = Some(text.to_string());
    }
}

/// Final text from either a `result` event or a completed agent message.
fn final_text<'a>(kind: &str, value: &'a serde_json::Value) -> Option<&'a str> {
    match kind {
        "result" => value.get("result").and_then(|r| r.as_str()),
        "item.completed" => {
            let item = value.get("item")?;
            (item.get("type").and_then(|t| t.as_str()) == Some("agent_message"))
                .then(|| item.get("text").and_then(|t| t.as_str()))
                .flatten()
        }
        _ => None,
    }
}
