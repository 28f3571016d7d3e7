//! Scripted sandbox for testing.
//!
//! Replies are matched against the full command line by prefix; later rules
//! take precedence over earlier ones. Unmatched commands succeed with empty
//! output. Every started process is recorded for ordering assertions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{
    CreateOptions, OutputSinks, ProcessOutput, ProcessSpec, SandboxError, SandboxHandle,
    SandboxProcess, SandboxTransport,
};

/// A single scripted reply.
#[derive(Debug, Clone)]
pub(crate) enum MockReply {
    /// Exit 0 with the given stdout.
    Ok(String),
    /// Exit with the given code and stderr.
    Fail(i32, String),
    /// The transport fails before a process exists.
    Dispatch(SandboxError),
}

impl MockReply {
    pub fn ok(stdout: &str) -> Self {
        Self::Ok(stdout.to_string())
    }

    pub fn fail(stderr: &str) -> Self {
        Self::Fail(1, stderr.to_string())
    }
}

/// A sandbox that replays scripted replies.
#[derive(Debug)]
pub(crate) struct MockSandbox {
    id: String,
    rules: Mutex<Vec<(String, MockReply)>>,
    calls: Mutex<Vec<(String, String)>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    closed: AtomicBool,
}

impl MockSandbox {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            files: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Adds a reply for every command line starting with `prefix`.
    pub fn on(self, prefix: &str, reply: MockReply) -> Self {
        self.rules
            .lock()
            .unwrap()
            .push((prefix.to_string(), reply));
        self
    }

    /// All command lines started so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(line, _)| line.clone())
            .collect()
    }

    /// Working directory of the first command starting with `prefix`.
    pub fn cwd_of(&self, prefix: &str) -> Option<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(line, _)| line.starts_with(prefix))
            .map(|(_, cwd)| cwd.clone())
    }

    /// Index of the first command starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.calls().iter().position(|line| line.starts_with(prefix))
    }

    /// Whether any command starting with `prefix` was started.
    pub fn called(&self, prefix: &str) -> bool {
        self.position(prefix).is_some()
    }

    /// Number of commands starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }

    /// Content written to `path` via `write_file`.
    pub fn written(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).to_string())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn reply_for(&self, line: &str) -> MockReply {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map_or_else(|| MockReply::ok(""), |(_, reply)| reply.clone())
    }
}

struct MockProcess {
    output: ProcessOutput,
}

#[async_trait]
impl SandboxProcess for MockProcess {
    async fn wait(self: Box<Self>) -> Result<ProcessOutput, SandboxError> {
        Ok(self.output)
    }
}

#[async_trait]
impl SandboxHandle for MockSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start_process(
        &self,
        spec: ProcessSpec,
        sinks: OutputSinks,
    ) -> Result<Box<dyn SandboxProcess>, SandboxError> {
        let mut line = spec.command.clone();
        for arg in &spec.args {
            line.push(' ');
            line.push_str(arg);
        }
        self.calls.lock().unwrap().push((line.clone(), spec.cwd));

        let output = match self.reply_for(&line) {
            MockReply::Ok(stdout) => ProcessOutput {
                exit_code: 0,
                stdout,
                stderr: String::new(),
            },
            MockReply::Fail(code, stderr) => ProcessOutput {
                exit_code: code,
                stdout: String::new(),
                stderr,
            },
            MockReply::Dispatch(err) => return Err(err),
        };

        if let Some(cb) = &sinks.on_stdout {
            output.stdout.lines().for_each(|l| cb(l));
        }
        if let Some(cb) = &sinks.on_stderr {
            output.stderr.lines().for_each(|l| cb(l));
        }

        Ok(Box::new(MockProcess { output }))
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), SandboxError> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn hostname(&self, port: u16) -> Result<String, SandboxError> {
        Ok(format!("{port}-{}.sandbox.test", self.id))
    }

    async fn close(&self) -> Result<(), SandboxError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A transport handing out one prepared [`MockSandbox`].
pub(crate) struct MockTransport {
    sandbox: Arc<MockSandbox>,
    create_error: Option<SandboxError>,
    creates: AtomicUsize,
    reconnects: AtomicUsize,
}

impl MockTransport {
    pub fn new(sandbox: Arc<MockSandbox>) -> Self {
        Self {
            sandbox,
            create_error: None,
            creates: AtomicUsize::new(0),
            reconnects: AtomicUsize::new(0),
        }
    }

    /// Makes every `create` call fail with `err`.
    pub fn failing(sandbox: Arc<MockSandbox>, err: SandboxError) -> Self {
        Self {
            create_error: Some(err),
            ..Self::new(sandbox)
        }
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxTransport for MockTransport {
    async fn create(&self, _options: &CreateOptions) -> Result<Arc<dyn SandboxHandle>, SandboxError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.create_error {
            return Err(err.clone());
        }
        Ok(self.sandbox.clone())
    }

    async fn reconnect(&self, sandbox_id: &str) -> Result<Arc<dyn SandboxHandle>, SandboxError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        if sandbox_id == self.sandbox.id() && !self.sandbox.is_closed() {
            Ok(self.sandbox.clone())
        } else {
            Err(SandboxError::gone(format!("No such container: {sandbox_id}")))
        }
    }
}
