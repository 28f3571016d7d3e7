//! Docker-backed sandboxes.
//!
//! Each sandbox is a long-lived container running `sleep <timeout>`, so the
//! environment itself enforces the sandbox lifetime. Processes are Docker
//! execs whose attached output is split into lines on a reader task.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions, LogOutput,
    RemoveContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::ExecInspectResponse;
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tar::{Builder, Header};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    CreateOptions, LineCallback, OutputSinks, ProcessOutput, ProcessSpec, SandboxError,
    SandboxHandle, SandboxProcess, SandboxTransport,
};
use crate::config::SandboxSettings;

/// Label carrying the owning task id.
const TASK_LABEL: &str = "taskbox.task";

/// Creates and reconnects to Docker container sandboxes.
pub(crate) struct DockerTransport {
    docker: Docker,
    image: String,
    create_timeout: Duration,
}

impl DockerTransport {
    pub fn new(settings: &SandboxSettings) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker. Is Docker running?")?;

        Ok(Self {
            docker,
            image: settings.image.clone(),
            create_timeout: Duration::from_secs(settings.create_timeout_secs),
        })
    }

    async fn provision(&self, options: &CreateOptions) -> Result<Arc<dyn SandboxHandle>, SandboxError> {
        self.docker.ping().await?;
        self.ensure_image().await?;

        let name = format!(
            "taskbox-{}",
            uuid::Uuid::new_v4()
                .to_string()
                .split('-')
                .next()
                .unwrap_or_default()
        );

        let exposed_ports: HashMap<String, HashMap<(), ()>> = options
            .ports
            .iter()
            .map(|port| (format!("{port}/tcp"), HashMap::new()))
            .collect();
        let env: Vec<String> = options
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();

        let config = ContainerConfig {
            image: Some(self.image.clone()),
            cmd: Some(vec!["sleep".to_string(), options.timeout_secs.to_string()]),
            env: Some(env),
            labels: Some(options.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(bollard::service::HostConfig {
                publish_all_ports: Some(true),
                auto_remove: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        debug!("Creating container: {}", name);
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                config,
            )
            .await?;

        debug!("Starting container");
        self.docker
            .start_container::<String>(&created.id, None)
            .await?;

        info!(
            container = %name,
            task = options.labels.get(TASK_LABEL).map_or("", String::as_str),
            "Sandbox container started"
        );
        Ok(Arc::new(DockerSandbox {
            docker: self.docker.clone(),
            id: created.id,
        }))
    }

    async fn ensure_image(&self) -> Result<(), SandboxError> {
        if self.docker.inspect_image(&self.image).await.is_ok() {
            return Ok(());
        }

        info!("Pulling image {}...", self.image);
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: self.image.clone(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Some(error) = chunk.error {
                return Err(SandboxError::transport(format!("Docker pull error: {error}")));
            }
        }
        Ok(())
    }
}

/// Builds the label set identifying a task's sandbox.
pub(crate) fn task_labels(task_id: &str) -> HashMap<String, String> {
    HashMap::from([(TASK_LABEL.to_string(), task_id.to_string())])
}

#[async_trait]
impl SandboxTransport for DockerTransport {
    async fn create(&self, options: &CreateOptions) -> Result<Arc<dyn SandboxHandle>, SandboxError> {
        match tokio::time::timeout(self.create_timeout, self.provision(options)).await {
            Ok(result) => result,
            Err(_) => Err(SandboxError::timeout(self.create_timeout)),
        }
    }

    async fn reconnect(&self, sandbox_id: &str) -> Result<Arc<dyn SandboxHandle>, SandboxError> {
        let info = self
            .docker
            .inspect_container(sandbox_id, None::<InspectContainerOptions>)
            .await?;

        let running = info.state.and_then(|s| s.running).unwrap_or(false);
        if !running {
            return Err(SandboxError::gone(format!(
                "Container {sandbox_id} is not running"
            )));
        }

        debug!("Reconnected to container {}", sandbox_id);
        Ok(Arc::new(DockerSandbox {
            docker: self.docker.clone(),
            id: sandbox_id.to_string(),
        }))
    }
}

/// One running container.
struct DockerSandbox {
    docker: Docker,
    id: String,
}

#[async_trait]
impl SandboxHandle for DockerSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start_process(
        &self,
        spec: ProcessSpec,
        sinks: OutputSinks,
    ) -> Result<Box<dyn SandboxProcess>, SandboxError> {
        let mut cmd = Vec::with_capacity(spec.args.len() + 1);
        cmd.push(spec.command);
        cmd.extend(spec.args);

        let exec = self
            .docker
            .create_exec(
                &self.id,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some(spec.cwd),
                    ..Default::default()
                },
            )
            .await?;

        let StartExecResults::Attached { mut output, .. } =
            self.docker.start_exec(&exec.id, None).await?
        else {
            return Err(SandboxError::transport("Exec started detached"));
        };

        let reader = tokio::spawn(async move {
            let mut stdout = LineBuffer::new(sinks.on_stdout);
            let mut stderr = LineBuffer::new(sinks.on_stderr);

            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => stdout.push(&message),
                    Ok(LogOutput::StdErr { message }) => stderr.push(&message),
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Error reading exec output: {}", e);
                        return Err(SandboxError::from(e));
                    }
                }
            }

            Ok((stdout.finish(), stderr.finish()))
        });

        Ok(Box::new(DockerProcess {
            docker: self.docker.clone(),
            exec_id: exec.id,
            reader,
        }))
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), SandboxError> {
        let archive = tar_single_file(path, content)
            .map_err(|e| SandboxError::transport(format!("Failed to build archive: {e}")))?;

        self.docker
            .upload_to_container(
                &self.id,
                Some(UploadToContainerOptions {
                    path: "/".to_string(),
                    ..Default::default()
                }),
                archive.into(),
            )
            .await?;
        Ok(())
    }

    async fn hostname(&self, port: u16) -> Result<String, SandboxError> {
        let info = self
            .docker
            .inspect_container(&self.id, None::<InspectContainerOptions>)
            .await?;

        let key = format!("{port}/tcp");
        info.network_settings
            .and_then(|settings| settings.ports)
            .and_then(|ports| ports.get(&key).cloned().flatten())
            .and_then(|bindings| bindings.into_iter().find_map(|b| b.host_port))
            .map(|host_port| format!("localhost:{host_port}"))
            .ok_or_else(|| SandboxError::transport(format!("Port {port} is not published")))
    }

    async fn close(&self) -> Result<(), SandboxError> {
        debug!("Removing container {}", self.id);
        self.docker
            .remove_container(
                &self.id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }
}

type ReaderResult = Result<(String, String), SandboxError>;

struct DockerProcess {
    docker: Docker,
    exec_id: String,
    reader: JoinHandle<ReaderResult>,
}

#[async_trait]
impl SandboxProcess for DockerProcess {
    async fn wait(self: Box<Self>) -> Result<ProcessOutput, SandboxError> {
        let (stdout, stderr) = self
            .reader
            .await
            .map_err(|e| SandboxError::transport(format!("Output reader failed: {e}")))??;

        // The attached stream can close a moment before the exec is reported finished.
        let mut inspect = self.docker.inspect_exec(&self.exec_id).await?;
        for _ in 0..50 {
            if inspect.running != Some(true) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            inspect = self.docker.inspect_exec(&self.exec_id).await?;
        }

        let exit_code = exit_code_of(&self.exec_id, &inspect)?;

        Ok(ProcessOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

/// Exit code of a finished exec. A code that is missing or still pending is an error.
fn exit_code_of(exec_id: &str, inspect: &ExecInspectResponse) -> Result<i32, SandboxError> {
    inspect
        .exit_code
        .filter(|_| inspect.running != Some(true))
        .and_then(|code| i32::try_from(code).ok())
        .ok_or_else(|| SandboxError::transport(format!("Exec {exec_id} did not report an exit code")))
}

/// Splits raw output chunks into lines, forwarding each to a callback.
struct LineBuffer {
    pending: Vec<u8>,
    collected: String,
    callback: Option<LineCallback>,
}

impl LineBuffer {
    fn new(callback: Option<LineCallback>) -> Self {
        Self {
            pending: Vec::new(),
            collected: String::new(),
            callback,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.collected.push_str(&String::from_utf8_lossy(chunk));
        self.pending.extend_from_slice(chunk);

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit(&line[..line.len() - 1]);
        }
    }

    fn finish(mut self) -> String {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.emit(&rest);
        }
        self.collected
    }

    fn emit(&self, line: &[u8]) {
        if let Some(cb) = &self.callback {
            let text = String::from_utf8_lossy(line);
            cb(text.strip_suffix('\r').unwrap_or(&*text));
        }
    }
}

/// Wraps one file in a tar archive rooted at `/`.
fn tar_single_file(path: &str, content: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut header = Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut buf = Vec::new();
    {
        let mut tar = Builder::new(&mut buf);
        tar.append_data(&mut header, path.trim_start_matches('/'), content)?;
        tar.finish()?;
    }
    Ok(buf)
}
