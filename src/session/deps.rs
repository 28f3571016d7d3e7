//! Project dependency detection and installation.
//!
//! Every step here is best-effort: a failed install is logged and the
//! session carries on with whatever is in the sandbox.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::runner::{self, CommandResult, PROJECT_DIR};
use crate::sandbox::SandboxHandle;

const GET_PIP: &str =
    "cd /tmp && curl https://bootstrap.pypa.io/get-pip.py -o get-pip.py && python3 get-pip.py && rm -f get-pip.py";

/// Node package managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Pnpm,
    Yarn,
}

impl PackageManager {
    pub fn binary(self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Pnpm => "pnpm",
            Self::Yarn => "yarn",
        }
    }

    /// Arguments for a project install.
    pub fn install_args(self) -> &'static [&'static str] {
        match self {
            Self::Npm => &["install", "--no-audit", "--no-fund"],
            Self::Pnpm | Self::Yarn => &["install"],
        }
    }

    /// Shell command that starts the `dev` script.
    pub fn dev_command(self) -> String {
        match self {
            Self::Npm => "npm run dev".to_string(),
            other => format!("{} dev", other.binary()),
        }
    }
}

impl std::fmt::Display for PackageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.binary())
    }
}

/// Decides which package manager a project uses.
#[async_trait]
pub trait PackageManagerDetector: Send + Sync {
    async fn detect(&self, sandbox: &dyn SandboxHandle) -> PackageManager;
}

/// Installs project dependencies with a given manager.
#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    async fn install(&self, sandbox: &dyn SandboxHandle, manager: PackageManager) -> CommandResult;
}

/// Picks the manager from the lockfile in the project root.
pub struct LockfileDetector;

#[async_trait]
impl PackageManagerDetector for LockfileDetector {
    async fn detect(&self, sandbox: &dyn SandboxHandle) -> PackageManager {
        for (lockfile, manager) in [
            ("pnpm-lock.yaml", PackageManager::Pnpm),
            ("yarn.lock", PackageManager::Yarn),
        ] {
            if runner::run_in_project(sandbox, "test", &["-f", lockfile]).await.success {
                return manager;
            }
        }
        PackageManager::Npm
    }
}

/// Runs `<manager> install` in the project directory.
pub struct CommandInstaller;

#[async_trait]
impl DependencyInstaller for CommandInstaller {
    async fn install(&self, sandbox: &dyn SandboxHandle, manager: PackageManager) -> CommandResult {
        runner::run_and_log(sandbox, manager.binary(), manager.install_args(), PROJECT_DIR).await
    }
}

/// Kind of dependency manifest found in the project root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Manifest {
    Node,
    Python,
}

/// Finds the project's manifest; Node wins when both exist.
pub async fn detect_manifest(sandbox: &dyn SandboxHandle) -> Option<Manifest> {
    if runner::run_in_project(sandbox, "test", &["-f", "package.json"]).await.success {
        return Some(Manifest::Node);
    }
    if runner::run_in_project(sandbox, "test", &["-f", "requirements.txt"]).await.success {
        return Some(Manifest::Python);
    }
    None
}

/// Installs Node dependencies and returns the manager that was used last.
pub async fn install_node(
    sandbox: &dyn SandboxHandle,
    detector: &dyn PackageManagerDetector,
    installer: &dyn DependencyInstaller,
) -> PackageManager {
    let detected = detector.detect(sandbox).await;
    info!("Detected package manager: {detected}");

    let manager = if detected == PackageManager::Npm {
        detected
    } else {
        ensure_manager(sandbox, detected).await
    };

    let result = installer.install(sandbox, manager).await;
    if result.success {
        return manager;
    }

    if manager == PackageManager::Npm {
        warn!("Dependency install failed, continuing without it");
        return manager;
    }

    warn!("{manager} install failed, retrying with npm");
    if !installer.install(sandbox, PackageManager::Npm).await.success {
        warn!("npm install failed, continuing without dependencies");
    }
    PackageManager::Npm
}

/// Makes sure `manager` is on the path, falling back to npm.
async fn ensure_manager(sandbox: &dyn SandboxHandle, manager: PackageManager) -> PackageManager {
    if runner::run(sandbox, "which", &[manager.binary()], "/").await.success {
        return manager;
    }

    info!("{manager} not found, installing it globally");
    if runner::run_and_log(sandbox, "npm", &["install", "-g", manager.binary()], "/")
        .await
        .success
    {
        manager
    } else {
        warn!("Could not install {manager}, falling back to npm");
        PackageManager::Npm
    }
}

/// Installs `requirements.txt`, bootstrapping pip when needed.
pub async fn install_python(sandbox: &dyn SandboxHandle) {
    if !runner::run(sandbox, "python3", &["-m", "pip", "--version"], "/").await.success {
        info!("pip not available, bootstrapping it");
        if !runner::run_and_log(sandbox, "sh", &["-c", GET_PIP], "/").await.success {
            warn!("Could not bootstrap pip, skipping Python dependencies");
            return;
        }
    }

    let result = runner::run_and_log(
        sandbox,
        "python3",
        &["-m", "pip", "install", "-r", "requirements.txt"],
        PROJECT_DIR,
    )
    .await;
    if !result.success {
        warn!("Python dependency install failed, continuing without it");
    }
}

/// Reads `package.json` and reports whether it declares a `dev` script.
pub async fn has_dev_script(sandbox: &dyn SandboxHandle) -> bool {
    let result = runner::run_in_project(sandbox, "cat", &["package.json"]).await;
    if !result.success {
        return false;
    }

    serde_json::from_str::<serde_json::Value>(&result.stdout)
        .ok()
        .and_then(|pkg| pkg.get("scripts")?.get("dev").cloned())
        .is_some_and(|dev| dev.is_string())
}
