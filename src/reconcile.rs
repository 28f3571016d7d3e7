//! Reconciliation of a sandbox's working tree with its remote branch.
//!
//! Sync pushes local work up; Reset throws local work away in favour of the
//! remote branch, after preserving it in a checkpoint commit.

use serde::Serialize;
use tracing::{info, warn};

use crate::runner;
use crate::sandbox::{SandboxError, SandboxHandle};

const DEFAULT_SYNC_MESSAGE: &str = "Sync local changes";
const DEFAULT_CHECKPOINT_MESSAGE: &str = "Checkpoint before reset";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub committed: bool,
    pub pushed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetOutcome {
    pub had_local_changes: bool,
}

/// Where a reset points the working tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResetTarget {
    /// The remote branch, as fetched into `FETCH_HEAD`.
    Remote,
    /// The local `HEAD`; used when the remote has no such branch.
    LocalHead,
}

impl ResetTarget {
    fn git_ref(self) -> &'static str {
        match self {
            Self::Remote => "FETCH_HEAD",
            Self::LocalHead => "HEAD",
        }
    }
}

/// Commits everything and pushes it to `branch`.
///
/// A clean tree is a no-op. A failed push leaves the commit in place.
pub async fn sync(
    sandbox: &dyn SandboxHandle,
    branch: &str,
    message: Option<&str>,
) -> Result<SyncOutcome, SandboxError> {
    git(sandbox, &["add", "."]).await?;

    let status = git(sandbox, &["status", "--porcelain"]).await?;
    if status.output().is_empty() {
        info!("No changes to sync");
        return Ok(SyncOutcome {
            committed: false,
            pushed: false,
        });
    }

    let message = message.filter(|m| !m.trim().is_empty()).unwrap_or(DEFAULT_SYNC_MESSAGE);
    git(sandbox, &["commit", "-m", message]).await?;
    git(sandbox, &["push", "origin", branch]).await?;

    info!("Synced changes to {branch}");
    Ok(SyncOutcome {
        committed: true,
        pushed: true,
    })
}

/// Resets the working tree to the remote `branch`, checkpointing local work first.
pub async fn reset(
    sandbox: &dyn SandboxHandle,
    branch: &str,
    message: Option<&str>,
) -> Result<ResetOutcome, SandboxError> {
    let status = git(sandbox, &["status", "--porcelain"]).await?;
    let had_local_changes = !status.output().is_empty();

    if had_local_changes {
        let message = message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(DEFAULT_CHECKPOINT_MESSAGE);
        git(sandbox, &["add", "."]).await?;
        git(sandbox, &["commit", "-m", message]).await?;
        info!("Committed local changes before reset");
    }

    let target = reset_target(sandbox, branch).await;
    if target == ResetTarget::Remote {
        git(sandbox, &["fetch", "origin", branch]).await?;
    }

    git(sandbox, &["reset", "--hard", target.git_ref()]).await?;

    let clean = runner::run_in_project(sandbox, "git", &["clean", "-fd"]).await;
    if !clean.success {
        warn!("git clean failed after reset: {}", clean.stderr.trim());
    }

    info!("Reset {branch} to {}", target.git_ref());
    Ok(ResetOutcome { had_local_changes })
}

async fn reset_target(sandbox: &dyn SandboxHandle, branch: &str) -> ResetTarget {
    let remote = runner::run_in_project(sandbox, "git", &["ls-remote", "--heads", "origin", branch]).await;

    if !remote.success {
        warn!(
            "Could not query remote for {branch}, resetting to local HEAD: {}",
            remote.stderr.trim()
        );
        return ResetTarget::LocalHead;
    }
    if remote.output().is_empty() {
        info!("Branch {branch} does not exist on the remote, resetting to local HEAD");
        return ResetTarget::LocalHead;
    }
    ResetTarget::Remote
}

async fn git(sandbox: &dyn SandboxHandle, args: &[&str]) -> Result<runner::CommandResult, SandboxError> {
    runner::run_in_project(sandbox, "git", args).await.check()
}
