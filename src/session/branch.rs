//! Working branch selection.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::runner::{self, PROJECT_DIR};
use crate::sandbox::{SandboxError, SandboxHandle};

/// Prefix of generated branch names.
const BRANCH_PREFIX: &str = "agent";

/// Generates `agent/<YYYY-MM-DDTHH-MM-SS>-<8 hex chars>`.
pub fn generate_branch_name() -> String {
    branch_name_at(Utc::now())
}

fn branch_name_at(now: DateTime<Utc>) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{BRANCH_PREFIX}/{}-{}",
        now.format("%Y-%m-%dT%H-%M-%S"),
        &id[..8]
    )
}

/// Checks out the working branch and returns its name.
///
/// A predetermined branch that exists on the remote is fetched and tracked;
/// otherwise (or when none is given) a new local branch is created. The clone
/// is shallow and single-branch, so a remote branch has to be fetched before
/// it can be checked out.
pub async fn check_out_branch(
    sandbox: &dyn SandboxHandle,
    predetermined: Option<&str>,
) -> Result<String, SandboxError> {
    let Some(branch) = predetermined.filter(|b| !b.trim().is_empty()) else {
        let branch = generate_branch_name();
        create_branch(sandbox, &branch).await?;
        return Ok(branch);
    };

    if remote_branch_exists(sandbox, branch).await {
        info!("Checking out existing branch {branch}");
        let refspec = format!("refs/heads/{branch}:refs/remotes/origin/{branch}");
        let fetch = ["fetch", "--depth", "1", "origin", refspec.as_str()];
        runner::run_and_log(sandbox, "git", &fetch, PROJECT_DIR).await.check()?;
        let upstream = format!("origin/{branch}");
        runner::run_and_log(sandbox, "git", &["checkout", "--track", &upstream], PROJECT_DIR)
            .await
            .check()?;
    } else {
        create_branch(sandbox, branch).await?;
    }

    Ok(branch.to_string())
}

async fn create_branch(sandbox: &dyn SandboxHandle, branch: &str) -> Result<(), SandboxError> {
    info!("Creating branch {branch}");
    runner::run_and_log(sandbox, "git", &["checkout", "-b", branch], PROJECT_DIR)
        .await
        .check()
        .map(|_| ())
}

/// `git ls-remote` succeeded and listed the branch.
async fn remote_branch_exists(sandbox: &dyn SandboxHandle, branch: &str) -> bool {
    let args = ["ls-remote", "--heads", "origin", branch];
    let result = runner::run_and_log(sandbox, "git", &args, PROJECT_DIR).await;
    result.success && !result.output().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::mock::{MockReply, MockSandbox};
    use chrono::TimeZone;
    use tracing_test::traced_test;

    #[test]
    fn test_branch_name_format() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let name = branch_name_at(now);

        assert!(name.starts_with("agent/2024-03-09T14-05-07-"));
        let suffix = name.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_branch_names_are_unique() {
        assert_ne!(generate_branch_name(), generate_branch_name());
    }

    #[tokio::test]
    async fn test_existing_remote_branch_is_checked_out() {
        let sb = MockSandbox::new("sb").on(
            "git ls-remote --heads origin agent/fix-1",
            MockReply::ok("abc123\trefs/heads/agent/fix-1\n"),
        );

        let branch = check_out_branch(&sb, Some("agent/fix-1")).await.unwrap();

        assert_eq!(branch, "agent/fix-1");
        assert!(sb.called("git fetch --depth 1 origin refs/heads/agent/fix-1"));
        assert!(sb.called("git checkout --track origin/agent/fix-1"));
        assert!(!sb.called("git checkout -b"));
    }

    #[tokio::test]
    async fn test_absent_remote_branch_is_created() {
        let sb = MockSandbox::new("sb");

        let branch = check_out_branch(&sb, Some("agent/fix-2")).await.unwrap();

        assert_eq!(branch, "agent/fix-2");
        assert!(sb.called("git checkout -b agent/fix-2"));
        assert!(!sb.called("git fetch"));
    }

    #[tokio::test]
    async fn test_generated_branch_is_created() {
        let sb = MockSandbox::new("sb");

        let branch = check_out_branch(&sb, None).await.unwrap();

        assert!(branch.starts_with("agent/"));
        assert!(sb.called(&format!("git checkout -b {branch}")));
        assert!(!sb.called("git ls-remote"));
    }

    #[tokio::test]
    async fn test_checkout_failure_is_fatal() {
        let sb = MockSandbox::new("sb").on("git checkout", MockReply::fail("invalid ref"));

        let err = check_out_branch(&sb, Some("bad..name")).await.unwrap_err();
        assert!(matches!(err, SandboxError::Command { .. }));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_branch_commands_are_logged() {
        let sb = MockSandbox::new("sb").on("git checkout", MockReply::fail("invalid ref"));

        let _ = check_out_branch(&sb, Some("bad..name")).await;

        assert!(logs_contain("$ git ls-remote --heads origin bad..name"));
        assert!(logs_contain("$ git checkout -b bad..name"));
        assert!(logs_contain("invalid ref"));
    }
}
