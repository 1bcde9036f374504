//! Current branch from `git rev-parse --abbrev-ref HEAD`.

use std::path::PathBuf;

use phaseflow_core::probe::BranchProbe;

/// Asks git for the branch checked out in `repo_dir`.
///
/// Detached HEAD, a directory outside any repository, or a missing `git`
/// binary all report `None`, which Branch Safety refuses.
#[derive(Debug, Clone)]
pub struct GitBranchProbe {
    repo_dir: PathBuf,
}

impl GitBranchProbe {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }
}

/// `None` for empty output and for git's detached-HEAD answer.
fn branch_from_output(stdout: &str) -> Option<String> {
    let branch = stdout.trim();
    if branch.is_empty() || branch == "HEAD" {
        None
    } else {
        Some(branch.to_string())
    }
}

impl BranchProbe for GitBranchProbe {
    async fn current_branch(&self) -> Option<String> {
        let output = tokio::process::Command::new("git")
            .args(["rev-parse", "--abbrev-ref", "HEAD"])
            .current_dir(&self.repo_dir)
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                branch_from_output(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                tracing::debug!(
                    dir = %self.repo_dir.display(),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "git could not report the current branch"
                );
                None
            }
            Err(err) => {
                tracing::warn!("Failed to run git in {}: {err}", self.repo_dir.display());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_head_is_unknown() {
        assert_eq!(branch_from_output("HEAD\n"), None);
        assert_eq!(branch_from_output("  "), None);
        assert_eq!(branch_from_output("feature/login\n").as_deref(), Some("feature/login"));
    }

    #[tokio::test]
    async fn directory_outside_a_repository_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let probe = GitBranchProbe::new(dir.path());
        assert_eq!(probe.current_branch().await, None);
    }
}
