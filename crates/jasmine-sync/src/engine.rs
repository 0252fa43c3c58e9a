//! Sync state machine
//!
//! `Unvalidated -> Validated -> Synced`, with `Rejected` as the terminal
//! failure state. Validation checks the local repository: origin URL, then
//! working tree, then data cache, then branch. Application wires the data
//! cache on the target host and runs the git operations (or an rsync
//! transfer) one command at a time.

use jasmine_core::{
    render_git_operation, ConnectionSpec, JasmineError, JasmineResult, RejectReason, SyncMethod,
    Target,
};
use jasmine_runtime::{shell, CommandExecutor, CommandOutput};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::repo::{
    is_data_cache_clean, normalize_repo_url, with_runner, DATA_CACHE_REMOTE, GIT_BRANCH,
    GIT_REMOTE_URL, GIT_STATUS,
};

/// Result of the validation pass, recomputed on every sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub current_branch: String,
    pub is_clean: bool,
    pub remote_url_matches: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPhase {
    Unvalidated,
    Validated(SyncState),
    Synced(SyncState),
    Rejected(String),
}

/// Where validated state gets applied
pub struct SyncDestination<'a> {
    pub exec: &'a dyn CommandExecutor,
    pub work_dir: &'a str,
    /// Remote connection, used as the rsync destination
    pub connection: Option<&'a ConnectionSpec>,
    /// The work dir is the validated checkout itself, so no transfer runs
    pub in_place: bool,
}

/// Drives one target (or one fleet server) through sync
pub struct SyncEngine<'a> {
    target: &'a Target,
    src_dir: PathBuf,
    cancel: CancellationToken,
    phase: SyncPhase,
}

impl<'a> SyncEngine<'a> {
    pub fn new(target: &'a Target, src_dir: impl Into<PathBuf>, cancel: CancellationToken) -> Self {
        Self {
            target,
            src_dir: src_dir.into(),
            cancel,
            phase: SyncPhase::Unvalidated,
        }
    }

    /// An engine that reuses a validation pass already made for this target
    pub fn validated(
        target: &'a Target,
        src_dir: impl Into<PathBuf>,
        state: SyncState,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            target,
            src_dir: src_dir.into(),
            cancel,
            phase: SyncPhase::Validated(state),
        }
    }

    pub fn phase(&self) -> &SyncPhase {
        &self.phase
    }

    fn src_dir(&self) -> String {
        self.src_dir.display().to_string()
    }

    fn check_cancelled(&self) -> JasmineResult<()> {
        if self.cancel.is_cancelled() {
            warn!(target = %self.target.name, "Sync cancelled");
            return Err(JasmineError::Cancelled {
                phase: "sync".to_string(),
            });
        }
        Ok(())
    }

    fn reject(&mut self, reason: RejectReason) -> JasmineError {
        warn!(target = %self.target.name, reason = %reason, "Sync rejected");
        self.phase = SyncPhase::Rejected(reason.code().to_string());
        JasmineError::rejected(reason)
    }

    fn fail(&mut self, err: JasmineError) -> JasmineError {
        if let JasmineError::CommandFailed { command, .. } = &err {
            self.phase = SyncPhase::Rejected(command.clone());
        }
        err
    }

    fn uses_data_cache(&self) -> bool {
        self.target.uses_data_cache() || Path::new(&self.src_dir).join(".dvc").is_dir()
    }

    async fn run_local(
        &mut self,
        local: &dyn CommandExecutor,
        command: &str,
    ) -> JasmineResult<CommandOutput> {
        self.check_cancelled()?;
        let src_dir = self.src_dir();
        local
            .run_checked(command, Some(&src_dir))
            .await
            .map_err(|e| self.fail(e))
    }

    /// Validate the local repository against the target
    pub async fn validate(&mut self, local: &dyn CommandExecutor) -> JasmineResult<SyncState> {
        let target = self.target;
        self.phase = SyncPhase::Unvalidated;
        let src_dir = self.src_dir();
        debug!(target = %target.name, src_dir = %src_dir, "Validating source repository");

        let mut remote_url_matches = true;
        if let Some(expected) = &target.repo_url {
            self.check_cancelled()?;
            let output = local.run(GIT_REMOTE_URL, Some(&src_dir)).await?;
            let local_url = output.stdout.trim().to_string();
            if !output.success() || local_url.is_empty() {
                return Err(self.reject(RejectReason::MissingRemoteUrl));
            }
            remote_url_matches = normalize_repo_url(&local_url) == normalize_repo_url(expected);
            if !remote_url_matches {
                return Err(self.reject(RejectReason::RemoteUrlMismatch {
                    local: local_url,
                    expected: expected.clone(),
                }));
            }
        }

        let status = self.run_local(local, GIT_STATUS).await?;
        if !status.stdout.trim().is_empty() {
            return Err(self.reject(RejectReason::DirtyWorkingTree));
        }

        if self.uses_data_cache() {
            let command = with_runner(target.command_runner.as_deref(), "dvc status");
            let status = self.run_local(local, &command).await?;
            if !is_data_cache_clean(&status.stdout) {
                return Err(self.reject(RejectReason::DirtyDataCache));
            }
        }

        let branch = self.run_local(local, GIT_BRANCH).await?;
        let current_branch = branch.stdout.trim().to_string();
        if current_branch == "HEAD" {
            warn!(target = %target.name, "Source repository is on a detached HEAD");
        }

        let state = SyncState {
            current_branch,
            is_clean: true,
            remote_url_matches,
        };
        info!(target = %target.name, branch = %state.current_branch, "Source repository validated");
        self.phase = SyncPhase::Validated(state.clone());
        Ok(state)
    }

    async fn run_step(
        &mut self,
        exec: &dyn CommandExecutor,
        command: &str,
        cwd: Option<&str>,
    ) -> JasmineResult<()> {
        self.check_cancelled()?;
        debug!(target = %self.target.name, host = exec.host(), command = command, "Sync step");
        exec.run_checked(command, cwd)
            .await
            .map(|_| ())
            .map_err(|e| self.fail(e))
    }

    /// Apply the validated state to a destination
    pub async fn apply(
        &mut self,
        local: &dyn CommandExecutor,
        dest: &SyncDestination<'_>,
    ) -> JasmineResult<SyncState> {
        let target = self.target;
        let state = match &self.phase {
            SyncPhase::Validated(state) | SyncPhase::Synced(state) => state.clone(),
            _ => {
                return Err(JasmineError::ConfigurationInconsistent(format!(
                    "target '{}': sync applied before validation",
                    target.name
                )))
            }
        };
        let runner = target.command_runner.as_deref();
        let work_dir = Some(dest.work_dir);

        if let Some(cache) = &target.dvc_cache {
            let command = with_runner(
                runner,
                &format!("dvc cache dir --local {}", shell::quote(cache)),
            );
            self.run_step(dest.exec, &command, work_dir).await?;
        }

        if let Some(remote) = &target.dvc_remote {
            let add = with_runner(
                runner,
                &format!(
                    "dvc remote add --local {} {} --force",
                    DATA_CACHE_REMOTE,
                    shell::quote(remote)
                ),
            );
            self.run_step(dest.exec, &add, work_dir).await?;
            let pull = with_runner(runner, &format!("dvc pull -r {} --force", DATA_CACHE_REMOTE));
            self.run_step(dest.exec, &pull, work_dir).await?;
        }

        if !dest.in_place {
            match target.sync_method {
                SyncMethod::Git => {
                    for template in target.effective_git_operations() {
                        let command = render_git_operation(&template, &state.current_branch);
                        self.run_step(dest.exec, &command, work_dir).await?;
                    }
                }
                SyncMethod::Rsync => {
                    let command = self.rsync_command(dest);
                    self.run_step(local, &command, None).await?;
                }
            }
        }

        info!(
            target = %target.name,
            host = dest.exec.host(),
            branch = %state.current_branch,
            "Target synced"
        );
        self.phase = SyncPhase::Synced(state.clone());
        Ok(state)
    }

    /// Validate, then apply
    pub async fn sync(
        &mut self,
        local: &dyn CommandExecutor,
        dest: &SyncDestination<'_>,
    ) -> JasmineResult<SyncState> {
        self.validate(local).await?;
        self.apply(local, dest).await
    }

    /// `rsync` invocation pushing the source tree to the destination
    pub fn rsync_command(&self, dest: &SyncDestination<'_>) -> String {
        let mut parts = vec!["rsync".to_string(), "-az".to_string(), "--delete".to_string()];
        for pattern in &self.target.sync_exclude {
            parts.push("--exclude".to_string());
            parts.push(shell::quote(pattern));
        }

        let remote_dir = dest.work_dir.strip_prefix("~/").unwrap_or(dest.work_dir);
        let remote_dir = remote_dir.trim_end_matches('/');
        let destination = match dest.connection {
            Some(conn) => {
                let options = conn.ssh_options();
                if !options.is_empty() {
                    parts.push("-e".to_string());
                    parts.push(shell::quote(&format!("ssh {}", options.join(" "))));
                }
                format!("{}:{}/", conn.destination(), remote_dir)
            }
            None => format!("{}/", remote_dir),
        };

        let source = format!("{}/", self.src_dir().trim_end_matches('/'));
        parts.push(shell::quote(&source));
        parts.push(shell::quote(&destination));
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jasmine_core::Mode;
    use jasmine_runtime::mock::{MockExecutor, MockResponse};

    const REPO: &str = "git@github.com:org/project.git";

    fn target() -> Target {
        let mut target = Target::new("bunny", Mode::RemoteSsh);
        target.connection = Some(ConnectionSpec::new("gpu1"));
        target.work_dir = Some("~/src/project".to_string());
        target.repo_url = Some(REPO.to_string());
        target
    }

    fn clean_local() -> MockExecutor {
        let local = MockExecutor::new("localhost");
        local.respond(GIT_REMOTE_URL, MockResponse::ok("https://github.com/org/project.git"));
        local.respond(GIT_BRANCH, MockResponse::ok("main"));
        local
    }

    fn dest<'a>(exec: &'a MockExecutor, conn: Option<&'a ConnectionSpec>) -> SyncDestination<'a> {
        SyncDestination {
            exec,
            work_dir: "~/src/project",
            connection: conn,
            in_place: false,
        }
    }

    #[tokio::test]
    async fn test_validate_order_and_state() {
        let target = target();
        let local = clean_local();
        let mut engine = SyncEngine::new(&target, "/work/project", CancellationToken::new());

        let state = engine.validate(&local).await.unwrap();
        assert_eq!(state.current_branch, "main");
        assert!(state.is_clean && state.remote_url_matches);
        assert_eq!(local.commands(), vec![GIT_REMOTE_URL, GIT_STATUS, GIT_BRANCH]);
        assert_eq!(local.calls()[0].cwd.as_deref(), Some("/work/project"));
        assert!(matches!(engine.phase(), SyncPhase::Validated(_)));
    }

    #[tokio::test]
    async fn test_url_mismatch_short_circuits() {
        let target = target();
        let local = MockExecutor::new("localhost");
        local.respond(GIT_REMOTE_URL, MockResponse::ok("git@github.com:someone/else.git"));
        let mut engine = SyncEngine::new(&target, "/work/project", CancellationToken::new());

        let err = engine.validate(&local).await.unwrap_err();
        assert!(matches!(
            err,
            JasmineError::ValidationRejected {
                reason: RejectReason::RemoteUrlMismatch { .. }
            }
        ));
        assert_eq!(local.commands(), vec![GIT_REMOTE_URL]);
        assert_eq!(
            engine.phase(),
            &SyncPhase::Rejected("remote-url-mismatch".to_string())
        );
    }

    #[tokio::test]
    async fn test_dirty_tree_rejected() {
        let target = target();
        let local = clean_local();
        local.respond(GIT_STATUS, MockResponse::ok(" M src/train.py"));
        let mut engine = SyncEngine::new(&target, "/work/project", CancellationToken::new());

        let err = engine.validate(&local).await.unwrap_err();
        assert_eq!(err.to_string(), "Validation rejected: dirty-working-tree");
        assert!(local.position(GIT_BRANCH).is_none());
    }

    #[tokio::test]
    async fn test_dirty_data_cache_rejected() {
        let mut target = target();
        target.dvc_cache = Some("/data/cache".to_string());
        target.command_runner = Some("uv run".to_string());
        let local = clean_local();
        local.respond("dvc status", MockResponse::ok("data.dvc:\n\tchanged outs"));
        let mut engine = SyncEngine::new(&target, "/work/project", CancellationToken::new());

        let err = engine.validate(&local).await.unwrap_err();
        assert!(matches!(
            err,
            JasmineError::ValidationRejected {
                reason: RejectReason::DirtyDataCache
            }
        ));
        assert!(local.commands().contains(&"uv run dvc status".to_string()));
    }

    #[tokio::test]
    async fn test_apply_runs_cache_then_git_operations() {
        let mut target = target();
        target.dvc_cache = Some("/data/cache".to_string());
        target.dvc_remote = Some("s3://bucket/cache".to_string());
        let local = clean_local();
        let remote = MockExecutor::new("gpu1");
        let mut engine = SyncEngine::new(&target, "/work/project", CancellationToken::new());

        engine.sync(&local, &dest(&remote, None)).await.unwrap();
        assert_eq!(
            remote.commands(),
            vec![
                "dvc cache dir --local /data/cache",
                "dvc remote add --local jasmine_remote s3://bucket/cache --force",
                "dvc pull -r jasmine_remote --force",
                "git fetch --all",
                "git checkout main || git checkout -b main origin/main",
                "git reset --hard origin/main",
            ]
        );
        assert!(remote
            .calls()
            .iter()
            .all(|c| c.cwd.as_deref() == Some("~/src/project")));
        assert!(matches!(engine.phase(), SyncPhase::Synced(_)));
    }

    #[tokio::test]
    async fn test_failed_git_operation_aborts_sequence() {
        let target = target();
        let local = clean_local();
        let remote = MockExecutor::new("gpu1");
        remote.respond("git checkout", MockResponse::fail(1, "pathspec 'main' did not match"));
        let mut engine = SyncEngine::new(&target, "/work/project", CancellationToken::new());

        let err = engine.sync(&local, &dest(&remote, None)).await.unwrap_err();
        match err {
            JasmineError::CommandFailed { command, exit_code, .. } => {
                assert!(command.starts_with("git checkout main"));
                assert_eq!(exit_code, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(remote.position("git reset").is_none());
        assert!(matches!(engine.phase(), SyncPhase::Rejected(_)));
    }

    #[tokio::test]
    async fn test_cancelled_between_commands() {
        let target = target();
        let local = clean_local();
        let remote = MockExecutor::new("gpu1");
        let cancel = CancellationToken::new();
        let mut engine = SyncEngine::new(&target, "/work/project", cancel.clone());

        engine.validate(&local).await.unwrap();
        cancel.cancel();
        let err = engine.apply(&local, &dest(&remote, None)).await.unwrap_err();
        assert!(matches!(err, JasmineError::Cancelled { .. }));
        assert!(remote.commands().is_empty());
        assert!(matches!(engine.phase(), SyncPhase::Validated(_)));
    }

    #[tokio::test]
    async fn test_apply_requires_validation() {
        let target = target();
        let local = clean_local();
        let remote = MockExecutor::new("gpu1");
        let mut engine = SyncEngine::new(&target, "/work/project", CancellationToken::new());
        assert!(engine.apply(&local, &dest(&remote, None)).await.is_err());
        assert!(remote.commands().is_empty());
    }

    #[tokio::test]
    async fn test_rsync_method_runs_locally() {
        let mut target = target();
        target.sync_method = SyncMethod::Rsync;
        target.sync_exclude = vec![".venv".to_string(), "*.pyc".to_string()];
        let mut conn = ConnectionSpec::new("gpu1");
        conn.user = Some("alice".to_string());
        conn.port = Some(2222);
        let local = clean_local();
        let remote = MockExecutor::new("gpu1");
        let mut engine = SyncEngine::new(&target, "/work/project", CancellationToken::new());

        engine.sync(&local, &dest(&remote, Some(&conn))).await.unwrap();
        assert!(remote.commands().is_empty());
        let rsync = local.commands_matching("rsync");
        assert_eq!(
            rsync,
            vec!["rsync -az --delete --exclude .venv --exclude '*.pyc' -e 'ssh -p 2222' /work/project/ alice@gpu1:src/project/"]
        );
    }

    #[tokio::test]
    async fn test_in_place_skips_transfer() {
        let mut target = Target::new("laptop", Mode::Local);
        target.dvc_cache = Some("/data/cache".to_string());
        let local = clean_local();
        let mut engine = SyncEngine::new(&target, "/work/project", CancellationToken::new());
        let destination = SyncDestination {
            exec: &local,
            work_dir: "/work/project",
            connection: None,
            in_place: true,
        };

        engine.sync(&local, &destination).await.unwrap();
        assert!(local.position(GIT_REMOTE_URL).is_none());
        assert!(local.position("dvc cache dir").is_some());
        assert!(local.position("git fetch").is_none());
    }

    #[tokio::test]
    async fn test_data_cache_detected_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".dvc")).unwrap();
        let target = target();
        let local = clean_local();
        let mut engine = SyncEngine::new(&target, dir.path(), CancellationToken::new());

        engine.validate(&local).await.unwrap();
        assert!(local.position("dvc status").is_some());
    }
}
