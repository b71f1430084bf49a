// src/pipeline.rs
//
// Domain model of the deployment pipeline: one Build per source revision,
// driven through a strictly sequential stage machine by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Terminal-or-not lifecycle of a build. Mutated only by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStatus::Succeeded | BuildStatus::Failed)
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BuildStatus::Queued => "Queued",
            BuildStatus::Running => "Running",
            BuildStatus::Succeeded => "Succeeded",
            BuildStatus::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// The ordered stages of one build. Cleanup is last and unconditional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Checkout,
    CredentialAcquire,
    Harden,
    Transfer,
    Cleanup,
}

impl Stage {
    /// Execution order. Stages never run out of this order and never run twice.
    pub const PIPELINE: [Stage; 5] = [
        Stage::Checkout,
        Stage::CredentialAcquire,
        Stage::Harden,
        Stage::Transfer,
        Stage::Cleanup,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Checkout => "Checkout",
            Stage::CredentialAcquire => "CredentialAcquire",
            Stage::Harden => "Harden",
            Stage::Transfer => "Transfer",
            Stage::Cleanup => "Cleanup",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StageState::Pending => "Pending",
            StageState::Running => "Running",
            StageState::Succeeded => "Succeeded",
            StageState::Failed => "Failed",
            StageState::Skipped => "Skipped",
        };
        f.write_str(name)
    }
}

/// One line of the stage-by-stage trace a build accumulates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub state: StageState,
    pub detail: Option<String>,
}

/// One execution of the deployment pipeline for a specific source revision.
///
/// Created on trigger, mutated only by the orchestrator, terminal once the
/// status leaves Running. Serialized as-is into the build history record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: Uuid,
    pub revision: String,
    pub status: BuildStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stage_log: Vec<StageRecord>,
}

impl Build {
    pub fn new(revision: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            revision: revision.to_string(),
            status: BuildStatus::Queued,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            stage_log: Stage::PIPELINE
                .iter()
                .map(|stage| StageRecord {
                    stage: *stage,
                    state: StageState::Pending,
                    detail: None,
                })
                .collect(),
        }
    }

    pub fn set_stage(&mut self, stage: Stage, state: StageState, detail: Option<String>) {
        if let Some(record) = self.stage_log.iter_mut().find(|r| r.stage == stage) {
            record.state = state;
            record.detail = detail;
        }
    }

    /// Marks every non-Cleanup stage that has not finished as Skipped.
    /// Called after a fatal stage failure or an abort; Cleanup stays runnable.
    pub fn skip_pending_stages(&mut self) {
        for record in &mut self.stage_log {
            if record.stage != Stage::Cleanup
                && matches!(record.state, StageState::Pending | StageState::Running)
            {
                record.state = StageState::Skipped;
            }
        }
    }

    /// The stage a `status` query reports: the running stage, otherwise the
    /// next pending one, otherwise none (terminal).
    pub fn current_stage(&self) -> Option<Stage> {
        self.stage_log
            .iter()
            .find(|r| r.state == StageState::Running)
            .or_else(|| self.stage_log.iter().find(|r| r.state == StageState::Pending))
            .map(|r| r.stage)
    }
}

/// The externally managed host and path artifacts are pushed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentTarget {
    pub host: String,
    pub port: u16,
    pub remote_path: String,
    pub auth_principal: String,
}

/// Per-build context handed to every stage. Holds everything a stage may
/// touch; no stage reads ambient or global state. The credential file lives
/// beside the source tree, never inside it, so a transfer cannot ship it.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub build_id: Uuid,
    pub workspace: PathBuf,
    pub source_dir: PathBuf,
    pub credential_path: PathBuf,
    pub target: DeploymentTarget,
    pub verify_host_key: bool,
}

/// A stage failure that ends the build. Everything after the failing stage is
/// skipped except Cleanup, which always runs.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("checkout failed: {0}")]
    CheckoutFailed(String),

    #[error("credential unavailable: {0}")]
    CredentialUnavailable(String),

    /// Only raised when hardening failures are configured as fatal.
    #[error("credential hardening failed: {0}")]
    HardenFailed(String),

    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("build aborted")]
    Aborted,
}

impl FatalError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            FatalError::CheckoutFailed(_) => Some(Stage::Checkout),
            FatalError::CredentialUnavailable(_) => Some(Stage::CredentialAcquire),
            FatalError::HardenFailed(_) => Some(Stage::Harden),
            FatalError::TransferFailed(_) => Some(Stage::Transfer),
            FatalError::Aborted => None,
        }
    }

    /// Process exit code for the one-shot CLI mode. Distinct per fatal stage.
    pub fn exit_code(&self) -> i32 {
        match self {
            FatalError::CheckoutFailed(_) => 10,
            FatalError::CredentialUnavailable(_) => 11,
            FatalError::HardenFailed(_) => 12,
            FatalError::TransferFailed(_) => 13,
            FatalError::Aborted => 20,
        }
    }
}

/// A push notification that never becomes a build. Logged and dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TriggerRejected {
    #[error("ref '{git_ref}' does not match the deploy branch '{branch}'")]
    BranchMismatch { git_ref: String, branch: String },

    #[error("notification carried an empty revision")]
    EmptyRevision,
}

/// Accepts both the short branch name and the fully qualified ref form a
/// source-control host sends ("main" and "refs/heads/main").
pub fn ref_matches_branch(git_ref: &str, branch: &str) -> bool {
    git_ref == branch || git_ref.strip_prefix("refs/heads/") == Some(branch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_order_ends_with_cleanup() {
        assert_eq!(Stage::PIPELINE.len(), 5);
        assert_eq!(Stage::PIPELINE[0], Stage::Checkout);
        assert_eq!(Stage::PIPELINE[4], Stage::Cleanup);
    }

    #[test]
    fn new_build_starts_queued_with_all_stages_pending() {
        let build = Build::new("abc123");
        assert_eq!(build.status, BuildStatus::Queued);
        assert!(build.stage_log.iter().all(|r| r.state == StageState::Pending));
        assert_eq!(build.current_stage(), Some(Stage::Checkout));
    }

    #[test]
    fn skip_pending_stages_spares_cleanup() {
        let mut build = Build::new("abc123");
        build.set_stage(Stage::Checkout, StageState::Succeeded, None);
        build.set_stage(Stage::CredentialAcquire, StageState::Failed, None);
        build.skip_pending_stages();

        let state_of = |stage: Stage| {
            build
                .stage_log
                .iter()
                .find(|r| r.stage == stage)
                .map(|r| r.state)
                .unwrap()
        };
        assert_eq!(state_of(Stage::Checkout), StageState::Succeeded);
        assert_eq!(state_of(Stage::CredentialAcquire), StageState::Failed);
        assert_eq!(state_of(Stage::Harden), StageState::Skipped);
        assert_eq!(state_of(Stage::Transfer), StageState::Skipped);
        assert_eq!(state_of(Stage::Cleanup), StageState::Pending);
    }

    #[test]
    fn current_stage_follows_the_running_stage() {
        let mut build = Build::new("abc123");
        build.set_stage(Stage::Checkout, StageState::Succeeded, None);
        build.set_stage(Stage::CredentialAcquire, StageState::Running, None);
        assert_eq!(build.current_stage(), Some(Stage::CredentialAcquire));
    }

    #[test]
    fn fatal_exit_codes_are_distinct_and_nonzero() {
        let errors = [
            FatalError::CheckoutFailed(String::new()),
            FatalError::CredentialUnavailable(String::new()),
            FatalError::HardenFailed(String::new()),
            FatalError::TransferFailed(String::new()),
            FatalError::Aborted,
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.exit_code()).collect();
        assert!(codes.iter().all(|c| *c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn branch_filter_accepts_short_and_qualified_refs() {
        assert!(ref_matches_branch("main", "main"));
        assert!(ref_matches_branch("refs/heads/main", "main"));
        assert!(!ref_matches_branch("feature/x", "main"));
        assert!(!ref_matches_branch("refs/heads/feature/x", "main"));
        assert!(!ref_matches_branch("refs/tags/main", "main"));
    }
}
