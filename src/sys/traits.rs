// 🛡️ Global contracts between the orchestrator and the stage implementations.
// Every seam is a trait so a deterministic fake can stand in for the real
// operating system during tests.

use async_trait::async_trait;
use std::path::Path;

use crate::pipeline::DeploymentTarget;
use crate::sys::secrets::KeyMaterial;

// ==============================================================================
// 1. Source Control (Checkout)
// ==============================================================================

#[async_trait]
pub trait SourceManager: Send + Sync {
    /// Produces the artifact tree for `revision` inside `target_dir`.
    /// The checkout runs before any credential exists; it authenticates with
    /// ambient identities only.
    async fn checkout(
        &self,
        repo_url: &str,
        revision: &str,
        target_dir: &Path,
    ) -> Result<(), String>;
}

// ==============================================================================
// 2. Secret Store (consumed, not owned)
// ==============================================================================

/// What a `lookup` hands back: the raw key bytes inside a zeroizing wrapper,
/// plus the principal the material belongs to.
pub struct SecretLease {
    pub material: KeyMaterial,
    pub owner_principal: String,
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn lookup(&self, credential_id: &str) -> Result<SecretLease, String>;
}

// ==============================================================================
// 3. Permission Hardening (Typed Ops, Pluggable Adapter)
// ==============================================================================

/// The five idempotent lockdown steps applied to a credential file. Each is
/// attempted independently; the hardener records failures instead of aborting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionOp {
    /// Strip whatever the file inherited from its surroundings.
    RemoveInherited,
    /// Read access for the principal that authenticates the transfer.
    GrantRead { principal: String },
    /// Full access for the platform administrative principal.
    GrantFull { principal: String },
    /// Drop broad/group-level entries.
    RemoveGroupAccess,
    /// Write-protect the file for the remainder of the build.
    SetReadOnly,
}

impl PermissionOp {
    pub fn name(&self) -> &'static str {
        match self {
            PermissionOp::RemoveInherited => "RemoveInherited",
            PermissionOp::GrantRead { .. } => "GrantRead",
            PermissionOp::GrantFull { .. } => "GrantFull",
            PermissionOp::RemoveGroupAccess => "RemoveGroupAccess",
            PermissionOp::SetReadOnly => "SetReadOnly",
        }
    }
}

#[async_trait]
pub trait PermissionAdapter: Send + Sync {
    async fn apply(&self, path: &Path, op: &PermissionOp) -> Result<(), String>;
}

// ==============================================================================
// 4. Transfer (Authenticated Secure Copy)
// ==============================================================================

#[async_trait]
pub trait TransferManager: Send + Sync {
    /// Recursively mirrors `source_dir` onto `target.remote_path`, overwriting
    /// whatever is there. No diffing, no retry, no atomic staging: a failure
    /// partway can leave the target mixed old/new.
    async fn push(
        &self,
        source_dir: &Path,
        credential_path: &Path,
        target: &DeploymentTarget,
        verify_host_key: bool,
    ) -> Result<(), String>;
}

// ==============================================================================
// 5. Hygiene (SLA: Credential Erasure & Disk Space)
// ==============================================================================

#[async_trait]
pub trait WorkspaceJanitor: Send + Sync {
    /// Deletes the ephemeral credential file. Must be idempotent: a build that
    /// never materialized a credential still runs its Cleanup stage.
    async fn scrub_credential(&self, credential_path: &Path) -> Result<(), String>;

    /// Removes old build workspaces under `work_root`, keeping the newest
    /// `keep_count`. Returns how many were deleted.
    async fn prune_workspaces(&self, work_root: &Path, keep_count: usize) -> Result<usize, String>;
}
