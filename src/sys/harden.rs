// src/sys/harden.rs
//
// Permission Hardener: locks a credential file down to the minimum principal
// set. Every step is attempted independently; a failed step is recorded in
// the report and the pipeline moves on. Whether that report ever fails the
// build is the orchestrator's configuration decision, not ours.

use async_trait::async_trait;
use nix::unistd::{Group, User};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::warn;

use crate::sys::traits::{PermissionAdapter, PermissionOp};

/// The fixed lockdown sequence for one credential file.
pub fn hardening_plan(build_principal: &str, admin_principal: &str) -> Vec<PermissionOp> {
    vec![
        PermissionOp::RemoveInherited,
        PermissionOp::GrantRead {
            principal: build_principal.to_string(),
        },
        PermissionOp::GrantFull {
            principal: admin_principal.to_string(),
        },
        PermissionOp::RemoveGroupAccess,
        PermissionOp::SetReadOnly,
    ]
}

#[derive(Debug)]
pub struct StepOutcome {
    pub op: PermissionOp,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct HardeningReport {
    pub steps: Vec<StepOutcome>,
}

impl HardeningReport {
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|s| s.error.is_none())
    }

    pub fn summary(&self) -> String {
        let applied = self.steps.iter().filter(|s| s.error.is_none()).count();
        if self.is_clean() {
            format!("{}/{} permission steps applied", applied, self.steps.len())
        } else {
            let failures: Vec<String> = self
                .steps
                .iter()
                .filter_map(|s| {
                    s.error
                        .as_ref()
                        .map(|e| format!("{}: {}", s.op.name(), e))
                })
                .collect();
            format!(
                "{}/{} permission steps applied; failed: {}",
                applied,
                self.steps.len(),
                failures.join("; ")
            )
        }
    }
}

/// Applies `plan` to `path` step by step. Never short-circuits: a step that
/// fails is logged and recorded, then the next step still runs. Re-invoking
/// on an already-hardened file is safe; every step is idempotent.
pub async fn harden(
    adapter: &dyn PermissionAdapter,
    path: &Path,
    plan: &[PermissionOp],
) -> HardeningReport {
    let mut steps = Vec::with_capacity(plan.len());
    for op in plan {
        let error = adapter.apply(path, op).await.err();
        if let Some(e) = &error {
            warn!(step = op.name(), error = %e, "🛡️ hardening step failed, continuing");
        }
        steps.push(StepOutcome {
            op: op.clone(),
            error,
        });
    }
    HardeningReport { steps }
}

// ==============================================================================
// 1. Concrete Implementation (POSIX mode bits + ownership)
// ==============================================================================

/// Maps the typed ACL operations onto POSIX ownership and mode bits:
/// the build principal ends up owning the file with read access, the admin
/// principal holds it via group (root retains implicit full access), and
/// everyone else is stripped.
pub struct SystemPermissionAdapter;

/// The mode-bit half of each step. Ownership changes return None.
fn next_mode(current: u32, op: &PermissionOp) -> Option<u32> {
    match op {
        // Whatever the file inherited collapses to owner read/write.
        PermissionOp::RemoveInherited => Some(0o600),
        PermissionOp::GrantRead { .. } => Some(current | 0o400),
        PermissionOp::GrantFull { .. } => None,
        PermissionOp::RemoveGroupAccess => Some(current & !0o077),
        PermissionOp::SetReadOnly => Some(current & !0o222),
    }
}

fn resolve_uid(principal: &str) -> Result<nix::unistd::Uid, String> {
    User::from_name(principal)
        .map_err(|e| format!("principal lookup failed: {}", e))?
        .map(|u| u.uid)
        .ok_or_else(|| format!("unknown principal '{}'", principal))
}

fn resolve_gid(principal: &str) -> Result<nix::unistd::Gid, String> {
    if let Some(group) = Group::from_name(principal)
        .map_err(|e| format!("group lookup failed: {}", e))?
    {
        return Ok(group.gid);
    }
    // Fall back to the principal's primary group when no group shares its name.
    User::from_name(principal)
        .map_err(|e| format!("principal lookup failed: {}", e))?
        .map(|u| u.gid)
        .ok_or_else(|| format!("unknown principal '{}'", principal))
}

#[async_trait]
impl PermissionAdapter for SystemPermissionAdapter {
    async fn apply(&self, path: &Path, op: &PermissionOp) -> Result<(), String> {
        match op {
            PermissionOp::GrantRead { principal } => {
                let uid = resolve_uid(principal)?;
                nix::unistd::chown(path, Some(uid), None)
                    .map_err(|e| format!("chown to '{}' failed: {}", principal, e))?;
            }
            PermissionOp::GrantFull { principal } => {
                let gid = resolve_gid(principal)?;
                nix::unistd::chown(path, None, Some(gid))
                    .map_err(|e| format!("chgrp to '{}' failed: {}", principal, e))?;
            }
            _ => {}
        }

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| format!("failed to read metadata: {}", e))?;
        let current = metadata.permissions().mode() & 0o7777;

        if let Some(mode) = next_mode(current, op) {
            if mode != current {
                tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
                    .await
                    .map_err(|e| format!("chmod to {:o} failed: {}", mode, e))?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashMap};
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Deterministic ACL model standing in for the operating system. Entries
    /// are plain strings so the final access set can be compared wholesale.
    #[derive(Default)]
    struct FakePermissionAdapter {
        acl: Mutex<HashMap<PathBuf, BTreeSet<String>>>,
        fail_steps: Vec<&'static str>,
    }

    impl FakePermissionAdapter {
        fn seed(&self, path: &Path) {
            let mut acl = self.acl.lock().unwrap();
            acl.insert(
                path.to_path_buf(),
                BTreeSet::from([
                    "inherited:everyone:read".to_string(),
                    "group:staff:write".to_string(),
                    "owner:rw".to_string(),
                ]),
            );
        }

        fn access_set(&self, path: &Path) -> BTreeSet<String> {
            self.acl.lock().unwrap().get(path).cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl PermissionAdapter for FakePermissionAdapter {
        async fn apply(&self, path: &Path, op: &PermissionOp) -> Result<(), String> {
            if self.fail_steps.contains(&op.name()) {
                return Err("Operation not permitted (os error 1)".to_string());
            }
            let mut acl = self.acl.lock().unwrap();
            let entries = acl.entry(path.to_path_buf()).or_default();
            match op {
                PermissionOp::RemoveInherited => {
                    entries.retain(|e| !e.starts_with("inherited:"));
                }
                PermissionOp::GrantRead { principal } => {
                    entries.insert(format!("{}:read", principal));
                }
                PermissionOp::GrantFull { principal } => {
                    entries.insert(format!("{}:full", principal));
                }
                PermissionOp::RemoveGroupAccess => {
                    entries.retain(|e| !e.starts_with("group:"));
                }
                PermissionOp::SetReadOnly => {
                    entries.insert("readonly".to_string());
                }
            }
            Ok(())
        }
    }

    fn plan() -> Vec<PermissionOp> {
        hardening_plan("slipway", "root")
    }

    #[tokio::test]
    async fn clean_run_strips_everything_but_the_two_principals() {
        let adapter = FakePermissionAdapter::default();
        let path = Path::new("/work/b1/deploy_key");
        adapter.seed(path);

        let report = harden(&adapter, path, &plan()).await;
        assert!(report.is_clean());
        assert_eq!(
            adapter.access_set(path),
            BTreeSet::from([
                "owner:rw".to_string(),
                "readonly".to_string(),
                "root:full".to_string(),
                "slipway:read".to_string(),
            ])
        );
    }

    #[tokio::test]
    async fn harden_twice_yields_an_identical_access_set() {
        let adapter = FakePermissionAdapter::default();
        let path = Path::new("/work/b1/deploy_key");
        adapter.seed(path);

        harden(&adapter, path, &plan()).await;
        let first = adapter.access_set(path);
        let report = harden(&adapter, path, &plan()).await;
        assert!(report.is_clean());
        assert_eq!(adapter.access_set(path), first);
    }

    #[tokio::test]
    async fn a_failed_step_is_reported_and_the_rest_still_apply() {
        let adapter = FakePermissionAdapter {
            fail_steps: vec!["RemoveGroupAccess"],
            ..Default::default()
        };
        let path = Path::new("/work/b1/deploy_key");
        adapter.seed(path);

        let report = harden(&adapter, path, &plan()).await;
        assert!(!report.is_clean());
        assert!(report.summary().contains("4/5"));
        assert!(report.summary().contains("RemoveGroupAccess"));
        // The later SetReadOnly step still ran.
        assert!(adapter.access_set(path).contains("readonly"));
        // The group entry survived the failed step, reported rather than retried.
        assert!(adapter.access_set(path).contains("group:staff:write"));
    }

    #[test]
    fn mode_plan_converges_to_owner_read_only() {
        let fold = |start: u32| {
            plan()
                .iter()
                .fold(start, |mode, op| next_mode(mode, op).unwrap_or(mode))
        };
        assert_eq!(fold(0o664), 0o400);
        // Idempotent: running the plan again from its own result changes nothing.
        assert_eq!(fold(0o400), 0o400);
    }
}
