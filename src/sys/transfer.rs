// src/sys/transfer.rs
//
// Transfer Agent: mirrors the artifact tree onto the deployment target over
// an scp session authenticated with the hardened per-build key.

use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::info;

use crate::pipeline::DeploymentTarget;
use crate::sys::traits::TransferManager;

pub struct ScpTransferManager;

/// 🛡️ Zero-Trust: the target descriptor feeds a command line; every field is
/// validated before it gets anywhere near argv.
fn validate_target(target: &DeploymentTarget) -> Result<(), String> {
    if target.host.is_empty()
        || !target
            .host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(format!(
            "SECURITY VIOLATION: invalid target host '{}'",
            target.host
        ));
    }
    if target.auth_principal.is_empty()
        || !target
            .auth_principal
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(format!(
            "SECURITY VIOLATION: invalid auth principal '{}'",
            target.auth_principal
        ));
    }
    if !target.remote_path.starts_with('/') {
        return Err(format!(
            "remote path must be absolute, got '{}'",
            target.remote_path
        ));
    }
    Ok(())
}

/// Builds the full scp argument vector. Pulled out of `push` so the exact
/// command line is testable without opening a session.
fn scp_args(
    source_dir: &Path,
    credential_path: &Path,
    target: &DeploymentTarget,
    verify_host_key: bool,
) -> Vec<String> {
    // Refusing an unknown host key is the default; "no" trusts whatever the
    // wire claims and exists only behind the explicit insecure override.
    let host_key_policy = if verify_host_key {
        "StrictHostKeyChecking=yes"
    } else {
        "StrictHostKeyChecking=no"
    };

    vec![
        "-i".to_string(),
        credential_path.display().to_string(),
        "-P".to_string(),
        target.port.to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "IdentitiesOnly=yes".to_string(),
        "-o".to_string(),
        host_key_policy.to_string(),
        "-r".to_string(),
        // `dir/.` mirrors the directory contents, not the directory itself.
        format!("{}/.", source_dir.display()),
        format!(
            "{}@{}:{}",
            target.auth_principal, target.host, target.remote_path
        ),
    ]
}

impl ScpTransferManager {
    /// Keeps the remote spec and any embedded secrets out of logged errors.
    fn scrub(stderr: &str, target: &DeploymentTarget) -> String {
        let remote = format!(
            "{}@{}:{}",
            target.auth_principal, target.host, target.remote_path
        );
        stderr.replace(&remote, "[TARGET]").replace(&target.host, "[HOST]")
    }
}

#[async_trait]
impl TransferManager for ScpTransferManager {
    async fn push(
        &self,
        source_dir: &Path,
        credential_path: &Path,
        target: &DeploymentTarget,
        verify_host_key: bool,
    ) -> Result<(), String> {
        validate_target(target)?;

        let args = scp_args(source_dir, credential_path, target, verify_host_key);
        let output = Command::new("scp")
            .args(&args)
            .output()
            .await
            .map_err(|e| format!("SLA Failure: scp spawn error: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "scp exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                Self::scrub(&stderr, target)
            ));
        }

        info!(
            host = %target.host,
            remote_path = %target.remote_path,
            "artifact tree mirrored to target"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn target() -> DeploymentTarget {
        DeploymentTarget {
            host: "web-1.example.com".to_string(),
            port: 22,
            remote_path: "/var/www/html".to_string(),
            auth_principal: "www-deploy".to_string(),
        }
    }

    #[test]
    fn args_authenticate_with_the_hardened_key() {
        let args = scp_args(
            &PathBuf::from("/work/b1/source"),
            &PathBuf::from("/work/b1/deploy_key"),
            &target(),
            true,
        );
        assert_eq!(args[0], "-i");
        assert_eq!(args[1], "/work/b1/deploy_key");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(args.last().unwrap(), "www-deploy@web-1.example.com:/var/www/html");
    }

    #[test]
    fn verification_is_the_default_policy() {
        let args = scp_args(
            &PathBuf::from("/w/s"),
            &PathBuf::from("/w/k"),
            &target(),
            true,
        );
        assert!(args.contains(&"StrictHostKeyChecking=yes".to_string()));
        assert!(!args.contains(&"StrictHostKeyChecking=no".to_string()));
    }

    #[test]
    fn insecure_override_trusts_unknown_hosts() {
        let args = scp_args(
            &PathBuf::from("/w/s"),
            &PathBuf::from("/w/k"),
            &target(),
            false,
        );
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
    }

    #[test]
    fn source_spec_mirrors_directory_contents() {
        let args = scp_args(
            &PathBuf::from("/work/b1/source"),
            &PathBuf::from("/work/b1/deploy_key"),
            &target(),
            true,
        );
        assert_eq!(args[args.len() - 2], "/work/b1/source/.");
    }

    #[test]
    fn hostile_target_fields_are_rejected() {
        let mut bad = target();
        bad.host = "-oProxyCommand=sh".to_string();
        assert!(validate_target(&bad).is_err());

        let mut bad = target();
        bad.auth_principal = "user name".to_string();
        assert!(validate_target(&bad).is_err());

        let mut bad = target();
        bad.remote_path = "relative/path".to_string();
        assert!(validate_target(&bad).is_err());

        assert!(validate_target(&target()).is_ok());
    }

    #[test]
    fn scrub_hides_the_remote_spec() {
        let t = target();
        let noisy = "ssh: connect to host web-1.example.com port 22: Connection refused\nlost connection to www-deploy@web-1.example.com:/var/www/html";
        let clean = ScpTransferManager::scrub(noisy, &t);
        assert!(!clean.contains("web-1.example.com"));
        assert!(clean.contains("[TARGET]"));
    }
}
