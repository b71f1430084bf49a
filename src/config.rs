// src/config.rs

use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AgentConfig {
    // 🛡️ SLA Boundary: Control plane
    pub socket_path: String,

    // Source control
    pub repo_url: String,
    pub deploy_branch: String,

    // Credential security
    pub credential_id: String,
    pub secrets_dir: PathBuf,
    pub build_principal: String,
    pub admin_principal: String,
    pub harden_fatal: bool,

    // Deployment target
    pub target_host: String,
    pub target_port: u16,
    pub target_path: String,
    pub target_user: String,
    pub verify_host_key: bool,

    // 📂 Build workspace & history
    pub work_root: PathBuf,
    pub history_path: PathBuf,
    pub workspace_keep: usize,

    // Optional watchdog for the network-bound stages. None disables it.
    pub stage_timeout: Option<Duration>,
}

impl AgentConfig {
    pub fn load() -> Self {
        Self {
            socket_path: env::var("SLIPWAY_SOCKET_PATH")
                .unwrap_or_else(|_| "/var/run/slipway/agent.sock".to_string()),

            repo_url: env::var("SLIPWAY_REPO_URL")
                .unwrap_or_else(|_| "git@github.com:acme/site.git".to_string()),

            deploy_branch: env::var("SLIPWAY_DEPLOY_BRANCH").unwrap_or_else(|_| "main".to_string()),

            credential_id: env::var("SLIPWAY_CREDENTIAL_ID")
                .unwrap_or_else(|_| "ec2-ssh-key".to_string()),

            secrets_dir: env::var("SLIPWAY_SECRETS_DIR")
                .unwrap_or_else(|_| "/etc/slipway/secrets".to_string())
                .into(),

            build_principal: env::var("SLIPWAY_BUILD_USER")
                .unwrap_or_else(|_| "slipway".to_string()),

            admin_principal: env::var("SLIPWAY_ADMIN_USER").unwrap_or_else(|_| "root".to_string()),

            // 🛡️ Hardening failures are warnings unless the operator opts in
            // to treating them as fatal.
            harden_fatal: matches!(
                env::var("SLIPWAY_HARDEN_FATAL").as_deref(),
                Ok("true") | Ok("1")
            ),

            target_host: env::var("SLIPWAY_TARGET_HOST")
                .unwrap_or_else(|_| "deploy.internal".to_string()),

            target_port: env::var("SLIPWAY_TARGET_PORT")
                .unwrap_or_else(|_| "22".to_string())
                .parse::<u16>()
                .expect("SLIPWAY_TARGET_PORT must be a valid TCP port"),

            target_path: env::var("SLIPWAY_TARGET_PATH")
                .unwrap_or_else(|_| "/var/www/html".to_string()),

            target_user: env::var("SLIPWAY_TARGET_USER")
                .unwrap_or_else(|_| "www-deploy".to_string()),

            verify_host_key: parse_verify_host_key(env::var("SLIPWAY_VERIFY_HOST_KEY").ok()),

            work_root: env::var("SLIPWAY_WORK_ROOT")
                .unwrap_or_else(|_| "/var/lib/slipway/builds".to_string())
                .into(),

            history_path: env::var("SLIPWAY_HISTORY_PATH")
                .unwrap_or_else(|_| "/var/lib/slipway/history.jsonl".to_string())
                .into(),

            workspace_keep: env::var("SLIPWAY_WORKSPACE_KEEP")
                .unwrap_or_else(|_| "5".to_string())
                .parse::<usize>()
                .expect("SLIPWAY_WORKSPACE_KEEP must be a non-negative integer"),

            stage_timeout: parse_stage_timeout(env::var("SLIPWAY_STAGE_TIMEOUT_SECS").ok()),
        }
    }

    pub fn target(&self) -> crate::pipeline::DeploymentTarget {
        crate::pipeline::DeploymentTarget {
            host: self.target_host.clone(),
            port: self.target_port,
            remote_path: self.target_path.clone(),
            auth_principal: self.target_user.clone(),
        }
    }
}

/// 🛡️ Zero-Trust Host Identity Parsing
/// Skipping host-key verification must be a deliberate, auditable opt-in:
/// only the literal string "false" disables it. Any other value refuses to
/// start rather than silently weakening the transfer channel.
fn parse_verify_host_key(raw: Option<String>) -> bool {
    match raw.as_deref() {
        None | Some("true") => true,
        Some("false") => false,
        Some(other) => panic!(
            "SECURITY FATAL: SLIPWAY_VERIFY_HOST_KEY must be \"true\" or \"false\", got '{}'",
            other
        ),
    }
}

/// Unset or "0" disables the watchdog; the base pipeline mandates no timeout.
fn parse_stage_timeout(raw: Option<String>) -> Option<Duration> {
    let raw = raw?;
    let secs = raw
        .parse::<u64>()
        .expect("SLIPWAY_STAGE_TIMEOUT_SECS must be a whole number of seconds");
    (secs > 0).then(|| Duration::from_secs(secs))
}
