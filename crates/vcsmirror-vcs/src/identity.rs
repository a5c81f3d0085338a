//! Per-user SSH identities.
//!
//! Every user owns one RSA keypair under the SSH directory. For each remote
//! host the user talks to, a `Host <hostname>_<user_id>` stanza in the shared
//! client config points the alias at the real host with the user's key and
//! known-hosts file, so git never picks up another user's credentials.
//!
//! The config file is only ever appended to, after checking the parsed file
//! for the alias. No lock is taken across processes; two workers racing on
//! the same alias can at worst both append it.

use crate::error::{Result, VcsError};
use crate::known_hosts::{KnownHosts, TrustOutcome};
use crate::process::{CommandRunner, CommandSpec, run_checked};
use crate::remote::RemoteEndpoint;
use crate::types::Protocol;
use dashmap::DashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use vcsmirror_core::UserId;

/// Key size for generated deploy keys.
pub const RSA_KEY_BITS: u32 = 4096;

/// Files and alias making up one user's identity for one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Owner.
    pub user_id: UserId,
    /// Private key file.
    pub private_key: PathBuf,
    /// OpenSSH public key file.
    pub public_key: PathBuf,
    /// User-specific known-hosts file.
    pub known_hosts: PathBuf,
    /// Host alias to put in URLs instead of the real host name.
    pub ssh_alias: String,
}

/// Alias used for `hostname` when acting as `user_id`.
#[must_use]
pub fn host_alias(hostname: &str, user_id: UserId) -> String {
    format!("{hostname}_{user_id}")
}

/// One `Host` section of an SSH client config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostBlock {
    /// Patterns after the `Host` keyword.
    pub patterns: Vec<String>,
    /// Keyword/value pairs inside the section.
    pub options: Vec<(String, String)>,
}

impl HostBlock {
    /// Value of the first option named `keyword` (case-insensitive).
    #[must_use]
    pub fn option(&self, keyword: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(keyword))
            .map(|(_, v)| v.as_str())
    }
}

/// Parsed SSH client config, `Host` sections only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshConfig {
    blocks: Vec<HostBlock>,
}

impl SshConfig {
    /// Parse config text. Unknown syntax is skipped rather than rejected.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut blocks = Vec::new();
        let mut current: Option<HostBlock> = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (keyword, value) = match line.find(|c: char| c.is_whitespace() || c == '=') {
                Some(idx) => (
                    &line[..idx],
                    line[idx..].trim_start_matches(|c: char| c.is_whitespace() || c == '='),
                ),
                None => (line, ""),
            };

            if keyword.eq_ignore_ascii_case("host") {
                if let Some(block) = current.take() {
                    blocks.push(block);
                }
                current = Some(HostBlock {
                    patterns: value
                        .split_whitespace()
                        .map(|p| p.trim_matches('"').to_string())
                        .collect(),
                    options: Vec::new(),
                });
            } else if keyword.eq_ignore_ascii_case("match") {
                if let Some(block) = current.take() {
                    blocks.push(block);
                }
            } else if let Some(block) = current.as_mut() {
                block
                    .options
                    .push((keyword.to_string(), value.trim_matches('"').to_string()));
            }
        }

        if let Some(block) = current {
            blocks.push(block);
        }

        Self { blocks }
    }

    /// Whether a section names `alias` literally.
    #[must_use]
    pub fn has_host(&self, alias: &str) -> bool {
        self.host(alias).is_some()
    }

    /// The first section naming `alias` literally.
    #[must_use]
    pub fn host(&self, alias: &str) -> Option<&HostBlock> {
        self.blocks
            .iter()
            .find(|b| b.patterns.iter().any(|p| p == alias))
    }

    /// All sections.
    #[must_use]
    pub fn blocks(&self) -> &[HostBlock] {
        &self.blocks
    }
}

/// Render the config stanza for an alias.
fn render_stanza(alias: &str, hostname: &str, port: u16, identity: &Identity) -> String {
    format!(
        "\nHost {alias}\n    HostName {hostname}\n    Port {port}\n    UserKnownHostsFile {known}\n    IdentitiesOnly yes\n    IdentityFile {key}\n",
        known = identity.known_hosts.display(),
        key = identity.private_key.display(),
    )
}

/// Maps users and hosts to dedicated SSH identities.
#[derive(Debug)]
pub struct IdentityRouter {
    ssh_dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
    known_aliases: DashSet<String>,
}

impl IdentityRouter {
    /// Create a router storing keys and config in `ssh_dir`.
    #[must_use]
    pub fn new(ssh_dir: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            ssh_dir: ssh_dir.into(),
            runner,
            known_aliases: DashSet::new(),
        }
    }

    /// Directory holding keys, known-hosts files and the client config.
    #[must_use]
    pub fn ssh_dir(&self) -> &Path {
        &self.ssh_dir
    }

    /// Shared SSH client config file.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.ssh_dir.join("config")
    }

    /// `GIT_SSH_COMMAND` value that makes ssh read the shared config.
    #[must_use]
    pub fn ssh_command(&self) -> String {
        format!("ssh -F {}", self.config_path().display())
    }

    /// Private key path of a user.
    #[must_use]
    pub fn private_key_path(&self, user_id: UserId) -> PathBuf {
        self.ssh_dir.join(format!("id_rsa_{user_id}"))
    }

    /// Public key path of a user.
    #[must_use]
    pub fn public_key_path(&self, user_id: UserId) -> PathBuf {
        self.ssh_dir.join(format!("id_rsa_{user_id}.pub"))
    }

    /// Known-hosts path of a user.
    #[must_use]
    pub fn known_hosts_path(&self, user_id: UserId) -> PathBuf {
        self.ssh_dir.join(format!("known_hosts_{user_id}"))
    }

    fn identity(&self, user_id: UserId, alias: String) -> Identity {
        Identity {
            user_id,
            private_key: self.private_key_path(user_id),
            public_key: self.public_key_path(user_id),
            known_hosts: self.known_hosts_path(user_id),
            ssh_alias: alias,
        }
    }

    fn ensure_ssh_dir(&self) -> Result<()> {
        if self.ssh_dir.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(&self.ssh_dir).map_err(|e| VcsError::io(&self.ssh_dir, e))?;
        restrict_permissions(&self.ssh_dir, 0o700)
    }

    /// Generate the user's keypair unless both halves already exist.
    ///
    /// Returns `true` when a new keypair was written.
    ///
    /// # Errors
    /// Returns error if `ssh-keygen` fails.
    pub fn ensure_keypair(&self, user_id: UserId) -> Result<bool> {
        self.ensure_ssh_dir()?;
        let private = self.private_key_path(user_id);
        let public = self.public_key_path(user_id);

        if private.exists() && public.exists() {
            return Ok(false);
        }

        if private.exists() {
            debug!(user_id, "deriving missing public key");
            let spec = CommandSpec::new("ssh-keygen").args(["-y", "-f"]).path_arg(&private);
            let output = run_checked(self.runner.as_ref(), &spec, |out| VcsError::SshKey {
                message: out.stderr.trim().to_string(),
                key_path: Some(private.clone()),
            })?;
            fs::write(&public, output.stdout).map_err(|e| VcsError::io(&public, e))?;
            return Ok(true);
        }

        if public.exists() {
            warn!(user_id, "discarding public key without private half");
            fs::remove_file(&public).map_err(|e| VcsError::io(&public, e))?;
        }

        info!(user_id, bits = RSA_KEY_BITS, "generating deploy keypair");
        let spec = CommandSpec::new("ssh-keygen")
            .args(["-q", "-t", "rsa", "-b", &RSA_KEY_BITS.to_string(), "-N", ""])
            .args(["-C", &format!("vcsmirror-user-{user_id}"), "-f"])
            .path_arg(&private);
        run_checked(self.runner.as_ref(), &spec, |out| VcsError::SshKey {
            message: out.stderr.trim().to_string(),
            key_path: Some(private.clone()),
        })?;

        if !public.exists() {
            return Err(VcsError::SshKey {
                message: "ssh-keygen did not write a public key".to_string(),
                key_path: Some(public),
            });
        }
        restrict_permissions(&private, 0o600)?;
        Ok(true)
    }

    /// The user's public key in OpenSSH format.
    ///
    /// # Errors
    /// Returns error if the key file cannot be read.
    pub fn public_key(&self, user_id: UserId) -> Result<String> {
        let path = self.public_key_path(user_id);
        fs::read_to_string(&path)
            .map(|key| key.trim().to_string())
            .map_err(|e| VcsError::io(path, e))
    }

    /// Read and parse the shared config; a missing file is an empty config.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read.
    pub fn read_config(&self) -> Result<SshConfig> {
        let path = self.config_path();
        match fs::read_to_string(&path) {
            Ok(text) => Ok(SshConfig::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SshConfig::default()),
            Err(e) => Err(VcsError::ssh_config(path, e)),
        }
    }

    /// Append a stanza for `alias` unless the config already has one.
    ///
    /// Returns `true` when the stanza was written.
    ///
    /// # Errors
    /// Returns error if the config cannot be read or appended to.
    pub fn ensure_host_alias(
        &self,
        user_id: UserId,
        alias: &str,
        hostname: &str,
        port: u16,
    ) -> Result<bool> {
        if self.known_aliases.contains(alias) {
            return Ok(false);
        }
        self.ensure_ssh_dir()?;

        if self.read_config()?.has_host(alias) {
            self.known_aliases.insert(alias.to_string());
            return Ok(false);
        }

        let identity = self.identity(user_id, alias.to_string());
        let stanza = render_stanza(alias, hostname, port, &identity);
        let path = self.config_path();
        let created = !path.exists();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| VcsError::ssh_config(&path, e))?;
        file.write_all(stanza.as_bytes())
            .map_err(|e| VcsError::ssh_config(&path, e))?;
        if created {
            restrict_permissions(&path, 0o600)?;
        }

        self.known_aliases.insert(alias.to_string());
        info!(user_id, alias, hostname, port, "ssh host alias added");
        Ok(true)
    }

    /// Resolve (and provision if needed) the identity for a user and host.
    ///
    /// # Errors
    /// Returns error if the keypair or config stanza cannot be written.
    pub fn identity_for(&self, user_id: UserId, hostname: &str, port: u16) -> Result<Identity> {
        self.ensure_keypair(user_id)?;
        let alias = host_alias(hostname, user_id);
        self.ensure_host_alias(user_id, &alias, hostname, port)?;
        Ok(self.identity(user_id, alias))
    }

    /// Address an endpoint through the user's identity.
    ///
    /// SSH endpoints get their host replaced by the user's alias; other
    /// transports are returned unchanged.
    ///
    /// # Errors
    /// Returns error if the identity cannot be provisioned.
    pub fn route(&self, user_id: UserId, endpoint: &RemoteEndpoint) -> Result<RemoteEndpoint> {
        if endpoint.protocol() != Protocol::Ssh {
            return Ok(endpoint.clone());
        }
        let identity = self.identity_for(user_id, endpoint.hostname(), endpoint.port())?;
        Ok(endpoint.with_host_alias(&identity.ssh_alias))
    }

    /// Add the host's keys to the user's known-hosts file if missing.
    ///
    /// # Errors
    /// Returns error if the keys cannot be scanned or written.
    pub fn trust_host(&self, user_id: UserId, hostname: &str, port: u16) -> Result<TrustOutcome> {
        self.ensure_ssh_dir()?;
        KnownHosts::new(self.runner.as_ref()).trust(&self.known_hosts_path(user_id), hostname, port)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| VcsError::io(path, e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CONFIG: &str = "\
# managed by hand
Host github.com_1
    HostName github.com
    Port 22
    IdentityFile /home/mirror/.ssh/id_rsa_1

Host=bastion jump
  User ops

Match host *.internal
    ProxyJump bastion
";

    #[test]
    fn parses_host_sections() {
        let config = SshConfig::parse(CONFIG);
        assert_eq!(config.blocks().len(), 2);
        assert!(config.has_host("github.com_1"));
        assert!(config.has_host("jump"));
        assert!(!config.has_host("github.com"));
        assert_eq!(
            config.host("github.com_1").and_then(|b| b.option("hostname")),
            Some("github.com")
        );
        assert_eq!(config.host("bastion").and_then(|b| b.option("User")), Some("ops"));
    }

    #[test]
    fn alias_format() {
        assert_eq!(host_alias("gitlab.example.com", 12), "gitlab.example.com_12");
    }

    #[test]
    fn stanza_round_trips_through_parser() {
        let router = IdentityRouter::new("/srv/ssh", Arc::new(crate::process::SystemRunner));
        let identity = router.identity(5, "git.example.org_5".to_string());
        let stanza = render_stanza("git.example.org_5", "git.example.org", 2222, &identity);

        let config = SshConfig::parse(&stanza);
        let block = config.host("git.example.org_5").unwrap();
        assert_eq!(block.option("HostName"), Some("git.example.org"));
        assert_eq!(block.option("Port"), Some("2222"));
        assert_eq!(block.option("IdentitiesOnly"), Some("yes"));
        assert_eq!(block.option("IdentityFile"), Some("/srv/ssh/id_rsa_5"));
        assert_eq!(block.option("UserKnownHostsFile"), Some("/srv/ssh/known_hosts_5"));
    }

    #[test]
    fn per_user_paths() {
        let router = IdentityRouter::new("/srv/ssh", Arc::new(crate::process::SystemRunner));
        assert_eq!(router.private_key_path(3), PathBuf::from("/srv/ssh/id_rsa_3"));
        assert_eq!(router.public_key_path(3), PathBuf::from("/srv/ssh/id_rsa_3.pub"));
        assert_eq!(router.known_hosts_path(3), PathBuf::from("/srv/ssh/known_hosts_3"));
        assert_eq!(router.ssh_command(), "ssh -F /srv/ssh/config");
    }

    #[test]
    fn unreadable_config_is_reported_as_ssh_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let router = IdentityRouter::new(dir.path(), Arc::new(crate::process::SystemRunner));
        fs::create_dir_all(router.config_path()).unwrap();

        let err = router
            .ensure_host_alias(4, "git.example.org_4", "git.example.org", 22)
            .unwrap_err();
        assert!(matches!(&err, VcsError::SshConfig { path, .. } if *path == router.config_path()));
        assert_eq!(err.code(), vcsmirror_core::ErrorCode::E0401);
    }

    #[test]
    fn https_endpoints_are_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let router = IdentityRouter::new(dir.path(), Arc::new(crate::process::SystemRunner));
        let endpoint = RemoteEndpoint::parse("https://github.com/a/b.git").unwrap();
        assert_eq!(router.route(1, &endpoint).unwrap(), endpoint);
        assert!(!router.config_path().exists());
    }
}
