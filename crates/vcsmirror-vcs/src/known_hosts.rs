//! Per-user known-hosts files.
//!
//! Host keys are looked up with `ssh-keygen -F` and added from
//! `ssh-keyscan -H`. Additions are appended whole lines at a time, so
//! concurrent workers can at worst add the same key twice.

use crate::error::{Result, VcsError};
use crate::process::{CommandRunner, CommandSpec};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use sha2::{Digest, Sha256};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Result of trusting a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustOutcome {
    /// The host already had an entry.
    AlreadyKnown,
    /// Keys were scanned and appended.
    Added {
        /// `SHA256:` fingerprints of the added keys.
        fingerprints: Vec<String>,
    },
}

/// Pattern `ssh` uses for a host in known-hosts files.
#[must_use]
pub fn host_pattern(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{host}]:{port}")
    }
}

/// OpenSSH-style `SHA256:` fingerprint of a public key line.
///
/// Accepts `authorized_keys`, `.pub` and (hashed) known-hosts lines.
#[must_use]
pub fn fingerprint_sha256(line: &str) -> Option<String> {
    let mut fields = line.split_whitespace();
    let blob = loop {
        let field = fields.next()?;
        if is_key_type(field) {
            break fields.next()?;
        }
    };
    let raw = STANDARD.decode(blob).ok()?;
    let digest = Sha256::digest(&raw);
    Some(format!("SHA256:{}", STANDARD_NO_PAD.encode(digest)))
}

fn is_key_type(field: &str) -> bool {
    field.starts_with("ssh-") || field.starts_with("ecdsa-") || field.starts_with("sk-")
}

/// Reads and extends known-hosts files.
#[derive(Debug, Clone, Copy)]
pub struct KnownHosts<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> KnownHosts<'a> {
    /// Use `runner` for `ssh-keygen` and `ssh-keyscan`.
    #[must_use]
    pub const fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Whether `file` has an entry for the host.
    ///
    /// # Errors
    /// Returns error if `ssh-keygen` cannot be run.
    pub fn is_known(&self, file: &Path, host: &str, port: u16) -> Result<bool> {
        if !file.exists() {
            return Ok(false);
        }
        let spec = CommandSpec::new("ssh-keygen")
            .args(["-F", &host_pattern(host, port), "-f"])
            .path_arg(file);
        let output = self.runner.run(&spec)?;
        Ok(output.is_success() && !output.stdout.trim().is_empty())
    }

    /// Fetch the host's public keys as hashed known-hosts lines.
    ///
    /// # Errors
    /// Returns error if the scan produced no keys.
    pub fn scan(&self, host: &str, port: u16) -> Result<Vec<String>> {
        let spec = CommandSpec::new("ssh-keyscan").args(["-H", "-p", &port.to_string(), host]);
        let output = self.runner.run(&spec)?;

        let lines: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect();

        if lines.is_empty() {
            return Err(VcsError::HostKeyVerification {
                host: host_pattern(host, port),
            });
        }
        Ok(lines)
    }

    /// Make sure `file` trusts the host, scanning its keys if needed.
    ///
    /// # Errors
    /// Returns error if the keys cannot be scanned or written.
    pub fn trust(&self, file: &Path, host: &str, port: u16) -> Result<TrustOutcome> {
        if self.is_known(file, host, port)? {
            debug!(host, port, "host already trusted");
            return Ok(TrustOutcome::AlreadyKnown);
        }

        let lines = self.scan(host, port)?;
        let mut block = String::new();
        for line in &lines {
            block.push_str(line);
            block.push('\n');
        }

        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .map_err(|e| VcsError::io(file, e))?;
        handle
            .write_all(block.as_bytes())
            .map_err(|e| VcsError::io(file, e))?;

        let fingerprints: Vec<String> = lines.iter().filter_map(|l| fingerprint_sha256(l)).collect();
        info!(host, port, keys = lines.len(), "host keys trusted");
        Ok(TrustOutcome::Added { fingerprints })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_pattern_is_bare_host() {
        assert_eq!(host_pattern("github.com", 22), "github.com");
        assert_eq!(host_pattern("gitlab.example.com", 2222), "[gitlab.example.com]:2222");
    }

    #[test]
    fn fingerprint_of_public_key_line() {
        // 32 zero bytes keep the expected digest easy to recompute.
        let blob = STANDARD.encode([0u8; 32]);
        let line = format!("ssh-ed25519 {blob} user@host");
        let expected = format!(
            "SHA256:{}",
            STANDARD_NO_PAD.encode(Sha256::digest([0u8; 32]))
        );
        assert_eq!(fingerprint_sha256(&line), Some(expected.clone()));

        let hashed = format!("|1|c2FsdA==|aGFzaA== ssh-ed25519 {blob}");
        assert_eq!(fingerprint_sha256(&hashed), Some(expected));
    }

    #[test]
    fn fingerprint_rejects_garbage() {
        assert_eq!(fingerprint_sha256("not a key"), None);
        assert_eq!(fingerprint_sha256("ssh-rsa !!!notbase64"), None);
        assert_eq!(fingerprint_sha256("ssh-rsa"), None);
    }
}
