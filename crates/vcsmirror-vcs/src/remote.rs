//! Remote endpoints: a location plus the sync flags for one side of a mirror.
//!
//! VCS kind and transport come from ordered substring rules over the scheme.
//! The rules are deliberately permissive (`http` also matches `https`,
//! `svn+ssh` classifies as SVN); reordering them changes how custom schemes
//! are classified.

use crate::error::Result;
use crate::types::{Protocol, VcsKind};
use crate::uri::VcsUri;
use std::fmt;

/// Scheme fragment to VCS kind, first match wins.
const VCS_KIND_RULES: &[(&str, VcsKind)] = &[
    ("bzr", VcsKind::Bazaar),
    ("hg", VcsKind::Mercurial),
    ("svn", VcsKind::Svn),
    ("ssh", VcsKind::Git),
    ("http", VcsKind::Git),
    ("git", VcsKind::Git),
];

/// How a matched scheme fragment maps to a transport.
#[derive(Debug, Clone, Copy)]
enum ProtocolRule {
    /// Foreign VCS tunnelled over HTTP, HTTPS when the scheme says so.
    Tunnel,
    /// Always SSH.
    Ssh,
    /// HTTP or HTTPS depending on the scheme.
    Web,
}

/// Scheme fragment to transport rule, first match wins.
const PROTOCOL_RULES: &[(&str, ProtocolRule)] = &[
    ("bzr", ProtocolRule::Tunnel),
    ("hg", ProtocolRule::Tunnel),
    ("svn", ProtocolRule::Tunnel),
    ("ssh", ProtocolRule::Ssh),
    ("http", ProtocolRule::Web),
    ("git", ProtocolRule::Ssh),
];

/// Classify the VCS kind of a scheme. Unmatched schemes are Git.
#[must_use]
pub fn vcs_kind_for_scheme(scheme: &str) -> VcsKind {
    VCS_KIND_RULES
        .iter()
        .find(|(fragment, _)| scheme.contains(fragment))
        .map_or(VcsKind::Git, |(_, kind)| *kind)
}

/// Classify the transport of a scheme. Unmatched schemes are SSH.
#[must_use]
pub fn protocol_for_scheme(scheme: &str) -> Protocol {
    let https_or_http = || {
        if scheme.contains("https") {
            Protocol::Https
        } else {
            Protocol::Http
        }
    };

    match PROTOCOL_RULES
        .iter()
        .find(|(fragment, _)| scheme.contains(fragment))
        .map(|(_, rule)| *rule)
    {
        Some(ProtocolRule::Tunnel | ProtocolRule::Web) => https_or_http(),
        Some(ProtocolRule::Ssh) | None => Protocol::Ssh,
    }
}

/// One side of a mirror: where it lives and how to sync with it.
///
/// Built fresh for every task run from the stored location string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    uri: VcsUri,
    /// Force non-fast-forward updates on this side.
    pub is_force_update: bool,
    /// Remove refs that vanished on the other side.
    pub is_prune_mirrors: bool,
}

impl RemoteEndpoint {
    /// Wrap a parsed location with both flags off.
    #[must_use]
    pub fn new(uri: VcsUri) -> Self {
        Self {
            uri,
            is_force_update: false,
            is_prune_mirrors: false,
        }
    }

    /// Parse a stored location string.
    ///
    /// # Errors
    /// Returns error if the location cannot be parsed.
    pub fn parse(location: &str) -> Result<Self> {
        Ok(Self::new(VcsUri::parse(location)?))
    }

    /// Set the sync flags.
    #[must_use]
    pub const fn with_flags(mut self, is_force_update: bool, is_prune_mirrors: bool) -> Self {
        self.is_force_update = is_force_update;
        self.is_prune_mirrors = is_prune_mirrors;
        self
    }

    /// The parsed location.
    #[must_use]
    pub const fn uri(&self) -> &VcsUri {
        &self.uri
    }

    /// Canonical URL handed to VCS tools.
    #[must_use]
    pub fn url(&self) -> String {
        self.uri.url()
    }

    /// Host name of the remote.
    #[must_use]
    pub fn hostname(&self) -> &str {
        self.uri.hostname()
    }

    /// Port of the remote, falling back to 22 for SSH transports.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.uri.port().unwrap_or(22)
    }

    /// VCS kind derived from the scheme.
    #[must_use]
    pub fn vcs_kind(&self) -> VcsKind {
        vcs_kind_for_scheme(self.uri.scheme())
    }

    /// Transport derived from the scheme.
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        protocol_for_scheme(self.uri.scheme())
    }

    /// Copy of this endpoint addressed through an SSH host alias.
    #[must_use]
    pub fn with_host_alias(&self, alias: &str) -> Self {
        Self {
            uri: self.uri.with_hostname(alias),
            ..self.clone()
        }
    }
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)
    }
}
