//! Certificate identities and their on-disk artifact paths.
//!
//! # Hierarchy
//! ```text
//! Root CA (self-signed)
//!   └── Intermediate CA (signed by Root or another Intermediate)
//!       ├── Intermediate CA ...
//!       ├── Server certificate
//!       └── Client certificate
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PkiError;
use crate::workspace::Workspace;

/// Role of a certificate within the CA hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertRole {
    Root,
    Intermediate,
    Server,
    Client,
}

impl CertRole {
    pub const ALL: [CertRole; 4] = [
        CertRole::Root,
        CertRole::Intermediate,
        CertRole::Server,
        CertRole::Client,
    ];

    /// Whether certificates of this role may sign other certificates.
    pub fn is_ca(self) -> bool {
        matches!(self, CertRole::Root | CertRole::Intermediate)
    }

    /// Whether a CA of this role may sign a request for `subject`.
    ///
    /// A Root signs only Intermediates. An Intermediate signs Intermediates
    /// and leaves, never a Root. Leaves sign nothing.
    pub fn may_sign(self, subject: CertRole) -> bool {
        match self {
            CertRole::Root => subject == CertRole::Intermediate,
            CertRole::Intermediate => subject != CertRole::Root,
            CertRole::Server | CertRole::Client => false,
        }
    }

    /// Workspace sub-directory holding this role's keys and certificates.
    pub fn dir_name(self) -> &'static str {
        match self {
            CertRole::Root => "root",
            CertRole::Intermediate => "intermediate",
            CertRole::Server => "server",
            CertRole::Client => "client",
        }
    }
}

impl fmt::Display for CertRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for CertRole {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "root" => Ok(CertRole::Root),
            "intermediate" => Ok(CertRole::Intermediate),
            "server" => Ok(CertRole::Server),
            "client" => Ok(CertRole::Client),
            other => Err(PkiError::InvalidCaType(format!("unknown role '{}'", other))),
        }
    }
}

/// Identity of one certificate artifact: a unique name and its role.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cert {
    name: String,
    role: CertRole,
}

impl Cert {
    pub fn new(name: impl Into<String>, role: CertRole) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> CertRole {
        self.role
    }

    /// `<role>/<name>.key`
    pub fn key_path(&self, workspace: &Workspace) -> PathBuf {
        workspace
            .role_dir(self.role)
            .join(format!("{}.key", self.name))
    }

    /// `<role>/<name>.crt`
    pub fn cert_path(&self, workspace: &Workspace) -> PathBuf {
        workspace
            .role_dir(self.role)
            .join(format!("{}.crt", self.name))
    }

    /// `csr/<name>.csr`
    pub fn csr_path(&self, workspace: &Workspace) -> PathBuf {
        workspace.csr_dir().join(format!("{}.csr", self.name))
    }

    /// `intermediate/<name>.chain.pem`, only Intermediates carry a chain file.
    pub fn chain_path(&self, workspace: &Workspace) -> Option<PathBuf> {
        match self.role {
            CertRole::Intermediate => Some(
                workspace
                    .role_dir(self.role)
                    .join(format!("{}.chain.pem", self.name)),
            ),
            _ => None,
        }
    }
}

impl fmt::Display for Cert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.role)
    }
}
