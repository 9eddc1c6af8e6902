//! PKI Forge - Workspace Certificate Authority Library
//!
//! Builds and maintains a small X.509 hierarchy in a directory on disk:
//! a self-signed Root CA, Intermediate CAs nested to any depth, and
//! Server/Client leaf certificates, all RSA with SHA-256 signatures.
//!
//! # Overview
//!
//! ```text
//! Root CA (self-signed)
//!   └── Intermediate CA (signed by Root)
//!       └── Intermediate CA (signed by Intermediate)
//!           ├── Server certificate (CA=false, serverAuth)
//!           └── Client certificate (CA=false)
//! ```
//!
//! Every Intermediate keeps a chain file (itself first, Root last) so that any
//! certificate can be path-validated against the CA that issued it.
//!
//! # Workspace Layout
//!
//! ```text
//! <workspace>/
//!   pki.toml                    role settings: config, claim, policy
//!   root/<name>.key|.crt
//!   intermediate/<name>.key|.crt|.chain.pem
//!   server/<name>.key|.crt
//!   client/<name>.key|.crt
//!   csr/<name>.csr
//! ```
//!
//! Private keys are PKCS#1 PEM, encrypted with AES-256-CBC when the role's
//! config carries a password, and written with mode 0600. Every operation
//! either writes all of its files or none of them.
//!
//! # Modules
//!
//! - [`builder`]: `gen_cert`, `gen_csr` and `sign_csr`
//! - [`chain`]: chain files of Intermediate CAs
//! - [`verify`]: path validation against a CA chain
//! - [`policy`]: compiles a signing policy into a trust function
//! - [`identity`]: subject and SAN values of certificates and requests
//! - [`codec`]: key generation and PEM encoding
//! - [`configs`]: `pki.toml` role settings
//! - [`workspace`]: directory layout and atomic writes
//! - [`cert`]: certificate names and roles
//! - [`error`]: the [`PkiError`] type
//!
//! # Example
//!
//! ```no_run
//! use pki_forge::builder::{gen_cert, gen_csr, sign_csr};
//! use pki_forge::cert::{Cert, CertRole};
//! use pki_forge::configs::PkiConfig;
//! use pki_forge::policy::policy_trust_func;
//! use pki_forge::verify::verify_cert;
//! use pki_forge::workspace::Workspace;
//!
//! fn main() -> pki_forge::Result<()> {
//!     let workspace = Workspace::new("pki");
//!     workspace.init()?;
//!     let mut settings = PkiConfig::default();
//!
//!     let root = Cert::new("root", CertRole::Root);
//!     gen_cert(&workspace, &mut settings.root.config, &settings.root.claim, &root)?;
//!
//!     let sre = Cert::new("sre", CertRole::Intermediate);
//!     gen_csr(&workspace, &settings.intermediate.config, &settings.intermediate.claim, &sre)?;
//!     let trust = policy_trust_func(&settings.root.policy);
//!     sign_csr(
//!         &workspace,
//!         &settings.root.config,
//!         &root,
//!         &mut settings.intermediate.config,
//!         &sre,
//!         &trust,
//!     )?;
//!
//!     verify_cert(&workspace, &root, &sre, None)?;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod cert;
pub mod chain;
pub mod codec;
pub mod configs;
pub mod error;
pub mod identity;
pub mod policy;
pub mod verify;
pub mod workspace;

pub use error::{ErrorKind, PkiError, Result};
