//! Chain Manager
//!
//! Every Intermediate CA keeps a chain file next to its certificate: its own
//! certificate first, then each ancestor CA, ending with the Root.
//!
//! ```text
//! root                      (no chain file, the Root is its own chain)
//! sre  signed by root       sre.chain.pem = [sre, root]
//! rd   signed by sre        rd.chain.pem  = [rd, sre, root]
//! ```

use openssl::x509::{X509Ref, X509};

use crate::cert::{Cert, CertRole};
use crate::codec::{encode_certificate_chain, read_certificate, read_certificate_chain};
use crate::error::{PkiError, Result};
use crate::workspace::{write_artifacts, Artifact, Workspace};

/// Ordered CA certificates, nearest first, Root last.
#[derive(Clone)]
pub struct Chain {
    certificates: Vec<X509>,
}

impl Chain {
    pub fn new(certificates: Vec<X509>) -> Result<Self> {
        if certificates.is_empty() {
            return Err(PkiError::chain_read("chain is empty"));
        }
        Ok(Self { certificates })
    }

    /// The Root that terminates the chain.
    pub fn anchor(&self) -> &X509Ref {
        // never empty, see `new`
        &self.certificates[self.certificates.len() - 1]
    }

    /// Every certificate except the Root, nearest first.
    pub fn intermediates(&self) -> &[X509] {
        &self.certificates[..self.certificates.len() - 1]
    }

    pub fn certificates(&self) -> &[X509] {
        &self.certificates
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// A copy of this chain with `certificate` in front.
    pub fn prepend(&self, certificate: X509) -> Self {
        let mut certificates = Vec::with_capacity(self.certificates.len() + 1);
        certificates.push(certificate);
        certificates.extend(self.certificates.iter().cloned());
        Self { certificates }
    }

    pub fn to_pem(&self) -> Result<Vec<u8>> {
        encode_certificate_chain(self.certificates.iter().map(|cert| &**cert))
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subjects: Vec<String> = self
            .certificates
            .iter()
            .map(|cert| format!("{:?}", cert.subject_name()))
            .collect();
        f.debug_struct("Chain").field("subjects", &subjects).finish()
    }
}

/// Load the chain of a CA: the Root alone for a Root, the chain file for an
/// Intermediate.
pub fn read_chain(workspace: &Workspace, ca: &Cert) -> Result<Chain> {
    match ca.role() {
        CertRole::Root => {
            let root = read_certificate(&ca.cert_path(workspace))
                .map_err(|e| PkiError::chain_read(format!("{}: {}", ca, e)))?;
            Chain::new(vec![root])
        }
        CertRole::Intermediate => {
            let path = chain_path(workspace, ca)?;
            let certificates = read_certificate_chain(&path)
                .map_err(|e| PkiError::chain_read(format!("{}: {}", ca, e)))?;
            Chain::new(certificates)
        }
        CertRole::Server | CertRole::Client => Err(PkiError::chain_read(format!(
            "{} is not a CA and has no chain",
            ca
        ))),
    }
}

/// Chain file for `new_cert`: its own certificate followed by the signer's chain.
pub fn chain_artifact(
    workspace: &Workspace,
    new_cert: &Cert,
    certificate: &X509Ref,
    signing_ca: &Cert,
) -> Result<Artifact> {
    let path = chain_path(workspace, new_cert)?;
    let chain = read_chain(workspace, signing_ca)?.prepend(certificate.to_owned());
    Ok(Artifact::public(path, chain.to_pem()?))
}

/// Write the chain file of the Intermediate `new_cert`, signed by `signing_ca`.
pub fn write_chain(
    workspace: &Workspace,
    new_cert: &Cert,
    certificate: &X509Ref,
    signing_ca: &Cert,
) -> Result<()> {
    let artifact = chain_artifact(workspace, new_cert, certificate, signing_ca)?;
    write_artifacts(&[artifact])?;
    tracing::debug!(name = new_cert.name(), signer = signing_ca.name(), "wrote chain");
    Ok(())
}

fn chain_path(workspace: &Workspace, cert: &Cert) -> Result<std::path::PathBuf> {
    cert.chain_path(workspace)
        .ok_or_else(|| PkiError::chain_read(format!("{} cannot carry a chain", cert)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::gen_cert;
    use crate::configs::{Claim, Config};
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn root(ws: &Workspace) -> (Cert, X509) {
        let root = Cert::new("root", CertRole::Root);
        let claim = Claim {
            common_name: "Root CA".into(),
            ..Claim::default()
        };
        let cert = gen_cert(ws, &mut Config::default(), &claim, &root).unwrap();
        (root, cert)
    }

    #[test]
    fn test_root_chain_is_itself() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        ws.init().unwrap();
        let (root, cert) = root(&ws);

        let chain = read_chain(&ws, &root).unwrap();
        assert_eq!(chain.len(), 1);
        assert!(chain.intermediates().is_empty());
        assert_eq!(chain.anchor().to_der().unwrap(), cert.to_der().unwrap());
    }

    #[test]
    fn test_write_chain_prepends_new_cert() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        ws.init().unwrap();
        let (root, root_cert) = root(&ws);

        // Any certificate will do for the chain entry itself
        let sre = Cert::new("sre", CertRole::Intermediate);
        write_chain(&ws, &sre, &root_cert, &root).unwrap();
        let chain = read_chain(&ws, &sre).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.intermediates().len(), 1);

        let rd = Cert::new("rd", CertRole::Intermediate);
        write_chain(&ws, &rd, &root_cert, &sre).unwrap();
        assert_eq!(read_chain(&ws, &rd).unwrap().len(), 3);
    }

    #[test]
    fn test_chain_read_failures() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        ws.init().unwrap();
        let (root, root_cert) = root(&ws);

        let missing = Cert::new("missing", CertRole::Intermediate);
        assert_eq!(
            read_chain(&ws, &missing).unwrap_err().kind(),
            ErrorKind::ChainReadFailure
        );

        let web = Cert::new("web", CertRole::Server);
        assert_eq!(
            read_chain(&ws, &web).unwrap_err().kind(),
            ErrorKind::ChainReadFailure
        );

        let rd = Cert::new("rd", CertRole::Intermediate);
        assert_eq!(
            write_chain(&ws, &rd, &root_cert, &missing).unwrap_err().kind(),
            ErrorKind::ChainReadFailure
        );
        assert!(!rd.chain_path(&ws).unwrap().exists());
        assert_eq!(
            write_chain(&ws, &web, &root_cert, &root).unwrap_err().kind(),
            ErrorKind::ChainReadFailure
        );
    }

    #[test]
    fn test_empty_chain_rejected() {
        assert!(Chain::new(Vec::new()).is_err());
    }
}
