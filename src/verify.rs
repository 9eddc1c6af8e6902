//! Verifier
//!
//! Validates a certificate against the chain of a CA using OpenSSL's RFC 5280
//! path validation. The Root at the end of the CA's chain is the only trust
//! anchor; every other chain entry is offered as an untrusted intermediate.

use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::verify::X509VerifyParam;
use openssl::x509::{X509StoreContext, X509};

use crate::cert::Cert;
use crate::chain::{read_chain, Chain};
use crate::codec::read_certificate;
use crate::error::{PkiError, Result};
use crate::identity::asn1_text;
use crate::workspace::Workspace;

/// Verify the certificate of `target` against the chain of `ca`.
///
/// When `dns_name` is given the certificate must also be valid for that host.
///
/// # Errors
/// - `InvalidCaType` if `ca` is not a Root or Intermediate
/// - `ChainReadFailure` if the CA chain cannot be loaded
/// - `EncodingFailure` if the target certificate cannot be read
/// - `VerificationFailure` if path validation fails
pub fn verify_cert(
    workspace: &Workspace,
    ca: &Cert,
    target: &Cert,
    dns_name: Option<&str>,
) -> Result<()> {
    if !ca.role().is_ca() {
        return Err(PkiError::InvalidCaType(format!(
            "{} is not a certificate authority",
            ca
        )));
    }
    let chain = read_chain(workspace, ca)?;
    let certificate = read_certificate(&target.cert_path(workspace))?;

    verify_with_chain(&chain, &certificate, dns_name)?;
    tracing::info!(ca = ca.name(), name = target.name(), "certificate verified");
    Ok(())
}

/// Path-validate `certificate` with `chain` as trust anchor and intermediates.
pub fn verify_with_chain(chain: &Chain, certificate: &X509, dns_name: Option<&str>) -> Result<()> {
    let mut store = X509StoreBuilder::new()?;
    store
        .add_cert(chain.anchor().to_owned())
        .map_err(|e| PkiError::verification(format!("Failed to add trust anchor: {}", e)))?;
    if let Some(host) = dns_name {
        let mut param = X509VerifyParam::new()?;
        param
            .set_host(host)
            .map_err(|e| PkiError::verification(format!("Failed to set host: {}", e)))?;
        store.set_param(&param)?;
    }
    let store = store.build();

    let mut intermediates = Stack::new()?;
    for cert in chain.intermediates() {
        intermediates.push(cert.clone())?;
    }

    let mut context = X509StoreContext::new()?;
    let verified = context.init(&store, certificate, &intermediates, |ctx| {
        if ctx.verify_cert()? {
            Ok(Ok(()))
        } else {
            Ok(Err(ctx.error()))
        }
    })?;
    verified.map_err(|error| {
        PkiError::verification(format!(
            "{}: {}",
            subject_of(certificate),
            error.error_string()
        ))
    })
}

fn subject_of(certificate: &X509) -> String {
    certificate
        .subject_name()
        .entries_by_nid(openssl::nid::Nid::COMMONNAME)
        .next()
        .and_then(|entry| asn1_text(entry.data()).ok())
        .unwrap_or_else(|| "certificate".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{gen_cert, gen_csr, sign_csr};
    use crate::cert::CertRole;
    use crate::configs::{Claim, Config, Policy};
    use crate::error::ErrorKind;
    use crate::policy::policy_trust_func;
    use tempfile::TempDir;

    fn claim(common_name: &str, dns: &[&str]) -> Claim {
        Claim {
            common_name: common_name.to_string(),
            dns_name: dns.iter().map(|s| s.to_string()).collect(),
            ..Claim::default()
        }
    }

    #[test]
    fn test_verify_server_with_dns() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        ws.init().unwrap();
        let trust = policy_trust_func(&Policy::default());

        let mut root_config = Config::default();
        let root = Cert::new("root", CertRole::Root);
        gen_cert(&ws, &mut root_config, &claim("Root CA", &[]), &root).unwrap();

        let mut int_config = Config::default();
        let sre = Cert::new("sre", CertRole::Intermediate);
        gen_csr(&ws, &int_config, &claim("sre", &[]), &sre).unwrap();
        sign_csr(&ws, &root_config, &root, &mut int_config, &sre, &trust).unwrap();

        let mut server_config = Config::default();
        let web = Cert::new("web", CertRole::Server);
        gen_csr(
            &ws,
            &server_config,
            &claim("web", &["web.example.com"]),
            &web,
        )
        .unwrap();
        sign_csr(&ws, &int_config, &sre, &mut server_config, &web, &trust).unwrap();

        verify_cert(&ws, &sre, &web, None).unwrap();
        verify_cert(&ws, &sre, &web, Some("web.example.com")).unwrap();
        let err = verify_cert(&ws, &sre, &web, Some("other.example.com")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VerificationFailure);

        // The intermediate is verifiable from the root alone
        verify_cert(&ws, &root, &sre, None).unwrap();
        // The leaf is not, the intermediate is missing
        let err = verify_cert(&ws, &root, &web, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VerificationFailure);

        let err = verify_cert(&ws, &web, &web, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidCaType);
    }

    #[test]
    fn test_verify_against_foreign_root_fails() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        ws.init().unwrap();

        let root = Cert::new("root", CertRole::Root);
        gen_cert(&ws, &mut Config::default(), &claim("Root CA", &[]), &root).unwrap();
        let other = Cert::new("other", CertRole::Root);
        gen_cert(&ws, &mut Config::default(), &claim("Other CA", &[]), &other).unwrap();

        let err = verify_cert(&ws, &root, &other, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VerificationFailure);
        verify_cert(&ws, &root, &root, None).unwrap();
    }
}
