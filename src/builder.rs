//! Certificate Builder
//!
//! Issues the certificates of a workspace PKI hierarchy.
//!
//! # PKI Hierarchy
//! ```text
//! Root CA (self-signed)                 ← gen_cert
//!   └── Intermediate CA                 ← gen_csr + sign_csr (by Root or Intermediate)
//!       ├── Server certificate          ← gen_csr + sign_csr (by Intermediate)
//!       └── Client certificate          ← gen_csr + sign_csr (by Intermediate)
//! ```
//!
//! # Extensions by role
//! | role         | CA    | Key Usage                                            | Extended Key Usage |
//! |--------------|-------|------------------------------------------------------|--------------------|
//! | Root         | true  | digitalSignature, keyCertSign, cRLSign               | none               |
//! | Intermediate | true  | digitalSignature, keyCertSign, cRLSign               | none               |
//! | Server       | false | digitalSignature, keyEncipherment, contentCommitment | serverAuth         |
//! | Client       | false | digitalSignature, keyEncipherment, contentCommitment | none               |
//!
//! Client certificates carry no Extended Key Usage.
//!
//! Every certificate also carries Subject and Authority Key Identifiers, and
//! a Subject Alternative Name when the claim lists DNS names, IP addresses or
//! email addresses.
//!
//! # Atomicity
//! Each operation validates its inputs and finishes all cryptographic work
//! before the first file is written. Keys, certificates, requests and chains
//! belonging to one issuance are written together: either all land or none.
//!
//! # Example
//! ```rust,no_run
//! use pki_forge::builder::{gen_cert, gen_csr, sign_csr};
//! use pki_forge::cert::{Cert, CertRole};
//! use pki_forge::configs::{Claim, Config, Policy};
//! use pki_forge::policy::policy_trust_func;
//! use pki_forge::workspace::Workspace;
//! # fn example() -> pki_forge::Result<()> {
//!
//! let workspace = Workspace::new("pki");
//! workspace.init()?;
//!
//! let mut root_config = Config::default();
//! let root_claim = Claim { common_name: "Example Root CA".into(), ..Claim::default() };
//! let root = Cert::new("root", CertRole::Root);
//! gen_cert(&workspace, &mut root_config, &root_claim, &root)?;
//!
//! let mut int_config = Config::default();
//! let int_claim = Claim { common_name: "Operations CA".into(), ..Claim::default() };
//! let sre = Cert::new("sre", CertRole::Intermediate);
//! gen_csr(&workspace, &int_config, &int_claim, &sre)?;
//!
//! let trust = policy_trust_func(&Policy::default());
//! sign_csr(&workspace, &root_config, &root, &mut int_config, &sre, &trust)?;
//! # Ok(())
//! # }
//! ```

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKeyRef, Private};
use openssl::stack::Stack;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage,
    SubjectAlternativeName, SubjectKeyIdentifier,
};
use openssl::x509::{
    X509Builder, X509Extension, X509Name, X509NameRef, X509Ref, X509Req, X509ReqRef, X509,
};
use tracing::{info, warn};

use crate::cert::{Cert, CertRole};
use crate::chain;
use crate::codec::{
    encode_pem, encode_private_key, generate_key_pair, read_certificate,
    read_certificate_request, read_private_key, PEM_CERTIFICATE, PEM_CERTIFICATE_REQUEST,
};
use crate::configs::{Claim, Config};
use crate::error::{PkiError, Result};
use crate::identity::Identity;
use crate::workspace::{validate_name, write_artifacts, Artifact, Workspace};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const X509_REQ_VERSION_1: i32 = 0;

/// Issue a self-signed Root CA certificate for `cert`.
///
/// Generates a key pair of `config.key_length` bits, builds the certificate
/// from `claim` and writes `<root>/<name>.key` (encrypted when
/// `config.password` is set) and `<root>/<name>.crt`. On success
/// `config.serial` is advanced to the serial of the new certificate.
///
/// # Errors
/// - `InvalidHierarchy` if `cert` is not a Root
/// - `NameCollision` if the name is taken anywhere in the workspace
/// - `KeyGenFailure` for an invalid `config.key_length`
/// - `EncodingFailure` if the certificate cannot be built or written
pub fn gen_cert(
    workspace: &Workspace,
    config: &mut Config,
    claim: &Claim,
    cert: &Cert,
) -> Result<X509> {
    if cert.role() != CertRole::Root {
        return Err(PkiError::InvalidHierarchy(format!(
            "only Root certificates are self-signed, {} must be signed by a CA",
            cert
        )));
    }
    workspace.ensure_name_free(cert.name())?;

    let serial = next_serial(config)?;
    let private_key = generate_key_pair(config.key_length)?;
    let subject = subject_name(claim)?;

    let mut builder = CertificateTemplate::new(serial, config.validity_days)?;
    builder.subject_and_issuer(&subject, &subject)?;
    builder.public_key(&private_key)?;
    builder.role_extensions(CertRole::Root)?;
    builder.key_identifiers(None)?;
    builder.alt_names(&AltNames::from_claim(claim), None)?;
    let certificate = builder.sign(&private_key)?;

    write_artifacts(&[
        Artifact::private(
            cert.key_path(workspace),
            encode_private_key(&private_key, config.password())?,
        ),
        Artifact::public(
            cert.cert_path(workspace),
            encode_pem(PEM_CERTIFICATE, &certificate.to_der()?),
        ),
    ])?;

    config.serial = serial;
    info!(name = cert.name(), serial, "issued self-signed root certificate");
    Ok(certificate)
}

/// Create a certificate signing request for an Intermediate, Server or
/// Client `cert`.
///
/// Writes the fresh private key to `<role>/<name>.key` and the request to
/// `csr/<name>.csr`. The request is signed with its own key (PKCS#10 proof
/// of possession). No serial is consumed.
///
/// # Errors
/// - `InvalidHierarchy` if `cert` is a Root
/// - `NameCollision` if the name is taken anywhere in the workspace
/// - `KeyGenFailure` for an invalid `config.key_length`
/// - `EncodingFailure` if the request cannot be built or written
pub fn gen_csr(
    workspace: &Workspace,
    config: &Config,
    claim: &Claim,
    cert: &Cert,
) -> Result<X509Req> {
    if cert.role() == CertRole::Root {
        return Err(PkiError::InvalidHierarchy(format!(
            "{} is a Root and cannot be issued through a signing request",
            cert
        )));
    }
    workspace.ensure_name_free(cert.name())?;

    let private_key = generate_key_pair(config.key_length)?;
    let subject = subject_name(claim)?;

    let mut builder = X509Req::builder()
        .map_err(|e| PkiError::encoding(format!("Failed to create X509Req builder: {}", e)))?;
    builder
        .set_version(X509_REQ_VERSION_1)
        .map_err(|e| PkiError::encoding(format!("Failed to set version: {}", e)))?;
    builder
        .set_subject_name(&subject)
        .map_err(|e| PkiError::encoding(format!("Failed to set subject: {}", e)))?;
    builder
        .set_pubkey(&private_key)
        .map_err(|e| PkiError::encoding(format!("Failed to set public key: {}", e)))?;

    let alt_names = AltNames::from_claim(claim);
    if !alt_names.is_empty() {
        let extension = alt_names.build(&builder.x509v3_context(None))?;
        let mut extensions = Stack::new()?;
        extensions.push(extension)?;
        builder
            .add_extensions(&extensions)
            .map_err(|e| PkiError::encoding(format!("Failed to add extensions: {}", e)))?;
    }

    builder
        .sign(&private_key, MessageDigest::sha256())
        .map_err(|e| PkiError::encoding(format!("Failed to sign request: {}", e)))?;
    let request = builder.build();

    write_artifacts(&[
        Artifact::private(
            cert.key_path(workspace),
            encode_private_key(&private_key, config.password())?,
        ),
        Artifact::public(
            cert.csr_path(workspace),
            encode_pem(PEM_CERTIFICATE_REQUEST, &request.to_der()?),
        ),
    ])?;

    info!(name = cert.name(), role = %cert.role(), "created certificate signing request");
    Ok(request)
}

/// Sign the pending request of `csr_cert` with the CA `ca_cert`.
///
/// The CA key is decrypted with `ca_config.password`. `trust_fn` decides
/// whether the CA accepts the request; build it from the CA role's policy
/// with [`crate::policy::policy_trust_func`]. The issued certificate is
/// written to `<role>/<name>.crt`, and for Intermediates the chain file is
/// written alongside it. On success `csr_config.serial` is advanced.
///
/// # Errors
/// - `InvalidCaType` if `ca_cert` is not a Root or Intermediate
/// - `InvalidHierarchy` if the CA role may not sign the request role
/// - `NameCollision` if `csr_cert` already has a certificate
/// - `CaKeyDecryptFailure` if the CA key cannot be decrypted or does not match
/// - `EncodingFailure` if an input is malformed or the request signature is bad
/// - `PolicyViolation` if `trust_fn` rejects the request
/// - `ChainReadFailure` if the signer's chain cannot be read
pub fn sign_csr<F>(
    workspace: &Workspace,
    ca_config: &Config,
    ca_cert: &Cert,
    csr_config: &mut Config,
    csr_cert: &Cert,
    trust_fn: &F,
) -> Result<X509>
where
    F: Fn(Option<&X509Ref>, Option<&X509ReqRef>) -> bool + ?Sized,
{
    if !ca_cert.role().is_ca() {
        return Err(PkiError::InvalidCaType(format!(
            "{} cannot sign certificates",
            ca_cert
        )));
    }
    if !ca_cert.role().may_sign(csr_cert.role()) {
        return Err(PkiError::InvalidHierarchy(format!(
            "a {} CA may not sign a {} certificate",
            ca_cert.role(),
            csr_cert.role()
        )));
    }
    validate_name(csr_cert.name())?;
    let cert_path = csr_cert.cert_path(workspace);
    if cert_path.exists() {
        return Err(PkiError::NameCollision(format!(
            "{} has already been issued",
            csr_cert
        )));
    }

    let ca_key = read_private_key(ca_config.password(), &ca_cert.key_path(workspace))?;
    let ca_certificate = read_certificate(&ca_cert.cert_path(workspace))?;
    if !ca_certificate.public_key()?.public_eq(&ca_key) {
        return Err(PkiError::ca_key_decrypt(format!(
            "key of {} does not match its certificate",
            ca_cert
        )));
    }

    let request = read_certificate_request(&csr_cert.csr_path(workspace))?;
    let request_key = request.public_key()?;
    if !request.verify(&request_key)? {
        return Err(PkiError::encoding(format!(
            "signature of the request for {} is invalid",
            csr_cert
        )));
    }

    if !trust_fn(Some(&*ca_certificate), Some(&*request)) {
        warn!(ca = ca_cert.name(), name = csr_cert.name(), "request rejected by CA policy");
        return Err(PkiError::PolicyViolation(format!(
            "{} does not trust the request for {}",
            ca_cert, csr_cert
        )));
    }

    let serial = next_serial(csr_config)?;
    let identity = Identity::from_request(&request)?;

    let mut builder = CertificateTemplate::new(serial, csr_config.validity_days)?;
    builder.subject_and_issuer(request.subject_name(), ca_certificate.subject_name())?;
    builder.public_key(&request_key)?;
    builder.role_extensions(csr_cert.role())?;
    builder.key_identifiers(Some(&*ca_certificate))?;
    builder.alt_names(&AltNames::from_identity(&identity), Some(&*ca_certificate))?;
    let certificate = builder.sign(&ca_key)?;

    let mut artifacts = vec![Artifact::public(
        cert_path,
        encode_pem(PEM_CERTIFICATE, &certificate.to_der()?),
    )];
    if csr_cert.role() == CertRole::Intermediate {
        artifacts.push(chain::chain_artifact(
            workspace,
            csr_cert,
            &certificate,
            ca_cert,
        )?);
    }
    write_artifacts(&artifacts)?;

    csr_config.serial = serial;
    info!(
        ca = ca_cert.name(),
        name = csr_cert.name(),
        role = %csr_cert.role(),
        serial,
        "signed certificate"
    );
    Ok(certificate)
}

fn next_serial(config: &Config) -> Result<u64> {
    config
        .serial
        .checked_add(1)
        .ok_or_else(|| PkiError::encoding("serial number space exhausted"))
}

/// Subject Name in Country, Province, Locality, Street, Postal Code,
/// Organization, Organizational Unit, Common Name order.
fn subject_name(claim: &Claim) -> Result<X509Name> {
    let mut name_builder = X509Name::builder()
        .map_err(|e| PkiError::encoding(format!("Failed to create name builder: {}", e)))?;

    let attributes: [(Nid, &[String]); 7] = [
        (Nid::COUNTRYNAME, &claim.country),
        (Nid::STATEORPROVINCENAME, &claim.province),
        (Nid::LOCALITYNAME, &claim.locality),
        (Nid::STREETADDRESS, &claim.street_address),
        (Nid::POSTALCODE, &claim.postal_code),
        (Nid::ORGANIZATIONNAME, &claim.organization),
        (Nid::ORGANIZATIONALUNITNAME, &claim.organizational_unit),
    ];
    for (nid, values) in attributes {
        for value in values {
            name_builder.append_entry_by_nid(nid, value).map_err(|e| {
                let attribute = nid.long_name().unwrap_or("attribute");
                PkiError::encoding(format!("Failed to set {}: {}", attribute, e))
            })?;
        }
    }
    if !claim.common_name.is_empty() {
        name_builder
            .append_entry_by_nid(Nid::COMMONNAME, &claim.common_name)
            .map_err(|e| PkiError::encoding(format!("Failed to set CN: {}", e)))?;
    }
    Ok(name_builder.build())
}

/// Subject Alternative Name entries.
struct AltNames<'a> {
    dns: &'a [String],
    ip: &'a [String],
    email: &'a [String],
}

impl<'a> AltNames<'a> {
    fn from_claim(claim: &'a Claim) -> Self {
        Self {
            dns: &claim.dns_name,
            ip: &claim.ip_address,
            email: &claim.email_address,
        }
    }

    fn from_identity(identity: &'a Identity) -> Self {
        Self {
            dns: identity.dns_name.as_deref().unwrap_or(&[]),
            ip: identity.ip_address.as_deref().unwrap_or(&[]),
            email: identity.email_address.as_deref().unwrap_or(&[]),
        }
    }

    fn is_empty(&self) -> bool {
        self.dns.is_empty() && self.ip.is_empty() && self.email.is_empty()
    }

    fn build(&self, context: &openssl::x509::X509v3Context<'_>) -> Result<X509Extension> {
        let mut san = SubjectAlternativeName::new();
        for dns in self.dns {
            san.dns(dns);
        }
        for ip in self.ip {
            san.ip(ip);
        }
        for email in self.email {
            san.email(email);
        }
        san.build(context).map_err(|e| {
            PkiError::encoding(format!("Failed to build SubjectAlternativeName: {}", e))
        })
    }
}

/// X.509 v3 certificate under construction.
struct CertificateTemplate {
    builder: X509Builder,
}

impl CertificateTemplate {
    /// Version, serial and a validity window of `[now, now + validity_days]`.
    fn new(serial: u64, validity_days: u32) -> Result<Self> {
        let mut builder = X509::builder()
            .map_err(|e| PkiError::encoding(format!("Failed to create X509 builder: {}", e)))?;

        builder
            .set_version(X509_VERSION_3)
            .map_err(|e| PkiError::encoding(format!("Failed to set version: {}", e)))?;

        let serial = BigNum::from_slice(&serial.to_be_bytes())?.to_asn1_integer()?;
        builder
            .set_serial_number(&serial)
            .map_err(|e| PkiError::encoding(format!("Failed to set serial number: {}", e)))?;

        let not_before = Asn1Time::days_from_now(0)
            .map_err(|e| PkiError::encoding(format!("Failed to create not_before: {}", e)))?;
        builder
            .set_not_before(&not_before)
            .map_err(|e| PkiError::encoding(format!("Failed to set not_before: {}", e)))?;

        let not_after = Asn1Time::days_from_now(validity_days)
            .map_err(|e| PkiError::encoding(format!("Failed to create not_after: {}", e)))?;
        builder
            .set_not_after(&not_after)
            .map_err(|e| PkiError::encoding(format!("Failed to set not_after: {}", e)))?;

        Ok(Self { builder })
    }

    fn subject_and_issuer(&mut self, subject: &X509NameRef, issuer: &X509NameRef) -> Result<()> {
        self.builder
            .set_subject_name(subject)
            .map_err(|e| PkiError::encoding(format!("Failed to set subject: {}", e)))?;
        self.builder
            .set_issuer_name(issuer)
            .map_err(|e| PkiError::encoding(format!("Failed to set issuer: {}", e)))
    }

    fn public_key<T: openssl::pkey::HasPublic>(&mut self, key: &PKeyRef<T>) -> Result<()> {
        self.builder
            .set_pubkey(key)
            .map_err(|e| PkiError::encoding(format!("Failed to set public key: {}", e)))
    }

    /// Basic Constraints, Key Usage and Extended Key Usage for `role`.
    fn role_extensions(&mut self, role: CertRole) -> Result<()> {
        let mut bc = BasicConstraints::new();
        bc.critical();
        let mut ku = KeyUsage::new();
        ku.critical();
        ku.digital_signature();
        let mut eku = None;

        match role {
            CertRole::Root | CertRole::Intermediate => {
                bc.ca();
                ku.key_cert_sign();
                ku.crl_sign();
            }
            CertRole::Server | CertRole::Client => {
                ku.key_encipherment();
                ku.non_repudiation(); // contentCommitment
                if role == CertRole::Server {
                    let mut server = ExtendedKeyUsage::new();
                    server.server_auth();
                    eku = Some(server);
                }
            }
        }

        let extension = bc
            .build()
            .map_err(|e| PkiError::encoding(format!("Failed to build BasicConstraints: {}", e)))?;
        self.append(extension, "BasicConstraints")?;
        let extension = ku
            .build()
            .map_err(|e| PkiError::encoding(format!("Failed to build KeyUsage: {}", e)))?;
        self.append(extension, "KeyUsage")?;
        if let Some(eku) = eku {
            let extension = eku.build().map_err(|e| {
                PkiError::encoding(format!("Failed to build ExtendedKeyUsage: {}", e))
            })?;
            self.append(extension, "ExtendedKeyUsage")?;
        }
        Ok(())
    }

    /// Subject Key Identifier from the public key already set, and Authority
    /// Key Identifier taken from the issuer's Subject Key Identifier.
    /// `None` issues the certificate as its own issuer.
    fn key_identifiers(&mut self, issuer: Option<&X509Ref>) -> Result<()> {
        let ski = SubjectKeyIdentifier::new()
            .build(&self.builder.x509v3_context(issuer, None))
            .map_err(|e| {
                PkiError::encoding(format!("Failed to build SubjectKeyIdentifier: {}", e))
            })?;
        self.append(ski, "SubjectKeyIdentifier")?;

        // Must follow the SKI, a self-signed certificate is its own issuer
        let aki = AuthorityKeyIdentifier::new()
            .keyid(true)
            .build(&self.builder.x509v3_context(issuer, None))
            .map_err(|e| {
                PkiError::encoding(format!("Failed to build AuthorityKeyIdentifier: {}", e))
            })?;
        self.append(aki, "AuthorityKeyIdentifier")
    }

    fn alt_names(&mut self, alt_names: &AltNames<'_>, issuer: Option<&X509Ref>) -> Result<()> {
        if alt_names.is_empty() {
            return Ok(());
        }
        let extension = alt_names.build(&self.builder.x509v3_context(issuer, None))?;
        self.append(extension, "SubjectAlternativeName")
    }

    fn append(&mut self, extension: X509Extension, what: &str) -> Result<()> {
        self.builder
            .append_extension(extension)
            .map_err(|e| PkiError::encoding(format!("Failed to add {}: {}", what, e)))
    }

    fn sign(mut self, signing_key: &PKeyRef<Private>) -> Result<X509> {
        self.builder
            .sign(signing_key, MessageDigest::sha256())
            .map_err(|e| PkiError::encoding(format!("Failed to sign certificate: {}", e)))?;
        Ok(self.builder.build())
    }
}
