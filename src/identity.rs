//! Subject identity of a certificate or signing request.
//!
//! Both the CA certificate and the CSR are reduced to an [`Identity`] before
//! policy evaluation. Multi-valued fields distinguish "absent" (`None`) from
//! "present but empty" (`Some(vec![])`).

use std::net::{Ipv4Addr, Ipv6Addr};

use openssl::asn1::Asn1StringRef;
use openssl::nid::Nid;
use openssl::stack::StackRef;
use openssl::x509::{GeneralName, X509NameRef, X509Ref, X509ReqRef};
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::extensions::{GeneralName as ParsedGeneralName, ParsedExtension};
use x509_parser::prelude::FromDer;

use crate::configs::Claim;
use crate::error::{PkiError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub common_name: String,
    pub country: Option<Vec<String>>,
    pub province: Option<Vec<String>>,
    pub locality: Option<Vec<String>>,
    pub organization: Option<Vec<String>>,
    pub organizational_unit: Option<Vec<String>>,
    pub street_address: Option<Vec<String>>,
    pub postal_code: Option<Vec<String>>,
    pub email_address: Option<Vec<String>>,
    pub dns_name: Option<Vec<String>>,
    pub ip_address: Option<Vec<String>>,
}

#[derive(Default)]
struct AltNames {
    dns: Vec<String>,
    ip: Vec<String>,
    email: Vec<String>,
}

impl Identity {
    pub fn from_certificate(cert: &X509Ref) -> Result<Self> {
        let mut identity = Self::from_subject(cert.subject_name())?;
        let alt = cert
            .subject_alt_names()
            .map(|names| alt_names_from_stack(&names))
            .unwrap_or_default();
        identity.set_alt_names(alt);
        Ok(identity)
    }

    pub fn from_request(req: &X509ReqRef) -> Result<Self> {
        let mut identity = Self::from_subject(req.subject_name())?;
        identity.set_alt_names(requested_alt_names(req)?);
        Ok(identity)
    }

    /// Identity a certificate built from `claim` would carry.
    pub fn from_claim(claim: &Claim) -> Self {
        Self {
            common_name: claim.common_name.clone(),
            country: non_empty(&claim.country),
            province: non_empty(&claim.province),
            locality: non_empty(&claim.locality),
            organization: non_empty(&claim.organization),
            organizational_unit: non_empty(&claim.organizational_unit),
            street_address: non_empty(&claim.street_address),
            postal_code: non_empty(&claim.postal_code),
            email_address: non_empty(&claim.email_address),
            dns_name: non_empty(&claim.dns_name),
            ip_address: non_empty(&claim.ip_address),
        }
    }

    fn from_subject(name: &X509NameRef) -> Result<Self> {
        let common_name = entries(name, Nid::COMMONNAME)?
            .and_then(|values| values.into_iter().next())
            .unwrap_or_default();
        Ok(Self {
            common_name,
            country: entries(name, Nid::COUNTRYNAME)?,
            province: entries(name, Nid::STATEORPROVINCENAME)?,
            locality: entries(name, Nid::LOCALITYNAME)?,
            organization: entries(name, Nid::ORGANIZATIONNAME)?,
            organizational_unit: entries(name, Nid::ORGANIZATIONALUNITNAME)?,
            street_address: entries(name, Nid::STREETADDRESS)?,
            postal_code: entries(name, Nid::POSTALCODE)?,
            ..Self::default()
        })
    }

    fn set_alt_names(&mut self, alt: AltNames) {
        self.dns_name = non_empty(&alt.dns);
        self.ip_address = non_empty(&alt.ip);
        self.email_address = non_empty(&alt.email);
    }
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.to_vec())
    }
}

fn entries(name: &X509NameRef, nid: Nid) -> Result<Option<Vec<String>>> {
    let values = name
        .entries_by_nid(nid)
        .map(|entry| asn1_text(entry.data()))
        .collect::<Result<Vec<_>>>()?;
    Ok(if values.is_empty() { None } else { Some(values) })
}

/// Full contents of a name entry. Interior NULs are kept so that values
/// which differ after one never compare equal.
pub(crate) fn asn1_text(data: &Asn1StringRef) -> Result<String> {
    String::from_utf8(data.as_slice().to_vec())
        .map_err(|e| PkiError::encoding(format!("name entry is not UTF-8: {}", e)))
}

fn alt_names_from_stack(names: &StackRef<GeneralName>) -> AltNames {
    let mut alt = AltNames::default();
    for name in names {
        if let Some(dns) = name.dnsname() {
            alt.dns.push(dns.to_string());
        } else if let Some(ip) = name.ipaddress().and_then(ip_to_string) {
            alt.ip.push(ip);
        } else if let Some(email) = name.email() {
            alt.email.push(email.to_string());
        }
    }
    alt
}

/// OpenSSL does not expose request extensions, so the SAN of a CSR is read
/// from its DER with x509-parser.
fn requested_alt_names(req: &X509ReqRef) -> Result<AltNames> {
    let der = req.to_der()?;
    let (_, csr) = X509CertificationRequest::from_der(&der)
        .map_err(|e| PkiError::encoding(format!("malformed certificate request: {}", e)))?;

    let mut alt = AltNames::default();
    let Some(extensions) = csr.requested_extensions() else {
        return Ok(alt);
    };
    for extension in extensions {
        if let ParsedExtension::SubjectAlternativeName(san) = extension {
            for name in &san.general_names {
                match name {
                    ParsedGeneralName::DNSName(dns) => alt.dns.push(dns.to_string()),
                    ParsedGeneralName::RFC822Name(email) => alt.email.push(email.to_string()),
                    ParsedGeneralName::IPAddress(bytes) => {
                        if let Some(ip) = ip_to_string(bytes) {
                            alt.ip.push(ip);
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    Ok(alt)
}

fn ip_to_string(bytes: &[u8]) -> Option<String> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(Ipv4Addr::from(octets).to_string())
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(Ipv6Addr::from(octets).to_string())
        }
        _ => None,
    }
}
