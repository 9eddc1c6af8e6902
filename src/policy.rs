//! Trust Policy Engine
//!
//! Compiles a [`Policy`] into a [`TrustFunction`] that decides whether a CA
//! may sign a given certificate request.
//!
//! Field names in a policy are matched case-insensitively, ignoring `_` and
//! `-`, and multi-valued fields also accept a plural `s`/`es` suffix (`ies`
//! for names ending in `y`), so `"Country"`, `"COUNTRY"`, `"countries"` and
//! `"country_es"` all name the same field. Names that resolve to no field are
//! ignored.

use openssl::x509::{X509Ref, X509ReqRef};

use crate::configs::Policy;
use crate::identity::Identity;

/// Subject and SAN fields a policy can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    CommonName,
    Country,
    Province,
    Locality,
    Organization,
    OrganizationalUnit,
    DnsName,
    IpAddress,
    EmailAddress,
    StreetAddress,
    PostalCode,
}

/// Normalized spelling of each field.
const FIELD_NAMES: [(&str, CanonicalField); 11] = [
    ("commonname", CanonicalField::CommonName),
    ("country", CanonicalField::Country),
    ("province", CanonicalField::Province),
    ("locality", CanonicalField::Locality),
    ("organization", CanonicalField::Organization),
    ("organizationalunit", CanonicalField::OrganizationalUnit),
    ("dnsname", CanonicalField::DnsName),
    ("ipaddress", CanonicalField::IpAddress),
    ("emailaddress", CanonicalField::EmailAddress),
    ("streetaddress", CanonicalField::StreetAddress),
    ("postalcode", CanonicalField::PostalCode),
];

/// Value of one field of an [`Identity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Single(&'a str),
    Multi(Option<&'a [String]>),
}

impl FieldValue<'_> {
    fn is_supplied(&self) -> bool {
        match self {
            FieldValue::Single(value) => !value.is_empty(),
            FieldValue::Multi(values) => values.is_some_and(|values| !values.is_empty()),
        }
    }
}

/// `countrys`, `countryes` and `countries` are all plurals of `country`.
fn is_plural_of(normalized: &str, base: &str) -> bool {
    if let Some(suffix) = normalized.strip_prefix(base) {
        return matches!(suffix, "s" | "es");
    }
    base.strip_suffix('y')
        .and_then(|stem| normalized.strip_prefix(stem))
        == Some("ies")
}

fn multi(values: &Option<Vec<String>>) -> FieldValue<'_> {
    FieldValue::Multi(values.as_deref())
}

impl CanonicalField {
    pub fn is_multi_valued(self) -> bool {
        self != CanonicalField::CommonName
    }

    /// Resolve a policy field name, `None` if it names no known field.
    pub fn resolve(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        FIELD_NAMES.iter().find_map(|(base, field)| {
            let matches = normalized == *base
                || (field.is_multi_valued() && is_plural_of(&normalized, base));
            matches.then_some(*field)
        })
    }

    pub fn value(self, identity: &Identity) -> FieldValue<'_> {
        match self {
            CanonicalField::CommonName => FieldValue::Single(&identity.common_name),
            CanonicalField::Country => multi(&identity.country),
            CanonicalField::Province => multi(&identity.province),
            CanonicalField::Locality => multi(&identity.locality),
            CanonicalField::Organization => multi(&identity.organization),
            CanonicalField::OrganizationalUnit => multi(&identity.organizational_unit),
            CanonicalField::DnsName => multi(&identity.dns_name),
            CanonicalField::IpAddress => multi(&identity.ip_address),
            CanonicalField::EmailAddress => multi(&identity.email_address),
            CanonicalField::StreetAddress => multi(&identity.street_address),
            CanonicalField::PostalCode => multi(&identity.postal_code),
        }
    }
}

/// A compiled [`Policy`]: field names already resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledPolicy {
    match_fields: Vec<CanonicalField>,
    supplied: Vec<CanonicalField>,
}

impl CompiledPolicy {
    pub fn compile(policy: &Policy) -> Self {
        let resolve_all = |names: &[String]| -> Vec<CanonicalField> {
            names
                .iter()
                .filter_map(|name| CanonicalField::resolve(name))
                .collect()
        };
        Self {
            match_fields: resolve_all(&policy.match_fields),
            supplied: resolve_all(&policy.supplied),
        }
    }

    /// Evaluate the policy. Either side missing means untrusted.
    pub fn evaluate(&self, ca: Option<&Identity>, csr: Option<&Identity>) -> bool {
        let (Some(ca), Some(csr)) = (ca, csr) else {
            return false;
        };
        self.first_violation(ca, csr).is_none()
    }

    /// The first rule `csr` breaks, for reporting.
    pub fn first_violation(&self, ca: &Identity, csr: &Identity) -> Option<String> {
        for field in &self.match_fields {
            if field.value(ca) != field.value(csr) {
                return Some(format!("{:?} does not match the CA", field));
            }
        }
        for field in &self.supplied {
            if !field.value(csr).is_supplied() {
                return Some(format!("{:?} must be supplied", field));
            }
        }
        None
    }
}

/// Predicate deciding whether a CA certificate may sign a request.
pub type TrustFunction = Box<dyn Fn(Option<&X509Ref>, Option<&X509ReqRef>) -> bool>;

/// Compile `policy` into a [`TrustFunction`].
///
/// Certificates or requests whose subject cannot be decoded are untrusted.
pub fn policy_trust_func(policy: &Policy) -> TrustFunction {
    let compiled = CompiledPolicy::compile(policy);
    Box::new(move |ca: Option<&X509Ref>, csr: Option<&X509ReqRef>| {
        let ca = ca.and_then(|cert| Identity::from_certificate(cert).ok());
        let csr = csr.and_then(|req| Identity::from_request(req).ok());
        compiled.evaluate(ca.as_ref(), csr.as_ref())
    })
}
