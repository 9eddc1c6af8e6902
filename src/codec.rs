//! Key and Certificate Codec
//!
//! RSA key generation, subject key identifiers, and PEM encoding/decoding for
//! private keys, certificates, certificate requests and chain files.
//!
//! # Private key format
//! Keys are written as PKCS#1 `RSA PRIVATE KEY` blocks. When a password is
//! set the block uses legacy PEM encryption (`Proc-Type: 4,ENCRYPTED`,
//! `DEK-Info: AES-256-CBC,...`), which derives the cipher key from the
//! password with a single MD5 round. `openssl rsa` reads these files as is.

use std::fs;
use std::path::Path;

use openssl::pkey::{HasPublic, PKey, PKeyRef, Private};
use openssl::rsa::Rsa;
use openssl::symm::Cipher;
use openssl::x509::{X509Req, X509};
use pem::{EncodeConfig, LineEnding, Pem};

use crate::error::{PkiError, Result};
use crate::workspace::{write_artifacts, Artifact};

pub const PEM_RSA_PRIVATE_KEY: &str = "RSA PRIVATE KEY";
pub const PEM_CERTIFICATE: &str = "CERTIFICATE";
pub const PEM_CERTIFICATE_REQUEST: &str = "CERTIFICATE REQUEST";

/// Smallest RSA modulus accepted by the OpenSSL backend.
const MIN_RSA_KEY_BITS: u32 = 512;

/// Generate an RSA key pair of `bits` bits.
///
/// The returned key carries both halves; use it wherever a public key is
/// needed as well.
pub fn generate_key_pair(bits: u32) -> Result<PKey<Private>> {
    if bits < MIN_RSA_KEY_BITS {
        return Err(PkiError::key_gen(format!(
            "invalid RSA key length {} (minimum {})",
            bits, MIN_RSA_KEY_BITS
        )));
    }
    let rsa = Rsa::generate(bits)
        .map_err(|e| PkiError::key_gen(format!("failed to generate RSA keypair: {}", e)))?;
    PKey::from_rsa(rsa)
        .map_err(|e| PkiError::key_gen(format!("failed to create private key: {}", e)))
}

/// SHA-1 of the PKCS#1 encoded RSA public key (RFC 5280 §4.2.1.2, method 1).
pub fn compute_subject_key_id<T: HasPublic>(key: &PKeyRef<T>) -> Result<Vec<u8>> {
    let rsa = key
        .rsa()
        .map_err(|e| PkiError::encoding(format!("public key is not RSA: {}", e)))?;
    let der = rsa.public_key_to_der_pkcs1()?;
    Ok(openssl::sha::sha1(&der).to_vec())
}

/// PEM encode a private key, encrypting it when `password` is non-empty.
pub fn encode_private_key(key: &PKeyRef<Private>, password: &str) -> Result<Vec<u8>> {
    let rsa = key
        .rsa()
        .map_err(|e| PkiError::encoding(format!("private key is not RSA: {}", e)))?;
    let pem = if password.is_empty() {
        rsa.private_key_to_pem()
    } else {
        rsa.private_key_to_pem_passphrase(Cipher::aes_256_cbc(), password.as_bytes())
    };
    pem.map_err(|e| PkiError::encoding(format!("failed to encode private key: {}", e)))
}

pub fn write_private_key(key: &PKeyRef<Private>, password: &str, path: &Path) -> Result<()> {
    let pem = encode_private_key(key, password)?;
    write_artifacts(&[Artifact::private(path.to_path_buf(), pem)])
}

/// Read a PEM private key, decrypting it with `password` if it is encrypted.
///
/// An encrypted key read with an empty password fails instead of prompting.
pub fn read_private_key(password: &str, path: &Path) -> Result<PKey<Private>> {
    let pem = fs::read(path).map_err(|e| {
        PkiError::ca_key_decrypt(format!("failed to read {}: {}", path.display(), e))
    })?;
    decode_private_key(password, &pem)
        .map_err(|e| PkiError::ca_key_decrypt(format!("{}: {}", path.display(), e)))
}

fn decode_private_key(
    password: &str,
    pem: &[u8],
) -> std::result::Result<PKey<Private>, openssl::error::ErrorStack> {
    let rsa = Rsa::private_key_from_pem_callback(pem, |buf| {
        let password = password.as_bytes();
        // Reporting zero length fails the read instead of truncating
        if password.len() > buf.len() {
            return Ok(0);
        }
        buf[..password.len()].copy_from_slice(password);
        Ok(password.len())
    })?;
    PKey::from_rsa(rsa)
}

/// PEM encode `der` under `block_type`, LF line endings.
pub fn encode_pem(block_type: &str, der: &[u8]) -> Vec<u8> {
    let config = EncodeConfig::new().set_line_ending(LineEnding::LF);
    pem::encode_config(&Pem::new(block_type, der.to_vec()), config).into_bytes()
}

pub fn write_pem_file(block_type: &str, der: &[u8], path: &Path) -> Result<()> {
    write_artifacts(&[Artifact::public(path.to_path_buf(), encode_pem(block_type, der))])
}

fn read_pem_blocks(path: &Path) -> Result<Vec<Pem>> {
    let data = fs::read(path)
        .map_err(|e| PkiError::encoding(format!("failed to read {}: {}", path.display(), e)))?;
    let blocks = pem::parse_many(&data)
        .map_err(|e| PkiError::encoding(format!("{}: {}", path.display(), e)))?;
    if blocks.is_empty() {
        return Err(PkiError::encoding(format!(
            "{}: no PEM data found",
            path.display()
        )));
    }
    Ok(blocks)
}

fn expect_tag<'a>(path: &Path, block: &'a Pem, tag: &str) -> Result<&'a [u8]> {
    if block.tag() != tag {
        return Err(PkiError::encoding(format!(
            "{}: expected PEM block '{}', found '{}'",
            path.display(),
            tag,
            block.tag()
        )));
    }
    Ok(block.contents())
}

/// Read the first certificate in a PEM file.
pub fn read_certificate(path: &Path) -> Result<X509> {
    let blocks = read_pem_blocks(path)?;
    let der = expect_tag(path, &blocks[0], PEM_CERTIFICATE)?;
    X509::from_der(der).map_err(|e| PkiError::encoding(format!("{}: {}", path.display(), e)))
}

pub fn read_certificate_request(path: &Path) -> Result<X509Req> {
    let blocks = read_pem_blocks(path)?;
    let der = expect_tag(path, &blocks[0], PEM_CERTIFICATE_REQUEST)?;
    X509Req::from_der(der).map_err(|e| PkiError::encoding(format!("{}: {}", path.display(), e)))
}

/// Read every certificate of a concatenated PEM file, in file order.
pub fn read_certificate_chain(path: &Path) -> Result<Vec<X509>> {
    read_pem_blocks(path)?
        .iter()
        .map(|block| {
            let der = expect_tag(path, block, PEM_CERTIFICATE)?;
            X509::from_der(der)
                .map_err(|e| PkiError::encoding(format!("{}: {}", path.display(), e)))
        })
        .collect()
}

/// Concatenated PEM of `certificates`, in order.
pub fn encode_certificate_chain<'a, I>(certificates: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a openssl::x509::X509Ref>,
{
    let mut out = Vec::new();
    for cert in certificates {
        out.extend(encode_pem(PEM_CERTIFICATE, &cert.to_der()?));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_generate_rejects_invalid_length() {
        assert_eq!(generate_key_pair(0).unwrap_err().kind(), ErrorKind::KeyGenFailure);
        assert_eq!(generate_key_pair(256).unwrap_err().kind(), ErrorKind::KeyGenFailure);
    }

    #[test]
    fn test_subject_key_id_is_stable() {
        let key = generate_key_pair(2048).unwrap();
        let first = compute_subject_key_id(&key).unwrap();
        let second = compute_subject_key_id(&key).unwrap();
        assert_eq!(first.len(), 20);
        assert_eq!(first, second);

        let other = generate_key_pair(2048).unwrap();
        assert_ne!(first, compute_subject_key_id(&other).unwrap());
    }

    #[test]
    fn test_encrypted_private_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ca.key");
        let key = generate_key_pair(2048).unwrap();
        write_private_key(&key, "s3cret", &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(&format!("-----BEGIN {}-----", PEM_RSA_PRIVATE_KEY)));
        assert!(text.contains("Proc-Type: 4,ENCRYPTED"));
        assert!(text.contains("DEK-Info: AES-256-CBC"));

        let loaded = read_private_key("s3cret", &path).unwrap();
        assert!(loaded.public_eq(&key));

        let wrong = read_private_key("guess", &path).unwrap_err();
        assert_eq!(wrong.kind(), ErrorKind::CaKeyDecryptFailure);
        let empty = read_private_key("", &path).unwrap_err();
        assert_eq!(empty.kind(), ErrorKind::CaKeyDecryptFailure);
    }

    #[test]
    fn test_plain_private_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("leaf.key");
        let key = generate_key_pair(2048).unwrap();
        write_private_key(&key, "", &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(&format!("-----BEGIN {}-----", PEM_RSA_PRIVATE_KEY)));
        assert!(!text.contains("ENCRYPTED"));
        assert!(read_private_key("", &path).unwrap().public_eq(&key));
    }

    #[test]
    fn test_malformed_key_is_decrypt_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.key");
        fs::write(&path, "not a key").unwrap();
        assert_eq!(
            read_private_key("", &path).unwrap_err().kind(),
            ErrorKind::CaKeyDecryptFailure
        );
        assert_eq!(
            read_private_key("", &dir.path().join("missing.key"))
                .unwrap_err()
                .kind(),
            ErrorKind::CaKeyDecryptFailure
        );
    }

    #[test]
    fn test_wrong_block_type_is_encoding_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.csr");
        write_pem_file(PEM_CERTIFICATE_REQUEST, b"\x30\x00", &path).unwrap();
        assert_eq!(
            read_certificate(&path).unwrap_err().kind(),
            ErrorKind::EncodingFailure
        );
        assert_eq!(
            read_certificate_chain(&dir.path().join("missing.pem"))
                .unwrap_err()
                .kind(),
            ErrorKind::EncodingFailure
        );
    }
}
