//! Signature Verifier (spec component A).
//!
//! Reads a candidate binary and its detached signature, then checks the
//! signature against the embedded RSA public key using RSASSA-PKCS1-v1_5
//! over SHA-256. The matching private key never ships in this binary — it
//! lives only in `src/bin/sign-artifact.rs`, a separate test-only tool.

use std::path::Path;
use std::sync::OnceLock;

use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Trust root, compiled in. There is no runtime key rotation.
const EMBEDDED_PUBLIC_KEY_PEM: &str = "-----BEGIN RSA PUBLIC KEY-----
MIIBCgKCAQEAtMwxlnlDVt4Mw0wt7+T+hCKkgXQwm2pLmX4wRJZMiiin7A7dc5a2
tHpSZWLRXU64U1QFIB8EN5i/uP856T1SGyKUAetAfxb2ZmuxgyOFoB6ltq0sgyGD
Oo/1yB0nCOGWg7BpkgDkYdhVwlGUpI+ayjFJcs7tiJ8L+jhth/bWRSO11QJECE7a
KeFsragF8OB0rTr5bSDZ11GUeBdvNMMLB3HjvCq/1u2kHrXPYGHfISIyu3PDA62P
F82Nlxkq82Zh6zrb+sm+his9IsOpN3tAcBPFgQEh2vYIQjm6NyvurVEPy0iO2RzP
HgBmGChiy6JWXbAl7YBwB8IzqBa83BSRXwIDAQAB
-----END RSA PUBLIC KEY-----
";

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("failed to read binary: {0}")]
    ReadBinary(std::io::Error),
    #[error("failed to read signature: {0}")]
    ReadSignature(std::io::Error),
    #[error("embedded public key is malformed: {0}")]
    BadPublicKey(rsa::pkcs1::Error),
    #[error("signature does not match embedded public key")]
    SignatureMismatch,
}

fn parse_public_key(pem: &str) -> Result<RsaPublicKey, VerifyError> {
    RsaPublicKey::from_pkcs1_pem(pem).map_err(VerifyError::BadPublicKey)
}

/// Parsed once and reused — artifacts are small but `install()` may run
/// this path more than once over a process lifetime.
fn embedded_key() -> &'static RsaPublicKey {
    static KEY: OnceLock<RsaPublicKey> = OnceLock::new();
    KEY.get_or_init(|| {
        parse_public_key(EMBEDDED_PUBLIC_KEY_PEM)
            .expect("embedded public key constant must be valid PKCS#1 PEM")
    })
}

/// Verify `signature_path` is a valid RSASSA-PKCS1-v1_5/SHA-256 signature by
/// the embedded key's counterpart private key over `binary_path`'s bytes.
pub fn verify(binary_path: &Path, signature_path: &Path) -> Result<(), VerifyError> {
    let binary = std::fs::read(binary_path).map_err(VerifyError::ReadBinary)?;
    let signature = std::fs::read(signature_path).map_err(VerifyError::ReadSignature)?;
    verify_bytes(&binary, &signature, embedded_key())
}

fn verify_bytes(binary: &[u8], signature: &[u8], key: &RsaPublicKey) -> Result<(), VerifyError> {
    let digest = Sha256::digest(binary);
    key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        .map_err(|_| VerifyError::SignatureMismatch)
}
