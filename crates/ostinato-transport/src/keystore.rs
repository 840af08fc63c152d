//! Ring credential keystore.
//!
//! Every node in a ring presents the same TLS certificate; the triple
//! `cert.pem` / `key.sealed` / `password` is the ring's shared secret,
//! copied to each host out of band. The private key never touches disk in
//! the clear: it is sealed with ChaCha20-Poly1305 under an Argon2id key
//! derived from the password file.
//!
//! Sealed layout: `[salt: 16][nonce: 12][ciphertext + tag]`.

use std::io::BufReader;
use std::path::Path;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tracing::info;

use crate::{Result, TransportError};

/// Salt length prefixed to the sealed key.
pub const SALT_LEN: usize = 16;

/// ChaCha20-Poly1305 nonce length.
pub const NONCE_LEN: usize = 12;

/// Argon2id memory cost in KiB (64 MiB).
const ARGON_M_COST: u32 = 65536;
/// Argon2id iteration count.
const ARGON_T_COST: u32 = 3;
/// Argon2id parallelism.
const ARGON_P_COST: u32 = 1;

/// Certificate file name inside the credentials directory.
pub const CERT_FILE: &str = "cert.pem";
/// Sealed private key file name.
pub const KEY_FILE: &str = "key.sealed";
/// Password file name.
pub const PASSWORD_FILE: &str = "password";

/// DNS name baked into the shared certificate. Clients present it as SNI;
/// it is never verified against the peer host.
pub const TLS_SERVER_NAME: &str = "ostinato-ring";

/// Derive the sealing key from the ring password.
fn derive_key(password: &[u8], salt: &[u8]) -> Result<[u8; 32]> {
    let params = argon2::Params::new(ARGON_M_COST, ARGON_T_COST, ARGON_P_COST, Some(32))
        .map_err(|e| TransportError::Keystore(format!("argon2 params: {e}")))?;
    let argon2 = argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut output = [0u8; 32];
    argon2
        .hash_password_into(password, salt, &mut output)
        .map_err(|e| TransportError::Keystore(format!("argon2 derivation: {e}")))?;
    Ok(output)
}

/// Seal a PKCS#8 DER private key under the ring password.
pub fn seal_key(password: &[u8], key_der: &[u8]) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut salt);
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce);

    let key = derive_key(password, &salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), key_der)
        .map_err(|_| TransportError::Keystore("sealing failed".to_string()))?;

    let mut sealed = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&salt);
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Unseal a private key previously produced by [`seal_key`].
///
/// # Errors
///
/// Returns [`TransportError::Keystore`] when the blob is truncated or the
/// password does not match (the AEAD tag fails).
pub fn unseal_key(password: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() <= SALT_LEN + NONCE_LEN {
        return Err(TransportError::Keystore(
            "sealed key is truncated".to_string(),
        ));
    }
    let (salt, rest) = sealed.split_at(SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let key = derive_key(password, salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| TransportError::Keystore("wrong password or corrupted key".to_string()))
}

/// The in-memory ring credentials: certificate chain plus private key.
pub struct RingCredentials {
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl RingCredentials {
    /// Load the credential triple from `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Keystore`] when any of the three files is
    /// missing or unusable.
    pub fn load(dir: &Path) -> Result<Self> {
        let cert_pem = std::fs::File::open(dir.join(CERT_FILE))
            .map_err(|e| TransportError::Keystore(format!("open {CERT_FILE}: {e}")))?;
        let certs: Vec<CertificateDer<'static>> =
            rustls_pemfile::certs(&mut BufReader::new(cert_pem))
                .collect::<std::io::Result<_>>()
                .map_err(|e| TransportError::Keystore(format!("parse {CERT_FILE}: {e}")))?;
        if certs.is_empty() {
            return Err(TransportError::Keystore(format!(
                "{CERT_FILE} holds no certificate"
            )));
        }

        let password = std::fs::read_to_string(dir.join(PASSWORD_FILE))
            .map_err(|e| TransportError::Keystore(format!("read {PASSWORD_FILE}: {e}")))?;
        let sealed = std::fs::read(dir.join(KEY_FILE))
            .map_err(|e| TransportError::Keystore(format!("read {KEY_FILE}: {e}")))?;
        let key_der = unseal_key(password.trim().as_bytes(), &sealed)?;

        Ok(Self {
            certs,
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der)),
        })
    }

    /// Generate a fresh credential triple in `dir` and return it.
    ///
    /// Used by the first node of a new ring; operators copy the directory
    /// to every other host.
    pub fn generate(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| TransportError::Keystore(format!("create {}: {e}", dir.display())))?;

        let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ED25519)
            .map_err(|e| TransportError::Keystore(format!("key generation failed: {e}")))?;
        let params = rcgen::CertificateParams::new(vec![TLS_SERVER_NAME.to_string()])
            .map_err(|e| TransportError::Keystore(format!("cert params failed: {e}")))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| TransportError::Keystore(format!("self-signed cert failed: {e}")))?;

        let mut password_bytes = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut password_bytes);
        let password = hex::encode(password_bytes);

        let key_der = key_pair.serialize_der();
        let sealed = seal_key(password.as_bytes(), &key_der)?;

        std::fs::write(dir.join(CERT_FILE), cert.pem())
            .map_err(|e| TransportError::Keystore(format!("write {CERT_FILE}: {e}")))?;
        std::fs::write(dir.join(KEY_FILE), &sealed)
            .map_err(|e| TransportError::Keystore(format!("write {KEY_FILE}: {e}")))?;
        std::fs::write(dir.join(PASSWORD_FILE), &password)
            .map_err(|e| TransportError::Keystore(format!("write {PASSWORD_FILE}: {e}")))?;

        info!(dir = %dir.display(), "generated ring credentials");

        Ok(Self {
            certs: vec![CertificateDer::from(cert.der().to_vec())],
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der)),
        })
    }

    /// Load the triple if present, otherwise generate it.
    pub fn load_or_generate(dir: &Path) -> Result<Self> {
        if dir.join(CERT_FILE).exists() {
            Self::load(dir)
        } else {
            Self::generate(dir)
        }
    }

    /// The certificate chain.
    pub fn certs(&self) -> &[CertificateDer<'static>] {
        &self.certs
    }

    /// A clone of the private key.
    pub fn key(&self) -> PrivateKeyDer<'static> {
        self.key.clone_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_unseal_roundtrip() {
        let der = b"not really a key, but sealed all the same";
        let sealed = seal_key(b"hunter2", der).expect("seal");
        assert!(sealed.len() > SALT_LEN + NONCE_LEN + der.len());
        let opened = unseal_key(b"hunter2", &sealed).expect("unseal");
        assert_eq!(opened, der);
    }

    #[test]
    fn test_wrong_password_rejected() {
        let sealed = seal_key(b"correct", b"material").expect("seal");
        assert!(unseal_key(b"incorrect", &sealed).is_err());
    }

    #[test]
    fn test_truncated_blob_rejected() {
        assert!(unseal_key(b"pw", &[0u8; 10]).is_err());
    }

    #[test]
    fn test_generate_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let generated = RingCredentials::generate(dir.path()).expect("generate");
        assert_eq!(generated.certs().len(), 1);

        let loaded = RingCredentials::load(dir.path()).expect("load");
        assert_eq!(loaded.certs(), generated.certs());
    }

    #[test]
    fn test_load_missing_dir_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope");
        assert!(RingCredentials::load(&missing).is_err());
    }
}
