// src/wallet/file_key.rs
//! File-backed signing keys.
//!
//! A [`Keystore`] is the JSON file holding one key pair. The secret half is
//! stored either in the clear or sealed with a passphrase:
//! - key derivation: PBKDF2-HMAC-SHA256 over a random 16-byte salt
//! - cipher: AES-256-GCM with a random 96-bit nonce, the public key as AAD
//!
//! Uses the following cryptographic primitives:
//! - Ed25519 (via `ring`)
//! - ECDSA over secp256k1 with SHA-256 (via `k256`)

use crate::error::{TrustError, TrustResult};
use crate::models::key::{Key, KeyOrigin, KeyScheme};
use crate::utils::serialization::{base64_bytes, deserialize, serialize};
use crate::wallet::signer::Signer;
use k256::ecdsa::signature::Signer as _;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::num::NonZeroU32;
use std::path::Path;

/// PBKDF2 iteration count for newly sealed keystores.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Parameters needed to open a sealed keystore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sealing {
    pub iterations: u32,
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
}

/// On-disk representation of one key pair.
#[derive(Clone, Serialize, Deserialize)]
pub struct Keystore {
    pub name: String,
    pub scheme: KeyScheme,
    #[serde(with = "base64_bytes")]
    pub public: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealing: Option<Sealing>,
    /// PKCS#8 document (Ed25519) or 32-byte scalar (secp256k1); ciphertext
    /// plus tag when `sealing` is present.
    #[serde(with = "base64_bytes")]
    pub secret: Vec<u8>,
}

impl fmt::Debug for Keystore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keystore")
            .field("name", &self.name)
            .field("scheme", &self.scheme)
            .field("sealed", &self.sealing.is_some())
            .finish()
    }
}

impl Keystore {
    /// Generates a fresh key pair.
    ///
    /// # Arguments
    /// * `name` - Human-readable key name (e.g. "root1")
    /// * `scheme` - Signature scheme
    /// * `passphrase` - Seals the secret half when given
    pub fn generate(name: impl Into<String>, scheme: KeyScheme, passphrase: Option<&str>) -> TrustResult<Self> {
        let (public, secret) = match scheme {
            KeyScheme::Ed25519 => {
                let rng = SystemRandom::new();
                let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
                    .map_err(|_| TrustError::KeyFormat("ed25519 key generation failed".to_string()))?;
                let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
                    .map_err(|e| TrustError::KeyFormat(format!("ed25519 key rejected: {}", e)))?;
                (pair.public_key().as_ref().to_vec(), pkcs8.as_ref().to_vec())
            }
            KeyScheme::EcdsaSecp256k1 => {
                let secret_key = k256::SecretKey::random(&mut rand::rngs::OsRng);
                let public = secret_key.public_key().to_encoded_point(true);
                (public.as_bytes().to_vec(), secret_key.to_bytes().to_vec())
            }
        };
        let mut keystore = Keystore {
            name: name.into(),
            scheme,
            public,
            sealing: None,
            secret,
        };
        if let Some(passphrase) = passphrase {
            keystore.seal(passphrase)?;
        }
        Ok(keystore)
    }

    /// Public key record for this keystore.
    pub fn public_key(&self) -> TrustResult<Key> {
        Key::new(self.scheme, self.public.clone(), KeyOrigin::File)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealing.is_some()
    }

    /// Encrypts the secret half in place with `passphrase`.
    pub fn seal(&mut self, passphrase: &str) -> TrustResult<()> {
        if self.is_sealed() {
            return Err(TrustError::KeyFormat(format!("keystore {} is already sealed", self.name)));
        }
        let rng = SystemRandom::new();
        let mut salt = vec![0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill(&mut salt)
            .and_then(|_| rng.fill(&mut nonce))
            .map_err(|_| TrustError::KeyFormat("system randomness unavailable".to_string()))?;

        let key = sealing_key(passphrase, &salt, PBKDF2_ITERATIONS)?;
        let mut in_out = std::mem::take(&mut self.secret);
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce),
            Aad::from(self.public.as_slice()),
            &mut in_out,
        )
        .map_err(|_| TrustError::KeyFormat("sealing failed".to_string()))?;

        self.secret = in_out;
        self.sealing = Some(Sealing {
            iterations: PBKDF2_ITERATIONS,
            salt,
            nonce: nonce.to_vec(),
        });
        Ok(())
    }

    /// Recovers the secret key.
    ///
    /// # Errors
    /// `DecryptionFailed` if the keystore is sealed and `passphrase` is
    /// missing or wrong.
    pub fn unlock(&self, passphrase: Option<&str>) -> TrustResult<SecretKey> {
        let plain = match &self.sealing {
            None => self.secret.clone(),
            Some(sealing) => {
                let passphrase = passphrase.ok_or_else(|| {
                    TrustError::DecryptionFailed(format!("keystore {} requires a passphrase", self.name))
                })?;
                let nonce: [u8; NONCE_LEN] = sealing.nonce.as_slice().try_into().map_err(|_| {
                    TrustError::DecryptionFailed(format!("keystore {} has a malformed nonce", self.name))
                })?;
                let key = sealing_key(passphrase, &sealing.salt, sealing.iterations)?;
                let mut buffer = self.secret.clone();
                let plain = key
                    .open_in_place(
                        Nonce::assume_unique_for_key(nonce),
                        Aad::from(self.public.as_slice()),
                        &mut buffer,
                    )
                    .map_err(|_| {
                        TrustError::DecryptionFailed(format!(
                            "wrong passphrase for keystore {}",
                            self.name
                        ))
                    })?;
                plain.to_vec()
            }
        };
        SecretKey::from_bytes(self.scheme, &plain)
    }

    /// Reads a keystore from a JSON file.
    pub fn load(path: &Path) -> TrustResult<Self> {
        let bytes = fs::read(path)?;
        Ok(deserialize(&bytes)?)
    }

    /// Writes the keystore as JSON, replacing any existing file.
    ///
    /// The file is written next to `path` and renamed into place, so readers
    /// see the old keystore or the new one. On unix it is readable by the
    /// owner only.
    pub fn save(&self, path: &Path) -> TrustResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("tmp");
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&temp_path)?;
        #[cfg(unix)]
        {
            // a leftover temp file keeps its old mode
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(&serialize(self)?)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}

fn sealing_key(passphrase: &str, salt: &[u8], iterations: u32) -> TrustResult<LessSafeKey> {
    let iterations = NonZeroU32::new(iterations)
        .ok_or_else(|| TrustError::KeyFormat("zero PBKDF2 iterations".to_string()))?;
    let mut derived = [0u8; 32];
    ring::pbkdf2::derive(
        ring::pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        passphrase.as_bytes(),
        &mut derived,
    );
    let unbound = UnboundKey::new(&AES_256_GCM, &derived)
        .map_err(|_| TrustError::KeyFormat("could not build sealing key".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Unlocked secret key material.
pub enum SecretKey {
    Ed25519(Ed25519KeyPair),
    EcdsaSecp256k1(k256::SecretKey),
}

impl SecretKey {
    fn from_bytes(scheme: KeyScheme, bytes: &[u8]) -> TrustResult<Self> {
        match scheme {
            KeyScheme::Ed25519 => Ed25519KeyPair::from_pkcs8(bytes)
                .map(SecretKey::Ed25519)
                .map_err(|e| TrustError::KeyFormat(format!("invalid ed25519 secret: {}", e))),
            KeyScheme::EcdsaSecp256k1 => k256::SecretKey::from_slice(bytes)
                .map(SecretKey::EcdsaSecp256k1)
                .map_err(|e| TrustError::KeyFormat(format!("invalid secp256k1 secret: {}", e))),
        }
    }

    /// Signs `payload`.
    ///
    /// Ed25519 signs the message directly; ECDSA hashes it with SHA-256 and
    /// produces a 64-byte compact (R || S) signature.
    pub fn sign(&self, payload: &[u8]) -> Vec<u8> {
        match self {
            SecretKey::Ed25519(pair) => pair.sign(payload).as_ref().to_vec(),
            SecretKey::EcdsaSecp256k1(secret) => {
                let signing_key = k256::ecdsa::SigningKey::from(secret);
                let signature: k256::ecdsa::Signature = signing_key.sign(payload);
                signature.to_vec()
            }
        }
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// A [`Signer`] backed by a keystore file.
///
/// The secret is unlocked for every signature and dropped right after, so a
/// sealed keystore never stays decrypted in memory between operations.
pub struct FileSigner {
    key: Key,
    keystore: Keystore,
    passphrase: Option<String>,
}

impl FileSigner {
    /// Wraps a keystore.
    ///
    /// # Errors
    /// `KeyFormat` if the stored public key is malformed.
    pub fn new(keystore: Keystore, passphrase: Option<String>) -> TrustResult<Self> {
        let key = keystore.public_key()?;
        Ok(FileSigner {
            key,
            keystore,
            passphrase,
        })
    }

    /// Generates an unsealed in-memory key. Handy for tests and one-off roles.
    pub fn generate(name: &str, scheme: KeyScheme) -> TrustResult<Self> {
        FileSigner::new(Keystore::generate(name, scheme, None)?, None)
    }

    pub fn keystore(&self) -> &Keystore {
        &self.keystore
    }
}

impl Signer for FileSigner {
    fn public_key(&self) -> &Key {
        &self.key
    }

    fn sign(&self, payload: &[u8]) -> TrustResult<Vec<u8>> {
        let secret = self.keystore.unlock(self.passphrase.as_deref())?;
        Ok(secret.sign(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ed25519_sign_and_verify() {
        let signer = FileSigner::generate("root1", KeyScheme::Ed25519).unwrap();
        let signature = signer.sign(b"DATA").unwrap();

        assert!(signer.public_key().verify(b"DATA", &signature));
        assert!(!signer.public_key().verify(b"NOT DATA", &signature));
    }

    #[test]
    fn test_ecdsa_sign_and_verify() {
        let signer = FileSigner::generate("targets1", KeyScheme::EcdsaSecp256k1).unwrap();
        let signature = signer.sign(b"DATA").unwrap();

        assert_eq!(signature.len(), 64);
        assert!(signer.public_key().verify(b"DATA", &signature));
        assert!(!signer.public_key().verify(b"NOT DATA", &signature));
    }

    #[test]
    fn test_sealed_keystore_needs_right_passphrase() {
        let keystore = Keystore::generate("snapshot", KeyScheme::Ed25519, Some("correct horse")).unwrap();
        assert!(keystore.is_sealed());

        let missing = FileSigner::new(keystore.clone(), None).unwrap();
        assert!(matches!(missing.sign(b"x"), Err(TrustError::DecryptionFailed(_))));

        let wrong = FileSigner::new(keystore.clone(), Some("battery staple".into())).unwrap();
        assert!(matches!(wrong.sign(b"x"), Err(TrustError::DecryptionFailed(_))));

        let right = FileSigner::new(keystore, Some("correct horse".into())).unwrap();
        let signature = right.sign(b"x").unwrap();
        assert!(right.public_key().verify(b"x", &signature));
    }

    #[test]
    fn test_keystore_file_keeps_key_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keystore").join("root1.json");
        let keystore = Keystore::generate("root1", KeyScheme::EcdsaSecp256k1, Some("pin")).unwrap();
        keystore.save(&path).unwrap();

        let loaded = Keystore::load(&path).unwrap();
        assert_eq!(loaded.public_key().unwrap().key_id, keystore.public_key().unwrap().key_id);
        assert!(loaded.unlock(Some("pin")).is_ok());
    }

    #[test]
    fn test_keystore_save_replaces_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("root1.json");
        let first = Keystore::generate("root1", KeyScheme::Ed25519, Some("pin")).unwrap();
        first.save(&path).unwrap();
        let second = Keystore::generate("root1", KeyScheme::Ed25519, Some("pin")).unwrap();
        second.save(&path).unwrap();

        let loaded = Keystore::load(&path).unwrap();
        assert_eq!(loaded.public_key().unwrap().key_id, second.public_key().unwrap().key_id);
        assert!(!path.with_extension("tmp").exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
