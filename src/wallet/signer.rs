// src/wallet/signer.rs
//! The signing capability shared by file-backed and token-backed keys.

use crate::error::TrustResult;
use crate::models::key::Key;

/// Something that can produce signatures for exactly one key.
///
/// Implementations are injected into a [`KeyRing`](super::key_management::KeyRing);
/// the ring never needs to know whether the private half lives in a file or
/// on a hardware token.
pub trait Signer: Send + Sync {
    /// Public half of the key this signer signs with.
    fn public_key(&self) -> &Key;

    /// Signs `payload`.
    ///
    /// # Errors
    /// Implementations report environment failures distinctly
    /// (`HardwareNotPresent`, `AuthenticationDenied`, `DecryptionFailed`) so
    /// callers can prompt and retry.
    fn sign(&self, payload: &[u8]) -> TrustResult<Vec<u8>>;

    /// Whether the signer can currently be used without user intervention
    /// beyond a PIN or passphrase.
    fn is_present(&self) -> bool {
        true
    }
}
