// src/wallet/hardware_key.rs
//! Hardware-token backed keys.
//!
//! The token itself is out of reach of this crate: it is modelled as a
//! [`SigningOracle`], an opaque capability that can report presence, export a
//! public key and sign. PIN entry and touch confirmation happen behind the
//! oracle; the oracle reports a refusal as `AuthenticationDenied`.
//!
//! Token signing blocks for as long as the token wants. The engine imposes no
//! timeout of its own; callers bound it with [`with_signing_deadline`].

use crate::error::{TrustError, TrustResult};
use crate::models::key::{Key, KeyId, KeyOrigin};
use crate::wallet::signer::Signer;
use log::debug;
use std::sync::Arc;
use std::time::Duration;

/// Capability interface of a smart-card/PIV token.
pub trait SigningOracle: Send + Sync {
    /// Whether the token holding `key_id` is connected.
    fn is_present(&self, key_id: &KeyId) -> bool;

    /// Exports the public half of `key_id`.
    fn public_key(&self, key_id: &KeyId) -> TrustResult<Key>;

    /// Signs `data` with `key_id`. May block on PIN or touch.
    fn sign(&self, key_id: &KeyId, data: &[u8]) -> TrustResult<Vec<u8>>;
}

/// A [`Signer`] that delegates to a hardware token.
pub struct TokenSigner {
    key: Key,
    oracle: Arc<dyn SigningOracle>,
}

impl TokenSigner {
    /// Connects to `key_id` on the token behind `oracle`.
    ///
    /// # Errors
    /// - `HardwareNotPresent` if the token is not connected
    /// - `KeyFormat` if the exported key does not hash to `key_id`
    pub fn connect(oracle: Arc<dyn SigningOracle>, key_id: &KeyId) -> TrustResult<Self> {
        if !oracle.is_present(key_id) {
            return Err(TrustError::HardwareNotPresent(key_id.clone()));
        }
        let exported = oracle.public_key(key_id)?;
        let key = Key::new(exported.scheme, exported.public_key, KeyOrigin::HardwareToken)?;
        if &key.key_id != key_id {
            return Err(TrustError::KeyFormat(format!(
                "token exported key {} when asked for {}",
                key.key_id, key_id
            )));
        }
        Ok(TokenSigner { key, oracle })
    }
}

impl Signer for TokenSigner {
    fn public_key(&self) -> &Key {
        &self.key
    }

    fn sign(&self, payload: &[u8]) -> TrustResult<Vec<u8>> {
        let key_id = &self.key.key_id;
        if !self.oracle.is_present(key_id) {
            return Err(TrustError::HardwareNotPresent(key_id.clone()));
        }
        debug!("requesting token signature from key {}", key_id.short());
        let signature = self.oracle.sign(key_id, payload)?;
        // A token that returns garbage is treated like a refused signature.
        if !self.key.verify(payload, &signature) {
            return Err(TrustError::AuthenticationDenied(key_id.clone()));
        }
        Ok(signature)
    }

    fn is_present(&self) -> bool {
        self.oracle.is_present(&self.key.key_id)
    }
}

/// Runs a blocking signing operation on the blocking pool with a deadline.
///
/// # Arguments
/// * `timeout` - Upper bound on the whole operation
/// * `operation` - Work that may block on a hardware token
///
/// # Returns
/// The operation's own result, or `KeyUnavailable` when the deadline passes
/// or the blocking task is cancelled.
pub async fn with_signing_deadline<T, F>(timeout: Duration, operation: F) -> TrustResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> TrustResult<T> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(operation);
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(TrustError::KeyUnavailable(format!(
            "signing task cancelled: {}",
            join_err
        ))),
        Err(_) => Err(TrustError::KeyUnavailable(format!(
            "signing did not complete within {}s",
            timeout.as_secs()
        ))),
    }
}
