//! HMAC signing for acknowledgements and consensus proofs.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::SignalError;

type HmacSha256 = Hmac<Sha256>;

/// Pre-shared signing key.
///
/// The secret must be provisioned; there is no generated fallback, since a
/// process-local secret could never verify across coordinators.
#[derive(Clone)]
pub struct SignatureKey {
    secret: Vec<u8>,
}

impl SignatureKey {
    pub fn new(secret: &str) -> Result<Self, SignalError> {
        if secret.is_empty() {
            return Err(SignalError::MissingSecret);
        }
        Ok(Self {
            secret: secret.as_bytes().to_vec(),
        })
    }

    fn mac(&self, parts: &[&str]) -> HmacSha256 {
        // HMAC accepts keys of any length
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("hmac key of any length is valid");
        mac.update(parts.join(":").as_bytes());
        mac
    }

    /// Sign the colon-joined parts, returning a hex digest.
    pub fn sign(&self, parts: &[&str]) -> String {
        hex::encode(self.mac(parts).finalize().into_bytes())
    }

    /// Verify a hex signature over the colon-joined parts in constant time.
    pub fn verify(&self, parts: &[&str], signature: &str) -> bool {
        let Ok(raw) = hex::decode(signature) else {
            return false;
        };
        self.mac(parts).verify_slice(&raw).is_ok()
    }
}

impl std::fmt::Debug for SignatureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret
        f.debug_struct("SignatureKey").finish_non_exhaustive()
    }
}
