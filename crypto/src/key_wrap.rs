use crate::aes_gcm::Aes256GcmEncryptor;
use crate::error::{CryptoError, CryptoResult};
use zeroize::Zeroizing;

/// Wraps data keys under a key-encryption key (KEK)
///
/// Data keys are never persisted in the clear: the vault stores only the
/// output of [`KeyWrapper::wrap`] and unwraps it when a session opens.
/// A wrapped key uses the same `v{version}:{base64}` text format as record
/// ciphertexts, so a wrong KEK surfaces as [`CryptoError::DecryptionFailed`].
pub struct KeyWrapper {
    kek_encryptor: Aes256GcmEncryptor,
}

impl KeyWrapper {
    /// Create a wrapper around a 32-byte KEK
    pub fn new(kek: [u8; 32]) -> CryptoResult<Self> {
        let kek_encryptor = Aes256GcmEncryptor::new(kek)?;
        Ok(Self { kek_encryptor })
    }

    /// Create a wrapper from a KEK slice
    pub fn from_slice(kek: &[u8]) -> CryptoResult<Self> {
        let kek_encryptor = Aes256GcmEncryptor::from_slice(kek)?;
        Ok(Self { kek_encryptor })
    }

    /// Encrypt a data key under the KEK
    pub fn wrap(&self, data_key: &[u8; 32]) -> CryptoResult<String> {
        self.kek_encryptor.seal(data_key)
    }

    /// Decrypt a wrapped data key
    pub fn unwrap_key(&self, wrapped: &str) -> CryptoResult<Zeroizing<[u8; 32]>> {
        let raw = Zeroizing::new(self.kek_encryptor.open(wrapped)?);

        let key: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: 32,
                got: raw.len(),
            })?;

        Ok(Zeroizing::new(key))
    }

    /// Fingerprint of the KEK, for diagnostics
    pub fn kek_fingerprint(&self) -> String {
        self.kek_encryptor.fingerprint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::Kdf;

    #[test]
    fn test_wrap_unwrap() {
        let wrapper = KeyWrapper::new(Aes256GcmEncryptor::generate_key()).unwrap();
        let data_key = Aes256GcmEncryptor::generate_key();

        let wrapped = wrapper.wrap(&data_key).unwrap();
        assert!(wrapped.starts_with("v1:"));

        let unwrapped = wrapper.unwrap_key(&wrapped).unwrap();
        assert_eq!(*unwrapped, data_key);
    }

    #[test]
    fn test_unwrap_with_other_kek_fails() {
        let secret = b"device secret";
        let salt = Kdf::generate_salt(16);
        let alice_kek = Kdf::derive_aes256_key(secret, &salt, b"alice").unwrap();
        let bob_kek = Kdf::derive_aes256_key(secret, &salt, b"bob").unwrap();

        let alice = KeyWrapper::new(*alice_kek).unwrap();
        let bob = KeyWrapper::new(*bob_kek).unwrap();

        let wrapped = alice.wrap(&Aes256GcmEncryptor::generate_key()).unwrap();
        assert!(matches!(
            bob.unwrap_key(&wrapped),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_unwrap_rejects_short_payload() {
        let kek = Aes256GcmEncryptor::generate_key();
        let wrapper = KeyWrapper::new(kek).unwrap();

        // A valid ciphertext that does not hold a 32-byte key
        let not_a_key = Aes256GcmEncryptor::new(kek).unwrap().seal(b"short").unwrap();

        assert!(matches!(
            wrapper.unwrap_key(&not_a_key),
            Err(CryptoError::InvalidKeyLength { expected: 32, got: 5 })
        ));
    }
}
