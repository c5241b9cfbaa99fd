use crate::error::CryptoError;
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

pub type KdfResult<T> = Result<T, CryptoError>;

/// HKDF-SHA256 (RFC 5869) helpers for key-encryption keys
pub struct Kdf;

impl Kdf {
    /// Derive a 32-byte AES-256 key
    ///
    /// `ikm` is the device secret, `salt` is unique per wrapped key and
    /// `info` binds the key to its owner (profile and user).
    ///
    /// ```
    /// use crypto::kdf::Kdf;
    ///
    /// let salt = Kdf::generate_salt(16);
    /// let kek = Kdf::derive_aes256_key(b"device secret", &salt, b"field:amina").unwrap();
    /// assert_eq!(kek.len(), 32);
    /// ```
    pub fn derive_aes256_key(
        ikm: &[u8],
        salt: &[u8],
        info: &[u8],
    ) -> KdfResult<Zeroizing<[u8; 32]>> {
        let mut key = Zeroizing::new([0u8; 32]);
        Hkdf::<Sha256>::new(Some(salt), ikm)
            .expand(info, key.as_mut_slice())
            .map_err(|_| CryptoError::KeyDerivationFailed("HKDF expand failed".to_string()))?;
        Ok(key)
    }

    /// Random bytes from the thread CSPRNG, used for salts and device secrets
    pub fn generate_salt(length: usize) -> Vec<u8> {
        let mut salt = vec![0u8; length];
        rand::thread_rng().fill_bytes(&mut salt);
        salt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let a = Kdf::derive_aes256_key(b"device", b"salt", b"field:amina").unwrap();
        let b = Kdf::derive_aes256_key(b"device", b"salt", b"field:amina").unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn test_owner_binding_changes_key() {
        let amina = Kdf::derive_aes256_key(b"device", b"salt", b"field:amina").unwrap();
        let musa = Kdf::derive_aes256_key(b"device", b"salt", b"field:musa").unwrap();
        let other_profile = Kdf::derive_aes256_key(b"device", b"salt", b"training:amina").unwrap();

        assert_ne!(*amina, *musa);
        assert_ne!(*amina, *other_profile);
    }

    #[test]
    fn test_salt_changes_key() {
        let k1 = Kdf::derive_aes256_key(b"device", &Kdf::generate_salt(16), b"field:amina").unwrap();
        let k2 = Kdf::derive_aes256_key(b"device", &Kdf::generate_salt(16), b"field:amina").unwrap();
        assert_ne!(*k1, *k2);
    }

    #[test]
    fn test_salts_are_random() {
        let s1 = Kdf::generate_salt(32);
        assert_eq!(s1.len(), 32);
        assert_ne!(s1, Kdf::generate_salt(32));
    }
}
