use crate::error::{CryptoError, CryptoResult};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::ZeroizeOnDrop;

/// Length of the random GCM nonce prepended to every ciphertext
pub const NONCE_LEN: usize = 12;

/// Length of the GCM authentication tag appended by the cipher
const TAG_LEN: usize = 16;

/// AES-256-GCM encryptor with memory security
///
/// This implementation provides:
/// - AES-256 in Galois/Counter Mode
/// - 96-bit random nonces, prepended to the ciphertext so a blob is self-describing
/// - Authentication tags for integrity
/// - Memory zeroization on drop
#[derive(ZeroizeOnDrop)]
pub struct Aes256GcmEncryptor {
    #[zeroize(skip)]
    cipher: Aes256Gcm,
    /// Master key - automatically zeroized on drop
    key: [u8; 32],
    /// Key version for rotation support
    #[zeroize(skip)]
    key_version: u32,
}

impl Aes256GcmEncryptor {
    /// Create a new encryptor with a 32-byte key
    pub fn new(key: [u8; 32]) -> CryptoResult<Self> {
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::InvalidKey)?;

        Ok(Self {
            cipher,
            key,
            key_version: 1,
        })
    }

    /// Create from a key slice, rejecting anything that is not 32 bytes
    pub fn from_slice(key: &[u8]) -> CryptoResult<Self> {
        let key: [u8; 32] = key.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            got: key.len(),
        })?;
        Self::new(key)
    }

    /// Create with specific key version
    pub fn with_version(mut self, version: u32) -> Self {
        self.key_version = version;
        self
    }

    /// Generate a new random key (cryptographically secure)
    pub fn generate_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        key
    }

    /// Get the current key version
    pub fn version(&self) -> u32 {
        self.key_version
    }

    /// Short, non-reversible identifier of the key, safe to log
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.key);
        hex::encode(digest.get(..8).unwrap_or_default())
    }

    /// Encrypt to raw `nonce || ciphertext || tag`
    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Inverse of [`Self::encrypt`]
    pub fn decrypt(&self, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::InvalidFormat(format!(
                "ciphertext too short: {} bytes",
                ciphertext.len()
            )));
        }

        let (nonce_bytes, body) = ciphertext.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, body)
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// Encrypt into the text format `v{version}:{base64(nonce || ciphertext)}`
    pub fn seal(&self, plaintext: &[u8]) -> CryptoResult<String> {
        let sealed = self.encrypt(plaintext)?;
        Ok(format!("v{}:{}", self.key_version, BASE64.encode(sealed)))
    }

    /// Decrypt the text format produced by [`Self::seal`]
    pub fn open(&self, sealed: &str) -> CryptoResult<Vec<u8>> {
        let (version, body) = sealed
            .split_once(':')
            .ok_or_else(|| CryptoError::InvalidFormat("missing version prefix".to_string()))?;

        let version = version
            .strip_prefix('v')
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(|| CryptoError::InvalidFormat("malformed version prefix".to_string()))?;

        if version != self.key_version {
            return Err(CryptoError::UnsupportedKeyVersion {
                version,
                supported: self.key_version,
            });
        }

        let raw = BASE64
            .decode(body)
            .map_err(|e| CryptoError::InvalidFormat(format!("base64 decode error: {e}")))?;

        self.decrypt(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = Aes256GcmEncryptor::generate_key();
        let encryptor = Aes256GcmEncryptor::new(key).unwrap();

        let plaintext = b"affected households: 412";
        let ciphertext = encryptor.encrypt(plaintext).unwrap();
        let decrypted = encryptor.decrypt(&ciphertext).unwrap();

        assert_eq!(plaintext, decrypted.as_slice());
    }

    #[test]
    fn test_nonce_is_prepended() {
        let encryptor = Aes256GcmEncryptor::new(Aes256GcmEncryptor::generate_key()).unwrap();

        let ciphertext = encryptor.encrypt(b"abc").unwrap();
        assert_eq!(ciphertext.len(), NONCE_LEN + 3 + TAG_LEN);
    }

    #[test]
    fn test_seal_format() {
        let encryptor = Aes256GcmEncryptor::new(Aes256GcmEncryptor::generate_key())
            .unwrap()
            .with_version(5);

        let sealed = encryptor.seal(b"test data").unwrap();
        assert!(sealed.starts_with("v5:"));
        assert_eq!(encryptor.open(&sealed).unwrap(), b"test data");
    }

    #[test]
    fn test_different_nonces() {
        let encryptor = Aes256GcmEncryptor::new(Aes256GcmEncryptor::generate_key()).unwrap();

        let sealed1 = encryptor.seal(b"same plaintext").unwrap();
        let sealed2 = encryptor.seal(b"same plaintext").unwrap();

        assert_ne!(sealed1, sealed2);
        assert_eq!(encryptor.open(&sealed1).unwrap(), encryptor.open(&sealed2).unwrap());
    }

    #[test]
    fn test_tampered_ciphertext() {
        let encryptor = Aes256GcmEncryptor::new(Aes256GcmEncryptor::generate_key()).unwrap();

        let mut ciphertext = encryptor.encrypt(b"authenticated data").unwrap();
        if let Some(last) = ciphertext.last_mut() {
            *last ^= 0x01;
        }

        assert!(matches!(
            encryptor.decrypt(&ciphertext),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let alice = Aes256GcmEncryptor::new(Aes256GcmEncryptor::generate_key()).unwrap();
        let bob = Aes256GcmEncryptor::new(Aes256GcmEncryptor::generate_key()).unwrap();

        let sealed = alice.seal(b"for alice only").unwrap();
        assert!(matches!(bob.open(&sealed), Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn test_wrong_version() {
        let key = Aes256GcmEncryptor::generate_key();
        let v1 = Aes256GcmEncryptor::new(key).unwrap().with_version(1);
        let v2 = Aes256GcmEncryptor::new(key).unwrap().with_version(2);

        let sealed = v1.seal(b"version test").unwrap();
        assert!(matches!(
            v2.open(&sealed),
            Err(CryptoError::UnsupportedKeyVersion { version: 1, supported: 2 })
        ));
    }

    #[test]
    fn test_truncated_ciphertext() {
        let encryptor = Aes256GcmEncryptor::new(Aes256GcmEncryptor::generate_key()).unwrap();
        assert!(matches!(
            encryptor.decrypt(&[0u8; 8]),
            Err(CryptoError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_invalid_key_length() {
        let result = Aes256GcmEncryptor::from_slice(b"too_short");
        assert!(matches!(
            result,
            Err(CryptoError::InvalidKeyLength { expected: 32, got: 9 })
        ));
    }

    #[test]
    fn test_fingerprint_is_stable_per_key() {
        let key = Aes256GcmEncryptor::generate_key();
        let a = Aes256GcmEncryptor::new(key).unwrap();
        let b = Aes256GcmEncryptor::new(key).unwrap();
        let other = Aes256GcmEncryptor::new(Aes256GcmEncryptor::generate_key()).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), other.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
    }

    #[test]
    fn test_empty_plaintext() {
        let encryptor = Aes256GcmEncryptor::new(Aes256GcmEncryptor::generate_key()).unwrap();

        let sealed = encryptor.seal(b"").unwrap();
        assert!(encryptor.open(&sealed).unwrap().is_empty());
    }
}
