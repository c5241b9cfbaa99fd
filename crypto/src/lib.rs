//! Cryptographic primitives for the ReliefWatch engine
//!
//! This crate provides the small set of primitives the offline store needs:
//! - Authenticated symmetric encryption (AES-256-GCM) with a fresh random
//!   nonce per message, prepended to the ciphertext
//! - HKDF-SHA256 key derivation for key-encryption keys
//! - Key wrapping so data keys are only ever persisted encrypted
//!
//! # Security Features
//!
//! - Key material is zeroized on drop
//! - Tampered or foreign ciphertexts fail authentication instead of
//!   producing garbage plaintext
//!
//! # Example
//!
//! ```rust
//! use crypto::{Aes256GcmEncryptor, KeyWrapper};
//!
//! let kek = Aes256GcmEncryptor::generate_key();
//! let wrapper = KeyWrapper::new(kek).unwrap();
//!
//! let data_key = Aes256GcmEncryptor::generate_key();
//! let wrapped = wrapper.wrap(&data_key).unwrap();
//! let unwrapped = wrapper.unwrap_key(&wrapped).unwrap();
//! assert_eq!(*unwrapped, data_key);
//! ```

pub mod aes_gcm;
pub mod error;
pub mod kdf;
pub mod key_wrap;

pub use aes_gcm::{Aes256GcmEncryptor, NONCE_LEN};
pub use error::{CryptoError, CryptoResult};
pub use kdf::Kdf;
pub use key_wrap::KeyWrapper;
