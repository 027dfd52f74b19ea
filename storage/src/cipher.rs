use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use thiserror::Error;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const DEK_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CipherError {
    /// Authentication failed: wrong key, flipped ciphertext/nonce bytes, or a
    /// mutated associated-data field. The payload must be treated as lost.
    #[error("integrity failure: ciphertext does not authenticate under the given key and aad")]
    IntegrityFailure,
    #[error("encryption failed")]
    EncryptionFailed,
}

/// Stateless authenticated encryption of chunk payloads.
///
/// Every call draws a fresh 96-bit random nonce; the associated data binds
/// the ciphertext to its `org|document|index` coordinates so a row cannot be
/// replayed under another tenant or document.
pub struct ContentCipher;

impl ContentCipher {
    pub fn seal(
        plaintext: &[u8],
        dek: &[u8; DEK_LEN],
        aad: &str,
    ) -> Result<(Vec<u8>, [u8; NONCE_LEN]), CipherError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(dek));
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| CipherError::EncryptionFailed)?;

        Ok((ciphertext, nonce.into()))
    }

    pub fn open(
        ciphertext: &[u8],
        nonce: &[u8; NONCE_LEN],
        aad: &str,
        dek: &[u8; DEK_LEN],
    ) -> Result<Vec<u8>, CipherError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(dek));
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| CipherError::IntegrityFailure)
    }
}
