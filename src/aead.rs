//! ChaCha20-Poly1305 wrappers.
//!
//! Thin seal/open helpers over the RustCrypto implementation. Every tag
//! failure collapses into [`CovertError::AuthFail`]; callers that probe
//! candidate keys swallow that error internally and only surface it once
//! all candidates are exhausted.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::ChaCha20Poly1305;

use crate::errors::CovertError;
use crate::util::NONCE_SIZE;

/// Poly1305 tag size appended to every sealed message.
pub const TAG_SIZE: usize = 16;

/// Encrypt and authenticate, returning `ciphertext || tag16`.
pub(crate) fn seal(key: &[u8; 32], nonce: &[u8; NONCE_SIZE], aad: &[u8], plaintext: &[u8]) -> Vec<u8> {
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(nonce.into(), Payload { msg: plaintext, aad })
        .expect("ChaCha20Poly1305 encryption should never fail")
}

/// Open `ciphertext || tag16`, verifying the tag over ciphertext and AAD.
pub(crate) fn open(
    key: &[u8; 32],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CovertError> {
    if ciphertext.len() < TAG_SIZE {
        return Err(CovertError::AuthFail);
    }
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(nonce.into(), Payload { msg: ciphertext, aad })
        .map_err(|_| CovertError::AuthFail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_aad() {
        let key = [7u8; 32];
        let nonce = [1u8; 12];
        let ct = seal(&key, &nonce, b"aad", b"hello");
        assert_eq!(ct.len(), 5 + TAG_SIZE);
        assert_eq!(open(&key, &nonce, b"aad", &ct).unwrap(), b"hello");
    }

    #[test]
    fn wrong_aad_fails() {
        let key = [7u8; 32];
        let nonce = [1u8; 12];
        let ct = seal(&key, &nonce, b"aad", b"hello");
        assert!(matches!(
            open(&key, &nonce, b"other", &ct),
            Err(CovertError::AuthFail)
        ));
    }

    #[test]
    fn bit_flip_fails() {
        let key = [7u8; 32];
        let nonce = [1u8; 12];
        let mut ct = seal(&key, &nonce, b"", b"hello");
        for i in 0..ct.len() {
            ct[i] ^= 1;
            assert!(open(&key, &nonce, b"", &ct).is_err(), "flip at {i} accepted");
            ct[i] ^= 1;
        }
    }

    #[test]
    fn short_input_fails() {
        let key = [0u8; 32];
        let nonce = [0u8; 12];
        assert!(open(&key, &nonce, b"", &[0u8; 15]).is_err());
    }

    #[test]
    fn empty_plaintext_is_just_a_tag() {
        let key = [9u8; 32];
        let nonce = [3u8; 12];
        let ct = seal(&key, &nonce, b"", b"");
        assert_eq!(ct.len(), TAG_SIZE);
        assert_eq!(open(&key, &nonce, b"", &ct).unwrap(), b"");
    }
}
