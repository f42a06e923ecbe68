//! Signature blocks.
//!
//! A signature block is exactly 80 bytes: a ChaCha20-Poly1305 sealing of a
//! 64-byte XEd25519 signature over the filehash, keyed by the filehash
//! itself and nonced by a hash of filehash and signer key. To an observer
//! it is indistinguishable from any other trailing ciphertext.
//!
//! Opening the AEAD only proves that whoever built the block knew the
//! filehash and the claimed public key, which anyone holding the file does.
//! The inner 64 bytes must therefore still be verified as an XEd25519
//! signature before the signer is trusted.

use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha512};

use crate::aead;
use crate::errors::CovertError;
use crate::pubkey::Identity;
use crate::util::NONCE_SIZE;
use crate::xeddsa;

/// On-wire size of a signature block: 64-byte signature plus tag.
pub const SIGNATURE_BLOCK_SIZE: usize = 80;

fn block_key_nonce(filehash: &[u8; 64], pk: &[u8; 32]) -> ([u8; 32], [u8; NONCE_SIZE]) {
    let mut key = [0u8; 32];
    key.copy_from_slice(&filehash[..32]);
    let mut h = Sha512::new();
    h.update(filehash);
    h.update(pk);
    let digest = h.finalize();
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&digest[..NONCE_SIZE]);
    (key, nonce)
}

/// Produce one 80-byte signature block over a filehash.
pub fn sign_detached<R: RngCore + CryptoRng>(
    rng: &mut R,
    identity: &Identity,
    filehash: &[u8; 64],
) -> [u8; SIGNATURE_BLOCK_SIZE] {
    let signature = xeddsa::sign(rng, identity.secret(), filehash);
    let (key, nonce) = block_key_nonce(filehash, identity.public_key());
    let sealed = aead::seal(&key, &nonce, b"", &signature);
    sealed.try_into().expect("64-byte signature seals to 80 bytes")
}

/// Verify an 80-byte signature block against a filehash and the claimed
/// signer. Both the AEAD layer and the inner XEd25519 signature must check
/// out; any failure is an [`CovertError::AuthFail`].
pub fn verify_detached(
    pk: &[u8; 32],
    filehash: &[u8; 64],
    block: &[u8],
) -> Result<(), CovertError> {
    if block.len() != SIGNATURE_BLOCK_SIZE {
        return Err(CovertError::AuthFail);
    }
    let (key, nonce) = block_key_nonce(filehash, pk);
    let signature = aead::open(&key, &nonce, b"", block)?;
    xeddsa::verify(pk, filehash, &signature)
}
