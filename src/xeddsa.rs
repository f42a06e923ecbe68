//! XEd25519 signatures over Montgomery-form Curve25519 keys.
//!
//! This is Signal's XEdDSA scheme: the signing key is an ordinary X25519
//! secret scalar, the public key an ordinary Montgomery u-coordinate, but
//! the arithmetic runs on the birationally equivalent Edwards curve. The
//! sign of the Edwards public point is stored in the highest bit of `s`,
//! matching what Signal's implementation does, so the secret scalar itself
//! is never adjusted.

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha512};

use crate::errors::CovertError;

pub(crate) const SIGNATURE_SIZE: usize = 64;

/// Domain separator for the nonce hash: 2^256 − 1 − 1, little endian.
const HASH1_PREFIX: [u8; 32] = [
    0xfe, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff,
];

fn scalar_from_hash(hash: Sha512) -> Scalar {
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hash.finalize());
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Sign a message with a Montgomery secret key. A fresh 64-byte random
/// nonce keeps distinct signatures of equal messages unlinkable.
pub(crate) fn sign<R: RngCore + CryptoRng>(
    rng: &mut R,
    sk: &[u8; 32],
    message: &[u8],
) -> [u8; SIGNATURE_SIZE] {
    let mut nonce = [0u8; 64];
    rng.fill_bytes(&mut nonce);
    sign_with_nonce(sk, message, &nonce)
}

fn sign_with_nonce(sk: &[u8; 32], message: &[u8], nonce: &[u8; 64]) -> [u8; SIGNATURE_SIZE] {
    let mut clamped = *sk;
    clamped[0] &= 248;
    clamped[31] &= 127;
    clamped[31] |= 64;
    let a = Scalar::from_bytes_mod_order(clamped);
    let big_a = EdwardsPoint::mul_base(&a).compress().to_bytes();

    let mut h = Sha512::new();
    h.update(HASH1_PREFIX);
    h.update(sk);
    h.update(message);
    h.update(nonce);
    let r = scalar_from_hash(h);
    let big_r = EdwardsPoint::mul_base(&r).compress().to_bytes();

    let mut h = Sha512::new();
    h.update(big_r);
    h.update(big_a);
    h.update(message);
    let hram = scalar_from_hash(h);

    let s = r + hram * a;
    let mut out = [0u8; SIGNATURE_SIZE];
    out[..32].copy_from_slice(&big_r);
    out[32..].copy_from_slice(&s.to_bytes());
    // Store the Edwards sign of A in the high bit of s
    out[63] |= big_a[31] & 0x80;
    out
}

/// Verify a signature against a Montgomery public key. Any failure (bad
/// lengths, low-order points, non-canonical `s`, mismatched equation)
/// reports the same [`CovertError::AuthFail`].
pub(crate) fn verify(pk: &[u8; 32], message: &[u8], signature: &[u8]) -> Result<(), CovertError> {
    if signature.len() != SIGNATURE_SIZE {
        return Err(CovertError::AuthFail);
    }
    // Montgomery u to Edwards, using the high bit of pk as the x sign
    let sign_bit = pk[31] >> 7;
    let mut ub = *pk;
    ub[31] &= 0x7f;
    let mut big_a = MontgomeryPoint(ub)
        .to_edwards(sign_bit)
        .ok_or(CovertError::AuthFail)?;
    if big_a.is_small_order() {
        return Err(CovertError::AuthFail);
    }

    let r_bytes: [u8; 32] = signature[..32].try_into().expect("checked length");
    let big_r = CompressedEdwardsY(r_bytes)
        .decompress()
        .ok_or(CovertError::AuthFail)?;
    if big_r.is_small_order() {
        return Err(CovertError::AuthFail);
    }

    let mut s_bytes: [u8; 32] = signature[32..].try_into().expect("checked length");
    if s_bytes[31] & 0x80 != 0 {
        big_a = -big_a;
        s_bytes[31] &= 0x7f;
    }
    let s: Scalar =
        Option::from(Scalar::from_canonical_bytes(s_bytes)).ok_or(CovertError::AuthFail)?;

    let mut h = Sha512::new();
    h.update(big_r.compress().to_bytes());
    h.update(big_a.compress().to_bytes());
    h.update(message);
    let hram = scalar_from_hash(h);

    // R == s*G - h*A
    let check = EdwardsPoint::vartime_double_scalar_mul_basepoint(&-hram, &big_a, &s);
    if check == big_r {
        Ok(())
    } else {
        Err(CovertError::AuthFail)
    }
}
