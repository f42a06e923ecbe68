//! Elligator2 over Curve25519, with non-square 2.
//!
//! A Curve25519 public key is trivially distinguishable from random bytes:
//! the high bit is always clear and only half of all u values lie on the
//! curve. Elligator2 maps half of the valid points onto 254-bit strings
//! that are uniformly distributed; the remaining two bits of the wire
//! representation are filled with random bits, and the unused v-coordinate
//! sign selects between the two preimages. Together the caller supplies
//! three random bits per encoding.
//!
//! Only about half of all public keys can be encoded at all, so ephemeral
//! key generation retries until it draws an encodable one (two attempts on
//! average). Decoding is total: every 32-byte string maps back to some
//! curve point.

use rand::{CryptoRng, RngCore};
use x25519_dalek::{x25519, X25519_BASEPOINT_BYTES};
use zeroize::Zeroizing;

use crate::fe::{sqrt_m1, Fe};
use crate::pubkey::clamp_scalar;

const CURVE_A: u64 = 486662;

/// Hash a public key into its 32-byte wire representative.
///
/// `tweak` bit 0 selects the v-coordinate sign, bits 1-2 fill the unused
/// high bits of the output. Returns None for the non-encodable half of the
/// key space.
pub(crate) fn encode(pk: &[u8; 32], tweak: u8) -> Option<[u8; 32]> {
    let mut ub = *pk;
    ub[31] &= 0x7f;
    let u = Fe::from_bytes(&ub);
    let a = Fe::from_u64(CURVE_A);
    let t = u + a;
    let r0 = -(Fe::from_u64(2) * u * t);
    let (isr, square) = r0.invsqrt();
    if !square {
        return None;
    }
    let w = if tweak & 1 == 1 { t } else { u };
    let r = (w * isr).abs();
    let mut out = r.to_bytes();
    out[31] |= (tweak & 0b110) << 5;
    Some(out)
}

/// Recover the public key hidden in a wire representative.
pub(crate) fn decode(representative: &[u8; 32]) -> [u8; 32] {
    let mut rb = *representative;
    rb[31] &= 0x3f;
    let r = Fe::from_bytes(&rb);
    let (u, _v) = map_to_curve(r);
    u.to_bytes()
}

/// The fast Elligator2 map from a 254-bit value to curve coordinates.
fn map_to_curve(r: Fe) -> (Fe, Fe) {
    let one = Fe::ONE;
    let a = Fe::from_u64(CURVE_A);
    let non_square = Fe::from_u64(2);
    let ufactor = -(non_square * sqrt_m1());
    let vfactor = ufactor
        .sqrt()
        .expect("ufactor is a square by construction");

    let t1 = r.square() * non_square;
    let u1 = t1 + one;
    let t2 = u1.square();
    let t3 = (a.square() * t1 - t2) * a;
    let den = t2 * u1;
    let (isr, square) = (t3 * den).invsqrt();
    let mut u = r.square() * ufactor;
    let mut v = r * vfactor;
    if square {
        u = one;
        v = one;
    }
    v = v * (t3 * isr);
    u = u * (-a * t3 * t2 * isr.square());
    if square != v.is_negative() {
        v = -v;
    }
    (u, v)
}

/// Generate an ephemeral X25519 keypair whose public key has a hidden wire
/// form, retrying until the key is encodable.
///
/// Returns (secret, public, representative).
pub(crate) fn hidden_keypair<R: RngCore + CryptoRng>(
    rng: &mut R,
) -> (Zeroizing<[u8; 32]>, [u8; 32], [u8; 32]) {
    loop {
        let mut sk = Zeroizing::new([0u8; 32]);
        rng.fill_bytes(sk.as_mut());
        clamp_scalar(&mut sk);
        let pk = x25519(*sk, X25519_BASEPOINT_BYTES);
        let tweak = (rng.next_u32() & 7) as u8;
        if let Some(representative) = encode(&pk, tweak) {
            return (sk, pk, representative);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    // Deterministic vectors cross-checked against the reference
    // implementation of the mapping.
    const TEST_SK: &str = "080102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e5f";
    const TEST_PK: &str = "c21af0e66e57c5a4050ce4c22a2ca9ec79beb87bbe6ad1f02d02eafb80918a5a";
    const HASHES: [&str; 8] = [
        "67959aa406c143538edea1e52d91e63894401094de043c9f40be7af3b0cf3017",
        "5d4922920a153b7ee98e2355feb4ee486bb2903ef7fe01f103a81eccf058c21f",
        "67959aa406c143538edea1e52d91e63894401094de043c9f40be7af3b0cf3057",
        "5d4922920a153b7ee98e2355feb4ee486bb2903ef7fe01f103a81eccf058c25f",
        "67959aa406c143538edea1e52d91e63894401094de043c9f40be7af3b0cf3097",
        "5d4922920a153b7ee98e2355feb4ee486bb2903ef7fe01f103a81eccf058c29f",
        "67959aa406c143538edea1e52d91e63894401094de043c9f40be7af3b0cf30d7",
        "5d4922920a153b7ee98e2355feb4ee486bb2903ef7fe01f103a81eccf058c2df",
    ];

    fn test_pk() -> [u8; 32] {
        hex::decode(TEST_PK).unwrap().try_into().unwrap()
    }

    #[test]
    fn secret_key_derives_test_vector_public_key() {
        let sk: [u8; 32] = hex::decode(TEST_SK).unwrap().try_into().unwrap();
        assert_eq!(x25519(sk, X25519_BASEPOINT_BYTES), test_pk());
    }

    #[test]
    fn known_hashes_for_all_tweaks() {
        let pk = test_pk();
        for (tweak, expected) in HASHES.iter().enumerate() {
            let h = encode(&pk, tweak as u8).expect("test key is encodable");
            assert_eq!(hex::encode(h), *expected, "tweak {tweak}");
        }
    }

    #[test]
    fn all_tweaks_round_trip() {
        let pk = test_pk();
        for tweak in 0..8 {
            let h = encode(&pk, tweak).unwrap();
            assert_eq!(decode(&h), pk, "tweak {tweak}");
        }
    }

    #[test]
    fn generated_keypairs_round_trip() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..16 {
            let (_sk, pk, representative) = hidden_keypair(&mut rng);
            assert_eq!(decode(&representative), pk);
            // high bit of a Curve25519 key is clear
            assert_eq!(pk[31] & 0x80, 0);
        }
    }

    #[test]
    fn roughly_half_of_keys_are_encodable() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut ok = 0;
        let n = 200;
        for _ in 0..n {
            let mut sk = [0u8; 32];
            rng.fill_bytes(&mut sk);
            clamp_scalar(&mut sk);
            let pk = x25519(sk, X25519_BASEPOINT_BYTES);
            if encode(&pk, 0).is_some() {
                ok += 1;
            }
        }
        assert!((60..140).contains(&ok), "encodable {ok}/{n}");
    }
}
