//! Field arithmetic over GF(2^255 − 19), as needed by the Elligator2
//! mapping.
//!
//! Elements are four little-endian 64-bit limbs, kept fully reduced between
//! operations. The code is deliberately simple rather than constant-time:
//! the mapping only ever runs over the public wire representative or over a
//! freshly generated ephemeral key whose encodability is itself public.

use std::ops::{Add, Mul, Neg, Sub};
use std::sync::OnceLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Fe([u64; 4]);

/// p = 2^255 − 19
const P: [u64; 4] = [
    0xffff_ffff_ffff_ffed,
    0xffff_ffff_ffff_ffff,
    0xffff_ffff_ffff_ffff,
    0x7fff_ffff_ffff_ffff,
];

/// (p − 1) / 2, both the negativity threshold and the Legendre exponent.
const HALF_P: [u64; 4] = [
    0xffff_ffff_ffff_fff6,
    0xffff_ffff_ffff_ffff,
    0xffff_ffff_ffff_ffff,
    0x3fff_ffff_ffff_ffff,
];

/// (p + 3) / 8
const E_SQRT: [u64; 4] = [
    0xffff_ffff_ffff_fffe,
    0xffff_ffff_ffff_ffff,
    0xffff_ffff_ffff_ffff,
    0x0fff_ffff_ffff_ffff,
];

/// (p − 5) / 8
const E_INVSQRT: [u64; 4] = [
    0xffff_ffff_ffff_fffd,
    0xffff_ffff_ffff_ffff,
    0xffff_ffff_ffff_ffff,
    0x0fff_ffff_ffff_ffff,
];

/// (p − 1) / 4
const E_SQRT_M1: [u64; 4] = [
    0xffff_ffff_ffff_fffb,
    0xffff_ffff_ffff_ffff,
    0xffff_ffff_ffff_ffff,
    0x1fff_ffff_ffff_ffff,
];

#[inline]
fn adc(a: u64, b: u64, carry: u64) -> (u64, u64) {
    let t = a as u128 + b as u128 + carry as u128;
    (t as u64, (t >> 64) as u64)
}

#[inline]
fn sbb(a: u64, b: u64, borrow: u64) -> (u64, u64) {
    let t = (a as u128).wrapping_sub(b as u128 + borrow as u128);
    (t as u64, ((t >> 64) as u64) & 1)
}

/// Canonicalize any value below 2^256: at most two subtractions of p.
fn reduce(mut v: [u64; 4]) -> [u64; 4] {
    for _ in 0..2 {
        let mut r = [0u64; 4];
        let mut borrow = 0;
        for i in 0..4 {
            let (x, b) = sbb(v[i], P[i], borrow);
            r[i] = x;
            borrow = b;
        }
        if borrow == 0 {
            v = r;
        }
    }
    v
}

impl Fe {
    pub(crate) const ZERO: Fe = Fe([0; 4]);
    pub(crate) const ONE: Fe = Fe([1, 0, 0, 0]);

    pub(crate) fn from_u64(x: u64) -> Fe {
        Fe([x, 0, 0, 0])
    }

    /// Little-endian decode, reducing non-canonical values modulo p.
    pub(crate) fn from_bytes(b: &[u8; 32]) -> Fe {
        let mut limbs = [0u64; 4];
        for (i, chunk) in b.chunks_exact(8).enumerate() {
            limbs[i] = u64::from_le_bytes(chunk.try_into().expect("8-byte chunk"));
        }
        Fe(reduce(limbs))
    }

    pub(crate) fn to_bytes(self) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, limb) in self.0.iter().enumerate() {
            out[i * 8..(i + 1) * 8].copy_from_slice(&limb.to_le_bytes());
        }
        out
    }

    pub(crate) fn square(self) -> Fe {
        self * self
    }

    /// Square-and-multiply over a fixed 256-bit exponent.
    pub(crate) fn pow(&self, exp: &[u64; 4]) -> Fe {
        let mut r = Fe::ONE;
        for i in (0..256).rev() {
            r = r.square();
            if (exp[i / 64] >> (i % 64)) & 1 == 1 {
                r = r * *self;
            }
        }
        r
    }

    fn gt(&self, limbs: &[u64; 4]) -> bool {
        for i in (0..4).rev() {
            if self.0[i] != limbs[i] {
                return self.0[i] > limbs[i];
            }
        }
        false
    }

    /// An element is negative when it exceeds (p − 1) / 2.
    pub(crate) fn is_negative(&self) -> bool {
        self.gt(&HALF_P)
    }

    pub(crate) fn abs(self) -> Fe {
        if self.is_negative() {
            -self
        } else {
            self
        }
    }

    pub(crate) fn is_square(&self) -> bool {
        *self == Fe::ZERO || self.pow(&HALF_P) == Fe::ONE
    }

    /// The positive square root, or None for a non-square.
    pub(crate) fn sqrt(&self) -> Option<Fe> {
        let mut root = self.pow(&E_SQRT);
        if root.square() != *self {
            root = root * sqrt_m1();
        }
        if root.square() != *self {
            return None;
        }
        Some(root.abs())
    }

    /// Fast inverse square root.
    ///
    /// Returns (1/sqrt(x), true) for a non-zero square, and an
    /// sqrt(-1)-twisted value with false otherwise. The sign of the root is
    /// not guaranteed.
    pub(crate) fn invsqrt(&self) -> (Fe, bool) {
        let mut isr = self.pow(&E_INVSQRT);
        let quartic = *self * isr.square();
        let minus_one = -Fe::ONE;
        if quartic == minus_one || quartic == -sqrt_m1() {
            isr = isr * sqrt_m1();
        }
        let square = quartic == Fe::ONE || quartic == minus_one;
        (isr, square)
    }
}

/// Square root of −1, the positive one.
pub(crate) fn sqrt_m1() -> Fe {
    static CACHE: OnceLock<Fe> = OnceLock::new();
    *CACHE.get_or_init(|| Fe::from_u64(2).pow(&E_SQRT_M1).abs())
}

impl Add for Fe {
    type Output = Fe;

    fn add(self, rhs: Fe) -> Fe {
        let mut r = [0u64; 4];
        let mut carry = 0;
        for i in 0..4 {
            let (x, c) = adc(self.0[i], rhs.0[i], carry);
            r[i] = x;
            carry = c;
        }
        // Both inputs are below p, so the sum stays below 2^256.
        debug_assert_eq!(carry, 0);
        Fe(reduce(r))
    }
}

impl Sub for Fe {
    type Output = Fe;

    fn sub(self, rhs: Fe) -> Fe {
        let mut r = [0u64; 4];
        let mut borrow = 0;
        for i in 0..4 {
            let (x, b) = sbb(self.0[i], rhs.0[i], borrow);
            r[i] = x;
            borrow = b;
        }
        if borrow == 1 {
            let mut carry = 0;
            for i in 0..4 {
                let (x, c) = adc(r[i], P[i], carry);
                r[i] = x;
                carry = c;
            }
        }
        Fe(r)
    }
}

impl Neg for Fe {
    type Output = Fe;

    fn neg(self) -> Fe {
        Fe::ZERO - self
    }
}

impl Mul for Fe {
    type Output = Fe;

    fn mul(self, rhs: Fe) -> Fe {
        // Schoolbook 4x4 into an 8-limb product
        let a = &self.0;
        let b = &rhs.0;
        let mut wide = [0u64; 8];
        for i in 0..4 {
            let mut carry: u64 = 0;
            for j in 0..4 {
                let t = (a[i] as u128) * (b[j] as u128) + wide[i + j] as u128 + carry as u128;
                wide[i + j] = t as u64;
                carry = (t >> 64) as u64;
            }
            wide[i + 4] = carry;
        }
        // Fold the high half down: 2^256 ≡ 38 (mod p)
        let mut v = [0u64; 4];
        let mut carry: u64 = 0;
        for i in 0..4 {
            let t = wide[i] as u128 + (wide[i + 4] as u128) * 38 + carry as u128;
            v[i] = t as u64;
            carry = (t >> 64) as u64;
        }
        let t = v[0] as u128 + (carry as u128) * 38;
        v[0] = t as u64;
        let mut c = (t >> 64) as u64;
        let mut i = 1;
        while c != 0 && i < 4 {
            let t = v[i] as u128 + c as u128;
            v[i] = t as u64;
            c = (t >> 64) as u64;
            i += 1;
        }
        if c != 0 {
            // Wrapped past 2^256 once more; the remaining value is tiny.
            let t = v[0] as u128 + 38;
            v[0] = t as u64;
            let mut c2 = (t >> 64) as u64;
            let mut j = 1;
            while c2 != 0 && j < 4 {
                let t = v[j] as u128 + c2 as u128;
                v[j] = t as u64;
                c2 = (t >> 64) as u64;
                j += 1;
            }
        }
        Fe(reduce(v))
    }
}
