//! Small shared helpers: nonce arithmetic, padding size selection and text
//! normalization.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::{CryptoRng, RngCore};
use unicode_normalization::UnicodeNormalization;

/// ChaCha20-Poly1305 nonce size; also the length of the short-mode header.
pub const NONCE_SIZE: usize = 12;

/// Per-block nonce counter.
///
/// The file nonce is interpreted as a little-endian 96-bit integer and
/// incremented by one per block; the first value yielded is the file nonce
/// unchanged.
#[derive(Clone)]
pub(crate) struct NonceCounter {
    state: [u8; NONCE_SIZE],
}

impl NonceCounter {
    pub(crate) fn new(file_nonce: [u8; NONCE_SIZE]) -> Self {
        Self { state: file_nonce }
    }

    pub(crate) fn next(&mut self) -> [u8; NONCE_SIZE] {
        let current = self.state;
        // Overflow-safe little-endian increment
        for byte in self.state.iter_mut() {
            let (v, carry) = byte.overflowing_add(1);
            *byte = v;
            if !carry {
                break;
            }
        }
        current
    }
}

pub(crate) fn xor32(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Calculate the total padding in bytes for an inner stream of `total`
/// non-padding bytes with proportion `p`.
///
/// Two components: a fixed floor that hides very short messages behind a
/// common minimum size, and an exponentially distributed random component
/// whose mean is moderated logarithmically so that multi-gigabyte files do
/// not get gigabytes of padding. The random multiplier has mean one, is
/// usually below one, and very rarely reaches about 45.
pub(crate) fn random_padding<R: RngCore + CryptoRng>(rng: &mut R, total: u64, p: f64) -> u64 {
    if p <= 0.0 {
        return 0;
    }
    let fixed = ((p * 500.0) as u64).saturating_sub(total);
    let eff = 200.0 + 1e8 * (1.0 + 1e-8 * (total + fixed) as f64).ln();
    // Exponential variate from two uniform draws; the offsets keep the
    // argument of ln strictly positive.
    let u1 = rng.next_u32() as f64;
    let u2 = rng.next_u32() as f64;
    let x = u1 + u2 * 2f64.powi(-32) + 2f64.powi(-33);
    let r = 2f64.powi(32).ln() - x.ln();
    fixed + (r * p * eff).round() as u64
}

/// Unicode-normalizing UTF-8 encode: NFKC, no BOM.
pub fn encode_str(s: &str) -> Vec<u8> {
    s.trim_start_matches('\u{FEFF}').nfkc().collect::<String>().into_bytes()
}

/// Normalize a text message for encryption: trailing whitespace removed
/// from each line, CRLF to LF, no surrounding blank lines.
pub fn normalize_message(text: &str) -> String {
    let trimmed: Vec<&str> = text.split('\n').map(|l| l.trim_end()).collect();
    trimmed.join("\n").trim_matches('\n').to_string()
}

/// Cooperative cancellation flag, checked between blocks on encode and
/// between trial decryptions on decode. Cancellation surfaces as an
/// interrupted i/o error.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call from another thread.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self) -> std::io::Result<()> {
        if self.is_cancelled() {
            Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "operation cancelled",
            ))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn nonce_increments_little_endian() {
        let mut n = NonceCounter::new([0xff, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(n.next(), [0xff, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(n.next(), [0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(n.next(), [1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn nonce_wraps_at_96_bits() {
        let mut n = NonceCounter::new([0xff; 12]);
        n.next();
        assert_eq!(n.next(), [0; 12]);
    }

    #[test]
    fn padding_disabled() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(random_padding(&mut rng, 12345, 0.0), 0);
    }

    #[test]
    fn padding_floor_hides_small_messages() {
        let mut rng = StdRng::seed_from_u64(2);
        // With p = 0.05 the fixed floor is 25 bytes; a 5-byte message gets
        // at least the remaining 20.
        for _ in 0..100 {
            assert!(random_padding(&mut rng, 5, 0.05) >= 20);
        }
    }

    #[test]
    fn padding_mean_tracks_effective_size() {
        let mut rng = StdRng::seed_from_u64(3);
        let n = 10_000;
        let total: u64 = (0..n).map(|_| random_padding(&mut rng, 1000, 0.05)).sum();
        let mean = total as f64 / n as f64;
        let eff: f64 = 200.0 + 1e8 * (1.0 + 1e-8 * 1000.0_f64).ln();
        let expected = 0.05 * eff;
        assert!(
            (mean - expected).abs() < 0.05 * expected,
            "mean {mean} too far from {expected}"
        );
    }

    #[test]
    fn message_normalization() {
        assert_eq!(normalize_message("hi \r\nthere\t\n\n"), "hi\nthere");
        assert_eq!(normalize_message("\n\nx\n"), "x");
        assert_eq!(normalize_message(""), "");
    }
}
