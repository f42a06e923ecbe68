//! Key material: sender identities, recipient designations and the X25519
//! key agreement used for header slots.
//!
//! The core works with raw 32-byte Curve25519 keys only. Parsing key files
//! (SSH, Age, Minisign) is a front-end concern and happens elsewhere.

use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha512};
use x25519_dalek::{x25519, X25519_BASEPOINT_BYTES};
use zeroize::Zeroizing;

use crate::passphrase::{Passphrase, PwHash};
use crate::util::NONCE_SIZE;
use crate::xeddsa;

pub const KEY_SIZE: usize = 32;

/// RFC 7748 scalar clamping.
pub(crate) fn clamp_scalar(sk: &mut [u8; 32]) {
    sk[0] &= 248;
    sk[31] &= 127;
    sk[31] |= 64;
}

/// A sender identity: an X25519 secret key with its derived public key.
/// Every identity can also produce XEd25519 signatures over the same
/// Montgomery secret.
#[derive(Clone)]
pub struct Identity {
    sk: Zeroizing<[u8; 32]>,
    pk: [u8; 32],
    name: Option<String>,
}

impl Identity {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut sk = [0u8; 32];
        rng.fill_bytes(&mut sk);
        Self::from_secret(sk)
    }

    /// Build an identity from raw secret key bytes, clamping them.
    pub fn from_secret(mut sk: [u8; 32]) -> Self {
        clamp_scalar(&mut sk);
        let pk = x25519(sk, X25519_BASEPOINT_BYTES);
        let id = Self { sk: Zeroizing::new(sk), pk, name: None };
        sk.fill(0);
        id
    }

    /// Attach a display name, bound into the archive index when signing.
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.pk
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn secret(&self) -> &[u8; 32] {
        &self.sk
    }

    /// Produce a detached XEd25519 signature over an arbitrary message.
    pub fn sign<R: RngCore + CryptoRng>(&self, rng: &mut R, message: &[u8]) -> [u8; 64] {
        xeddsa::sign(rng, &self.sk, message)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identity({})", hex_prefix(&self.pk))
    }
}

fn hex_prefix(pk: &[u8; 32]) -> String {
    pk[..4].iter().map(|b| format!("{b:02x}")).collect()
}

/// Someone who will be able to open a file.
#[derive(Clone, Debug)]
pub enum Recipient {
    /// An X25519 public key.
    PublicKey([u8; 32]),
    /// A shared passphrase.
    Passphrase(Passphrase),
}

impl Recipient {
    /// The identity bytes used for cheap deduplication before any hashing.
    pub(crate) fn identity_bytes(&self) -> &[u8] {
        match self {
            Recipient::PublicKey(pk) => pk,
            Recipient::Passphrase(pw) => pw.as_bytes(),
        }
    }
}

/// Key material offered when opening a file.
pub enum DecryptKey {
    Identity(Identity),
    /// A prehashed passphrase (stage-1 Argon2id output).
    Passphrase(PwHash),
}

impl From<Identity> for DecryptKey {
    fn from(id: Identity) -> Self {
        DecryptKey::Identity(id)
    }
}

impl From<PwHash> for DecryptKey {
    fn from(ph: PwHash) -> Self {
        DecryptKey::Passphrase(ph)
    }
}

/// Header slot key derivation: SHA-512 over the file nonce and the raw
/// X25519 shared secret, truncated to 32 bytes.
pub(crate) fn derive_symkey(
    nonce: &[u8; NONCE_SIZE],
    sk: &[u8; 32],
    pk: &[u8; 32],
) -> Zeroizing<[u8; 32]> {
    let shared = Zeroizing::new(x25519(*sk, *pk));
    let mut h = Sha512::new();
    h.update(nonce);
    h.update(&*shared);
    let digest = h.finalize();
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&digest[..32]);
    key
}
