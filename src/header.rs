//! Cryptographic header: authentication slot negotiation on encrypt and the
//! blind trial decryption that locates block 0 on decrypt.
//!
//! The header carries no structure a passive observer could parse. Short
//! mode is a bare 12-byte nonce; advanced mode is the 32-byte Elligator
//! hash of a fresh ephemeral key followed by any number of 32-byte auth
//! slots, each either `file_key XOR recipient_key` or random decoy filler.
//! A reader cannot tell how many slots exist, so it runs a bounded search
//! over every plausible (key, slot, header length, block length)
//! combination; a Poly1305 tag match is definitive.

use rand::seq::SliceRandom;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::aead;
use crate::elligator;
use crate::errors::CovertError;
use crate::passphrase::{self, PwHash};
use crate::pubkey::{derive_symkey, Identity, Recipient};
use crate::util::{xor32, NONCE_SIZE};

/// Hard cap on distinct keys (real plus decoy) per file.
pub(crate) const MAX_RECIPIENTS: usize = 20;
/// Longest possible header: ephash plus 19 auth slots.
const MAX_HEADER: usize = 32 + 19 * 32;
/// Block 0 must end within this many bytes from the start of the file.
const SEARCH_WINDOW: usize = 1024;
/// Framing added to every block: nextlen(3) plus the Poly1305 tag.
pub(crate) const BLOCK_OVERHEAD: usize = 19;

pub(crate) struct HeaderOutput {
    pub header: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
    pub key: Zeroizing<[u8; 32]>,
}

/// Build the header for a fresh file: derive one candidate key per
/// recipient, deduplicate, pick the file key, and lay the rest out as
/// shuffled XOR slots with any requested decoys.
pub(crate) fn encrypt_header<R: RngCore + CryptoRng>(
    rng: &mut R,
    wide_open: bool,
    recipients: &[Recipient],
    decoys: usize,
) -> Result<HeaderOutput, CovertError> {
    if wide_open && !recipients.is_empty() {
        return Err(CovertError::Format(
            "wide-open mode excludes recipients".into(),
        ));
    }
    if !wide_open && recipients.is_empty() {
        return Err(CovertError::NoRecipients);
    }

    // Cheap dedup by identity bytes before any hashing
    let mut unique: Vec<&Recipient> = Vec::new();
    for r in recipients {
        if !unique.iter().any(|u| u.identity_bytes() == r.identity_bytes()) {
            unique.push(r);
        }
    }

    // A fresh ephemeral keypair seeds the nonce in every mode; the secret
    // is dropped (and zeroized) as soon as this function returns.
    let (eph_sk, _eph_pk, ephash) = elligator::hidden_keypair(rng);
    let nonce: [u8; NONCE_SIZE] = ephash[..NONCE_SIZE].try_into().expect("12 of 32 bytes");

    let has_pubkeys = unique
        .iter()
        .any(|r| matches!(r, Recipient::PublicKey(_)));

    // Candidate keys, in recipient order for now
    let mut keys: Vec<Zeroizing<[u8; 32]>> = if wide_open {
        vec![Zeroizing::new([0u8; 32])]
    } else {
        unique
            .iter()
            .map(|r| match r {
                Recipient::Passphrase(pw) => passphrase::authkey(&pw.prehash(), &nonce),
                Recipient::PublicKey(pk) => derive_symkey(&nonce, &eph_sk, pk),
            })
            .collect()
    };

    // Dedup again by produced key: an XOR slot of two identical keys would
    // be all zeroes on the wire
    let mut deduped: Vec<Zeroizing<[u8; 32]>> = Vec::new();
    for k in keys.drain(..) {
        if !deduped.iter().any(|d| **d == *k) {
            deduped.push(k);
        }
    }
    if deduped.len() + decoys > MAX_RECIPIENTS {
        return Err(CovertError::Format(
            "too many recipients specified (max 20)".into(),
        ));
    }

    if !has_pubkeys && deduped.len() == 1 && decoys == 0 {
        // Short mode: the single candidate is the file key and the header
        // is just the nonce
        let key = deduped.pop().expect("one candidate");
        return Ok(HeaderOutput { header: nonce.to_vec(), nonce, key });
    }

    deduped.shuffle(rng);
    let key = deduped.remove(0);
    let mut slots: Vec<[u8; 32]> = deduped.iter().map(|k| xor32(&key, k)).collect();
    for _ in 0..decoys {
        let mut filler = [0u8; 32];
        rng.fill_bytes(&mut filler);
        slots.push(filler);
    }
    slots.shuffle(rng);

    let mut header = Vec::with_capacity(32 + 32 * slots.len());
    header.extend_from_slice(&ephash);
    for slot in &slots {
        header.extend_from_slice(slot);
    }
    Ok(HeaderOutput { header, nonce, key })
}

/// Decrypt-side header state: the first kilobyte of the file and, once a
/// trial succeeds, the recovered file key and block-0 placement.
pub(crate) struct Header {
    ct: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
    eph_pk: [u8; 32],
    pub key: Option<Zeroizing<[u8; 32]>>,
    pub block0_pos: usize,
    pub block0_end: usize,
    pub block0: Option<Zeroizing<Vec<u8>>>,
}

impl Header {
    /// Start a blind search over the first bytes of a file. Wide-open mode
    /// is probed immediately; other keys are offered via the `try_` calls.
    pub(crate) fn new(prefix: &[u8]) -> Result<Self, CovertError> {
        // 12 nonce + 1 data + 3 nextlen + 16 tag
        if prefix.len() < 32 {
            return Err(CovertError::Format(
                "this file is too small to contain encrypted data".into(),
            ));
        }
        let ct = prefix[..prefix.len().min(SEARCH_WINDOW)].to_vec();
        let nonce: [u8; NONCE_SIZE] = ct[..NONCE_SIZE].try_into().expect("prefix >= 32");
        let ephash: [u8; 32] = ct[..32].try_into().expect("prefix >= 32");
        let eph_pk = elligator::decode(&ephash);
        let mut header = Self {
            ct,
            nonce,
            eph_pk,
            key: None,
            block0_pos: 0,
            block0_end: 0,
            block0: None,
        };
        // Cheap wide-open probe; the slot-grid variant (decoyed wide-open)
        // runs last in the caller's candidate order via try_zero_slots.
        header.find_block0(&[0u8; 32], NONCE_SIZE);
        Ok(header)
    }

    /// Last-resort candidate: the all-zero key tried across the slot grid,
    /// for wide-open files padded with decoy slots.
    pub(crate) fn try_zero_slots(&mut self) -> bool {
        self.find_slots(&[0u8; 32])
    }

    pub(crate) fn authenticated(&self) -> bool {
        self.key.is_some()
    }

    /// Try an identity's secret key against the ephemeral key slots.
    pub(crate) fn try_identity(&mut self, id: &Identity) -> bool {
        let authkey = derive_symkey(&self.nonce, id.secret(), &self.eph_pk);
        self.find_slots(&authkey)
    }

    /// Try a prehashed passphrase, first as a short-mode key and then
    /// against the slot grid.
    pub(crate) fn try_passphrase(&mut self, pwhash: &PwHash) -> bool {
        let authkey = passphrase::authkey(pwhash, &self.nonce);
        if self.find_block0(&authkey, NONCE_SIZE) {
            return true;
        }
        self.find_slots(&authkey)
    }

    /// Scan the 32-byte slot grid. Slot zero is implicit (all zeroes: the
    /// auth key itself may be the file key); later slots XOR against the
    /// candidate. For each slot the header may end at that slot boundary or
    /// any later one.
    fn find_slots(&mut self, authkey: &[u8; 32]) -> bool {
        let mut slots: Vec<([u8; 32], usize)> = vec![([0u8; 32], 32)];
        let mut i = 1;
        while (i + 1) * 32 <= self.ct.len().saturating_sub(BLOCK_OVERHEAD)
            && (i + 1) * 32 <= MAX_HEADER
        {
            let slot: [u8; 32] = self.ct[i * 32..(i + 1) * 32]
                .try_into()
                .expect("32-byte slice");
            slots.push((slot, (i + 1) * 32));
            i += 1;
        }
        for j in 0..slots.len() {
            let key = xor32(&slots[j].0, authkey);
            for (_, begin) in &slots[j..] {
                if self.find_block0(&key, *begin) {
                    return true;
                }
            }
        }
        false
    }

    /// Try to open block 0 with `key` at starting offset `begin`, scanning
    /// candidate end offsets from the longest down. The whole prefix before
    /// `begin` is the AAD.
    fn find_block0(&mut self, key: &[u8; 32], begin: usize) -> bool {
        if begin + BLOCK_OVERHEAD > self.ct.len() {
            return false;
        }
        for end in (begin + BLOCK_OVERHEAD..=self.ct.len()).rev() {
            if let Ok(pt) = aead::open(key, &self.nonce, &self.ct[..begin], &self.ct[begin..end]) {
                #[cfg(feature = "trace")]
                tracing::debug!(begin, end, "block 0 located");
                self.key = Some(Zeroizing::new(*key));
                self.block0_pos = begin;
                self.block0_end = end;
                self.block0 = Some(Zeroizing::new(pt));
                return true;
            }
        }
        false
    }

    /// The Poly1305 tag of block 0, needed to seed the signing hash.
    pub(crate) fn block0_tag(&self) -> &[u8] {
        &self.ct[self.block0_end - aead::TAG_SIZE..self.block0_end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn seal_block0(out: &mut Vec<u8>, h: &HeaderOutput, data: &[u8]) {
        let mut pt = data.to_vec();
        pt.extend_from_slice(&[0, 0, 0]); // nextlen = 0
        out.extend_from_slice(&h.header);
        out.extend_from_slice(&aead::seal(&h.key, &h.nonce, &h.header, &pt));
    }

    #[test]
    fn wide_open_header_is_short() {
        let mut rng = StdRng::seed_from_u64(1);
        let h = encrypt_header(&mut rng, true, &[], 0).unwrap();
        assert_eq!(h.header.len(), 12);
        assert_eq!(*h.key, [0u8; 32]);
        assert_eq!(h.header, h.nonce);
    }

    #[test]
    fn wide_open_found_without_keys() {
        let mut rng = StdRng::seed_from_u64(2);
        let h = encrypt_header(&mut rng, true, &[], 0).unwrap();
        let mut file = Vec::new();
        seal_block0(&mut file, &h, b"hi");
        let header = Header::new(&file).unwrap();
        assert!(header.authenticated());
        assert_eq!(header.block0_pos, 12);
        let block0 = header.block0.as_ref().unwrap();
        assert_eq!(&block0[..2], b"hi");
    }

    #[test]
    fn single_pubkey_recipient_round_trip() {
        let mut rng = StdRng::seed_from_u64(3);
        let alice = Identity::generate(&mut rng);
        let recipients = [Recipient::PublicKey(*alice.public_key())];
        let h = encrypt_header(&mut rng, false, &recipients, 0).unwrap();
        assert_eq!(h.header.len(), 32);
        let mut file = Vec::new();
        seal_block0(&mut file, &h, b"payload");
        let mut header = Header::new(&file).unwrap();
        assert!(!header.authenticated());
        assert!(header.try_identity(&alice));
        assert_eq!(**header.key.as_ref().unwrap(), *h.key);
        assert_eq!(header.block0_pos, 32);
    }

    #[test]
    fn two_pubkeys_both_open() {
        let mut rng = StdRng::seed_from_u64(4);
        let alice = Identity::generate(&mut rng);
        let bob = Identity::generate(&mut rng);
        let mallory = Identity::generate(&mut rng);
        let recipients = [
            Recipient::PublicKey(*alice.public_key()),
            Recipient::PublicKey(*bob.public_key()),
        ];
        let h = encrypt_header(&mut rng, false, &recipients, 0).unwrap();
        assert_eq!(h.header.len(), 64);
        let mut file = Vec::new();
        seal_block0(&mut file, &h, b"payload");

        for id in [&alice, &bob] {
            let mut header = Header::new(&file).unwrap();
            assert!(header.try_identity(id), "recipient failed to open");
        }
        let mut header = Header::new(&file).unwrap();
        assert!(!header.try_identity(&mallory));
        assert!(!header.authenticated());
    }

    #[test]
    fn duplicate_recipients_collapse() {
        let mut rng = StdRng::seed_from_u64(5);
        let alice = Identity::generate(&mut rng);
        let recipients = [
            Recipient::PublicKey(*alice.public_key()),
            Recipient::PublicKey(*alice.public_key()),
        ];
        let h = encrypt_header(&mut rng, false, &recipients, 0).unwrap();
        // Dedup leaves a single candidate; with no second key there is no
        // auth slot and no all-zero XOR leak
        assert_eq!(h.header.len(), 32);
    }

    #[test]
    fn decoys_obscure_recipient_count() {
        let mut rng = StdRng::seed_from_u64(6);
        let alice = Identity::generate(&mut rng);
        let recipients = [Recipient::PublicKey(*alice.public_key())];
        let h = encrypt_header(&mut rng, false, &recipients, 3).unwrap();
        assert_eq!(h.header.len(), 32 + 3 * 32);
        let mut file = Vec::new();
        seal_block0(&mut file, &h, b"payload");
        let mut header = Header::new(&file).unwrap();
        assert!(header.try_identity(&alice));
    }

    #[test]
    fn recipient_cap_enforced() {
        let mut rng = StdRng::seed_from_u64(7);
        let recipients: Vec<Recipient> = (0..21)
            .map(|_| Recipient::PublicKey(*Identity::generate(&mut rng).public_key()))
            .collect();
        assert!(encrypt_header(&mut rng, false, &recipients, 0).is_err());
        assert!(encrypt_header(&mut rng, false, &recipients[..20], 0).is_ok());
        assert!(encrypt_header(&mut rng, false, &recipients[..18], 2).is_ok());
        assert!(encrypt_header(&mut rng, false, &recipients[..19], 2).is_err());
    }

    #[test]
    fn no_recipients_is_an_error() {
        let mut rng = StdRng::seed_from_u64(8);
        assert!(matches!(
            encrypt_header(&mut rng, false, &[], 0),
            Err(CovertError::NoRecipients)
        ));
    }

    #[test]
    fn wide_open_with_recipients_is_an_error() {
        let mut rng = StdRng::seed_from_u64(9);
        let alice = Identity::generate(&mut rng);
        let recipients = [Recipient::PublicKey(*alice.public_key())];
        assert!(encrypt_header(&mut rng, true, &recipients, 0).is_err());
    }

    #[test]
    fn max_recipient_header_still_searchable() {
        let mut rng = StdRng::seed_from_u64(10);
        let ids: Vec<Identity> = (0..20).map(|_| Identity::generate(&mut rng)).collect();
        let recipients: Vec<Recipient> =
            ids.iter().map(|i| Recipient::PublicKey(*i.public_key())).collect();
        let h = encrypt_header(&mut rng, false, &recipients, 0).unwrap();
        assert_eq!(h.header.len(), 32 + 19 * 32);
        let mut file = Vec::new();
        seal_block0(&mut file, &h, b"x");
        // The last slot in the permutation must still be reachable; try all
        for id in &ids {
            let mut header = Header::new(&file).unwrap();
            assert!(header.try_identity(id), "recipient lost in max-size header");
        }
    }

    #[test]
    fn too_small_file_is_a_format_error() {
        assert!(matches!(
            Header::new(&[0u8; 31]),
            Err(CovertError::Format(_))
        ));
    }
}
