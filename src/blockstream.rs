//! The authenticated block stream.
//!
//! The inner archive bytes are segmented into blocks of
//! `data || nextlen_u24_LE`, each sealed with ChaCha20-Poly1305 under the
//! file key. Block nonces count up from the file nonce, little endian.
//! Block 0 carries the whole header as AAD, binding the auth slots to the
//! content; every later block has empty AAD. `nextlen` announces the next
//! block's plaintext data length, so the stream is self-delimited: a zero
//! terminates it, and truncation is indistinguishable from tampering.
//!
//! A SHA-512 chain over the Poly1305 tags accumulates into the filehash
//! that signatures cover.

use std::io::{Read, Write};

use sha2::{Digest, Sha512};
use zeroize::{Zeroize, Zeroizing};

use crate::aead::{self, TAG_SIZE};
use crate::errors::CovertError;
use crate::header::{Header, HeaderOutput, BLOCK_OVERHEAD};
use crate::util::NonceCounter;

/// Largest data length a block can announce (u24 nextlen).
pub(crate) const MAX_BLOCK_DATA: usize = 0xff_ffff;

/// Default data capacity for blocks after the first.
pub(crate) const BLOCK_SIZE: usize = (1 << 20) - BLOCK_OVERHEAD;

/// Header plus block 0 must fit in the first kilobyte, where the blind
/// search looks for them.
const FIRST_KILOBYTE: usize = 1024;

/// Running SHA-512 chain over block tags: starts from the hash of the
/// empty string, then `h = SHA512(h || tag)` per block.
pub(crate) struct SigningHash {
    state: [u8; 64],
}

impl SigningHash {
    pub(crate) fn new() -> Self {
        let mut state = [0u8; 64];
        state.copy_from_slice(&Sha512::digest(b""));
        Self { state }
    }

    pub(crate) fn update(&mut self, tag: &[u8]) {
        let mut h = Sha512::new();
        h.update(self.state);
        h.update(tag);
        self.state.copy_from_slice(&h.finalize());
    }

    pub(crate) fn value(&self) -> [u8; 64] {
        self.state
    }
}

/// A plaintext block being assembled by the archive layer.
pub(crate) struct Block {
    data: Vec<u8>,
    capacity: usize,
}

impl Block {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity <= MAX_BLOCK_DATA);
        Self { data: Vec::with_capacity(capacity + 3), capacity }
    }

    pub(crate) fn space_left(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append as much of `bytes` as fits; returns the number taken.
    pub(crate) fn extend(&mut self, bytes: &[u8]) -> usize {
        let take = self.space_left().min(bytes.len());
        self.data.extend_from_slice(&bytes[..take]);
        take
    }

    /// Read from `src` straight into the block buffer, at most `max` bytes.
    pub(crate) fn fill_from(
        &mut self,
        src: &mut dyn Read,
        max: usize,
    ) -> std::io::Result<usize> {
        let take = self.space_left().min(max);
        let start = self.data.len();
        self.data.resize(start + take, 0);
        let n = loop {
            match src.read(&mut self.data[start..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.data.truncate(start);
                    return Err(e);
                }
            }
        };
        self.data.truncate(start + n);
        Ok(n)
    }

    /// Append `n` padding bytes (or as many as fit); returns the number taken.
    pub(crate) fn pad(&mut self, n: usize, byte: u8) -> usize {
        let take = self.space_left().min(n);
        self.data.resize(self.data.len() + take, byte);
        take
    }

    #[cfg(test)]
    pub(crate) fn as_slice_for_tests(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

/// Encrypting writer: seals blocks as soon as the following block's length
/// is known, emitting the header up front.
pub(crate) struct BlockWriter<'a, W: Write> {
    out: &'a mut W,
    key: Zeroizing<[u8; 32]>,
    nonce: NonceCounter,
    hash: SigningHash,
    header_aad: Option<Vec<u8>>,
    pending: Option<Block>,
    first_capacity: usize,
}

impl<'a, W: Write> BlockWriter<'a, W> {
    pub(crate) fn new(out: &'a mut W, header: HeaderOutput) -> Result<Self, CovertError> {
        out.write_all(&header.header)?;
        let first_capacity = FIRST_KILOBYTE - header.header.len() - BLOCK_OVERHEAD;
        Ok(Self {
            out,
            key: header.key,
            nonce: NonceCounter::new(header.nonce),
            hash: SigningHash::new(),
            header_aad: Some(header.header),
            pending: None,
            first_capacity,
        })
    }

    /// Data capacity of the next block to be queued.
    pub(crate) fn next_capacity(&self) -> usize {
        if self.header_aad.is_some() && self.pending.is_none() {
            self.first_capacity
        } else {
            BLOCK_SIZE
        }
    }

    /// Queue a filled block. The previously queued block is sealed now that
    /// its `nextlen` is known.
    pub(crate) fn push(&mut self, block: Block) -> Result<(), CovertError> {
        debug_assert!(block.len() <= MAX_BLOCK_DATA);
        if let Some(prev) = self.pending.take() {
            self.seal(prev, block.len())?;
        }
        self.pending = Some(block);
        Ok(())
    }

    fn seal(&mut self, block: Block, nextlen: usize) -> Result<(), CovertError> {
        let mut plaintext = Zeroizing::new(Vec::with_capacity(block.len() + 3));
        plaintext.extend_from_slice(&block.data);
        plaintext.extend_from_slice(&(nextlen as u32).to_le_bytes()[..3]);
        let aad = self.header_aad.take().unwrap_or_default();
        let nonce = self.nonce.next();
        let ciphertext = aead::seal(&self.key, &nonce, &aad, &plaintext);
        self.hash.update(&ciphertext[ciphertext.len() - TAG_SIZE..]);
        self.out.write_all(&ciphertext)?;
        Ok(())
    }

    /// Seal the last block with a zero `nextlen`. An entirely empty stream
    /// still gets one empty block so the file can authenticate at all.
    pub(crate) fn finish(mut self) -> Result<[u8; 64], CovertError> {
        match self.pending.take() {
            Some(last) => self.seal(last, 0)?,
            None => {
                let empty = Block::with_capacity(0);
                self.seal(empty, 0)?;
            }
        }
        Ok(self.hash.value())
    }
}

/// Decrypting reader: yields plaintext blocks after a successful blind
/// search, then hands out the trailing signature blocks.
pub(crate) struct BlockReader<R: Read> {
    inp: R,
    buf: Vec<u8>,
    pos: usize,
    key: Zeroizing<[u8; 32]>,
    nonce: NonceCounter,
    hash: SigningHash,
    first: Option<Zeroizing<Vec<u8>>>,
    nextlen: usize,
}

impl<R: Read> BlockReader<R> {
    /// Take over after the header search: `probe` is everything read so
    /// far, `header` the authenticated search result.
    pub(crate) fn new(inp: R, probe: Vec<u8>, header: &Header) -> Result<Self, CovertError> {
        let key = header.key.clone().ok_or(CovertError::AuthFail)?;
        let block0 = header.block0.clone().ok_or(CovertError::AuthFail)?;

        let mut nonce = NonceCounter::new(header.nonce);
        nonce.next(); // consumed by block 0

        let mut hash = SigningHash::new();
        hash.update(header.block0_tag());

        let mut data = block0;
        let l = data.len();
        debug_assert!(l >= 3);
        let nextlen =
            u32::from_le_bytes([data[l - 3], data[l - 2], data[l - 1], 0]) as usize;
        data.truncate(l - 3);

        Ok(Self {
            inp,
            pos: header.block0_end,
            buf: probe,
            key,
            nonce,
            hash,
            first: Some(data),
            nextlen,
        })
    }

    /// The next plaintext block, or None after the terminating block.
    /// Truncated or tampered transport is an authentication failure.
    pub(crate) fn next_block(&mut self) -> Result<Option<Zeroizing<Vec<u8>>>, CovertError> {
        if let Some(first) = self.first.take() {
            return Ok(Some(first));
        }
        if self.nextlen == 0 {
            return Ok(None);
        }
        let extlen = self.nextlen + BLOCK_OVERHEAD;
        let mut ciphertext = vec![0u8; extlen];
        if !self.fill_exact(&mut ciphertext)? {
            return Err(CovertError::AuthFail);
        }
        let nonce = self.nonce.next();
        let plaintext = aead::open(&self.key, &nonce, b"", &ciphertext)?;
        self.hash.update(&ciphertext[extlen - TAG_SIZE..]);
        let mut data = Zeroizing::new(plaintext);
        let l = data.len();
        self.nextlen = u32::from_le_bytes([data[l - 3], data[l - 2], data[l - 1], 0]) as usize;
        data.truncate(l - 3);
        Ok(Some(data))
    }

    /// SHA-512 chain over all tags seen so far; the filehash once the
    /// terminating block has been read.
    pub(crate) fn filehash(&self) -> [u8; 64] {
        self.hash.value()
    }

    /// Read an exact trailer (signature block) from the transport.
    /// Returns None when the transport has no more bytes at all.
    pub(crate) fn read_trailer(&mut self, len: usize) -> Result<Option<Vec<u8>>, CovertError> {
        let mut out = vec![0u8; len];
        if self.fill_exact(&mut out)? {
            Ok(Some(out))
        } else {
            Ok(None)
        }
    }

    fn fill_exact(&mut self, out: &mut [u8]) -> Result<bool, CovertError> {
        let mut filled = 0;
        let avail = self.buf.len() - self.pos;
        if avail > 0 {
            let take = avail.min(out.len());
            out[..take].copy_from_slice(&self.buf[self.pos..self.pos + take]);
            self.pos += take;
            filled = take;
        }
        while filled < out.len() {
            match self.inp.read(&mut out[filled..]) {
                Ok(0) => return Ok(false),
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CovertError::Io(e)),
            }
        }
        Ok(true)
    }
}
