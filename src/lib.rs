//! Covert: file and message encryption whose output is indistinguishable
//! from uniform random bytes.
//!
//! A covert file has no magic numbers, no plaintext recipient identifiers
//! and no length leakage beyond a bounded random envelope. One file may
//! carry a text message and any number of attachments, may be opened by up
//! to twenty recipients (X25519 keys or passphrases, or nobody at all in
//! wide-open mode) and may be signed by one or more senders.
//!
//! The pipeline has four layers: crypto primitives, the header with its
//! blind-searchable authentication slots, the authenticated block stream,
//! and the MessagePack-framed inner archive. [`encrypt`] and [`decrypt`]
//! drive the whole stack; [`archive_reader`] exposes the streaming decoder
//! for callers that do not want attachments materialized in memory.
//!
//! ```no_run
//! use covert::{decrypt, encrypt, DecryptKey, EncryptOptions, Identity, Recipient};
//! use rand::rngs::OsRng;
//!
//! let mut rng = OsRng;
//! let alice = Identity::generate(&mut rng);
//! let opts = EncryptOptions {
//!     recipients: vec![Recipient::PublicKey(*alice.public_key())],
//!     ..Default::default()
//! };
//! let mut file = Vec::new();
//! encrypt(&mut rng, &opts, Some("hello"), Vec::new(), &mut file).unwrap();
//! let opened = decrypt(&[DecryptKey::Identity(alice)], file.as_slice()).unwrap();
//! assert_eq!(opened.message, "hello");
//! ```

pub mod archive;
pub mod armor;
pub mod errors;
pub mod msgpack;
pub mod passphrase;
pub mod pubkey;
pub mod sign;
pub mod util;

mod aead;
mod blockstream;
mod elligator;
mod fe;
mod header;
mod xeddsa;

use std::io::{Read, Write};

use rand::{CryptoRng, RngCore};

pub use archive::{
    ArchiveReader, ArchiveTrailer, FileInput, FileMeta, SignatureVerdict, SignerRef,
};
pub use errors::CovertError;
pub use msgpack::Value;
pub use passphrase::{Passphrase, PwHash};
pub use pubkey::{DecryptKey, Identity, Recipient};
pub use sign::{sign_detached, verify_detached, SIGNATURE_BLOCK_SIZE};
pub use util::CancelFlag;

use archive::ArchiveEncoder;
use blockstream::{Block, BlockReader, BlockWriter};

/// Knobs for one encryption.
pub struct EncryptOptions {
    /// Who can open the file. Duplicates are dropped.
    pub recipients: Vec<Recipient>,
    /// Identities that sign the file; each appends an 80-byte trailer and
    /// is listed in the authenticated index.
    pub signers: Vec<Identity>,
    /// No authentication at all: the file key is 32 zero bytes and anyone
    /// can open the file. Mutually exclusive with recipients.
    pub wide_open: bool,
    /// Padding proportion. 0 disables padding; the default is 0.05 and
    /// anything up to 3.0 (300 %) is accepted.
    pub pad: f64,
    /// Extra random auth slots inserted to obscure the recipient count.
    pub decoys: usize,
    /// Checked between blocks; cancellation surfaces as an interrupted
    /// i/o error.
    pub cancel: Option<CancelFlag>,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            signers: Vec::new(),
            wide_open: false,
            pad: 0.05,
            decoys: 0,
            cancel: None,
        }
    }
}

/// What the encoder can report after the fact.
#[derive(Debug)]
pub struct EncryptSummary {
    /// SHA-512 chain over the block tags; what signatures cover.
    pub filehash: [u8; 64],
    /// Padding bytes that were appended inside the archive.
    pub padding: u64,
}

/// Encrypt a message and/or attachments to `out`.
///
/// The message is normalized (trailing whitespace, CRLF, surrounding blank
/// lines) before encryption. Randomness is drawn only from `rng`; pass
/// [`rand::rngs::OsRng`] outside of tests.
pub fn encrypt<RNG: RngCore + CryptoRng, W: Write>(
    rng: &mut RNG,
    opts: &EncryptOptions,
    message: Option<&str>,
    attachments: Vec<FileInput>,
    out: &mut W,
) -> Result<EncryptSummary, CovertError> {
    if !(0.0..=3.0).contains(&opts.pad) {
        return Err(CovertError::Format(
            "invalid padding specified, the valid range is 0 to 300 %".into(),
        ));
    }
    let mut files = Vec::new();
    if let Some(text) = message {
        files.push(FileInput::message(&util::normalize_message(text)));
    }
    files.extend(attachments);

    let signer_refs: Vec<SignerRef> = opts
        .signers
        .iter()
        .map(|id| SignerRef {
            name: id.name().map(String::from),
            pk: *id.public_key(),
        })
        .collect();

    let header = header::encrypt_header(rng, opts.wide_open, &opts.recipients, opts.decoys)?;
    let mut encoder = ArchiveEncoder::new(files, signer_refs, Vec::new(), opts.pad);
    let mut writer = BlockWriter::new(out, header)?;
    loop {
        if let Some(cancel) = &opts.cancel {
            cancel.check()?;
        }
        let mut block = Block::with_capacity(writer.next_capacity());
        encoder.encode_into(rng, &mut block)?;
        if block.is_empty() {
            break;
        }
        writer.push(block)?;
    }
    let filehash = writer.finish()?;
    for id in &opts.signers {
        out.write_all(&sign::sign_detached(rng, id, &filehash))?;
    }
    Ok(EncryptSummary { filehash, padding: encoder.padding() })
}

/// One decrypted attachment, fully materialized.
#[derive(Debug)]
pub struct DecryptedFile {
    pub name: String,
    pub exec: bool,
    pub extra: Vec<(String, Value)>,
    pub data: Vec<u8>,
}

/// Everything [`decrypt`] recovers from a file.
#[derive(Debug)]
pub struct Decrypted {
    /// The text message; empty if the file carries none.
    pub message: String,
    pub files: Vec<DecryptedFile>,
    /// Verdicts for the signers listed in the index.
    pub signatures: Vec<SignatureVerdict>,
    pub filehash: [u8; 64],
    pub padding: u64,
}

/// Decrypt a whole file into memory, trying each offered key in turn.
///
/// Wrong keys, tampering and truncation all yield the same
/// [`CovertError::AuthFail`].
pub fn decrypt<R: Read>(keys: &[DecryptKey], inp: R) -> Result<Decrypted, CovertError> {
    let mut reader = archive_reader(keys, inp, None)?;
    let mut message = Vec::new();
    let mut files = Vec::new();
    while let Some(idx) = reader.next_file()? {
        let meta = reader.files()[idx].clone();
        let mut data = Vec::new();
        while let Some(chunk) = reader.read_data()? {
            data.extend_from_slice(chunk);
        }
        match meta.name {
            // Multiple messages concatenate in order
            None => message.extend_from_slice(&data),
            Some(name) => files.push(DecryptedFile {
                name,
                exec: meta.exec,
                extra: meta.extra,
                data,
            }),
        }
    }
    let trailer = reader.finish()?;
    let message = String::from_utf8(message)
        .map_err(|_| CovertError::Format("message is not valid UTF-8".into()))?;
    Ok(Decrypted {
        message,
        files,
        signatures: trailer.signatures,
        filehash: trailer.filehash,
        padding: trailer.padding,
    })
}

/// Open a file for streaming decryption: run the blind header search with
/// the offered keys and return the archive decoder positioned at the first
/// entry.
pub fn archive_reader<R: Read>(
    keys: &[DecryptKey],
    mut inp: R,
    cancel: Option<CancelFlag>,
) -> Result<ArchiveReader<R>, CovertError> {
    // The header and block 0 live inside the first kilobyte
    let mut probe = vec![0u8; 1024];
    let mut filled = 0;
    while filled < probe.len() {
        match inp.read(&mut probe[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CovertError::Io(e)),
        }
    }
    probe.truncate(filled);

    let mut hdr = header::Header::new(&probe)?;
    if !hdr.authenticated() {
        for key in keys {
            if let Some(cancel) = &cancel {
                cancel.check()?;
            }
            let found = match key {
                DecryptKey::Identity(id) => hdr.try_identity(id),
                DecryptKey::Passphrase(pwhash) => hdr.try_passphrase(pwhash),
            };
            if found {
                break;
            }
        }
    }
    if !hdr.authenticated() {
        // Wide-open files hidden behind decoy slots are the last resort
        hdr.try_zero_slots();
    }
    if !hdr.authenticated() {
        return Err(CovertError::AuthFail);
    }
    let blocks = BlockReader::new(inp, probe, &hdr)?;
    ArchiveReader::new(blocks, cancel)
}
