//! The inner archive: index, file payloads and padding.
//!
//! The archive is what the block stream encrypts. It is either a short
//! form (a single MessagePack integer naming the length of one anonymous
//! payload) or an advanced form: an index map under key `f` listing
//! entries `[size, name, meta]`, followed by the concatenated payloads in
//! index order, followed by padding. Padding is a run of MessagePack nil
//! bytes (`0xC0`), legal at any position where the decoder expects an
//! object.
//!
//! Entries with a nil size are streamed: their payload is a sequence of
//! MessagePack integers each announcing the next chunk length, terminated
//! by a zero. Entries with a nil name carry the text message rather than
//! an attachment.
//!
//! Index key `s` may list the signers whose 80-byte signature blocks
//! follow the terminating block; listing them binds the signatures into
//! the authenticated data, making later removal detectable.

use std::io::Read;

use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::blockstream::{Block, BlockReader};
use crate::errors::CovertError;
use crate::msgpack::{self, Decoded, Value, NIL};
use crate::sign;
use crate::util::{self, CancelFlag};

/// Chunk size for streamed (unknown-length) payloads.
const STREAM_CHUNK: usize = 1 << 20;

/// A MessagePack object inside the archive may span blocks, but not grow
/// beyond this: larger means corruption.
const MAX_OBJECT_SPAN: usize = (1 << 20) + 1024;

fn fmt_err(msg: impl Into<String>) -> CovertError {
    CovertError::Format(msg.into())
}

/// Metadata for one archive entry.
#[derive(Clone, Debug, Default)]
pub struct FileMeta {
    /// None marks the text message; attachments carry a leaf name.
    pub name: Option<String>,
    /// None while the payload length is unknown (streamed entries). Filled
    /// in once the payload has been fully read.
    pub size: Option<u64>,
    /// POSIX executable bit, meta key `x`.
    pub exec: bool,
    /// Unknown multi-character meta keys, preserved verbatim for
    /// round-tripping.
    pub extra: Vec<(String, Value)>,
}

/// Leaf-name validation: attached file names are not paths.
pub(crate) fn validate_name(name: &str) -> Result<(), CovertError> {
    if name.is_empty() || name.len() > 255 {
        return Err(fmt_err("invalid filename length"));
    }
    if name.chars().any(char::is_control) {
        return Err(fmt_err("control characters in filename"));
    }
    if name.contains(['/', '\\', ':']) {
        return Err(fmt_err(format!("invalid filename {name:?}")));
    }
    Ok(())
}

/// One input to the encoder: metadata plus a byte source.
pub struct FileInput {
    pub(crate) meta: FileMeta,
    pub(crate) reader: Box<dyn Read>,
}

impl FileInput {
    /// The text message, already normalized by the caller.
    pub fn message(text: &str) -> Self {
        let bytes = util::encode_str(text);
        Self {
            meta: FileMeta { name: None, size: Some(bytes.len() as u64), ..Default::default() },
            reader: Box::new(std::io::Cursor::new(bytes)),
        }
    }

    /// An in-memory attachment with a known size.
    pub fn attachment(name: &str, data: Vec<u8>) -> Result<Self, CovertError> {
        let name = normalize_name(name)?;
        Ok(Self {
            meta: FileMeta {
                name: Some(name),
                size: Some(data.len() as u64),
                ..Default::default()
            },
            reader: Box::new(std::io::Cursor::new(data)),
        })
    }

    /// An attachment read from `reader` with a known size. The encoder
    /// errors out if the reader runs dry early.
    pub fn sized_reader(
        name: &str,
        size: u64,
        reader: Box<dyn Read>,
    ) -> Result<Self, CovertError> {
        let name = normalize_name(name)?;
        Ok(Self {
            meta: FileMeta { name: Some(name), size: Some(size), ..Default::default() },
            reader,
        })
    }

    /// An attachment of unknown length, encoded as a chunked stream.
    pub fn streamed(name: &str, reader: Box<dyn Read>) -> Result<Self, CovertError> {
        let name = normalize_name(name)?;
        Ok(Self {
            meta: FileMeta { name: Some(name), size: None, ..Default::default() },
            reader,
        })
    }

    /// Set the executable bit.
    pub fn executable(mut self, exec: bool) -> Self {
        self.meta.exec = exec;
        self
    }

    /// Attach a custom metadata key. Multi-character keys are the
    /// user-extension space and survive decode/re-encode; single-character
    /// keys are reserved by the format.
    pub fn meta_extra(mut self, key: &str, value: Value) -> Result<Self, CovertError> {
        if key.len() <= 1 {
            return Err(fmt_err(format!("reserved metadata key {key:?}")));
        }
        self.meta.extra.push((key.to_string(), value));
        Ok(self)
    }
}

fn normalize_name(name: &str) -> Result<String, CovertError> {
    let normalized = String::from_utf8(util::encode_str(name)).expect("NFKC output is UTF-8");
    validate_name(&normalized)?;
    Ok(normalized)
}

/// A signer bound into the index (name optional, key mandatory).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignerRef {
    pub name: Option<String>,
    pub pk: [u8; 32],
}

/// Verdict for one listed signer after trailer verification.
#[derive(Clone, Debug)]
pub struct SignatureVerdict {
    pub signer: SignerRef,
    pub valid: bool,
}

#[derive(Clone, Copy)]
enum EncodeStage {
    Index,
    File,
    FileStream,
    Finalize,
    Pad(u64),
    End,
}

/// Streaming archive encoder: pulled block by block from the encrypt
/// pipeline, it never holds more than one chunk of any payload in memory.
pub(crate) struct ArchiveEncoder {
    files: Vec<FileInput>,
    signers: Vec<SignerRef>,
    extra_index: Vec<(String, Value)>,
    pad: f64,
    stage: EncodeStage,
    fidx: usize,
    fpos: u64,
    buffer: Vec<u8>,
    bufpos: usize,
    written: u64,
    padding: u64,
}

impl ArchiveEncoder {
    pub(crate) fn new(
        files: Vec<FileInput>,
        signers: Vec<SignerRef>,
        extra_index: Vec<(String, Value)>,
        pad: f64,
    ) -> Self {
        Self {
            files,
            signers,
            extra_index,
            pad,
            stage: EncodeStage::Index,
            fidx: 0,
            fpos: 0,
            buffer: Vec::new(),
            bufpos: 0,
            written: 0,
            padding: 0,
        }
    }

    /// The padding size, decided when the last payload byte was written.
    pub(crate) fn padding(&self) -> u64 {
        self.padding
    }

    pub(crate) fn finished(&self) -> bool {
        matches!(self.stage, EncodeStage::End) && self.bufpos >= self.buffer.len()
    }

    /// Fill `block` with as much archive data as fits.
    pub(crate) fn encode_into<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        block: &mut Block,
    ) -> Result<(), CovertError> {
        while block.space_left() > 0 && !self.finished() {
            // Flush buffered bytes first
            if self.bufpos < self.buffer.len() {
                self.bufpos += block.extend(&self.buffer[self.bufpos..]);
                continue;
            }
            match self.stage {
                EncodeStage::Index => {
                    self.set_buffer(self.encode_index());
                    self.next_file();
                }
                EncodeStage::File => {
                    let size = self.files[self.fidx].meta.size.expect("fixed entry has size");
                    let left = size - self.fpos;
                    if left == 0 {
                        self.next_file();
                        continue;
                    }
                    let max = usize::try_from(left).unwrap_or(usize::MAX);
                    let n = block.fill_from(self.files[self.fidx].reader.as_mut(), max)?;
                    if n == 0 {
                        let name = self.files[self.fidx]
                            .meta
                            .name
                            .clone()
                            .unwrap_or_else(|| "<message>".into());
                        return Err(fmt_err(format!(
                            "unexpected end of input {name} at {} of {size} bytes",
                            self.fpos
                        )));
                    }
                    self.fpos += n as u64;
                    self.written += n as u64;
                }
                EncodeStage::FileStream => {
                    let mut chunk = vec![0u8; STREAM_CHUNK];
                    let n = read_some(self.files[self.fidx].reader.as_mut(), &mut chunk)?;
                    let mut framed = Vec::with_capacity(9 + n);
                    msgpack::encode_uint(&mut framed, n as u64);
                    if n == 0 {
                        // zero chunk terminates; the true size is now known
                        self.files[self.fidx].meta.size = Some(self.fpos);
                        self.set_buffer(framed);
                        self.next_file();
                    } else {
                        framed.extend_from_slice(&chunk[..n]);
                        self.fpos += n as u64;
                        self.set_buffer(framed);
                    }
                }
                EncodeStage::Finalize => {
                    self.padding = util::random_padding(rng, self.written, self.pad);
                    self.stage = EncodeStage::Pad(self.padding);
                }
                EncodeStage::Pad(remaining) => {
                    if remaining == 0 {
                        self.stage = EncodeStage::End;
                        continue;
                    }
                    let want = usize::try_from(remaining).unwrap_or(usize::MAX);
                    let n = block.pad(want, NIL);
                    self.stage = EncodeStage::Pad(remaining - n as u64);
                }
                EncodeStage::End => unreachable!("loop guards on finished"),
            }
        }
        Ok(())
    }

    fn set_buffer(&mut self, bytes: Vec<u8>) {
        self.written += bytes.len() as u64;
        self.buffer = bytes;
        self.bufpos = 0;
    }

    fn next_file(&mut self) {
        match self.stage {
            EncodeStage::Index => self.fidx = 0,
            EncodeStage::File | EncodeStage::FileStream => self.fidx += 1,
            _ => {}
        }
        self.fpos = 0;
        if self.fidx >= self.files.len() {
            self.stage = EncodeStage::Finalize;
            return;
        }
        self.stage = if self.files[self.fidx].meta.size.is_some() {
            EncodeStage::File
        } else {
            EncodeStage::FileStream
        };
    }

    /// Short form when a single anonymous sized payload is all there is;
    /// otherwise the full index map.
    fn encode_index(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if self.signers.is_empty() && self.extra_index.is_empty() && self.files.len() == 1 {
            let m = &self.files[0].meta;
            if m.name.is_none() && !m.exec && m.extra.is_empty() {
                if let Some(size) = m.size {
                    msgpack::encode_uint(&mut out, size);
                    return out;
                }
            }
        }
        let mut map: Vec<(Value, Value)> = Vec::new();
        if !self.files.is_empty() {
            let entries: Vec<Value> = self
                .files
                .iter()
                .map(|file| {
                    let m = &file.meta;
                    let size = m.size.map_or(Value::Nil, Value::UInt);
                    let name = m.name.clone().map_or(Value::Nil, Value::Str);
                    let mut meta = Vec::new();
                    if m.exec {
                        meta.push((Value::Str("x".into()), Value::Bool(true)));
                    }
                    for (k, v) in &m.extra {
                        meta.push((Value::Str(k.clone()), v.clone()));
                    }
                    Value::Array(vec![size, name, Value::Map(meta)])
                })
                .collect();
            map.push((Value::Str("f".into()), Value::Array(entries)));
        }
        if !self.signers.is_empty() {
            let signers: Vec<Value> = self
                .signers
                .iter()
                .map(|s| {
                    Value::Array(vec![
                        s.name.clone().map_or(Value::Nil, Value::Str),
                        Value::Bin(s.pk.to_vec()),
                    ])
                })
                .collect();
            map.push((Value::Str("s".into()), Value::Array(signers)));
        }
        for (k, v) in &self.extra_index {
            map.push((Value::Str(k.clone()), v.clone()));
        }
        msgpack::encode_value(&mut out, &Value::Map(map));
        out
    }
}

fn read_some(reader: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<usize> {
    loop {
        match reader.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

#[derive(Clone, Copy)]
enum DecodeStage {
    /// Between entries.
    NextFile,
    Fixed { remaining: u64 },
    /// `remaining` bytes left of the current chunk; zero means the next
    /// chunk length has yet to be read.
    Stream { remaining: u64 },
    /// All entries consumed; only padding may follow.
    Trailer,
}

/// Streaming archive decoder over an authenticated block stream.
///
/// Drive it with [`next_file`](Self::next_file) / [`read_data`](Self::read_data),
/// then call [`finish`](Self::finish) to validate the trailer and verify
/// any listed signatures.
pub struct ArchiveReader<R: Read> {
    blocks: BlockReader<R>,
    buf: Zeroizing<Vec<u8>>,
    pos: usize,
    files: Vec<FileMeta>,
    signers: Vec<SignerRef>,
    extra_index: Vec<(String, Value)>,
    stage: DecodeStage,
    current: Option<usize>,
    fidx: usize,
    stream_total: u64,
    padding: u64,
    cancel: Option<CancelFlag>,
}

/// What remains after the payloads: the filehash and signature verdicts.
pub struct ArchiveTrailer {
    pub filehash: [u8; 64],
    pub signatures: Vec<SignatureVerdict>,
    /// Padding bytes skipped while decoding.
    pub padding: u64,
}

impl<R: Read> ArchiveReader<R> {
    pub(crate) fn new(
        blocks: BlockReader<R>,
        cancel: Option<CancelFlag>,
    ) -> Result<Self, CovertError> {
        let mut reader = Self {
            blocks,
            buf: Zeroizing::new(Vec::new()),
            pos: 0,
            files: Vec::new(),
            signers: Vec::new(),
            extra_index: Vec::new(),
            stage: DecodeStage::NextFile,
            current: None,
            fidx: 0,
            stream_total: 0,
            padding: 0,
            cancel,
        };
        reader.read_index()?;
        Ok(reader)
    }

    /// Entries named by the index. Streamed sizes are filled in as their
    /// payloads complete.
    pub fn files(&self) -> &[FileMeta] {
        &self.files
    }

    /// Signers the index binds into the authenticated data.
    pub fn signers(&self) -> &[SignerRef] {
        &self.signers
    }

    /// Unknown multi-character index keys, preserved for round-tripping.
    pub fn extra_index(&self) -> &[(String, Value)] {
        &self.extra_index
    }

    /// Advance to the next entry, discarding any unread data of the
    /// current one. Returns the entry's index, or None after the last.
    pub fn next_file(&mut self) -> Result<Option<usize>, CovertError> {
        while self.read_data()?.is_some() {}
        if self.fidx >= self.files.len() {
            self.stage = DecodeStage::Trailer;
            return Ok(None);
        }
        let idx = self.fidx;
        self.fidx += 1;
        self.current = Some(idx);
        self.stage = match self.files[idx].size {
            Some(size) => DecodeStage::Fixed { remaining: size },
            None => {
                self.stream_total = 0;
                DecodeStage::Stream { remaining: 0 }
            }
        };
        Ok(Some(idx))
    }

    /// The next chunk of the current entry's payload, or None at its end.
    pub fn read_data(&mut self) -> Result<Option<&[u8]>, CovertError> {
        loop {
            if let Some(cancel) = &self.cancel {
                cancel.check()?;
            }
            match self.stage {
                DecodeStage::Fixed { remaining: 0 } => {
                    self.stage = DecodeStage::NextFile;
                    self.current = None;
                    return Ok(None);
                }
                DecodeStage::Fixed { remaining } => {
                    if !self.ensure_data()? {
                        return Err(fmt_err("unexpected end of archive data"));
                    }
                    let avail = self.buf.len() - self.pos;
                    let take = (remaining.min(avail as u64)) as usize;
                    let start = self.pos;
                    self.pos += take;
                    self.stage = DecodeStage::Fixed { remaining: remaining - take as u64 };
                    return Ok(Some(&self.buf[start..start + take]));
                }
                DecodeStage::Stream { remaining: 0 } => {
                    // Next chunk length; padding nils may precede it
                    let len = loop {
                        match self.read_value()? {
                            Some(Value::Nil) => self.padding += 1,
                            Some(v) => {
                                break v.as_size().ok_or_else(|| {
                                    fmt_err("expected file chunk size, got something else")
                                })?
                            }
                            None => return Err(fmt_err("unexpected end of archive data")),
                        }
                    };
                    if len == 0 {
                        let idx = self.current.expect("stream stage has a current file");
                        self.files[idx].size = Some(self.stream_total);
                        self.stage = DecodeStage::NextFile;
                        self.current = None;
                        return Ok(None);
                    }
                    self.stream_total += len;
                    self.stage = DecodeStage::Stream { remaining: len };
                }
                DecodeStage::Stream { remaining } => {
                    if !self.ensure_data()? {
                        return Err(fmt_err("unexpected end of archive data"));
                    }
                    let avail = self.buf.len() - self.pos;
                    let take = (remaining.min(avail as u64)) as usize;
                    let start = self.pos;
                    self.pos += take;
                    self.stage = DecodeStage::Stream { remaining: remaining - take as u64 };
                    return Ok(Some(&self.buf[start..start + take]));
                }
                DecodeStage::NextFile | DecodeStage::Trailer => return Ok(None),
            }
        }
    }

    /// Consume trailing padding, then read and verify one signature block
    /// per listed signer.
    pub fn finish(mut self) -> Result<ArchiveTrailer, CovertError> {
        while self.next_file()?.is_some() {}
        // Only nil padding may remain inside the block stream
        while self.ensure_data()? {
            while self.pos < self.buf.len() && self.buf[self.pos] == NIL {
                let run = self.buf[self.pos..].iter().take_while(|&&b| b == NIL).count();
                self.pos += run;
                self.padding += run as u64;
            }
            if self.pos < self.buf.len() {
                return Err(fmt_err("invalid data after archive end"));
            }
        }
        let filehash = self.blocks.filehash();
        let mut signatures = Vec::with_capacity(self.signers.len());
        for signer in &self.signers {
            let block = self
                .blocks
                .read_trailer(sign::SIGNATURE_BLOCK_SIZE)?
                .ok_or(CovertError::AuthFail)?;
            let valid = sign::verify_detached(&signer.pk, &filehash, &block).is_ok();
            signatures.push(SignatureVerdict { signer: signer.clone(), valid });
        }
        Ok(ArchiveTrailer { filehash, signatures, padding: self.padding })
    }

    fn ensure_data(&mut self) -> Result<bool, CovertError> {
        while self.pos >= self.buf.len() {
            if let Some(cancel) = &self.cancel {
                cancel.check()?;
            }
            match self.blocks.next_block()? {
                Some(block) => {
                    self.buf = block;
                    self.pos = 0;
                }
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Decode one MessagePack object, pulling more blocks while it
    /// straddles a boundary. None at clean end-of-stream.
    fn read_value(&mut self) -> Result<Option<Value>, CovertError> {
        if !self.ensure_data()? {
            return Ok(None);
        }
        loop {
            match msgpack::decode(&self.buf[self.pos..])? {
                Decoded::Complete(v, n) => {
                    self.pos += n;
                    return Ok(Some(v));
                }
                Decoded::Incomplete => {
                    let Some(next) = self.blocks.next_block()? else {
                        return Err(fmt_err("unexpected end of archive data"));
                    };
                    let mut joined =
                        Zeroizing::new(Vec::with_capacity(self.buf.len() - self.pos + next.len()));
                    joined.extend_from_slice(&self.buf[self.pos..]);
                    joined.extend_from_slice(&next);
                    self.buf = joined;
                    self.pos = 0;
                    if self.buf.len() > MAX_OBJECT_SPAN {
                        return Err(fmt_err("extremely large msgpack object"));
                    }
                }
            }
        }
    }

    fn read_index(&mut self) -> Result<(), CovertError> {
        let first = loop {
            match self.read_value()? {
                // An empty inner stream is an empty archive
                None => return Ok(()),
                Some(Value::Nil) => self.padding += 1,
                Some(v) => break v,
            }
        };
        match first {
            Value::UInt(size) => {
                // Short form: one anonymous payload
                self.files.push(FileMeta { size: Some(size), ..Default::default() });
                Ok(())
            }
            Value::Int(_) => Err(fmt_err("negative file size in archive")),
            Value::Map(pairs) => {
                let (files, signers, extra) = parse_index(pairs)?;
                self.files = files;
                self.signers = signers;
                self.extra_index = extra;
                Ok(())
            }
            _ => Err(fmt_err("archive index not found")),
        }
    }
}

type ParsedIndex = (Vec<FileMeta>, Vec<SignerRef>, Vec<(String, Value)>);

fn parse_index(pairs: Vec<(Value, Value)>) -> Result<ParsedIndex, CovertError> {
    let mut files = Vec::new();
    let mut signers = Vec::new();
    let mut extra_index = Vec::new();
    for (k, v) in pairs {
        let key = k.as_str().ok_or_else(|| fmt_err("index keys must be strings"))?;
        match key {
            "f" => {
                let Value::Array(entries) = v else {
                    return Err(fmt_err("invalid file list in index"));
                };
                for entry in entries {
                    files.push(parse_entry(entry)?);
                }
            }
            "s" => {
                let Value::Array(entries) = v else {
                    return Err(fmt_err("invalid signer list in index"));
                };
                for entry in entries {
                    signers.push(parse_signer(entry)?);
                }
            }
            _ if key.len() == 1 => {
                return Err(fmt_err(format!("reserved index key {key:?}")));
            }
            _ => extra_index.push((key.to_string(), v)),
        }
    }
    Ok((files, signers, extra_index))
}

fn parse_entry(entry: Value) -> Result<FileMeta, CovertError> {
    let Value::Array(items) = entry else {
        return Err(fmt_err("invalid index entry"));
    };
    if items.len() < 2 || items.len() > 3 {
        return Err(fmt_err("invalid index entry"));
    }
    let size = match &items[0] {
        Value::Nil => None,
        v => Some(v.as_size().ok_or_else(|| fmt_err("invalid or negative file size"))?),
    };
    let name = match &items[1] {
        Value::Nil => None,
        Value::Str(s) => {
            validate_name(s)?;
            Some(s.clone())
        }
        _ => return Err(fmt_err("invalid filename in index")),
    };
    let mut exec = false;
    let mut extra = Vec::new();
    if let Some(meta) = items.get(2) {
        let Value::Map(pairs) = meta else {
            return Err(fmt_err("invalid entry metadata"));
        };
        for (k, v) in pairs {
            let key = k.as_str().ok_or_else(|| fmt_err("metadata keys must be strings"))?;
            match key {
                "x" => match v {
                    Value::Bool(b) => exec = *b,
                    _ => return Err(fmt_err("invalid executable flag")),
                },
                _ if key.len() == 1 => {
                    return Err(fmt_err(format!("reserved metadata key {key:?}")));
                }
                _ => extra.push((key.to_string(), v.clone())),
            }
        }
    }
    Ok(FileMeta { name, size, exec, extra })
}

fn parse_signer(entry: Value) -> Result<SignerRef, CovertError> {
    // [name, pk] pairs; a bare 32-byte bin is accepted as an unnamed signer
    let (name, pk) = match entry {
        Value::Array(items) if items.len() == 2 => {
            let name = match &items[0] {
                Value::Nil => None,
                Value::Str(s) => Some(s.clone()),
                _ => return Err(fmt_err("invalid signer name")),
            };
            let Value::Bin(pk) = &items[1] else {
                return Err(fmt_err("invalid signer key"));
            };
            (name, pk.clone())
        }
        Value::Bin(pk) => (None, pk),
        _ => return Err(fmt_err("invalid signer entry")),
    };
    let pk: [u8; 32] = pk
        .as_slice()
        .try_into()
        .map_err(|_| fmt_err("signer key must be 32 bytes"))?;
    Ok(SignerRef { name, pk })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockstream::Block;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn drain(encoder: &mut ArchiveEncoder, rng: &mut StdRng) -> Vec<u8> {
        let mut out = Vec::new();
        while !encoder.finished() {
            let mut block = Block::with_capacity(4096);
            encoder.encode_into(rng, &mut block).unwrap();
            if block.is_empty() {
                break;
            }
            out.extend_from_slice(block.as_slice_for_tests());
        }
        out
    }

    #[test]
    fn empty_message_short_form() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut enc =
            ArchiveEncoder::new(vec![FileInput::message("")], Vec::new(), Vec::new(), 0.0);
        let bytes = drain(&mut enc, &mut rng);
        assert_eq!(bytes, [0x00]);
    }

    #[test]
    fn short_message_short_form() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut enc =
            ArchiveEncoder::new(vec![FileInput::message("test")], Vec::new(), Vec::new(), 0.0);
        let bytes = drain(&mut enc, &mut rng);
        assert_eq!(bytes, b"\x04test");
    }

    #[test]
    fn message_plus_attachment_advanced_form() {
        let mut rng = StdRng::seed_from_u64(3);
        let files = vec![
            FileInput::message("hi"),
            FileInput::attachment("a.txt", b"abc".to_vec()).unwrap(),
        ];
        let mut enc = ArchiveEncoder::new(files, Vec::new(), Vec::new(), 0.0);
        let bytes = drain(&mut enc, &mut rng);
        // {"f": [[2, nil, {}], [3, "a.txt", {}]]} "hi" "abc"
        let expected: &[u8] = &[
            0x81, 0xa1, b'f', 0x92, 0x93, 0x02, 0xc0, 0x80, 0x93, 0x03, 0xa5, b'a', b'.', b't',
            b'x', b't', 0x80, b'h', b'i', b'a', b'b', b'c',
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn padding_is_trailing_nil_run() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut enc =
            ArchiveEncoder::new(vec![FileInput::message("test")], Vec::new(), Vec::new(), 0.05);
        let bytes = drain(&mut enc, &mut rng);
        assert!(bytes.starts_with(b"\x04test"));
        let pad = &bytes[5..];
        assert_eq!(pad.len() as u64, enc.padding());
        assert!(pad.iter().all(|&b| b == NIL));
        // fixed floor: a 5-byte archive is padded to at least 25 bytes
        assert!(bytes.len() >= 25, "got {}", bytes.len());
    }

    #[test]
    fn executable_bit_in_meta() {
        let mut rng = StdRng::seed_from_u64(5);
        let files =
            vec![FileInput::attachment("run.sh", b"#!".to_vec()).unwrap().executable(true)];
        let mut enc = ArchiveEncoder::new(files, Vec::new(), Vec::new(), 0.0);
        let bytes = drain(&mut enc, &mut rng);
        // {"f": [[2, "run.sh", {"x": true}]]} "#!"
        let expected: &[u8] = &[
            0x81, 0xa1, b'f', 0x91, 0x93, 0x02, 0xa6, b'r', b'u', b'n', b'.', b's', b'h', 0x81,
            0xa1, b'x', 0xc3, b'#', b'!',
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("a.txt").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("dir/leaf").is_err());
        assert!(validate_name("back\\slash").is_err());
        assert!(validate_name("col:on").is_err());
        assert!(validate_name("tab\there").is_err());
        assert!(validate_name(&"x".repeat(256)).is_err());
        assert!(validate_name(&"x".repeat(255)).is_ok());
    }

    #[test]
    fn parse_entry_rejects_bad_shapes() {
        assert!(parse_entry(Value::UInt(4)).is_err());
        assert!(parse_entry(Value::Array(vec![Value::UInt(1)])).is_err());
        assert!(parse_entry(Value::Array(vec![Value::Int(-1), Value::Nil, Value::Map(vec![])]))
            .is_err());
        assert!(parse_entry(Value::Array(vec![
            Value::UInt(1),
            Value::UInt(2),
            Value::Map(vec![])
        ]))
        .is_err());
        // reserved single-char meta key
        assert!(parse_entry(Value::Array(vec![
            Value::UInt(1),
            Value::Nil,
            Value::Map(vec![(Value::Str("q".into()), Value::Bool(true))])
        ]))
        .is_err());
        // unknown multi-char meta key is preserved
        let meta = parse_entry(Value::Array(vec![
            Value::UInt(1),
            Value::Nil,
            Value::Map(vec![(Value::Str("mtime".into()), Value::UInt(12345))]),
        ]))
        .unwrap();
        assert_eq!(meta.extra.len(), 1);
    }

    #[test]
    fn parse_index_reserves_single_char_keys() {
        // unknown multi-character keys are kept, single-character rejected
        let ok = parse_index(vec![(Value::Str("note".into()), Value::Str("kept".into()))]);
        let (files, _, extra) = ok.unwrap();
        assert!(files.is_empty());
        assert_eq!(extra.len(), 1);
        assert!(parse_index(vec![(Value::Str("q".into()), Value::UInt(1))]).is_err());
        assert!(parse_index(vec![(Value::UInt(1), Value::UInt(1))]).is_err());
    }

    #[test]
    fn parse_signer_accepts_both_forms() {
        let pk = vec![7u8; 32];
        let named = parse_signer(Value::Array(vec![
            Value::Str("alice".into()),
            Value::Bin(pk.clone()),
        ]))
        .unwrap();
        assert_eq!(named.name.as_deref(), Some("alice"));
        let bare = parse_signer(Value::Bin(pk)).unwrap();
        assert_eq!(bare.name, None);
        assert!(parse_signer(Value::Bin(vec![0u8; 31])).is_err());
    }
}
