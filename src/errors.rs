use thiserror::Error;

/// Error type for all covert operations.
///
/// The set is deliberately small. Every authentication problem, whether a
/// Poly1305 tag mismatch, a blind search that exhausts its candidates or a
/// forged signature, surfaces as the single [`AuthFail`] kind: a wrong key
/// must stay indistinguishable from a tampered or truncated file.
///
/// [`AuthFail`]: Self::AuthFail
#[derive(Debug, Error)]
pub enum CovertError {
    /// Decryption or signature verification failed.
    ///
    /// Wrong key, corrupted data and truncation are intentionally
    /// indistinguishable.
    #[error("not authenticated: no key available for decryption of this file")]
    AuthFail,

    /// The data authenticated fine but its structure is invalid:
    /// a forbidden MessagePack type in the index, a reserved key,
    /// an impossible length field.
    #[error("invalid or corrupted data: {0}")]
    Format(String),

    /// Passphrase under 8 bytes, rejected before any hashing.
    #[error("the passphrase must be at least 8 bytes")]
    PasswordTooShort,

    /// Encryption was requested with no recipients and without wide-open
    /// mode.
    #[error("no recipients specified and wide-open mode not requested")]
    NoRecipients,

    /// Reserved for future versioned envelopes. Never produced by the
    /// current format.
    #[error("unsupported container version")]
    UnsupportedVersion,

    /// Transport-level failure, surfaced verbatim.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
