//! Error types that this crate can return

use thiserror::Error;

/// Errors while decoding a single TLV field's payload into a typed value
#[derive(Debug, Error)]
pub enum FieldDecodeError {
    /// The field's payload was not long enough for its declared type
    #[error("field {field_id:#06x} has size {size}, too short: {detail}")]
    TooShort {
        field_id: u16,
        size: u32,
        detail: &'static str,
    },

    /// A string field's payload was not valid UTF-8
    #[error("field {field_id:#06x} is not valid UTF-8: {source}")]
    Utf8 {
        field_id: u16,
        #[source]
        source: std::str::Utf8Error,
    },

    /// A packed-date field decoded to a calendar date or time that does not exist
    #[error("field {field_id:#06x} packs an impossible date/time")]
    IllegalDate { field_id: u16 },
}

/// Errors stemming from a corrupted or truncated TLV record stream
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The buffer ended before a field header or its payload could be read in full
    #[error("input truncated at offset {at}")]
    Truncated { at: usize },

    /// A field's payload failed to decode into its typed value
    #[error("record at offset {offset}: {source}")]
    Field {
        offset: usize,
        #[source]
        source: FieldDecodeError,
    },
}

/// Errors while deriving or using cryptographic keys
#[derive(Debug, Error)]
pub enum CryptographyError {
    /// The decrypted payload was the wrong length, or its content hash did not match the
    /// header, most commonly because the wrong passphrase was supplied
    #[error("decryption failed: {0}")]
    DecryptFailure(String),

    /// A cipher was constructed with a key or IV of the wrong size
    #[error(transparent)]
    InvalidLength(#[from] cipher::InvalidLength),
}

/// Errors upon reading a database
#[derive(Debug, Error)]
pub enum OpenError {
    /// An I/O error occurred while reading the database
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The fixed header did not begin with the expected magic numbers
    #[error("not a KeePass v1 (.kdb) file")]
    BadSignature,

    /// The header named a cipher this crate does not implement
    #[error("unsupported payload cipher: {0}")]
    UnsupportedCipher(String),

    /// An error occurred deriving the master key or decrypting the payload
    #[error(transparent)]
    Cryptography(#[from] CryptographyError),

    /// The decrypted payload's group/entry records were corrupted or truncated
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Errors occurring when writing out a database
#[derive(Debug, Error)]
pub enum SaveError {
    /// An I/O error occurred while writing the database
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An error occurred deriving the master key or encrypting the payload
    #[error(transparent)]
    Cryptography(#[from] CryptographyError),

    /// The random group-id space was exhausted while allocating a new group
    #[error("could not allocate a free group id")]
    GroupIdSpaceExhausted,
}
