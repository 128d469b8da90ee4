//! The 124-byte fixed header that precedes every encrypted payload.

use byteorder::{ByteOrder, LittleEndian};
use zeroize::Zeroize;

use crate::error::OpenError;

pub const SIGNATURE1: u32 = 0x9AA2_D903;
pub const SIGNATURE2: u32 = 0xB54B_FB65;
pub const HEADER_SIZE: usize = 124;

const FLAG_SHA2: u32 = 1;
const FLAG_RIJNDAEL: u32 = 2;
const FLAG_ARCFOUR: u32 = 4;
const FLAG_TWOFISH: u32 = 8;

const DEFAULT_KEY_ENC_ROUNDS: u32 = 50_000;

/// The payload cipher named by the header's flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherId {
    Rijndael,
    ArcFour,
    TwoFish,
    Unknown(u32),
}

/// The fixed 124-byte header of a `.kdb` file.
///
/// Every multi-byte integer is little-endian; `master_seed`/`encryption_iv` seed the
/// payload cipher, `master_seed2`/`key_enc_rounds` seed the key-derivation transform, and
/// `contents_hash` is the SHA-256 of the decrypted payload, checked after decryption to
/// detect a wrong passphrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub signature1: u32,
    pub signature2: u32,
    pub flags: u32,
    pub version: u32,
    pub master_seed: [u8; 16],
    pub encryption_iv: [u8; 16],
    pub ngroups: u32,
    pub nentries: u32,
    pub contents_hash: [u8; 32],
    pub master_seed2: [u8; 32],
    pub key_enc_rounds: u32,
}

impl Header {
    /// Builds a fresh header with random seeds/IV and the Rijndael+SHA2 flag combination.
    pub fn new() -> Self {
        let mut header = Header {
            signature1: SIGNATURE1,
            signature2: SIGNATURE2,
            flags: FLAG_SHA2 | FLAG_RIJNDAEL,
            version: 0x0003_0002,
            master_seed: [0; 16],
            encryption_iv: [0; 16],
            ngroups: 0,
            nentries: 0,
            contents_hash: [0; 32],
            master_seed2: [0; 32],
            key_enc_rounds: DEFAULT_KEY_ENC_ROUNDS,
        };
        header.reset_random_fields();
        header
    }

    pub fn decode(buf: &[u8]) -> Result<Self, OpenError> {
        if buf.len() < HEADER_SIZE {
            return Err(OpenError::BadSignature);
        }

        let signature1 = LittleEndian::read_u32(&buf[0..4]);
        let signature2 = LittleEndian::read_u32(&buf[4..8]);
        if signature1 != SIGNATURE1 || signature2 != SIGNATURE2 {
            return Err(OpenError::BadSignature);
        }

        let flags = LittleEndian::read_u32(&buf[8..12]);
        let version = LittleEndian::read_u32(&buf[12..16]);

        let mut master_seed = [0u8; 16];
        master_seed.copy_from_slice(&buf[16..32]);
        let mut encryption_iv = [0u8; 16];
        encryption_iv.copy_from_slice(&buf[32..48]);

        let ngroups = LittleEndian::read_u32(&buf[48..52]);
        let nentries = LittleEndian::read_u32(&buf[52..56]);

        let mut contents_hash = [0u8; 32];
        contents_hash.copy_from_slice(&buf[56..88]);
        let mut master_seed2 = [0u8; 32];
        master_seed2.copy_from_slice(&buf[88..120]);

        let key_enc_rounds = LittleEndian::read_u32(&buf[120..124]);

        Ok(Header {
            signature1,
            signature2,
            flags,
            version,
            master_seed,
            encryption_iv,
            ngroups,
            nentries,
            contents_hash,
            master_seed2,
            key_enc_rounds,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.signature1);
        LittleEndian::write_u32(&mut buf[4..8], self.signature2);
        LittleEndian::write_u32(&mut buf[8..12], self.flags);
        LittleEndian::write_u32(&mut buf[12..16], self.version);
        buf[16..32].copy_from_slice(&self.master_seed);
        buf[32..48].copy_from_slice(&self.encryption_iv);
        LittleEndian::write_u32(&mut buf[48..52], self.ngroups);
        LittleEndian::write_u32(&mut buf[52..56], self.nentries);
        buf[56..88].copy_from_slice(&self.contents_hash);
        buf[88..120].copy_from_slice(&self.master_seed2);
        LittleEndian::write_u32(&mut buf[120..124], self.key_enc_rounds);
        buf
    }

    /// The payload cipher selected by this header's flag bits.
    pub fn encryption_type(&self) -> CipherId {
        if self.flags & FLAG_RIJNDAEL != 0 {
            CipherId::Rijndael
        } else if self.flags & FLAG_ARCFOUR != 0 {
            CipherId::ArcFour
        } else if self.flags & FLAG_TWOFISH != 0 {
            CipherId::TwoFish
        } else {
            CipherId::Unknown(self.flags)
        }
    }

    /// Regenerates `encryption_iv`, `master_seed` and `master_seed2` from the system CSPRNG.
    ///
    /// Called before every write so a saved file never reuses the IV/seeds it was opened
    /// with.
    pub fn reset_random_fields(&mut self) {
        #[allow(clippy::expect_used)]
        getrandom::fill(&mut self.encryption_iv).expect("system CSPRNG unavailable");
        #[allow(clippy::expect_used)]
        getrandom::fill(&mut self.master_seed).expect("system CSPRNG unavailable");
        #[allow(clippy::expect_used)]
        getrandom::fill(&mut self.master_seed2).expect("system CSPRNG unavailable");
    }
}

impl Default for Header {
    fn default() -> Self {
        Header::new()
    }
}

impl Drop for Header {
    fn drop(&mut self) {
        self.master_seed.zeroize();
        self.master_seed2.zeroize();
        self.encryption_iv.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = Header::new();
        let encoded = header.encode();
        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut encoded = Header::new().encode();
        encoded[0] = 0;
        assert!(matches!(Header::decode(&encoded), Err(OpenError::BadSignature)));
    }

    #[test]
    fn default_cipher_is_rijndael() {
        assert_eq!(Header::new().encryption_type(), CipherId::Rijndael);
    }
}
