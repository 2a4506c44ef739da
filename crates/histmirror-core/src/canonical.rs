//! Canonical encoding and digests of records.
//!
//! A record's canonical form is its CBOR encoding with fields in declaration
//! order and byte strings kept verbatim. Two stores holding the same records
//! produce the same digests, which is how convergence and idempotence are
//! verified without comparing database files.

use std::fmt;

use crate::record::Record;

/// Domain separator for record digests.
const DIGEST_DOMAIN: &[u8] = b"histmirror-record-v0:";

/// Encode a record to canonical CBOR bytes.
pub fn canonical_bytes(record: &Record) -> Vec<u8> {
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail and every record field is serializable.
    if ciborium::into_writer(record, &mut buf).is_err() {
        buf.clear();
    }
    buf
}

/// A 32-byte BLAKE3 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordDigest(pub [u8; 32]);

impl RecordDigest {
    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for RecordDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordDigest({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for RecordDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Digest of a single record's canonical bytes.
pub fn record_digest(record: &Record) -> RecordDigest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(DIGEST_DOMAIN);
    hasher.update(&canonical_bytes(record));
    RecordDigest(*hasher.finalize().as_bytes())
}
