//! Codec capability for opaque protocol payloads.
//!
//! The store only needs byte-for-byte round trips of payload blobs. The
//! protocol layer that understands them supplies a [`Codec`]; [`CborCodec`]
//! covers any serde type.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CoreError;

/// Encode/decode capability for a protocol type.
pub trait Codec<T> {
    fn encode(&self, value: &T) -> Result<Vec<u8>, CoreError>;

    fn decode(&self, bytes: &[u8]) -> Result<T, CoreError>;
}

/// CBOR codec for serde types.
pub struct CborCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> CborCodec<T> {
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for CborCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CborCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for CborCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CborCodec")
    }
}

impl<T: Serialize + DeserializeOwned> Codec<T> for CborCodec<T> {
    fn encode(&self, value: &T) -> Result<Vec<u8>, CoreError> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf).map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CoreError> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_garbage_fails() {
        let codec = CborCodec::<Vec<String>>::new();
        let err = codec.decode(&[0xff, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, CoreError::DecodingError(_)));
    }

    #[test]
    fn test_encoding_is_stable() {
        let codec = CborCodec::<(u32, String)>::new();
        let value = (7, "caption".to_string());
        assert_eq!(codec.encode(&value).unwrap(), codec.encode(&value).unwrap());
    }
}
