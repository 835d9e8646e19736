//! Self-describing encoded payload values.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::errors::{DecodeError, EncodeError};

/// One reversibly-encoded value (a single CBOR item).
///
/// Messages carry an ordered list of these; each concrete message knows how
/// many it expects and what type each one decodes to.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Encoded(Bytes);

impl Encoded {
    /// Encode any serializable value.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self, EncodeError> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf).map_err(|e| EncodeError::Cbor(e.to_string()))?;
        Ok(Self(Bytes::from(buf)))
    }

    /// Decode into the expected type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        ciborium::from_reader(self.0.as_ref()).map_err(|e| DecodeError::Cbor(e.to_string()))
    }

    /// Wrap bytes that are already CBOR.
    pub fn from_raw(bytes: Bytes) -> Self {
        Self(bytes)
    }

    /// Underlying CBOR bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Encoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Encoded({})", hex::encode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn decode_with_wrong_type_fails() {
        let encoded = Encoded::encode(&true).unwrap();
        let result: Result<Vec<u8>, _> = encoded.decode();
        assert!(matches!(result, Err(DecodeError::Cbor(_))));
    }

    #[test]
    fn set_survives_encoding() {
        let set: BTreeSet<u32> = [3, 1, 2].into_iter().collect();
        let encoded = Encoded::encode(&set).unwrap();
        let decoded: BTreeSet<u32> = encoded.decode().unwrap();
        assert_eq!(decoded, set);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let encoded = Encoded::from_raw(Bytes::from_static(&[0xff, 0x00, 0x13]));
        assert!(encoded.decode::<bool>().is_err());
    }
}
