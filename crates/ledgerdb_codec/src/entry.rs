//! Length-delimited redo entry encoding.
//!
//! An address's redo entries are stored as one value:
//!
//! ```text
//! | len (4, BE) | cbor(entry) | len (4, BE) | cbor(entry) | ...
//! ```
//!
//! The entry type is opaque here; anything implementing serde's traits works.

use crate::batch::{prefix_len, read_field};
use crate::error::{CodecError, CodecResult};
use bytes::BufMut;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes `entries` in order.
///
/// # Errors
///
/// Returns [`CodecError::Cbor`] if an entry cannot be serialized, or
/// [`CodecError::TooLarge`] if one encodes to more than `u32::MAX` bytes.
pub fn encode_entries<T: Serialize>(entries: &[T]) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut item = Vec::new();

    for entry in entries {
        item.clear();
        ciborium::into_writer(entry, &mut item).map_err(|e| CodecError::Cbor(e.to_string()))?;
        out.put_u32(prefix_len(item.len())?);
        out.put_slice(&item);
    }
    Ok(out)
}

/// Decodes entries produced by [`encode_entries`].
///
/// # Errors
///
/// Returns an error if a length prefix overruns the input or an item is not
/// a valid CBOR encoding of `T`.
pub fn decode_entries<T: DeserializeOwned>(mut bytes: &[u8]) -> CodecResult<Vec<T>> {
    let mut entries = Vec::new();
    while !bytes.is_empty() {
        let item = read_field(&mut bytes)?;
        let entry = ciborium::from_reader(item.as_slice())
            .map_err(|e| CodecError::Cbor(e.to_string()))?;
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct StorageChange {
        slot: Vec<u8>,
        value: Option<Vec<u8>>,
        nonce: u64,
    }

    fn change(nonce: u64) -> StorageChange {
        StorageChange {
            slot: vec![nonce as u8; 4],
            value: (nonce % 2 == 0).then(|| vec![0xEE; nonce as usize]),
            nonce,
        }
    }

    #[test]
    fn entries_decode_in_order() {
        let entries: Vec<_> = (0..5).map(change).collect();
        let bytes = encode_entries(&entries).unwrap();
        let decoded: Vec<StorageChange> = decode_entries(&bytes).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn each_entry_is_length_prefixed() {
        let bytes = encode_entries(&[1u8, 2u8]).unwrap();
        // CBOR encodes small unsigned ints in one byte.
        assert_eq!(bytes, vec![0, 0, 0, 1, 0x01, 0, 0, 0, 1, 0x02]);
    }

    #[test]
    fn empty_list_is_empty_bytes() {
        let bytes = encode_entries::<StorageChange>(&[]).unwrap();
        assert!(bytes.is_empty());
        assert!(decode_entries::<StorageChange>(&bytes).unwrap().is_empty());
    }

    #[test]
    fn overrunning_prefix_is_truncated() {
        let err = decode_entries::<u8>(&[0, 0, 0, 9, 0x01]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
    }

    #[test]
    fn wrong_type_is_cbor_error() {
        let bytes = encode_entries(&["text"]).unwrap();
        let err = decode_entries::<u64>(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::Cbor(_)));
    }
}
