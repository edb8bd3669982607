//! Destinations for bytes read out of segments.

use crate::error::{CoreError, CoreResult};
use crate::location::Location;

/// Receives raw segment bytes during range scans and rollbacks.
///
/// Chunks arrive in ascending `(file_id, start)` order. `start` is the
/// zero-based byte position of the chunk within its file. A chunk always
/// begins on a record boundary and never spans two files.
pub trait SegmentSink {
    /// Accepts one chunk. An error aborts the surrounding operation.
    fn write_chunk(&mut self, file_id: u64, start: u64, bytes: &[u8]) -> CoreResult<()>;
}

impl SegmentSink for Vec<u8> {
    fn write_chunk(&mut self, _file_id: u64, _start: u64, bytes: &[u8]) -> CoreResult<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

/// A sink that splits incoming chunks back into length-prefixed records,
/// remembering where each one was stored.
///
/// # Example
///
/// ```
/// use ledgerdb_core::{RecordParser, SegmentSink};
///
/// let mut parser = RecordParser::new();
/// parser.write_chunk(1, 0, &[0, 0, 0, 2, 0xAA, 0xBB]).unwrap();
/// let records = parser.finish().unwrap();
/// assert_eq!(records[0].0.offset(), 1);
/// assert_eq!(records[0].1, vec![0xAA, 0xBB]);
/// ```
#[derive(Debug, Default)]
pub struct RecordParser {
    records: Vec<(Location, Vec<u8>)>,
    pending: Vec<u8>,
    file_id: u64,
    /// File position of `pending[0]`.
    position: u64,
}

impl RecordParser {
    /// Creates an empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records parsed so far.
    #[must_use]
    pub fn records(&self) -> &[(Location, Vec<u8>)] {
        &self.records
    }

    /// Returns every parsed record, failing if the stream stopped partway
    /// through one.
    pub fn finish(self) -> CoreResult<Vec<(Location, Vec<u8>)>> {
        if !self.pending.is_empty() {
            return Err(CoreError::record_corruption(format!(
                "{} trailing bytes in data{} at byte {}",
                self.pending.len(),
                self.file_id,
                self.position
            )));
        }
        Ok(self.records)
    }

    fn drain_records(&mut self) -> CoreResult<()> {
        let mut pos = 0;
        while self.pending.len() - pos >= 4 {
            let mut prefix = [0u8; 4];
            prefix.copy_from_slice(&self.pending[pos..pos + 4]);
            let len = u32::from_be_bytes(prefix) as usize;
            if self.pending.len() - pos - 4 < len {
                break;
            }

            let offset = u32::try_from(self.position + pos as u64 + 1).map_err(|_| {
                CoreError::record_corruption(format!(
                    "record in data{} lies beyond the addressable range",
                    self.file_id
                ))
            })?;
            let payload = self.pending[pos + 4..pos + 4 + len].to_vec();
            self.records.push((Location::new(self.file_id, offset), payload));
            pos += 4 + len;
        }

        self.pending.drain(..pos);
        self.position += pos as u64;
        Ok(())
    }
}

impl SegmentSink for RecordParser {
    fn write_chunk(&mut self, file_id: u64, start: u64, bytes: &[u8]) -> CoreResult<()> {
        if self.pending.is_empty() {
            self.file_id = file_id;
            self.position = start;
        } else if file_id != self.file_id || start != self.position + self.pending.len() as u64 {
            return Err(CoreError::record_corruption(format!(
                "record in data{} at byte {} cut short",
                self.file_id, self.position
            )));
        }

        self.pending.extend_from_slice(bytes);
        self.drain_records()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn parses_records_with_locations() {
        let mut chunk = record(b"one");
        chunk.extend(record(b""));
        chunk.extend(record(b"three"));

        let mut parser = RecordParser::new();
        parser.write_chunk(2, 10, &chunk).unwrap();
        parser.write_chunk(3, 0, &record(b"four")).unwrap();
        let records = parser.finish().unwrap();

        assert_eq!(
            records,
            vec![
                (Location::new(2, 11), b"one".to_vec()),
                (Location::new(2, 18), Vec::new()),
                (Location::new(2, 22), b"three".to_vec()),
                (Location::new(3, 1), b"four".to_vec()),
            ]
        );
    }

    #[test]
    fn contiguous_chunks_join() {
        let bytes = record(b"split payload");
        let mut parser = RecordParser::new();
        parser.write_chunk(1, 0, &bytes[..6]).unwrap();
        assert!(parser.records().is_empty());
        parser.write_chunk(1, 6, &bytes[6..]).unwrap();
        assert_eq!(parser.records().len(), 1);
    }

    #[test]
    fn partial_record_across_files_is_corruption() {
        let bytes = record(b"payload");
        let mut parser = RecordParser::new();
        parser.write_chunk(1, 0, &bytes[..5]).unwrap();
        let err = parser.write_chunk(2, 0, &bytes[5..]).unwrap_err();
        assert!(matches!(err, CoreError::RecordCorruption { .. }));
    }

    #[test]
    fn trailing_bytes_fail_finish() {
        let mut parser = RecordParser::new();
        parser.write_chunk(1, 0, &[0, 0, 0, 9, 1]).unwrap();
        assert!(parser.finish().is_err());
    }

    #[test]
    fn vec_sink_concatenates() {
        let mut sink = Vec::new();
        sink.write_chunk(1, 0, b"ab").unwrap();
        sink.write_chunk(2, 0, b"cd").unwrap();
        assert_eq!(sink, b"abcd");
    }
}
