//! Streaming decoder for record-marked XDR files.
//!
//! Archive category files and buckets are sequences of XDR values, each
//! preceded by a 4-byte big-endian length whose top bit is set:
//!
//! ```text
//! [0x80 | len >> 24, len >> 16, len >> 8, len][len bytes of XDR]...
//! ```
//!
//! Files are usually gzip-compressed; [`XdrStream::gzip`] decompresses on the fly.

use std::io::{self, BufReader, Read, Write};

use archivist_storage::{ObjectRead, ObjectReader};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use stellar_xdr::curr::{Limits, ReadXdr, WriteXdr};

use crate::error::{HistoryError, Result};
use crate::hash::Hash256;

const RECORD_MARK: u32 = 0x8000_0000;

enum Source {
    Plain(BufReader<ObjectReader>),
    Gzip(BufReader<GzDecoder<ObjectReader>>),
}

impl Source {
    fn reader(&mut self) -> &mut dyn Read {
        match self {
            Source::Plain(r) => r,
            Source::Gzip(r) => r,
        }
    }

    fn object(&mut self) -> &mut ObjectReader {
        match self {
            Source::Plain(r) => r.get_mut(),
            Source::Gzip(r) => r.get_mut().get_mut(),
        }
    }
}

/// Reads one framed XDR value at a time from an archive object.
pub struct XdrStream {
    path: String,
    source: Source,
    hasher: Sha256,
    expected: Option<Hash256>,
    bytes_read: u64,
    closed: bool,
}

impl XdrStream {
    /// Decode an uncompressed stream.
    pub fn plain(reader: ObjectReader, path: impl Into<String>) -> Self {
        Self::with_source(Source::Plain(BufReader::new(reader)), path.into())
    }

    /// Decode a gzip-compressed stream.
    pub fn gzip(reader: ObjectReader, path: impl Into<String>) -> Self {
        Self::with_source(
            Source::Gzip(BufReader::new(GzDecoder::new(reader))),
            path.into(),
        )
    }

    fn with_source(source: Source, path: String) -> Self {
        Self {
            path,
            source,
            hasher: Sha256::new(),
            expected: None,
            bytes_read: 0,
            closed: false,
        }
    }

    /// Require the decompressed content to hash to `hash`; checked at end of stream.
    pub fn set_expected_hash(&mut self, hash: Hash256) {
        self.expected = Some(hash);
    }

    /// Path the stream was opened from.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Decompressed bytes consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    fn corrupt(&self, message: impl Into<String>) -> HistoryError {
        HistoryError::CorruptFile {
            path: self.path.clone(),
            message: message.into(),
        }
    }

    /// Fill `buf` as far as the stream allows, returning the bytes read.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let res = self.source.reader().read(&mut buf[filled..]);
            match res {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(self.corrupt(e.to_string())),
            }
        }
        Ok(filled)
    }

    /// Decode the next value, or `None` at a clean end of stream.
    ///
    /// A stream that ends inside a frame, or a frame that does not decode as
    /// `T`, is reported as [`HistoryError::CorruptFile`].
    pub fn read_one<T: ReadXdr>(&mut self) -> Result<Option<T>> {
        let mut header = [0u8; 4];
        match self.fill(&mut header)? {
            0 => {
                self.check_hash()?;
                return Ok(None);
            }
            4 => {}
            n => return Err(self.corrupt(format!("truncated record mark ({n} of 4 bytes)"))),
        }

        let len = u32::from_be_bytes(header) & !RECORD_MARK;
        let mut payload = Vec::new();
        let res = self
            .source
            .reader()
            .take(u64::from(len))
            .read_to_end(&mut payload);
        let got = res.map_err(|e| self.corrupt(e.to_string()))?;
        if got != len as usize {
            return Err(self.corrupt(format!("truncated record: expected {len} bytes, got {got}")));
        }

        self.hasher.update(header);
        self.hasher.update(&payload);
        self.bytes_read += 4 + u64::from(len);

        T::from_xdr(&payload, Limits::none())
            .map(Some)
            .map_err(|e| self.corrupt(format!("XDR decode failed: {e}")))
    }

    /// Decode every remaining value.
    pub fn read_all<T: ReadXdr>(&mut self) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while let Some(value) = self.read_one()? {
            out.push(value);
        }
        Ok(out)
    }

    fn check_hash(&mut self) -> Result<()> {
        if let Some(expected) = self.expected.take() {
            let digest = std::mem::take(&mut self.hasher).finalize();
            let mut actual = Hash256::ZERO;
            actual.0.copy_from_slice(&digest);
            if actual != expected {
                return Err(HistoryError::HashMismatch {
                    what: self.path.clone(),
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Release the underlying reader. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.source.object().close()?;
        Ok(())
    }
}

/// Write `value` as one record-marked frame.
pub fn write_framed_xdr<W: Write, T: WriteXdr>(w: &mut W, value: &T) -> Result<usize> {
    let payload = value.to_xdr(Limits::none())?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len < RECORD_MARK)
        .ok_or_else(|| HistoryError::CorruptFile {
            path: "<frame>".to_string(),
            message: format!("XDR payload of {} bytes is too large", payload.len()),
        })?;
    w.write_all(&(len | RECORD_MARK).to_be_bytes())?;
    w.write_all(&payload)?;
    Ok(4 + payload.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression};
    use std::io::Cursor;
    use stellar_xdr::curr::{Hash, TransactionResultSet, TransactionHistoryResultEntry, TransactionHistoryResultEntryExt, VecM};

    fn entry(seq: u32) -> TransactionHistoryResultEntry {
        TransactionHistoryResultEntry {
            ledger_seq: seq,
            tx_result_set: TransactionResultSet {
                results: VecM::default(),
            },
            ext: TransactionHistoryResultEntryExt::V0,
        }
    }

    fn framed(seqs: &[u32]) -> Vec<u8> {
        let mut buf = Vec::new();
        for &s in seqs {
            write_framed_xdr(&mut buf, &entry(s)).unwrap();
        }
        buf
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_frame_header_has_mark_bit() {
        let buf = framed(&[1]);
        assert_eq!(buf[0] & 0x80, 0x80);
        let len = u32::from_be_bytes([buf[0] & 0x7f, buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(len, buf.len() - 4);
    }

    #[test]
    fn test_gzip_stream_reads_in_order_then_none() {
        let data = gzip(&framed(&[1000, 1001, 1002]));
        let mut stream = XdrStream::gzip(Box::new(Cursor::new(data)), "results.xdr.gz");

        let seqs: Vec<u32> = stream
            .read_all::<TransactionHistoryResultEntry>()
            .unwrap()
            .iter()
            .map(|e| e.ledger_seq)
            .collect();
        assert_eq!(seqs, vec![1000, 1001, 1002]);
        assert!(stream.read_one::<TransactionHistoryResultEntry>().unwrap().is_none());
        stream.close().unwrap();
        stream.close().unwrap();
    }

    #[test]
    fn test_truncated_payload_is_corrupt() {
        let mut data = framed(&[1, 2]);
        data.truncate(data.len() - 3);
        let mut stream = XdrStream::plain(Box::new(Cursor::new(data)), "x.xdr");

        assert!(stream.read_one::<TransactionHistoryResultEntry>().unwrap().is_some());
        let err = stream.read_one::<TransactionHistoryResultEntry>().unwrap_err();
        assert!(matches!(err, HistoryError::CorruptFile { ref path, .. } if path == "x.xdr"));
    }

    #[test]
    fn test_truncated_header_is_corrupt() {
        let mut data = framed(&[1]);
        data.extend_from_slice(&[0x80, 0x00]);
        let mut stream = XdrStream::plain(Box::new(Cursor::new(data)), "x.xdr");
        stream.read_one::<TransactionHistoryResultEntry>().unwrap();
        assert!(matches!(
            stream.read_one::<TransactionHistoryResultEntry>(),
            Err(HistoryError::CorruptFile { .. })
        ));
    }

    #[test]
    fn test_wrong_type_is_corrupt() {
        let data = framed(&[7]);
        let mut stream = XdrStream::plain(Box::new(Cursor::new(data)), "x.xdr");
        assert!(matches!(
            stream.read_one::<Hash>(),
            Err(HistoryError::CorruptFile { .. })
        ));
    }

    #[test]
    fn test_expected_hash() {
        let raw = framed(&[5, 6]);
        let good = Hash256::hash(&raw);

        let mut stream = XdrStream::gzip(Box::new(Cursor::new(gzip(&raw))), "b.xdr.gz");
        stream.set_expected_hash(good);
        assert_eq!(stream.read_all::<TransactionHistoryResultEntry>().unwrap().len(), 2);
        assert_eq!(stream.bytes_read(), raw.len() as u64);

        let mut stream = XdrStream::gzip(Box::new(Cursor::new(gzip(&raw))), "b.xdr.gz");
        stream.set_expected_hash(Hash256::hash(b"other"));
        assert!(matches!(
            stream.read_all::<TransactionHistoryResultEntry>(),
            Err(HistoryError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_bad_gzip_is_corrupt() {
        let mut stream = XdrStream::gzip(Box::new(Cursor::new(vec![1, 2, 3, 4, 5])), "bad.xdr.gz");
        assert!(matches!(
            stream.read_one::<TransactionHistoryResultEntry>(),
            Err(HistoryError::CorruptFile { .. })
        ));
    }
}
