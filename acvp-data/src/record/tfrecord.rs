//! TFRecord framing: `len: u64 LE | masked_crc32c(len): u32 LE | payload | masked_crc32c(payload): u32 LE`
//!
//! Writing goes through [tensorboard_rs::record_writer::RecordWriter], which frames event files the same way.

use std::io::{ErrorKind, Read};

use anyhow::Result;
use tensorboard_rs::masked_crc32c::masked_crc32c;

use crate::error::DataError;

/// Reads framed payloads one after another; ends cleanly only at a record boundary.
pub struct TfRecordReader<R> {
    inner: R,
    finished: bool,
}

impl<R: Read> TfRecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, finished: false }
    }

    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let mut len_bytes = [0_u8; 8];
        if !read_exact_or_eof(&mut self.inner, &mut len_bytes)? {
            return Ok(None);
        }
        let len_crc = read_u32(&mut self.inner)?;
        if masked_crc32c(&len_bytes) != len_crc {
            Err(DataError::Checksum("record length".to_string()))?;
        }

        let len = u64::from_le_bytes(len_bytes) as usize;
        let mut payload = vec![0_u8; len];
        self.inner
            .read_exact(&mut payload)
            .map_err(|e| DataError::MalformedRecord(format!("truncated payload of {len} bytes: {e}")))?;
        let payload_crc = read_u32(&mut self.inner)?;
        if masked_crc32c(&payload) != payload_crc {
            Err(DataError::Checksum(format!("payload of {len} bytes")))?;
        }
        Ok(Some(payload))
    }
}

impl<R: Read> Iterator for TfRecordReader<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_record() {
            Ok(Some(payload)) => Some(Ok(payload)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// `false` on a clean EOF before the first byte
fn read_exact_or_eof<R: Read>(
    r: &mut R,
    buf: &mut [u8],
) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => Err(DataError::MalformedRecord(format!("truncated record header ({filled} bytes)")))?,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut b = [0_u8; 4];
    r.read_exact(&mut b)
        .map_err(|e| DataError::MalformedRecord(format!("truncated checksum: {e}")))?;
    Ok(u32::from_le_bytes(b))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tensorboard_rs::masked_crc32c::crc32c;
    use tensorboard_rs::record_writer::RecordWriter;

    use super::*;

    fn framed(payloads: &[&[u8]]) -> Vec<u8> {
        let mut bytes = vec![];
        let mut writer = RecordWriter::new(&mut bytes);
        for p in payloads {
            writer.write(p).unwrap();
        }
        drop(writer);
        bytes
    }

    #[test]
    fn test_crc32c_check_value() {
        assert_eq!(crc32c(b"123456789"), 0xE306_9283);
    }

    #[test]
    fn test_write_then_read_frames() {
        let long = [7_u8; 300];
        let bytes = framed(&[b"first", b"", &long]);
        assert_eq!(bytes.len(), 3 * 16 + 5 + 300);

        let payloads = TfRecordReader::new(Cursor::new(bytes))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(payloads, vec![b"first".to_vec(), vec![], long.to_vec()]);
    }

    #[test]
    fn test_corrupted_payload_is_detected() {
        let mut bytes = framed(&[b"payload"]);
        bytes[14] ^= 0xff;

        let err = TfRecordReader::new(Cursor::new(bytes)).next().unwrap().unwrap_err();
        assert!(matches!(err.downcast_ref::<DataError>(), Some(DataError::Checksum(_))));
    }

    #[test]
    fn test_corrupted_length_is_detected() {
        let mut bytes = framed(&[b"payload"]);
        bytes[0] ^= 0x01;

        let err = TfRecordReader::new(Cursor::new(bytes)).next().unwrap().unwrap_err();
        assert!(matches!(err.downcast_ref::<DataError>(), Some(DataError::Checksum(_))));
    }

    #[test]
    fn test_truncated_file_is_an_error() {
        let mut bytes = framed(&[b"payload"]);
        bytes.truncate(bytes.len() - 6);

        let mut reader = TfRecordReader::new(Cursor::new(bytes));
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }
}
