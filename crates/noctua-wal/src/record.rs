use crc32fast::Hasher;

use noctua_types::{NoctuaError, Result, TxnId};

pub const RECORD_HDR_LEN: usize = 24;

mod header {
    //! Byte offsets for the fixed record header fields.
    use core::ops::Range;

    pub const PAYLOAD_LEN: Range<usize> = 0..4;
    pub const KIND: usize = 4;
    pub const RESERVED: Range<usize> = 5..8;
    pub const TXN_ID: Range<usize> = 8..16;
    pub const PAYLOAD_CRC32: Range<usize> = 16..20;
    pub const HEADER_CRC32: Range<usize> = 20..24;
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LogRecordKind {
    Begin = 1,
    Commit = 2,
    Abort = 3,
    Redo = 4,
}

impl LogRecordKind {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for LogRecordKind {
    type Error = NoctuaError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(LogRecordKind::Begin),
            2 => Ok(LogRecordKind::Commit),
            3 => Ok(LogRecordKind::Abort),
            4 => Ok(LogRecordKind::Redo),
            _ => Err(NoctuaError::Corruption("unknown log record kind")),
        }
    }
}

/// Borrowed record on the encode path. The disk consumer never interprets
/// these bytes; encoding lives with producers and with tests that inspect
/// the written file.
pub struct LogRecord<'a> {
    pub kind: LogRecordKind,
    pub txn: TxnId,
    pub payload: &'a [u8],
}

impl<'a> LogRecord<'a> {
    pub fn begin(txn: TxnId) -> Self {
        Self {
            kind: LogRecordKind::Begin,
            txn,
            payload: &[],
        }
    }

    pub fn commit(txn: TxnId) -> Self {
        Self {
            kind: LogRecordKind::Commit,
            txn,
            payload: &[],
        }
    }

    pub fn abort(txn: TxnId) -> Self {
        Self {
            kind: LogRecordKind::Abort,
            txn,
            payload: &[],
        }
    }

    pub fn redo(txn: TxnId, payload: &'a [u8]) -> Self {
        Self {
            kind: LogRecordKind::Redo,
            txn,
            payload,
        }
    }

    pub fn encoded_len(&self) -> usize {
        RECORD_HDR_LEN + self.payload.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.encoded_len()];
        let (hdr, payload) = buf.split_at_mut(RECORD_HDR_LEN);
        hdr[header::PAYLOAD_LEN].copy_from_slice(&(self.payload.len() as u32).to_be_bytes());
        hdr[header::KIND] = self.kind.as_u8();
        hdr[header::TXN_ID].copy_from_slice(&self.txn.0.to_be_bytes());
        hdr[header::PAYLOAD_CRC32].copy_from_slice(&crc32(self.payload).to_be_bytes());
        let hdr_crc = crc32(&hdr[..header::HEADER_CRC32.start]);
        hdr[header::HEADER_CRC32].copy_from_slice(&hdr_crc.to_be_bytes());
        payload.copy_from_slice(self.payload);
        buf
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogRecordOwned {
    pub kind: LogRecordKind,
    pub txn: TxnId,
    pub payload: Vec<u8>,
}

impl LogRecordOwned {
    /// Decodes one record from the front of `src`. Returns `Ok(None)` when
    /// `src` ends in an incomplete record (the tail past the last fsync may
    /// be torn); corrupt bytes before that point are an error.
    pub fn decode(src: &[u8]) -> Result<Option<(Self, usize)>> {
        if src.len() < RECORD_HDR_LEN {
            return Ok(None);
        }
        let hdr = &src[..RECORD_HDR_LEN];
        let stored_hdr_crc = u32::from_be_bytes(hdr[header::HEADER_CRC32].try_into().unwrap());
        if crc32(&hdr[..header::HEADER_CRC32.start]) != stored_hdr_crc {
            return Err(NoctuaError::Corruption("log record header crc mismatch"));
        }
        if hdr[header::RESERVED] != [0; 3] {
            return Err(NoctuaError::Corruption(
                "log record reserved bytes non-zero",
            ));
        }
        let kind = LogRecordKind::try_from(hdr[header::KIND])?;
        let payload_len =
            u32::from_be_bytes(hdr[header::PAYLOAD_LEN].try_into().unwrap()) as usize;
        let total = RECORD_HDR_LEN + payload_len;
        if src.len() < total {
            return Ok(None);
        }
        let payload = &src[RECORD_HDR_LEN..total];
        let stored_payload_crc =
            u32::from_be_bytes(hdr[header::PAYLOAD_CRC32].try_into().unwrap());
        if crc32(payload) != stored_payload_crc {
            return Err(NoctuaError::Corruption("log record payload crc mismatch"));
        }
        let txn = TxnId(u64::from_be_bytes(hdr[header::TXN_ID].try_into().unwrap()));
        Ok(Some((
            Self {
                kind,
                txn,
                payload: payload.to_vec(),
            },
            total,
        )))
    }

    /// Decodes every complete record in `src`, stopping at a torn tail.
    pub fn decode_all(mut src: &[u8]) -> Result<Vec<Self>> {
        let mut records = Vec::new();
        while let Some((record, consumed)) = Self::decode(src)? {
            records.push(record);
            src = &src[consumed..];
        }
        Ok(records)
    }
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_roundtrip() {
        let record = LogRecord::redo(TxnId(7), b"tuple delta");
        let encoded = record.encode();
        let (decoded, consumed) = LogRecordOwned::decode(&encoded).unwrap().unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded.kind, LogRecordKind::Redo);
        assert_eq!(decoded.txn, TxnId(7));
        assert_eq!(decoded.payload, b"tuple delta");
    }

    #[test]
    fn decode_all_stops_at_torn_tail() {
        let mut bytes = LogRecord::begin(TxnId(1)).encode();
        bytes.extend_from_slice(&LogRecord::commit(TxnId(1)).encode());
        // Simulate a torn write of a third record.
        bytes.extend_from_slice(&LogRecord::redo(TxnId(2), b"partial").encode()[..10]);
        let records = LogRecordOwned::decode_all(&bytes).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, LogRecordKind::Begin);
        assert_eq!(records[1].kind, LogRecordKind::Commit);
    }

    #[test]
    fn detects_payload_corruption() {
        let mut encoded = LogRecord::redo(TxnId(3), b"payload").encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(LogRecordOwned::decode(&encoded).is_err());
    }

    #[test]
    fn detects_header_corruption() {
        let mut encoded = LogRecord::commit(TxnId(3)).encode();
        encoded[header::KIND] = 99;
        assert!(LogRecordOwned::decode(&encoded).is_err());
    }

    #[test]
    fn empty_input_decodes_to_nothing() {
        assert!(LogRecordOwned::decode(&[]).unwrap().is_none());
        assert!(LogRecordOwned::decode_all(&[]).unwrap().is_empty());
    }
}
