//! Binary window encoding
//!
//! Format:
//! - 4 bytes: record length
//! - N bytes: bincode record (spans plus one operator-encoded blob per aggregate)
//! - 4 bytes: CRC32 of the record

use crate::operators::WindowOperator;
use crate::{Count, DecayError, Result, SummaryWindow, Timestamp};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct WindowRecord {
    ts: Timestamp,
    te: Timestamp,
    cs: Count,
    ce: Count,
    aggregates: Vec<Vec<u8>>,
}

/// Encode a window with a length prefix and CRC checksum
pub fn encode_window(window: &SummaryWindow, operators: &[Box<dyn WindowOperator>]) -> Result<Bytes> {
    if window.aggregates.len() != operators.len() {
        return Err(DecayError::Serialization(format!(
            "window {} has {} aggregates for {} operators",
            window.ts,
            window.aggregates.len(),
            operators.len()
        )));
    }
    let aggregates = operators
        .iter()
        .zip(&window.aggregates)
        .map(|(op, aggr)| op.serialize(aggr))
        .collect::<Result<Vec<_>>>()?;
    let record = WindowRecord {
        ts: window.ts,
        te: window.te,
        cs: window.cs,
        ce: window.ce,
        aggregates,
    };
    let payload = bincode::serialize(&record)?;

    let mut buf = BytesMut::with_capacity(payload.len() + 8);
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(&payload);
    buf.put_u32_le(crc32fast::hash(&payload));
    Ok(buf.freeze())
}

/// Decode a window produced by [`encode_window`], validating the checksum
pub fn decode_window(data: &[u8], operators: &[Box<dyn WindowOperator>]) -> Result<SummaryWindow> {
    if data.len() < 8 {
        return Err(DecayError::Corruption("Window record too short".into()));
    }
    let mut cursor = data;
    let len = cursor.get_u32_le() as usize;
    if cursor.len() != len + 4 {
        return Err(DecayError::Corruption(format!(
            "Window record length {} does not match {} stored bytes",
            len,
            cursor.len()
        )));
    }
    let payload = &cursor[..len];
    let mut trailer = &cursor[len..];
    let expected = trailer.get_u32_le();
    let actual = crc32fast::hash(payload);
    if expected != actual {
        return Err(DecayError::ChecksumMismatch { expected, actual });
    }

    let record: WindowRecord = bincode::deserialize(payload)?;
    if record.aggregates.len() != operators.len() {
        return Err(DecayError::Corruption(format!(
            "window {} stored {} aggregates, {} operators registered",
            record.ts,
            record.aggregates.len(),
            operators.len()
        )));
    }
    let aggregates = operators
        .iter()
        .zip(&record.aggregates)
        .map(|(op, bytes)| op.deserialize(bytes))
        .collect::<Result<Vec<_>>>()?;
    Ok(SummaryWindow::new(record.ts, record.te, record.cs, record.ce, aggregates))
}
