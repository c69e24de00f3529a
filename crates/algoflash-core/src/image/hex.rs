//! Intel HEX decoding
//!
//! Decodes an Intel HEX file one line at a time into address-keyed data
//! chunks. Supports the I8HEX, I16HEX and I32HEX record sets:
//!
//! | Type | Record                    |
//! |------|---------------------------|
//! | 00   | Data                      |
//! | 01   | End of file               |
//! | 02   | Extended segment address  |
//! | 03   | Start segment address     |
//! | 04   | Extended linear address   |
//! | 05   | Start linear address      |

use core::fmt;

use heapless::Vec;

/// Maximum payload of a single record
pub const MAX_RECORD_DATA: usize = 255;

/// Record type field values
mod record_type {
    pub const DATA: u8 = 0x00;
    pub const END_OF_FILE: u8 = 0x01;
    pub const EXTENDED_SEGMENT_ADDRESS: u8 = 0x02;
    pub const START_SEGMENT_ADDRESS: u8 = 0x03;
    pub const EXTENDED_LINEAR_ADDRESS: u8 = 0x04;
    pub const START_LINEAR_ADDRESS: u8 = 0x05;
}

/// Reason a line could not be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexErrorKind {
    /// Line does not start with ':'
    MissingStartCode,
    /// Non-hex character in the record
    InvalidDigit,
    /// Record shorter or longer than its byte count says
    InvalidLength,
    /// Checksum byte does not match the record
    ChecksumMismatch {
        /// Checksum stored in the record
        expected: u8,
        /// Checksum computed over the record
        computed: u8,
    },
    /// Unknown record type
    UnsupportedRecord(u8),
    /// Address record with the wrong payload size
    InvalidAddressRecord,
}

/// Error decoding an Intel HEX line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HexError {
    /// 1-based line number
    pub line: usize,
    /// What went wrong
    pub kind: HexErrorKind,
}

impl fmt::Display for HexErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingStartCode => write!(f, "missing ':' start code"),
            Self::InvalidDigit => write!(f, "invalid hex digit"),
            Self::InvalidLength => write!(f, "record length mismatch"),
            Self::ChecksumMismatch { expected, computed } => write!(
                f,
                "checksum mismatch: record has 0x{:02X}, computed 0x{:02X}",
                expected, computed
            ),
            Self::UnsupportedRecord(kind) => write!(f, "unsupported record type 0x{:02X}", kind),
            Self::InvalidAddressRecord => write!(f, "malformed address record"),
        }
    }
}

impl fmt::Display for HexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.kind)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HexError {}

/// Data decoded from one record, at its absolute address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunk {
    /// Absolute address of the first byte
    pub address: u32,
    /// Record payload
    pub data: Vec<u8, MAX_RECORD_DATA>,
}

/// Streaming Intel HEX decoder
///
/// Feed lines in file order. Lines after the end-of-file record are ignored.
#[derive(Debug, Clone, Default)]
pub struct HexDecoder {
    base: u32,
    line: usize,
    finished: bool,
    start_address: Option<u32>,
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

impl HexDecoder {
    /// Create a decoder positioned before the first line
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the end-of-file record has been seen
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Entry point from a start segment or start linear address record
    pub fn start_address(&self) -> Option<u32> {
        self.start_address
    }

    /// Decode one line
    ///
    /// Returns the data carried by a data record, `None` for every other
    /// record, blank lines and lines after end-of-file.
    pub fn feed_line(&mut self, line: &[u8]) -> Result<Option<DataChunk>, HexError> {
        self.line += 1;
        let line = line.trim_ascii();
        if line.is_empty() || self.finished {
            return Ok(None);
        }

        let line_no = self.line;
        let fail = |kind| HexError {
            line: line_no,
            kind,
        };

        let digits = line.strip_prefix(b":").ok_or(fail(HexErrorKind::MissingStartCode))?;
        if digits.len() % 2 != 0 {
            return Err(fail(HexErrorKind::InvalidLength));
        }

        // count + address(2) + type + data + checksum
        let mut bytes: Vec<u8, { MAX_RECORD_DATA + 5 }> = Vec::new();
        for pair in digits.chunks(2) {
            let hi = hex_value(pair[0]).ok_or(fail(HexErrorKind::InvalidDigit))?;
            let lo = hex_value(pair[1]).ok_or(fail(HexErrorKind::InvalidDigit))?;
            bytes
                .push((hi << 4) | lo)
                .map_err(|_| fail(HexErrorKind::InvalidLength))?;
        }

        if bytes.len() < 5 || bytes.len() != bytes[0] as usize + 5 {
            return Err(fail(HexErrorKind::InvalidLength));
        }

        let (record, checksum) = bytes.split_at(bytes.len() - 1);
        let computed = record
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b))
            .wrapping_neg();
        if computed != checksum[0] {
            return Err(fail(HexErrorKind::ChecksumMismatch {
                expected: checksum[0],
                computed,
            }));
        }

        let offset = u16::from_be_bytes([record[1], record[2]]);
        let payload = &record[4..];

        match record[3] {
            record_type::DATA => {
                let mut data = Vec::new();
                data.extend_from_slice(payload)
                    .map_err(|_| fail(HexErrorKind::InvalidLength))?;
                Ok(Some(DataChunk {
                    address: self.base.wrapping_add(offset as u32),
                    data,
                }))
            }
            record_type::END_OF_FILE => {
                self.finished = true;
                Ok(None)
            }
            record_type::EXTENDED_SEGMENT_ADDRESS => {
                let segment = Self::be16(payload).ok_or(fail(HexErrorKind::InvalidAddressRecord))?;
                self.base = (segment as u32) << 4;
                Ok(None)
            }
            record_type::EXTENDED_LINEAR_ADDRESS => {
                let upper = Self::be16(payload).ok_or(fail(HexErrorKind::InvalidAddressRecord))?;
                self.base = (upper as u32) << 16;
                Ok(None)
            }
            record_type::START_SEGMENT_ADDRESS => {
                if payload.len() != 4 {
                    return Err(fail(HexErrorKind::InvalidAddressRecord));
                }
                let cs = u16::from_be_bytes([payload[0], payload[1]]) as u32;
                let ip = u16::from_be_bytes([payload[2], payload[3]]) as u32;
                self.start_address = Some((cs << 4).wrapping_add(ip));
                Ok(None)
            }
            record_type::START_LINEAR_ADDRESS => {
                let bytes: [u8; 4] = payload
                    .try_into()
                    .map_err(|_| fail(HexErrorKind::InvalidAddressRecord))?;
                self.start_address = Some(u32::from_be_bytes(bytes));
                Ok(None)
            }
            other => Err(fail(HexErrorKind::UnsupportedRecord(other))),
        }
    }

    fn be16(payload: &[u8]) -> Option<u16> {
        match payload {
            [hi, lo] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(text: &str) -> Result<std::vec::Vec<DataChunk>, HexError> {
        let mut decoder = HexDecoder::new();
        let mut chunks = std::vec::Vec::new();
        for line in text.lines() {
            if let Some(chunk) = decoder.feed_line(line.as_bytes())? {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    #[test]
    fn test_data_records() {
        let chunks = decode(
            ":10010000214601360121470136007EFE09D2190140\n\
             :100110002146017E17C20001FF5F16002148011928\n\
             :00000001FF\n",
        )
        .unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].address, 0x0100);
        assert_eq!(chunks[0].data.len(), 16);
        assert_eq!(&chunks[0].data[..4], &[0x21, 0x46, 0x01, 0x36]);
        assert_eq!(chunks[1].address, 0x0110);
    }

    #[test]
    fn test_extended_linear_address() {
        let chunks = decode(
            ":020000040800F2\n\
             :0400100001020304E2\n\
             :00000001FF\n",
        )
        .unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].address, 0x0800_0010);
        assert_eq!(&chunks[0].data[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_extended_segment_address() {
        let chunks = decode(":020000021200EA\n:0100000055AA\n").unwrap();
        assert_eq!(chunks[0].address, 0x12000);
        assert_eq!(&chunks[0].data[..], &[0x55]);
    }

    #[test]
    fn test_start_linear_address() {
        let mut decoder = HexDecoder::new();
        decoder.feed_line(b":0400000508000131BD").unwrap();
        assert_eq!(decoder.start_address(), Some(0x0800_0131));
    }

    #[test]
    fn test_stops_after_end_of_file() {
        let mut decoder = HexDecoder::new();
        assert_eq!(decoder.feed_line(b":00000001FF"), Ok(None));
        assert!(decoder.is_finished());
        assert_eq!(decoder.feed_line(b"garbage"), Ok(None));
    }

    #[test]
    fn test_blank_lines_and_crlf() {
        let chunks = decode("\r\n:0100000055AA\r\n\r\n").unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_checksum_mismatch() {
        let err = decode("\n:0100000055AB\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(
            err.kind,
            HexErrorKind::ChecksumMismatch {
                expected: 0xAB,
                computed: 0xAA
            }
        );
    }

    #[test]
    fn test_malformed_lines() {
        assert_eq!(
            decode("0100000055AA").unwrap_err().kind,
            HexErrorKind::MissingStartCode
        );
        assert_eq!(
            decode(":01000000G5AA").unwrap_err().kind,
            HexErrorKind::InvalidDigit
        );
        assert_eq!(
            decode(":0200000055AA").unwrap_err().kind,
            HexErrorKind::InvalidLength
        );
        assert_eq!(
            decode(":0000000AF6").unwrap_err().kind,
            HexErrorKind::UnsupportedRecord(0x0A)
        );
        assert_eq!(
            decode(":0100000400FB").unwrap_err().kind,
            HexErrorKind::InvalidAddressRecord
        );
    }
}
