//! Intel-HEX parsing and serialization (§4.B).
//!
//! Records are tokenised on any of `\r\n`, `\r`, or `\n`; empty lines are
//! ignored. Each record is a run-length/checksum-verified line of the form
//! `:LLAAAATT[DD...]CC`.

use crate::error::ParseError;
use crate::segment::Segment;

const RECORD_DATA: u8 = 0x00;
const RECORD_EOF: u8 = 0x01;
const RECORD_EXT_SEGMENT: u8 = 0x02;
const RECORD_START_SEGMENT: u8 = 0x03;
const RECORD_EXT_LINEAR: u8 = 0x04;
const RECORD_START_LINEAR: u8 = 0x05;

/// Parse Intel-HEX text into an ordered list of segments (§4.B).
pub fn parse(text: &str) -> Result<Vec<Segment>, ParseError> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut upper_address: u32 = 0;
    let mut next_address: Option<u32> = None;

    for (line_no, raw_line) in split_lines(text).enumerate() {
        let line = line_no + 1;
        if raw_line.is_empty() {
            continue;
        }

        let record = parse_record(raw_line, line)?;

        match record.record_type {
            RECORD_DATA => {
                let address = upper_address | record.address as u32;
                match (next_address, segments.last_mut()) {
                    (Some(expected), Some(segment)) if expected == address => {
                        segment.extend(Segment::new(address, record.data));
                    }
                    _ => {
                        segments.push(Segment::new(address, record.data));
                    }
                }
                next_address = Some(address + record.byte_count as u32);
            }
            RECORD_EOF => {
                if record.byte_count != 0 {
                    return Err(ParseError::InvalidRecord {
                        line,
                        reason: "EOF record must have zero data length".into(),
                    });
                }
                break;
            }
            RECORD_EXT_SEGMENT => {
                require_len(&record, line, 2)?;
                upper_address = (u32::from(record.data[0]) << 12) | (u32::from(record.data[1]) << 4);
                next_address = None;
            }
            RECORD_START_SEGMENT => {
                // accepted, no effect on subsequent addressing
            }
            RECORD_EXT_LINEAR => {
                require_len(&record, line, 2)?;
                upper_address = (u32::from(record.data[0]) << 24) | (u32::from(record.data[1]) << 16);
                next_address = None;
            }
            RECORD_START_LINEAR => {
                require_len(&record, line, 4)?;
                next_address = None;
            }
            other => {
                return Err(ParseError::InvalidRecord {
                    line,
                    reason: format!("unknown record type {other:#04x}"),
                });
            }
        }
    }

    Ok(segments)
}

fn require_len(record: &Record, line: usize, expected: usize) -> Result<(), ParseError> {
    if record.data.len() != expected {
        return Err(ParseError::InvalidRecord {
            line,
            reason: format!("expected {expected} data bytes, found {}", record.data.len()),
        });
    }
    Ok(())
}

struct Record {
    byte_count: u8,
    record_type: u8,
    address: u16,
    data: Vec<u8>,
}

fn parse_record(line: &str, line_no: usize) -> Result<Record, ParseError> {
    let line = line.strip_prefix(':').ok_or_else(|| ParseError::InvalidRecord {
        line: line_no,
        reason: "record must start with ':'".into(),
    })?;

    let bytes = decode_hex(line, line_no)?;
    if bytes.len() < 5 {
        return Err(ParseError::InvalidLength { line: line_no });
    }

    let byte_count = bytes[0];
    if bytes.len() != byte_count as usize + 5 {
        return Err(ParseError::InvalidLength { line: line_no });
    }

    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != 0 {
        return Err(ParseError::InvalidChecksum { line: line_no });
    }

    let address = u16::from_be_bytes([bytes[1], bytes[2]]);
    let record_type = bytes[3];
    let data = bytes[4..4 + byte_count as usize].to_vec();

    Ok(Record { byte_count, record_type, address, data })
}

fn decode_hex(line: &str, line_no: usize) -> Result<Vec<u8>, ParseError> {
    if line.len() % 2 != 0 {
        return Err(ParseError::InvalidLength { line: line_no });
    }
    let mut bytes = Vec::with_capacity(line.len() / 2);
    let chars: Vec<char> = line.chars().collect();
    for pair in chars.chunks(2) {
        let hi = pair[0].to_digit(16).ok_or_else(|| ParseError::InvalidRecord {
            line: line_no,
            reason: "non-hex digit".into(),
        })?;
        let lo = pair[1].to_digit(16).ok_or_else(|| ParseError::InvalidRecord {
            line: line_no,
            reason: "non-hex digit".into(),
        })?;
        bytes.push(((hi << 4) | lo) as u8);
    }
    Ok(bytes)
}

fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split(['\r', '\n']).filter(|s| !s.is_empty())
}

/// Maximum number of data bytes per emitted record.
const SERIALIZE_RECORD_LEN: usize = 16;

/// Re-serialize a list of segments back to Intel-HEX text (supplements §4.B;
/// used by the round-trip property in §8).
pub fn serialize(segments: &[Segment]) -> String {
    let mut out = String::new();
    let mut upper_address: u32 = 0;

    for segment in segments {
        let mut addr = segment.first();
        for chunk in segment.data().chunks(SERIALIZE_RECORD_LEN) {
            let chunk_upper = addr >> 16;
            if chunk_upper != upper_address {
                upper_address = chunk_upper;
                write_record(
                    &mut out,
                    RECORD_EXT_LINEAR,
                    0,
                    &[(upper_address >> 8) as u8, upper_address as u8],
                );
            }
            write_record(&mut out, RECORD_DATA, (addr & 0xFFFF) as u16, chunk);
            addr += chunk.len() as u32;
        }
    }

    write_record(&mut out, RECORD_EOF, 0, &[]);
    out
}

fn write_record(out: &mut String, record_type: u8, address: u16, data: &[u8]) {
    let mut bytes = Vec::with_capacity(5 + data.len());
    bytes.push(data.len() as u8);
    bytes.push((address >> 8) as u8);
    bytes.push(address as u8);
    bytes.push(record_type);
    bytes.extend_from_slice(data);
    let checksum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    bytes.push(checksum.wrapping_neg());

    out.push(':');
    for byte in bytes {
        out.push_str(&format!("{byte:02X}"));
    }
    out.push_str("\r\n");
}
