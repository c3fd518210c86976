//! BIFF8 (Binary Interchange File Format) record streams.
//!
//! A BIFF8 stream is a sequence of records, each with a 4-byte header
//! (2 bytes record type + 2 bytes body length) followed by the body.
//!
//! CONTINUE records (type 0x003C) extend the body of the preceding record
//! beyond the 8224-byte per-record limit. The reader merges them and keeps
//! the merge points, which string decoding and verbatim re-writing need.
//!
//! The stream is made of substreams bracketed by BOF/EOF: the workbook
//! globals first, then one per sheet.

pub mod cells;
pub mod conformance;
pub mod defaults;
pub mod formula;
pub mod links;
pub mod names;
pub mod parser;
pub mod records;
pub mod rgce;
pub mod strings;

use std::io::{Read, Seek, Write};

use crate::error::{XlsError, XlsResult};
use records::{BOF, CONTINUE, EOF, MAX_RECORD_DATA};

/// A single BIFF8 record (with CONTINUE bodies already merged).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiffRecord {
    /// Record type ID (e.g. `records::SST`, `records::NUMBER`).
    pub record_type: u16,
    /// Record body bytes (CONTINUE records have been concatenated).
    pub data: Vec<u8>,
    /// Byte offset of this record's header in the stream (for diagnostics).
    pub stream_offset: u64,
    /// Offsets in `data` where a merged CONTINUE body begins
    pub continue_offsets: Vec<usize>,
}

impl BiffRecord {
    /// A record built in memory, not read from a stream
    pub fn new(record_type: u16, data: Vec<u8>) -> Self {
        Self {
            record_type,
            data,
            stream_offset: 0,
            continue_offsets: Vec::new(),
        }
    }

    /// `Malformed` error pointing at this record
    pub fn malformed<S: Into<String>>(&self, reason: S) -> XlsError {
        XlsError::malformed(self.record_type, self.stream_offset, reason)
    }
}

/// Reads all BIFF8 records from a byte stream, merging CONTINUE records
/// into their parent.
///
/// Returns the records in order. Each record's `data` field contains the
/// full body (including any CONTINUE extensions).
pub fn read_all_records<R: Read + Seek>(stream: &mut R) -> XlsResult<Vec<BiffRecord>> {
    let mut records: Vec<BiffRecord> = Vec::new();
    let mut header_buf = [0u8; 4];

    loop {
        let stream_offset = stream.stream_position()?;

        match stream.read_exact(&mut header_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(XlsError::Io(e)),
        }

        let record_type = u16::from_le_bytes([header_buf[0], header_buf[1]]);
        let body_len = u16::from_le_bytes([header_buf[2], header_buf[3]]) as usize;

        // Trailing zero padding in the OLE2 sector
        if record_type == 0 && body_len == 0 {
            break;
        }

        let mut body = vec![0u8; body_len];
        if body_len > 0 {
            stream.read_exact(&mut body).map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    XlsError::Parse(format!(
                        "record 0x{record_type:04X} at offset {stream_offset} is truncated"
                    ))
                } else {
                    XlsError::Io(e)
                }
            })?;
        }

        if record_type == CONTINUE {
            match records.last_mut() {
                Some(prev) => {
                    prev.continue_offsets.push(prev.data.len());
                    prev.data.extend_from_slice(&body);
                }
                None => log::warn!("dropping CONTINUE record at offset {stream_offset} with no parent"),
            }
        } else {
            records.push(BiffRecord {
                record_type,
                data: body,
                stream_offset,
                continue_offsets: Vec::new(),
            });
        }
    }

    Ok(records)
}

fn write_header<W: Write>(out: &mut W, record_type: u16, len: usize) -> XlsResult<()> {
    out.write_all(&record_type.to_le_bytes())?;
    out.write_all(&(len as u16).to_le_bytes())?;
    Ok(())
}

/// Write one record, moving anything past 8224 bytes into CONTINUE records
pub fn write_record<W: Write>(out: &mut W, record_type: u16, data: &[u8]) -> XlsResult<()> {
    let mut chunks = data.chunks(MAX_RECORD_DATA);
    let first = chunks.next().unwrap_or(&[]);
    write_header(out, record_type, first.len())?;
    out.write_all(first)?;
    for chunk in chunks {
        write_header(out, CONTINUE, chunk.len())?;
        out.write_all(chunk)?;
    }
    Ok(())
}

/// Write a record, splitting at its recorded CONTINUE boundaries when it
/// has them so that pass-through records come out as they went in
pub fn write_biff_record<W: Write>(out: &mut W, record: &BiffRecord) -> XlsResult<()> {
    if record.continue_offsets.is_empty() {
        return write_record(out, record.record_type, &record.data);
    }

    let mut bounds = vec![0];
    bounds.extend(record.continue_offsets.iter().copied());
    bounds.push(record.data.len());
    let valid = bounds
        .windows(2)
        .all(|w| w[0] <= w[1] && w[1] - w[0] <= MAX_RECORD_DATA && w[1] <= record.data.len());
    if !valid {
        return write_record(out, record.record_type, &record.data);
    }

    for (i, w) in bounds.windows(2).enumerate() {
        let record_type = if i == 0 { record.record_type } else { CONTINUE };
        write_header(out, record_type, w[1] - w[0])?;
        out.write_all(&record.data[w[0]..w[1]])?;
    }
    Ok(())
}

/// Write several records in order
pub fn write_records<W: Write>(out: &mut W, records: &[BiffRecord]) -> XlsResult<()> {
    records.iter().try_for_each(|r| write_biff_record(out, r))
}

/// Extract the BOF record fields from a record body.
///
/// Returns `(version, substream_type)`.
/// - `version` should be `0x0600` for BIFF8
/// - `substream_type`: 0x0005 = workbook globals, 0x0010 = worksheet, etc.
pub fn parse_bof(data: &[u8]) -> XlsResult<(u16, u16)> {
    if data.len() < 4 {
        return Err(XlsError::InvalidFormat("BOF record too short".into()));
    }
    let version = u16::from_le_bytes([data[0], data[1]]);
    let dt = u16::from_le_bytes([data[2], data[3]]);
    Ok((version, dt))
}

/// One BOF…EOF run of records
#[derive(Debug, Clone)]
pub struct Substream {
    /// BIFF version from the BOF record
    pub version: u16,
    /// Substream type (`records::BOF_*`)
    pub kind: u16,
    /// Stream offset of the BOF record
    pub offset: u64,
    /// All records, BOF and EOF included. Embedded substreams (charts in a
    /// worksheet) stay inside their parent.
    pub records: Vec<BiffRecord>,
}

impl Substream {
    /// Records between the opening BOF and the closing EOF
    pub fn body(&self) -> &[BiffRecord] {
        let end = match self.records.last() {
            Some(r) if r.record_type == EOF && self.records.len() > 1 => self.records.len() - 1,
            _ => self.records.len(),
        };
        self.records.get(1..end).unwrap_or(&[])
    }
}

/// Group records into BOF…EOF substreams.
///
/// An unterminated substream is returned as-is (without EOF) so the
/// conformance check can report it.
pub fn split_substreams(records: Vec<BiffRecord>) -> XlsResult<Vec<Substream>> {
    let mut streams: Vec<Substream> = Vec::new();
    let mut current: Option<Substream> = None;
    let mut depth = 0usize;

    for rec in records {
        match rec.record_type {
            BOF => {
                if depth == 0 {
                    let (version, kind) = parse_bof(&rec.data)?;
                    current = Some(Substream {
                        version,
                        kind,
                        offset: rec.stream_offset,
                        records: Vec::new(),
                    });
                }
                depth += 1;
                if let Some(stream) = current.as_mut() {
                    stream.records.push(rec);
                }
            }
            EOF if depth > 0 => {
                depth -= 1;
                if let Some(stream) = current.as_mut() {
                    stream.records.push(rec);
                }
                if depth == 0 {
                    streams.extend(current.take());
                }
            }
            _ => match current.as_mut() {
                Some(stream) => stream.records.push(rec),
                None => log::warn!(
                    "ignoring record 0x{:04X} at offset {} outside any substream",
                    rec.record_type,
                    rec.stream_offset
                ),
            },
        }
    }
    streams.extend(current);

    Ok(streams)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn stream_of(records: &[(u16, Vec<u8>)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (t, d) in records {
            write_record(&mut out, *t, d).unwrap();
        }
        out
    }

    #[test]
    fn test_long_record_round_trips_through_continue() {
        let body: Vec<u8> = (0..20_000u32).map(|i| i as u8).collect();
        let bytes = stream_of(&[(0x00FC, body.clone())]);

        let records = read_all_records(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data, body);
        assert_eq!(records[0].continue_offsets, vec![8224, 16448]);
    }

    #[test]
    fn test_pass_through_keeps_continue_boundaries() {
        let mut bytes = Vec::new();
        write_record(&mut bytes, 0x01B6, &[1, 2, 3]).unwrap();
        write_record(&mut bytes, CONTINUE, &[4, 5]).unwrap();

        let records = read_all_records(&mut Cursor::new(bytes.clone())).unwrap();
        assert_eq!(records[0].continue_offsets, vec![3]);

        let mut again = Vec::new();
        write_records(&mut again, &records).unwrap();
        assert_eq!(again, bytes);
    }

    #[test]
    fn test_truncated_record_is_a_parse_error() {
        let bytes = vec![0x06, 0x00, 0x10, 0x00, 1, 2];
        assert!(matches!(
            read_all_records(&mut Cursor::new(bytes)),
            Err(XlsError::Parse(_))
        ));
    }

    #[test]
    fn test_split_substreams_keeps_embedded_charts_inside() {
        let bof = |dt: u16| {
            let mut d = 0x0600u16.to_le_bytes().to_vec();
            d.extend_from_slice(&dt.to_le_bytes());
            (BOF, d)
        };
        let bytes = stream_of(&[
            bof(records::BOF_WORKBOOK_GLOBALS),
            (EOF, vec![]),
            bof(records::BOF_WORKSHEET),
            bof(records::BOF_CHART),
            (EOF, vec![]),
            (records::NUMBER, vec![0; 14]),
            (EOF, vec![]),
        ]);
        let records = read_all_records(&mut Cursor::new(bytes)).unwrap();
        let streams = split_substreams(records).unwrap();

        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].kind, records::BOF_WORKBOOK_GLOBALS);
        assert_eq!(streams[1].kind, records::BOF_WORKSHEET);
        assert_eq!(streams[1].records.len(), 5);
        assert_eq!(streams[1].body().len(), 3);
    }
}
