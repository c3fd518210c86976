//! BIFF8 Unicode strings.
//!
//! BIFF8 strings have a complex encoding:
//! - Header: char_count (1 or 2 bytes) + flags (1 byte)
//! - Flags bit 0 (`fHighByte`): 0 = compressed Latin-1, 1 = uncompressed UTF-16LE
//! - Flags bit 2 (`fExtSt`): extended string data follows (Asian phonetic)
//! - Flags bit 3 (`fRichSt`): rich text run array follows
//! - If fRichSt: 2-byte run count follows the flags
//! - If fExtSt: 4-byte extended data size follows
//! - Then the character data
//! - Then the rich text runs (4 bytes each) if fRichSt
//! - Then the extended data if fExtSt
//!
//! In SST and STRING records, strings can span CONTINUE records. The
//! CONTINUE record repeats the flags byte so the encoding may switch
//! (compressed ↔ uncompressed) in the middle of a string.

use super::parser::{put_u16, put_u32, put_u8, read_bytes, read_u16, read_u32, read_u8, skip};
use super::records::{CONTINUE, MAX_RECORD_DATA, SST};
use super::BiffRecord;
use crate::error::{XlsError, XlsResult};

const FLAG_HIGH_BYTE: u8 = 0x01;
const FLAG_EXT: u8 = 0x04;
const FLAG_RICH: u8 = 0x08;

/// Read a BIFF8 "short" string (1-byte length prefix, used in BOUNDSHEET etc.).
pub fn read_short_string(data: &[u8], offset: &mut usize) -> XlsResult<String> {
    let char_count = read_u8(data, offset)? as u16;
    read_flagged_chars(data, offset, char_count)
}

/// Read a flags byte followed by `char_count` characters (NAME records
/// keep the count elsewhere).
pub fn read_flagged_chars(data: &[u8], offset: &mut usize, char_count: u16) -> XlsResult<String> {
    let flags = read_u8(data, offset)?;
    read_character_data(data, offset, char_count as usize, flags & FLAG_HIGH_BYTE != 0, &[])
}

/// Read a BIFF8 Unicode string with a 2-byte length prefix (LABEL, STRING, SUPBOOK, ...).
pub fn read_unicode_string(data: &[u8], offset: &mut usize) -> XlsResult<String> {
    read_unicode_string_continued(data, offset, &[])
}

/// Read a 2-byte-length string that may cross CONTINUE boundaries.
///
/// `boundaries` are the offsets in `data` where a CONTINUE body starts, as
/// recorded in [`BiffRecord::continue_offsets`].
pub fn read_unicode_string_continued(
    data: &[u8],
    offset: &mut usize,
    boundaries: &[usize],
) -> XlsResult<String> {
    let char_count = read_u16(data, offset)?;
    let flags = read_u8(data, offset)?;

    let run_count = if flags & FLAG_RICH != 0 {
        read_u16(data, offset)?
    } else {
        0
    };
    let ext_size = if flags & FLAG_EXT != 0 {
        read_u32(data, offset)?
    } else {
        0
    };

    let text = read_character_data(
        data,
        offset,
        char_count as usize,
        flags & FLAG_HIGH_BYTE != 0,
        boundaries,
    )?;

    // Rich text runs (char_pos u16 + font_idx u16) and phonetic data
    skip(data, offset, run_count as usize * 4)?;
    skip(data, offset, ext_size as usize)?;

    Ok(text)
}

/// Read character data, re-reading the flags byte at each CONTINUE boundary.
fn read_character_data(
    data: &[u8],
    offset: &mut usize,
    char_count: usize,
    mut wide: bool,
    boundaries: &[usize],
) -> XlsResult<String> {
    let mut units: Vec<u16> = Vec::with_capacity(char_count);
    let mut remaining = char_count;

    while remaining > 0 {
        if boundaries.binary_search(offset).is_ok() {
            wide = read_u8(data, offset)? & FLAG_HIGH_BYTE != 0;
        }
        let limit = boundaries
            .iter()
            .copied()
            .find(|b| *b > *offset)
            .unwrap_or(data.len())
            .min(data.len());
        let unit_size = if wide { 2 } else { 1 };
        let take = ((limit.saturating_sub(*offset)) / unit_size).min(remaining);
        if take == 0 {
            return Err(XlsError::Parse(format!(
                "string data too short: {} characters missing at offset {}",
                remaining, *offset
            )));
        }

        let bytes = read_bytes(data, offset, take * unit_size)?;
        if wide {
            units.extend(bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])));
        } else {
            units.extend(bytes.iter().map(|&b| b as u16));
        }
        remaining -= take;
    }

    String::from_utf16(&units).map_err(|e| XlsError::Parse(format!("invalid UTF-16 string: {e}")))
}

/// Parse the SST (Shared String Table) from a merged record body.
///
/// The SST body starts with:
/// - `total_strings` (4 bytes, u32) — total string refs in workbook
/// - `unique_strings` (4 bytes, u32) — number of unique strings in this table
/// - Then `unique_strings` Unicode string entries
pub fn parse_sst(data: &[u8], boundaries: &[usize]) -> XlsResult<Vec<String>> {
    let mut offset = 0;

    let _total_strings = read_u32(data, &mut offset)?;
    let unique_count = read_u32(data, &mut offset)? as usize;

    let mut strings = Vec::with_capacity(unique_count.min(data.len()));

    for i in 0..unique_count {
        match read_unicode_string_continued(data, &mut offset, boundaries) {
            Ok(s) => strings.push(s),
            Err(e) => {
                // Some writers pad or truncate the table; keep what decoded.
                log::warn!("SST parse error at string {i}/{unique_count}: {e}");
                break;
            }
        }
    }

    Ok(strings)
}

// ── Writers ─────────────────────────────────────────────────────────────

fn is_compressible(s: &str) -> bool {
    s.chars().all(|c| (c as u32) <= 0xFF)
}

fn put_chars(out: &mut Vec<u8>, units: &[u16], wide: bool) {
    for &u in units {
        if wide {
            put_u16(out, u);
        } else {
            put_u8(out, u as u8);
        }
    }
}

/// Append flags byte and characters, without a count
pub fn write_flagged_chars(out: &mut Vec<u8>, s: &str) {
    let wide = !is_compressible(s);
    let units: Vec<u16> = s.encode_utf16().collect();
    put_u8(out, if wide { FLAG_HIGH_BYTE } else { 0 });
    put_chars(out, &units, wide);
}

/// Number of UTF-16 code units BIFF counts for a string
pub fn char_count(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Append a string with a 1-byte length prefix
pub fn write_short_string(out: &mut Vec<u8>, s: &str) -> XlsResult<()> {
    let count = u8::try_from(char_count(s))
        .map_err(|_| XlsError::Unsupported(format!("string longer than 255 characters: {s:.20}…")))?;
    put_u8(out, count);
    write_flagged_chars(out, s);
    Ok(())
}

/// Append a string with a 2-byte length prefix
pub fn write_unicode_string(out: &mut Vec<u8>, s: &str) -> XlsResult<()> {
    let count = u16::try_from(char_count(s))
        .map_err(|_| XlsError::Unsupported("string longer than 65535 characters".into()))?;
    put_u16(out, count);
    write_flagged_chars(out, s);
    Ok(())
}

/// A record whose body is a single unicode string (STRING), split into
/// CONTINUE records with a fresh flags byte at each boundary
pub fn unicode_string_record(record_type: u16, s: &str) -> XlsResult<BiffRecord> {
    let wide = !is_compressible(s);
    let flags = if wide { FLAG_HIGH_BYTE } else { 0 };
    let unit_size = if wide { 2 } else { 1 };
    let units: Vec<u16> = s.encode_utf16().collect();
    let count = u16::try_from(units.len())
        .map_err(|_| XlsError::Unsupported("string longer than 65535 characters".into()))?;

    let mut data = Vec::with_capacity(3 + units.len() * unit_size);
    put_u16(&mut data, count);
    put_u8(&mut data, flags);

    let mut boundaries = Vec::new();
    let mut record_start = 0;
    let mut written = 0;
    loop {
        let room = (record_start + MAX_RECORD_DATA - data.len()) / unit_size;
        let take = room.min(units.len() - written);
        put_chars(&mut data, &units[written..written + take], wide);
        written += take;
        if written == units.len() {
            break;
        }
        record_start = data.len();
        boundaries.push(record_start);
        put_u8(&mut data, flags);
    }

    let mut record = BiffRecord::new(record_type, data);
    record.continue_offsets = boundaries;
    Ok(record)
}

/// Collects the strings of LABELSST cells for one SST record
#[derive(Debug, Default)]
pub struct SstBuilder {
    strings: Vec<String>,
    index: std::collections::HashMap<String, u32>,
    total: u32,
}

impl SstBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `s` in the table, adding it if new
    pub fn intern(&mut self, s: &str) -> u32 {
        self.total += 1;
        if let Some(&i) = self.index.get(s) {
            return i;
        }
        let i = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), i);
        i
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// The SST record and its CONTINUE records.
    ///
    /// Strings are split by hand: a string continued in the next record gets
    /// a fresh flags byte, so the generic splitter cannot be used.
    pub fn into_records(self) -> XlsResult<Vec<BiffRecord>> {
        let mut records = Vec::new();
        let mut current = Vec::with_capacity(MAX_RECORD_DATA);
        let mut record_type = SST;

        put_u32(&mut current, self.total);
        put_u32(&mut current, self.strings.len() as u32);

        for s in &self.strings {
            let wide = !is_compressible(s);
            let unit_size = if wide { 2 } else { 1 };
            let units: Vec<u16> = s.encode_utf16().collect();
            let count = u16::try_from(units.len())
                .map_err(|_| XlsError::Unsupported("string longer than 65535 characters".into()))?;

            // Header and the first character stay together
            if current.len() + 3 + unit_size > MAX_RECORD_DATA {
                records.push(BiffRecord::new(record_type, std::mem::take(&mut current)));
                record_type = CONTINUE;
            }
            put_u16(&mut current, count);
            put_u8(&mut current, if wide { FLAG_HIGH_BYTE } else { 0 });

            let mut written = 0;
            loop {
                let room = (MAX_RECORD_DATA - current.len()) / unit_size;
                let take = room.min(units.len() - written);
                put_chars(&mut current, &units[written..written + take], wide);
                written += take;
                if written == units.len() {
                    break;
                }
                records.push(BiffRecord::new(record_type, std::mem::take(&mut current)));
                record_type = CONTINUE;
                put_u8(&mut current, if wide { FLAG_HIGH_BYTE } else { 0 });
            }
        }
        records.push(BiffRecord::new(record_type, current));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_read_compressed_string() {
        let data = [0x03, 0x00, 0x00, b'A', b'B', b'C'];
        let mut offset = 0;
        let s = read_unicode_string(&data, &mut offset).unwrap();
        assert_eq!(s, "ABC");
        assert_eq!(offset, 6);
    }

    #[test]
    fn test_read_wide_string() {
        let data = [0x02, 0x00, 0x01, b'H', 0x00, b'i', 0x00];
        let mut offset = 0;
        let s = read_unicode_string(&data, &mut offset).unwrap();
        assert_eq!(s, "Hi");
        assert_eq!(offset, 7);
    }

    #[test]
    fn test_read_short_string() {
        let data = [0x02, 0x00, b'O', b'K'];
        let mut offset = 0;
        let s = read_short_string(&data, &mut offset).unwrap();
        assert_eq!(s, "OK");
    }

    #[test]
    fn test_read_rich_string_skips_runs() {
        // "AB" with one formatting run, then a trailing byte
        let data = [0x02, 0x00, 0x08, 0x01, 0x00, b'A', b'B', 0, 0, 1, 0, 0xEE];
        let mut offset = 0;
        assert_eq!(read_unicode_string(&data, &mut offset).unwrap(), "AB");
        assert_eq!(offset, 11);
    }

    #[test]
    fn test_string_switches_encoding_at_continue() {
        // "ab" compressed, then a CONTINUE at offset 5 switching to UTF-16 for "€"
        let mut data = vec![0x03, 0x00, 0x00, b'a', b'b'];
        data.push(0x01);
        data.extend_from_slice(&0x20ACu16.to_le_bytes());
        let mut offset = 0;
        let s = read_unicode_string_continued(&data, &mut offset, &[5]).unwrap();
        assert_eq!(s, "ab€");
        assert_eq!(offset, data.len());
    }

    #[test]
    fn test_parse_sst() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&[0x01, 0x00, 0x00, b'A']);
        buf.extend_from_slice(&[0x02, 0x00, 0x00, b'B', b'C']);

        let strings = parse_sst(&buf, &[]).unwrap();
        assert_eq!(strings, vec!["A", "BC"]);
    }

    #[test]
    fn test_write_and_read_unicode_string() {
        let mut out = Vec::new();
        write_unicode_string(&mut out, "Grüße €").unwrap();
        let mut offset = 0;
        assert_eq!(read_unicode_string(&out, &mut offset).unwrap(), "Grüße €");
        assert_eq!(offset, out.len());
    }

    #[test]
    fn test_short_string_limit() {
        let mut out = Vec::new();
        assert!(write_short_string(&mut out, &"x".repeat(256)).is_err());
        assert!(write_short_string(&mut out, &"x".repeat(255)).is_ok());
    }

    #[test]
    fn test_sst_builder_splits_long_tables() {
        let mut sst = SstBuilder::new();
        let long = "y".repeat(9000);
        assert_eq!(sst.intern("first"), 0);
        assert_eq!(sst.intern(&long), 1);
        assert_eq!(sst.intern("first"), 0);

        let records = sst.into_records().unwrap();
        assert!(records.len() >= 2);
        assert_eq!(records[0].record_type, SST);
        assert!(records[1..].iter().all(|r| r.record_type == CONTINUE));
        assert!(records.iter().all(|r| r.data.len() <= MAX_RECORD_DATA));

        // Merge the way the stream reader does and parse back
        let mut merged = Vec::new();
        let mut boundaries = Vec::new();
        for r in &records {
            if !merged.is_empty() {
                boundaries.push(merged.len());
            }
            merged.extend_from_slice(&r.data);
        }
        let strings = parse_sst(&merged, &boundaries).unwrap();
        assert_eq!(strings, vec!["first".to_string(), long]);
        assert_eq!(u32::from_le_bytes([merged[0], merged[1], merged[2], merged[3]]), 3);
    }

    #[test]
    fn test_long_string_record_splits_with_flags() {
        let text = "x".repeat(9000);
        let record = unicode_string_record(0x0207, &text).unwrap();
        assert_eq!(record.continue_offsets, vec![MAX_RECORD_DATA]);
        assert_eq!(record.data[MAX_RECORD_DATA], 0);
        let mut offset = 0;
        let back =
            read_unicode_string_continued(&record.data, &mut offset, &record.continue_offsets)
                .unwrap();
        assert_eq!(back, text);
    }
}
