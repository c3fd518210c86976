//! Sheet structure and plain cell records.
//!
//! Value cells (NUMBER, RK, MULRK, LABEL, LABELSST, BLANK, MULBLANK, BOOLERR)
//! are read into [`CellEntry`] values; MULRK and MULBLANK expand to one entry
//! per column. Numbers are always written back as NUMBER and text as
//! LABELSST.

use biffbook_core::{CellError, CellRange};

use super::parser::{put_f64, put_u16, put_u32, put_u8, read_f64, read_rk, read_u16, read_u32, read_u8};
use super::records::{
    BIFF8_VERSION, BLANK, BOF, BOOLERR, BOUNDSHEET, DIMENSION, LABEL, LABELSST, MULBLANK, MULRK,
    NUMBER, RK, ROW,
};
use super::strings::{read_short_string, read_unicode_string, write_short_string, write_unicode_string};
use super::BiffRecord;
use crate::error::{XlsError, XlsResult};

/// BOF record (16 bytes in BIFF8)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BofRecord {
    pub version: u16,
    pub kind: u16,
    pub build: u16,
    pub year: u16,
    pub history: u32,
    pub lowest_version: u32,
}

impl BofRecord {
    /// BOF written for new streams
    pub fn new(kind: u16) -> Self {
        Self {
            version: BIFF8_VERSION,
            kind,
            build: 0x0DBB,
            year: 0x07CC,
            history: 0,
            lowest_version: 6,
        }
    }

    pub fn parse(data: &[u8]) -> XlsResult<Self> {
        let mut off = 0;
        let version = read_u16(data, &mut off)?;
        let kind = read_u16(data, &mut off)?;
        // Older writers stop after the first two fields
        let build = read_u16(data, &mut off).unwrap_or(0);
        let year = read_u16(data, &mut off).unwrap_or(0);
        let history = read_u32(data, &mut off).unwrap_or(0);
        let lowest_version = read_u32(data, &mut off).unwrap_or(0);
        Ok(Self {
            version,
            kind,
            build,
            year,
            history,
            lowest_version,
        })
    }

    pub fn to_record(&self) -> BiffRecord {
        let mut out = Vec::with_capacity(16);
        put_u16(&mut out, self.version);
        put_u16(&mut out, self.kind);
        put_u16(&mut out, self.build);
        put_u16(&mut out, self.year);
        put_u32(&mut out, self.history);
        put_u32(&mut out, self.lowest_version);
        BiffRecord::new(BOF, out)
    }
}

/// BOUNDSHEET: sheet name, kind, visibility and stream position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundSheetRecord {
    /// Absolute stream offset of the sheet's BOF
    pub position: u32,
    /// 0 = visible, 1 = hidden, 2 = very hidden
    pub visibility: u8,
    /// 0 = worksheet, 1 = macro sheet, 2 = chart, 6 = VBA module
    pub kind: u8,
    pub name: String,
}

impl BoundSheetRecord {
    /// Offset of the position field inside the body, for patching
    pub const POSITION_OFFSET: usize = 0;

    pub fn parse(data: &[u8]) -> XlsResult<Self> {
        let mut off = 0;
        let position = read_u32(data, &mut off)?;
        let visibility = read_u8(data, &mut off)?;
        let kind = read_u8(data, &mut off)?;
        let name = read_short_string(data, &mut off)?;
        Ok(Self {
            position,
            visibility,
            kind,
            name,
        })
    }

    pub fn to_record(&self) -> XlsResult<BiffRecord> {
        let mut out = Vec::with_capacity(8 + self.name.len() * 2);
        put_u32(&mut out, self.position);
        put_u8(&mut out, self.visibility);
        put_u8(&mut out, self.kind);
        write_short_string(&mut out, &self.name)?;
        Ok(BiffRecord::new(BOUNDSHEET, out))
    }
}

/// DIMENSION: used range, with exclusive upper bounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DimensionRecord {
    pub first_row: u32,
    pub last_row_plus1: u32,
    pub first_col: u16,
    pub last_col_plus1: u16,
}

impl DimensionRecord {
    /// All zero for an empty sheet
    pub fn from_range(range: Option<CellRange>) -> Self {
        match range {
            Some(r) => Self {
                first_row: r.start.row,
                last_row_plus1: r.end.row + 1,
                first_col: r.start.col,
                last_col_plus1: r.end.col + 1,
            },
            None => Self::default(),
        }
    }

    /// The used range, or `None` for an empty sheet
    pub fn range(&self) -> Option<CellRange> {
        if self.last_row_plus1 <= self.first_row || self.last_col_plus1 <= self.first_col {
            return None;
        }
        Some(CellRange::from_indices(
            self.first_row,
            self.first_col,
            self.last_row_plus1 - 1,
            self.last_col_plus1 - 1,
        ))
    }

    pub fn parse(data: &[u8]) -> XlsResult<Self> {
        let mut off = 0;
        Ok(Self {
            first_row: read_u32(data, &mut off)?,
            last_row_plus1: read_u32(data, &mut off)?,
            first_col: read_u16(data, &mut off)?,
            last_col_plus1: read_u16(data, &mut off)?,
        })
    }

    pub fn to_record(&self) -> BiffRecord {
        let mut out = Vec::with_capacity(14);
        put_u32(&mut out, self.first_row);
        put_u32(&mut out, self.last_row_plus1);
        put_u16(&mut out, self.first_col);
        put_u16(&mut out, self.last_col_plus1);
        put_u16(&mut out, 0);
        BiffRecord::new(DIMENSION, out)
    }
}

/// ROW record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRecord {
    pub row: u16,
    pub first_col: u16,
    pub last_col_plus1: u16,
    /// Height in twips; bit 15 set means default height
    pub height: u16,
    pub flags: u16,
    /// Default XF index (bits 0-11) and border flags
    pub xf_field: u16,
}

impl RowRecord {
    pub const DEFAULT_FLAGS: u16 = 0x0100;
    pub const DEFAULT_XF_FIELD: u16 = 0x000F;
    pub const DEFAULT_HEIGHT: u16 = 0x00FF;

    pub const FLAG_HIDDEN: u16 = 0x0020;
    pub const FLAG_CUSTOM_HEIGHT: u16 = 0x0040;

    pub fn new(row: u16) -> Self {
        Self {
            row,
            first_col: 0,
            last_col_plus1: 0,
            height: Self::DEFAULT_HEIGHT,
            flags: Self::DEFAULT_FLAGS,
            xf_field: Self::DEFAULT_XF_FIELD,
        }
    }

    pub fn parse(data: &[u8]) -> XlsResult<Self> {
        let mut off = 0;
        let row = read_u16(data, &mut off)?;
        let first_col = read_u16(data, &mut off)?;
        let last_col_plus1 = read_u16(data, &mut off)?;
        let height = read_u16(data, &mut off)?;
        off += 4;
        let flags = read_u16(data, &mut off).unwrap_or(Self::DEFAULT_FLAGS);
        let xf_field = read_u16(data, &mut off).unwrap_or(Self::DEFAULT_XF_FIELD);
        Ok(Self {
            row,
            first_col,
            last_col_plus1,
            height,
            flags,
            xf_field,
        })
    }

    pub fn to_record(&self) -> BiffRecord {
        let mut out = Vec::with_capacity(16);
        put_u16(&mut out, self.row);
        put_u16(&mut out, self.first_col);
        put_u16(&mut out, self.last_col_plus1);
        put_u16(&mut out, self.height);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        put_u16(&mut out, self.flags);
        put_u16(&mut out, self.xf_field);
        BiffRecord::new(ROW, out)
    }
}

/// Content of a value cell record
#[derive(Debug, Clone, PartialEq)]
pub enum CellData {
    Blank,
    Number(f64),
    /// LABELSST: index into the shared string table
    SstIndex(u32),
    /// LABEL: inline text
    Text(String),
    Boolean(bool),
    Error(CellError),
}

/// One cell read from a value record
#[derive(Debug, Clone, PartialEq)]
pub struct CellEntry {
    pub row: u16,
    pub col: u16,
    pub xf: u16,
    pub value: CellData,
}

fn header(data: &[u8], off: &mut usize) -> XlsResult<(u16, u16, u16)> {
    Ok((read_u16(data, off)?, read_u16(data, off)?, read_u16(data, off)?))
}

/// Trailing last-column field of MULRK/MULBLANK
fn trailing_last_col(data: &[u8], name: &str) -> XlsResult<(u16, usize)> {
    if data.len() < 6 {
        return Err(XlsError::Parse(format!("{name} record too short")));
    }
    let end = data.len() - 2;
    Ok((u16::from_le_bytes([data[end], data[end + 1]]), end))
}

/// Read the cells of one value record
pub fn parse_cell_record(record: &BiffRecord) -> XlsResult<Vec<CellEntry>> {
    let data = &record.data;
    let mut off = 0;
    let single = |value: CellData, row, col, xf| vec![CellEntry { row, col, xf, value }];

    match record.record_type {
        NUMBER => {
            let (row, col, xf) = header(data, &mut off)?;
            Ok(single(CellData::Number(read_f64(data, &mut off)?), row, col, xf))
        }
        RK => {
            let (row, col, xf) = header(data, &mut off)?;
            Ok(single(CellData::Number(read_rk(data, &mut off)?), row, col, xf))
        }
        LABELSST => {
            let (row, col, xf) = header(data, &mut off)?;
            Ok(single(CellData::SstIndex(read_u32(data, &mut off)?), row, col, xf))
        }
        LABEL => {
            let (row, col, xf) = header(data, &mut off)?;
            Ok(single(CellData::Text(read_unicode_string(data, &mut off)?), row, col, xf))
        }
        BLANK => {
            let (row, col, xf) = header(data, &mut off)?;
            Ok(single(CellData::Blank, row, col, xf))
        }
        BOOLERR => {
            let (row, col, xf) = header(data, &mut off)?;
            let value = read_u8(data, &mut off)?;
            let is_error = read_u8(data, &mut off)?;
            let cell = if is_error != 0 {
                CellData::Error(CellError::from_code(value).ok_or_else(|| {
                    XlsError::Parse(format!("unknown error code 0x{value:02X}"))
                })?)
            } else {
                CellData::Boolean(value != 0)
            };
            Ok(single(cell, row, col, xf))
        }
        MULRK => {
            let row = read_u16(data, &mut off)?;
            let first_col = read_u16(data, &mut off)?;
            let (last_col, end) = trailing_last_col(data, "MULRK")?;
            let mut cells = Vec::new();
            let mut col = first_col;
            while off + 6 <= end && col <= last_col {
                let xf = read_u16(data, &mut off)?;
                let value = read_rk(data, &mut off)?;
                cells.push(CellEntry {
                    row,
                    col,
                    xf,
                    value: CellData::Number(value),
                });
                col += 1;
            }
            Ok(cells)
        }
        MULBLANK => {
            let row = read_u16(data, &mut off)?;
            let first_col = read_u16(data, &mut off)?;
            let (last_col, end) = trailing_last_col(data, "MULBLANK")?;
            let mut cells = Vec::new();
            let mut col = first_col;
            while off + 2 <= end && col <= last_col {
                let xf = read_u16(data, &mut off)?;
                cells.push(CellEntry {
                    row,
                    col,
                    xf,
                    value: CellData::Blank,
                });
                col += 1;
            }
            Ok(cells)
        }
        other => Err(XlsError::Parse(format!(
            "record 0x{other:04X} is not a value cell"
        ))),
    }
}

impl CellEntry {
    /// The record this cell is written as
    pub fn to_record(&self) -> XlsResult<BiffRecord> {
        let mut out = Vec::with_capacity(14);
        put_u16(&mut out, self.row);
        put_u16(&mut out, self.col);
        put_u16(&mut out, self.xf);
        let record_type = match &self.value {
            CellData::Blank => BLANK,
            CellData::Number(n) => {
                put_f64(&mut out, *n);
                NUMBER
            }
            CellData::SstIndex(index) => {
                put_u32(&mut out, *index);
                LABELSST
            }
            CellData::Text(text) => {
                write_unicode_string(&mut out, text)?;
                LABEL
            }
            CellData::Boolean(b) => {
                put_u8(&mut out, *b as u8);
                put_u8(&mut out, 0);
                BOOLERR
            }
            CellData::Error(e) => {
                put_u8(&mut out, e.code());
                put_u8(&mut out, 1);
                BOOLERR
            }
        };
        Ok(BiffRecord::new(record_type, out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mulrk_expands_to_cells() {
        let mut data = Vec::new();
        put_u16(&mut data, 3);
        put_u16(&mut data, 1);
        for rk in [0x0000_0002u32 | (100 << 2), 0x3FF0_0000] {
            put_u16(&mut data, 15);
            put_u32(&mut data, rk);
        }
        put_u16(&mut data, 2);

        let cells = parse_cell_record(&BiffRecord::new(MULRK, data)).unwrap();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].value, CellData::Number(100.0));
        assert_eq!((cells[1].col, cells[1].value.clone()), (2, CellData::Number(1.0)));
    }

    #[test]
    fn test_cell_entry_round_trip() {
        for value in [
            CellData::Blank,
            CellData::Number(-3.5),
            CellData::SstIndex(7),
            CellData::Text("inline".into()),
            CellData::Boolean(true),
            CellData::Error(CellError::Na),
        ] {
            let entry = CellEntry {
                row: 10,
                col: 2,
                xf: 15,
                value,
            };
            let record = entry.to_record().unwrap();
            assert_eq!(parse_cell_record(&record).unwrap(), vec![entry]);
        }
    }

    #[test]
    fn test_dimension_uses_exclusive_bounds() {
        let dim = DimensionRecord::from_range(Some(CellRange::from_indices(1, 1, 32_999, 1)));
        assert_eq!(dim.last_row_plus1, 33_000);
        assert_eq!(dim.last_col_plus1, 2);
        let back = DimensionRecord::parse(&dim.to_record().data).unwrap();
        assert_eq!(back.range(), Some(CellRange::from_indices(1, 1, 32_999, 1)));
        assert_eq!(DimensionRecord::from_range(None).range(), None);
    }

    #[test]
    fn test_row_record_defaults() {
        let record = RowRecord::new(4).to_record();
        assert_eq!(record.data.len(), 16);
        assert_eq!(&record.data[12..], &[0x00, 0x01, 0x0F, 0x00]);
        assert_eq!(RowRecord::parse(&record.data).unwrap(), RowRecord::new(4));
    }

    #[test]
    fn test_boundsheet_round_trip() {
        let sheet = BoundSheetRecord {
            position: 0x1234,
            visibility: 1,
            kind: 0,
            name: "Données".into(),
        };
        let record = sheet.to_record().unwrap();
        assert_eq!(BoundSheetRecord::parse(&record.data).unwrap(), sheet);
    }
}
