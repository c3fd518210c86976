//! Formula cell records and the aggregate they form.
//!
//! A formula cell is stored as a FORMULA record, optionally followed by the
//! SHRFMLA or ARRAY record of the group it anchors, optionally followed by a
//! STRING record holding a text result. [`FormulaRecordAggregate`] keeps
//! these together and writes them back in that order.

use biffbook_core::{CellAddress, CellError, CellRange};
use log::warn;

use super::parser::{put_f64, put_u16, put_u32, put_u8, read_bytes, read_f64, read_u16, read_u32, read_u8};
use super::records::{ARRAY, FORMULA, SHRFMLA, STRING, TABLE};
use super::strings::{read_unicode_string_continued, unicode_string_record};
use super::BiffRecord;
use crate::error::{XlsError, XlsResult};

/// FORMULA grbit: recalculate on load
pub const FLAG_ALWAYS_CALC: u16 = 0x0001;
/// FORMULA grbit: the cell is part of a shared formula
pub const FLAG_SHARED: u16 = 0x0008;

// Result kinds stored with 0xFFFF in the top bytes of the result field
const RESULT_STRING: u8 = 0;
const RESULT_BOOLEAN: u8 = 1;
const RESULT_ERROR: u8 = 2;
const RESULT_EMPTY: u8 = 3;

/// The last calculated value of a formula cell
#[derive(Debug, Clone, PartialEq)]
pub enum CachedResult {
    Number(f64),
    /// Text; the string itself lives in the STRING record
    Text(String),
    Boolean(bool),
    Error(CellError),
    /// Empty string result
    Empty,
}

impl CachedResult {
    fn parse(bytes: &[u8]) -> XlsResult<Self> {
        if bytes[6] != 0xFF || bytes[7] != 0xFF {
            let mut off = 0;
            return Ok(CachedResult::Number(read_f64(bytes, &mut off)?));
        }
        match bytes[0] {
            RESULT_STRING => Ok(CachedResult::Text(String::new())),
            RESULT_BOOLEAN => Ok(CachedResult::Boolean(bytes[2] != 0)),
            RESULT_ERROR => CellError::from_code(bytes[2])
                .map(CachedResult::Error)
                .ok_or_else(|| XlsError::Parse(format!("unknown error code 0x{:02X}", bytes[2]))),
            RESULT_EMPTY => Ok(CachedResult::Empty),
            other => Err(XlsError::Parse(format!("unknown formula result type {other}"))),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        let special = |out: &mut Vec<u8>, kind: u8, value: u8| {
            out.extend_from_slice(&[kind, 0, value, 0, 0, 0, 0xFF, 0xFF]);
        };
        match self {
            CachedResult::Number(n) => put_f64(out, *n),
            CachedResult::Text(_) => special(out, RESULT_STRING, 0),
            CachedResult::Boolean(b) => special(out, RESULT_BOOLEAN, *b as u8),
            CachedResult::Error(e) => special(out, RESULT_ERROR, e.code()),
            CachedResult::Empty => special(out, RESULT_EMPTY, 0),
        }
    }

    /// Whether the result needs a STRING record after the formula
    pub fn is_text(&self) -> bool {
        matches!(self, CachedResult::Text(_))
    }
}

/// FORMULA record
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaRecord {
    pub row: u16,
    pub col: u16,
    pub xf: u16,
    pub result: CachedResult,
    pub flags: u16,
    /// Encoded tokens, or a `PtgExp` for group members
    pub rgce: Vec<u8>,
    pub extra: Vec<u8>,
}

impl FormulaRecord {
    pub fn parse(data: &[u8]) -> XlsResult<Self> {
        let mut off = 0;
        let row = read_u16(data, &mut off)?;
        let col = read_u16(data, &mut off)?;
        let xf = read_u16(data, &mut off)?;
        let result = CachedResult::parse(read_bytes(data, &mut off, 8)?)?;
        let flags = read_u16(data, &mut off)?;
        let _chn = read_u32(data, &mut off)?;
        let (rgce, extra) = read_formula_body(data, &mut off)?;
        Ok(Self {
            row,
            col,
            xf,
            result,
            flags,
            rgce,
            extra,
        })
    }

    pub fn to_bytes(&self) -> XlsResult<Vec<u8>> {
        let mut out = Vec::with_capacity(22 + self.rgce.len() + self.extra.len());
        put_u16(&mut out, self.row);
        put_u16(&mut out, self.col);
        put_u16(&mut out, self.xf);
        self.result.write(&mut out);
        put_u16(&mut out, self.flags);
        put_u32(&mut out, 0);
        write_formula_body(&mut out, &self.rgce, &self.extra)?;
        Ok(out)
    }

    pub fn address(&self) -> CellAddress {
        CellAddress::new(self.row as u32, self.col)
    }

    pub fn is_shared(&self) -> bool {
        self.flags & FLAG_SHARED != 0
    }
}

/// SHRFMLA record: the tokens of a shared formula, stored as offsets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFormulaRecord {
    pub range: CellRange,
    /// Number of FORMULA records pointing at this group
    pub uses: u8,
    pub rgce: Vec<u8>,
    pub extra: Vec<u8>,
}

impl SharedFormulaRecord {
    pub fn parse(data: &[u8]) -> XlsResult<Self> {
        let mut off = 0;
        let range = read_ref_u(data, &mut off)?;
        let _reserved = read_u8(data, &mut off)?;
        let uses = read_u8(data, &mut off)?;
        let (rgce, extra) = read_formula_body(data, &mut off)?;
        Ok(Self {
            range,
            uses,
            rgce,
            extra,
        })
    }

    pub fn to_bytes(&self) -> XlsResult<Vec<u8>> {
        let mut out = Vec::with_capacity(10 + self.rgce.len() + self.extra.len());
        write_ref_u(&mut out, &self.range);
        put_u8(&mut out, 0);
        put_u8(&mut out, self.uses);
        write_formula_body(&mut out, &self.rgce, &self.extra)?;
        Ok(out)
    }
}

/// ARRAY record: the tokens of an array formula, stored absolutely
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayRecord {
    pub range: CellRange,
    pub flags: u16,
    pub rgce: Vec<u8>,
    pub extra: Vec<u8>,
}

impl ArrayRecord {
    pub fn parse(data: &[u8]) -> XlsResult<Self> {
        let mut off = 0;
        let range = read_ref_u(data, &mut off)?;
        let flags = read_u16(data, &mut off)?;
        let _chn = read_u32(data, &mut off)?;
        let (rgce, extra) = read_formula_body(data, &mut off)?;
        Ok(Self {
            range,
            flags,
            rgce,
            extra,
        })
    }

    pub fn to_bytes(&self) -> XlsResult<Vec<u8>> {
        let mut out = Vec::with_capacity(14 + self.rgce.len() + self.extra.len());
        write_ref_u(&mut out, &self.range);
        put_u16(&mut out, self.flags);
        put_u32(&mut out, 0);
        write_formula_body(&mut out, &self.rgce, &self.extra)?;
        Ok(out)
    }
}

/// STRING record: text result of the preceding formula
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringRecord {
    pub text: String,
}

impl StringRecord {
    pub fn parse(record: &BiffRecord) -> XlsResult<Self> {
        let mut off = 0;
        let text = read_unicode_string_continued(&record.data, &mut off, &record.continue_offsets)?;
        Ok(Self { text })
    }

    pub fn to_record(&self) -> XlsResult<BiffRecord> {
        unicode_string_record(STRING, &self.text)
    }
}

fn read_formula_body(data: &[u8], off: &mut usize) -> XlsResult<(Vec<u8>, Vec<u8>)> {
    let cce = read_u16(data, off)? as usize;
    let rgce = read_bytes(data, off, cce)?.to_vec();
    let extra = data[*off..].to_vec();
    *off = data.len();
    Ok((rgce, extra))
}

fn write_formula_body(out: &mut Vec<u8>, rgce: &[u8], extra: &[u8]) -> XlsResult<()> {
    let cce = u16::try_from(rgce.len())
        .map_err(|_| XlsError::Unsupported("formula too long for BIFF8".into()))?;
    put_u16(out, cce);
    out.extend_from_slice(rgce);
    out.extend_from_slice(extra);
    Ok(())
}

/// RefU: 16-bit rows, 8-bit columns
fn read_ref_u(data: &[u8], off: &mut usize) -> XlsResult<CellRange> {
    let first_row = read_u16(data, off)? as u32;
    let last_row = read_u16(data, off)? as u32;
    let first_col = read_u8(data, off)? as u16;
    let last_col = read_u8(data, off)? as u16;
    Ok(CellRange::from_indices(first_row, first_col, last_row, last_col))
}

fn write_ref_u(out: &mut Vec<u8>, range: &CellRange) {
    put_u16(out, range.start.row as u16);
    put_u16(out, range.end.row as u16);
    put_u8(out, range.start.col as u8);
    put_u8(out, range.end.col as u8);
}

/// The group record a formula cell anchors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupRecord {
    Shared(SharedFormulaRecord),
    Array(ArrayRecord),
}

/// A FORMULA record with the records attached to it
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaRecordAggregate {
    pub formula: FormulaRecord,
    pub group: Option<GroupRecord>,
    string: Option<StringRecord>,
}

impl FormulaRecordAggregate {
    pub fn new(formula: FormulaRecord) -> Self {
        let mut aggregate = Self {
            formula,
            group: None,
            string: None,
        };
        let result = aggregate.formula.result.clone();
        aggregate.set_cached_result(result);
        aggregate
    }

    /// Read the aggregate starting at `records[start]`, which must be a
    /// FORMULA record. Returns the aggregate and the number of records used.
    pub fn read(records: &[BiffRecord], start: usize) -> XlsResult<(Self, usize)> {
        let head = records
            .get(start)
            .filter(|r| r.record_type == FORMULA)
            .ok_or_else(|| XlsError::Parse("formula aggregate must start with FORMULA".into()))?;
        let formula = FormulaRecord::parse(&head.data).map_err(|e| head.malformed(e.to_string()))?;
        let mut aggregate = Self {
            formula,
            group: None,
            string: None,
        };

        let mut used = 1;
        if let Some(next) = records.get(start + used) {
            match next.record_type {
                SHRFMLA => {
                    let shared = SharedFormulaRecord::parse(&next.data)
                        .map_err(|e| next.malformed(e.to_string()))?;
                    aggregate.group = Some(GroupRecord::Shared(shared));
                    used += 1;
                }
                ARRAY => {
                    let array =
                        ArrayRecord::parse(&next.data).map_err(|e| next.malformed(e.to_string()))?;
                    aggregate.group = Some(GroupRecord::Array(array));
                    used += 1;
                }
                TABLE => {
                    return Err(XlsError::Unsupported(format!(
                        "data table at offset {}",
                        next.stream_offset
                    )))
                }
                _ => {}
            }
        }

        if let Some(next) = records.get(start + used).filter(|r| r.record_type == STRING) {
            let string = StringRecord::parse(next).map_err(|e| next.malformed(e.to_string()))?;
            used += 1;
            if aggregate.formula.result.is_text() {
                aggregate.formula.result = CachedResult::Text(string.text.clone());
                aggregate.string = Some(string);
            } else {
                warn!(
                    "Ignoring STRING record after non-text formula result at {}",
                    aggregate.formula.address().to_a1_string()
                );
            }
        } else if aggregate.formula.result.is_text() {
            warn!(
                "Formula at {} has a text result but no STRING record",
                aggregate.formula.address().to_a1_string()
            );
            aggregate.string = Some(StringRecord {
                text: String::new(),
            });
        }

        Ok((aggregate, used))
    }

    /// Change the cached result, adding a STRING record exactly when the
    /// new result is text
    pub fn set_cached_result(&mut self, result: CachedResult) {
        self.string = match &result {
            CachedResult::Text(text) => Some(StringRecord { text: text.clone() }),
            _ => None,
        };
        self.formula.result = result;
    }

    pub fn cached_result(&self) -> &CachedResult {
        &self.formula.result
    }

    pub fn string_record(&self) -> Option<&StringRecord> {
        self.string.as_ref()
    }

    /// Records in stream order: FORMULA, then SHRFMLA or ARRAY, then STRING
    pub fn to_records(&self) -> XlsResult<Vec<BiffRecord>> {
        let mut records = vec![BiffRecord::new(FORMULA, self.formula.to_bytes()?)];
        match &self.group {
            Some(GroupRecord::Shared(shared)) => {
                records.push(BiffRecord::new(SHRFMLA, shared.to_bytes()?))
            }
            Some(GroupRecord::Array(array)) => records.push(BiffRecord::new(ARRAY, array.to_bytes()?)),
            None => {}
        }
        if let Some(string) = &self.string {
            records.push(string.to_record()?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn formula(result: CachedResult) -> FormulaRecord {
        FormulaRecord {
            row: 1,
            col: 1,
            xf: 15,
            result,
            flags: 0,
            rgce: vec![0x1E, 0x01, 0x00],
            extra: Vec::new(),
        }
    }

    #[test]
    fn test_formula_record_round_trip() {
        for result in [
            CachedResult::Number(2.5),
            CachedResult::Text(String::new()),
            CachedResult::Boolean(true),
            CachedResult::Error(CellError::Div0),
            CachedResult::Empty,
        ] {
            let record = formula(result);
            let bytes = record.to_bytes().unwrap();
            assert_eq!(FormulaRecord::parse(&bytes).unwrap(), record);
        }
    }

    #[test]
    fn test_shared_formula_record_layout() {
        let record = SharedFormulaRecord {
            range: CellRange::from_indices(1, 1, 32, 1),
            uses: 32,
            rgce: vec![0x4C, 0, 0, 0xFF, 0xC0],
            extra: Vec::new(),
        };
        let bytes = record.to_bytes().unwrap();
        assert_eq!(&bytes[..8], &[1, 0, 32, 0, 1, 1, 0, 32]);
        assert_eq!(SharedFormulaRecord::parse(&bytes).unwrap(), record);
    }

    #[test]
    fn test_string_record_follows_text_result_only() {
        let mut aggregate = FormulaRecordAggregate::new(formula(CachedResult::Number(1.0)));
        assert_eq!(aggregate.to_records().unwrap().len(), 1);

        aggregate.set_cached_result(CachedResult::Text("total".into()));
        let records = aggregate.to_records().unwrap();
        assert_eq!(
            records.iter().map(|r| r.record_type).collect::<Vec<_>>(),
            vec![FORMULA, STRING]
        );

        aggregate.set_cached_result(CachedResult::Boolean(false));
        assert!(aggregate.string_record().is_none());
    }

    #[test]
    fn test_read_aggregate_in_order() {
        let mut head = formula(CachedResult::Text(String::new()));
        head.flags = FLAG_SHARED;
        head.rgce = vec![0x01, 1, 0, 1, 0];
        let shared = SharedFormulaRecord {
            range: CellRange::from_indices(1, 1, 3, 1),
            uses: 3,
            rgce: vec![0x1E, 0x02, 0x00],
            extra: Vec::new(),
        };
        let records = vec![
            BiffRecord::new(FORMULA, head.to_bytes().unwrap()),
            BiffRecord::new(SHRFMLA, shared.to_bytes().unwrap()),
            unicode_string_record(STRING, "abc").unwrap(),
            BiffRecord::new(FORMULA, formula(CachedResult::Empty).to_bytes().unwrap()),
        ];

        let (aggregate, used) = FormulaRecordAggregate::read(&records, 0).unwrap();
        assert_eq!(used, 3);
        assert_eq!(aggregate.group, Some(GroupRecord::Shared(shared)));
        assert_eq!(aggregate.cached_result(), &CachedResult::Text("abc".into()));

        let (_, used) = FormulaRecordAggregate::read(&records, 3).unwrap();
        assert_eq!(used, 1);
    }

    #[test]
    fn test_data_table_is_unsupported() {
        let records = vec![
            BiffRecord::new(FORMULA, formula(CachedResult::Number(0.0)).to_bytes().unwrap()),
            BiffRecord::new(TABLE, vec![0; 16]),
        ];
        assert!(matches!(
            FormulaRecordAggregate::read(&records, 0),
            Err(XlsError::Unsupported(_))
        ));
    }
}
