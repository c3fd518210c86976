//! Reading and writing workbooks as BIFF8 record streams.
//!
//! The globals substream is kept as a list of items in file order. Records
//! the workbook models (settings, sheets, links, names, strings) are
//! replaced by a marker where their group first appeared and regenerated on
//! write; everything else is written back as read.

pub(crate) mod reader;
pub(crate) mod writer;

use biffbook_core::CellValue;
use biffbook_xls::biff::formula::CachedResult;
use biffbook_xls::biff::records::{
    BOUNDSHEET, CODEPAGE, DATEMODE, EXTERNNAME, EXTERNSHEET, EXTSST, NAME, SST, SUPBOOK,
};
use biffbook_xls::BiffRecord;

/// Rows per cell block; Excel writes ROW records block by block
pub(crate) const ROW_BLOCK: u32 = 32;

// ROW record flag bits not named by the record type
pub(crate) const ROW_OUTLINE_MASK: u16 = 0x0007;
pub(crate) const ROW_FLAG_COLLAPSED: u16 = 0x0010;
/// The row carries an XF index in `xf_field`
pub(crate) const ROW_FLAG_STYLED: u16 = 0x0080;
pub(crate) const ROW_XF_MASK: u16 = 0x0FFF;
pub(crate) const ROW_HEIGHT_MASK: u16 = 0x7FFF;

pub(crate) fn cached_value(result: &CachedResult) -> CellValue {
    match result {
        CachedResult::Number(n) => CellValue::Number(*n),
        CachedResult::Text(s) => CellValue::String(s.as_str().into()),
        CachedResult::Boolean(b) => CellValue::Boolean(*b),
        CachedResult::Error(e) => CellValue::Error(*e),
        CachedResult::Empty => CellValue::Empty,
    }
}

pub(crate) fn cached_result(value: &CellValue) -> CachedResult {
    match value {
        CellValue::Number(n) => CachedResult::Number(*n),
        CellValue::String(s) => CachedResult::Text(s.as_str().to_string()),
        CellValue::Boolean(b) => CachedResult::Boolean(*b),
        CellValue::Error(e) => CachedResult::Error(*e),
        CellValue::Empty => CachedResult::Empty,
    }
}

/// A group of globals records the workbook regenerates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Marker {
    Codepage,
    DateMode,
    /// BOUNDSHEET records
    Sheets,
    /// SUPBOOK, EXTERNNAME and EXTERNSHEET
    Links,
    /// NAME records
    Names,
    /// SST (EXTSST is dropped)
    Sst,
}

impl Marker {
    /// The marker standing in for a record type, if the type is modelled
    pub(crate) fn for_record(record_type: u16) -> Option<Self> {
        match record_type {
            CODEPAGE => Some(Marker::Codepage),
            DATEMODE => Some(Marker::DateMode),
            BOUNDSHEET => Some(Marker::Sheets),
            SUPBOOK | EXTERNNAME | EXTERNSHEET => Some(Marker::Links),
            NAME => Some(Marker::Names),
            SST | EXTSST => Some(Marker::Sst),
            _ => None,
        }
    }
}

/// One entry of the globals layout
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum GlobalsItem {
    Raw(BiffRecord),
    Marker(Marker),
}

/// Build the layout from the body of a globals substream
pub(crate) fn globals_layout(records: &[BiffRecord]) -> Vec<GlobalsItem> {
    let mut layout = Vec::with_capacity(records.len());
    let mut seen: Vec<Marker> = Vec::new();
    for record in records {
        match Marker::for_record(record.record_type) {
            Some(marker) if seen.contains(&marker) => {}
            Some(marker) => {
                seen.push(marker);
                layout.push(GlobalsItem::Marker(marker));
            }
            None => layout.push(GlobalsItem::Raw(record.clone())),
        }
    }
    layout
}

#[cfg(test)]
mod tests {
    use super::*;
    use biffbook_core::CellError;
    use biffbook_xls::biff::records::WINDOW1;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cached_results_map_both_ways() {
        let values = [
            CellValue::Number(2.5),
            CellValue::String("ok".into()),
            CellValue::Boolean(true),
            CellValue::Error(CellError::Div0),
            CellValue::Empty,
        ];
        for value in values {
            assert_eq!(cached_value(&cached_result(&value)), value);
        }
        assert_eq!(cached_result(&CellValue::Empty), CachedResult::Empty);
    }

    #[test]
    fn test_layout_keeps_first_position_of_each_group() {
        let records = vec![
            BiffRecord::new(CODEPAGE, vec![0xB0, 0x04]),
            BiffRecord::new(WINDOW1, vec![0; 18]),
            BiffRecord::new(BOUNDSHEET, vec![]),
            BiffRecord::new(BOUNDSHEET, vec![]),
            BiffRecord::new(SUPBOOK, vec![]),
            BiffRecord::new(EXTERNSHEET, vec![]),
            BiffRecord::new(SST, vec![]),
            BiffRecord::new(EXTSST, vec![]),
        ];
        let layout = globals_layout(&records);
        assert_eq!(
            layout,
            vec![
                GlobalsItem::Marker(Marker::Codepage),
                GlobalsItem::Raw(BiffRecord::new(WINDOW1, vec![0; 18])),
                GlobalsItem::Marker(Marker::Sheets),
                GlobalsItem::Marker(Marker::Links),
                GlobalsItem::Marker(Marker::Sst),
            ]
        );
    }
}
