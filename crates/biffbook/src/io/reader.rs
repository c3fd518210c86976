//! XLS reader
//!
//! Turns the substreams of a BIFF8 workbook stream into a [`Workbook`]:
//! globals first (settings, sheets, links, names, strings), then each
//! worksheet's rows, cells and formula groups.

use std::io::{Cursor, Read, Seek};

use ahash::AHashMap;
use biffbook_core::{CellAddress, CellError, CellRange, CellValue};
use biffbook_formula::{DefinedName, NameScope, ReferenceTable, Token, TokenExpr};
use biffbook_xls::biff::cells::{parse_cell_record, BoundSheetRecord, CellData, RowRecord};
use biffbook_xls::biff::conformance::verify_substream;
use biffbook_xls::biff::formula::{
    FormulaRecordAggregate, GroupRecord, SharedFormulaRecord, FLAG_SHARED,
};
use biffbook_xls::biff::links::{
    link_from_records, parse_externsheet, ExternNameRecord, ExternSheetTable, SupBookRecord,
    SupBookTarget, Xti,
};
use biffbook_xls::biff::names::NameRecord;
use biffbook_xls::biff::records::*;
use biffbook_xls::biff::rgce::{decode, decode_tokens, RgceBody, RgceMode};
use biffbook_xls::biff::strings::parse_sst;
use biffbook_xls::{read_all_records, read_workbook_stream, split_substreams, BiffRecord, Substream, XlsError};
use log::{debug, warn};

use super::{
    cached_value, globals_layout, ROW_FLAG_COLLAPSED, ROW_FLAG_STYLED, ROW_HEIGHT_MASK,
    ROW_OUTLINE_MASK, ROW_XF_MASK,
};
use crate::aggregate::{ArrayFormulaGroup, SharedFormulaGroup};
use crate::cell::{Cell, CellContent, FormulaBody, FormulaCell};
use crate::error::Result;
use crate::row::Row;
use crate::settings::{ReadOptions, WorkbookSettings};
use crate::workbook::Workbook;
use crate::worksheet::{SheetKind, SheetVisibility, Worksheet};

/// Read a workbook from an OLE2 container
pub(crate) fn read_workbook<R: Read + Seek>(reader: R, options: &ReadOptions) -> Result<Workbook> {
    let data = read_workbook_stream(reader)?;
    let records = read_all_records(&mut Cursor::new(data))?;
    let mut streams = split_substreams(records)?.into_iter();

    let globals = streams
        .next()
        .ok_or_else(|| XlsError::InvalidFormat("workbook stream has no substreams".into()))?;
    if globals.kind != BOF_WORKBOOK_GLOBALS {
        return Err(XlsError::InvalidFormat(format!(
            "first substream has type 0x{:04X}, expected workbook globals",
            globals.kind
        ))
        .into());
    }
    if globals.version != BIFF8_VERSION {
        return Err(XlsError::UnsupportedVersion(format!(
            "BOF version 0x{:04X}",
            globals.version
        ))
        .into());
    }

    let sheet_streams: Vec<Substream> = streams.collect();
    if options.verify_structure {
        verify_substream(&globals)?;
        for stream in &sheet_streams {
            verify_substream(stream)?;
        }
    }

    let mut reader = XlsReader::new(options);
    reader.read_globals(globals.body())?;
    debug!(
        "read globals: {} sheets, {} links, {} names, {} strings",
        reader.boundsheets.len(),
        reader.references.link_count(),
        reader.references.name_count(),
        reader.sst.len()
    );

    let worksheets = reader.read_sheets(sheet_streams)?;
    let globals = globals_layout(globals.body());
    Ok(Workbook::from_parts(
        worksheets,
        reader.references,
        reader.settings,
        globals,
    ))
}

/// State shared by all substreams of one file
struct XlsReader<'a> {
    options: &'a ReadOptions,
    settings: WorkbookSettings,
    boundsheets: Vec<BoundSheetRecord>,
    references: ReferenceTable,
    table: ExternSheetTable,
    sst: Vec<String>,
}

impl<'a> XlsReader<'a> {
    fn new(options: &'a ReadOptions) -> Self {
        Self {
            options,
            settings: WorkbookSettings::default(),
            boundsheets: Vec::new(),
            references: ReferenceTable::new(),
            table: ExternSheetTable::default(),
            sst: Vec::new(),
        }
    }

    // ==================== Globals ====================

    fn read_globals(&mut self, records: &[BiffRecord]) -> Result<()> {
        let mut supbooks: Vec<(SupBookRecord, Vec<ExternNameRecord>)> = Vec::new();
        let mut xti: Vec<Xti> = Vec::new();
        let mut names: Vec<&BiffRecord> = Vec::new();

        for record in records {
            match record.record_type {
                CODEPAGE => {
                    if let Some(bytes) = record.data.get(..2) {
                        self.settings.codepage = u16::from_le_bytes([bytes[0], bytes[1]]);
                    }
                }
                DATEMODE => {
                    self.settings.date_1904 = record.data.first().is_some_and(|b| *b != 0);
                }
                BOUNDSHEET => {
                    let sheet = BoundSheetRecord::parse(&record.data)
                        .map_err(|e| record.malformed(e.to_string()))?;
                    self.boundsheets.push(sheet);
                }
                SUPBOOK => {
                    let book = SupBookRecord::parse(&record.data)
                        .map_err(|e| record.malformed(e.to_string()))?;
                    supbooks.push((book, Vec::new()));
                }
                EXTERNNAME => {
                    let name = ExternNameRecord::parse(&record.data)
                        .map_err(|e| record.malformed(e.to_string()))?;
                    match supbooks.last_mut() {
                        Some((_, names)) => names.push(name),
                        None => warn!(
                            "EXTERNNAME at offset {} has no SUPBOOK, dropped",
                            record.stream_offset
                        ),
                    }
                }
                EXTERNSHEET => {
                    xti = parse_externsheet(&record.data)
                        .map_err(|e| record.malformed(e.to_string()))?;
                }
                NAME => names.push(record),
                SST => {
                    self.sst = parse_sst(&record.data, &record.continue_offsets)
                        .map_err(|e| record.malformed(e.to_string()))?;
                }
                _ => {}
            }
        }

        let books = supbooks
            .into_iter()
            .map(|(book, extern_names)| match book {
                SupBookRecord::Internal { .. } => SupBookTarget::Internal,
                SupBookRecord::AddIn => SupBookTarget::AddIn,
                SupBookRecord::External { path, sheet_names } => SupBookTarget::External(
                    self.references
                        .restore_link(link_from_records(path, sheet_names, extern_names)),
                ),
            })
            .collect();
        self.table = ExternSheetTable::new(books, xti);

        for record in names {
            self.read_name(record)?;
        }
        Ok(())
    }

    /// Add one NAME record to the table. Every record takes a slot so that
    /// the ids formulas use keep pointing at the right entry.
    fn read_name(&mut self, record: &BiffRecord) -> Result<()> {
        let decoded =
            NameRecord::parse(&record.data).and_then(|name| name.to_defined_name(&self.table));
        let entry = match decoded {
            Ok(entry) => entry,
            Err(e) if self.options.strict_names => return Err(record.malformed(e.to_string()).into()),
            Err(e) => {
                warn!(
                    "NAME record at offset {} could not be decoded ({}), kept as deleted",
                    record.stream_offset, e
                );
                let mut entry = DefinedName::new(
                    format!("_deleted{}", self.references.name_count()),
                    NameScope::Workbook,
                    TokenExpr::new(vec![Token::Error(CellError::Ref)]),
                );
                entry.deleted = true;
                entry
            }
        };
        self.references.restore_name(entry)?;
        Ok(())
    }

    // ==================== Sheets ====================

    fn read_sheets(&self, streams: Vec<Substream>) -> Result<Vec<Worksheet>> {
        let by_offset: AHashMap<u64, usize> = streams
            .iter()
            .enumerate()
            .map(|(i, s)| (s.offset, i))
            .collect();
        let mut streams: Vec<Option<Substream>> = streams.into_iter().map(Some).collect();

        let mut worksheets = Vec::with_capacity(self.boundsheets.len());
        for (index, sheet) in self.boundsheets.iter().enumerate() {
            let slot = by_offset
                .get(&u64::from(sheet.position))
                .copied()
                .filter(|i| streams[*i].is_some())
                .unwrap_or(index);
            let stream = streams.get_mut(slot).and_then(Option::take).ok_or_else(|| {
                XlsError::InvalidFormat(format!("no substream for sheet '{}'", sheet.name))
            })?;
            if slot != index {
                debug!("sheet '{}' found by position at substream {}", sheet.name, slot);
            }

            let kind = SheetKind::from_code(sheet.kind);
            let mut worksheet = if kind == SheetKind::Worksheet && stream.kind == BOF_WORKSHEET {
                self.read_worksheet(&sheet.name, index, &stream)?
            } else {
                debug!(
                    "keeping sheet '{}' ({:?}) as raw records",
                    sheet.name, kind
                );
                Worksheet::opaque(sheet.name.clone(), kind, stream.records)
            };
            worksheet.set_visibility(SheetVisibility::from_code(sheet.visibility));
            worksheets.push(worksheet);
        }

        let leftover = streams.iter().flatten().count();
        if leftover > 0 {
            warn!("{} substreams have no BOUNDSHEET and were dropped", leftover);
        }
        Ok(worksheets)
    }

    fn read_worksheet(&self, name: &str, index: usize, stream: &Substream) -> Result<Worksheet> {
        let mut worksheet = Worksheet::new(name);
        let mut groups = GroupCollector::default();
        let mut members: Vec<PendingMember> = Vec::new();
        let records = stream.body();

        let mut seen_dimension = false;
        let mut nested = 0usize;
        let mut i = 0;
        while i < records.len() {
            let record = &records[i];
            i += 1;

            // Embedded substreams (charts) are carried as they are
            if nested > 0 || record.record_type == BOF {
                match record.record_type {
                    BOF => nested += 1,
                    EOF => nested = nested.saturating_sub(1),
                    _ => {}
                }
                worksheet.trailing_records.push(record.clone());
                continue;
            }

            match record.record_type {
                DIMENSION => seen_dimension = true,
                INDEX | DBCELL => {}
                ROW => {
                    let row = RowRecord::parse(&record.data)
                        .map_err(|e| record.malformed(e.to_string()))?;
                    worksheet.insert_row(row_from_record(&row));
                }
                FORMULA => {
                    let (aggregate, used) = FormulaRecordAggregate::read(records, i - 1)?;
                    i += used - 1;
                    self.read_formula(&mut worksheet, &mut groups, &mut members, aggregate)?;
                }
                SHRFMLA | ARRAY | STRING => {
                    warn!(
                        "{} record at offset {} does not follow a FORMULA, dropped",
                        record_name(record.record_type),
                        record.stream_offset
                    );
                }
                t if is_cell_record(t) => {
                    let entries =
                        parse_cell_record(record).map_err(|e| record.malformed(e.to_string()))?;
                    for entry in entries {
                        let content = self.cell_content(entry.value);
                        worksheet.insert_cell(
                            entry.row as u32,
                            entry.col,
                            Cell::with_style(content, entry.xf),
                        );
                    }
                }
                _ if !seen_dimension => worksheet.leading_records.push(record.clone()),
                _ => worksheet.trailing_records.push(record.clone()),
            }
        }

        groups.install(&mut worksheet, members, &self.table, index)?;
        Ok(worksheet)
    }

    fn read_formula(
        &self,
        worksheet: &mut Worksheet,
        groups: &mut GroupCollector,
        members: &mut Vec<PendingMember>,
        aggregate: FormulaRecordAggregate,
    ) -> Result<()> {
        let FormulaRecordAggregate { formula, group, .. } = aggregate;
        let address = formula.address();
        let cached = cached_value(&formula.result);
        let flags = formula.flags & !FLAG_SHARED;

        match decode(&formula.rgce, &formula.extra, RgceMode::Standard, &self.table)? {
            RgceBody::Tokens(tokens) => {
                let mut cell = FormulaCell::own(tokens);
                cell.cached = cached;
                cell.flags = flags;
                worksheet.insert_cell(
                    address.row,
                    address.col,
                    Cell::with_style(CellContent::Formula(cell), formula.xf),
                );
            }
            RgceBody::Exp(host) => {
                match group {
                    Some(GroupRecord::Shared(shared)) => groups.add_shared(address, shared),
                    Some(GroupRecord::Array(array)) => {
                        let tokens =
                            decode_tokens(&array.rgce, &array.extra, RgceMode::Standard, &self.table)?;
                        groups.add_array(address, array.range, tokens);
                    }
                    None => {}
                }
                members.push(PendingMember {
                    address,
                    host,
                    xf: formula.xf,
                    cached,
                    flags,
                });
            }
        }
        Ok(())
    }

    fn cell_content(&self, value: CellData) -> CellContent {
        match value {
            CellData::Blank => CellContent::Blank,
            CellData::Number(n) => CellContent::Number(n),
            CellData::SstIndex(i) => match self.sst.get(i as usize) {
                Some(s) => CellContent::Text(s.as_str().into()),
                None => {
                    warn!(
                        "LABELSST index {} is outside the {}-entry string table",
                        i,
                        self.sst.len()
                    );
                    CellContent::Text("".into())
                }
            },
            CellData::Text(s) => CellContent::Text(s.into()),
            CellData::Boolean(b) => CellContent::Boolean(b),
            CellData::Error(e) => CellContent::Error(e),
        }
    }
}

fn row_from_record(record: &RowRecord) -> Row {
    let mut row = Row::new(record.row as u32);
    if record.flags & RowRecord::FLAG_CUSTOM_HEIGHT != 0 {
        row.height = Some(record.height & ROW_HEIGHT_MASK);
    }
    row.hidden = record.flags & RowRecord::FLAG_HIDDEN != 0;
    row.outline_level = (record.flags & ROW_OUTLINE_MASK) as u8;
    row.collapsed = record.flags & ROW_FLAG_COLLAPSED != 0;
    if record.flags & ROW_FLAG_STYLED != 0 {
        row.style_index = Some(record.xf_field & ROW_XF_MASK);
    }
    row
}

/// A FORMULA record holding `PtgExp`, resolved once every group is known
struct PendingMember {
    address: CellAddress,
    /// Cell the `PtgExp` points at
    host: CellAddress,
    xf: u16,
    cached: CellValue,
    flags: u16,
}

/// A SHRFMLA block, possibly merged with the blocks below it
struct PendingShared {
    range: CellRange,
    rgce: Vec<u8>,
    extra: Vec<u8>,
}

/// Group records of one worksheet, keyed by the cell they follow
#[derive(Default)]
struct GroupCollector {
    shared: Vec<PendingShared>,
    arrays: Vec<ArrayFormulaGroup>,
    /// Host cell position to group
    hosts: AHashMap<(u32, u16), GroupSlot>,
}

#[derive(Clone, Copy)]
enum GroupSlot {
    Shared(usize),
    Array(usize),
}

impl GroupCollector {
    /// Add a SHRFMLA block. A block directly below an earlier one with the
    /// same columns and identical tokens continues that group.
    fn add_shared(&mut self, host: CellAddress, record: SharedFormulaRecord) {
        let range = record.range;
        let continued = self.shared.iter().position(|p| {
            p.rgce == record.rgce
                && p.extra == record.extra
                && p.range.start.col == range.start.col
                && p.range.end.col == range.end.col
                && p.range.end.row + 1 == range.start.row
        });
        let slot = match continued {
            Some(slot) => {
                let pending = &mut self.shared[slot];
                pending.range = CellRange::from_indices(
                    pending.range.start.row,
                    pending.range.start.col,
                    range.end.row,
                    range.end.col,
                );
                slot
            }
            None => {
                self.shared.push(PendingShared {
                    range,
                    rgce: record.rgce,
                    extra: record.extra,
                });
                self.shared.len() - 1
            }
        };
        self.hosts.insert(host.position(), GroupSlot::Shared(slot));
    }

    fn add_array(&mut self, host: CellAddress, range: CellRange, tokens: TokenExpr) {
        self.arrays.push(ArrayFormulaGroup::new(range, tokens));
        self.hosts
            .insert(host.position(), GroupSlot::Array(self.arrays.len() - 1));
    }

    /// Decode the groups, add them to the sheet and link up their members
    fn install(
        self,
        worksheet: &mut Worksheet,
        members: Vec<PendingMember>,
        table: &ExternSheetTable,
        sheet: usize,
    ) -> Result<()> {
        let mut shared_anchors: Vec<CellAddress> = Vec::with_capacity(self.shared.len());
        for pending in &self.shared {
            let origin = pending.range.start.relative();
            let tokens = decode_tokens(&pending.rgce, &pending.extra, RgceMode::Shared(origin), table)?;
            worksheet
                .groups_mut()
                .insert_shared(SharedFormulaGroup::new(pending.range, tokens));
            shared_anchors.push(origin);
        }
        let array_anchors: Vec<CellAddress> = self
            .arrays
            .iter()
            .map(|g| g.range().start.relative())
            .collect();
        for group in self.arrays {
            worksheet.groups_mut().insert_array(group);
        }

        for member in members {
            let body = match self.hosts.get(&member.host.position()) {
                Some(GroupSlot::Shared(slot)) => Some(FormulaBody::Shared {
                    anchor: shared_anchors[*slot],
                }),
                Some(GroupSlot::Array(slot)) => Some(FormulaBody::Array {
                    anchor: array_anchors[*slot],
                }),
                None => None,
            };
            let content = match body {
                Some(body) => CellContent::Formula(FormulaCell {
                    body,
                    cached: member.cached,
                    flags: member.flags,
                }),
                None => {
                    warn!(
                        "formula at {} on sheet {} points at {} which anchors no group, keeping its value",
                        member.address.to_a1_string(),
                        sheet,
                        member.host.to_a1_string()
                    );
                    CellContent::from_value(member.cached)
                }
            };
            worksheet.insert_cell(
                member.address.row,
                member.address.col,
                Cell::with_style(content, member.xf),
            );
        }
        Ok(())
    }
}

fn record_name(record_type: u16) -> &'static str {
    match record_type {
        SHRFMLA => "SHRFMLA",
        ARRAY => "ARRAY",
        STRING => "STRING",
        _ => "record",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_row_settings_from_flags() {
        let mut record = RowRecord::new(7);
        record.height = 600;
        record.flags |= RowRecord::FLAG_CUSTOM_HEIGHT | RowRecord::FLAG_HIDDEN | 0x0002;
        let row = row_from_record(&record);
        assert_eq!(row.index, 7);
        assert_eq!(row.height, Some(600));
        assert!(row.hidden);
        assert_eq!(row.outline_level, 2);
        assert_eq!(row.style_index, None);

        let mut styled = RowRecord::new(0);
        styled.flags |= ROW_FLAG_STYLED;
        styled.xf_field = 0x1000 | 21;
        assert_eq!(row_from_record(&styled).style_index, Some(21));
        assert_eq!(row_from_record(&styled).height, None);
    }

    #[test]
    fn test_adjacent_shared_blocks_merge() {
        let block = |first: u32, last: u32| SharedFormulaRecord {
            range: CellRange::from_indices(first, 1, last, 1),
            uses: (last - first + 1) as u8,
            rgce: vec![0x1E, 0x02, 0x00],
            extra: Vec::new(),
        };
        let mut groups = GroupCollector::default();
        groups.add_shared(CellAddress::new(1, 1), block(1, 31));
        groups.add_shared(CellAddress::new(32, 1), block(32, 63));
        // same tokens but not adjacent
        groups.add_shared(CellAddress::new(70, 1), block(70, 80));

        assert_eq!(groups.shared.len(), 2);
        assert_eq!(groups.shared[0].range, CellRange::from_indices(1, 1, 63, 1));
        assert!(matches!(
            groups.hosts.get(&(32, 1)),
            Some(GroupSlot::Shared(0))
        ));
    }
}
