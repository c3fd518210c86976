//! XLS writer
//!
//! Sheets are encoded first so that every EXTERNSHEET entry, shared string
//! and placeholder name they need is known before the globals substream is
//! built. The globals are then built twice: once to learn their size, once
//! with the BOUNDSHEET positions filled in.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::{Read, Seek, Write};

use ahash::AHashMap;
use biffbook_core::{CellAddress, CellError, CellRange};
use biffbook_formula::{DefinedName, NameId, NameScope, ReferenceTable, Token, TokenExpr};
use biffbook_xls::biff::cells::{
    BofRecord, BoundSheetRecord, CellData, CellEntry, DimensionRecord, RowRecord,
};
use biffbook_xls::biff::defaults::{codepage, datemode, style_records, window1, window2};
use biffbook_xls::biff::formula::{
    ArrayRecord, FormulaRecord, FormulaRecordAggregate, GroupRecord, SharedFormulaRecord,
    FLAG_ALWAYS_CALC, FLAG_SHARED,
};
use biffbook_xls::biff::links::{link_records, ExternSheetTable, SupBookRecord};
use biffbook_xls::biff::names::NameRecord;
use biffbook_xls::biff::records::{
    BOF_WORKBOOK_GLOBALS, BOF_WORKSHEET, EOF, NAME, WINDOW2,
};
use biffbook_xls::biff::rgce::{encode, exp_rgce, EncodedFormula, RgceMode};
use biffbook_xls::biff::strings::SstBuilder;
use biffbook_xls::{write_records, write_workbook_stream, BiffRecord, XlsError};
use log::{debug, warn};

use super::{
    cached_result, GlobalsItem, Marker, ROW_BLOCK, ROW_FLAG_COLLAPSED, ROW_FLAG_STYLED,
    ROW_OUTLINE_MASK, ROW_XF_MASK,
};
use crate::aggregate::GroupRef;
use crate::cell::{Cell, CellContent, FormulaBody, FormulaCell};
use crate::error::{Error, Result};
use crate::row::Row;
use crate::settings::WriteOptions;
use crate::workbook::Workbook;
use crate::worksheet::Worksheet;

/// Write a workbook as an OLE2 container
pub(crate) fn write_workbook<W: Read + Write + Seek>(
    workbook: &Workbook,
    writer: W,
    options: &WriteOptions,
) -> Result<W> {
    let stream = workbook_stream(workbook, options)?;
    Ok(write_workbook_stream(writer, &stream)?)
}

/// The BIFF8 workbook stream
pub(crate) fn workbook_stream(workbook: &Workbook, options: &WriteOptions) -> Result<Vec<u8>> {
    if workbook.sheet_count() == 0 {
        return Err(XlsError::InvalidFormat("a workbook needs at least one sheet".into()).into());
    }

    let references = workbook.references();
    let mut writer = XlsWriter {
        options,
        names: NameMap::new(references, options.resolve_deferred_names),
        table: ExternSheetTable::for_links(references.link_count()),
        sst: SstBuilder::new(),
    };

    let mut sheets = Vec::with_capacity(workbook.sheet_count());
    for (index, worksheet) in workbook.sheets().enumerate() {
        let records = if worksheet.opaque_records.is_empty() {
            writer.worksheet_records(worksheet, index, index == workbook.active_sheet())?
        } else {
            worksheet.opaque_records.clone()
        };
        let mut bytes = Vec::new();
        write_records(&mut bytes, &records)?;
        sheets.push(bytes);
    }

    let names = writer.name_records()?;
    let XlsWriter { table, sst, .. } = writer;
    let sst = if sst.is_empty() {
        Vec::new()
    } else {
        sst.into_records()?
    };

    let globals = GlobalsWriter {
        workbook,
        layout: write_layout(&workbook.globals)?,
        table: &table,
        names: &names,
        sst: &sst,
    };

    let mut sized = Vec::new();
    write_records(&mut sized, &globals.records(&vec![0; sheets.len()])?)?;
    let mut positions = Vec::with_capacity(sheets.len());
    let mut offset = sized.len();
    for sheet in &sheets {
        positions.push(u32::try_from(offset).map_err(|_| {
            XlsError::Unsupported("workbook stream larger than 4 GiB".into())
        })?);
        offset += sheet.len();
    }

    let mut stream = Vec::with_capacity(offset);
    write_records(&mut stream, &globals.records(&positions)?)?;
    for sheet in sheets {
        stream.extend_from_slice(&sheet);
    }
    debug!(
        "wrote workbook stream: {} bytes, {} sheets, {} names, {} EXTERNSHEET entries",
        stream.len(),
        workbook.sheet_count(),
        names.len(),
        table.entries().len()
    );
    Ok(stream)
}

/// The globals layout to write. A workbook that was not read from a file
/// gets the default record set.
fn write_layout(saved: &[GlobalsItem]) -> Result<Vec<GlobalsItem>> {
    const ORDER: [Marker; 6] = [
        Marker::Codepage,
        Marker::DateMode,
        Marker::Sheets,
        Marker::Links,
        Marker::Names,
        Marker::Sst,
    ];

    if saved.is_empty() {
        let mut layout = vec![
            GlobalsItem::Marker(Marker::Codepage),
            GlobalsItem::Raw(window1()),
            GlobalsItem::Marker(Marker::DateMode),
        ];
        layout.extend(style_records()?.into_iter().map(GlobalsItem::Raw));
        layout.extend(ORDER[2..].iter().map(|m| GlobalsItem::Marker(*m)));
        return Ok(layout);
    }

    // A missing group goes right after the group before it
    let mut layout = saved.to_vec();
    for (i, marker) in ORDER.iter().enumerate() {
        if layout.contains(&GlobalsItem::Marker(*marker)) {
            continue;
        }
        let at = ORDER[..i]
            .iter()
            .rev()
            .find_map(|prev| {
                layout
                    .iter()
                    .position(|item| *item == GlobalsItem::Marker(*prev))
            })
            .map_or(0, |p| p + 1);
        layout.insert(at, GlobalsItem::Marker(*marker));
    }
    Ok(layout)
}

struct GlobalsWriter<'a> {
    workbook: &'a Workbook,
    layout: Vec<GlobalsItem>,
    table: &'a ExternSheetTable,
    names: &'a [BiffRecord],
    sst: &'a [BiffRecord],
}

impl GlobalsWriter<'_> {
    fn records(&self, positions: &[u32]) -> Result<Vec<BiffRecord>> {
        let workbook = self.workbook;
        let mut out = vec![BofRecord::new(BOF_WORKBOOK_GLOBALS).to_record()];
        for item in &self.layout {
            match item {
                GlobalsItem::Raw(record) => out.push(record.clone()),
                GlobalsItem::Marker(Marker::Codepage) => {
                    out.push(codepage(workbook.settings().codepage))
                }
                GlobalsItem::Marker(Marker::DateMode) => {
                    out.push(datemode(workbook.settings().date_1904))
                }
                GlobalsItem::Marker(Marker::Sheets) => {
                    for (worksheet, position) in workbook.sheets().zip(positions) {
                        out.push(
                            BoundSheetRecord {
                                position: *position,
                                visibility: worksheet.visibility().code(),
                                kind: worksheet.kind().code(),
                                name: worksheet.name().to_string(),
                            }
                            .to_record()?,
                        );
                    }
                }
                GlobalsItem::Marker(Marker::Links) => self.link_records(&mut out)?,
                GlobalsItem::Marker(Marker::Names) => out.extend_from_slice(self.names),
                GlobalsItem::Marker(Marker::Sst) => out.extend_from_slice(self.sst),
            }
        }
        out.push(BiffRecord::new(EOF, Vec::new()));
        Ok(out)
    }

    /// SUPBOOK records in the order `ExternSheetTable::for_links` numbers
    /// them, then EXTERNSHEET
    fn link_records(&self, out: &mut Vec<BiffRecord>) -> Result<()> {
        let references = self.workbook.references();
        if self.table.is_empty() && references.link_count() == 0 {
            return Ok(());
        }
        let sheet_count = u16::try_from(self.workbook.sheet_count())
            .map_err(|_| XlsError::Unsupported("more than 65535 sheets".into()))?;
        out.push(SupBookRecord::Internal { sheet_count }.to_record()?);
        for (_, link) in references.links() {
            out.extend(link_records(link)?);
        }
        out.push(self.table.to_record());
        Ok(())
    }
}

/// How a group member is written
#[derive(Debug)]
enum MemberPlan {
    /// `PtgExp` to `host`; the host cell also carries the group record
    Exp {
        host: CellAddress,
        group: Option<GroupRecord>,
    },
    /// The member's own tokens
    Own(TokenExpr),
}

struct XlsWriter<'a> {
    options: &'a WriteOptions,
    names: NameMap<'a>,
    table: ExternSheetTable,
    sst: SstBuilder,
}

impl XlsWriter<'_> {
    fn worksheet_records(
        &mut self,
        worksheet: &Worksheet,
        sheet: usize,
        selected: bool,
    ) -> Result<Vec<BiffRecord>> {
        let plan = self.plan_groups(worksheet, sheet)?;

        let mut records = vec![BofRecord::new(BOF_WORKSHEET).to_record()];
        records.extend(worksheet.leading_records.iter().cloned());
        records.push(DimensionRecord::from_range(worksheet.dimensions()).to_record());

        for block in row_blocks(worksheet.rows()) {
            records.extend(block.iter().map(|row| row_record(row)));
            for row in &block {
                for (col, cell) in row.cells() {
                    self.cell_records(&mut records, sheet, row.index, col, cell, &plan)?;
                }
            }
        }

        records.extend(worksheet.trailing_records.iter().cloned());
        let has_window = worksheet
            .leading_records
            .iter()
            .chain(&worksheet.trailing_records)
            .any(|r| r.record_type == WINDOW2);
        if !has_window {
            records.push(window2(selected));
        }
        records.push(BiffRecord::new(EOF, Vec::new()));
        Ok(records)
    }

    fn cell_records(
        &mut self,
        out: &mut Vec<BiffRecord>,
        sheet: usize,
        row: u32,
        col: u16,
        cell: &Cell,
        plan: &AHashMap<(u32, u16), MemberPlan>,
    ) -> Result<()> {
        match &cell.content {
            CellContent::Formula(formula) => {
                out.extend(self.formula_records(sheet, row, col, cell.style, formula, plan)?)
            }
            content => out.push(self.value_record(row, col, cell.style, content)?),
        }
        Ok(())
    }

    fn value_record(&mut self, row: u32, col: u16, xf: u16, content: &CellContent) -> Result<BiffRecord> {
        let value = match content {
            CellContent::Number(n) => CellData::Number(*n),
            CellContent::Text(s) => CellData::SstIndex(self.sst.intern(s.as_str())),
            CellContent::Boolean(b) => CellData::Boolean(*b),
            CellContent::Error(e) => CellData::Error(*e),
            CellContent::Blank | CellContent::Formula(_) => CellData::Blank,
        };
        Ok(CellEntry {
            row: row as u16,
            col,
            xf,
            value,
        }
        .to_record()?)
    }

    fn formula_records(
        &mut self,
        sheet: usize,
        row: u32,
        col: u16,
        xf: u16,
        formula: &FormulaCell,
        plan: &AHashMap<(u32, u16), MemberPlan>,
    ) -> Result<Vec<BiffRecord>> {
        let mut record = FormulaRecord {
            row: row as u16,
            col,
            xf,
            result: cached_result(&formula.cached),
            flags: formula.flags & !FLAG_SHARED,
            rgce: Vec::new(),
            extra: Vec::new(),
        };
        let mut group = None;

        let own = match &formula.body {
            FormulaBody::Own(tokens) => Some(tokens),
            FormulaBody::Shared { .. } | FormulaBody::Array { .. } => match plan.get(&(row, col)) {
                Some(MemberPlan::Own(tokens)) => Some(tokens),
                Some(MemberPlan::Exp { host, group: host_group }) => {
                    record.rgce = exp_rgce(*host);
                    if matches!(formula.body, FormulaBody::Shared { .. }) {
                        record.flags |= FLAG_SHARED;
                    }
                    group = host_group.clone();
                    None
                }
                None => {
                    warn!(
                        "formula at {} on sheet {} belongs to no group, writing its value",
                        CellAddress::new(row, col).to_a1_string(),
                        sheet
                    );
                    let content = CellContent::from_value(formula.cached.clone());
                    return Ok(vec![self.value_record(row, col, xf, &content)?]);
                }
            },
        };
        if let Some(tokens) = own {
            let encoded = self.encode(tokens, RgceMode::Standard, sheet)?;
            record.rgce = encoded.rgce;
            record.extra = encoded.extra;
        }

        let mut aggregate = FormulaRecordAggregate::new(record);
        aggregate.group = group;
        Ok(aggregate.to_records()?)
    }

    fn encode(&mut self, tokens: &TokenExpr, mode: RgceMode, sheet: usize) -> Result<EncodedFormula> {
        let prepared = self.names.prepare(tokens, sheet)?;
        Ok(encode(&prepared, mode, &mut self.table)?)
    }

    /// Decide how each shared and array member is written
    fn plan_groups(
        &mut self,
        worksheet: &Worksheet,
        sheet: usize,
    ) -> Result<AHashMap<(u32, u16), MemberPlan>> {
        let mut plan = AHashMap::new();

        for group in worksheet.groups().shared_groups() {
            let members = worksheet.members_of(&group.range(), GroupRef::Shared(group.anchor()));
            for block in self.shared_blocks(members) {
                let Some(bounds) = bounding_range(&block) else {
                    continue;
                };
                let host = bounds.start.relative();
                if !block.iter().any(|m| m.position() == host.position()) {
                    debug!(
                        "shared block {} on sheet {} has no member at its corner, writing members on their own",
                        bounds, sheet
                    );
                    for member in block {
                        plan.insert(member.position(), MemberPlan::Own(group.formula_at(member)));
                    }
                    continue;
                }

                let encoded = self.encode(&group.formula_at(host), RgceMode::Shared(host), sheet)?;
                let mut record = Some(GroupRecord::Shared(SharedFormulaRecord {
                    range: bounds,
                    uses: block.len().min(u8::MAX as usize) as u8,
                    rgce: encoded.rgce,
                    extra: encoded.extra,
                }));
                for member in &block {
                    let group = if member.position() == host.position() {
                        record.take()
                    } else {
                        None
                    };
                    plan.insert(member.position(), MemberPlan::Exp { host, group });
                }
            }
        }

        for group in worksheet.groups().array_groups() {
            let anchor = group.anchor();
            let members = worksheet.members_of(&group.range(), GroupRef::Array(anchor));
            if !members.iter().any(|m| m.position() == anchor.position()) {
                debug!(
                    "array {} on sheet {} lost its anchor cell, writing members on their own",
                    group.range(),
                    sheet
                );
                for member in members {
                    plan.insert(member.position(), MemberPlan::Own(group.formula().clone()));
                }
                continue;
            }

            let encoded = self.encode(group.formula(), RgceMode::Standard, sheet)?;
            let flags = worksheet
                .cell_at(anchor.row, anchor.col)
                .and_then(Cell::formula)
                .map_or(0, |f| f.flags & FLAG_ALWAYS_CALC);
            let mut record = Some(GroupRecord::Array(ArrayRecord {
                range: group.range(),
                flags,
                rgce: encoded.rgce,
                extra: encoded.extra,
            }));
            for member in members {
                let group = if member.position() == anchor.position() {
                    record.take()
                } else {
                    None
                };
                plan.insert(member.position(), MemberPlan::Exp { host: anchor, group });
            }
        }
        Ok(plan)
    }

    /// Members of one shared group, split per row block when configured
    fn shared_blocks(&self, members: Vec<CellAddress>) -> Vec<Vec<CellAddress>> {
        if !self.options.split_shared_formulas_at_row_blocks {
            return vec![members];
        }
        let mut blocks: BTreeMap<u32, Vec<CellAddress>> = BTreeMap::new();
        for member in members {
            blocks.entry(member.row / ROW_BLOCK).or_default().push(member);
        }
        blocks.into_values().collect()
    }

    fn name_records(&mut self) -> Result<Vec<BiffRecord>> {
        let references = self.names.references;
        let mut records = Vec::new();
        for (_, entry) in references.names().filter(|(_, e)| !e.deleted) {
            let record = match self.names.prepare(&entry.formula, entry.scope.formula_sheet())? {
                Cow::Borrowed(_) => NameRecord::from_defined_name(entry, &mut self.table)?,
                Cow::Owned(formula) => {
                    let mut entry = entry.clone();
                    entry.formula = formula;
                    NameRecord::from_defined_name(&entry, &mut self.table)?
                }
            };
            records.push(BiffRecord::new(NAME, record.to_bytes()?));
        }

        for name in &self.names.placeholders {
            let entry = DefinedName::new(name.clone(), NameScope::Workbook, TokenExpr::default());
            let record = NameRecord::from_defined_name(&entry, &mut self.table)?;
            records.push(BiffRecord::new(NAME, record.to_bytes()?));
        }
        Ok(records)
    }
}

/// Name ids as written: deleted names are left out and the rest close up,
/// names still unresolved get placeholder records after the live ones
struct NameMap<'a> {
    references: &'a ReferenceTable,
    /// Written index by table slot; `None` for deleted names
    written: Vec<Option<u16>>,
    live: usize,
    placeholders: Vec<String>,
    resolve_deferred: bool,
}

impl<'a> NameMap<'a> {
    fn new(references: &'a ReferenceTable, resolve_deferred: bool) -> Self {
        let mut written = Vec::with_capacity(references.name_count());
        let mut live = 0usize;
        for (_, entry) in references.names() {
            if entry.deleted {
                written.push(None);
            } else {
                written.push(u16::try_from(live).ok());
                live += 1;
            }
        }
        Self {
            references,
            written,
            live,
            placeholders: Vec::new(),
            resolve_deferred,
        }
    }

    /// `expr` with every name token pointing at its written index
    fn prepare<'e>(&mut self, expr: &'e TokenExpr, sheet: usize) -> Result<Cow<'e, TokenExpr>> {
        let has_names = expr
            .iter()
            .any(|t| matches!(t, Token::Name { .. } | Token::UnresolvedName { .. }));
        if !has_names {
            return Ok(Cow::Borrowed(expr));
        }

        let mut expr = expr.clone();
        for token in expr.tokens_mut() {
            let replacement = match token {
                Token::Name { id, class } => match self.written.get(id.index()).copied().flatten() {
                    Some(index) => Token::Name {
                        id: NameId(index),
                        class: *class,
                    },
                    None => Token::Error(CellError::Ref),
                },
                Token::UnresolvedName { name, class } => {
                    let class = *class;
                    let index = match self
                        .references
                        .lookup(name, sheet)
                        .and_then(|id| self.written.get(id.index()).copied().flatten())
                    {
                        Some(index) => index,
                        None => self.placeholder(name, sheet)?,
                    };
                    Token::Name {
                        id: NameId(index),
                        class,
                    }
                }
                _ => continue,
            };
            *token = replacement;
        }
        Ok(Cow::Owned(expr))
    }

    fn placeholder(&mut self, name: &str, sheet: usize) -> Result<u16> {
        if !self.resolve_deferred {
            return Err(Error::UnresolvedName {
                name: name.to_string(),
                sheet,
            });
        }
        let slot = match self
            .placeholders
            .iter()
            .position(|p| p.eq_ignore_ascii_case(name))
        {
            Some(slot) => slot,
            None => {
                warn!("name '{}' is not defined, writing an empty placeholder", name);
                self.placeholders.push(name.to_string());
                self.placeholders.len() - 1
            }
        };
        u16::try_from(self.live + slot)
            .map_err(|_| XlsError::Unsupported("more than 65535 names".into()).into())
    }
}

/// Rows grouped by 32-row block, in order
fn row_blocks<'r>(rows: impl Iterator<Item = &'r Row>) -> Vec<Vec<&'r Row>> {
    let mut blocks: Vec<Vec<&Row>> = Vec::new();
    for row in rows {
        match blocks.last_mut() {
            Some(block) if block[0].index / ROW_BLOCK == row.index / ROW_BLOCK => block.push(row),
            _ => blocks.push(vec![row]),
        }
    }
    blocks
}

fn row_record(row: &Row) -> BiffRecord {
    let mut record = RowRecord::new(row.index as u16);
    if let (Some(first), Some(last)) = (row.first_col(), row.last_col()) {
        record.first_col = first;
        record.last_col_plus1 = last + 1;
    }
    if let Some(height) = row.height {
        record.height = height;
        record.flags |= RowRecord::FLAG_CUSTOM_HEIGHT;
    }
    if row.hidden {
        record.flags |= RowRecord::FLAG_HIDDEN;
    }
    record.flags |= u16::from(row.outline_level) & ROW_OUTLINE_MASK;
    if row.collapsed {
        record.flags |= ROW_FLAG_COLLAPSED;
    }
    if let Some(xf) = row.style_index {
        record.flags |= ROW_FLAG_STYLED;
        record.xf_field = xf & ROW_XF_MASK;
    }
    record.to_record()
}

fn bounding_range(cells: &[CellAddress]) -> Option<CellRange> {
    let first = cells.first()?;
    let (mut top, mut left, mut bottom, mut right) = (first.row, first.col, first.row, first.col);
    for cell in cells {
        top = top.min(cell.row);
        left = left.min(cell.col);
        bottom = bottom.max(cell.row);
        right = right.max(cell.col);
    }
    Some(CellRange::from_indices(top, left, bottom, right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::reader::read_workbook;
    use crate::settings::ReadOptions;
    use biffbook_core::CellValue;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn addresses(cells: &[(u32, u16)]) -> Vec<CellAddress> {
        cells.iter().map(|(r, c)| CellAddress::new(*r, *c)).collect()
    }

    #[test]
    fn test_bounding_range() {
        assert_eq!(bounding_range(&[]), None);
        assert_eq!(
            bounding_range(&addresses(&[(4, 2), (1, 3), (2, 1)])),
            Some(CellRange::from_indices(1, 1, 4, 3))
        );
    }

    #[test]
    fn test_rows_split_into_blocks() {
        let rows: Vec<Row> = [0, 5, 31, 32, 100].into_iter().map(Row::new).collect();
        let blocks = row_blocks(rows.iter());
        let indices: Vec<Vec<u32>> = blocks
            .iter()
            .map(|b| b.iter().map(|r| r.index).collect())
            .collect();
        assert_eq!(indices, vec![vec![0, 5, 31], vec![32], vec![100]]);
    }

    #[test]
    fn test_missing_groups_follow_their_predecessor() {
        let layout = write_layout(&[
            GlobalsItem::Marker(Marker::Codepage),
            GlobalsItem::Marker(Marker::Sheets),
            GlobalsItem::Raw(BiffRecord::new(0x008C, vec![1, 0, 1, 0])),
        ])
        .unwrap();
        assert_eq!(
            layout,
            vec![
                GlobalsItem::Marker(Marker::Codepage),
                GlobalsItem::Marker(Marker::DateMode),
                GlobalsItem::Marker(Marker::Sheets),
                GlobalsItem::Marker(Marker::Links),
                GlobalsItem::Marker(Marker::Names),
                GlobalsItem::Marker(Marker::Sst),
                GlobalsItem::Raw(BiffRecord::new(0x008C, vec![1, 0, 1, 0])),
            ]
        );
    }

    #[test]
    fn test_deleted_names_close_up() {
        let mut workbook = Workbook::new();
        let first = workbook.define_name("First", NameScope::Workbook, "1").unwrap();
        workbook.define_name("Second", NameScope::Workbook, "2").unwrap();
        workbook.delete_name(first).unwrap();
        workbook.set_cell_formula(0, "A1", "Second+Later").unwrap();

        let mut names = NameMap::new(workbook.references(), true);
        let formula = workbook.sheet(0).unwrap().formula_at(0, 0).unwrap().into_owned();
        let prepared = names.prepare(&formula, 0).unwrap();
        let ids: Vec<u16> = prepared
            .iter()
            .filter_map(|t| match t {
                Token::Name { id, .. } => Some(id.0),
                _ => None,
            })
            .collect();
        // Second moves to slot 0, the placeholder for Later follows it
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(names.placeholders, vec!["Later".to_string()]);
    }

    #[test]
    fn test_unresolved_name_fails_without_placeholders() {
        let mut workbook = Workbook::new();
        workbook.set_cell_formula(0, "A1", "Missing*2").unwrap();
        let options = WriteOptions {
            resolve_deferred_names: false,
            ..WriteOptions::default()
        };
        assert!(matches!(
            workbook_stream(&workbook, &options),
            Err(Error::UnresolvedName { ref name, sheet: 0 }) if name == "Missing"
        ));
    }

    #[test]
    fn test_empty_workbook_is_rejected() {
        assert!(workbook_stream(&Workbook::empty(), &WriteOptions::default()).is_err());
    }

    #[test]
    fn test_shared_group_written_per_row_block() {
        let mut workbook = Workbook::new();
        workbook.create_shared_formula(0, "B2:B70", "A2*2").unwrap();
        let worksheet = workbook.sheet(0).unwrap();

        let options = WriteOptions::default();
        let mut writer = XlsWriter {
            options: &options,
            names: NameMap::new(workbook.references(), true),
            table: ExternSheetTable::for_links(0),
            sst: SstBuilder::new(),
        };
        let plan = writer.plan_groups(worksheet, 0).unwrap();
        let hosts: Vec<(u32, u16)> = plan
            .iter()
            .filter_map(|(pos, p)| match p {
                MemberPlan::Exp { group: Some(_), .. } => Some(*pos),
                _ => None,
            })
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        // rows 2..=32, 33..=64, 65..=70
        assert_eq!(hosts, vec![(1, 1), (32, 1), (64, 1)]);

        let bytes = workbook.to_bytes().unwrap();
        let back = read_workbook(Cursor::new(bytes), &ReadOptions::default()).unwrap();
        let groups: Vec<CellRange> = back
            .sheet(0)
            .unwrap()
            .groups()
            .shared_groups()
            .map(|g| g.range())
            .collect();
        assert_eq!(groups, vec![CellRange::parse("B2:B70").unwrap()]);
        assert_eq!(
            back.cell_formula(0, "B50").unwrap().as_deref(),
            Some("A50*2")
        );
    }

    #[test]
    fn test_formula_written_with_text_result() {
        let mut workbook = Workbook::new();
        workbook.set_cell_formula(0, "A1", "\"a\"&\"b\"").unwrap();
        workbook
            .sheet_mut(0)
            .unwrap()
            .set_cached_result_at(0, 0, CellValue::String("ab".into()))
            .unwrap();
        let bytes = workbook.to_bytes().unwrap();
        let back = read_workbook(Cursor::new(bytes), &ReadOptions::default()).unwrap();
        assert_eq!(
            back.sheet(0).unwrap().get_value_at(0, 0),
            CellValue::String("ab".into())
        );
        assert_eq!(
            back.cell_formula(0, "A1").unwrap().as_deref(),
            Some("\"a\"&\"b\"")
        );
    }
}
