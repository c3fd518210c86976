//! Workbook type - the main document structure

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Cursor, Read, Seek, Write};
use std::path::Path;

use biffbook_core::{CellAddress, CellRange, MAX_SHEET_NAME_LEN};
use biffbook_formula::{
    parse_formula, parse_formula_as, render_formula, AreaRef, Axis, BookRef, BuiltinName,
    DefinedName, ExternalName, FormulaShifter, FormulaType, LinkId, NameId, NameResolution,
    NameScope, OperandClass, ReferenceTable, SheetSpan, Token, TokenExpr, WorkbookContext,
};
use log::{debug, warn};

use crate::aggregate::GroupRef;
use crate::error::{Error, Result};
use crate::io::{self, GlobalsItem};
use crate::settings::{ReadOptions, WorkbookSettings, WriteOptions};
use crate::worksheet::{SheetKind, Worksheet};

/// Names nested deeper than this are reported as broken by the locator
const MAX_NAME_DEPTH: usize = 32;

/// A workbook: ordered sheets, the defined-name and external-link table,
/// and the globals records that are carried through unchanged
#[derive(Debug, Clone)]
pub struct Workbook {
    /// Sheets in tab order
    worksheets: Vec<Worksheet>,
    /// Defined names and external links
    references: ReferenceTable,
    settings: WorkbookSettings,
    /// Active sheet index
    active_sheet: usize,
    /// Globals records in file order, with markers where modelled records go
    pub(crate) globals: Vec<GlobalsItem>,
}

/// Where one reference operand of a formula points
#[derive(Debug, Clone, PartialEq)]
pub enum LocatedOperand {
    /// Cells of a sheet in this workbook
    Cells { sheet: usize, range: CellRange },
    /// Cells of a sheet in a linked workbook (`sheet` indexes the link's sheets)
    External { link: LinkId, sheet: u16, range: CellRange },
    /// A name defined in a linked workbook
    ExternalName { link: LinkId, index: u16 },
    /// A deleted reference, a deleted or undefined name, or a removed sheet
    Broken,
}

impl Workbook {
    /// Create a new workbook with one worksheet
    pub fn new() -> Self {
        let mut wb = Self::empty();
        wb.worksheets.push(Worksheet::new("Sheet1"));
        wb
    }

    /// Create a workbook with no sheets
    pub fn empty() -> Self {
        Self {
            worksheets: Vec::new(),
            references: ReferenceTable::new(),
            settings: WorkbookSettings::default(),
            active_sheet: 0,
            globals: Vec::new(),
        }
    }

    pub(crate) fn from_parts(
        worksheets: Vec<Worksheet>,
        references: ReferenceTable,
        settings: WorkbookSettings,
        globals: Vec<GlobalsItem>,
    ) -> Self {
        Self {
            worksheets,
            references,
            settings,
            active_sheet: 0,
            globals,
        }
    }

    // ==================== Sheets ====================

    /// Get the number of sheets
    pub fn sheet_count(&self) -> usize {
        self.worksheets.len()
    }

    /// Get a sheet by index
    pub fn sheet(&self, index: usize) -> Option<&Worksheet> {
        self.worksheets.get(index)
    }

    /// Get a mutable sheet by index
    pub fn sheet_mut(&mut self, index: usize) -> Option<&mut Worksheet> {
        self.worksheets.get_mut(index)
    }

    /// Get a sheet by name (case-insensitive)
    pub fn sheet_by_name(&self, name: &str) -> Option<&Worksheet> {
        WorkbookContext::sheet_index(self, name).and_then(|i| self.worksheets.get(i))
    }

    /// Get sheet index by name (case-insensitive)
    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        WorkbookContext::sheet_index(self, name)
    }

    /// Sheets in tab order
    pub fn sheets(&self) -> impl Iterator<Item = &Worksheet> {
        self.worksheets.iter()
    }

    /// Append a worksheet
    pub fn add_sheet(&mut self, name: &str) -> Result<usize> {
        self.validate_sheet_name_excluding(name, None)?;
        let index = self.worksheets.len();
        self.worksheets.push(Worksheet::new(name));
        Ok(index)
    }

    /// Rename a sheet
    ///
    /// Formulas refer to sheets by position, so nothing else changes.
    pub fn rename_sheet(&mut self, index: usize, new_name: &str) -> Result<()> {
        self.check_sheet(index)?;
        self.validate_sheet_name_excluding(new_name, Some(index))?;
        self.worksheets[index].set_name(new_name);
        Ok(())
    }

    /// Remove a sheet
    ///
    /// References that only point at the removed sheet become #REF!, 3-D
    /// spans shrink, and names scoped to the sheet are deleted.
    pub fn remove_sheet(&mut self, index: usize) -> Result<Worksheet> {
        self.check_sheet(index)?;
        let worksheet = self.worksheets.remove(index);
        self.adjust_all_formulas(&FormulaShifter::sheet_removed(index));
        self.references.sheet_removed(index);

        // Adjust active sheet index
        if self.active_sheet > index || self.active_sheet >= self.worksheets.len() {
            self.active_sheet = self.active_sheet.saturating_sub(1);
        }
        debug!("removed sheet '{}' at {}", worksheet.name(), index);
        Ok(worksheet)
    }

    /// Move a sheet to a new position
    pub fn move_sheet(&mut self, from: usize, to: usize) -> Result<()> {
        self.check_sheet(from)?;
        self.check_sheet(to)?;
        if from == to {
            return Ok(());
        }

        let worksheet = self.worksheets.remove(from);
        self.worksheets.insert(to, worksheet);
        self.adjust_all_formulas(&FormulaShifter::sheet_moved(from, to));
        self.references.sheet_moved(from, to);

        // Adjust active sheet if needed
        if self.active_sheet == from {
            self.active_sheet = to;
        } else if from < self.active_sheet && to >= self.active_sheet {
            self.active_sheet -= 1;
        } else if from > self.active_sheet && to <= self.active_sheet {
            self.active_sheet += 1;
        }
        Ok(())
    }

    /// Get the active sheet index
    pub fn active_sheet(&self) -> usize {
        self.active_sheet
    }

    /// Set the active sheet index
    pub fn set_active_sheet(&mut self, index: usize) -> Result<()> {
        self.check_sheet(index)?;
        self.active_sheet = index;
        Ok(())
    }

    /// Get workbook settings
    pub fn settings(&self) -> &WorkbookSettings {
        &self.settings
    }

    /// Get mutable workbook settings
    pub fn settings_mut(&mut self) -> &mut WorkbookSettings {
        &mut self.settings
    }

    fn check_sheet(&self, index: usize) -> Result<()> {
        if index >= self.worksheets.len() {
            return Err(biffbook_core::Error::SheetOutOfBounds(index, self.worksheets.len()).into());
        }
        Ok(())
    }

    /// A sheet that holds cells, for edits
    fn worksheet_mut(&mut self, index: usize) -> Result<&mut Worksheet> {
        self.check_sheet(index)?;
        let ws = &mut self.worksheets[index];
        if ws.kind() != SheetKind::Worksheet {
            return Err(Error::NotAWorksheet(index));
        }
        Ok(ws)
    }

    /// Validate a sheet name, optionally excluding a sheet from duplicate check
    fn validate_sheet_name_excluding(&self, name: &str, exclude_index: Option<usize>) -> Result<()> {
        if name.is_empty() {
            return Err(biffbook_core::Error::InvalidSheetName("Sheet name cannot be empty".into()).into());
        }
        if name.chars().count() > MAX_SHEET_NAME_LEN {
            return Err(biffbook_core::Error::InvalidSheetName(format!(
                "Sheet name too long (max {} characters)",
                MAX_SHEET_NAME_LEN
            ))
            .into());
        }

        const INVALID_CHARS: &[char] = &[':', '\\', '/', '?', '*', '[', ']'];
        if let Some(c) = name.chars().find(|c| INVALID_CHARS.contains(c)) {
            return Err(biffbook_core::Error::InvalidSheetName(format!(
                "Sheet name cannot contain '{}'",
                c
            ))
            .into());
        }

        let name_lower = name.to_lowercase();
        for (i, ws) in self.worksheets.iter().enumerate() {
            if Some(i) != exclude_index && ws.name().to_lowercase() == name_lower {
                return Err(biffbook_core::Error::DuplicateSheetName(name.into()).into());
            }
        }
        Ok(())
    }

    // ==================== Formulas ====================

    /// Give a cell its own formula, parsed from text
    pub fn set_cell_formula(&mut self, sheet: usize, address: &str, formula: &str) -> Result<()> {
        self.check_sheet(sheet)?;
        let addr = CellAddress::parse(address)?;
        let tokens = parse_formula(formula, &*self, sheet)?;
        self.worksheet_mut(sheet)?
            .set_formula_at(addr.row, addr.col, tokens)
    }

    /// The formula of a cell as text (without `=`), group members included
    pub fn cell_formula(&self, sheet: usize, address: &str) -> Result<Option<String>> {
        self.check_sheet(sheet)?;
        let addr = CellAddress::parse(address)?;
        match self.worksheets[sheet].formula_at(addr.row, addr.col) {
            Some(tokens) => Ok(Some(render_formula(&tokens, self, sheet)?)),
            None => Ok(None),
        }
    }

    /// Fill `range` with one shared formula, written as seen from its
    /// top-left cell
    pub fn create_shared_formula(&mut self, sheet: usize, range: &str, formula: &str) -> Result<()> {
        self.check_sheet(sheet)?;
        let range = CellRange::parse(range)?;
        let tokens = parse_formula_as(formula, &*self, sheet, FormulaType::Shared)?;
        self.worksheet_mut(sheet)?.create_shared_formula(range, tokens)
    }

    /// Enter an array formula over `range`
    pub fn create_array_formula(&mut self, sheet: usize, range: &str, formula: &str) -> Result<()> {
        self.check_sheet(sheet)?;
        let range = CellRange::parse(range)?;
        let tokens = parse_formula_as(formula, &*self, sheet, FormulaType::Array)?;
        self.worksheet_mut(sheet)?.create_array_formula(range, tokens)
    }

    /// Turn a group into per-cell formulas; `false` if it no longer exists
    pub fn dissolve(&mut self, sheet: usize, group: GroupRef) -> Result<bool> {
        Ok(self.worksheet_mut(sheet)?.dissolve(group))
    }

    // ==================== Defined Names ====================

    /// The defined-name and external-link table
    pub fn references(&self) -> &ReferenceTable {
        &self.references
    }

    /// Define a name; the formula is parsed as a name definition
    pub fn define_name(&mut self, name: &str, scope: NameScope, formula: &str) -> Result<NameId> {
        let sheet = self.scope_sheet(scope)?;
        let tokens = parse_formula_as(formula, &*self, sheet, FormulaType::Name)?;
        Ok(self.references.define_name(name, scope, tokens)?)
    }

    /// The definition of a name as text; `None` once the name is deleted
    pub fn name_formula(&self, id: NameId) -> Result<Option<String>> {
        let sheet = self
            .references
            .name(id)
            .map_or(0, |entry| entry.scope.formula_sheet());
        match self.references.resolve(id)? {
            NameResolution::Expression(tokens) => Ok(Some(render_formula(tokens, self, sheet)?)),
            NameResolution::Deleted => Ok(None),
        }
    }

    /// Replace the definition of a name
    pub fn set_name_formula(&mut self, id: NameId, formula: &str) -> Result<()> {
        let scope = self
            .references
            .name(id)
            .map(|entry| entry.scope)
            .ok_or(biffbook_formula::FormulaError::NameNotFound(id))?;
        let tokens = parse_formula_as(formula, &*self, scope.formula_sheet(), FormulaType::Name)?;
        Ok(self.references.set_name_formula(id, tokens)?)
    }

    /// Delete a name; formulas using it evaluate to #REF!
    pub fn delete_name(&mut self, id: NameId) -> Result<()> {
        Ok(self.references.delete_name(id)?)
    }

    /// The name a formula on `sheet` would see
    pub fn resolve_name(&self, name: &str, sheet: usize) -> Option<NameId> {
        self.references.lookup(name, sheet)
    }

    /// Set the print area of a sheet (the built-in `Print_Area` name)
    pub fn set_print_area(&mut self, sheet: usize, range: &str) -> Result<NameId> {
        self.check_sheet(sheet)?;
        let range = CellRange::parse(range)?;
        range.validate()?;
        let tab = u16::try_from(sheet)
            .map_err(|_| biffbook_core::Error::SheetOutOfBounds(sheet, self.worksheets.len()))?;
        let area = AreaRef::new(
            CellAddress::absolute(range.start.row, range.start.col),
            CellAddress::absolute(range.end.row, range.end.col),
        );
        let tokens = TokenExpr::new(vec![Token::Area3d {
            sheets: SheetSpan::local(tab),
            area,
            class: OperandClass::Reference,
        }]);

        let scope = NameScope::Sheet(sheet);
        match self
            .references
            .lookup_exact(BuiltinName::PrintArea.as_str(), scope)
        {
            Some(id) => {
                self.references.set_name_formula(id, tokens)?;
                Ok(id)
            }
            None => Ok(self
                .references
                .define(DefinedName::builtin(BuiltinName::PrintArea, scope, tokens))?),
        }
    }

    /// Replace names that were undefined when their formulas were parsed
    ///
    /// Returns the number of formulas that still use undefined names.
    pub fn resolve_deferred_names(&mut self) -> usize {
        let mut unresolved = 0;
        let references = &self.references;
        for (index, ws) in self.worksheets.iter_mut().enumerate() {
            ws.for_each_formula_mut(|tokens| {
                if tokens.has_unresolved_names() && !references.resolve_deferred(tokens, index) {
                    unresolved += 1;
                }
            });
        }

        let pending: Vec<(NameId, NameScope, TokenExpr)> = self
            .references
            .names()
            .filter(|(_, entry)| !entry.deleted && entry.formula.has_unresolved_names())
            .map(|(id, entry)| (id, entry.scope, entry.formula.clone()))
            .collect();
        for (id, scope, mut tokens) in pending {
            if !self.references.resolve_deferred(&mut tokens, scope.formula_sheet()) {
                unresolved += 1;
            }
            if let Some(entry) = self.references.name_mut(id) {
                entry.formula = tokens;
            }
        }
        unresolved
    }

    fn scope_sheet(&self, scope: NameScope) -> Result<usize> {
        if let NameScope::Sheet(sheet) = scope {
            self.check_sheet(sheet)?;
        }
        Ok(scope.formula_sheet())
    }

    // ==================== External Links ====================

    /// Register an external workbook so formulas can refer to it
    pub fn link_external_workbook(&mut self, identifier: &str, sheet_names: &[&str]) -> LinkId {
        self.references.link_external_workbook(identifier, sheet_names)
    }

    /// Register a name defined in a linked workbook
    pub fn add_external_name(&mut self, link: LinkId, name: &str) -> Result<u16> {
        Ok(self.references.add_external_name(link, name)?)
    }

    /// Point every formula and name that uses the workbook `old` at `new`
    ///
    /// Returns `false`, changing nothing, when `old` is not linked or no
    /// formula or name refers to it. If `new` is already linked, the
    /// references move over to that link: sheets are matched by name and
    /// missing sheets and names are added to it.
    pub fn change_external_workbook_target(&mut self, old: &str, new: &str) -> bool {
        let Some(old_id) = self.references.find_link(old) else {
            return false;
        };
        if !self.link_in_use(old_id) {
            return false;
        }
        match self.references.find_link(new) {
            Some(new_id) if new_id != old_id => self.merge_link(old_id, new_id),
            _ => self.references.change_external_workbook_target(old, new),
        }
    }

    fn link_in_use(&self, link: LinkId) -> bool {
        self.references.names_use_link(link)
            || self
                .worksheets
                .iter()
                .any(|ws| ws.formulas().any(|tokens| tokens.uses_link(link)))
    }

    /// Re-point tokens from one link to another
    ///
    /// Sheets missing from the target are appended to it. A 3-D span whose
    /// sheets would not stay adjacent and in order on the target cannot be
    /// expressed there; the merge is refused before anything changes.
    fn merge_link(&mut self, old_id: LinkId, new_id: LinkId) -> bool {
        let (Some(old_link), Some(mut planned)) = (
            self.references.link(old_id).cloned(),
            self.references.link(new_id).cloned(),
        ) else {
            return false;
        };

        // Every mapping is settled before any token changes
        for sheet in &old_link.sheet_names {
            if planned.sheet_index(sheet).is_none() {
                planned.sheet_names.push(sheet.clone());
            }
        }
        let Some(sheet_map) = old_link
            .sheet_names
            .iter()
            .map(|name| planned.sheet_index(name))
            .collect::<Option<Vec<u16>>>()
        else {
            return false;
        };
        let mut name_map = Vec::with_capacity(old_link.names.len());
        for name in &old_link.names {
            let index = planned.name_index(&name.name).unwrap_or_else(|| {
                planned.names.push(ExternalName {
                    name: name.name.clone(),
                    sheet: None,
                });
                (planned.names.len() - 1) as u16
            });
            name_map.push(index);
        }

        let map_span = |span: &SheetSpan| -> Option<(u16, u16)> {
            let first = *sheet_map.get(span.first as usize)?;
            let last = *sheet_map.get(span.last as usize)?;
            let width = span.last.checked_sub(span.first)?;
            (last.checked_sub(first) == Some(width)
                && (span.first..=span.last)
                    .zip(first..)
                    .all(|(old, new)| sheet_map.get(old as usize) == Some(&new)))
            .then_some((first, last))
        };
        let spans_fit = |tokens: &TokenExpr| {
            tokens.iter().all(|token| match token.sheet_span() {
                Some(span) if span.book == BookRef::External(old_id) => map_span(span).is_some(),
                _ => true,
            })
        };
        let sheet_formulas_fit = self
            .worksheets
            .iter()
            .all(|ws| ws.formulas().all(|tokens| spans_fit(tokens)));
        let name_formulas_fit = self
            .references
            .names()
            .filter(|(_, entry)| !entry.deleted)
            .all(|(_, entry)| spans_fit(&entry.formula));
        if !sheet_formulas_fit || !name_formulas_fit {
            debug!(
                "external link #{} cannot merge into #{}: a sheet span would not stay contiguous",
                old_id, new_id
            );
            return false;
        }

        let sheet_refs: Vec<&str> = old_link.sheet_names.iter().map(String::as_str).collect();
        self.references.link_external_workbook(&planned.identifier, &sheet_refs);
        for name in &old_link.names {
            if let Err(e) = self.references.add_external_name(new_id, &name.name) {
                warn!("external name '{}' not added to link #{}: {}", name.name, new_id, e);
            }
        }

        let remap = |tokens: &mut TokenExpr| {
            for token in tokens.tokens_mut() {
                if let Token::ExternName { link, index, .. } = token {
                    if *link == old_id {
                        *link = new_id;
                        *index = name_map.get(*index as usize).copied().unwrap_or(*index);
                    }
                    continue;
                }
                if let Some(span) = token.sheet_span_mut() {
                    if span.book == BookRef::External(old_id) {
                        if let Some((first, last)) = map_span(&*span) {
                            span.first = first;
                            span.last = last;
                        }
                        span.book = BookRef::External(new_id);
                    }
                }
            }
        };
        for ws in &mut self.worksheets {
            ws.for_each_formula_mut(&remap);
        }
        for (_, tokens) in self.references.name_formulas_mut() {
            remap(tokens);
        }
        debug!("moved references from external link #{} to #{}", old_id, new_id);
        true
    }

    // ==================== Operand Locator ====================

    /// Where each reference operand of a cell's formula points
    ///
    /// Names are followed to their definitions. An empty list means the
    /// formula has no reference operands; a cell without a formula is
    /// [`Error::NotAFormula`].
    pub fn locate_operands(&self, sheet: usize, address: &str) -> Result<Vec<LocatedOperand>> {
        self.check_sheet(sheet)?;
        let addr = CellAddress::parse(address)?;
        let tokens = self.worksheets[sheet]
            .formula_at(addr.row, addr.col)
            .ok_or(Error::NotAFormula(addr))?;
        let mut out = Vec::new();
        self.locate_into(&tokens, sheet, 0, &mut out);
        Ok(out)
    }

    fn locate_into(&self, tokens: &TokenExpr, sheet: usize, depth: usize, out: &mut Vec<LocatedOperand>) {
        for token in tokens {
            match token {
                Token::Ref { address, .. } => out.push(LocatedOperand::Cells {
                    sheet,
                    range: single(address),
                }),
                Token::Area { area, .. } => out.push(LocatedOperand::Cells {
                    sheet,
                    range: normalized(area),
                }),
                Token::Ref3d {
                    sheets, address, ..
                } => self.locate_span(sheets, single(address), out),
                Token::Area3d { sheets, area, .. } => {
                    self.locate_span(sheets, normalized(area), out)
                }
                Token::RefErr { .. }
                | Token::AreaErr { .. }
                | Token::RefErr3d { .. }
                | Token::AreaErr3d { .. }
                | Token::UnresolvedName { .. } => out.push(LocatedOperand::Broken),
                Token::Name { id, .. } => match self.references.resolve(*id) {
                    Ok(NameResolution::Expression(definition)) if depth < MAX_NAME_DEPTH => {
                        self.locate_into(definition, sheet, depth + 1, out)
                    }
                    _ => out.push(LocatedOperand::Broken),
                },
                Token::ExternName { link, index, .. } => out.push(LocatedOperand::ExternalName {
                    link: *link,
                    index: *index,
                }),
                _ => {}
            }
        }
    }

    fn locate_span(&self, span: &SheetSpan, range: CellRange, out: &mut Vec<LocatedOperand>) {
        for tab in span.first..=span.last {
            out.push(match span.book {
                BookRef::Local if (tab as usize) < self.worksheets.len() => LocatedOperand::Cells {
                    sheet: tab as usize,
                    range,
                },
                BookRef::Local => LocatedOperand::Broken,
                BookRef::External(link) => LocatedOperand::External {
                    link,
                    sheet: tab,
                    range,
                },
            });
        }
    }

    // ==================== Structural Edits ====================

    /// Move rows `first..=last` of a sheet by `delta`
    ///
    /// Formula groups inside the block move with it; a group cut by the
    /// block, or partly covered where it lands, fails the call with
    /// [`Error::GroupSplit`] before anything changes. Every formula and
    /// name in the workbook is then adjusted.
    pub fn shift_rows(&mut self, sheet: usize, first: u32, last: u32, delta: i64) -> Result<()> {
        self.shift(sheet, Axis::Rows, first, last, delta)
    }

    /// Move columns `first..=last` of a sheet by `delta`, as
    /// [`shift_rows`](Self::shift_rows) does for rows
    pub fn shift_columns(&mut self, sheet: usize, first: u16, last: u16, delta: i64) -> Result<()> {
        self.shift(sheet, Axis::Columns, first as u32, last as u32, delta)
    }

    fn shift(&mut self, sheet: usize, axis: Axis, first: u32, last: u32, delta: i64) -> Result<()> {
        self.worksheet_mut(sheet)?
            .move_block(axis, first, last, delta)?;
        self.adjust_all_formulas(&FormulaShifter::moved(sheet, axis, first, last, delta));
        debug!(
            "shifted {:?} {}..={} of sheet {} by {}",
            axis, first, last, sheet, delta
        );
        Ok(())
    }

    fn adjust_all_formulas(&mut self, shifter: &FormulaShifter) {
        for (index, ws) in self.worksheets.iter_mut().enumerate() {
            ws.adjust_formulas(shifter, index);
        }
        for (_, tokens) in self.references.name_formulas_mut() {
            shifter.adjust(tokens, None);
        }
    }

    // ==================== File I/O ====================

    /// Open an .xls file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, &ReadOptions::default())
    }

    /// Open an .xls file with explicit read options
    pub fn open_with<P: AsRef<Path>>(path: P, options: &ReadOptions) -> Result<Self> {
        let path = path.as_ref();
        check_extension(path)?;
        let file = File::open(path)?;
        Self::read(BufReader::new(file), options)
    }

    /// Read a workbook from an OLE2 container
    pub fn read<R: Read + Seek>(reader: R, options: &ReadOptions) -> Result<Self> {
        io::reader::read_workbook(reader, options)
    }

    /// Save as an .xls file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.save_with(path, &WriteOptions::default())
    }

    /// Save as an .xls file with explicit write options
    pub fn save_with<P: AsRef<Path>>(&self, path: P, options: &WriteOptions) -> Result<()> {
        let path = path.as_ref();
        check_extension(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        self.write(file, options)?;
        Ok(())
    }

    /// Write the workbook as an OLE2 container, returning the writer
    pub fn write<W: Read + Write + Seek>(&self, writer: W, options: &WriteOptions) -> Result<W> {
        io::writer::write_workbook(self, writer, options)
    }

    /// The complete .xls file in memory
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self
            .write(Cursor::new(Vec::new()), &WriteOptions::default())?
            .into_inner())
    }
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkbookContext for Workbook {
    fn sheet_count(&self) -> usize {
        self.worksheets.len()
    }

    fn sheet_name(&self, index: usize) -> Option<&str> {
        self.worksheets.get(index).map(Worksheet::name)
    }

    fn references(&self) -> &ReferenceTable {
        &self.references
    }
}

/// Sheet used to parse and render a formula with this scope
fn single(address: &CellAddress) -> CellRange {
    CellRange::single(address.relative())
}

fn normalized(area: &AreaRef) -> CellRange {
    let range = area.range();
    CellRange::from_indices(range.start.row, range.start.col, range.end.row, range.end.col)
}

fn check_extension(path: &Path) -> Result<()> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());
    match extension.as_deref() {
        Some("xls") => Ok(()),
        _ => Err(Error::UnsupportedFormat(path.display().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_workbook() {
        let wb = Workbook::new();
        assert_eq!(wb.sheet_count(), 1);
        assert_eq!(wb.sheet(0).map(Worksheet::name), Some("Sheet1"));
        assert_eq!(Workbook::empty().sheet_count(), 0);
    }

    #[test]
    fn test_invalid_sheet_names() {
        let mut wb = Workbook::new();
        for name in ["", "a:b", "x[1]", "this name is far too long to be a sheet"] {
            assert!(matches!(
                wb.add_sheet(name),
                Err(Error::Core(biffbook_core::Error::InvalidSheetName(_)))
            ));
        }
        assert!(matches!(
            wb.add_sheet("SHEET1"),
            Err(Error::Core(biffbook_core::Error::DuplicateSheetName(_)))
        ));
        wb.rename_sheet(0, "sheet1").unwrap();
        assert_eq!(wb.sheet(0).unwrap().name(), "sheet1");
    }

    #[test]
    fn test_move_sheet_keeps_references_on_their_sheet() {
        let mut wb = Workbook::new();
        wb.add_sheet("Data").unwrap();
        wb.add_sheet("Report").unwrap();
        wb.set_cell_formula(2, "A1", "=Data!B2+Sheet1!C3").unwrap();

        wb.move_sheet(1, 2).unwrap();
        assert_eq!(wb.sheet_index("Report"), Some(1));
        assert_eq!(
            wb.cell_formula(1, "A1").unwrap().as_deref(),
            Some("Data!B2+Sheet1!C3")
        );
    }

    #[test]
    fn test_remove_sheet_breaks_references_to_it() {
        let mut wb = Workbook::new();
        wb.add_sheet("Gone").unwrap();
        wb.set_cell_formula(0, "A1", "=Gone!A1*2").unwrap();
        let local = wb.define_name("Local", NameScope::Sheet(1), "=Gone!$A$1").unwrap();

        wb.remove_sheet(1).unwrap();
        assert_eq!(wb.cell_formula(0, "A1").unwrap().as_deref(), Some("#REF!*2"));
        assert_eq!(wb.name_formula(local).unwrap(), None);
    }

    #[test]
    fn test_print_area_is_sheet_scoped_builtin() {
        let mut wb = Workbook::new();
        let id = wb.set_print_area(0, "A1:D20").unwrap();
        let entry = wb.references().name(id).unwrap();
        assert_eq!(entry.builtin, Some(BuiltinName::PrintArea));
        assert_eq!(entry.scope, NameScope::Sheet(0));
        assert_eq!(wb.name_formula(id).unwrap().as_deref(), Some("Sheet1!$A$1:$D$20"));

        // setting it again reuses the entry
        assert_eq!(wb.set_print_area(0, "B2:C3").unwrap(), id);
    }

    #[test]
    fn test_deferred_names_resolve_once_defined() {
        let mut wb = Workbook::new();
        wb.set_cell_formula(0, "A1", "=Rate*2").unwrap();
        assert_eq!(wb.resolve_deferred_names(), 1);

        wb.define_name("Rate", NameScope::Workbook, "=Sheet1!$B$1").unwrap();
        assert_eq!(wb.resolve_deferred_names(), 0);
        let tokens = wb.sheet(0).unwrap().formula_at(0, 0).unwrap();
        assert!(!tokens.has_unresolved_names());
    }

    #[test]
    fn test_file_extension_is_checked() {
        assert!(matches!(
            Workbook::open("book.xlsx"),
            Err(Error::UnsupportedFormat(_))
        ));
    }
}
