//! Defined names and external links of one workbook
//!
//! The table is append-only. Deleting a name leaves a tombstone in its slot
//! because formulas refer to names by index, and links are never removed
//! for the same reason.

use ahash::AHashMap;
use biffbook_core::CellError;

use crate::error::{FormulaError, FormulaResult};
use crate::links::{ExternalLink, ExternalName, LinkId};
use crate::names::{validate_name, DefinedName, NameId, NameScope};
use crate::token::{Token, TokenExpr};

/// Outcome of resolving a name
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NameResolution<'a> {
    /// The name's current definition
    Expression(&'a TokenExpr),
    /// The name was deleted; references to it evaluate to #REF!
    Deleted,
}

/// Name and external-link table
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    names: Vec<DefinedName>,
    /// Live names by (lowercase text, scope)
    index: AHashMap<(String, NameScope), NameId>,
    links: Vec<ExternalLink>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str, scope: NameScope) -> (String, NameScope) {
        (name.to_lowercase(), scope)
    }

    // ==================== Defined names ====================

    /// Define a new name
    ///
    /// Fails with [`FormulaError::DuplicateName`] if a live name with the
    /// same text already exists in `scope`.
    pub fn define_name(
        &mut self,
        name: &str,
        scope: NameScope,
        formula: TokenExpr,
    ) -> FormulaResult<NameId> {
        validate_name(name)?;
        self.define(DefinedName::new(name, scope, formula))
    }

    /// Define a prepared entry (built-in names, hidden names, ...)
    pub fn define(&mut self, entry: DefinedName) -> FormulaResult<NameId> {
        let key = Self::key(&entry.name, entry.scope);
        if self.index.contains_key(&key) {
            return Err(FormulaError::DuplicateName(entry.name));
        }
        let id = self.next_name_id()?;
        self.index.insert(key, id);
        log::debug!("defined name {} as #{}", entry.name, id);
        self.names.push(entry);
        Ok(id)
    }

    /// Append an entry read from a file, keeping its slot even if it
    /// duplicates another name
    pub fn restore_name(&mut self, entry: DefinedName) -> FormulaResult<NameId> {
        let id = self.next_name_id()?;
        if !entry.deleted {
            self.index
                .entry(Self::key(&entry.name, entry.scope))
                .or_insert(id);
        }
        self.names.push(entry);
        Ok(id)
    }

    fn next_name_id(&self) -> FormulaResult<NameId> {
        u16::try_from(self.names.len())
            .ok()
            .filter(|n| *n < u16::MAX)
            .map(NameId)
            .ok_or_else(|| FormulaError::InvalidName {
                name: String::new(),
                reason: "name table is full".into(),
            })
    }

    /// Current definition of a name, or [`NameResolution::Deleted`]
    pub fn resolve(&self, id: NameId) -> FormulaResult<NameResolution<'_>> {
        let entry = self.name(id).ok_or(FormulaError::NameNotFound(id))?;
        if entry.deleted {
            Ok(NameResolution::Deleted)
        } else {
            Ok(NameResolution::Expression(&entry.formula))
        }
    }

    /// Mark a name deleted; its slot stays so other indices do not move
    ///
    /// Deleting an already deleted name is a no-op.
    pub fn delete_name(&mut self, id: NameId) -> FormulaResult<()> {
        let entry = self
            .names
            .get_mut(id.index())
            .ok_or(FormulaError::NameNotFound(id))?;
        if entry.deleted {
            return Ok(());
        }
        entry.deleted = true;
        entry.formula = TokenExpr::new(vec![Token::Error(CellError::Ref)]);
        let key = Self::key(&entry.name, entry.scope);
        if self.index.get(&key) == Some(&id) {
            self.index.remove(&key);
        }
        log::debug!("deleted name #{}", id);
        Ok(())
    }

    /// Replace the definition of a live name
    pub fn set_name_formula(&mut self, id: NameId, formula: TokenExpr) -> FormulaResult<()> {
        let entry = self
            .names
            .get_mut(id.index())
            .ok_or(FormulaError::NameNotFound(id))?;
        if entry.deleted {
            return Err(FormulaError::NameDeleted(id));
        }
        entry.formula = formula;
        Ok(())
    }

    pub fn name(&self, id: NameId) -> Option<&DefinedName> {
        self.names.get(id.index())
    }

    pub fn name_mut(&mut self, id: NameId) -> Option<&mut DefinedName> {
        self.names.get_mut(id.index())
    }

    /// All entries with their ids, tombstones included
    pub fn names(&self) -> impl Iterator<Item = (NameId, &DefinedName)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, n)| (NameId(i as u16), n))
    }

    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    /// Mutable access to every name's formula, used after structural edits
    pub fn name_formulas_mut(&mut self) -> impl Iterator<Item = (NameScope, &mut TokenExpr)> {
        self.names
            .iter_mut()
            .filter(|n| !n.deleted)
            .map(|n| (n.scope, &mut n.formula))
    }

    /// Find a name as seen from a formula on `sheet`
    ///
    /// A definition scoped to `sheet` shadows the workbook definition.
    pub fn lookup(&self, name: &str, sheet: usize) -> Option<NameId> {
        self.lookup_exact(name, NameScope::Sheet(sheet))
            .or_else(|| self.lookup_exact(name, NameScope::Workbook))
    }

    /// Find a live name in exactly this scope
    pub fn lookup_exact(&self, name: &str, scope: NameScope) -> Option<NameId> {
        self.index.get(&Self::key(name, scope)).copied()
    }

    /// Replace `UnresolvedName` tokens whose name now exists
    ///
    /// Returns `true` when no unresolved names remain.
    pub fn resolve_deferred(&self, formula: &mut TokenExpr, sheet: usize) -> bool {
        let mut complete = true;
        for token in formula.tokens_mut() {
            if let Token::UnresolvedName { name, class } = token {
                match self.lookup(name, sheet) {
                    Some(id) => {
                        *token = Token::Name {
                            id,
                            class: *class,
                        }
                    }
                    None => complete = false,
                }
            }
        }
        complete
    }

    /// Keep sheet scopes in line with a removed sheet
    ///
    /// Names scoped to the removed sheet are deleted; later scopes move down.
    pub fn sheet_removed(&mut self, removed: usize) {
        let doomed: Vec<NameId> = self
            .names()
            .filter(|(_, n)| !n.deleted && n.scope == NameScope::Sheet(removed))
            .map(|(id, _)| id)
            .collect();
        for id in doomed {
            // ids come from the table itself
            let _ = self.delete_name(id);
        }
        for entry in &mut self.names {
            if let NameScope::Sheet(s) = entry.scope {
                if s > removed {
                    entry.scope = NameScope::Sheet(s - 1);
                }
            }
        }
        self.rebuild_index();
    }

    /// Keep sheet scopes in line with a sheet moved from `from` to `to`
    pub fn sheet_moved(&mut self, from: usize, to: usize) {
        for entry in &mut self.names {
            if let NameScope::Sheet(s) = entry.scope {
                entry.scope = NameScope::Sheet(moved_index(s, from, to));
            }
        }
        self.rebuild_index();
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (i, entry) in self.names.iter().enumerate() {
            if !entry.deleted {
                self.index
                    .entry(Self::key(&entry.name, entry.scope))
                    .or_insert(NameId(i as u16));
            }
        }
    }

    // ==================== External links ====================

    /// Register an external workbook, or return the existing link to it
    ///
    /// Sheet names not yet known for an existing link are appended.
    pub fn link_external_workbook(&mut self, identifier: &str, sheet_names: &[&str]) -> LinkId {
        if let Some(id) = self.find_link(identifier) {
            let link = &mut self.links[id.index()];
            for name in sheet_names {
                if link.sheet_index(name).is_none() {
                    link.sheet_names.push((*name).to_string());
                }
            }
            return id;
        }
        let id = LinkId(self.links.len() as u16);
        self.links.push(ExternalLink::new(
            identifier,
            sheet_names.iter().map(|s| s.to_string()).collect(),
        ));
        log::debug!("linked external workbook {} as #{}", identifier, id);
        id
    }

    /// Append a link read from a file
    pub fn restore_link(&mut self, link: ExternalLink) -> LinkId {
        let id = LinkId(self.links.len() as u16);
        self.links.push(link);
        id
    }

    /// Register a name defined in an external workbook
    pub fn add_external_name(&mut self, link: LinkId, name: &str) -> FormulaResult<u16> {
        let entry = self
            .links
            .get_mut(link.index())
            .ok_or(FormulaError::LinkNotFound(link.0))?;
        if let Some(existing) = entry.name_index(name) {
            return Ok(existing);
        }
        entry.names.push(ExternalName {
            name: name.to_string(),
            sheet: None,
        });
        Ok((entry.names.len() - 1) as u16)
    }

    pub fn find_link(&self, identifier: &str) -> Option<LinkId> {
        self.links
            .iter()
            .position(|l| l.matches(identifier))
            .map(|i| LinkId(i as u16))
    }

    pub fn link(&self, id: LinkId) -> Option<&ExternalLink> {
        self.links.get(id.index())
    }

    pub fn links(&self) -> impl Iterator<Item = (LinkId, &ExternalLink)> {
        self.links
            .iter()
            .enumerate()
            .map(|(i, l)| (LinkId(i as u16), l))
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Point the link for `old` at `new`
    ///
    /// Tokens and names hold the [`LinkId`], so renaming the entry moves all
    /// of them together. Returns `false` (and changes nothing) when no link
    /// has the identifier `old`.
    pub fn change_external_workbook_target(&mut self, old: &str, new: &str) -> bool {
        match self.find_link(old) {
            Some(id) => {
                self.links[id.index()].identifier = new.to_string();
                log::debug!("external link #{} now targets {}", id, new);
                true
            }
            None => false,
        }
    }

    /// Whether any live defined name goes through the link
    pub fn names_use_link(&self, link: LinkId) -> bool {
        self.names
            .iter()
            .any(|n| !n.deleted && n.formula.uses_link(link))
    }
}

/// Where sheet `index` ends up after moving the sheet at `from` to `to`
pub fn moved_index(index: usize, from: usize, to: usize) -> usize {
    if index == from {
        to
    } else if from < to && index > from && index <= to {
        index - 1
    } else if to < from && index >= to && index < from {
        index + 1
    } else {
        index
    }
}
