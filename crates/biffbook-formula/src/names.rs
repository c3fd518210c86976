//! Defined names
//!
//! A defined name gives a formula (usually a reference) a text label that
//! other formulas can use. Names are either workbook-wide or belong to one
//! sheet; a sheet's own definition hides the workbook one while parsing
//! formulas that live on that sheet.
//!
//! # Example
//!
//! ```text
//! TaxRate  (workbook)      = Sheet1!$B$1
//! TaxRate  (Sheet2 only)   = Sheet2!$C$1
//!
//! =Price * TaxRate   on Sheet2 uses Sheet2!$C$1, everywhere else Sheet1!$B$1
//! ```

use std::fmt;

use biffbook_core::CellAddress;

use crate::error::{FormulaError, FormulaResult};
use crate::token::TokenExpr;

/// Stable index of a defined name.
///
/// Tokens store this index rather than the name text, so slots are never
/// reused or compacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameId(pub u16);

impl NameId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scope of a defined name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameScope {
    /// Available throughout the workbook (global)
    Workbook,
    /// Scoped to a specific sheet (local)
    Sheet(usize),
}

/// Sheet index of a formula that lives on no sheet. Name lookups from it
/// see workbook names only, and every sheet-scoped name prints with its
/// sheet prefix.
pub const NO_SHEET: usize = usize::MAX;

impl NameScope {
    /// Sheet index a name's own definition is parsed and printed against
    pub fn formula_sheet(&self) -> usize {
        match self {
            NameScope::Workbook => NO_SHEET,
            NameScope::Sheet(sheet) => *sheet,
        }
    }
}

/// Names with a reserved meaning, stored by code instead of text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinName {
    ConsolidateArea,
    AutoOpen,
    AutoClose,
    Extract,
    Database,
    Criteria,
    PrintArea,
    PrintTitles,
    Recorder,
    DataForm,
    AutoActivate,
    AutoDeactivate,
    SheetTitle,
    FilterDatabase,
}

impl BuiltinName {
    const ALL: [BuiltinName; 14] = [
        BuiltinName::ConsolidateArea,
        BuiltinName::AutoOpen,
        BuiltinName::AutoClose,
        BuiltinName::Extract,
        BuiltinName::Database,
        BuiltinName::Criteria,
        BuiltinName::PrintArea,
        BuiltinName::PrintTitles,
        BuiltinName::Recorder,
        BuiltinName::DataForm,
        BuiltinName::AutoActivate,
        BuiltinName::AutoDeactivate,
        BuiltinName::SheetTitle,
        BuiltinName::FilterDatabase,
    ];

    /// One-byte code stored in the NAME record
    pub fn code(&self) -> u8 {
        match self {
            BuiltinName::ConsolidateArea => 0x00,
            BuiltinName::AutoOpen => 0x01,
            BuiltinName::AutoClose => 0x02,
            BuiltinName::Extract => 0x03,
            BuiltinName::Database => 0x04,
            BuiltinName::Criteria => 0x05,
            BuiltinName::PrintArea => 0x06,
            BuiltinName::PrintTitles => 0x07,
            BuiltinName::Recorder => 0x08,
            BuiltinName::DataForm => 0x09,
            BuiltinName::AutoActivate => 0x0A,
            BuiltinName::AutoDeactivate => 0x0B,
            BuiltinName::SheetTitle => 0x0C,
            BuiltinName::FilterDatabase => 0x0D,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.code() == code)
    }

    /// Text shown in formulas and the name manager
    pub fn as_str(&self) -> &'static str {
        match self {
            BuiltinName::ConsolidateArea => "Consolidate_Area",
            BuiltinName::AutoOpen => "Auto_Open",
            BuiltinName::AutoClose => "Auto_Close",
            BuiltinName::Extract => "Extract",
            BuiltinName::Database => "Database",
            BuiltinName::Criteria => "Criteria",
            BuiltinName::PrintArea => "Print_Area",
            BuiltinName::PrintTitles => "Print_Titles",
            BuiltinName::Recorder => "Recorder",
            BuiltinName::DataForm => "Data_Form",
            BuiltinName::AutoActivate => "Auto_Activate",
            BuiltinName::AutoDeactivate => "Auto_Deactivate",
            BuiltinName::SheetTitle => "Sheet_Title",
            BuiltinName::FilterDatabase => "_FilterDatabase",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|b| b.as_str().eq_ignore_ascii_case(name))
    }
}

/// A defined name entry
#[derive(Debug, Clone, PartialEq)]
pub struct DefinedName {
    /// The name text; kept even after deletion
    pub name: String,
    pub scope: NameScope,
    /// What the name refers to
    pub formula: TokenExpr,
    /// Tombstone: the slot stays but the name no longer resolves
    pub deleted: bool,
    /// Hidden from the UI
    pub hidden: bool,
    pub builtin: Option<BuiltinName>,
    /// The name is a macro function (`fFunc`)
    pub function: bool,
    /// Raw function-group / macro flags preserved from the file
    pub option_flags: u16,
}

impl DefinedName {
    pub fn new(name: impl Into<String>, scope: NameScope, formula: TokenExpr) -> Self {
        Self {
            name: name.into(),
            scope,
            formula,
            deleted: false,
            hidden: false,
            builtin: None,
            function: false,
            option_flags: 0,
        }
    }

    /// A reserved name such as `Print_Area`
    pub fn builtin(builtin: BuiltinName, scope: NameScope, formula: TokenExpr) -> Self {
        Self {
            builtin: Some(builtin),
            ..Self::new(builtin.as_str(), scope, formula)
        }
    }

    /// Mark this name as hidden
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn is_builtin(&self) -> bool {
        self.builtin.is_some()
    }
}

/// Check a user-supplied name against Excel's naming rules
pub fn validate_name(name: &str) -> FormulaResult<()> {
    let invalid = |reason: &str| {
        Err(FormulaError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    let Some(first) = name.chars().next() else {
        return invalid("name is empty");
    };
    if name.chars().count() > 255 {
        return invalid("name is longer than 255 characters");
    }
    if !(first.is_alphabetic() || first == '_' || first == '\\') {
        return invalid("name must start with a letter, underscore or backslash");
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_alphanumeric() || matches!(c, '_' | '.' | '\\' | '?')))
    {
        return invalid(&format!("character '{}' is not allowed", bad));
    }
    if name.eq_ignore_ascii_case("R") || name.eq_ignore_ascii_case("C") {
        return invalid("'R' and 'C' are reserved");
    }
    if CellAddress::parse(name).is_ok() || looks_like_column_and_row(name) {
        return invalid("name looks like a cell reference");
    }
    if looks_like_r1c1(name) {
        return invalid("name looks like an R1C1 reference");
    }
    Ok(())
}

/// Letters followed by digits, even past the BIFF8 grid (e.g. `XFD1`)
pub(crate) fn looks_like_column_and_row(name: &str) -> bool {
    let letters = name.chars().take_while(char::is_ascii_alphabetic).count();
    let rest = &name[letters..];
    (1..=3).contains(&letters) && !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
}

/// `R1C1`, `R2`, `C3` style text
pub(crate) fn looks_like_r1c1(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    let mut chars = upper.chars().peekable();
    let mut saw_axis = false;
    for axis in ['R', 'C'] {
        if chars.peek() == Some(&axis) {
            chars.next();
            saw_axis = true;
            while chars.peek().map_or(false, char::is_ascii_digit) {
                chars.next();
            }
        }
    }
    saw_axis && chars.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in ["TaxRate", "_total", "\\x", "Sales.2024", "Über"] {
            assert!(validate_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "1st", "has space", "A1", "xfd100", "R1C1", "R", "c", "R12", "a-b"] {
            assert!(validate_name(name).is_err(), "{name} should be invalid");
        }
    }

    #[test]
    fn test_builtin_codes() {
        assert_eq!(BuiltinName::PrintArea.code(), 0x06);
        assert_eq!(BuiltinName::from_code(0x0D), Some(BuiltinName::FilterDatabase));
        assert_eq!(BuiltinName::from_name("print_titles"), Some(BuiltinName::PrintTitles));
        assert_eq!(BuiltinName::from_code(0x20), None);
    }
}
