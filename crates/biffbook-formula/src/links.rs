//! External workbook links
//!
//! A formula that points into another workbook does not carry that
//! workbook's path. It stores a [`LinkId`] into the link table, and the link
//! entry holds the path and the sheet names the formula can see. Several
//! formulas and names can share one link; re-pointing the link re-points all
//! of them at once.

use std::fmt;

/// Stable index of an external link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u16);

impl LinkId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A defined name that lives in the external workbook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalName {
    pub name: String,
    /// Sheet the name is scoped to inside the external book, if any
    pub sheet: Option<u16>,
}

/// An external workbook reachable from formulas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalLink {
    /// File-name or path-like identifier, as shown between brackets
    pub identifier: String,
    /// Sheets of the external workbook, in their order there
    pub sheet_names: Vec<String>,
    /// Names defined in the external workbook
    pub names: Vec<ExternalName>,
}

impl ExternalLink {
    pub fn new(identifier: impl Into<String>, sheet_names: Vec<String>) -> Self {
        Self {
            identifier: identifier.into(),
            sheet_names,
            names: Vec::new(),
        }
    }

    /// Position of an exposed sheet (case-insensitive)
    pub fn sheet_index(&self, name: &str) -> Option<u16> {
        self.sheet_names
            .iter()
            .position(|s| s.eq_ignore_ascii_case(name))
            .map(|i| i as u16)
    }

    pub fn sheet_name(&self, index: u16) -> Option<&str> {
        self.sheet_names.get(index as usize).map(String::as_str)
    }

    /// Position of an external name (case-insensitive)
    pub fn name_index(&self, name: &str) -> Option<u16> {
        self.names
            .iter()
            .position(|n| n.name.eq_ignore_ascii_case(name))
            .map(|i| i as u16)
    }

    pub fn matches(&self, identifier: &str) -> bool {
        self.identifier.eq_ignore_ascii_case(identifier)
    }
}
