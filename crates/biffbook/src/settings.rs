//! Workbook settings and read/write options

use biffbook_xls::biff::defaults::CODEPAGE_UTF16;

/// Workbook-level settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkbookSettings {
    /// Date system: false = 1900 (Windows), true = 1904 (Mac)
    pub date_1904: bool,
    /// CODEPAGE value; BIFF8 files use 1200 (UTF-16)
    pub codepage: u16,
}

impl Default for WorkbookSettings {
    fn default() -> Self {
        Self {
            date_1904: false,
            codepage: CODEPAGE_UTF16,
        }
    }
}

/// Options for [`Workbook::read`](crate::Workbook::read)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOptions {
    /// Check BOF/EOF bracketing and record order of every substream
    /// before interpreting it
    pub verify_structure: bool,
    /// Fail on a NAME record that cannot be decoded instead of keeping a
    /// deleted placeholder in its slot
    pub strict_names: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            verify_structure: true,
            strict_names: false,
        }
    }
}

/// Options for [`Workbook::write`](crate::Workbook::write)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    /// Write one SHRFMLA per 32-row block, as Excel does
    pub split_shared_formulas_at_row_blocks: bool,
    /// Write names that are still unresolved as placeholder NAME records;
    /// when false they fail the save with
    /// [`Error::UnresolvedName`](crate::Error::UnresolvedName)
    pub resolve_deferred_names: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            split_shared_formulas_at_row_blocks: true,
            resolve_deferred_names: true,
        }
    }
}
