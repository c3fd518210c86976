//! SUPBOOK / EXTERNSHEET / EXTERNNAME records and the XTI table.
//!
//! 3-D references do not name their workbook and sheets directly. They
//! hold an index (`ixti`) into the EXTERNSHEET table; each entry (XTI)
//! names a SUPBOOK record and a first/last sheet inside it. SUPBOOK 0 is
//! normally the workbook itself, the others are external workbooks or
//! add-in libraries.

use biffbook_formula::{BookRef, ExternalLink, ExternalName, LinkId, SheetSpan};

use super::parser::{put_i16, put_u16, read_i16, read_u16};
use super::records::{EXTERNNAME, EXTERNSHEET, SUPBOOK};
use super::strings::{read_short_string, read_unicode_string, write_short_string, write_unicode_string};
use super::BiffRecord;
use crate::error::{XlsError, XlsResult};

/// `cch` value marking the SUPBOOK of the workbook itself
const INTERNAL_MARKER: u16 = 0x0401;
/// `cch` value marking an add-in function library
const ADDIN_MARKER: u16 = 0x3A01;
/// `itab` used by XTI entries that only carry external names
const NO_SHEET: i16 = -2;

/// A SUPBOOK record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupBookRecord {
    /// The workbook holding the record
    Internal { sheet_count: u16 },
    /// Add-in functions
    AddIn,
    /// Another workbook
    External {
        path: String,
        sheet_names: Vec<String>,
    },
}

impl SupBookRecord {
    pub fn parse(data: &[u8]) -> XlsResult<Self> {
        let mut off = 0;
        let ctab = read_u16(data, &mut off)?;
        let mut peek = off;
        let marker = read_u16(data, &mut peek)?;
        if marker == INTERNAL_MARKER && data.len() == 4 {
            return Ok(SupBookRecord::Internal { sheet_count: ctab });
        }
        if marker == ADDIN_MARKER && data.len() == 4 {
            return Ok(SupBookRecord::AddIn);
        }

        let raw_path = read_unicode_string(data, &mut off)?;
        let path = raw_path.strip_prefix('\u{1}').unwrap_or(&raw_path).to_string();
        let sheet_names = (0..ctab)
            .map(|_| read_unicode_string(data, &mut off))
            .collect::<XlsResult<Vec<_>>>()?;
        Ok(SupBookRecord::External { path, sheet_names })
    }

    pub fn to_bytes(&self) -> XlsResult<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            SupBookRecord::Internal { sheet_count } => {
                put_u16(&mut out, *sheet_count);
                put_u16(&mut out, INTERNAL_MARKER);
            }
            SupBookRecord::AddIn => {
                put_u16(&mut out, 1);
                put_u16(&mut out, ADDIN_MARKER);
            }
            SupBookRecord::External { path, sheet_names } => {
                let count = u16::try_from(sheet_names.len())
                    .map_err(|_| XlsError::Unsupported("too many external sheets".into()))?;
                put_u16(&mut out, count);
                write_unicode_string(&mut out, &format!("\u{1}{}", path))?;
                for name in sheet_names {
                    write_unicode_string(&mut out, name)?;
                }
            }
        }
        Ok(out)
    }

    pub fn to_record(&self) -> XlsResult<BiffRecord> {
        Ok(BiffRecord::new(SUPBOOK, self.to_bytes()?))
    }
}

/// One EXTERNSHEET entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Xti {
    /// Index of the SUPBOOK record
    pub supbook: u16,
    /// First sheet (negative for "no sheet" / deleted sheet)
    pub first: i16,
    pub last: i16,
}

/// Parse an EXTERNSHEET body
pub fn parse_externsheet(data: &[u8]) -> XlsResult<Vec<Xti>> {
    let mut off = 0;
    let count = read_u16(data, &mut off)?;
    (0..count)
        .map(|_| {
            Ok(Xti {
                supbook: read_u16(data, &mut off)?,
                first: read_i16(data, &mut off)?,
                last: read_i16(data, &mut off)?,
            })
        })
        .collect()
}

/// An EXTERNNAME record: a name defined in a supporting workbook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternNameRecord {
    pub flags: u16,
    /// Sheet scope inside the external book (1-based, 0 = workbook)
    pub sheet: u16,
    pub name: String,
}

impl ExternNameRecord {
    pub fn parse(data: &[u8]) -> XlsResult<Self> {
        let mut off = 0;
        let flags = read_u16(data, &mut off)?;
        let sheet = read_u16(data, &mut off)?;
        let _reserved = read_u16(data, &mut off)?;
        let name = read_short_string(data, &mut off)?;
        // The trailing formula is always #REF! for external names; it is
        // regenerated on write.
        Ok(Self { flags, sheet, name })
    }

    pub fn to_bytes(&self) -> XlsResult<Vec<u8>> {
        let mut out = Vec::new();
        put_u16(&mut out, self.flags);
        put_u16(&mut out, self.sheet);
        put_u16(&mut out, 0);
        write_short_string(&mut out, &self.name)?;
        // cce = 2, PtgErr #REF!
        out.extend_from_slice(&[0x02, 0x00, 0x1C, 0x17]);
        Ok(out)
    }

    pub fn from_name(name: &ExternalName) -> Self {
        Self {
            flags: 0,
            sheet: name.sheet.map_or(0, |s| s + 1),
            name: name.name.clone(),
        }
    }

    pub fn into_name(self) -> ExternalName {
        ExternalName {
            name: self.name,
            sheet: self.sheet.checked_sub(1),
        }
    }
}

/// What a SUPBOOK index stands for once the links are loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupBookTarget {
    Internal,
    External(LinkId),
    AddIn,
}

/// The EXTERNSHEET table together with what each SUPBOOK stands for.
///
/// Decoding maps `ixti` to a [`SheetSpan`]; encoding looks spans up and
/// appends entries that are not there yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternSheetTable {
    books: Vec<SupBookTarget>,
    entries: Vec<Xti>,
}

impl ExternSheetTable {
    pub fn new(books: Vec<SupBookTarget>, entries: Vec<Xti>) -> Self {
        Self { books, entries }
    }

    /// Table used when writing: SUPBOOK 0 is this workbook, SUPBOOK `i + 1`
    /// is external link `i`
    pub fn for_links(link_count: usize) -> Self {
        let mut books = vec![SupBookTarget::Internal];
        books.extend((0..link_count).map(|i| SupBookTarget::External(LinkId(i as u16))));
        Self {
            books,
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[Xti] {
        &self.entries
    }

    pub fn books(&self) -> &[SupBookTarget] {
        &self.books
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sheets an `ixti` refers to; `None` for deleted sheets, add-ins and
    /// unknown indices
    pub fn span(&self, ixti: u16) -> Option<SheetSpan> {
        let xti = self.entries.get(ixti as usize)?;
        let book = match self.books.get(xti.supbook as usize)? {
            SupBookTarget::Internal => BookRef::Local,
            SupBookTarget::External(link) => BookRef::External(*link),
            SupBookTarget::AddIn => return None,
        };
        let first = u16::try_from(xti.first).ok()?;
        let last = u16::try_from(xti.last).ok()?;
        Some(SheetSpan { book, first, last })
    }

    /// External link an `ixti` goes through (for external names)
    pub fn link(&self, ixti: u16) -> Option<LinkId> {
        let xti = self.entries.get(ixti as usize)?;
        match self.books.get(xti.supbook as usize)? {
            SupBookTarget::External(link) => Some(*link),
            _ => None,
        }
    }

    fn supbook_of(&self, book: BookRef) -> XlsResult<u16> {
        let target = match book {
            BookRef::Local => SupBookTarget::Internal,
            BookRef::External(link) => SupBookTarget::External(link),
        };
        self.books
            .iter()
            .position(|b| *b == target)
            .map(|i| i as u16)
            .ok_or_else(|| XlsError::Unsupported(format!("no SUPBOOK for {:?}", book)))
    }

    fn find_or_add(&mut self, xti: Xti) -> XlsResult<u16> {
        if let Some(i) = self.entries.iter().position(|e| *e == xti) {
            return Ok(i as u16);
        }
        let i = u16::try_from(self.entries.len())
            .map_err(|_| XlsError::Unsupported("EXTERNSHEET table is full".into()))?;
        self.entries.push(xti);
        Ok(i)
    }

    /// `ixti` for a span, adding an entry if needed
    pub fn ixti_for(&mut self, span: SheetSpan) -> XlsResult<u16> {
        let supbook = self.supbook_of(span.book)?;
        self.find_or_add(Xti {
            supbook,
            first: span.first as i16,
            last: span.last as i16,
        })
    }

    /// `ixti` that external names of `link` are reached through
    pub fn ixti_for_names(&mut self, link: LinkId) -> XlsResult<u16> {
        let supbook = self.supbook_of(BookRef::External(link))?;
        self.find_or_add(Xti {
            supbook,
            first: NO_SHEET,
            last: NO_SHEET,
        })
    }

    /// The EXTERNSHEET record for the current entries
    pub fn to_record(&self) -> BiffRecord {
        let mut out = Vec::with_capacity(2 + self.entries.len() * 6);
        put_u16(&mut out, self.entries.len() as u16);
        for xti in &self.entries {
            put_u16(&mut out, xti.supbook);
            put_i16(&mut out, xti.first);
            put_i16(&mut out, xti.last);
        }
        BiffRecord::new(EXTERNSHEET, out)
    }
}

/// SUPBOOK + EXTERNNAME records of one external link
pub fn link_records(link: &ExternalLink) -> XlsResult<Vec<BiffRecord>> {
    let mut out = vec![SupBookRecord::External {
        path: link.identifier.clone(),
        sheet_names: link.sheet_names.clone(),
    }
    .to_record()?];
    for name in &link.names {
        out.push(BiffRecord::new(
            EXTERNNAME,
            ExternNameRecord::from_name(name).to_bytes()?,
        ));
    }
    Ok(out)
}

/// Build the [`ExternalLink`] described by an external SUPBOOK and its names
pub fn link_from_records(
    path: String,
    sheet_names: Vec<String>,
    names: Vec<ExternNameRecord>,
) -> ExternalLink {
    let mut link = ExternalLink::new(path, sheet_names);
    link.names = names.into_iter().map(ExternNameRecord::into_name).collect();
    link
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_supbook_kinds_round_trip() {
        for record in [
            SupBookRecord::Internal { sheet_count: 3 },
            SupBookRecord::AddIn,
            SupBookRecord::External {
                path: "Book2.xls".into(),
                sheet_names: vec!["Prices".into(), "Old Data".into()],
            },
        ] {
            let bytes = record.to_bytes().unwrap();
            assert_eq!(SupBookRecord::parse(&bytes).unwrap(), record);
        }
    }

    #[test]
    fn test_internal_supbook_bytes() {
        let bytes = SupBookRecord::Internal { sheet_count: 2 }.to_bytes().unwrap();
        assert_eq!(bytes, vec![0x02, 0x00, 0x01, 0x04]);
    }

    #[test]
    fn test_extern_name_record() {
        let record = ExternNameRecord {
            flags: 0,
            sheet: 0,
            name: "Rate".into(),
        };
        let bytes = record.to_bytes().unwrap();
        assert_eq!(&bytes[bytes.len() - 4..], &[0x02, 0x00, 0x1C, 0x17]);
        assert_eq!(ExternNameRecord::parse(&bytes).unwrap(), record);
    }

    #[test]
    fn test_table_maps_spans_both_ways() {
        let mut table = ExternSheetTable::for_links(1);
        let local = SheetSpan {
            book: BookRef::Local,
            first: 0,
            last: 2,
        };
        let external = SheetSpan::external(LinkId(0), 1);

        let a = table.ixti_for(local).unwrap();
        let b = table.ixti_for(external).unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(table.ixti_for(local).unwrap(), 0);

        let record = table.to_record();
        let parsed = ExternSheetTable::new(
            table.books().to_vec(),
            parse_externsheet(&record.data).unwrap(),
        );
        assert_eq!(parsed.span(0), Some(local));
        assert_eq!(parsed.span(1), Some(external));
        assert_eq!(parsed.span(2), None);
    }

    #[test]
    fn test_deleted_sheet_and_name_entries() {
        let mut table = ExternSheetTable::for_links(1);
        let ixti = table.ixti_for_names(LinkId(0)).unwrap();
        assert_eq!(table.span(ixti), None);
        assert_eq!(table.link(ixti), Some(LinkId(0)));
        assert!(table.ixti_for(SheetSpan::external(LinkId(4), 0)).is_err());
    }
}
