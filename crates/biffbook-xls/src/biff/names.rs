//! NAME record (defined names).
//!
//! ```text
//! grbit u16 | chKey u8 | cch u8 | cce u16 | reserved u16 | itab u16
//! | 4 × u8 lengths (menu, description, help, status; always 0 here)
//! | name chars (flags byte + cch characters) | rgce | rgcb
//! ```
//!
//! `itab` is the 1-based index of the sheet the name belongs to, 0 for
//! workbook names. A built-in name stores its one-byte code as its text.

use biffbook_formula::{BuiltinName, DefinedName, NameScope, TokenExpr};

use super::links::ExternSheetTable;
use super::parser::{put_u16, put_u8, read_bytes, read_u16, read_u8, skip};
use super::rgce::{self, RgceMode};
use super::strings::{read_flagged_chars, write_flagged_chars};
use crate::error::{XlsError, XlsResult};

const FLAG_HIDDEN: u16 = 0x0001;
const FLAG_FUNCTION: u16 = 0x0002;
const FLAG_BUILTIN: u16 = 0x0020;
const MODELLED_FLAGS: u16 = FLAG_HIDDEN | FLAG_FUNCTION | FLAG_BUILTIN;

/// Text of a NAME record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameText {
    Builtin(u8),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRecord {
    pub flags: u16,
    /// Keyboard shortcut of a macro name
    pub shortcut: u8,
    /// 1-based sheet index, 0 for a workbook-wide name
    pub sheet: u16,
    pub name: NameText,
    pub rgce: Vec<u8>,
    pub extra: Vec<u8>,
}

impl NameRecord {
    pub fn parse(data: &[u8]) -> XlsResult<Self> {
        let mut off = 0;
        let flags = read_u16(data, &mut off)?;
        let shortcut = read_u8(data, &mut off)?;
        let cch = read_u8(data, &mut off)?;
        let cce = read_u16(data, &mut off)? as usize;
        let _reserved = read_u16(data, &mut off)?;
        let sheet = read_u16(data, &mut off)?;
        skip(data, &mut off, 4)?;

        let text = read_flagged_chars(data, &mut off, cch as u16)?;
        let name = if flags & FLAG_BUILTIN != 0 {
            let code = text
                .chars()
                .next()
                .and_then(|c| u8::try_from(u32::from(c)).ok())
                .ok_or_else(|| XlsError::Parse("built-in name without a code".into()))?;
            NameText::Builtin(code)
        } else {
            NameText::Text(text)
        };

        let rgce = read_bytes(data, &mut off, cce)?.to_vec();
        let extra = data[off..].to_vec();
        Ok(Self {
            flags,
            shortcut,
            sheet,
            name,
            rgce,
            extra,
        })
    }

    pub fn to_bytes(&self) -> XlsResult<Vec<u8>> {
        let text = match &self.name {
            NameText::Builtin(code) => char::from(*code).to_string(),
            NameText::Text(text) => text.clone(),
        };
        let cch = u8::try_from(text.encode_utf16().count())
            .map_err(|_| XlsError::Unsupported(format!("name longer than 255 characters: {text:.20}…")))?;
        let cce = u16::try_from(self.rgce.len())
            .map_err(|_| XlsError::Unsupported("name formula too long for BIFF8".into()))?;

        let mut out = Vec::with_capacity(16 + text.len() * 2 + self.rgce.len() + self.extra.len());
        put_u16(&mut out, self.flags);
        put_u8(&mut out, self.shortcut);
        put_u8(&mut out, cch);
        put_u16(&mut out, cce);
        put_u16(&mut out, 0);
        put_u16(&mut out, self.sheet);
        out.extend_from_slice(&[0; 4]);
        write_flagged_chars(&mut out, &text);
        out.extend_from_slice(&self.rgce);
        out.extend_from_slice(&self.extra);
        Ok(out)
    }

    pub fn scope(&self) -> NameScope {
        match self.sheet {
            0 => NameScope::Workbook,
            n => NameScope::Sheet(n as usize - 1),
        }
    }

    /// Decode into a table entry
    pub fn to_defined_name(&self, table: &ExternSheetTable) -> XlsResult<DefinedName> {
        let formula = if self.rgce.is_empty() {
            TokenExpr::default()
        } else {
            rgce::decode_tokens(&self.rgce, &self.extra, RgceMode::Standard, table)?
        };
        let builtin = match self.name {
            NameText::Builtin(code) => Some(BuiltinName::from_code(code).ok_or_else(|| {
                XlsError::Parse(format!("unknown built-in name code 0x{code:02X}"))
            })?),
            NameText::Text(_) => None,
        };
        let text = match (&self.name, builtin) {
            (_, Some(builtin)) => builtin.as_str().to_string(),
            (NameText::Text(text), None) => text.clone(),
            (NameText::Builtin(_), None) => String::new(),
        };

        let mut entry = DefinedName::new(text, self.scope(), formula);
        entry.builtin = builtin;
        entry.hidden = self.flags & FLAG_HIDDEN != 0;
        entry.function = self.flags & FLAG_FUNCTION != 0;
        entry.option_flags = self.flags & !MODELLED_FLAGS;
        Ok(entry)
    }

    /// Encode a table entry; 3-D references extend `table`
    pub fn from_defined_name(entry: &DefinedName, table: &mut ExternSheetTable) -> XlsResult<Self> {
        let encoded = if entry.formula.is_empty() {
            Default::default()
        } else {
            rgce::encode(&entry.formula, RgceMode::Standard, table)?
        };

        let mut flags = entry.option_flags & !MODELLED_FLAGS;
        if entry.hidden {
            flags |= FLAG_HIDDEN;
        }
        if entry.function {
            flags |= FLAG_FUNCTION;
        }
        let name = match entry.builtin {
            Some(builtin) => {
                flags |= FLAG_BUILTIN;
                NameText::Builtin(builtin.code())
            }
            None => NameText::Text(entry.name.clone()),
        };
        let sheet = match entry.scope {
            NameScope::Workbook => 0,
            NameScope::Sheet(index) => u16::try_from(index + 1)
                .map_err(|_| XlsError::Unsupported(format!("sheet index {index} too large")))?,
        };

        Ok(Self {
            flags,
            shortcut: 0,
            sheet,
            name,
            rgce: encoded.rgce,
            extra: encoded.extra,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biffbook_core::CellAddress;
    use biffbook_formula::{AreaRef, OperandClass, SheetSpan, Token};
    use pretty_assertions::assert_eq;

    fn print_area() -> TokenExpr {
        TokenExpr::new(vec![Token::Area3d {
            sheets: SheetSpan::local(0),
            area: AreaRef::new(CellAddress::absolute(0, 0), CellAddress::absolute(9, 3)),
            class: OperandClass::Reference,
        }])
    }

    #[test]
    fn test_builtin_name_is_stored_by_code() {
        let entry = DefinedName::builtin(BuiltinName::PrintArea, NameScope::Sheet(0), print_area());
        let mut table = ExternSheetTable::for_links(0);
        let record = NameRecord::from_defined_name(&entry, &mut table).unwrap();
        let bytes = record.to_bytes().unwrap();

        // grbit, chKey, cch = 1, ..., itab = 1, then the code after the flags byte
        assert_eq!(&bytes[..4], &[0x20, 0x00, 0x00, 0x01]);
        assert_eq!(&bytes[8..10], &[0x01, 0x00]);
        assert_eq!(&bytes[14..16], &[0x00, 0x06]);

        let back = NameRecord::parse(&bytes).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.to_defined_name(&table).unwrap(), entry);
    }

    #[test]
    fn test_hidden_workbook_name_round_trip() {
        let mut entry = DefinedName::new("Rate", NameScope::Workbook, TokenExpr::new(vec![Token::Number(0.25)]))
            .hidden();
        entry.option_flags = 0x0040;
        let mut table = ExternSheetTable::for_links(0);
        let record = NameRecord::from_defined_name(&entry, &mut table).unwrap();
        assert_eq!(record.flags, 0x0041);
        assert_eq!(record.scope(), NameScope::Workbook);

        let back = NameRecord::parse(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(back.to_defined_name(&table).unwrap(), entry);
    }

    #[test]
    fn test_name_without_formula() {
        let entry = DefinedName::new("Empty", NameScope::Workbook, TokenExpr::default());
        let mut table = ExternSheetTable::for_links(0);
        let record = NameRecord::from_defined_name(&entry, &mut table).unwrap();
        assert!(record.rgce.is_empty());
        assert_eq!(record.to_defined_name(&table).unwrap().formula, TokenExpr::default());
    }
}
