//! Minimum globals and sheet records for a new workbook.
//!
//! Style records are not modelled; a workbook created from scratch gets
//! the four fonts, sixteen XFs and Normal style every BIFF8 reader expects,
//! and cells reference XF 15 (the default cell format).

use super::parser::{put_u16, put_u32, put_u8};
use super::records::{CODEPAGE, DATEMODE, FONT, STYLE, WINDOW1, WINDOW2, XF};
use super::strings::write_short_string;
use super::BiffRecord;
use crate::error::XlsResult;

/// XF index of the default cell format
pub const DEFAULT_CELL_XF: u16 = 15;

/// CODEPAGE value meaning UTF-16
pub const CODEPAGE_UTF16: u16 = 1200;

pub fn codepage(codepage: u16) -> BiffRecord {
    BiffRecord::new(CODEPAGE, codepage.to_le_bytes().to_vec())
}

pub fn datemode(date_1904: bool) -> BiffRecord {
    BiffRecord::new(DATEMODE, (date_1904 as u16).to_le_bytes().to_vec())
}

/// WINDOW1: window position, visible tab strip, first sheet active
pub fn window1() -> BiffRecord {
    let mut out = Vec::with_capacity(18);
    put_u16(&mut out, 0x0168); // xWn
    put_u16(&mut out, 0x001E); // yWn
    put_u16(&mut out, 0x3A5C); // dxWn
    put_u16(&mut out, 0x2328); // dyWn
    put_u16(&mut out, 0x0038); // grbit: scrollbars and tabs
    put_u16(&mut out, 0); // itabCur
    put_u16(&mut out, 0); // itabFirst
    put_u16(&mut out, 1); // ctabSel
    put_u16(&mut out, 0x0258); // wTabRatio
    BiffRecord::new(WINDOW1, out)
}

/// FONT: 10pt Arial
///
/// Index 4 is never referenced by BIFF8 XFs, so four records cover
/// indices 0, 1, 2, 3 and 5.
fn font(bold: bool) -> XlsResult<BiffRecord> {
    let mut out = Vec::with_capacity(20);
    put_u16(&mut out, 200); // dyHeight
    put_u16(&mut out, 0); // grbit
    put_u16(&mut out, 0x7FFF); // icv: automatic
    put_u16(&mut out, if bold { 700 } else { 400 }); // bls
    put_u16(&mut out, 0); // sss
    put_u8(&mut out, 0); // uls
    put_u8(&mut out, 0); // bFamily
    put_u8(&mut out, 0); // bCharSet
    put_u8(&mut out, 0); // reserved
    write_short_string(&mut out, "Arial")?;
    Ok(BiffRecord::new(FONT, out))
}

/// XF: 20 bytes, `style` selects a style XF over a cell XF
fn xf(font: u16, style: bool) -> BiffRecord {
    let mut out = Vec::with_capacity(20);
    put_u16(&mut out, font);
    put_u16(&mut out, 0); // ifmt: General
    if style {
        put_u16(&mut out, 0xFFF5); // locked, style XF, no parent
        put_u8(&mut out, 0x20); // bottom aligned
        put_u8(&mut out, 0);
        put_u8(&mut out, 0);
        put_u8(&mut out, 0xF4); // attributes not used
    } else {
        put_u16(&mut out, 0x0001); // locked, parent style 0
        put_u8(&mut out, 0x20);
        put_u8(&mut out, 0);
        put_u8(&mut out, 0);
        put_u8(&mut out, 0);
    }
    put_u32(&mut out, 0); // borders
    put_u32(&mut out, 0x0020_0000); // no pattern, default colors
    put_u16(&mut out, 0x20C0); // fill colors
    BiffRecord::new(XF, out)
}

/// STYLE: built-in Normal style on XF 0
fn normal_style() -> BiffRecord {
    let mut out = Vec::with_capacity(4);
    put_u16(&mut out, 0x8000); // built-in, ixfe 0
    put_u8(&mut out, 0); // istyBuiltIn: Normal
    put_u8(&mut out, 0xFF); // iLevel
    BiffRecord::new(STYLE, out)
}

/// Fonts, XFs and the Normal style, in stream order
pub fn style_records() -> XlsResult<Vec<BiffRecord>> {
    let mut records = vec![font(false)?, font(true)?, font(false)?, font(false)?];
    records.push(xf(0, true));
    for i in 1..15 {
        let font = match i {
            1 | 2 => 1,
            3 | 4 => 2,
            _ => 0,
        };
        records.push(xf(font, true));
    }
    records.push(xf(0, false));
    records.push(normal_style());
    Ok(records)
}

/// WINDOW2 for a worksheet: gridlines, headers, first sheet selected
pub fn window2(selected: bool) -> BiffRecord {
    let mut out = Vec::with_capacity(18);
    let mut grbit = 0x06B6;
    if !selected {
        grbit &= !0x0600;
    }
    put_u16(&mut out, grbit);
    put_u16(&mut out, 0); // rwTop
    put_u16(&mut out, 0); // colLeft
    put_u32(&mut out, 0x40); // icvHdr
    put_u16(&mut out, 0); // wScaleSLV
    put_u16(&mut out, 0); // wScaleNormal
    put_u32(&mut out, 0); // reserved
    BiffRecord::new(WINDOW2, out)
}
