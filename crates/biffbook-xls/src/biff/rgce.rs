//! Formula token codec (`rgce` + `rgcb`).
//!
//! BIFF8 stores a formula as a byte string of parsed tokens ("ptgs") in
//! postfix order, plus trailing extra data for array constants. Each
//! reference-like ptg comes in three variants that differ only in the
//! operand class bits (0x20 reference, 0x40 value, 0x60 array).
//!
//! Cell formulas and names hold absolute coordinates with relative flags.
//! Shared formulas (SHRFMLA) hold row/column *offsets* instead, taken
//! modulo 65536 rows and 256 columns from the cell that evaluates them.
//! A formula cell that is part of a shared or array group stores only
//! `PtgExp`, pointing at the group's anchor.

use biffbook_core::{CellAddress, CellError};
use biffbook_formula::functions::{self, SUM_INDEX};
use biffbook_formula::{
    AreaRef, ArrayConstant, ArrayValue, BinaryOperator, FunctionCall, LinkId, NameId,
    OperandClass, SheetSpan, Token, TokenExpr, UnaryOperator,
};

use super::links::ExternSheetTable;
use super::parser::{put_f64, put_u16, put_u8, read_f64, read_u16, read_u8, skip};
use super::strings::{read_short_string, read_unicode_string, write_short_string, write_unicode_string};
use crate::error::{XlsError, XlsResult};

// Base ptg ids (class variants add 0x20/0x40)
const PTG_EXP: u8 = 0x01;
const PTG_TBL: u8 = 0x02;
const PTG_PAREN: u8 = 0x15;
const PTG_MISS_ARG: u8 = 0x16;
const PTG_STR: u8 = 0x17;
const PTG_EXTEND: u8 = 0x18;
const PTG_ATTR: u8 = 0x19;
const PTG_ERR: u8 = 0x1C;
const PTG_BOOL: u8 = 0x1D;
const PTG_INT: u8 = 0x1E;
const PTG_NUM: u8 = 0x1F;
const PTG_ARRAY: u8 = 0x20;
const PTG_FUNC: u8 = 0x21;
const PTG_FUNC_VAR: u8 = 0x22;
const PTG_NAME: u8 = 0x23;
const PTG_REF: u8 = 0x24;
const PTG_AREA: u8 = 0x25;
const PTG_MEM_AREA: u8 = 0x26;
const PTG_MEM_ERR: u8 = 0x27;
const PTG_MEM_NO_MEM: u8 = 0x28;
const PTG_MEM_FUNC: u8 = 0x29;
const PTG_REF_ERR: u8 = 0x2A;
const PTG_AREA_ERR: u8 = 0x2B;
const PTG_REF_N: u8 = 0x2C;
const PTG_AREA_N: u8 = 0x2D;
const PTG_MEM_AREA_N: u8 = 0x2E;
const PTG_MEM_NO_MEM_N: u8 = 0x2F;
const PTG_NAME_X: u8 = 0x39;
const PTG_REF_3D: u8 = 0x3A;
const PTG_AREA_3D: u8 = 0x3B;
const PTG_REF_ERR_3D: u8 = 0x3C;
const PTG_AREA_ERR_3D: u8 = 0x3D;

// PtgAttr flags
const ATTR_CHOOSE: u8 = 0x04;
const ATTR_SUM: u8 = 0x10;

// Column field flags
const COL_RELATIVE: u16 = 0x4000;
const ROW_RELATIVE: u16 = 0x8000;
const COL_MASK: u16 = 0x00FF;

// PtgFuncVar tab field: macro-sheet command instead of a function
const FUNC_VAR_COMMAND: u16 = 0x8000;

// Array constant element types in rgcb
const ARRAY_EMPTY: u8 = 0x00;
const ARRAY_NUMBER: u8 = 0x01;
const ARRAY_STRING: u8 = 0x02;
const ARRAY_BOOL: u8 = 0x04;
const ARRAY_ERROR: u8 = 0x10;

/// How references are stored in the token stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RgceMode {
    /// Absolute coordinates (FORMULA, ARRAY, NAME)
    Standard,
    /// Offsets from the evaluating cell (SHRFMLA), decoded as seen from
    /// `origin`
    Shared(CellAddress),
}

/// Decoded formula body of a FORMULA record
#[derive(Debug, Clone, PartialEq)]
pub enum RgceBody {
    /// `PtgExp`: the cell belongs to the shared or array group anchored here
    Exp(CellAddress),
    Tokens(TokenExpr),
}

/// An encoded formula
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedFormula {
    pub rgce: Vec<u8>,
    /// Extra data (`rgcb`) for array constants
    pub extra: Vec<u8>,
}

/// `PtgExp` pointing at a group anchor
pub fn exp_rgce(anchor: CellAddress) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    put_u8(&mut out, PTG_EXP);
    put_u16(&mut out, anchor.row as u16);
    put_u16(&mut out, anchor.col);
    out
}

/// Decode a formula that may be a `PtgExp`
pub fn decode(
    rgce: &[u8],
    extra: &[u8],
    mode: RgceMode,
    table: &ExternSheetTable,
) -> XlsResult<RgceBody> {
    if rgce.first() == Some(&PTG_EXP) {
        if rgce.len() != 5 {
            return Err(XlsError::Parse("PtgExp must be the only token".into()));
        }
        let mut off = 1;
        let row = read_u16(rgce, &mut off)? as u32;
        let col = read_u16(rgce, &mut off)?;
        return Ok(RgceBody::Exp(CellAddress::new(row, col)));
    }
    decode_tokens(rgce, extra, mode, table).map(RgceBody::Tokens)
}

/// Decode a formula that must carry its own tokens
pub fn decode_tokens(
    rgce: &[u8],
    extra: &[u8],
    mode: RgceMode,
    table: &ExternSheetTable,
) -> XlsResult<TokenExpr> {
    let mut decoder = Decoder {
        rgce,
        pos: 0,
        extra,
        extra_pos: 0,
        mode,
        table,
        tokens: Vec::new(),
    };
    decoder.run()?;
    Ok(TokenExpr::from_tokens(decoder.tokens)?)
}

fn class_of(ptg: u8) -> OperandClass {
    match (ptg >> 5) & 0x03 {
        1 => OperandClass::Reference,
        3 => OperandClass::Array,
        _ => OperandClass::Value,
    }
}

fn with_class(base: u8, class: OperandClass) -> u8 {
    let bits = match class {
        OperandClass::Reference => 0x20,
        OperandClass::Value => 0x40,
        OperandClass::Array => 0x60,
    };
    (base & 0x1F) | bits
}

fn binary_operator(ptg: u8) -> Option<BinaryOperator> {
    Some(match ptg {
        0x03 => BinaryOperator::Add,
        0x04 => BinaryOperator::Subtract,
        0x05 => BinaryOperator::Multiply,
        0x06 => BinaryOperator::Divide,
        0x07 => BinaryOperator::Power,
        0x08 => BinaryOperator::Concat,
        0x09 => BinaryOperator::LessThan,
        0x0A => BinaryOperator::LessEqual,
        0x0B => BinaryOperator::Equal,
        0x0C => BinaryOperator::GreaterEqual,
        0x0D => BinaryOperator::GreaterThan,
        0x0E => BinaryOperator::NotEqual,
        0x0F => BinaryOperator::Intersect,
        0x10 => BinaryOperator::Union,
        0x11 => BinaryOperator::Range,
        _ => return None,
    })
}

fn binary_ptg(op: BinaryOperator) -> u8 {
    match op {
        BinaryOperator::Add => 0x03,
        BinaryOperator::Subtract => 0x04,
        BinaryOperator::Multiply => 0x05,
        BinaryOperator::Divide => 0x06,
        BinaryOperator::Power => 0x07,
        BinaryOperator::Concat => 0x08,
        BinaryOperator::LessThan => 0x09,
        BinaryOperator::LessEqual => 0x0A,
        BinaryOperator::Equal => 0x0B,
        BinaryOperator::GreaterEqual => 0x0C,
        BinaryOperator::GreaterThan => 0x0D,
        BinaryOperator::NotEqual => 0x0E,
        BinaryOperator::Intersect => 0x0F,
        BinaryOperator::Union => 0x10,
        BinaryOperator::Range => 0x11,
    }
}

fn unary_ptg(op: UnaryOperator) -> u8 {
    match op {
        UnaryOperator::Plus => 0x12,
        UnaryOperator::Minus => 0x13,
        UnaryOperator::Percent => 0x14,
    }
}

fn error_from_code(code: u8) -> XlsResult<CellError> {
    CellError::from_code(code)
        .ok_or_else(|| XlsError::Parse(format!("unknown error code 0x{code:02X}")))
}

struct Decoder<'a> {
    rgce: &'a [u8],
    pos: usize,
    extra: &'a [u8],
    extra_pos: usize,
    mode: RgceMode,
    table: &'a ExternSheetTable,
    tokens: Vec<Token>,
}

impl Decoder<'_> {
    fn u8(&mut self) -> XlsResult<u8> {
        read_u8(self.rgce, &mut self.pos)
    }

    fn u16(&mut self) -> XlsResult<u16> {
        read_u16(self.rgce, &mut self.pos)
    }

    fn skip(&mut self, len: usize) -> XlsResult<()> {
        skip(self.rgce, &mut self.pos, len)
    }

    /// Row and column field of a reference, resolved against the mode
    fn address(&mut self, offsets: bool) -> XlsResult<CellAddress> {
        let row = self.u16()?;
        let col = self.u16()?;
        Ok(self.resolve(row, col, offsets))
    }

    fn resolve(&self, row: u16, col_field: u16, offsets: bool) -> CellAddress {
        let row_relative = col_field & ROW_RELATIVE != 0;
        let col_relative = col_field & COL_RELATIVE != 0;
        let col = col_field & COL_MASK;
        let (row, col) = match self.mode {
            RgceMode::Shared(origin) if offsets => (
                if row_relative {
                    (origin.row as u16).wrapping_add(row)
                } else {
                    row
                },
                if col_relative {
                    (origin.col as u8).wrapping_add(col as u8) as u16
                } else {
                    col
                },
            ),
            _ => (row, col),
        };
        CellAddress::with_absolute(row as u32, col, !row_relative, !col_relative)
    }

    fn area(&mut self, offsets: bool) -> XlsResult<AreaRef> {
        let row_first = self.u16()?;
        let row_last = self.u16()?;
        let col_first = self.u16()?;
        let col_last = self.u16()?;
        Ok(AreaRef::new(
            self.resolve(row_first, col_first, offsets),
            self.resolve(row_last, col_last, offsets),
        ))
    }

    fn span(&mut self) -> XlsResult<Option<SheetSpan>> {
        let ixti = self.u16()?;
        Ok(self.table.span(ixti))
    }

    fn shared(&self) -> bool {
        matches!(self.mode, RgceMode::Shared(_))
    }

    fn run(&mut self) -> XlsResult<()> {
        while self.pos < self.rgce.len() {
            let ptg = self.u8()?;
            let class = class_of(ptg);
            let base = if ptg >= 0x20 { (ptg & 0x1F) | 0x20 } else { ptg };

            let token = match base {
                PTG_EXP => {
                    return Err(XlsError::Parse("PtgExp inside a formula".into()));
                }
                PTG_TBL => {
                    return Err(XlsError::Unsupported("data table formula (PtgTbl)".into()));
                }
                0x03..=0x11 => match binary_operator(base) {
                    Some(op) => Token::Binary(op),
                    None => return Err(XlsError::Parse(format!("unknown ptg 0x{ptg:02X}"))),
                },
                0x12 => Token::Unary(UnaryOperator::Plus),
                0x13 => Token::Unary(UnaryOperator::Minus),
                0x14 => Token::Unary(UnaryOperator::Percent),
                PTG_PAREN => Token::Paren,
                PTG_MISS_ARG => Token::Missing,
                PTG_STR => Token::Text(read_short_string(self.rgce, &mut self.pos)?),
                PTG_EXTEND => {
                    return Err(XlsError::Unsupported("extended ptg (PtgExtend)".into()));
                }
                PTG_ATTR => {
                    let flags = self.u8()?;
                    let data = self.u16()?;
                    if flags & ATTR_CHOOSE != 0 {
                        self.skip((data as usize + 1) * 2)?;
                    }
                    if flags & ATTR_SUM == 0 {
                        continue;
                    }
                    Token::Function(FunctionCall {
                        index: SUM_INDEX,
                        argc: 1,
                        variable: true,
                        class: OperandClass::Value,
                    })
                }
                PTG_ERR => Token::Error(error_from_code(self.u8()?)?),
                PTG_BOOL => Token::Boolean(self.u8()? != 0),
                PTG_INT => Token::Integer(self.u16()?),
                PTG_NUM => Token::Number(read_f64(self.rgce, &mut self.pos)?),

                PTG_ARRAY => {
                    self.skip(7)?;
                    Token::Array {
                        value: self.array_constant()?,
                        class,
                    }
                }
                PTG_FUNC => {
                    let index = self.u16()?;
                    let spec = functions::by_index(index).ok_or_else(|| {
                        XlsError::Parse(format!("unknown fixed-arity function #{index}"))
                    })?;
                    Token::Function(FunctionCall {
                        index,
                        argc: spec.min_args,
                        variable: false,
                        class,
                    })
                }
                PTG_FUNC_VAR => {
                    let argc = self.u8()? & 0x7F;
                    let tab = self.u16()?;
                    if tab & FUNC_VAR_COMMAND != 0 {
                        return Err(XlsError::Unsupported("macro command call".into()));
                    }
                    Token::Function(FunctionCall {
                        index: tab,
                        argc,
                        variable: true,
                        class,
                    })
                }
                PTG_NAME => {
                    let ilbl = self.u16()?;
                    self.skip(2)?;
                    let index = ilbl
                        .checked_sub(1)
                        .ok_or_else(|| XlsError::Parse("PtgName with index 0".into()))?;
                    Token::Name {
                        id: NameId(index),
                        class,
                    }
                }
                PTG_REF => Token::Ref {
                    address: self.address(false)?,
                    class,
                },
                PTG_AREA => Token::Area {
                    area: self.area(false)?,
                    class,
                },
                PTG_REF_N => Token::Ref {
                    address: self.address(true)?,
                    class,
                },
                PTG_AREA_N => Token::Area {
                    area: self.area(true)?,
                    class,
                },
                PTG_MEM_AREA => {
                    self.skip(6)?;
                    // PtgExtraMem: rectangle list of the cached area
                    let count = read_u16(self.extra, &mut self.extra_pos)?;
                    skip(self.extra, &mut self.extra_pos, count as usize * 8)?;
                    continue;
                }
                PTG_MEM_ERR => {
                    self.skip(5)?;
                    continue;
                }
                PTG_MEM_NO_MEM => {
                    self.skip(6)?;
                    continue;
                }
                PTG_MEM_FUNC | PTG_MEM_AREA_N | PTG_MEM_NO_MEM_N => {
                    self.skip(2)?;
                    continue;
                }
                PTG_REF_ERR => {
                    self.skip(4)?;
                    Token::RefErr { class }
                }
                PTG_AREA_ERR => {
                    self.skip(8)?;
                    Token::AreaErr { class }
                }
                PTG_NAME_X => {
                    let ixti = self.u16()?;
                    let ilbl = self.u16()?;
                    self.skip(2)?;
                    let link = self.table.link(ixti).ok_or_else(|| {
                        XlsError::Unsupported(format!("external name through XTI {ixti} (add-in)"))
                    })?;
                    let index = ilbl
                        .checked_sub(1)
                        .ok_or_else(|| XlsError::Parse("PtgNameX with index 0".into()))?;
                    Token::ExternName { link, index, class }
                }
                PTG_REF_3D => {
                    let span = self.span()?;
                    let address = self.address(self.shared())?;
                    match span {
                        Some(sheets) => Token::Ref3d {
                            sheets,
                            address,
                            class,
                        },
                        None => Token::Error(CellError::Ref),
                    }
                }
                PTG_AREA_3D => {
                    let span = self.span()?;
                    let area = self.area(self.shared())?;
                    match span {
                        Some(sheets) => Token::Area3d {
                            sheets,
                            area,
                            class,
                        },
                        None => Token::Error(CellError::Ref),
                    }
                }
                PTG_REF_ERR_3D => {
                    let span = self.span()?;
                    self.skip(4)?;
                    match span {
                        Some(sheets) => Token::RefErr3d { sheets, class },
                        None => Token::Error(CellError::Ref),
                    }
                }
                PTG_AREA_ERR_3D => {
                    let span = self.span()?;
                    self.skip(8)?;
                    match span {
                        Some(sheets) => Token::AreaErr3d { sheets, class },
                        None => Token::Error(CellError::Ref),
                    }
                }
                _ => return Err(XlsError::Parse(format!("unknown ptg 0x{ptg:02X}"))),
            };
            self.tokens.push(token);
        }
        Ok(())
    }

    fn array_constant(&mut self) -> XlsResult<ArrayConstant> {
        let data = self.extra;
        let off = &mut self.extra_pos;
        let cols = read_u8(data, off)? as usize + 1;
        let rows = read_u16(data, off)? as usize + 1;

        let mut out = Vec::with_capacity(rows);
        for _ in 0..rows {
            let mut row = Vec::with_capacity(cols);
            for _ in 0..cols {
                let value = match read_u8(data, off)? {
                    ARRAY_EMPTY => {
                        skip(data, off, 8)?;
                        ArrayValue::Empty
                    }
                    ARRAY_NUMBER => ArrayValue::Number(read_f64(data, off)?),
                    ARRAY_STRING => ArrayValue::Text(read_unicode_string(data, off)?),
                    ARRAY_BOOL => {
                        let b = read_u8(data, off)?;
                        skip(data, off, 7)?;
                        ArrayValue::Boolean(b != 0)
                    }
                    ARRAY_ERROR => {
                        let code = read_u8(data, off)?;
                        skip(data, off, 7)?;
                        ArrayValue::Error(error_from_code(code)?)
                    }
                    other => {
                        return Err(XlsError::Parse(format!(
                            "unknown array constant element type 0x{other:02X}"
                        )))
                    }
                };
                row.push(value);
            }
            out.push(row);
        }
        Ok(ArrayConstant { rows: out })
    }
}

/// Encode a formula.
///
/// Names must be resolved; an [`Token::UnresolvedName`] is an error. New
/// 3-D spans and external-name links are added to `table`.
pub fn encode(
    expr: &TokenExpr,
    mode: RgceMode,
    table: &mut ExternSheetTable,
) -> XlsResult<EncodedFormula> {
    let mut out = EncodedFormula::default();
    let rgce = &mut out.rgce;
    let shared = matches!(mode, RgceMode::Shared(_));

    for token in expr {
        match token {
            Token::Number(n) => {
                put_u8(rgce, PTG_NUM);
                put_f64(rgce, *n);
            }
            Token::Integer(n) => {
                put_u8(rgce, PTG_INT);
                put_u16(rgce, *n);
            }
            Token::Text(s) => {
                put_u8(rgce, PTG_STR);
                write_short_string(rgce, s)?;
            }
            Token::Boolean(b) => {
                put_u8(rgce, PTG_BOOL);
                put_u8(rgce, *b as u8);
            }
            Token::Error(e) => {
                put_u8(rgce, PTG_ERR);
                put_u8(rgce, e.code());
            }
            Token::Missing => put_u8(rgce, PTG_MISS_ARG),
            Token::Array { value, class } => {
                put_u8(rgce, with_class(PTG_ARRAY, *class));
                rgce.extend_from_slice(&[0; 7]);
                encode_array(&mut out.extra, value)?;
            }

            Token::Unary(op) => put_u8(rgce, unary_ptg(*op)),
            Token::Binary(op) => put_u8(rgce, binary_ptg(*op)),
            Token::Paren => put_u8(rgce, PTG_PAREN),
            Token::Function(call) => {
                if call.variable {
                    put_u8(rgce, with_class(PTG_FUNC_VAR, call.class));
                    put_u8(rgce, call.argc);
                } else {
                    put_u8(rgce, with_class(PTG_FUNC, call.class));
                }
                put_u16(rgce, call.index);
            }

            Token::Ref { address, class } => {
                let base = if shared { PTG_REF_N } else { PTG_REF };
                put_u8(rgce, with_class(base, *class));
                put_address(rgce, *address, mode);
            }
            Token::Area { area, class } => {
                let base = if shared { PTG_AREA_N } else { PTG_AREA };
                put_u8(rgce, with_class(base, *class));
                put_area(rgce, area, mode);
            }
            Token::Ref3d {
                sheets,
                address,
                class,
            } => {
                put_u8(rgce, with_class(PTG_REF_3D, *class));
                put_u16(rgce, table.ixti_for(*sheets)?);
                put_address(rgce, *address, mode);
            }
            Token::Area3d {
                sheets,
                area,
                class,
            } => {
                put_u8(rgce, with_class(PTG_AREA_3D, *class));
                put_u16(rgce, table.ixti_for(*sheets)?);
                put_area(rgce, area, mode);
            }
            Token::RefErr { class } => {
                put_u8(rgce, with_class(PTG_REF_ERR, *class));
                rgce.extend_from_slice(&[0; 4]);
            }
            Token::AreaErr { class } => {
                put_u8(rgce, with_class(PTG_AREA_ERR, *class));
                rgce.extend_from_slice(&[0; 8]);
            }
            Token::RefErr3d { sheets, class } => {
                put_u8(rgce, with_class(PTG_REF_ERR_3D, *class));
                put_u16(rgce, table.ixti_for(*sheets)?);
                rgce.extend_from_slice(&[0; 4]);
            }
            Token::AreaErr3d { sheets, class } => {
                put_u8(rgce, with_class(PTG_AREA_ERR_3D, *class));
                put_u16(rgce, table.ixti_for(*sheets)?);
                rgce.extend_from_slice(&[0; 8]);
            }

            Token::Name { id, class } => {
                put_u8(rgce, with_class(PTG_NAME, *class));
                put_u16(rgce, id.0 + 1);
                put_u16(rgce, 0);
            }
            Token::UnresolvedName { name, .. } => {
                return Err(XlsError::Unsupported(format!(
                    "name '{name}' is not defined"
                )));
            }
            Token::ExternName { link, index, class } => {
                put_u8(rgce, with_class(PTG_NAME_X, *class));
                put_u16(rgce, table.ixti_for_names(*link)?);
                put_u16(rgce, index + 1);
                put_u16(rgce, 0);
            }
        }
    }

    if out.rgce.len() > u16::MAX as usize {
        return Err(XlsError::Unsupported("formula too long for BIFF8".into()));
    }
    Ok(out)
}

fn column_field(address: CellAddress, col: u16) -> u16 {
    let mut field = col & COL_MASK;
    if !address.col_absolute {
        field |= COL_RELATIVE;
    }
    if !address.row_absolute {
        field |= ROW_RELATIVE;
    }
    field
}

/// Row and column field, as offsets from the origin in shared mode
fn stored_position(address: CellAddress, mode: RgceMode) -> (u16, u16) {
    match mode {
        RgceMode::Shared(origin) => {
            let row = if address.row_absolute {
                address.row as u16
            } else {
                (address.row as u16).wrapping_sub(origin.row as u16)
            };
            let col = if address.col_absolute {
                address.col
            } else {
                (address.col as u8).wrapping_sub(origin.col as u8) as u16
            };
            (row, column_field(address, col))
        }
        RgceMode::Standard => (address.row as u16, column_field(address, address.col)),
    }
}

fn put_address(out: &mut Vec<u8>, address: CellAddress, mode: RgceMode) {
    let (row, col) = stored_position(address, mode);
    put_u16(out, row);
    put_u16(out, col);
}

fn put_area(out: &mut Vec<u8>, area: &AreaRef, mode: RgceMode) {
    let (row_first, col_first) = stored_position(area.first, mode);
    let (row_last, col_last) = stored_position(area.last, mode);
    put_u16(out, row_first);
    put_u16(out, row_last);
    put_u16(out, col_first);
    put_u16(out, col_last);
}

fn encode_array(out: &mut Vec<u8>, value: &ArrayConstant) -> XlsResult<()> {
    let cols = value.col_count();
    let rows = value.row_count();
    if cols == 0 || cols > 256 || rows == 0 || rows > 65536 {
        return Err(XlsError::Unsupported(format!(
            "array constant of {rows}x{cols} does not fit BIFF8"
        )));
    }
    put_u8(out, (cols - 1) as u8);
    put_u16(out, (rows - 1) as u16);
    for row in &value.rows {
        for item in row {
            match item {
                ArrayValue::Empty => {
                    put_u8(out, ARRAY_EMPTY);
                    out.extend_from_slice(&[0; 8]);
                }
                ArrayValue::Number(n) => {
                    put_u8(out, ARRAY_NUMBER);
                    put_f64(out, *n);
                }
                ArrayValue::Text(s) => {
                    put_u8(out, ARRAY_STRING);
                    write_unicode_string(out, s)?;
                }
                ArrayValue::Boolean(b) => {
                    put_u8(out, ARRAY_BOOL);
                    put_u8(out, *b as u8);
                    out.extend_from_slice(&[0; 7]);
                }
                ArrayValue::Error(e) => {
                    put_u8(out, ARRAY_ERROR);
                    put_u8(out, e.code());
                    out.extend_from_slice(&[0; 7]);
                }
            }
        }
    }
    Ok(())
}

/// Links referenced by a formula, for deciding which SUPBOOKs are needed
pub fn links_used(expr: &TokenExpr) -> impl Iterator<Item = LinkId> + '_ {
    expr.iter().filter_map(|t| match t {
        Token::ExternName { link, .. } => Some(*link),
        other => match other.sheet_span().map(|s| s.book) {
            Some(biffbook_formula::BookRef::External(link)) => Some(link),
            _ => None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use biffbook_formula::{parse_formula, parse_formula_as, FormulaType, SheetList};
    use pretty_assertions::assert_eq;

    fn context() -> SheetList {
        let mut ctx = SheetList::new(["Sheet1", "Data", "s3"]);
        ctx.references
            .define_name("Rate", biffbook_formula::NameScope::Workbook, TokenExpr::new(vec![Token::Integer(5)]))
            .unwrap();
        let link = ctx.references.link_external_workbook("Book2.xls", &["Prices"]);
        ctx.references.add_external_name(link, "Tax").unwrap();
        ctx
    }

    fn round_trip(expr: &TokenExpr, mode: RgceMode, links: usize) -> TokenExpr {
        let mut table = ExternSheetTable::for_links(links);
        let encoded = encode(expr, mode, &mut table).unwrap();
        decode_tokens(&encoded.rgce, &encoded.extra, mode, &table).unwrap()
    }

    #[test]
    fn test_round_trip_standard_formulas() {
        let ctx = context();
        for text in [
            "A1*2",
            "SUM($A$1:B10)/COUNT(A1:A$10)",
            "IF(A1>=0,\"pos\",\"neg\")",
            "-(1+2.5)^2%",
            "SUM(s3!B2:C3)+Data!$A$1",
            "SUM(Sheet1:s3!A1)",
            "{1,2;\"a\",TRUE}",
            "IF(A1,,#N/A)",
            "Rate*[Book2.xls]Prices!A1",
            "[Book2.xls]!Tax",
            "SUM((A1,B2:C3))",
            "Data!#REF!+#REF!",
        ] {
            let expr = parse_formula(text, &ctx, 0).unwrap();
            assert_eq!(round_trip(&expr, RgceMode::Standard, 1), expr, "{text}");
        }
    }

    #[test]
    fn test_shared_mode_uses_offsets() {
        let ctx = context();
        let anchor = CellAddress::new(1, 1);
        let expr = parse_formula_as("A2*2+$A$1", &ctx, 0, FormulaType::Shared).unwrap();
        let mut table = ExternSheetTable::for_links(0);
        let encoded = encode(&expr, RgceMode::Shared(anchor), &mut table).unwrap();

        // PtgRefN with row offset 0 and column offset -1 (0xFF), both relative
        assert_eq!(encoded.rgce[0] & 0x1F, PTG_REF_N & 0x1F);
        assert_eq!(&encoded.rgce[1..5], &[0x00, 0x00, 0xFF, 0xC0]);

        let decoded = decode_tokens(&encoded.rgce, &encoded.extra, RgceMode::Shared(anchor), &table).unwrap();
        assert_eq!(decoded, expr);

        // The same bytes read from B12 point at A12
        let at_b12 = decode_tokens(
            &encoded.rgce,
            &encoded.extra,
            RgceMode::Shared(CellAddress::new(11, 1)),
            &table,
        )
        .unwrap();
        assert_eq!(at_b12, expr.rebase(anchor, CellAddress::new(11, 1)));
    }

    #[test]
    fn test_exp_body() {
        let table = ExternSheetTable::default();
        let rgce = exp_rgce(CellAddress::new(1, 1));
        assert_eq!(
            decode(&rgce, &[], RgceMode::Standard, &table).unwrap(),
            RgceBody::Exp(CellAddress::new(1, 1))
        );
    }

    #[test]
    fn test_attr_sum_and_skipped_attributes() {
        let table = ExternSheetTable::default();
        // A1:A3, attr-space, attr-sum
        let rgce = [
            0x25, 0, 0, 2, 0, 0, 0xC0, 0, 0xC0, // PtgArea A1:A3
            0x19, 0x40, 0x00, 0x01, // space
            0x19, 0x10, 0x00, 0x00, // sum
        ];
        let expr = decode_tokens(&rgce, &[], RgceMode::Standard, &table).unwrap();
        assert_eq!(
            expr.tokens()[1],
            Token::Function(FunctionCall {
                index: SUM_INDEX,
                argc: 1,
                variable: true,
                class: OperandClass::Value
            })
        );
        assert_eq!(expr.len(), 2);
    }

    #[test]
    fn test_choose_jump_table_is_skipped() {
        let table = ExternSheetTable::default();
        let rgce = [
            0x1E, 1, 0, // 1
            0x19, 0x04, 0x02, 0x00, 6, 0, 10, 0, 14, 0, // attr choose, 2 options
            0x1E, 2, 0, 0x1E, 3, 0, // 2, 3
            0x42, 3, 100, 0, // CHOOSE(…) argc 3
        ];
        let expr = decode_tokens(&rgce, &[], RgceMode::Standard, &table).unwrap();
        assert_eq!(expr.len(), 4);
    }

    #[test]
    fn test_mem_area_consumes_extra_data() {
        let table = ExternSheetTable::default();
        // PtgMemArea over A1:A2, then the area itself, an array constant and +
        let mut rgce = vec![0x26, 0, 0, 0, 0, 9, 0];
        rgce.extend_from_slice(&[0x25, 0, 0, 1, 0, 0, 0xC0, 0, 0xC0]);
        rgce.push(0x60);
        rgce.extend_from_slice(&[0; 7]);
        rgce.push(0x03);

        let mut extra = vec![1, 0];
        extra.extend_from_slice(&[0; 8]);
        extra.extend_from_slice(&[0, 0, 0, ARRAY_NUMBER]);
        extra.extend_from_slice(&4.0f64.to_le_bytes());

        let expr = decode_tokens(&rgce, &extra, RgceMode::Standard, &table).unwrap();
        assert_eq!(expr.len(), 3);
        assert_eq!(
            expr.tokens()[1],
            Token::Array {
                value: ArrayConstant {
                    rows: vec![vec![ArrayValue::Number(4.0)]]
                },
                class: OperandClass::Array,
            }
        );
    }

    #[test]
    fn test_data_table_is_unsupported() {
        let table = ExternSheetTable::default();
        let rgce = [0x02, 0, 0, 0, 0];
        assert!(matches!(
            decode(&rgce, &[], RgceMode::Standard, &table),
            Err(XlsError::Unsupported(_))
        ));
    }

    #[test]
    fn test_deleted_sheet_reference_decodes_as_ref_error() {
        use super::super::links::{SupBookTarget, Xti};
        let table = ExternSheetTable::new(
            vec![SupBookTarget::Internal],
            vec![Xti {
                supbook: 0,
                first: -1,
                last: -1,
            }],
        );
        let rgce = [0x5A, 0, 0, 0, 0, 0, 0xC0];
        let expr = decode_tokens(&rgce, &[], RgceMode::Standard, &table).unwrap();
        assert_eq!(expr.tokens(), &[Token::Error(CellError::Ref)]);
    }

    #[test]
    fn test_unresolved_name_cannot_be_encoded() {
        let expr = TokenExpr::new(vec![Token::UnresolvedName {
            name: "Later".into(),
            class: OperandClass::Value,
        }]);
        let mut table = ExternSheetTable::default();
        assert!(encode(&expr, RgceMode::Standard, &mut table).is_err());
    }
}
