//! Record streams written to a real OLE2 file and read back.

use std::io::Cursor;

use biffbook_core::{CellAddress, CellRange};
use biffbook_formula::{parse_formula_as, render_formula, FormulaType, SheetList};
use biffbook_xls::biff::cells::{BofRecord, BoundSheetRecord, DimensionRecord};
use biffbook_xls::biff::conformance::verify_substream;
use biffbook_xls::biff::formula::{
    CachedResult, FormulaRecord, FormulaRecordAggregate, GroupRecord, SharedFormulaRecord,
};
use biffbook_xls::biff::links::ExternSheetTable;
use biffbook_xls::biff::records;
use biffbook_xls::biff::rgce::{self, RgceBody, RgceMode};
use biffbook_xls::biff::BiffRecord;
use biffbook_xls::{read_all_records, read_workbook_stream, split_substreams, write_records, XlsError};
use pretty_assertions::assert_eq;

fn eof() -> BiffRecord {
    BiffRecord::new(records::EOF, Vec::new())
}

/// B2:B4 = A2*2 as one shared formula, B2 with a text result
fn sheet_records(ctx: &SheetList) -> Vec<BiffRecord> {
    let anchor = CellAddress::new(1, 1);
    let expr = parse_formula_as("A2*2", ctx, 0, FormulaType::Shared).unwrap();
    let mut table = ExternSheetTable::for_links(0);
    let encoded = rgce::encode(&expr, RgceMode::Shared(anchor), &mut table).unwrap();

    let mut out = vec![
        BofRecord::new(records::BOF_WORKSHEET).to_record(),
        DimensionRecord::from_range(Some(CellRange::from_indices(1, 1, 3, 1))).to_record(),
    ];
    for row in 1..=3u16 {
        let mut aggregate = FormulaRecordAggregate::new(FormulaRecord {
            row,
            col: 1,
            xf: 15,
            result: CachedResult::Number(0.0),
            flags: biffbook_xls::biff::formula::FLAG_SHARED,
            rgce: rgce::exp_rgce(anchor),
            extra: Vec::new(),
        });
        if row == 1 {
            aggregate.group = Some(GroupRecord::Shared(SharedFormulaRecord {
                range: CellRange::from_indices(1, 1, 3, 1),
                uses: 3,
                rgce: encoded.rgce.clone(),
                extra: encoded.extra.clone(),
            }));
            aggregate.set_cached_result(CachedResult::Text("x".repeat(10_000)));
        }
        out.extend(aggregate.to_records().unwrap());
    }
    out.push(eof());
    out
}

fn workbook_stream(ctx: &SheetList) -> Vec<u8> {
    let globals = vec![
        BofRecord::new(records::BOF_WORKBOOK_GLOBALS).to_record(),
        BoundSheetRecord {
            position: 0,
            visibility: 0,
            kind: 0,
            name: "Sheet1".into(),
        }
        .to_record()
        .unwrap(),
        eof(),
    ];
    let mut stream = Vec::new();
    write_records(&mut stream, &globals).unwrap();
    write_records(&mut stream, &sheet_records(ctx)).unwrap();
    stream
}

#[test]
fn test_shared_formula_through_a_file() {
    let ctx = SheetList::new(["Sheet1"]);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.xls");
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .unwrap();
    biffbook_xls::write_workbook_stream(file, &workbook_stream(&ctx)).unwrap();

    let data = read_workbook_stream(std::fs::File::open(&path).unwrap()).unwrap();
    let streams = split_substreams(read_all_records(&mut Cursor::new(data)).unwrap()).unwrap();
    assert_eq!(streams.len(), 2);
    for stream in &streams {
        verify_substream(stream).unwrap();
    }

    let sheet = streams[1].body();
    let first = sheet
        .iter()
        .position(|r| r.record_type == records::FORMULA)
        .unwrap();
    let (anchor, used) = FormulaRecordAggregate::read(sheet, first).unwrap();
    assert_eq!(used, 3);
    assert_eq!(anchor.cached_result(), &CachedResult::Text("x".repeat(10_000)));

    let Some(GroupRecord::Shared(shared)) = &anchor.group else {
        panic!("anchor should carry the SHRFMLA record");
    };
    let table = ExternSheetTable::for_links(0);
    let (member, _) = FormulaRecordAggregate::read(sheet, first + used + 1).unwrap();
    assert_eq!(
        rgce::decode(&member.formula.rgce, &[], RgceMode::Standard, &table).unwrap(),
        RgceBody::Exp(CellAddress::new(1, 1))
    );

    // The member at B4 sees the shared tokens as A4*2
    let at_b4 = rgce::decode_tokens(
        &shared.rgce,
        &shared.extra,
        RgceMode::Shared(CellAddress::new(3, 1)),
        &table,
    )
    .unwrap();
    assert_eq!(render_formula(&at_b4, &ctx, 0).unwrap(), "A4*2");
}

#[test]
fn test_string_without_formula_is_rejected() {
    let body = vec![
        BofRecord::new(records::BOF_WORKSHEET).to_record(),
        DimensionRecord::default().to_record(),
        BiffRecord::new(records::STRING, vec![1, 0, 0, b'a']),
        eof(),
    ];
    let mut stream = Vec::new();
    write_records(&mut stream, &body).unwrap();
    let streams = split_substreams(read_all_records(&mut Cursor::new(stream)).unwrap()).unwrap();
    assert!(matches!(
        verify_substream(&streams[0]),
        Err(XlsError::Malformed {
            record_type: records::STRING,
            ..
        })
    ));
}
