//! Defined names and external workbook links

use biffbook::prelude::*;
use biffbook::{FormulaError, Token};
use pretty_assertions::assert_eq;

fn name_ids(wb: &Workbook, sheet: usize, address: &str) -> Vec<NameId> {
    let addr = CellAddress::parse(address).unwrap();
    wb.sheet(sheet)
        .unwrap()
        .formula_at(addr.row, addr.col)
        .unwrap()
        .iter()
        .filter_map(|t| match t {
            Token::Name { id, .. } => Some(*id),
            _ => None,
        })
        .collect()
}

#[test]
fn test_sheet_scoped_name_shadows_workbook_name() {
    let mut wb = Workbook::new();
    wb.add_sheet("S").unwrap();
    wb.add_sheet("T").unwrap();
    let global = wb.define_name("X", NameScope::Workbook, "=Sheet1!$A$1").unwrap();
    let local = wb.define_name("X", NameScope::Sheet(1), "=S!$B$2").unwrap();

    wb.set_cell_formula(1, "A1", "=X*2").unwrap();
    wb.set_cell_formula(2, "A1", "=X*2").unwrap();

    assert_eq!(name_ids(&wb, 1, "A1"), vec![local]);
    assert_eq!(name_ids(&wb, 2, "A1"), vec![global]);
    assert_eq!(wb.resolve_name("x", 1), Some(local));
    assert_eq!(wb.resolve_name("x", 0), Some(global));
}

#[test]
fn test_workbook_name_sees_only_workbook_names() {
    let mut wb = Workbook::new();
    wb.add_sheet("S").unwrap();
    let global = wb.define_name("Rate", NameScope::Workbook, "0.2").unwrap();
    let local = wb.define_name("Rate", NameScope::Sheet(0), "0.3").unwrap();
    let total = wb.define_name("Total", NameScope::Workbook, "=Rate*100").unwrap();

    let ids: Vec<NameId> = wb
        .references()
        .name(total)
        .unwrap()
        .formula
        .iter()
        .filter_map(|t| match t {
            Token::Name { id, .. } => Some(*id),
            _ => None,
        })
        .collect();
    assert_eq!(ids, vec![global]);
    assert_eq!(wb.resolve_name("Rate", 0), Some(local));
    assert_eq!(wb.name_formula(total).unwrap().as_deref(), Some("Rate*100"));

    // a sheet name used from a workbook name carries its sheet prefix
    let scaled = wb.define_name("Scaled", NameScope::Workbook, "=Sheet1!Rate*2").unwrap();
    assert_eq!(wb.name_formula(scaled).unwrap().as_deref(), Some("Sheet1!Rate*2"));
}

#[test]
fn test_duplicate_name_in_same_scope() {
    let mut wb = Workbook::new();
    wb.define_name("Rate", NameScope::Workbook, "0.2").unwrap();
    assert!(matches!(
        wb.define_name("RATE", NameScope::Workbook, "0.3"),
        Err(Error::Formula(FormulaError::DuplicateName(_)))
    ));
    // another scope is fine
    wb.define_name("Rate", NameScope::Sheet(0), "0.3").unwrap();
}

#[test]
fn test_deleted_name_keeps_its_slot() {
    let mut wb = Workbook::new();
    let first = wb.define_name("First", NameScope::Workbook, "=Sheet1!$A$1").unwrap();
    let second = wb.define_name("Second", NameScope::Workbook, "=Sheet1!$B$1").unwrap();
    wb.set_cell_formula(0, "C1", "=First+Second").unwrap();

    wb.delete_name(first).unwrap();
    assert_eq!(wb.name_formula(first).unwrap(), None);
    assert_eq!(
        wb.name_formula(second).unwrap().as_deref(),
        Some("Sheet1!$B$1")
    );
    assert_eq!(wb.references().name_count(), 2);

    // the deleted name is a broken reference, not an error
    let located = wb.locate_operands(0, "C1").unwrap();
    assert_eq!(
        located,
        vec![
            LocatedOperand::Broken,
            LocatedOperand::Cells {
                sheet: 0,
                range: CellRange::parse("B1").unwrap()
            },
        ]
    );

    // the name text is free again
    wb.define_name("First", NameScope::Workbook, "1").unwrap();
}

#[test]
fn test_locate_three_d_area() {
    let mut wb = Workbook::new();
    wb.rename_sheet(0, "S1").unwrap();
    wb.add_sheet("S2").unwrap();
    let s3 = wb.add_sheet("S3").unwrap();
    {
        let sheet = wb.sheet_mut(s3).unwrap();
        sheet.set_cell_value("B2", 311.0).unwrap();
        sheet.set_cell_value("B3", 321.0).unwrap();
        sheet.set_cell_value("C2", 312.0).unwrap();
        sheet.set_cell_value("C3", 322.0).unwrap();
    }
    wb.set_cell_formula(1, "E4", "SUM(s3!B2:C3)").unwrap();
    // S3 reads as a cell address, so the sheet name is quoted
    let text = wb.cell_formula(1, "E4").unwrap();
    assert_eq!(text.as_deref(), Some("SUM('S3'!B2:C3)"));
    wb.set_cell_formula(1, "E5", "SUM('S3'!B2:C3)").unwrap();
    let sheet = wb.sheet(1).unwrap();
    assert_eq!(sheet.formula_at(3, 4), sheet.formula_at(4, 4));

    let located = wb.locate_operands(1, "E4").unwrap();
    let range = CellRange::parse("B2:C3").unwrap();
    assert_eq!(located, vec![LocatedOperand::Cells { sheet: s3, range }]);

    let source = wb.sheet(s3).unwrap();
    let total: f64 = range
        .cells()
        .map(|c| source.get_value_at(c.row, c.col).as_number().unwrap())
        .sum();
    assert_eq!(total, 1266.0);
}

#[test]
fn test_locate_follows_names() {
    let mut wb = Workbook::new();
    wb.add_sheet("Data").unwrap();
    wb.define_name("Inner", NameScope::Workbook, "=Data!$A$1:$A$3").unwrap();
    wb.define_name("Outer", NameScope::Workbook, "=Inner").unwrap();
    wb.set_cell_formula(0, "A1", "=SUM(Outer)+Missing").unwrap();

    assert_eq!(
        wb.locate_operands(0, "A1").unwrap(),
        vec![
            LocatedOperand::Cells {
                sheet: 1,
                range: CellRange::parse("A1:A3").unwrap()
            },
            LocatedOperand::Broken,
        ]
    );
    assert!(matches!(
        wb.locate_operands(0, "B1"),
        Err(Error::NotAFormula(_))
    ));
}

#[test]
fn test_retarget_external_workbook() {
    let mut wb = Workbook::new();
    wb.link_external_workbook("Book2.xls", &["Prices", "Costs"]);
    wb.link_external_workbook("Unused.xls", &["Sheet1"]);
    wb.set_cell_formula(0, "A1", "=[Book2.xls]Prices!B1*2").unwrap();
    let name = wb
        .define_name("Cost", NameScope::Workbook, "=[Book2.xls]Costs!$A$1")
        .unwrap();

    assert!(!wb.change_external_workbook_target("Unused.xls", "Other.xls"));
    assert!(!wb.change_external_workbook_target("Nowhere.xls", "Other.xls"));

    assert!(wb.change_external_workbook_target("Book2.xls", "Book3.xls"));
    assert_eq!(
        wb.cell_formula(0, "A1").unwrap().as_deref(),
        Some("[Book3.xls]Prices!B1*2")
    );
    assert_eq!(
        wb.name_formula(name).unwrap().as_deref(),
        Some("[Book3.xls]Costs!$A$1")
    );
    // nothing refers to the old identifier any more
    assert!(!wb.change_external_workbook_target("Book2.xls", "Book4.xls"));
}

#[test]
fn test_retarget_onto_existing_link_merges_sheets() {
    let mut wb = Workbook::new();
    wb.link_external_workbook("Old.xls", &["Prices", "Costs"]);
    wb.link_external_workbook("New.xls", &["Costs"]);
    wb.set_cell_formula(0, "A1", "=[Old.xls]Prices!B1+[Old.xls]Costs!C1").unwrap();

    assert!(wb.change_external_workbook_target("Old.xls", "New.xls"));
    assert_eq!(
        wb.cell_formula(0, "A1").unwrap().as_deref(),
        Some("[New.xls]Prices!B1+[New.xls]Costs!C1")
    );
    let located = wb.locate_operands(0, "A1").unwrap();
    let new = wb.references().find_link("New.xls").unwrap();
    assert_eq!(
        located,
        vec![
            LocatedOperand::External {
                link: new,
                sheet: 1,
                range: CellRange::parse("B1").unwrap()
            },
            LocatedOperand::External {
                link: new,
                sheet: 0,
                range: CellRange::parse("C1").unwrap()
            },
        ]
    );
}

#[test]
fn test_merge_refused_when_span_would_widen() {
    let mut wb = Workbook::new();
    wb.link_external_workbook("Old.xls", &["A", "B", "C"]);
    wb.link_external_workbook("New.xls", &["B", "Z", "A"]);
    wb.set_cell_formula(0, "A1", "SUM([Old.xls]A:B!X1)").unwrap();

    // A:B would become B:A on New.xls and take in Z
    assert!(!wb.change_external_workbook_target("Old.xls", "New.xls"));
    assert_eq!(
        wb.cell_formula(0, "A1").unwrap().as_deref(),
        Some("SUM([Old.xls]A:B!X1)")
    );
    assert_eq!(wb.locate_operands(0, "A1").unwrap().len(), 2);
    let new = wb.references().find_link("New.xls").unwrap();
    assert_eq!(
        wb.references().link(new).unwrap().sheet_names,
        vec!["B".to_string(), "Z".to_string(), "A".to_string()]
    );
}

#[test]
fn test_merge_keeps_span_that_stays_in_order() {
    let mut wb = Workbook::new();
    wb.link_external_workbook("Old.xls", &["A", "B", "C"]);
    wb.link_external_workbook("New.xls", &["Z", "A", "B"]);
    wb.set_cell_formula(0, "A1", "SUM([Old.xls]A:B!X1)+[Old.xls]C!X1").unwrap();

    assert!(wb.change_external_workbook_target("Old.xls", "New.xls"));
    assert_eq!(
        wb.cell_formula(0, "A1").unwrap().as_deref(),
        Some("SUM([New.xls]A:B!X1)+[New.xls]C!X1")
    );
    // C was appended to New.xls
    let new = wb.references().find_link("New.xls").unwrap();
    assert_eq!(wb.references().link(new).unwrap().sheet_name(3), Some("C"));
    assert_eq!(wb.locate_operands(0, "A1").unwrap().len(), 3);
}
