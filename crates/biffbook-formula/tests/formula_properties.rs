//! Property tests for parsing, rendering and rebasing formulas

use biffbook_core::CellAddress;
use biffbook_formula::{
    parse_formula, render_formula, NameScope, SheetList, Token, TokenExpr,
};
use proptest::prelude::*;

fn config() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

fn context() -> SheetList {
    let mut ctx = SheetList::new(["Sheet1", "Data Sheet", "Q3"]);
    ctx.references
        .define_name(
            "Rate",
            NameScope::Workbook,
            TokenExpr::new(vec![Token::Integer(5)]),
        )
        .expect("valid name");
    ctx.references.link_external_workbook("Book2.xls", &["Prices"]);
    ctx
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

fn arb_cell() -> impl Strategy<Value = String> {
    r"\$?[A-H]\$?[1-9][0-9]{0,3}"
}

fn arb_operand() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => arb_cell(),
        1 => (arb_cell(), arb_cell()).prop_map(|(a, b)| format!("{}:{}", a, b)),
        1 => arb_cell().prop_map(|c| format!("'Data Sheet'!{}", c)),
        1 => arb_cell().prop_map(|c| format!("Sheet1:Q3!{}", c)),
        1 => arb_cell().prop_map(|c| format!("[Book2.xls]Prices!{}", c)),
        2 => (0u32..100_000).prop_map(|n| n.to_string()),
        1 => (0u32..1000, 1u32..100).prop_map(|(a, b)| format!("{}.{}", a, b)),
        1 => r#"[a-z ]{0,6}"#.prop_map(|s| format!("\"{}\"", s)),
        1 => Just("TRUE".to_string()),
        1 => Just("#N/A".to_string()),
        1 => Just("Rate".to_string()),
    ]
}

fn arb_formula() -> impl Strategy<Value = String> {
    arb_operand().prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            (inner.clone(), prop::sample::select(vec!["+", "-", "*", "/", "^", "&", "=", "<>", "<="]), inner.clone())
                .prop_map(|(a, op, b)| format!("{}{}{}", a, op, b)),
            inner.clone().prop_map(|a| format!("({})", a)),
            inner.clone().prop_map(|a| format!("-{}", a)),
            inner.clone().prop_map(|a| format!("{}%", a)),
            prop::collection::vec(inner.clone(), 1..4)
                .prop_map(|args| format!("SUM({})", args.join(","))),
            (inner.clone(), inner.clone(), inner)
                .prop_map(|(a, b, c)| format!("IF({},{},{})", a, b, c)),
        ]
    })
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config())]

    /// Rendering a parsed formula and parsing it again gives the same tokens
    #[test]
    fn render_then_parse_is_stable(text in arb_formula()) {
        let ctx = context();
        let parsed = parse_formula(&text, &ctx, 0).expect("generated formula parses");
        let rendered = render_formula(&parsed, &ctx, 0).expect("renders");
        let reparsed = parse_formula(&rendered, &ctx, 0).expect("rendered formula parses");
        prop_assert_eq!(&reparsed, &parsed);
        prop_assert_eq!(render_formula(&reparsed, &ctx, 0).expect("renders"), rendered);
    }

    /// Moving a formula in two steps ends where moving it in one step does
    #[test]
    fn rebase_is_additive(
        text in arb_formula(),
        a in (0u32..2000, 0u16..40),
        b in (0u32..2000, 0u16..40),
        c in (0u32..2000, 0u16..40),
    ) {
        let ctx = context();
        let expr = parse_formula(&text, &ctx, 0).expect("generated formula parses");
        let (a, b, c) = (
            CellAddress::new(a.0, a.1),
            CellAddress::new(b.0, b.1),
            CellAddress::new(c.0, c.1),
        );

        let mid = expr.rebase(a, b);
        prop_assume!(!mid.contains_deleted_reference());
        prop_assert_eq!(mid.rebase(b, c), expr.rebase(a, c));
    }

    /// Rebasing back and forth restores the formula when nothing broke
    #[test]
    fn rebase_round_trip(
        text in arb_formula(),
        rows in -500i64..500,
        cols in -10i64..10,
    ) {
        let ctx = context();
        let expr = parse_formula(&text, &ctx, 0).expect("generated formula parses");
        let origin = CellAddress::new(1000, 100);
        let target = CellAddress::new((1000 + rows) as u32, (100 + cols) as u16);

        let moved = expr.rebase(origin, target);
        prop_assume!(!moved.contains_deleted_reference());
        prop_assert_eq!(moved.rebase(target, origin), expr);
    }
}
