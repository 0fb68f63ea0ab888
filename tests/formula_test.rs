use checksheet::error::FormulaError;
use checksheet::formula::{FieldInfo, MAX_DECIMAL_PLACES, Reference, evaluate, format_number, formula_references};
use std::collections::HashMap;

fn values(pairs: &[(u32, f64)]) -> HashMap<Reference, f64> {
    pairs
        .iter()
        .map(|(field, v)| (Reference::new(1, *field), *v))
        .collect()
}

#[test]
fn test_sum_over_range() {
    let vals = values(&[(1, 2.0), (2, 3.0), (3, 4.0)]);
    assert_eq!(evaluate("SUM(S1F1:S1F3)", &vals, &[], 0), Ok("9".to_string()));
    assert_eq!(evaluate("sum( S1F1 : S1F3 )", &vals, &[], 0), Ok("9".to_string()));
}

#[test]
fn test_aggregates_mix_arguments() {
    let vals = values(&[(1, 2.0), (2, 8.0), (4, 5.0)]);
    assert_eq!(evaluate("MAX(S1F1:S1F2,10)", &vals, &[], 0), Ok("10".to_string()));
    assert_eq!(evaluate("MIN(S1F1,S1F4)", &vals, &[], 0), Ok("2".to_string()));
    assert_eq!(evaluate("AVERAGE(S1F1,S1F2)", &vals, &[], 1), Ok("5.0".to_string()));
}

#[test]
fn test_backwards_range_is_empty() {
    let vals = values(&[(1, 2.0)]);
    assert_eq!(evaluate("AVERAGE(S1F1:S1F0)", &vals, &[], 0), Ok("0".to_string()));
}

#[test]
fn test_cross_sheet_range_is_an_error() {
    let vals = values(&[(1, 2.0)]);
    let result = evaluate("SUM(S1F1:S2F3)", &vals, &[], 0);
    assert!(
        matches!(result, Err(FormulaError::CrossSheetRange(_))),
        "Cross-sheet range must not evaluate, got {:?}",
        result
    );
}

#[test]
fn test_decimal_formatting() {
    let vals = values(&[(1, 7.0)]);
    assert_eq!(evaluate("S1F1", &vals, &[], 2), Ok("7.00".to_string()));
    assert_eq!(evaluate("S1F1", &vals, &[], 0), Ok("7".to_string()));
    assert_eq!(format_number(2.5, 0), "3");
    assert_eq!(format_number(-0.2, 0), "0");
    assert_eq!(format_number(1.005, 1), "1.0");
}

#[test]
fn test_arithmetic_with_negative_references() {
    let vals = values(&[(1, -4.0), (2, 2.0)]);
    assert_eq!(evaluate("S1F1*S1F2", &vals, &[], 0), Ok("-8".to_string()));
    assert_eq!(evaluate("(S1F1+10)/S1F2", &vals, &[], 1), Ok("3.0".to_string()));
    assert_eq!(evaluate("S1F2-S1F1", &vals, &[], 0), Ok("6".to_string()));
}

#[test]
fn test_range_inside_arithmetic() {
    let vals = values(&[(1, 1.0), (2, 2.0), (3, 3.0)]);
    assert_eq!(evaluate("S1F1:S1F3*2", &vals, &[], 0), Ok("12".to_string()));
}

#[test]
fn test_zero_falls_back_to_last_known_value() {
    let vals = values(&[(1, 0.0), (2, 3.0)]);
    let fields = vec![
        FieldInfo {
            reference: Reference::new(1, 1),
            value: Some("4".to_string()),
        },
        FieldInfo {
            reference: Reference::new(1, 2),
            value: Some("100".to_string()),
        },
    ];
    // S1F1 is zero so the last-known value is used; S1F2 is live.
    assert_eq!(evaluate("S1F1+S1F2", &vals, &fields, 0), Ok("7".to_string()));

    // A genuine zero with nothing to fall back on stays zero.
    assert_eq!(evaluate("S1F1+S1F2", &vals, &[], 0), Ok("3".to_string()));
}

#[test]
fn test_unknown_reference_is_zero() {
    assert_eq!(evaluate("S1F9+1", &HashMap::new(), &[], 0), Ok("1".to_string()));
}

#[test]
fn test_disallowed_characters_are_stripped() {
    let vals = values(&[(1, 3.0)]);
    assert_eq!(evaluate("S1F1+abc2", &vals, &[], 0), Ok("5".to_string()));
}

#[test]
fn test_errors() {
    let empty = HashMap::new();
    assert_eq!(evaluate("   ", &empty, &[], 0), Err(FormulaError::Empty));
    assert_eq!(evaluate("1/0", &empty, &[], 0), Err(FormulaError::DivisionByZero));
    assert_eq!(evaluate("(1+2", &empty, &[], 0), Err(FormulaError::UnexpectedEnd));
}

#[test]
fn test_formula_references_expand_ranges() {
    let refs: Vec<Reference> = formula_references("S1F5 + SUM(S1F1:S1F3)").into_iter().collect();
    assert_eq!(
        refs,
        vec![
            Reference::new(1, 1),
            Reference::new(1, 2),
            Reference::new(1, 3),
            Reference::new(1, 5)
        ]
    );
}

#[test]
fn test_format_number_caps_precision() {
    let formatted = format_number(1.5, 4_000_000_000);
    let decimals = formatted.split('.').nth(1).unwrap();
    assert_eq!(decimals.len(), MAX_DECIMAL_PLACES as usize);
    assert!(formatted.starts_with("1.5"));
}
