//! Property tests for condition-operator coercion rules.

use botflow::condition::ConditionOp;
use proptest::prelude::*;

proptest! {
    /// Numeric gt/lt agree with plain float comparison for any pair of
    /// values that actually parse.
    #[test]
    fn gt_lt_match_float_semantics(a in -1.0e6f64..1.0e6, b in -1.0e6f64..1.0e6) {
        let sa = a.to_string();
        let sb = b.to_string();
        prop_assert_eq!(ConditionOp::Gt.evaluate(Some(&sa), &sb), a > b);
        prop_assert_eq!(ConditionOp::Lt.evaluate(Some(&sa), &sb), a < b);
    }

    /// A non-numeric side fails the gate, whichever side it is on; no
    /// lexicographic fallback.
    #[test]
    fn non_numeric_never_passes_numeric_gates(s in "[a-zA-Z]{1,8}", n in -1000i64..1000) {
        let num = n.to_string();
        prop_assert!(!ConditionOp::Gt.evaluate(Some(&s), &num));
        prop_assert!(!ConditionOp::Lt.evaluate(Some(&s), &num));
        prop_assert!(!ConditionOp::Gt.evaluate(Some(&num), &s));
        prop_assert!(!ConditionOp::Lt.evaluate(Some(&num), &s));
    }

    /// equals/not_equals partition every string against itself.
    #[test]
    fn equals_is_reflexive(s in ".*") {
        prop_assert!(ConditionOp::Equals.evaluate(Some(&s), &s));
        prop_assert!(!ConditionOp::NotEquals.evaluate(Some(&s), &s));
    }

    /// contains is reflexive and case-insensitive.
    #[test]
    fn contains_finds_itself_in_any_case(s in "[a-z]{1,12}") {
        let upper = s.to_uppercase();
        prop_assert!(ConditionOp::Contains.evaluate(Some(&s), &s));
        prop_assert!(ConditionOp::Contains.evaluate(Some(&upper), &s));
        prop_assert!(ConditionOp::Contains.evaluate(Some(&s), &upper));
    }
}
