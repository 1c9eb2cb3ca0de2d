//! Condition operator semantics for branching nodes.
//!
//! A condition node compares one session variable against an authored
//! check value and routes execution down the `"true"` or `"false"` port.
//! All comparisons operate on strings, because everything that reaches a
//! session variable arrives as text from a messaging channel.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Comparison operator carried by a condition node.
///
/// Persisted as the lowercase snake_case name (`"equals"`, `"gt"`, ...).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    /// String equality. A missing variable coerces to the empty string.
    #[default]
    Equals,
    /// Negation of [`Equals`](Self::Equals).
    NotEquals,
    /// Case-insensitive substring: the check value inside the actual value.
    Contains,
    /// Numeric greater-than; false when either side fails to parse.
    Gt,
    /// Numeric less-than; false when either side fails to parse.
    Lt,
}

impl ConditionOp {
    /// Evaluate this operator against an actual (session) value and the
    /// authored check value.
    ///
    /// `actual` is `None` when the variable was never set; it coerces to
    /// the empty string for the string operators. The numeric operators
    /// parse both sides as `f64` independently and evaluate to `false` on
    /// any parse failure: a non-numeric answer silently fails a `gt`/`lt`
    /// gate rather than erroring the step.
    #[must_use]
    pub fn evaluate(&self, actual: Option<&str>, check: &str) -> bool {
        let actual = actual.unwrap_or("");
        match self {
            ConditionOp::Equals => actual == check,
            ConditionOp::NotEquals => actual != check,
            ConditionOp::Contains => actual.to_lowercase().contains(&check.to_lowercase()),
            ConditionOp::Gt => match (parse_number(actual), parse_number(check)) {
                (Some(a), Some(c)) => a > c,
                _ => false,
            },
            ConditionOp::Lt => match (parse_number(actual), parse_number(check)) {
                (Some(a), Some(c)) => a < c,
                _ => false,
            },
        }
    }
}

impl fmt::Display for ConditionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConditionOp::Equals => "equals",
            ConditionOp::NotEquals => "not_equals",
            ConditionOp::Contains => "contains",
            ConditionOp::Gt => "gt",
            ConditionOp::Lt => "lt",
        };
        write!(f, "{name}")
    }
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equals_is_exact_string_comparison() {
        assert!(ConditionOp::Equals.evaluate(Some("yes"), "yes"));
        assert!(!ConditionOp::Equals.evaluate(Some("Yes"), "yes"));
        assert!(!ConditionOp::Equals.evaluate(Some("yes "), "yes"));
    }

    #[test]
    fn missing_variable_coerces_to_empty() {
        assert!(ConditionOp::Equals.evaluate(None, ""));
        assert!(!ConditionOp::Equals.evaluate(None, "x"));
        assert!(ConditionOp::NotEquals.evaluate(None, "x"));
    }

    #[test]
    fn contains_is_case_insensitive() {
        assert!(ConditionOp::Contains.evaluate(Some("Hello World"), "world"));
        assert!(ConditionOp::Contains.evaluate(Some("abc"), ""));
        assert!(!ConditionOp::Contains.evaluate(Some("abc"), "abcd"));
    }

    #[test]
    fn numeric_comparisons() {
        assert!(ConditionOp::Gt.evaluate(Some("20"), "18"));
        assert!(!ConditionOp::Gt.evaluate(Some("18"), "18"));
        assert!(ConditionOp::Lt.evaluate(Some("3.5"), "4"));
        assert!(ConditionOp::Gt.evaluate(Some(" 21 "), "18"));
    }

    #[test]
    fn parse_failure_is_false_never_an_error() {
        assert!(!ConditionOp::Gt.evaluate(Some("abc"), "18"));
        assert!(!ConditionOp::Gt.evaluate(Some("20"), "abc"));
        assert!(!ConditionOp::Lt.evaluate(None, "18"));
        // Non-finite parses are rejected, not compared.
        assert!(!ConditionOp::Gt.evaluate(Some("inf"), "1"));
        assert!(!ConditionOp::Lt.evaluate(Some("NaN"), "1"));
    }

    #[test]
    fn operator_names_roundtrip_through_serde() {
        for (op, name) in [
            (ConditionOp::Equals, "\"equals\""),
            (ConditionOp::NotEquals, "\"not_equals\""),
            (ConditionOp::Contains, "\"contains\""),
            (ConditionOp::Gt, "\"gt\""),
            (ConditionOp::Lt, "\"lt\""),
        ] {
            assert_eq!(serde_json::to_string(&op).unwrap(), name);
            assert_eq!(serde_json::from_str::<ConditionOp>(name).unwrap(), op);
        }
    }
}
