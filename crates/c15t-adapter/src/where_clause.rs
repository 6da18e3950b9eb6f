//! `Where` clauses and their in-memory evaluation.
//!
//! A clause list is satisfied when every `AND` clause holds and, if any
//! `OR` clauses are present, at least one of them holds.
//!
//! Pattern operators (`contains`, `starts_with`, `ends_with`) apply to
//! string fields only and ignore ASCII case on every backend.

use std::cmp::Ordering;
use std::fmt::{self, Display};

use c15t_types::{Record, Value};
use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, Result};

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    Contains,
    StartsWith,
    EndsWith,
}

impl Operator {
    /// True for the operators that take a string pattern.
    pub fn is_pattern(self) -> bool {
        matches!(
            self,
            Operator::Contains | Operator::StartsWith | Operator::EndsWith
        )
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::In => "in",
            Operator::Contains => "contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
        };
        write!(f, "{name}")
    }
}

/// How a clause combines with the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Connector {
    #[default]
    And,
    Or,
}

/// A single filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Where {
    pub field: String,
    #[serde(default)]
    pub operator: Operator,
    pub value: Value,
    #[serde(default)]
    pub connector: Connector,
}

impl Where {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
            connector: Connector::And,
        }
    }

    /// `field = value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Operator::Eq, value)
    }

    /// `field IN values`.
    pub fn is_in(field: impl Into<String>, values: impl Into<Value>) -> Self {
        Self::new(field, Operator::In, values)
    }

    /// Marks this clause as an `OR` alternative.
    pub fn or(mut self) -> Self {
        self.connector = Connector::Or;
        self
    }

    /// Checks that the value suits the operator.
    pub fn validate(&self) -> Result<()> {
        match self.operator {
            Operator::In if !self.value.is_array() => Err(AdapterError::InvalidWhere {
                field: self.field.clone(),
                reason: "`in` requires an array value".to_string(),
            }),
            op if op.is_pattern() && self.value.as_str().is_none() => {
                Err(AdapterError::InvalidWhere {
                    field: self.field.clone(),
                    reason: format!("`{op}` requires a string value"),
                })
            }
            op if !matches!(op, Operator::In) && self.value.is_array() => {
                Err(AdapterError::InvalidWhere {
                    field: self.field.clone(),
                    reason: format!("`{op}` does not accept an array value"),
                })
            }
            _ => Ok(()),
        }
    }

    /// Evaluates this clause against a record.
    pub fn matches(&self, record: &Record) -> bool {
        let actual = record.get(&self.field).unwrap_or(&Value::Null);
        let expected = &self.value;
        match self.operator {
            Operator::Eq => actual == expected,
            Operator::Ne => actual != expected,
            Operator::Lt => actual.compare(expected) == Some(Ordering::Less),
            Operator::Lte => matches!(
                actual.compare(expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Gt => actual.compare(expected) == Some(Ordering::Greater),
            Operator::Gte => matches!(
                actual.compare(expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::In => expected
                .array_elements()
                .is_some_and(|items| items.contains(actual)),
            Operator::Contains | Operator::StartsWith | Operator::EndsWith => {
                match (actual.as_str(), expected.as_str()) {
                    (Some(text), Some(pattern)) => pattern_matches(
                        self.operator,
                        &text.to_ascii_lowercase(),
                        &pattern.to_ascii_lowercase(),
                    ),
                    _ => false,
                }
            }
        }
    }
}

fn pattern_matches(operator: Operator, text: &str, pattern: &str) -> bool {
    match operator {
        Operator::StartsWith => text.starts_with(pattern),
        Operator::EndsWith => text.ends_with(pattern),
        _ => text.contains(pattern),
    }
}

/// Validates every clause in the list.
pub fn validate_where(clauses: &[Where]) -> Result<()> {
    clauses.iter().try_for_each(Where::validate)
}

/// Evaluates a clause list against a record.
pub fn matches_where(record: &Record, clauses: &[Where]) -> bool {
    let (and, or): (Vec<&Where>, Vec<&Where>) = clauses
        .iter()
        .partition(|clause| clause.connector == Connector::And);
    and.iter().all(|clause| clause.matches(record))
        && (or.is_empty() || or.iter().any(|clause| clause.matches(record)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use c15t_types::record;
    use proptest::prelude::*;
    use test_case::test_case;

    fn subject() -> Record {
        record! {
            "id" => "sub_1",
            "isIdentified" => true,
            "externalId" => "user-42",
            "visits" => 7,
            "identityProvider" => Option::<String>::None,
        }
    }

    #[test_case(Where::eq("id", "sub_1"), true; "eq hit")]
    #[test_case(Where::eq("id", "sub_2"), false; "eq miss")]
    #[test_case(Where::new("id", Operator::Ne, "sub_2"), true; "ne")]
    #[test_case(Where::new("visits", Operator::Lt, 8), true; "lt")]
    #[test_case(Where::new("visits", Operator::Lte, 7), true; "lte")]
    #[test_case(Where::new("visits", Operator::Gt, 7), false; "gt")]
    #[test_case(Where::new("visits", Operator::Gte, 7), true; "gte")]
    #[test_case(Where::is_in("id", vec!["sub_1", "sub_9"]), true; "in")]
    #[test_case(Where::is_in("visits", vec![1i64, 2]), false; "in numbers miss")]
    #[test_case(Where::new("externalId", Operator::Contains, "er-4"), true; "contains")]
    #[test_case(Where::new("externalId", Operator::StartsWith, "user"), true; "starts with")]
    #[test_case(Where::new("externalId", Operator::EndsWith, "43"), false; "ends with")]
    #[test_case(Where::new("externalId", Operator::StartsWith, "USER"), true; "starts with ignores case")]
    #[test_case(Where::new("externalId", Operator::Contains, "R-4"), true; "contains ignores case")]
    #[test_case(Where::eq("identityProvider", Value::Null), true; "eq null")]
    #[test_case(Where::new("identityProvider", Operator::Ne, "google"), true; "ne against null")]
    #[test_case(Where::new("visits", Operator::Lt, "8"), false; "mixed types never order")]
    fn test_operator(clause: Where, expected: bool) {
        assert_eq!(matches_where(&subject(), &[clause]), expected);
    }

    #[test]
    fn test_or_requires_one_match() {
        let clauses = [
            Where::eq("isIdentified", true),
            Where::eq("id", "sub_9").or(),
            Where::eq("externalId", "user-42").or(),
        ];
        assert!(matches_where(&subject(), &clauses));

        let clauses = [Where::eq("id", "sub_9").or(), Where::eq("id", "sub_8").or()];
        assert!(!matches_where(&subject(), &clauses));
    }

    #[test]
    fn test_and_failure_overrides_or() {
        let clauses = [Where::eq("isIdentified", false), Where::eq("id", "sub_1").or()];
        assert!(!matches_where(&subject(), &clauses));
    }

    #[test]
    fn test_in_requires_array() {
        let err = Where::is_in("id", "sub_1").validate().unwrap_err();
        assert!(matches!(err, AdapterError::InvalidWhere { .. }));
        assert_eq!(err.code(), c15t_types::ErrorCode::BadRequest);
    }

    #[test]
    fn test_pattern_requires_string() {
        assert!(Where::new("visits", Operator::Contains, 7).validate().is_err());
        assert!(Where::new("externalId", Operator::StartsWith, "u").validate().is_ok());
    }

    #[test]
    fn test_where_deserializes_with_defaults() {
        let clause: Where = serde_json::from_str(r#"{"field":"id","value":"sub_1"}"#).unwrap();
        assert_eq!(clause.operator, Operator::Eq);
        assert_eq!(clause.connector, Connector::And);
        let clause: Where = serde_json::from_str(
            r#"{"field":"id","operator":"starts_with","value":"sub","connector":"OR"}"#,
        )
        .unwrap();
        assert_eq!(clause.operator, Operator::StartsWith);
        assert_eq!(clause.connector, Connector::Or);
    }

    proptest! {
        #[test]
        fn prop_empty_where_matches_everything(n in any::<i64>(), s in "[a-z]{0,8}") {
            let record = record! { "n" => n, "s" => s };
            prop_assert!(matches_where(&record, &[]));
        }

        #[test]
        fn prop_eq_and_ne_are_complementary(a in any::<i64>(), b in any::<i64>()) {
            let record = record! { "n" => a };
            let eq = matches_where(&record, &[Where::eq("n", b)]);
            let ne = matches_where(&record, &[Where::new("n", Operator::Ne, b)]);
            prop_assert_ne!(eq, ne);
        }

        #[test]
        fn prop_or_of_eq_matches_in(a in 0i64..10, items in proptest::collection::vec(0i64..10, 1..5)) {
            let record = record! { "n" => a };
            let ors: Vec<Where> = items.iter().map(|i| Where::eq("n", *i).or()).collect();
            let via_in = matches_where(&record, &[Where::is_in("n", items.clone())]);
            prop_assert_eq!(matches_where(&record, &ors), via_in);
        }
    }
}
