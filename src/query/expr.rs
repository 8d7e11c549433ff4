//! Filter expression model
//!
//! A two-level list of rules: an expression is a list of clauses, a clause
//! a list of rules, a rule one `{field, operation, value}` comparison. The
//! normal form decides the nesting: DNF is an OR of AND-clauses, CNF an
//! AND of OR-clauses. The serde shapes match the wire form: operation
//! names in SCREAMING_SNAKE_CASE, scalar-or-list values, `"dnf"`/`"cnf"`
//! modes with their long-form aliases.

use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Per-rule comparison operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "CONTAINS")]
    Contains,
    #[serde(rename = "NOT_CONTAINS")]
    NotContains,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT_IN")]
    NotIn,
    #[serde(rename = "EQUAL")]
    Equal,
    #[serde(rename = "NOT_EQUAL")]
    NotEqual,
    #[serde(rename = "GREATER_THAN")]
    GreaterThan,
    #[serde(rename = "GREATER_THAN_OR_EQUAL")]
    GreaterEqual,
    #[serde(rename = "LESS_THAN")]
    LessThan,
    #[serde(rename = "LESS_THAN_OR_EQUAL")]
    LessEqual,
    #[serde(rename = "STARTS_WITH")]
    StartsWith,
    #[serde(rename = "ENDS_WITH")]
    EndsWith,
}

impl FilterOp {
    /// Ordering comparisons, valid on numeric columns only.
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            FilterOp::GreaterThan
                | FilterOp::GreaterEqual
                | FilterOp::LessThan
                | FilterOp::LessEqual
        )
    }

    /// Substring and affix matches, valid on BSTR columns only.
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            FilterOp::Contains
                | FilterOp::NotContains
                | FilterOp::StartsWith
                | FilterOp::EndsWith
        )
    }

    /// Set membership; the rule value must be a list.
    pub fn is_membership(self) -> bool {
        matches!(self, FilterOp::In | FilterOp::NotIn)
    }
}

/// Expression composition mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalForm {
    /// OR of AND-clauses.
    #[serde(rename = "dnf", alias = "disjunctive_normal_form")]
    Dnf,
    /// AND of OR-clauses.
    #[serde(rename = "cnf", alias = "conjunctive_normal_form")]
    Cnf,
}

impl NormalForm {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "dnf" | "disjunctive_normal_form" => Some(NormalForm::Dnf),
            "cnf" | "conjunctive_normal_form" => Some(NormalForm::Cnf),
            _ => None,
        }
    }
}

/// A rule's comparison value: one scalar, or a list for membership ops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Literal>),
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Int(v)
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Literal::Int(v as i64)
    }
}

impl From<u32> for Literal {
    fn from(v: u32) -> Self {
        Literal::Int(v as i64)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Float(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::Str(v.to_string())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Literal::Str(v)
    }
}

impl<T: Into<Literal>> From<Vec<T>> for Literal {
    fn from(v: Vec<T>) -> Self {
        Literal::List(v.into_iter().map(Into::into).collect())
    }
}

/// One per-column comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub field: String,
    pub operation: FilterOp,
    pub value: Literal,
}

impl Rule {
    pub fn new(field: impl Into<String>, operation: FilterOp, value: impl Into<Literal>) -> Self {
        Rule {
            field: field.into(),
            operation,
            value: value.into(),
        }
    }
}

/// A boolean filter expression: clauses of rules, composed per the mode.
/// The empty expression is the constant `true`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expression {
    pub clauses: Vec<Vec<Rule>>,
}

impl Expression {
    pub fn new(clauses: Vec<Vec<Rule>>) -> Self {
        Expression { clauses }
    }

    /// The constant-true expression.
    pub fn empty() -> Self {
        Expression::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Parse the nested-list wire form.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            EngineError::SchemaMismatch(format!("malformed filter expression: {}", e))
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("expression serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_wire_names() {
        assert_eq!(
            serde_json::to_string(&FilterOp::GreaterEqual).unwrap(),
            "\"GREATER_THAN_OR_EQUAL\""
        );
        let op: FilterOp = serde_json::from_str("\"NOT_CONTAINS\"").unwrap();
        assert_eq!(op, FilterOp::NotContains);
    }

    #[test]
    fn test_mode_aliases() {
        let mode: NormalForm = serde_json::from_str("\"dnf\"").unwrap();
        assert_eq!(mode, NormalForm::Dnf);
        let mode: NormalForm = serde_json::from_str("\"conjunctive_normal_form\"").unwrap();
        assert_eq!(mode, NormalForm::Cnf);
        assert_eq!(NormalForm::from_name("disjunctive_normal_form"), Some(NormalForm::Dnf));
        assert_eq!(NormalForm::from_name("nnf"), None);
    }

    #[test]
    fn test_expression_wire_form() {
        let json = r#"[
            [{"field": "origin", "operation": "EQUAL", "value": "SEA"},
             {"field": "passengers", "operation": "GREATER_THAN", "value": 100}],
            [{"field": "dest", "operation": "IN", "value": ["JFK", "LAX"]}]
        ]"#;
        let expr = Expression::from_json(json).unwrap();
        assert_eq!(expr.clauses.len(), 2);
        assert_eq!(expr.clauses[0].len(), 2);
        assert_eq!(expr.clauses[0][1].value, Literal::Int(100));
        assert_eq!(
            expr.clauses[1][0].value,
            Literal::List(vec![Literal::from("JFK"), Literal::from("LAX")])
        );

        let round = Expression::from_json(&expr.to_json()).unwrap();
        assert_eq!(round, expr);
    }

    #[test]
    fn test_scalar_classes() {
        let expr =
            Expression::from_json(r#"[[{"field": "d", "operation": "EQUAL", "value": 1.5}]]"#)
                .unwrap();
        assert_eq!(expr.clauses[0][0].value, Literal::Float(1.5));
        // Whole numbers stay integers.
        let expr =
            Expression::from_json(r#"[[{"field": "d", "operation": "EQUAL", "value": 2}]]"#)
                .unwrap();
        assert_eq!(expr.clauses[0][0].value, Literal::Int(2));
    }

    #[test]
    fn test_malformed_expression_rejected() {
        assert!(Expression::from_json("{\"not\": \"a list\"}").is_err());
        assert!(Expression::from_json("[[{\"field\": 3}]]").is_err());
    }

    #[test]
    fn test_builder() {
        let expr = Expression::new(vec![vec![
            Rule::new("origin", FilterOp::Equal, "SEA"),
            Rule::new("passengers", FilterOp::Equal, 110),
        ]]);
        assert!(!expr.is_empty());
        assert_eq!(expr.clauses[0][0].field, "origin");
    }
}
