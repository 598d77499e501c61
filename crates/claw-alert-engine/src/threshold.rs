//! Threshold expressions evaluated against observed values.
//!
//! Rules describe their alert conditions as short textual expressions such as
//! `"> 90"` or `"value <= 0.5"`. This module parses those expressions into a
//! [`ThresholdExpr`] and evaluates them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Comparison operators for threshold expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    /// Greater than (>).
    #[serde(rename = ">")]
    GreaterThan,
    /// Greater than or equal (>=).
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    /// Less than (<).
    #[serde(rename = "<")]
    LessThan,
    /// Less than or equal (<=).
    #[serde(rename = "<=")]
    LessThanOrEqual,
    /// Equal (==).
    #[serde(rename = "==")]
    Equal,
    /// Not equal (!=).
    #[serde(rename = "!=")]
    NotEqual,
}

impl ComparisonOperator {
    /// Evaluates the comparison between two values.
    #[must_use]
    pub fn evaluate(&self, left: f64, right: f64) -> bool {
        match self {
            Self::GreaterThan => left > right,
            Self::GreaterThanOrEqual => left >= right,
            Self::LessThan => left < right,
            Self::LessThanOrEqual => left <= right,
            Self::Equal => (left - right).abs() < f64::EPSILON,
            Self::NotEqual => (left - right).abs() >= f64::EPSILON,
        }
    }

    /// Returns the operator as a string symbol.
    #[must_use]
    pub const fn as_symbol(&self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
        }
    }

    /// Parses an operator symbol. `=` is accepted as an alias of `==`.
    #[must_use]
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            ">" => Some(Self::GreaterThan),
            ">=" => Some(Self::GreaterThanOrEqual),
            "<" => Some(Self::LessThan),
            "<=" => Some(Self::LessThanOrEqual),
            "==" | "=" => Some(Self::Equal),
            "!=" => Some(Self::NotEqual),
            _ => None,
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_symbol())
    }
}

/// A parsed threshold expression: `<operator> <threshold>`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    /// The comparison operator.
    pub operator: ComparisonOperator,
    /// The right-hand side of the comparison.
    pub threshold: f64,
}

impl ThresholdExpr {
    /// Creates an expression from its parts.
    #[must_use]
    pub const fn new(operator: ComparisonOperator, threshold: f64) -> Self {
        Self {
            operator,
            threshold,
        }
    }

    /// Parses an expression such as `"> 90"`, `">=0.5"`, `"value < 3"` or
    /// `"$value != 0"`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidExpression` if the operator or the
    /// threshold cannot be parsed.
    pub fn parse(expr: &str) -> Result<Self> {
        let invalid = |reason: &str| EngineError::InvalidExpression {
            expr: expr.to_string(),
            reason: reason.to_string(),
        };

        let mut rest = expr.trim();
        for subject in ["$value", "value"] {
            if let Some(stripped) = rest.strip_prefix(subject) {
                rest = stripped.trim_start();
                break;
            }
        }

        let op_len = rest
            .find(|c: char| !matches!(c, '<' | '>' | '=' | '!'))
            .unwrap_or(rest.len());
        if op_len == 0 {
            return Err(invalid("missing comparison operator"));
        }

        let (symbol, number) = rest.split_at(op_len);
        let operator =
            ComparisonOperator::from_symbol(symbol).ok_or_else(|| invalid("unknown operator"))?;
        let threshold = number
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid("threshold is not a number"))?;
        if !threshold.is_finite() {
            return Err(invalid("threshold must be finite"));
        }

        Ok(Self::new(operator, threshold))
    }

    /// Evaluates the expression against a value.
    #[must_use]
    pub fn evaluate(&self, value: f64) -> bool {
        self.operator.evaluate(value, self.threshold)
    }
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operator, self.threshold)
    }
}
