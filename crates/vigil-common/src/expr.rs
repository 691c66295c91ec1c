use serde::{Deserialize, Serialize};

use crate::types::ExpressionResults;

/// The combining boolean expression of an alert rule, evaluated over the
/// already-computed sub-expression results.
///
/// The core never parses or executes the query-expression language; the tree
/// is supplied ready-made by the configuration layer and each leaf refers to
/// a named sub-expression by its identifier.
///
/// # Examples
///
/// ```
/// use vigil_common::expr::BoolExpr;
///
/// // "cpu AND NOT maintenance"
/// let expr = BoolExpr::and([
///     BoolExpr::reference("cpu"),
///     BoolExpr::not(BoolExpr::reference("maintenance")),
/// ]);
/// assert_eq!(expr.to_string(), "(cpu AND (NOT maintenance))");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoolExpr {
    /// Reference to a named sub-expression result.
    Ref(String),
    And(Vec<BoolExpr>),
    Or(Vec<BoolExpr>),
    Not(Box<BoolExpr>),
}

/// Error raised while evaluating a combining expression. Fatal to the
/// evaluation cycle: the pipeline aborts rather than risk a notification
/// computed from a half-evaluated rule.
#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    #[error("expression references unknown sub-expression '{0}'")]
    UnknownReference(String),

    #[error("empty {0} expression")]
    EmptyOperands(&'static str),
}

impl BoolExpr {
    pub fn reference(name: impl Into<String>) -> Self {
        BoolExpr::Ref(name.into())
    }

    pub fn and(operands: impl IntoIterator<Item = BoolExpr>) -> Self {
        BoolExpr::And(operands.into_iter().collect())
    }

    pub fn or(operands: impl IntoIterator<Item = BoolExpr>) -> Self {
        BoolExpr::Or(operands.into_iter().collect())
    }

    pub fn not(operand: BoolExpr) -> Self {
        BoolExpr::Not(Box::new(operand))
    }

    /// Evaluates the tree against the per-sub-expression results.
    pub fn evaluate(&self, results: &ExpressionResults) -> Result<bool, ExprError> {
        match self {
            BoolExpr::Ref(name) => results
                .get(name)
                .map(|r| r.matched())
                .ok_or_else(|| ExprError::UnknownReference(name.clone())),
            BoolExpr::And(operands) => {
                if operands.is_empty() {
                    return Err(ExprError::EmptyOperands("AND"));
                }
                for op in operands {
                    if !op.evaluate(results)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            BoolExpr::Or(operands) => {
                if operands.is_empty() {
                    return Err(ExprError::EmptyOperands("OR"));
                }
                for op in operands {
                    if op.evaluate(results)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            BoolExpr::Not(operand) => Ok(!operand.evaluate(results)?),
        }
    }
}

impl std::fmt::Display for BoolExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn join(
            f: &mut std::fmt::Formatter<'_>,
            operands: &[BoolExpr],
            sep: &str,
        ) -> std::fmt::Result {
            write!(f, "(")?;
            for (i, op) in operands.iter().enumerate() {
                if i > 0 {
                    write!(f, " {sep} ")?;
                }
                write!(f, "{op}")?;
            }
            write!(f, ")")
        }
        match self {
            BoolExpr::Ref(name) => write!(f, "{name}"),
            BoolExpr::And(ops) => join(f, ops, "AND"),
            BoolExpr::Or(ops) => join(f, ops, "OR"),
            BoolExpr::Not(op) => write!(f, "(NOT {op})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExpressionResult, ExpressionStatus};
    use std::collections::HashMap;

    fn results(pairs: &[(&str, bool)]) -> ExpressionResults {
        pairs
            .iter()
            .map(|(name, matched)| {
                (
                    name.to_string(),
                    ExpressionResult {
                        status: if *matched {
                            ExpressionStatus::Matched
                        } else {
                            ExpressionStatus::NotMatched
                        },
                        outputs: Vec::new(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn and_or_not_evaluation() {
        let r = results(&[("a", true), ("b", false)]);

        assert!(BoolExpr::reference("a").evaluate(&r).unwrap());
        assert!(!BoolExpr::reference("b").evaluate(&r).unwrap());
        assert!(!BoolExpr::and([BoolExpr::reference("a"), BoolExpr::reference("b")])
            .evaluate(&r)
            .unwrap());
        assert!(BoolExpr::or([BoolExpr::reference("a"), BoolExpr::reference("b")])
            .evaluate(&r)
            .unwrap());
        assert!(BoolExpr::not(BoolExpr::reference("b")).evaluate(&r).unwrap());
    }

    #[test]
    fn unknown_reference_is_an_error() {
        let r = results(&[("a", true)]);
        let err = BoolExpr::reference("missing").evaluate(&r).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn empty_operand_list_is_an_error() {
        let r = HashMap::new();
        assert!(BoolExpr::And(Vec::new()).evaluate(&r).is_err());
        assert!(BoolExpr::Or(Vec::new()).evaluate(&r).is_err());
    }
}
