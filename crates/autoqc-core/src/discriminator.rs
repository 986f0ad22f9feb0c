//! Boolean combinations of QC tests.
//!
//! A discriminator is a list of expressions. Each expression joins test names
//! with `&`; the list is OR'd, so `["a&b", "c"]` reads `(a AND b) OR c`.

use serde::Serialize;

use crate::catalog::TestCatalog;
use crate::error::QcError;
use crate::frame::DecisionLookup;

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
struct Conjunction {
    source: String,
    tests: Vec<String>,
}

impl Conjunction {
    fn evaluate(&self, row: &impl DecisionLookup) -> Result<bool, QcError> {
        for test in &self.tests {
            let flagged =
                row.decision(test).ok_or_else(|| QcError::TestNotFound(test.clone()))?;
            if !flagged {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct Discriminator {
    terms: Vec<Conjunction>,
}

impl Discriminator {
    /// Parse and validate `expressions` against `catalog` once.
    ///
    /// # Errors
    /// Returns [`QcError::InvalidExpression`] for empty expressions or empty
    /// `&` operands, and [`QcError::UnknownTest`] for names outside `catalog`.
    pub fn compile<S: AsRef<str>>(
        expressions: &[S],
        catalog: &TestCatalog,
    ) -> Result<Self, QcError> {
        let mut terms = Vec::with_capacity(expressions.len());
        for expression in expressions {
            let source = expression.as_ref();
            let mut tests = Vec::new();
            for name in source.split('&').map(str::trim) {
                if name.is_empty() {
                    return Err(QcError::InvalidExpression(source.to_string()));
                }
                if !catalog.contains(name) {
                    return Err(QcError::UnknownTest(name.to_string()));
                }
                tests.push(name.to_string());
            }
            terms.push(Conjunction { source: source.to_string(), tests });
        }
        Ok(Self { terms })
    }

    /// OR across expressions, AND within each. An empty list never flags.
    ///
    /// # Errors
    /// Returns [`QcError::TestNotFound`] when `row` has no decision for a
    /// referenced test.
    pub fn evaluate(&self, row: &impl DecisionLookup) -> Result<bool, QcError> {
        for term in &self.terms {
            if term.evaluate(row)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Every expression that flags `row`, in declaration order.
    ///
    /// # Errors
    /// Returns [`QcError::TestNotFound`] when `row` has no decision for a
    /// referenced test.
    pub fn triggers(&self, row: &impl DecisionLookup) -> Result<Vec<String>, QcError> {
        let mut fired = Vec::new();
        for term in &self.terms {
            if term.evaluate(row)? {
                fired.push(term.source.clone());
            }
        }
        Ok(fired)
    }

    /// Distinct test names referenced by any expression.
    #[must_use]
    pub fn referenced_tests(&self) -> Vec<&str> {
        let mut names: Vec<&str> =
            self.terms.iter().flat_map(|term| term.tests.iter().map(String::as_str)).collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}
