use serde::{Deserialize, Serialize};

use crate::error::QcError;

/// Column names that carry derived data rather than a QC test decision.
pub const TRUTH_COLUMN: &str = "truth";
pub const LEVEL_TRUTH_COLUMN: &str = "leveltruth";
pub const UID_COLUMN: &str = "uid";

/// The known QC tests, in the fixed order result tables and frames use.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct TestCatalog {
    tests: Vec<String>,
}

impl TestCatalog {
    /// # Errors
    /// Returns [`QcError::InvalidIdentifier`] when a name is not a plain SQL
    /// identifier, is reserved, or appears twice.
    pub fn new<S: AsRef<str>>(tests: &[S]) -> Result<Self, QcError> {
        let mut names: Vec<String> = Vec::with_capacity(tests.len());
        for test in tests {
            let test = test.as_ref();
            validate_identifier(test)?;
            if [TRUTH_COLUMN, LEVEL_TRUTH_COLUMN, UID_COLUMN].contains(&test)
                || names.iter().any(|existing| existing == test)
            {
                return Err(QcError::InvalidIdentifier(test.to_string()));
            }
            names.push(test.to_string());
        }
        Ok(Self { tests: names })
    }

    #[must_use]
    pub fn tests(&self) -> &[String] {
        &self.tests
    }

    #[must_use]
    pub fn contains(&self, test: &str) -> bool {
        self.tests.iter().any(|known| known == test)
    }

    /// Catalog entry matching `column` case-insensitively.
    #[must_use]
    pub fn find_column(&self, column: &str) -> Option<&str> {
        self.tests.iter().map(String::as_str).find(|known| known.eq_ignore_ascii_case(column))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

impl TryFrom<Vec<String>> for TestCatalog {
    type Error = QcError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<TestCatalog> for Vec<String> {
    fn from(value: TestCatalog) -> Self {
        value.tests
    }
}

/// Accept `[A-Za-z_][A-Za-z0-9_]*` only; table and column names are spliced
/// into SQL text.
///
/// # Errors
/// Returns [`QcError::InvalidIdentifier`] otherwise.
pub fn validate_identifier(name: &str) -> Result<(), QcError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(QcError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_preserves_order() -> Result<(), QcError> {
        let catalog = TestCatalog::new(&["CoTeDe_spike", "EN_range_check", "Argo_gradient"])?;
        assert_eq!(catalog.tests(), ["CoTeDe_spike", "EN_range_check", "Argo_gradient"]);
        assert_eq!(catalog.find_column("en_range_check"), Some("EN_range_check"));
        assert!(!catalog.contains("en_range_check"));
        Ok(())
    }

    #[test]
    fn catalog_rejects_duplicates_reserved_and_bad_names() {
        let cases: [&[&str]; 6] =
            [&["a", "a"], &["truth"], &["uid"], &["1abc"], &["drop table"], &[""]];
        for bad in cases {
            assert!(TestCatalog::new(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn catalog_deserializes_through_validation() {
        let ok: Result<TestCatalog, _> = serde_json::from_str(r#"["a","b"]"#);
        assert!(ok.is_ok());
        let bad: Result<TestCatalog, _> = serde_json::from_str(r#"["a;--"]"#);
        assert!(bad.is_err());
    }
}
