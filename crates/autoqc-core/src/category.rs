use serde::{Deserialize, Serialize};

use crate::discriminator::Discriminator;
use crate::error::QcError;
use crate::frame::DecisionRow;

/// Column the categorizer adds when callers do not name one.
pub const DEFAULT_CATEGORY_COLUMN: &str = "category";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConfusionCategory {
    TruePositive,
    TrueNegative,
    FalsePositive,
    FalseNegative,
}

impl ConfusionCategory {
    #[must_use]
    pub fn classify(verdict: bool, truth: bool) -> Self {
        match (verdict, truth) {
            (true, true) => Self::TruePositive,
            (false, false) => Self::TrueNegative,
            (true, false) => Self::FalsePositive,
            (false, true) => Self::FalseNegative,
        }
    }

    /// Integer stored in the category column.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::TruePositive => 0,
            Self::TrueNegative => 1,
            Self::FalsePositive => 2,
            Self::FalseNegative => 3,
        }
    }

    #[must_use]
    pub fn parse(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::TruePositive),
            1 => Some(Self::TrueNegative),
            2 => Some(Self::FalsePositive),
            3 => Some(Self::FalseNegative),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TruePositive => "true_positive",
            Self::TrueNegative => "true_negative",
            Self::FalsePositive => "false_positive",
            Self::FalseNegative => "false_negative",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CategoryAssignment {
    pub uid: Option<i64>,
    pub verdict: bool,
    pub truth: bool,
    pub category: ConfusionCategory,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct CategoryCounts {
    pub true_positive: usize,
    pub true_negative: usize,
    pub false_positive: usize,
    pub false_negative: usize,
}

impl CategoryCounts {
    #[must_use]
    pub fn tally(assignments: &[CategoryAssignment]) -> Self {
        let mut counts = Self::default();
        for assignment in assignments {
            match assignment.category {
                ConfusionCategory::TruePositive => counts.true_positive += 1,
                ConfusionCategory::TrueNegative => counts.true_negative += 1,
                ConfusionCategory::FalsePositive => counts.false_positive += 1,
                ConfusionCategory::FalseNegative => counts.false_negative += 1,
            }
        }
        counts
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.true_positive + self.true_negative + self.false_positive + self.false_negative
    }
}

/// Classify every row by the discriminator's verdict against stored truth.
///
/// # Errors
/// Returns [`QcError::MissingTruth`] for rows projected without truth and the
/// discriminator's error for rows missing a referenced test.
pub fn categorize(
    rows: &[DecisionRow],
    discriminator: &Discriminator,
) -> Result<Vec<CategoryAssignment>, QcError> {
    rows.iter()
        .map(|row| {
            let truth = row.truth.ok_or_else(|| QcError::MissingTruth(row.label()))?;
            let verdict = discriminator.evaluate(row)?;
            Ok(CategoryAssignment {
                uid: row.uid(),
                verdict,
                truth,
                category: ConfusionCategory::classify(verdict, truth),
            })
        })
        .collect()
}
