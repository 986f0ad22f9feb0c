use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::catalog::{LEVEL_TRUTH_COLUMN, TRUTH_COLUMN, UID_COLUMN};

/// Anything a discriminator can read test decisions from.
pub trait DecisionLookup {
    fn decision(&self, test: &str) -> Option<bool>;
}

impl DecisionLookup for BTreeMap<String, bool> {
    fn decision(&self, test: &str) -> Option<bool> {
        self.get(test).copied()
    }
}

impl DecisionLookup for BTreeMap<&str, bool> {
    fn decision(&self, test: &str) -> Option<bool> {
        self.get(test).copied()
    }
}

/// One projected result row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DecisionRow {
    /// Requested metadata columns other than `truth`, in request order.
    pub metadata: Map<String, Value>,
    pub decisions: BTreeMap<String, bool>,
    /// Any level flagged by the ground truth.
    pub truth: Option<bool>,
    pub level_truth: Option<Vec<bool>>,
}

impl DecisionRow {
    /// The row key. Tables that declare `uid` as TEXT still key by integer
    /// text such as `"1234"`.
    #[must_use]
    pub fn uid(&self) -> Option<i64> {
        match self.metadata.get(UID_COLUMN)? {
            Value::Number(number) => number.as_i64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// Human-readable row label for error messages.
    #[must_use]
    pub fn label(&self) -> String {
        self.uid().map_or_else(|| "<unknown uid>".to_string(), |uid| format!("uid={uid}"))
    }
}

impl DecisionLookup for DecisionRow {
    fn decision(&self, test: &str) -> Option<bool> {
        self.decisions.get(test).copied()
    }
}

/// Projected rows plus the column order they were requested in.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DecisionFrame {
    pub columns: Vec<String>,
    pub rows: Vec<DecisionRow>,
}

impl DecisionFrame {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as JSON objects whose keys follow [`Self::columns`].
    #[must_use]
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                let mut record = Map::new();
                for column in &self.columns {
                    let value = match column.as_str() {
                        TRUTH_COLUMN => row.truth.map_or(Value::Null, Value::Bool),
                        LEVEL_TRUTH_COLUMN => {
                            row.level_truth.as_ref().map_or(Value::Null, |levels| {
                                Value::Array(levels.iter().copied().map(Value::Bool).collect())
                            })
                        }
                        other => match row.decisions.get(other) {
                            Some(flagged) => Value::Bool(*flagged),
                            None => row.metadata.get(other).cloned().unwrap_or(Value::Null),
                        },
                    };
                    record.insert(column.clone(), value);
                }
                record
            })
            .collect()
    }
}
