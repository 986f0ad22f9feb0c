use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::{Date, PrimitiveDateTime};

use crate::error::EngineError;

/// A single oceanographic profile as seen by the evaluator and the engine.
pub trait Profile {
    /// Stable identifier; `None` when unknown.
    fn uid(&self) -> Option<i64>;

    fn n_levels(&self) -> usize;

    fn datetime(&self) -> PrimitiveDateTime;

    /// Named attribute lookup for engine implementations that need more than
    /// identity, level count and timestamp.
    fn attribute(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// Owned profile used by batch callers and tests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileRecord {
    pub uid: Option<i64>,
    pub n_levels: usize,
    pub datetime: PrimitiveDateTime,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl ProfileRecord {
    #[must_use]
    pub fn new(uid: Option<i64>, n_levels: usize, datetime: PrimitiveDateTime) -> Self {
        Self { uid, n_levels, datetime, attributes: Map::new() }
    }

    #[must_use]
    pub fn with_attribute(mut self, name: &str, value: Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }
}

impl Profile for ProfileRecord {
    fn uid(&self) -> Option<i64> {
        self.uid
    }

    fn n_levels(&self) -> usize {
        self.n_levels
    }

    fn datetime(&self) -> PrimitiveDateTime {
        self.datetime
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes.get(name).cloned()
    }
}

/// Engine-facing view of a profile with a sanitized timestamp. Identity, level
/// count and attributes pass straight through to the wrapped profile.
pub struct EngineProfile<'a> {
    inner: &'a dyn Profile,
    datetime: PrimitiveDateTime,
}

impl<'a> EngineProfile<'a> {
    /// # Errors
    /// Returns [`time::error::ComponentRange`] when `min_year` itself is not a
    /// representable year.
    pub fn clamped(
        inner: &'a dyn Profile,
        min_year: i32,
    ) -> Result<Self, time::error::ComponentRange> {
        let datetime = clamp_year(inner.datetime(), min_year)?;
        Ok(Self { inner, datetime })
    }
}

impl Profile for EngineProfile<'_> {
    fn uid(&self) -> Option<i64> {
        self.inner.uid()
    }

    fn n_levels(&self) -> usize {
        self.inner.n_levels()
    }

    fn datetime(&self) -> PrimitiveDateTime {
        self.datetime
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        self.inner.attribute(name)
    }
}

/// Raise the year of `datetime` to `min_year` when it is earlier, keeping
/// month, day and time of day. 29 February becomes 28 February when the target
/// year is not a leap year.
///
/// # Errors
/// Returns [`time::error::ComponentRange`] when `min_year` is out of range.
pub fn clamp_year(
    datetime: PrimitiveDateTime,
    min_year: i32,
) -> Result<PrimitiveDateTime, time::error::ComponentRange> {
    if datetime.year() >= min_year {
        return Ok(datetime);
    }

    let date = Date::from_calendar_date(min_year, datetime.month(), datetime.day()).or_else(
        |_| Date::from_calendar_date(min_year, datetime.month(), datetime.day().saturating_sub(1)),
    )?;
    Ok(PrimitiveDateTime::new(date, datetime.time()))
}

/// Flags produced by one engine run: per-variable per-test code arrays and
/// per-test scalar codes for the common scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct EngineFlags {
    #[serde(default)]
    pub variables: BTreeMap<String, BTreeMap<String, Vec<i64>>>,
    #[serde(default)]
    pub common: BTreeMap<String, i64>,
}

impl EngineFlags {
    #[must_use]
    pub fn variable_flags(&self, variable: &str, test: &str) -> Option<&[i64]> {
        self.variables.get(variable).and_then(|tests| tests.get(test)).map(Vec::as_slice)
    }

    #[must_use]
    pub fn common_flag(&self, test: &str) -> Option<i64> {
        self.common.get(test).copied()
    }

    /// Whether `variable` or the common scope holds a result for `test`.
    /// Results under other variables do not count.
    #[must_use]
    pub fn has_test(&self, variable: &str, test: &str) -> bool {
        self.variable_flags(variable, test).is_some() || self.common_flag(test).is_some()
    }
}

/// The external QC scoring engine. Implementations are opaque: they receive a
/// profile and a scoped configuration and return raw flag codes.
pub trait QcEngine {
    /// # Errors
    /// Returns [`EngineError`] when the engine cannot score the profile.
    fn run(&self, profile: &dyn Profile, config: &Value) -> Result<EngineFlags, EngineError>;
}

impl<E: QcEngine + ?Sized> QcEngine for &E {
    fn run(&self, profile: &dyn Profile, config: &Value) -> Result<EngineFlags, EngineError> {
        (**self).run(profile, config)
    }
}
