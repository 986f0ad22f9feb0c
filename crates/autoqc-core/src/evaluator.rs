use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheProbe, EvaluationCache};
use crate::codec::decode_flags;
use crate::config::{ConfigResolver, ConfigSelector};
use crate::error::QcError;
use crate::profile::{EngineFlags, EngineProfile, Profile, QcEngine};

pub const MIN_SUPPORTED_YEAR: i32 = 1900;

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct EvaluatorSettings {
    /// Variable key the engine reports per-level flags under.
    pub result_variable: String,
    pub result_common: String,
    pub min_year: i32,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            result_variable: "TEMP".to_string(),
            result_common: "common".to_string(),
            min_year: MIN_SUPPORTED_YEAR,
        }
    }
}

/// Per-level QC decisions for one profile, backed by an external engine and a
/// single-slot cache owned by this evaluator.
pub struct QcEvaluator<E> {
    engine: E,
    resolver: ConfigResolver,
    cache: EvaluationCache,
    settings: EvaluatorSettings,
}

impl<E: QcEngine> QcEvaluator<E> {
    #[must_use]
    pub fn new(engine: E, resolver: ConfigResolver, settings: EvaluatorSettings) -> Self {
        Self::with_cache(engine, resolver, EvaluationCache::new(), settings)
    }

    #[must_use]
    pub fn with_cache(
        engine: E,
        resolver: ConfigResolver,
        cache: EvaluationCache,
        settings: EvaluatorSettings,
    ) -> Self {
        Self { engine, resolver, cache, settings }
    }

    #[must_use]
    pub fn cache(&self) -> &EvaluationCache {
        &self.cache
    }

    #[must_use]
    pub fn settings(&self) -> &EvaluatorSettings {
        &self.settings
    }

    /// Reject decision per level for `test` on `profile` under `selector`.
    ///
    /// # Errors
    /// Returns [`QcError::ConfigNotFound`] when the configuration cannot be
    /// resolved, [`QcError::EvaluationFailed`] when the engine fails or
    /// returns a flag vector of the wrong length, [`QcError::TestNotFound`]
    /// when the results lack `test`, and [`QcError::Decode`] for flag codes
    /// outside the vocabulary.
    pub fn evaluate(
        &mut self,
        profile: &dyn Profile,
        selector: &ConfigSelector,
        test: &str,
    ) -> Result<Vec<bool>, QcError> {
        let uid = profile.uid();
        if let CacheProbe::Miss(reason) =
            self.cache.probe(uid, selector, &self.settings.result_variable, test)
        {
            tracing::debug!(?uid, test, ?reason, "running QC engine");
            let results = self.run_engine(profile, selector, test)?;
            self.cache.store(uid, selector.clone(), results);
        }

        let results = self
            .cache
            .results()
            .ok_or_else(|| QcError::EvaluationFailed("evaluation cache is empty".to_string()))?;
        let codes = select_flags(results, test, profile.n_levels(), &self.settings)?;
        Ok(decode_flags(&codes)?)
    }

    /// Evaluate several tests against one profile, in order.
    ///
    /// # Errors
    /// Returns the first error from [`Self::evaluate`].
    pub fn evaluate_many<S: AsRef<str>>(
        &mut self,
        profile: &dyn Profile,
        selector: &ConfigSelector,
        tests: &[S],
    ) -> Result<BTreeMap<String, Vec<bool>>, QcError> {
        let mut decisions = BTreeMap::new();
        for test in tests {
            let test = test.as_ref();
            decisions.insert(test.to_string(), self.evaluate(profile, selector, test)?);
        }
        Ok(decisions)
    }

    fn run_engine(
        &self,
        profile: &dyn Profile,
        selector: &ConfigSelector,
        test: &str,
    ) -> Result<EngineFlags, QcError> {
        let engine_profile = EngineProfile::clamped(profile, self.settings.min_year)
            .map_err(|err| QcError::EvaluationFailed(format!("invalid profile timestamp: {err}")))?;
        let resolved = self.resolver.resolve(selector, test)?;
        tracing::debug!(test, origin = ?resolved.origin, "resolved QC configuration");

        self.engine
            .run(&engine_profile, &resolved.config)
            .map_err(|err| QcError::EvaluationFailed(err.to_string()))
    }
}

/// Raw codes for `test`: the per-level vector of the result variable, or the
/// common-scope code repeated across every level.
///
/// # Errors
/// Returns [`QcError::TestNotFound`] when neither scope has the test and
/// [`QcError::EvaluationFailed`] when the per-level vector length differs from
/// `n_levels`.
pub fn select_flags(
    results: &EngineFlags,
    test: &str,
    n_levels: usize,
    settings: &EvaluatorSettings,
) -> Result<Vec<i64>, QcError> {
    if let Some(codes) = results.variable_flags(&settings.result_variable, test) {
        if codes.len() != n_levels {
            return Err(QcError::EvaluationFailed(format!(
                "test `{test}` returned {} flags for {n_levels} levels",
                codes.len()
            )));
        }
        return Ok(codes.to_vec());
    }

    if let Some(code) = results.common_flag(test) {
        return Ok(vec![code; n_levels]);
    }

    Err(QcError::TestNotFound(test.to_string()))
}
