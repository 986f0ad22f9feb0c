use serde::Serialize;

use crate::config::ConfigSelector;
use crate::profile::EngineFlags;

#[derive(Debug, Clone, PartialEq)]
struct CacheEntry {
    uid: Option<i64>,
    selector: ConfigSelector,
    results: EngineFlags,
}

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    Empty,
    UnknownProfile,
    ProfileChanged,
    SelectorChanged,
    TestNotComputed,
}

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
pub enum CacheProbe {
    Hit,
    Miss(MissReason),
}

#[derive(Debug, Clone, Copy, Default, Serialize, Eq, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Single-slot memo of the most recent engine run.
///
/// A hit needs the same known profile uid, an equal selector, and results that
/// already cover the requested test. One instance per worker.
#[derive(Debug, Clone, Default)]
pub struct EvaluationCache {
    slot: Option<CacheEntry>,
    stats: CacheStats,
}

impl EvaluationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a request against the slot and count it. `variable` is the
    /// result variable the caller reads per-level flags from.
    pub fn probe(
        &mut self,
        uid: Option<i64>,
        selector: &ConfigSelector,
        variable: &str,
        test: &str,
    ) -> CacheProbe {
        let probe = match (&self.slot, uid) {
            (_, None) => CacheProbe::Miss(MissReason::UnknownProfile),
            (None, Some(_)) => CacheProbe::Miss(MissReason::Empty),
            (Some(entry), Some(_)) if entry.uid != uid => {
                CacheProbe::Miss(MissReason::ProfileChanged)
            }
            (Some(entry), Some(_)) if &entry.selector != selector => {
                CacheProbe::Miss(MissReason::SelectorChanged)
            }
            (Some(entry), Some(_)) if !entry.results.has_test(variable, test) => {
                CacheProbe::Miss(MissReason::TestNotComputed)
            }
            (Some(_), Some(_)) => CacheProbe::Hit,
        };

        match probe {
            CacheProbe::Hit => self.stats.hits += 1,
            CacheProbe::Miss(_) => self.stats.misses += 1,
        }
        tracing::debug!(?uid, test, ?probe, "evaluation cache probe");
        probe
    }

    /// Results for the request, or `None` when the engine has to run.
    pub fn lookup(
        &mut self,
        uid: Option<i64>,
        selector: &ConfigSelector,
        variable: &str,
        test: &str,
    ) -> Option<&EngineFlags> {
        match self.probe(uid, selector, variable, test) {
            CacheProbe::Hit => self.slot.as_ref().map(|entry| &entry.results),
            CacheProbe::Miss(_) => None,
        }
    }

    /// Replace the slot with a fresh run. Runs for unknown profiles are kept
    /// only so the caller can read them back; they never produce a hit.
    pub fn store(
        &mut self,
        uid: Option<i64>,
        selector: ConfigSelector,
        results: EngineFlags,
    ) -> &EngineFlags {
        &self.slot.insert(CacheEntry { uid, selector, results }).results
    }

    #[must_use]
    pub fn results(&self) -> Option<&EngineFlags> {
        self.slot.as_ref().map(|entry| &entry.results)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}
