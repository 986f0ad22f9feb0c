//! Derives the configuration handed to the QC engine for one test or one whole
//! suite.
//!
//! Resolution is an ordered strategy. An inline configuration is used as-is.
//! A named suite is loaded from the bundled source and scoped to the target
//! variable (whole-suite runs) or to a single test, preferring the variable
//! scope over the common scope. Only when the bundled source cannot produce the
//! document at all does the resolver read `<config_dir>/<suite>.json`.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ConfigLoadError, ConfigMissReason, QcError};

pub const DEFAULT_CONFIG_DIR: &str = "cotede_qc/qc_cfg";

const GTSPP_SUITE: &str = include_str!("../suites/gtspp.json");
const ARGO_SUITE: &str = include_str!("../suites/argo.json");

/// Which configuration an evaluation runs under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ConfigSelector {
    /// A pre-scoped configuration supplied by the caller.
    Inline(Value),
    /// A suite name such as `gtspp`.
    Named(String),
}

impl ConfigSelector {
    #[must_use]
    pub fn named(suite: &str) -> Self {
        Self::Named(suite.to_string())
    }

    #[must_use]
    pub fn suite(&self) -> Option<&str> {
        match self {
            Self::Inline(_) => None,
            Self::Named(suite) => Some(suite),
        }
    }
}

/// Key names that locate the variable and common scopes inside a suite
/// document.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ScopeKeys {
    /// Section holding per-variable test maps. `None` means variables sit at
    /// the top level of the document.
    pub variables: Option<String>,
    pub variable: String,
    pub common: String,
}

impl ScopeKeys {
    /// `{"variables": {"sea_water_temperature": ...}, "common": ...}`
    #[must_use]
    pub fn cotede() -> Self {
        Self {
            variables: Some("variables".to_string()),
            variable: "sea_water_temperature".to_string(),
            common: "common".to_string(),
        }
    }

    /// `{"TEMP": ..., "main": ...}`
    #[must_use]
    pub fn legacy() -> Self {
        Self { variables: None, variable: "TEMP".to_string(), common: "main".to_string() }
    }
}

impl Default for ScopeKeys {
    fn default() -> Self {
        Self::cotede()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ResolverSettings {
    pub config_dir: PathBuf,
    pub scope_keys: ScopeKeys,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self { config_dir: PathBuf::from(DEFAULT_CONFIG_DIR), scope_keys: ScopeKeys::default() }
    }
}

/// A place suite documents can be loaded from by name.
pub trait ConfigSource {
    /// # Errors
    /// Returns [`ConfigLoadError`] when the document is missing or unreadable.
    fn load(&self, name: &str) -> Result<Value, ConfigLoadError>;
}

impl ConfigSource for BTreeMap<String, Value> {
    fn load(&self, name: &str) -> Result<Value, ConfigLoadError> {
        self.get(name).cloned().ok_or_else(|| ConfigLoadError::NotFound(name.to_string()))
    }
}

/// Suite documents compiled into the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedSuites;

impl EmbeddedSuites {
    #[must_use]
    pub fn names() -> &'static [&'static str] {
        &["argo", "gtspp"]
    }
}

impl ConfigSource for EmbeddedSuites {
    fn load(&self, name: &str) -> Result<Value, ConfigLoadError> {
        let raw = match name {
            "gtspp" => GTSPP_SUITE,
            "argo" => ARGO_SUITE,
            _ => return Err(ConfigLoadError::NotFound(name.to_string())),
        };
        serde_json::from_str(raw).map_err(|err| ConfigLoadError::Parse {
            name: name.to_string(),
            message: err.to_string(),
        })
    }
}

/// Standalone `<root>/<suite>.json` files.
#[derive(Debug, Clone)]
pub struct SuiteDirectory {
    root: PathBuf,
}

impl SuiteDirectory {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self { root: root.to_path_buf() }
    }

    #[must_use]
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }
}

impl ConfigSource for SuiteDirectory {
    fn load(&self, name: &str) -> Result<Value, ConfigLoadError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(ConfigLoadError::NotFound(name.to_string()));
        }

        let path = self.path_for(name);
        let body = fs::read_to_string(&path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => ConfigLoadError::NotFound(name.to_string()),
            _ => ConfigLoadError::Io { name: name.to_string(), message: err.to_string() },
        })?;
        serde_json::from_str(&body).map_err(|err| ConfigLoadError::Parse {
            name: name.to_string(),
            message: err.to_string(),
        })
    }
}

/// Which step of the strategy produced a configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOrigin {
    Inline,
    SuiteScope,
    VariableScope,
    CommonScope,
    FallbackFile,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedConfig {
    pub config: Value,
    pub origin: ResolutionOrigin,
}

pub struct ConfigResolver {
    bundled: Box<dyn ConfigSource>,
    fallback: Box<dyn ConfigSource>,
    keys: ScopeKeys,
}

impl ConfigResolver {
    #[must_use]
    pub fn new(
        bundled: Box<dyn ConfigSource>,
        fallback: Box<dyn ConfigSource>,
        keys: ScopeKeys,
    ) -> Self {
        Self { bundled, fallback, keys }
    }

    /// Embedded suites first, then the settings' JSON directory.
    #[must_use]
    pub fn from_settings(settings: &ResolverSettings) -> Self {
        Self::new(
            Box::new(EmbeddedSuites),
            Box::new(SuiteDirectory::new(&settings.config_dir)),
            settings.scope_keys.clone(),
        )
    }

    #[must_use]
    pub fn scope_keys(&self) -> &ScopeKeys {
        &self.keys
    }

    /// Resolve the configuration for `test` under `selector`.
    ///
    /// # Errors
    /// Returns [`QcError::ConfigNotFound`] when the test has no parameters in a
    /// loaded suite, or when no source can produce the suite at all.
    pub fn resolve(
        &self,
        selector: &ConfigSelector,
        test: &str,
    ) -> Result<ResolvedConfig, QcError> {
        let suite = match selector {
            ConfigSelector::Inline(config) => {
                return Ok(ResolvedConfig {
                    config: config.clone(),
                    origin: ResolutionOrigin::Inline,
                });
            }
            ConfigSelector::Named(suite) => suite.as_str(),
        };

        match self.bundled.load(suite) {
            Ok(document) => self.scope_document(document, suite, test),
            Err(err) => {
                tracing::info!(
                    suite,
                    error = %err,
                    "bundled suite unavailable, reading fallback file"
                );
                self.load_fallback(suite, test)
            }
        }
    }

    fn scope_document(
        &self,
        document: Value,
        suite: &str,
        test: &str,
    ) -> Result<ResolvedConfig, QcError> {
        if test == suite {
            return Ok(ResolvedConfig {
                config: self.restrict_to_variable(document),
                origin: ResolutionOrigin::SuiteScope,
            });
        }

        if let Some(params) = self.variable_scope(&document).and_then(|tests| tests.get(test)) {
            return Ok(ResolvedConfig {
                config: single_test(&self.keys.variable, test, params.clone()),
                origin: ResolutionOrigin::VariableScope,
            });
        }

        tracing::debug!(suite, test, "test not in variable scope, trying common scope");
        if let Some(params) = document.get(&self.keys.common).and_then(|tests| tests.get(test)) {
            return Ok(ResolvedConfig {
                config: single_test(&self.keys.common, test, params.clone()),
                origin: ResolutionOrigin::CommonScope,
            });
        }

        Err(QcError::ConfigNotFound {
            suite: suite.to_string(),
            test: test.to_string(),
            reason: ConfigMissReason::TestAbsent,
        })
    }

    fn load_fallback(&self, suite: &str, test: &str) -> Result<ResolvedConfig, QcError> {
        let document = match self.fallback.load(suite) {
            Ok(document) => document,
            Err(err) => {
                tracing::warn!(suite, error = %err, "fallback configuration unavailable");
                return Err(QcError::ConfigNotFound {
                    suite: suite.to_string(),
                    test: test.to_string(),
                    reason: ConfigMissReason::NoSource,
                });
            }
        };

        if test != suite && !mentions_key(&document, test, 3) {
            return Err(QcError::ConfigNotFound {
                suite: suite.to_string(),
                test: test.to_string(),
                reason: ConfigMissReason::TestAbsent,
            });
        }

        Ok(ResolvedConfig { config: document, origin: ResolutionOrigin::FallbackFile })
    }

    fn variable_scope<'a>(&self, document: &'a Value) -> Option<&'a Map<String, Value>> {
        let scope = match &self.keys.variables {
            Some(section) => document.get(section)?.get(&self.keys.variable)?,
            None => document.get(&self.keys.variable)?,
        };
        scope.as_object()
    }

    fn restrict_to_variable(&self, mut document: Value) -> Value {
        let Some(root) = document.as_object_mut() else {
            return document;
        };

        match &self.keys.variables {
            Some(section) => {
                if let Some(Value::Object(variables)) = root.get_mut(section) {
                    variables.retain(|name, _| name == &self.keys.variable);
                }
            }
            None => {
                root.retain(|name, value| {
                    !value.is_object() || name == &self.keys.variable || name == &self.keys.common
                });
            }
        }

        document
    }
}

fn single_test(scope: &str, test: &str, params: Value) -> Value {
    let mut tests = Map::new();
    tests.insert(test.to_string(), params);
    let mut root = Map::new();
    root.insert(scope.to_string(), Value::Object(tests));
    Value::Object(root)
}

fn mentions_key(value: &Value, key: &str, depth: usize) -> bool {
    let Some(object) = value.as_object() else {
        return false;
    };
    if object.contains_key(key) {
        return true;
    }
    depth > 1 && object.values().any(|child| mentions_key(child, key, depth - 1))
}
