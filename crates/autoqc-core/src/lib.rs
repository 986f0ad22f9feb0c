//! Core QC decision kernel: flag decoding, configuration scoping, memoized
//! engine evaluation and the decision-analysis primitives shared with the
//! result store.

pub mod cache;
pub mod catalog;
pub mod category;
pub mod codec;
pub mod config;
pub mod discriminator;
pub mod error;
pub mod evaluator;
pub mod frame;
pub mod profile;

pub use cache::{CacheProbe, CacheStats, EvaluationCache, MissReason};
pub use catalog::{
    validate_identifier, TestCatalog, LEVEL_TRUTH_COLUMN, TRUTH_COLUMN, UID_COLUMN,
};
pub use category::{
    categorize, CategoryAssignment, CategoryCounts, ConfusionCategory, DEFAULT_CATEGORY_COLUMN,
};
pub use codec::{
    decision_for, decode_flags, decode_stored_decision, decode_stored_integer,
    encode_stored_decision, pack_truth, truth_any, unpack_truth, unpack_truth_bytes, FlagCode,
};
pub use config::{
    ConfigResolver, ConfigSelector, ConfigSource, EmbeddedSuites, ResolutionOrigin,
    ResolvedConfig, ResolverSettings, ScopeKeys, SuiteDirectory, DEFAULT_CONFIG_DIR,
};
pub use discriminator::Discriminator;
pub use error::{ConfigLoadError, ConfigMissReason, DecodeError, EngineError, QcError};
pub use evaluator::{select_flags, EvaluatorSettings, QcEvaluator, MIN_SUPPORTED_YEAR};
pub use frame::{DecisionFrame, DecisionLookup, DecisionRow};
pub use profile::{clamp_year, EngineFlags, EngineProfile, Profile, ProfileRecord, QcEngine};
