//! Flag-code vocabulary and the packed per-level truth encoding used by the
//! result store.

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// IOC-style QC flag returned by the engine for one level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FlagCode {
    Good,
    ProbablyGood,
    ProbablyBad,
    Bad,
}

impl FlagCode {
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::Good => 1,
            Self::ProbablyGood => 2,
            Self::ProbablyBad => 3,
            Self::Bad => 4,
        }
    }

    /// # Errors
    /// Returns [`DecodeError::UnknownFlagCode`] for codes outside `1..=4`.
    pub fn parse(code: i64) -> Result<Self, DecodeError> {
        match code {
            1 => Ok(Self::Good),
            2 => Ok(Self::ProbablyGood),
            3 => Ok(Self::ProbablyBad),
            4 => Ok(Self::Bad),
            other => Err(DecodeError::UnknownFlagCode(other)),
        }
    }

    /// Probably-good counts as a pass.
    #[must_use]
    pub fn rejects(self) -> bool {
        matches!(self, Self::ProbablyBad | Self::Bad)
    }
}

/// Reject (`true`) iff the code is probably-bad or bad.
///
/// # Errors
/// Returns [`DecodeError::UnknownFlagCode`] for codes outside `1..=4`.
pub fn decision_for(code: i64) -> Result<bool, DecodeError> {
    FlagCode::parse(code).map(FlagCode::rejects)
}

/// Decode a full flag vector into per-level reject decisions.
///
/// # Errors
/// Returns the first [`DecodeError`] encountered.
pub fn decode_flags(codes: &[i64]) -> Result<Vec<bool>, DecodeError> {
    codes.iter().map(|code| decision_for(*code)).collect()
}

/// Unpack the text form of the per-level truth encoding: one `'0'`/`'1'`
/// character per level.
///
/// # Errors
/// Returns [`DecodeError::InvalidTruthMarker`] for any other character.
pub fn unpack_truth(packed: &str) -> Result<Vec<bool>, DecodeError> {
    packed
        .chars()
        .enumerate()
        .map(|(level, marker)| match marker {
            '0' => Ok(false),
            '1' => Ok(true),
            other => Err(DecodeError::InvalidTruthMarker(other, level)),
        })
        .collect()
}

/// Unpack the blob form of the per-level truth encoding: one `0`/`1` byte per
/// level. ASCII `'0'`/`'1'` bytes are accepted as well.
///
/// # Errors
/// Returns [`DecodeError::InvalidTruthMarker`] for any other byte.
pub fn unpack_truth_bytes(packed: &[u8]) -> Result<Vec<bool>, DecodeError> {
    packed
        .iter()
        .enumerate()
        .map(|(level, byte)| match byte {
            0 | b'0' => Ok(false),
            1 | b'1' => Ok(true),
            other => Err(DecodeError::InvalidTruthMarker(char::from(*other), level)),
        })
        .collect()
}

#[must_use]
pub fn pack_truth(levels: &[bool]) -> String {
    levels.iter().map(|flagged| if *flagged { '1' } else { '0' }).collect()
}

/// Profile-level truth: any level flagged.
#[must_use]
pub fn truth_any(levels: &[bool]) -> bool {
    levels.iter().any(|flagged| *flagged)
}

/// Decode a test column value stored as text.
///
/// # Errors
/// Returns [`DecodeError::InvalidStoredDecision`] for unrecognized text.
pub fn decode_stored_decision(raw: &str) -> Result<bool, DecodeError> {
    match raw.trim() {
        "1" | "True" | "true" | "TRUE" => Ok(true),
        "0" | "False" | "false" | "FALSE" => Ok(false),
        other => Err(DecodeError::InvalidStoredDecision(other.to_string())),
    }
}

/// Decode a test column value stored as an integer.
///
/// # Errors
/// Returns [`DecodeError::InvalidStoredDecision`] for values other than 0/1.
pub fn decode_stored_integer(raw: i64) -> Result<bool, DecodeError> {
    match raw {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(DecodeError::InvalidStoredDecision(other.to_string())),
    }
}

#[must_use]
pub fn encode_stored_decision(flagged: bool) -> &'static str {
    if flagged {
        "1"
    } else {
        "0"
    }
}
