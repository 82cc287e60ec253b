//! Roll number validation and the validated [`RollNumber`] key.
//!
//! A roll number is the last two characters of a student's full roll number.
//! Accepted forms, after uppercasing:
//! - `01`..`99` (two digits, numeric value 1 to 99)
//! - `A0`..`A9`
//! - `B0`

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Returns true if `candidate` is a well-formed roll number.
/// Case-insensitive: the candidate is uppercased before matching.
pub fn is_valid(candidate: &str) -> bool {
    let normalized = candidate.to_uppercase();
    let bytes = normalized.as_bytes();
    // Non-ASCII bytes never match the patterns below, so byte length is enough.
    if bytes.len() != 2 {
        return false;
    }

    match (bytes[0], bytes[1]) {
        (tens @ b'0'..=b'9', ones @ b'0'..=b'9') => {
            let value = (tens - b'0') * 10 + (ones - b'0');
            (1..=99).contains(&value)
        }
        (b'A', b'0'..=b'9') => true,
        (b'B', b'0') => true,
        _ => false,
    }
}

/// A validated, uppercase roll number.
///
/// Construct with [`RollNumber::parse`] (or `str::parse`); the inner string
/// is guaranteed to satisfy [`is_valid`] and to be uppercase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RollNumber(String);

impl RollNumber {
    /// Normalizes `candidate` to uppercase and validates it.
    pub fn parse(candidate: &str) -> Result<Self, Error> {
        if !is_valid(candidate) {
            return Err(Error::InvalidIdentifier {
                candidate: candidate.to_string(),
            });
        }
        Ok(Self(candidate.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Every valid roll number in roster order: `01`..`99`, `A0`..`A9`, `B0`.
    pub fn all() -> impl Iterator<Item = RollNumber> {
        let numeric = (1..=99).map(|n| format!("{n:02}"));
        let a_series = (0..=9).map(|n| format!("A{n}"));
        let b_series = std::iter::once("B0".to_string());
        numeric.chain(a_series).chain(b_series).map(RollNumber)
    }
}

impl fmt::Display for RollNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RollNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for RollNumber {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for RollNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RollNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        RollNumber::parse(&raw).map_err(de::Error::custom)
    }
}
