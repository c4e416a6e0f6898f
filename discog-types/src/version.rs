use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A monthly dump's version tag, e.g. `20240601`.
///
/// Ordering is numeric, so lexicographic and chronological order agree —
/// `latest_version` relies on that to pick the newest dump with a plain max.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DumpVersion(NaiveDate);

#[derive(Debug, thiserror::Error)]
pub enum DumpVersionError {
    #[error("version tag {0:?} is not 8 ASCII digits")]
    NotEightDigits(String),

    #[error("version tag {0:?} is not a valid calendar date")]
    NotACalendarDate(String),
}

impl DumpVersion {
    pub fn parse(tag: &str) -> Result<Self, DumpVersionError> {
        if tag.len() != 8 || !tag.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DumpVersionError::NotEightDigits(tag.to_string()));
        }

        let year: i32 = tag[0..4].parse().unwrap();
        let month: u32 = tag[4..6].parse().unwrap();
        let day: u32 = tag[6..8].parse().unwrap();

        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| DumpVersionError::NotACalendarDate(tag.to_string()))?;

        Ok(Self(date))
    }

    pub fn as_tag(&self) -> String {
        self.0.format("%Y%m%d").to_string()
    }
}

impl fmt::Display for DumpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_tag())
    }
}

impl FromStr for DumpVersion {
    type Err = DumpVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DumpVersion {
    type Error = DumpVersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DumpVersion> for String {
    fn from(value: DumpVersion) -> Self {
        value.as_tag()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_numerically() {
        let a = DumpVersion::parse("20240101").unwrap();
        let b = DumpVersion::parse("20240601").unwrap();
        assert!(a < b);
    }

    #[test]
    fn rejects_malformed_tags() {
        assert!(DumpVersion::parse("2024011").is_err());
        assert!(DumpVersion::parse("2024-01-01").is_err());
        assert!(DumpVersion::parse("20241301").is_err());
    }

    #[test]
    fn round_trips_display() {
        let v = DumpVersion::parse("20240601").unwrap();
        assert_eq!(v.to_string(), "20240601");
    }
}
