use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the four top-level record types a Discogs dump is enumerated over.
/// The set is closed: the XML schema this reads from only ever names these
/// four, so this is an enum rather than an open string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityClass {
    Artist,
    Label,
    Master,
    Release,
}

impl EntityClass {
    pub const ALL: [EntityClass; 4] = [
        EntityClass::Artist,
        EntityClass::Label,
        EntityClass::Master,
        EntityClass::Release,
    ];

    /// Lowercase name used as routing key, file-name fragment, and config key.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityClass::Artist => "artist",
            EntityClass::Label => "label",
            EntityClass::Master => "master",
            EntityClass::Release => "release",
        }
    }

    /// Name of the top-level XML element this entity class is parsed from.
    pub fn xml_element(self) -> &'static str {
        self.as_str()
    }

    /// Single byte discriminant used as the class component of the dedup
    /// index's composite key (1 byte class discriminator + 8 byte id).
    pub fn discriminant(self) -> u8 {
        match self {
            EntityClass::Artist => 0,
            EntityClass::Label => 1,
            EntityClass::Master => 2,
            EntityClass::Release => 3,
        }
    }

    pub fn from_discriminant(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(EntityClass::Artist),
            1 => Some(EntityClass::Label),
            2 => Some(EntityClass::Master),
            3 => Some(EntityClass::Release),
            _ => None,
        }
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown entity class {0:?}")]
pub struct UnknownEntityClass(String);

impl FromStr for EntityClass {
    type Err = UnknownEntityClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "artist" | "artists" => Ok(EntityClass::Artist),
            "label" | "labels" => Ok(EntityClass::Label),
            "master" | "masters" => Ok(EntityClass::Master),
            "release" | "releases" => Ok(EntityClass::Release),
            other => Err(UnknownEntityClass(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_discriminant() {
        for class in EntityClass::ALL {
            assert_eq!(EntityClass::from_discriminant(class.discriminant()), Some(class));
        }
    }

    #[test]
    fn parses_both_singular_and_plural_file_forms() {
        assert_eq!("release".parse::<EntityClass>().unwrap(), EntityClass::Release);
        assert_eq!("releases".parse::<EntityClass>().unwrap(), EntityClass::Release);
    }

    #[test]
    fn rejects_unknown_class() {
        assert!("track".parse::<EntityClass>().is_err());
    }
}
