use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// External services the pipeline consults, by canonical name.
///
/// The name doubles as the cache namespace for memoized lookups
/// (`<source>:<species key>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    Itis,
    Worms,
    Gbif,
    Ecos,
    Iucn,
    Natureserve,
}

impl SourceId {
    pub const ALL: [Self; 6] = [
        Self::Itis,
        Self::Worms,
        Self::Gbif,
        Self::Ecos,
        Self::Iucn,
        Self::Natureserve,
    ];

    /// Taxonomic authorities in the order they are consulted.
    pub const AUTHORITIES: [Self; 2] = [Self::Itis, Self::Worms];

    /// Sources consulted opportunistically in stage 4.
    pub const AUXILIARY: [Self; 4] = [Self::Gbif, Self::Ecos, Self::Iucn, Self::Natureserve];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Itis => "itis",
            Self::Worms => "worms",
            Self::Gbif => "gbif",
            Self::Ecos => "ecos",
            Self::Iucn => "iucn",
            Self::Natureserve => "natureserve",
        }
    }

    pub const fn is_auxiliary(self) -> bool {
        !matches!(self, Self::Itis | Self::Worms)
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "itis" => Ok(Self::Itis),
            "worms" => Ok(Self::Worms),
            "gbif" => Ok(Self::Gbif),
            "ecos" => Ok(Self::Ecos),
            "iucn" => Ok(Self::Iucn),
            "natureserve" => Ok(Self::Natureserve),
            other => Err(ValidationError::InvalidSource {
                value: other.to_owned(),
            }),
        }
    }
}
