use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::domain::{clean_scientific_name, RawRecord};
use crate::ValidationError;

const TSN_PREFIX: &str = "TSN:";
const NAME_PREFIX: &str = "Name:";

/// Join key between a record and its taxonomic resolution.
///
/// `TSN:<id>` when the record carries an explicit ITIS override, otherwise
/// `Name:<cleaned scientific name, lower-cased>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpeciesKey(String);

/// Borrowed view of the two key forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeciesKeyKind<'a> {
    Tsn(&'a str),
    Name(&'a str),
}

impl SpeciesKey {
    /// Key for an ITIS override. Override values may be full reference
    /// strings such as `itis:tsn:173420`; only the last `:` segment is kept.
    pub fn from_tsn(identifier: &str) -> Result<Self, ValidationError> {
        let tsn = identifier.rsplit(':').next().unwrap_or_default().trim();
        if tsn.is_empty() {
            return Err(ValidationError::InvalidSpeciesKey {
                value: identifier.to_owned(),
            });
        }
        Ok(Self(format!("{TSN_PREFIX}{tsn}")))
    }

    pub fn from_name(scientific_name: &str) -> Result<Self, ValidationError> {
        let cleaned = clean_scientific_name(scientific_name).to_lowercase();
        if cleaned.is_empty() {
            return Err(ValidationError::EmptyScientificName);
        }
        Ok(Self(format!("{NAME_PREFIX}{cleaned}")))
    }

    pub fn for_record(record: &RawRecord) -> Result<Self, ValidationError> {
        match record
            .itis_identifier
            .as_deref()
            .filter(|identifier| !identifier.trim().is_empty())
        {
            Some(identifier) => Self::from_tsn(identifier),
            None => Self::from_name(record.lookup_name()),
        }
    }

    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidSpeciesKey {
            value: value.to_owned(),
        };

        if let Some(tsn) = value.strip_prefix(TSN_PREFIX) {
            if tsn.is_empty() || tsn.contains(':') {
                return Err(invalid());
            }
        } else if let Some(name) = value.strip_prefix(NAME_PREFIX) {
            if name.trim().is_empty() {
                return Err(invalid());
            }
        } else {
            return Err(invalid());
        }

        Ok(Self(value.to_owned()))
    }

    pub fn kind(&self) -> SpeciesKeyKind<'_> {
        match self.0.strip_prefix(TSN_PREFIX) {
            Some(tsn) => SpeciesKeyKind::Tsn(tsn),
            None => SpeciesKeyKind::Name(&self.0[NAME_PREFIX.len()..]),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SpeciesKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SpeciesKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SpeciesKey> for String {
    fn from(value: SpeciesKey) -> Self {
        value.0
    }
}
