use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::authorities::{AuthorityFindings, AuthorityMatch, TaxonomicAuthority};
use crate::domain::{SpeciesKey, SpeciesKeyKind, TaxonRank};
use crate::http_client::HttpRequest;
use crate::SourceId;

const DEFAULT_BASE_URL: &str = "https://www.marinespecies.org/rest";

/// WoRMS exact-name search. Status `accepted` marks an authoritative row.
///
/// WoRMS has no TSN lookup, so TSN keys are searched by the record's name.
#[derive(Debug, Clone)]
pub struct WormsAuthority {
    base_url: String,
}

impl Default for WormsAuthority {
    fn default() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }
}

impl WormsAuthority {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl TaxonomicAuthority for WormsAuthority {
    fn source(&self) -> SourceId {
        SourceId::Worms
    }

    fn request(&self, key: &SpeciesKey, scientific_name: &str) -> HttpRequest {
        let name = match key.kind() {
            SpeciesKeyKind::Name(name) if scientific_name.trim().is_empty() => name,
            SpeciesKeyKind::Name(_) | SpeciesKeyKind::Tsn(_) => scientific_name.trim(),
        };
        HttpRequest::get(format!(
            "{}/AphiaRecordsByName/{}?like=false&marine_only=false",
            self.base_url,
            urlencoding::encode(name)
        ))
    }

    fn has_data(&self, body: &Value) -> bool {
        body.as_array().is_some_and(|rows| !rows.is_empty())
    }

    fn interpret(&self, body: &Value) -> AuthorityFindings {
        let rows = match Vec::<WormsRecord>::deserialize(body) {
            Ok(rows) => rows,
            Err(err) => {
                warn!(source = %SourceId::Worms, error = %err, "unreadable WoRMS response");
                return AuthorityFindings::default();
            }
        };

        AuthorityFindings {
            accepted: rows
                .iter()
                .find(|row| row.status.as_deref() == Some("accepted"))
                .map(WormsRecord::to_match),
            alternate_names: rows
                .iter()
                .filter_map(|row| row.scientificname.clone())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct WormsRecord {
    #[serde(rename = "AphiaID")]
    aphia_id: i64,
    url: Option<String>,
    scientificname: Option<String>,
    status: Option<String>,
    rank: Option<String>,
    kingdom: Option<String>,
    phylum: Option<String>,
    class: Option<String>,
    order: Option<String>,
    family: Option<String>,
    genus: Option<String>,
}

impl WormsRecord {
    fn to_match(&self) -> AuthorityMatch {
        let levels = [
            ("Kingdom", &self.kingdom),
            ("Phylum", &self.phylum),
            ("Class", &self.class),
            ("Order", &self.order),
            ("Family", &self.family),
            ("Genus", &self.genus),
        ];

        AuthorityMatch {
            authority_id: self.aphia_id.to_string(),
            taxonomic_authority_url: self.url.clone().unwrap_or_else(|| {
                format!(
                    "https://www.marinespecies.org/aphia.php?p=taxdetails&id={}",
                    self.aphia_id
                )
            }),
            scientificname: self.scientificname.clone().unwrap_or_default(),
            commonname: None,
            rank: self.rank.clone(),
            taxonomy: levels
                .into_iter()
                .filter_map(|(rank, name)| name.as_ref().map(|name| TaxonRank::new(rank, name.as_str())))
                .collect(),
        }
    }
}
