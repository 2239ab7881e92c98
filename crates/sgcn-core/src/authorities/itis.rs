use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::authorities::{AuthorityFindings, AuthorityMatch, TaxonomicAuthority};
use crate::domain::{SpeciesKey, SpeciesKeyKind, TaxonRank};
use crate::http_client::HttpRequest;
use crate::SourceId;

const DEFAULT_BASE_URL: &str = "https://services.itis.gov/";
const REPORT_URL: &str =
    "https://www.itis.gov/servlet/SingleRpt/SingleRpt?search_topic=TSN&search_value=";

/// ITIS Solr search. Usage `valid` or `accepted` marks an authoritative entry.
#[derive(Debug, Clone)]
pub struct ItisAuthority {
    base_url: String,
}

impl Default for ItisAuthority {
    fn default() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }
}

impl ItisAuthority {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl TaxonomicAuthority for ItisAuthority {
    fn source(&self) -> SourceId {
        SourceId::Itis
    }

    fn request(&self, key: &SpeciesKey, scientific_name: &str) -> HttpRequest {
        let query = match key.kind() {
            SpeciesKeyKind::Tsn(tsn) => format!("tsn:{tsn}"),
            // Solr needs the space inside the name escaped.
            SpeciesKeyKind::Name(_) => format!("nameWOInd:{}", scientific_name.trim().replace(' ', "\\ ")),
        };
        HttpRequest::get(format!(
            "{}?q={}&wt=json",
            self.base_url,
            urlencoding::encode(&query)
        ))
    }

    fn has_data(&self, body: &Value) -> bool {
        body.pointer("/response/docs")
            .and_then(Value::as_array)
            .is_some_and(|docs| !docs.is_empty())
    }

    fn interpret(&self, body: &Value) -> AuthorityFindings {
        let response = match ItisSearchResponse::deserialize(body) {
            Ok(response) => response,
            Err(err) => {
                warn!(source = %SourceId::Itis, error = %err, "unreadable ITIS response");
                return AuthorityFindings::default();
            }
        };

        let docs = response.response.docs;
        let mut alternate_names = Vec::new();
        for doc in &docs {
            alternate_names.extend(doc.name_w_ind.iter().cloned());
            alternate_names.extend(doc.name_wo_ind.iter().cloned());
        }

        let accepted = docs
            .iter()
            .find(|doc| doc.is_accepted())
            .map(ItisDoc::to_match);

        AuthorityFindings {
            accepted,
            alternate_names,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ItisSearchResponse {
    response: ItisDocs,
}

#[derive(Debug, Clone, Deserialize)]
struct ItisDocs {
    #[serde(default)]
    docs: Vec<ItisDoc>,
}

#[derive(Debug, Clone, Deserialize)]
struct ItisDoc {
    tsn: String,
    #[serde(rename = "nameWInd")]
    name_w_ind: Option<String>,
    #[serde(rename = "nameWOInd")]
    name_wo_ind: Option<String>,
    usage: Option<String>,
    rank: Option<String>,
    #[serde(rename = "hierarchySoFarWRanks", default)]
    hierarchy_so_far_w_ranks: Vec<String>,
    #[serde(default)]
    vernacular: Vec<String>,
}

impl ItisDoc {
    fn is_accepted(&self) -> bool {
        matches!(self.usage.as_deref(), Some("valid" | "accepted"))
    }

    fn to_match(&self) -> AuthorityMatch {
        AuthorityMatch {
            authority_id: self.tsn.clone(),
            taxonomic_authority_url: format!("{REPORT_URL}{}", self.tsn),
            scientificname: self
                .name_wo_ind
                .clone()
                .or_else(|| self.name_w_ind.clone())
                .unwrap_or_default(),
            commonname: english_vernacular(&self.vernacular),
            rank: self.rank.clone(),
            taxonomy: self
                .hierarchy_so_far_w_ranks
                .first()
                .map(|hierarchy| parse_hierarchy(hierarchy))
                .unwrap_or_default(),
        }
    }
}

/// Parse `"<tsn>:$Kingdom$Animalia$Class$Amphibia$"` into rank/name pairs.
fn parse_hierarchy(hierarchy: &str) -> Vec<TaxonRank> {
    let ranks = hierarchy
        .split_once(':')
        .map_or(hierarchy, |(_, ranks)| ranks);
    let parts = ranks
        .split('$')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>();

    parts
        .chunks_exact(2)
        .map(|pair| TaxonRank::new(pair[0], pair[1]))
        .collect()
}

/// First English name from `"$name$language$flag$tsn$date$"` entries.
fn english_vernacular(vernacular: &[String]) -> Option<String> {
    vernacular.iter().find_map(|entry| {
        let mut parts = entry.split('$').filter(|part| !part.is_empty());
        let name = parts.next()?;
        let language = parts.next()?;
        (language == "English").then(|| name.to_owned())
    })
}
