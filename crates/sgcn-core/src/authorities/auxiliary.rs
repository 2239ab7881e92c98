use serde_json::{json, Value};

use crate::http_client::HttpRequest;
use crate::SourceId;

const GBIF_MATCH_URL: &str = "https://api.gbif.org/v1/species/match";
const ECOS_EXPORT_URL: &str =
    "https://ecos.fws.gov/ecp/pullreports/catalog/species/report/species/export";
const IUCN_SPECIES_URL: &str = "https://apiv3.iucnredlist.org/api/v3/species";
const NATURESERVE_SEARCH_URL: &str = "https://explorer.natureserve.org/api/data/speciesSearch";

/// Request builders for the auxiliary sources consulted in stage 4.
#[derive(Debug, Clone, Default)]
pub struct AuxiliarySources {
    iucn_token: Option<String>,
}

impl AuxiliarySources {
    pub fn new(iucn_token: Option<String>) -> Self {
        Self {
            iucn_token: iucn_token.filter(|token| !token.trim().is_empty()),
        }
    }

    /// Request looking up `name` at `source`, or `None` when the source cannot
    /// be queried (authorities, or IUCN without a token).
    pub fn request(&self, source: SourceId, name: &str) -> Option<HttpRequest> {
        let name = name.trim();
        match source {
            SourceId::Gbif => Some(HttpRequest::get(format!(
                "{GBIF_MATCH_URL}?name={}&strict=true",
                urlencoding::encode(name)
            ))),
            SourceId::Ecos => {
                let filter = format!("/species@sn = '{}'", name.replace('\'', "''"));
                Some(HttpRequest::get(format!(
                    "{ECOS_EXPORT_URL}?format=json&distinct=true\
                     &columns=%2Fspecies%40cn%2Csn%2Cstatus%2Cdesc%2Clisting_date\
                     &filter={}",
                    urlencoding::encode(&filter)
                )))
            }
            SourceId::Iucn => self.iucn_token.as_ref().map(|token| {
                HttpRequest::get(format!(
                    "{IUCN_SPECIES_URL}/{}?token={}",
                    urlencoding::encode(name),
                    urlencoding::encode(token)
                ))
            }),
            SourceId::Natureserve => {
                let body = json!({
                    "criteriaType": "species",
                    "textCriteria": [{
                        "paramType": "textSearch",
                        "searchToken": name,
                        "matchAgainst": "allScientificNames",
                        "operator": "equals"
                    }]
                });
                Some(HttpRequest::post_json(NATURESERVE_SEARCH_URL, body.to_string()))
            }
            SourceId::Itis | SourceId::Worms => None,
        }
    }

    /// Whether a successful response actually describes the name.
    pub fn has_data(source: SourceId, body: &Value) -> bool {
        let non_empty = |field: &str| {
            body.get(field)
                .and_then(Value::as_array)
                .is_some_and(|items| !items.is_empty())
        };

        match source {
            SourceId::Gbif => body
                .get("matchType")
                .and_then(Value::as_str)
                .is_some_and(|match_type| match_type != "NONE"),
            SourceId::Ecos => non_empty("data"),
            SourceId::Iucn => non_empty("result"),
            SourceId::Natureserve => non_empty("results"),
            SourceId::Itis | SourceId::Worms => !body.is_null(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iucn_is_skipped_without_a_token() {
        assert!(AuxiliarySources::default()
            .request(SourceId::Iucn, "Ambystoma foo")
            .is_none());
        assert!(AuxiliarySources::new(Some(String::from("  ")))
            .request(SourceId::Iucn, "Ambystoma foo")
            .is_none());

        let request = AuxiliarySources::new(Some(String::from("t0k")))
            .request(SourceId::Iucn, "Ambystoma foo")
            .expect("request");
        assert!(request.url.ends_with("/Ambystoma%20foo?token=t0k"));
    }

    #[test]
    fn ecos_filter_quotes_the_name() {
        let request = AuxiliarySources::default()
            .request(SourceId::Ecos, "Ambystoma o'foo")
            .expect("request");
        assert!(
            request.url.contains("filter=%2Fspecies%40sn%20%3D%20%27Ambystoma%20o%27%27foo%27"),
            "url={}",
            request.url
        );
    }

    #[test]
    fn natureserve_posts_a_search_body() {
        let request = AuxiliarySources::default()
            .request(SourceId::Natureserve, "Ambystoma foo")
            .expect("request");
        let body: Value = serde_json::from_str(request.body.as_deref().expect("body")).expect("json");

        assert_eq!(body["textCriteria"][0]["searchToken"], "Ambystoma foo");
    }

    #[test]
    fn authorities_are_not_auxiliary_requests() {
        let sources = AuxiliarySources::default();
        assert!(sources.request(SourceId::Itis, "x").is_none());
        assert!(sources.request(SourceId::Worms, "x").is_none());
    }

    #[test]
    fn data_checks_follow_each_source_shape() {
        assert!(AuxiliarySources::has_data(SourceId::Gbif, &json!({"matchType": "EXACT"})));
        assert!(!AuxiliarySources::has_data(SourceId::Gbif, &json!({"matchType": "NONE"})));
        assert!(!AuxiliarySources::has_data(SourceId::Ecos, &json!({"data": []})));
        assert!(AuxiliarySources::has_data(SourceId::Iucn, &json!({"result": [{}]})));
        assert!(!AuxiliarySources::has_data(SourceId::Natureserve, &json!({})));
    }
}
