//! Runtime configuration: defaults, then `SGCN_*` environment variables,
//! then explicit overrides (CLI flags).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use sgcn_warehouse::{resolve_sgcn_home, WarehouseConfig};
use thiserror::Error;

use crate::authorities::AuxiliarySources;
use crate::pipeline::{Harmonizer, LoadError, TaxonomicGroups};
use crate::source_policy::SourcePolicies;

pub const DEFAULT_TIME_UNIT_MS: u64 = 1_000;
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SgcnConfig {
    pub home: PathBuf,
    /// Unit for retry backoff and WoRMS spacing.
    pub time_unit: Duration,
    pub http_timeout: Duration,
    pub iucn_token: Option<String>,
    pub historic_list: Option<PathBuf>,
    pub itis_overrides: Option<PathBuf>,
    pub taxonomic_groups: Option<PathBuf>,
}

impl Default for SgcnConfig {
    fn default() -> Self {
        Self {
            home: resolve_sgcn_home(),
            time_unit: Duration::from_millis(DEFAULT_TIME_UNIT_MS),
            http_timeout: Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS),
            iucn_token: None,
            historic_list: None,
            itis_overrides: None,
            taxonomic_groups: None,
        }
    }
}

impl SgcnConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(home) = var("SGCN_HOME") {
            config.home = PathBuf::from(home);
        }
        if let Some(value) = var("SGCN_TIME_UNIT_MS") {
            config.time_unit = parse_millis("SGCN_TIME_UNIT_MS", &value)?;
        }
        if let Some(value) = var("SGCN_HTTP_TIMEOUT_MS") {
            config.http_timeout = parse_millis("SGCN_HTTP_TIMEOUT_MS", &value)?;
        }
        config.iucn_token = var("SGCN_IUCN_TOKEN");
        config.historic_list = var("SGCN_HISTORIC_LIST").map(PathBuf::from);
        config.itis_overrides = var("SGCN_ITIS_OVERRIDES").map(PathBuf::from);
        config.taxonomic_groups = var("SGCN_TAXONOMIC_GROUPS").map(PathBuf::from);

        Ok(config)
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = home.into();
        self
    }

    pub fn with_time_unit(mut self, time_unit: Duration) -> Self {
        self.time_unit = time_unit;
        self
    }

    pub fn warehouse_config(&self) -> WarehouseConfig {
        WarehouseConfig::for_home(self.home.clone())
    }

    pub fn source_policies(&self) -> SourcePolicies {
        SourcePolicies::for_time_unit(self.time_unit).with_timeout(self.http_timeout)
    }

    pub fn auxiliary_sources(&self) -> AuxiliarySources {
        AuxiliarySources::new(self.iucn_token.clone())
    }

    pub fn harmonizer(&self) -> Result<Harmonizer, LoadError> {
        Harmonizer::from_files(self.historic_list.as_deref(), self.itis_overrides.as_deref())
    }

    pub fn taxonomic_groups(&self) -> Result<TaxonomicGroups, LoadError> {
        match &self.taxonomic_groups {
            Some(path) => TaxonomicGroups::from_path(path),
            None => Ok(TaxonomicGroups::default()),
        }
    }
}

fn parse_millis(name: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(millis) if millis > 0 => Ok(Duration::from_millis(millis)),
        _ => Err(ConfigError::InvalidNumber {
            name,
            value: value.to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::SourceId;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = SgcnConfig::from_lookup(lookup(&[
            ("SGCN_HOME", "/tmp/sgcn-test"),
            ("SGCN_TIME_UNIT_MS", "250"),
            ("SGCN_IUCN_TOKEN", "t0k"),
            ("SGCN_TAXONOMIC_GROUPS", "/tmp/groups.json"),
        ]))
        .expect("config");

        assert_eq!(config.home, PathBuf::from("/tmp/sgcn-test"));
        assert_eq!(config.time_unit, Duration::from_millis(250));
        assert_eq!(config.http_timeout, Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS));
        assert_eq!(config.iucn_token.as_deref(), Some("t0k"));
        assert_eq!(config.taxonomic_groups, Some(PathBuf::from("/tmp/groups.json")));
        assert_eq!(
            config.warehouse_config().db_path,
            PathBuf::from("/tmp/sgcn-test/cache/sppin.duckdb")
        );
    }

    #[test]
    fn blank_and_invalid_values() {
        let blank = SgcnConfig::from_lookup(lookup(&[("SGCN_IUCN_TOKEN", "  ")])).expect("config");
        assert!(blank.iucn_token.is_none());

        let err = SgcnConfig::from_lookup(lookup(&[("SGCN_TIME_UNIT_MS", "0")])).expect_err("must fail");
        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                name: "SGCN_TIME_UNIT_MS",
                value: String::from("0")
            }
        );
    }

    #[test]
    fn time_unit_flows_into_source_policies() {
        let config = SgcnConfig::default().with_time_unit(Duration::from_millis(10));
        let policies = config.source_policies();

        assert_eq!(policies.get(SourceId::Worms).min_spacing, Some(Duration::from_millis(10)));
        assert_eq!(policies.get(SourceId::Itis).min_spacing, None);
    }
}
