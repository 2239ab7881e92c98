mod cache;
mod lookup;
mod resolve;
mod run;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sgcn_core::{
    CacheStore, DuckDbCacheStore, Fetcher, HttpClient, ReqwestHttpClient, SgcnConfig, SourceId, TaxonomicResolver,
    Warehouse,
};

use crate::cli::{CacheCommand, Cli, Command};
use crate::error::CliError;
use crate::metadata::{Envelope, Metadata};

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
    pub latency_ms: u64,
    pub cache_hit: bool,
    pub source_chain: Vec<SourceId>,
}

impl CommandResult {
    pub fn ok(data: Value, source_chain: Vec<SourceId>) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            latency_ms: 0,
            cache_hit: false,
            source_chain,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_cache_hit(mut self, cache_hit: bool) -> Self {
        self.cache_hit = cache_hit;
        self
    }
}

/// Everything a command needs, built once from configuration.
pub struct Runtime {
    pub config: SgcnConfig,
    pub warehouse: Warehouse,
    pub cache: Arc<dyn CacheStore>,
    pub http: Arc<dyn HttpClient>,
}

impl Runtime {
    pub fn open(config: SgcnConfig) -> Result<Self, CliError> {
        let warehouse = Warehouse::open(config.warehouse_config())?;
        let cache: Arc<dyn CacheStore> = Arc::new(DuckDbCacheStore::new(warehouse.clone()));
        Ok(Self {
            config,
            warehouse,
            cache,
            http: Arc::new(ReqwestHttpClient::new()),
        })
    }

    pub fn resolver(&self) -> TaxonomicResolver {
        let fetcher = Fetcher::new(self.http.clone(), self.config.source_policies());
        TaxonomicResolver::new(self.cache.clone(), fetcher, self.config.auxiliary_sources())
    }
}

/// Layer CLI flags over the environment.
pub fn load_config(cli: &Cli) -> Result<SgcnConfig, CliError> {
    let mut config = SgcnConfig::from_env()?;
    if let Some(home) = &cli.home {
        config = config.with_home(home.clone());
    }
    if let Some(millis) = cli.time_unit_ms {
        if millis == 0 {
            return Err(CliError::Command(String::from("--time-unit-ms must be positive")));
        }
        config = config.with_time_unit(Duration::from_millis(millis));
    }
    Ok(config)
}

pub async fn run(cli: &Cli) -> Result<Envelope<Value>, CliError> {
    let runtime = Runtime::open(load_config(cli)?)?;

    let command_result = match &cli.command {
        Command::Run(args) => run::run(args, &runtime).await?,
        Command::Resolve(args) => resolve::run(args, &runtime).await?,
        Command::Lookup(args) => lookup::run(args, &runtime).await?,
        Command::Cache(args) => match &args.command {
            CacheCommand::Get(get) => cache::get(get, &runtime).await?,
            CacheCommand::Stats => cache::stats(&runtime)?,
        },
    };

    let mut meta = Metadata::new(
        command_result.source_chain,
        command_result.latency_ms,
        command_result.cache_hit,
    );
    for warning in command_result.warnings {
        meta.push_warning(warning);
    }

    Ok(Envelope {
        meta,
        data: command_result.data,
    })
}

pub(crate) fn elapsed_ms(started: std::time::Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
