//! CLI argument definitions for sgcn.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Drive the stage chain over a repository listing |
//! | `resolve` | Resolve one scientific name against ITIS and WoRMS |
//! | `lookup` | Query an auxiliary source for one or more names |
//! | `cache` | Inspect the local cache |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--home` | `$SGCN_HOME` or `~/.sgcn` | Root for the DuckDB cache |
//! | `--time-unit-ms` | `1000` | Unit for retry backoff and WoRMS spacing |
//! | `--pretty` | `false` | Pretty-print JSON output |
//!
//! # Examples
//!
//! ```bash
//! sgcn run --items items.json --driver channel --workers 4
//! sgcn resolve "Ambystoma maculatum" --pretty
//! sgcn lookup gbif "Ambystoma maculatum"
//! sgcn cache get "final_res:Name:ambystoma maculatum"
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// sgcn - taxonomic enrichment of state conservation species lists
#[derive(Debug, Parser)]
#[command(
    name = "sgcn",
    author,
    version,
    about = "Taxonomic enrichment pipeline for SGCN species lists",
    long_about = "Pulls per-state Species of Greatest Conservation Need source files, \
deduplicates their records, and resolves every species against ITIS with WoRMS as \
fallback. Every external lookup is memoized in a local DuckDB cache so a resumed \
run never repeats a call.\n\
\n\
Use 'sgcn <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Root directory for the local cache. Overrides SGCN_HOME.
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    /// Time unit in milliseconds. Overrides SGCN_TIME_UNIT_MS.
    #[arg(long, global = true)]
    pub time_unit_ms: Option<u64>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Delivery mechanism for stage hand-offs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DriverKind {
    /// Inline, one unit at a time.
    Local,
    /// Serialized messages over a channel to a worker pool.
    Channel,
}

/// Sources that `lookup` can query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuxiliarySource {
    Gbif,
    Ecos,
    Iucn,
    Natureserve,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the stage chain over every processable item in a listing.
    ///
    /// # Examples
    ///
    ///   sgcn run --items items.json
    ///   sgcn run --items items.json --driver channel --workers 8 --skip-auxiliary
    Run(RunArgs),

    /// Resolve one scientific name.
    ///
    /// # Examples
    ///
    ///   sgcn resolve "Ambystoma maculatum"
    ///   sgcn resolve "Rana pipiens" --tsn 173420
    Resolve(ResolveArgs),

    /// Look up names at an auxiliary source, caching responses with data.
    ///
    /// # Examples
    ///
    ///   sgcn lookup gbif "Ambystoma maculatum" "Lithobates pipiens"
    Lookup(LookupArgs),

    /// Cache inspection commands.
    Cache(CacheArgs),
}

/// Arguments for the `run` command.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Repository listing (JSON array of items, or an object with `items`).
    #[arg(long)]
    pub items: PathBuf,

    /// Identifier of the repository collection the listing came from.
    #[arg(long)]
    pub root: Option<String>,

    #[arg(long, value_enum, default_value_t = DriverKind::Local)]
    pub driver: DriverKind,

    /// Worker count for the channel driver.
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Do not forward auxiliary lookups to stage 4.
    #[arg(long, default_value_t = false)]
    pub skip_auxiliary: bool,

    /// Leave completed items unmarked so the next run sees them again.
    #[arg(long, default_value_t = false)]
    pub no_mark: bool,
}

/// Arguments for the `resolve` command.
#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Scientific name as reported.
    pub name: String,

    /// Explicit ITIS identifier; resolves by TSN instead of name.
    #[arg(long)]
    pub tsn: Option<String>,

    /// Common name used when the authority reports none.
    #[arg(long)]
    pub common_name: Option<String>,
}

/// Arguments for the `lookup` command.
#[derive(Debug, Args)]
pub struct LookupArgs {
    #[arg(value_enum)]
    pub source: AuxiliarySource,

    /// One or more scientific names.
    #[arg(required = true, num_args = 1..)]
    pub names: Vec<String>,
}

/// Arguments for the `cache` command group.
#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

/// Cache inspection subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Print the value stored under a key.
    Get(CacheGetArgs),

    /// Entry counts per key namespace.
    Stats,
}

/// Arguments for `cache get`.
#[derive(Debug, Args)]
pub struct CacheGetArgs {
    /// Full cache key, e.g. `final_res:Name:ambystoma maculatum`.
    pub key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults_to_the_local_driver() {
        let cli = Cli::try_parse_from(["sgcn", "run", "--items", "items.json"]).expect("parse");

        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.driver, DriverKind::Local);
        assert_eq!(args.workers, 4);
        assert!(!args.skip_auxiliary);
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from([
            "sgcn",
            "resolve",
            "Rana pipiens",
            "--tsn",
            "173420",
            "--time-unit-ms",
            "50",
            "--pretty",
        ])
        .expect("parse");

        assert_eq!(cli.time_unit_ms, Some(50));
        assert!(cli.pretty);
        let Command::Resolve(args) = cli.command else {
            panic!("expected resolve");
        };
        assert_eq!(args.tsn.as_deref(), Some("173420"));
    }

    #[test]
    fn lookup_requires_a_name() {
        assert!(Cli::try_parse_from(["sgcn", "lookup", "gbif"]).is_err());
        assert!(Cli::try_parse_from(["sgcn", "lookup", "itis", "x"]).is_err());
    }
}
