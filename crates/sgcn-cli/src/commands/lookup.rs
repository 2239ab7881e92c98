use std::time::Instant;

use serde_json::{json, Value};
use sgcn_core::{LookupMessage, LookupOutcome, SourceDescriptor, SourceId, SpeciesKey};
use tracing::warn;

use crate::cli::{AuxiliarySource, LookupArgs};
use crate::commands::{elapsed_ms, CommandResult, Runtime};
use crate::error::CliError;

pub async fn run(args: &LookupArgs, runtime: &Runtime) -> Result<CommandResult, CliError> {
    let source = to_source_id(args.source);
    let resolver = runtime.resolver();
    let descriptor = SourceDescriptor::ad_hoc();
    let started = Instant::now();

    let mut results = Vec::with_capacity(args.names.len());
    let mut warnings = Vec::new();
    let mut all_cached = true;

    for name in &args.names {
        let message = LookupMessage {
            source_descriptor: descriptor.clone(),
            sppin_key: SpeciesKey::from_name(name)?,
        };
        let entry = match resolver.lookup_auxiliary(source, &message).await {
            Ok(outcome) => {
                all_cached &= matches!(outcome, LookupOutcome::Cached(_));
                outcome_json(&message.sppin_key, &outcome)
            }
            Err(err) => {
                all_cached = false;
                warn!(source = %source, sppin_key = %message.sppin_key, error = %err, "lookup failed");
                warnings.push(format!("{}: {err}", message.sppin_key));
                json!({"sppin_key": message.sppin_key, "status": "failed"})
            }
        };
        results.push(entry);
    }

    let mut result = CommandResult::ok(Value::Array(results), vec![source])
        .with_latency(elapsed_ms(started))
        .with_cache_hit(all_cached);
    for warning in warnings {
        result = result.with_warning(warning);
    }
    Ok(result)
}

fn outcome_json(key: &SpeciesKey, outcome: &LookupOutcome) -> Value {
    let status = match outcome {
        LookupOutcome::Cached(_) => "cached",
        LookupOutcome::Fetched(_) => "fetched",
        LookupOutcome::Empty => "empty",
        LookupOutcome::Skipped => "skipped",
    };
    json!({
        "sppin_key": key,
        "status": status,
        "value": outcome.value(),
    })
}

const fn to_source_id(source: AuxiliarySource) -> SourceId {
    match source {
        AuxiliarySource::Gbif => SourceId::Gbif,
        AuxiliarySource::Ecos => SourceId::Ecos,
        AuxiliarySource::Iucn => SourceId::Iucn,
        AuxiliarySource::Natureserve => SourceId::Natureserve,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_cli_source_is_auxiliary() {
        for source in [
            AuxiliarySource::Gbif,
            AuxiliarySource::Ecos,
            AuxiliarySource::Iucn,
            AuxiliarySource::Natureserve,
        ] {
            assert!(to_source_id(source).is_auxiliary());
        }
    }

    #[test]
    fn empty_outcome_has_null_value() {
        let key = SpeciesKey::from_name("Ambystoma foo").expect("key");
        let value = outcome_json(&key, &LookupOutcome::Empty);

        assert_eq!(value["status"], "empty");
        assert!(value["value"].is_null());
        assert_eq!(value["sppin_key"], "Name:ambystoma foo");
    }
}
