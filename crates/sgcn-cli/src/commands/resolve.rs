use std::time::Instant;

use sgcn_core::domain::clean_scientific_name;
use sgcn_core::{ResolutionRequest, SourceDescriptor, SpeciesKey};

use crate::cli::ResolveArgs;
use crate::commands::{elapsed_ms, CommandResult, Runtime};
use crate::error::CliError;

pub async fn run(args: &ResolveArgs, runtime: &Runtime) -> Result<CommandResult, CliError> {
    let request = build_request(args)?;
    let started = Instant::now();
    let resolution = runtime.resolver().resolve(&request).await?;

    let summary = resolution.summary;
    let source_chain = summary.source_chain.clone();
    let resolved = summary.is_resolved();
    let data = serde_json::json!({
        "sppin_key": request.key,
        "taxonomy": summary,
        "auxiliary": resolution.auxiliary,
    });

    let result = CommandResult::ok(data, source_chain).with_latency(elapsed_ms(started));
    if resolved {
        Ok(result)
    } else {
        Ok(result.with_warning(format!(
            "'{}' not accepted by any taxonomic authority",
            request.scientific_name
        )))
    }
}

fn build_request(args: &ResolveArgs) -> Result<ResolutionRequest, CliError> {
    let cleaned = clean_scientific_name(&args.name);
    let scientific_name = if cleaned.is_empty() {
        args.name.trim().to_owned()
    } else {
        cleaned
    };
    let key = match args.tsn.as_deref() {
        Some(tsn) => SpeciesKey::from_tsn(tsn)?,
        None => SpeciesKey::from_name(&scientific_name)?,
    };

    Ok(ResolutionRequest {
        key,
        scientific_name,
        common_name: args.common_name.clone(),
        descriptor: SourceDescriptor::ad_hoc(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(name: &str, tsn: Option<&str>) -> ResolveArgs {
        ResolveArgs {
            name: name.to_owned(),
            tsn: tsn.map(str::to_owned),
            common_name: None,
        }
    }

    #[test]
    fn population_qualifiers_are_cleaned_before_keying() {
        let request = build_request(&args("Ambystoma foo (Alaska pop.)", None)).expect("request");

        assert_eq!(request.scientific_name, "Ambystoma foo");
        assert_eq!(request.key.as_str(), "Name:ambystoma foo");
    }

    #[test]
    fn explicit_tsn_wins_over_the_name() {
        let request = build_request(&args("Rana pipiens", Some("173420"))).expect("request");

        assert_eq!(request.key.as_str(), "TSN:173420");
        assert_eq!(request.scientific_name, "Rana pipiens");
    }

    #[test]
    fn blank_name_is_rejected() {
        assert!(build_request(&args("   ", None)).is_err());
    }
}
