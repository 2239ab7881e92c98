use std::time::Instant;

use serde_json::json;

use crate::cli::CacheGetArgs;
use crate::commands::{elapsed_ms, CommandResult, Runtime};
use crate::error::CliError;

pub async fn get(args: &CacheGetArgs, runtime: &Runtime) -> Result<CommandResult, CliError> {
    let started = Instant::now();
    let entry = runtime.cache.get(&args.key).await?;

    let result = match entry {
        Some(entry) => CommandResult::ok(
            json!({
                "key": entry.key,
                "stored_at": entry.stored_at,
                "value": entry.value,
            }),
            Vec::new(),
        )
        .with_cache_hit(true),
        None => CommandResult::ok(json!({"key": args.key, "value": null}), Vec::new())
            .with_warning(format!("no cache entry for '{}'", args.key)),
    };
    Ok(result.with_latency(elapsed_ms(started)))
}

pub fn stats(runtime: &Runtime) -> Result<CommandResult, CliError> {
    let started = Instant::now();
    let namespaces = runtime.warehouse.namespace_stats()?;
    let final_results = runtime.warehouse.final_result_count()?;
    let final_records = runtime.warehouse.final_record_count()?;

    Ok(CommandResult::ok(
        json!({
            "db_path": runtime.warehouse.db_path().display().to_string(),
            "final_results": final_results,
            "final_records": final_records,
            "namespaces": namespaces,
        }),
        Vec::new(),
    )
    .with_latency(elapsed_ms(started)))
}
