use std::sync::Arc;
use std::time::Instant;

use sgcn_core::pipeline::{
    mark_completed_items, CacheResultSink, ItemIndex, JsonItemIndex, RequiredFieldsValidator, TsvRecordLoader,
};
use sgcn_core::{ChannelDriver, LocalDriver, SourceId, StageContext, StageMessage, StageOptions};
use tracing::info;

use crate::cli::{DriverKind, RunArgs};
use crate::commands::{elapsed_ms, CommandResult, Runtime};
use crate::error::CliError;

pub async fn run(args: &RunArgs, runtime: &Runtime) -> Result<CommandResult, CliError> {
    if args.workers == 0 {
        return Err(CliError::Command(String::from("--workers must be at least 1")));
    }

    let started = Instant::now();
    let index: Arc<dyn ItemIndex> = Arc::new(JsonItemIndex::from_path(&args.items, runtime.cache.clone())?);
    let ctx = StageContext {
        cache: runtime.cache.clone(),
        resolver: runtime.resolver(),
        index: index.clone(),
        loader: Arc::new(TsvRecordLoader::new(
            runtime.http.clone(),
            runtime.config.harmonizer()?,
        )),
        validator: Arc::new(RequiredFieldsValidator),
        taxonomic_groups: runtime.config.taxonomic_groups()?,
        options: StageOptions {
            auxiliary: !args.skip_auxiliary,
        },
    };
    let sink = Arc::new(CacheResultSink::new(runtime.cache.clone()));
    let start = StageMessage::start(args.root.clone());
    let run_id = start.run_id.clone();

    info!(run_id = %run_id, driver = ?args.driver, items = %args.items.display(), "starting run");
    let report = match args.driver {
        DriverKind::Local => LocalDriver::new(ctx, sink).run(start).await,
        DriverKind::Channel => ChannelDriver::new(ctx, sink, args.workers).run(start).await?,
    };

    let marked = if args.no_mark {
        0
    } else {
        mark_completed_items(index.as_ref(), &report).await
    };
    info!(run_id = %run_id, marked, failures = report.failures, "run finished");

    let mut source_chain = SourceId::AUTHORITIES.to_vec();
    if !args.skip_auxiliary {
        source_chain.extend(SourceId::AUXILIARY);
    }

    let mut result = CommandResult::ok(
        serde_json::json!({
            "run_id": run_id,
            "report": report,
            "items_marked_processed": marked,
        }),
        source_chain,
    )
    .with_latency(elapsed_ms(started));

    if report.failures > 0 {
        result = result.with_warning(format!(
            "{} unit(s) failed; {} item(s) left processable for the next run",
            report.failures,
            report.failed_items.len()
        ));
    }
    if report.unresolved_records > 0 {
        result = result.with_warning(format!(
            "{} record(s) left taxonomically unresolved",
            report.unresolved_records
        ));
    }
    Ok(result)
}
