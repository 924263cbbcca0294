use carbonroute_core::CarbonEngine;
use serde::Serialize;

use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct PurgeResponseData {
    purged: usize,
    remaining: usize,
}

pub async fn run(engine: &CarbonEngine) -> Result<CommandResult, CliError> {
    let purged = engine.purge_expired().await?;
    let remaining = engine.retained_count().await?;

    let data = serde_json::to_value(PurgeResponseData { purged, remaining })?;
    Ok(CommandResult::ok(data, Vec::new()))
}
