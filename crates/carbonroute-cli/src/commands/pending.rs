use carbonroute_core::retainment::StoredRecord;
use carbonroute_core::{CarbonEngine, Location, UtcDateTime};
use serde::Serialize;

use crate::cli::PendingArgs;
use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct PendingResponseData {
    hour: UtcDateTime,
    count: usize,
    records: Vec<StoredRecord>,
}

pub async fn run(args: &PendingArgs, engine: &CarbonEngine) -> Result<CommandResult, CliError> {
    let location = Location::new(args.lat, args.lon)?;
    let request_time = UtcDateTime::parse(&args.time)?;

    let records = engine.find_pending(location, request_time).await?;
    let data = serde_json::to_value(PendingResponseData {
        hour: request_time.floor_to_hour(),
        count: records.len(),
        records,
    })?;
    Ok(CommandResult::ok(data, Vec::new()))
}
