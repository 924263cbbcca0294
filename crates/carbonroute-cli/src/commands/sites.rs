use carbonroute_core::{EngineConfig, Site};
use serde::Serialize;

use crate::cli::SitesArgs;
use crate::error::CliError;

use super::{site_repository, CommandResult};

#[derive(Debug, Serialize)]
struct SitesResponseData<'a> {
    count: usize,
    sites: &'a [Site],
}

pub fn run(args: &SitesArgs, config: &EngineConfig) -> Result<CommandResult, CliError> {
    let (repository, warnings) = site_repository(args.sites_json.as_deref(), config)?;
    let snapshot = repository.snapshot();

    let data = serde_json::to_value(SitesResponseData {
        count: snapshot.len(),
        sites: &snapshot,
    })?;
    Ok(CommandResult::ok(data, Vec::new()).with_warnings(warnings))
}
