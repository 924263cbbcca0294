use carbonroute_core::{CarbonEngine, EngineConfig, ResolutionRequest, UtcDateTime};
use tokio_util::sync::CancellationToken;

use crate::cli::ResolveArgs;
use crate::error::CliError;

use super::{unresolved, CommandResult};

pub async fn run(
    args: &ResolveArgs,
    engine: &CarbonEngine,
    config: &EngineConfig,
    cancel: &CancellationToken,
) -> Result<CommandResult, CliError> {
    let mut request = ResolutionRequest::new(args.lat, args.lon)?
        .with_pue(args.pue.unwrap_or(config.pue_default))?;
    if let Some(time) = &args.time {
        request = request.at(UtcDateTime::parse(time)?);
    }
    if let Some(energy_kwh) = args.energy_kwh {
        request = request.with_energy_kwh(energy_kwh)?;
    }

    match engine.resolve(&request, cancel).await {
        Ok(resolution) => {
            let data = serde_json::to_value(&resolution.outcome)?;
            let pending_warning = resolution.outcome.pending().map(|pending| {
                format!(
                    "reading from '{}' is not yet valid; retained as {} until {}",
                    pending.source, pending.record_id, pending.expires_at
                )
            });

            let mut result = CommandResult::routed(data, resolution.route);
            if let Some(warning) = pending_warning {
                result = result.with_warning(warning);
            }
            Ok(result)
        }
        Err(error) => unresolved(error),
    }
}
