use carbonroute_core::{validate_pue, CarbonEngine, EngineConfig, Location};
use tokio_util::sync::CancellationToken;

use crate::cli::ForecastArgs;
use crate::error::CliError;

use super::{unresolved, CommandResult};

pub async fn run(
    args: &ForecastArgs,
    engine: &CarbonEngine,
    config: &EngineConfig,
    cancel: &CancellationToken,
) -> Result<CommandResult, CliError> {
    let location = Location::new(args.lat, args.lon)?;
    let pue = args.pue.unwrap_or(config.pue_default);
    validate_pue(pue)?;

    match engine.forecast_summary(location, pue, cancel).await {
        Ok(forecast) => {
            let empty = forecast.summary.count == 0;
            let data = serde_json::to_value(&forecast.summary)?;
            let result = CommandResult::routed(data, forecast.route);
            if empty {
                return Ok(result.with_warning("forecast series is empty"));
            }
            Ok(result)
        }
        Err(error) => unresolved(error),
    }
}
