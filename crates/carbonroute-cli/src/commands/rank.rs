use std::sync::Arc;

use carbonroute_core::{
    CarbonEngine, Endpoint, EngineConfig, FailSoftPolicy, RankRequest, SiteRanker, SyntheticCi,
    UtcDateTime,
};
use tokio_util::sync::CancellationToken;

use crate::cli::RankArgs;
use crate::error::CliError;

use super::{site_repository, CommandResult};

pub async fn run(
    args: &RankArgs,
    engine: CarbonEngine,
    config: &EngineConfig,
    cancel: &CancellationToken,
) -> Result<CommandResult, CliError> {
    let (repository, site_warnings) = site_repository(args.sites_json.as_deref(), config)?;

    let mut request = RankRequest::new(repository.snapshot().to_vec())
        .with_pue_default(args.pue_default.unwrap_or(config.pue_default))
        .with_energy_kwh(args.energy_kwh)
        .with_fail_soft(fail_soft_policy(args, config));
    if let Some(time) = &args.time {
        request = request.at(UtcDateTime::parse(time)?);
    }

    let source_chain = engine.orchestrator().chain_for(Endpoint::AtTime);
    let ranker = SiteRanker::new(Arc::new(engine)).with_concurrency(config.rank_concurrency)?;
    let report = ranker.rank(&request, cancel).await?;

    let failed = report.failures.len();
    let data = serde_json::to_value(&report)?;
    let mut result = CommandResult::ok(data, source_chain).with_warnings(site_warnings);
    if failed > 0 {
        result = result.with_warning(format!("{failed} site(s) could not be ranked"));
    }
    Ok(result)
}

fn fail_soft_policy(args: &RankArgs, config: &EngineConfig) -> FailSoftPolicy {
    if !(args.fail_soft || config.fail_soft) {
        return FailSoftPolicy::Disabled;
    }
    match args.synthetic_ci {
        Some(value) => FailSoftPolicy::Substitute(SyntheticCi::Fixed(value)),
        None => FailSoftPolicy::Substitute(SyntheticCi::Random),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(fail_soft: bool, synthetic_ci: Option<f64>) -> RankArgs {
        RankArgs {
            time: None,
            sites_json: None,
            pue_default: None,
            energy_kwh: None,
            fail_soft,
            synthetic_ci,
        }
    }

    #[test]
    fn fail_soft_is_opt_in() {
        let config = EngineConfig::default();
        assert_eq!(fail_soft_policy(&args(false, Some(300.0)), &config), FailSoftPolicy::Disabled);
        assert_eq!(
            fail_soft_policy(&args(true, Some(300.0)), &config),
            FailSoftPolicy::Substitute(SyntheticCi::Fixed(300.0))
        );
    }

    #[test]
    fn environment_enables_random_substitution() {
        let config = EngineConfig {
            fail_soft: true,
            ..EngineConfig::default()
        };
        assert_eq!(
            fail_soft_policy(&args(false, None), &config),
            FailSoftPolicy::Substitute(SyntheticCi::Random)
        );
    }
}
