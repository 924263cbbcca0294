mod forecast;
mod pending;
mod purge;
mod rank;
mod resolve;
mod sites;

use carbonroute_core::{
    CarbonEngine, EngineBuilder, EngineConfig, Envelope, EnvelopeError, ProviderId, ResolveError,
    RouteMeta, SiteRepository,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::metadata::Metadata;

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
    pub errors: Vec<EnvelopeError>,
    pub latency_ms: u64,
    pub source_chain: Vec<ProviderId>,
}

impl CommandResult {
    pub fn ok(data: Value, source_chain: Vec<ProviderId>) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            errors: Vec::new(),
            latency_ms: 0,
            source_chain,
        }
    }

    /// Result of a routed call: chain, warnings, errors and latency.
    pub fn routed(data: Value, route: RouteMeta) -> Self {
        Self::ok(data, route.source_chain)
            .with_warnings(route.warnings)
            .with_errors(route.errors)
            .with_latency(route.latency_ms)
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn with_errors(mut self, errors: Vec<EnvelopeError>) -> Self {
        self.errors.extend(errors);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}

pub async fn run(cli: &Cli, cancel: &CancellationToken) -> Result<Envelope<Value>, CliError> {
    let config = load_config(cli)?;

    let command_result = match &cli.command {
        Command::Resolve(args) => {
            let engine = build_engine(cli, &config)?;
            resolve::run(args, &engine, &config, cancel).await?
        }
        Command::Rank(args) => {
            let engine = build_engine(cli, &config)?;
            rank::run(args, engine, &config, cancel).await?
        }
        Command::Forecast(args) => {
            let engine = build_engine(cli, &config)?;
            forecast::run(args, &engine, &config, cancel).await?
        }
        Command::Sites(args) => sites::run(args, &config)?,
        Command::Pending(args) => {
            let engine = build_engine(cli, &config)?;
            pending::run(args, &engine).await?
        }
        Command::Purge => {
            let engine = build_engine(cli, &config)?;
            purge::run(&engine).await?
        }
    };

    let CommandResult {
        data,
        warnings,
        errors,
        latency_ms,
        source_chain,
    } = command_result;

    let mut metadata = Metadata::new(source_chain, latency_ms);
    for warning in warnings {
        metadata.push_warning(warning);
    }
    let meta = metadata.into_envelope_meta()?;

    Envelope::with_errors(meta, data, errors).map_err(CliError::from)
}

/// Environment configuration with global flag overrides applied.
fn load_config(cli: &Cli) -> Result<EngineConfig, CliError> {
    let mut config = EngineConfig::from_env()?;
    if let Some(retries) = cli.retries {
        config.retries = retries;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    Ok(config)
}

fn build_engine(cli: &Cli, config: &EngineConfig) -> Result<CarbonEngine, CliError> {
    let builder = EngineBuilder::from_config(config.clone());
    let builder = if cli.mock {
        builder.with_mock_mode()
    } else {
        builder
    };
    Ok(builder.build()?)
}

/// `--sites-json`, then `SITES_JSON`, then the built-in table.
fn site_repository(
    flag: Option<&std::path::Path>,
    config: &EngineConfig,
) -> Result<(SiteRepository, Vec<String>), CliError> {
    match flag.or(config.sites_json.as_deref()) {
        Some(path) => Ok(SiteRepository::from_file(path)?),
        None => Ok((SiteRepository::builtin(), Vec::new())),
    }
}

/// Routing failures become envelope errors with `data: null`; everything else
/// is a CLI error.
fn unresolved(error: ResolveError) -> Result<CommandResult, CliError> {
    match error {
        ResolveError::Exhausted(failure) => Ok(CommandResult::ok(Value::Null, failure.source_chain)
            .with_warnings(failure.warnings)
            .with_errors(failure.errors)
            .with_latency(failure.latency_ms)),
        ResolveError::DataAbsent { provider, message } => {
            let error = EnvelopeError::new("source.data_absent", message)?
                .with_source(provider)
                .with_retryable(false);
            Ok(CommandResult::ok(Value::Null, vec![provider]).with_errors(vec![error]))
        }
        other => Err(other.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbonroute_core::RouteFailure;

    #[test]
    fn exhausted_route_becomes_envelope_errors() {
        let failure = RouteFailure {
            source_chain: vec![ProviderId::ElectricityMapsLatest],
            warnings: Vec::new(),
            errors: vec![EnvelopeError::new("source.transient", "HTTP 503")
                .expect("valid error")
                .with_source(ProviderId::ElectricityMapsLatest)],
            latency_ms: 7,
        };

        let result = unresolved(ResolveError::Exhausted(failure)).expect("rendered");
        assert_eq!(result.data, Value::Null);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.source_chain, vec![ProviderId::ElectricityMapsLatest]);
        assert_eq!(result.latency_ms, 7);
    }

    #[test]
    fn data_absent_names_the_provider() {
        let result = unresolved(ResolveError::DataAbsent {
            provider: ProviderId::ElectricityMapsForecast,
            message: String::from("no forecast"),
        })
        .expect("rendered");

        assert_eq!(result.errors[0].code, "source.data_absent");
        assert_eq!(result.errors[0].source, Some(ProviderId::ElectricityMapsForecast));
    }

    #[test]
    fn cancellation_is_a_cli_error() {
        let error = unresolved(ResolveError::Cancelled).err().expect("not rendered");
        assert_eq!(error.exit_code(), 130);
    }
}
