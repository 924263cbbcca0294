use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::ProviderId;

/// Per-provider rate budget and breaker settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPolicy {
    pub provider_id: ProviderId,
    pub quota_window: Duration,
    pub quota_limit: u32,
    pub circuit: CircuitBreakerConfig,
}

impl ProviderPolicy {
    /// Electricity Maps free tier: both endpoints share one token budget.
    pub fn electricity_maps_default(provider_id: ProviderId) -> Self {
        Self {
            provider_id,
            quota_window: Duration::from_secs(60),
            quota_limit: 30,
            circuit: CircuitBreakerConfig::default(),
        }
    }

    pub fn footprint_window_default() -> Self {
        Self {
            provider_id: ProviderId::FootprintWindow,
            quota_window: Duration::from_secs(60),
            quota_limit: 120,
            circuit: CircuitBreakerConfig::default(),
        }
    }

    pub fn default_for(provider_id: ProviderId) -> Option<Self> {
        match provider_id {
            ProviderId::ElectricityMapsLatest | ProviderId::ElectricityMapsForecast => {
                Some(Self::electricity_maps_default(provider_id))
            }
            ProviderId::FootprintWindow => Some(Self::footprint_window_default()),
            ProviderId::Mock => None,
        }
    }
}
