//! Effective carbon intensity and footprint arithmetic.

use serde::{Deserialize, Serialize};

use crate::domain::{ensure_non_negative, validate_pue};
use crate::ValidationError;

/// Carbon footprint of a job in grams and kilograms CO2e.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    pub cfp_g: f64,
    pub cfp_kg: f64,
}

/// `ci_value * pue`.
pub fn effective_ci(ci_value: f64, pue: f64) -> f64 {
    ci_value * pue
}

pub fn footprint(effective_ci: f64, energy_kwh: f64) -> Footprint {
    let cfp_g = effective_ci * energy_kwh;
    Footprint {
        cfp_g,
        cfp_kg: cfp_g / 1000.0,
    }
}

/// Effective CI plus the footprint when an energy figure is given.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Derived {
    pub effective_ci: f64,
    pub footprint: Option<Footprint>,
}

pub fn derive(ci_value: f64, pue: f64, energy_kwh: Option<f64>) -> Result<Derived, ValidationError> {
    ensure_non_negative("ci_value", ci_value)?;
    validate_pue(pue)?;
    if let Some(energy_kwh) = energy_kwh {
        ensure_non_negative("energy_kwh", energy_kwh)?;
    }

    let effective_ci = effective_ci(ci_value, pue);
    Ok(Derived {
        effective_ci,
        footprint: energy_kwh.map(|energy_kwh| footprint(effective_ci, energy_kwh)),
    })
}
