//! Rankable sites: JSON loading, built-in coordinates, reloadable snapshot.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use thiserror::Error;

use crate::{Site, ValidationError, DEFAULT_PUE};

/// Known grid sites and their coordinates.
const BUILTIN_SITES: &[(&str, f64, f64)] = &[
    ("ALBERTA-LCG2", 53.5461, -113.4938),
    ("CERN-PROD", 46.2331, 6.0559),
    ("INFN-ROMA1", 41.9028, 12.4964),
    ("NIKHEF-ELPROD", 52.3556, 4.9500),
    ("RAL-LCG2", 51.5714, -1.3080),
    ("AEGIS01-IPB-SCL", 44.8176, 20.4569),
    ("ALICE-IN2P3", 45.7840, 4.8700),
    ("BEIJING-LCG2", 39.9042, 116.4074),
    ("BUDAPEST-LCG2", 47.4979, 19.0402),
    ("DESY-HH", 53.5763, 9.8810),
    ("DESY-ZN", 52.3906, 13.0669),
    ("FZK-LCG2", 49.0950, 8.4310),
    ("GRIF-LPNHE", 48.8462, 2.3460),
    ("IN2P3-CC", 45.7840, 4.8700),
    ("IN2P3-CPPM", 43.2965, 5.3698),
    ("INFN-CNAF", 44.4949, 11.3426),
    ("INFN-FRASCATI", 41.8089, 12.6761),
    ("INFN-MILANO", 45.4642, 9.1900),
    ("INFN-NAPOLI", 40.8522, 14.2681),
    ("INFN-PISA", 43.7160, 10.4000),
    ("INFN-TORINO", 45.0703, 7.6869),
    ("KR-KISTI-GSDC-01", 36.3913, 127.3620),
    ("PIC", 41.3851, 2.1734),
    ("PRAGUE-FZU", 50.0755, 14.4378),
    ("RU-JINR-LCG2", 55.7050, 37.6639),
    ("TRIUMF-LCG2", 49.2463, -123.1162),
    ("TU-Kosice", 48.7164, 21.2611),
    ("US-ATLAS-AGLT2", 42.2808, -83.7430),
    ("US-ATLAS-MWT2", 41.8781, -87.6298),
    ("US-ATLAS-NERSC", 37.8732, -122.2573),
    ("US-ATLAS-SWT2", 29.7604, -95.3698),
    ("USCMS-FNAL-WC1", 41.8419, -88.2415),
];

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("cannot read sites file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("sites JSON is malformed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("site '{name}' is invalid: {source}")]
    Invalid {
        name: String,
        #[source]
        source: ValidationError,
    },
}

/// Built-in coordinates for a site name.
pub fn lookup_coordinates(name: &str) -> Option<(f64, f64)> {
    BUILTIN_SITES
        .iter()
        .find(|(site, _, _)| *site == name)
        .map(|(_, lat, lon)| (*lat, *lon))
}

/// Every built-in site at the default PUE.
pub fn builtin_sites() -> Vec<Site> {
    BUILTIN_SITES
        .iter()
        .map(|(name, lat, lon)| Site {
            name: (*name).to_owned(),
            lat: *lat,
            lon: *lon,
            pue: Some(DEFAULT_PUE),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct RawSite {
    site_name: Option<String>,
    name: Option<String>,
    #[serde(rename = "NAME")]
    upper_name: Option<String>,
    #[serde(alias = "lat")]
    latitude: Option<f64>,
    #[serde(alias = "lon")]
    longitude: Option<f64>,
    pue: Option<f64>,
}

impl RawSite {
    fn resolved_name(&self) -> String {
        [&self.site_name, &self.name, &self.upper_name]
            .into_iter()
            .flatten()
            .map(|name| name.trim())
            .find(|name| !name.is_empty())
            .unwrap_or("unknown")
            .to_owned()
    }
}

/// Sites that survived loading plus what was dropped and why.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteLoad {
    pub sites: Vec<Site>,
    pub warnings: Vec<String>,
}

/// Parse a JSON array of site objects.
///
/// The name comes from `site_name`, `name` or `NAME` (else `"unknown"`).
/// Missing coordinates are filled from the built-in table; a site that is not
/// in the table is skipped. Later duplicates of a name are skipped.
pub fn parse_sites(json: &str) -> Result<SiteLoad, SiteError> {
    let raw: Vec<RawSite> = serde_json::from_str(json)?;
    let mut seen = HashSet::new();
    let mut sites = Vec::with_capacity(raw.len());
    let mut warnings = Vec::new();

    for entry in raw {
        let name = entry.resolved_name();

        let coordinates = match (entry.latitude, entry.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => lookup_coordinates(&name),
        };
        let Some((lat, lon)) = coordinates else {
            tracing::warn!(site = %name, "skipping site without coordinates");
            warnings.push(format!("site '{name}' skipped: no coordinates"));
            continue;
        };

        if !seen.insert(name.clone()) {
            tracing::warn!(site = %name, "skipping duplicate site");
            warnings.push(format!("site '{name}' skipped: duplicate name"));
            continue;
        }

        let site = Site::new(name.clone(), lat, lon, entry.pue)
            .map_err(|source| SiteError::Invalid { name, source })?;
        sites.push(site);
    }

    Ok(SiteLoad { sites, warnings })
}

pub fn load_sites(path: &Path) -> Result<SiteLoad, SiteError> {
    let json = std::fs::read_to_string(path).map_err(|source| SiteError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_sites(&json)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SiteOrigin {
    Builtin,
    File(PathBuf),
    Fixed,
}

/// Immutable site snapshot, swapped whole on [`SiteRepository::reload`].
#[derive(Debug)]
pub struct SiteRepository {
    origin: SiteOrigin,
    snapshot: RwLock<Arc<[Site]>>,
}

impl SiteRepository {
    pub fn new(sites: Vec<Site>) -> Self {
        Self {
            origin: SiteOrigin::Fixed,
            snapshot: RwLock::new(sites.into()),
        }
    }

    pub fn builtin() -> Self {
        Self {
            origin: SiteOrigin::Builtin,
            snapshot: RwLock::new(builtin_sites().into()),
        }
    }

    /// Load from a file that [`reload`](Self::reload) will re-read.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<(Self, Vec<String>), SiteError> {
        let path = path.into();
        let load = load_sites(&path)?;
        let repository = Self {
            origin: SiteOrigin::File(path),
            snapshot: RwLock::new(load.sites.into()),
        };
        Ok((repository, load.warnings))
    }

    pub fn snapshot(&self) -> Arc<[Site]> {
        Arc::clone(&self.snapshot.read().expect("site snapshot lock poisoned"))
    }

    pub fn find(&self, name: &str) -> Option<Site> {
        self.snapshot().iter().find(|site| site.name == name).cloned()
    }

    /// Re-read the backing file and swap the snapshot. Readers holding the old
    /// snapshot keep it. On error the current snapshot stays in place.
    pub fn reload(&self) -> Result<Vec<String>, SiteError> {
        let load = match &self.origin {
            SiteOrigin::File(path) => load_sites(path)?,
            SiteOrigin::Builtin => SiteLoad {
                sites: builtin_sites(),
                warnings: Vec::new(),
            },
            SiteOrigin::Fixed => return Ok(Vec::new()),
        };
        self.replace(load.sites);
        Ok(load.warnings)
    }

    pub fn replace(&self, sites: Vec<Site>) {
        let count = sites.len();
        *self.snapshot.write().expect("site snapshot lock poisoned") = sites.into();
        tracing::info!(count, "site snapshot replaced");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn accepts_every_name_key_and_fills_known_coordinates() {
        let load = parse_sites(
            r#"[
                {"site_name": "A", "latitude": 10.0, "longitude": 20.0, "pue": 1.2},
                {"name": "B", "lat": -5.0, "lon": 30.0},
                {"NAME": "CERN-PROD"},
                {"latitude": 1.0, "longitude": 2.0}
            ]"#,
        )
        .expect("valid json");

        let names: Vec<&str> = load.sites.iter().map(|site| site.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "CERN-PROD", "unknown"]);
        assert_eq!(load.sites[0].pue, Some(1.2));
        assert_eq!(load.sites[1].pue, None);
        assert_eq!((load.sites[2].lat, load.sites[2].lon), (46.2331, 6.0559));
        assert!(load.warnings.is_empty());
    }

    #[test]
    fn unknown_sites_without_coordinates_and_duplicates_are_skipped() {
        let load = parse_sites(
            r#"[
                {"site_name": "NOWHERE"},
                {"site_name": "A", "latitude": 1.0, "longitude": 1.0},
                {"site_name": "A", "latitude": 2.0, "longitude": 2.0}
            ]"#,
        )
        .expect("valid json");

        assert_eq!(load.sites.len(), 1);
        assert_eq!(load.sites[0].lat, 1.0);
        assert_eq!(load.warnings.len(), 2);
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        let error = parse_sites(r#"[{"site_name": "X", "latitude": 95.0, "longitude": 0.0}]"#)
            .expect_err("latitude out of range");
        assert!(matches!(error, SiteError::Invalid { .. }));
    }

    #[test]
    fn builtin_table_has_every_site() {
        assert_eq!(builtin_sites().len(), 32);
        assert_eq!(lookup_coordinates("RAL-LCG2"), Some((51.5714, -1.3080)));
        assert_eq!(lookup_coordinates("ral-lcg2"), None);
    }

    #[test]
    fn reload_swaps_the_snapshot() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"[{{"site_name": "A", "latitude": 1.0, "longitude": 1.0}}]"#)
            .expect("write");

        let (repository, _) = SiteRepository::from_file(file.path()).expect("load");
        let before = repository.snapshot();
        assert_eq!(before.len(), 1);

        std::fs::write(
            file.path(),
            r#"[{"site_name": "A", "latitude": 1.0, "longitude": 1.0},
                {"site_name": "B", "latitude": 2.0, "longitude": 2.0}]"#,
        )
        .expect("rewrite");
        repository.reload().expect("reload");

        assert_eq!(before.len(), 1);
        assert_eq!(repository.snapshot().len(), 2);
        assert!(repository.find("B").is_some());
    }
}
