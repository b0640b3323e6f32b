//! Run configuration
//!
//! Every field has a default, so a JSON file only needs the keys it changes:
//!
//! ```json
//! { "masker": { "detrend": true }, "connectivity": { "kind": "tangent" } }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::connectivity::ConnectivityParams;
use crate::error::Result;
use crate::masker::MaskerParams;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VolflowConfig {
    pub masker: MaskerParams,
    pub connectivity: ConnectivityParams,
}

impl VolflowConfig {
    /// Read a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: VolflowConfig = serde_json::from_str(&content)?;
        log::debug!("Loaded configuration from {}: {:?}", path.display(), config);
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::{ConnectivityKind, CovarianceEstimator};
    use crate::masker::ReductionStrategy;
    use crate::signal::Standardize;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: VolflowConfig = serde_json::from_str(
            r#"{ "masker": { "detrend": true, "strategy": "median" },
                 "connectivity": { "kind": "partial correlation" } }"#,
        )
        .unwrap();
        assert!(config.masker.detrend);
        assert_eq!(config.masker.strategy, ReductionStrategy::Median);
        assert_eq!(config.masker.standardize, Standardize::ZScore);
        assert_eq!(config.connectivity.kind, ConnectivityKind::PartialCorrelation);
        assert_eq!(config.connectivity.estimator, CovarianceEstimator::LedoitWolf);
    }

    #[test]
    fn test_empty_json_is_default() {
        let config: VolflowConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, VolflowConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volflow.json");
        let mut config = VolflowConfig::default();
        config.connectivity.kind = ConnectivityKind::Precision;
        std::fs::write(&path, config.to_json().unwrap()).unwrap();

        assert_eq!(VolflowConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result: std::result::Result<VolflowConfig, _> =
            serde_json::from_str(r#"{ "connectivity": { "kind": "coherence" } }"#);
        assert!(result.is_err());
    }
}
