//! Translator configuration.
//!
//! The configuration is a read-only value threaded through translator state,
//! never process-wide mutable state. The driving compiler constructs it (or
//! deserializes it from its own configuration layer) and hands it in.

use serde::{Deserialize, Serialize};

/// Sideways-information-passing strategy selected by the driver.
///
/// The planner's cost model implements the `all-bound` heuristic (a fully
/// bound atom contributes a single tuple); it is the default and currently the
/// only metric with distinct behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SipsStrategy {
    /// Prefer atoms whose columns are all bound (default)
    #[default]
    AllBound,
    /// Keep the source order
    Strict,
    /// Prefer atoms with the most bound columns
    MaxBound,
}

impl std::str::FromStr for SipsStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all-bound" => Ok(SipsStrategy::AllBound),
            "strict" => Ok(SipsStrategy::Strict),
            "max-bound" => Ok(SipsStrategy::MaxBound),
            other => Err(format!("unknown SIPS strategy '{other}'")),
        }
    }
}

/// Configuration flags consulted by the translator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatorConfig {
    /// Emit profiling nodes (timers, size loggers, frequency annotations)
    #[serde(default)]
    pub profile: bool,

    /// Add the post-translation RAM dump to the debug report
    #[serde(default)]
    pub debug_report: bool,

    /// Enable the Selinger join planner (requires scheduler statistics)
    #[serde(default)]
    pub auto_schedule: bool,

    /// SIPS heuristic name
    #[serde(default)]
    pub ram_sips: SipsStrategy,

    /// Emit provenance relation variants (adds two auxiliary columns)
    #[serde(default)]
    pub provenance: bool,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        TranslatorConfig {
            profile: false,
            debug_report: false,
            auto_schedule: false,
            ram_sips: SipsStrategy::AllBound,
            provenance: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TranslatorConfig::default();
        assert!(!config.profile);
        assert!(!config.auto_schedule);
        assert_eq!(config.ram_sips, SipsStrategy::AllBound);
    }

    #[test]
    fn test_sips_parsing() {
        assert_eq!(
            "all-bound".parse::<SipsStrategy>().unwrap(),
            SipsStrategy::AllBound
        );
        assert_eq!(
            "max-bound".parse::<SipsStrategy>().unwrap(),
            SipsStrategy::MaxBound
        );
        assert!("selinger".parse::<SipsStrategy>().is_err());
    }
}
