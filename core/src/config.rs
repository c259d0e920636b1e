use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    FullScan,
    InvertedIndex,
}

/// What to do when the inverted-index search fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    FailFast,
    FallbackToFullScan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub k1: f64,
    pub b: f64,
    pub default_avg_doc_length: f64,
    pub rrf_k: f64,
    pub default_alpha: f64,
    pub boost_threshold: f64,
    pub batch_size: usize,
    pub scroll_page_size: usize,
    pub strategy: SearchStrategy,
    pub fallback: FallbackPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            default_avg_doc_length: 800.0,
            rrf_k: 60.0,
            default_alpha: 0.5,
            boost_threshold: 0.5,
            batch_size: 100,
            scroll_page_size: 256,
            strategy: SearchStrategy::InvertedIndex,
            fallback: FallbackPolicy::FallbackToFullScan,
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file (if given), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)?;
                serde_json::from_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("HYBRID_STRATEGY") {
            self.strategy = parse_enum(&val)?;
        }
        if let Ok(val) = std::env::var("HYBRID_FALLBACK") {
            self.fallback = parse_enum(&val)?;
        }
        if let Ok(val) = std::env::var("HYBRID_BATCH_SIZE") {
            self.batch_size = val.trim().parse().map_err(|_| ConfigError::Invalid(format!("HYBRID_BATCH_SIZE={val}")))?;
        }
        if self.batch_size == 0 || self.scroll_page_size == 0 {
            return Err(ConfigError::Invalid("batch sizes must be positive".into()));
        }
        Ok(())
    }
}

fn parse_enum<T: serde::de::DeserializeOwned>(val: &str) -> Result<T, ConfigError> {
    serde_json::from_value(serde_json::Value::String(val.trim().to_lowercase()))
        .map_err(|_| ConfigError::Invalid(val.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}
