use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::tlv::DEFAULT_MAX_DEPTH;

/// Node settings. Missing keys in json take default values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// deepest container nesting accepted from peers
    pub max_tlv_depth: usize,
    /// interaction model revision reported in every response
    pub interaction_model_revision: u8,
    /// largest interaction payload accepted/produced
    pub max_payload_size: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            max_tlv_depth: DEFAULT_MAX_DEPTH,
            interaction_model_revision: 11,
            max_payload_size: 1280,
        }
    }
}

impl NodeConfig {
    pub fn load(path: &str) -> Result<Self> {
        let data = std::fs::read_to_string(path).context(format!("reading config from {}", path))?;
        serde_json::from_str(&data).context(format!("parsing {}", path))
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data).context(format!("writing config to {}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_path(name: &str) -> String {
        let dir = std::env::temp_dir().join(format!("matd_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("config.json").to_str().unwrap().to_owned()
    }

    #[test]
    fn partial_config_uses_defaults() {
        let path = test_path("cfg_partial");
        std::fs::write(&path, r#"{ "max_tlv_depth": 4 }"#).unwrap();
        let c = NodeConfig::load(&path).unwrap();
        assert_eq!(c.max_tlv_depth, 4);
        assert_eq!(c.interaction_model_revision, 11);
        assert_eq!(c.max_payload_size, 1280);
    }

    #[test]
    fn config_round_trip() {
        let path = test_path("cfg_rt");
        let c = NodeConfig {
            max_tlv_depth: 8,
            interaction_model_revision: 12,
            max_payload_size: 4096,
        };
        c.save(&path).unwrap();
        assert_eq!(NodeConfig::load(&path).unwrap(), c);
        assert!(NodeConfig::load("/nonexistent/matd/config.json").is_err());
    }
}
