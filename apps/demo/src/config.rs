//! Demo configuration.
//!
//! Loaded from `busline-demo.toml` in the working directory when
//! present; defaults otherwise.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

const CONFIG_FILE: &str = "busline-demo.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    #[serde(default = "default_cluster_id")]
    pub cluster_id: String,

    /// Client id; uniquified by default so repeated runs never collide.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_channel")]
    pub channel: String,

    #[serde(default = "default_durable_name")]
    pub durable_name: String,
}

fn default_cluster_id() -> String {
    "demo-cluster".into()
}

fn default_client_id() -> String {
    format!("demo-{}", Uuid::new_v4())
}

fn default_channel() -> String {
    "demo-channel".into()
}

fn default_durable_name() -> String {
    "main".into()
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            cluster_id: default_cluster_id(),
            client_id: default_client_id(),
            channel: default_channel(),
            durable_name: default_durable_name(),
        }
    }
}

impl DemoConfig {
    /// Loads configuration from the working directory, or defaults when
    /// no file exists.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::path::Path::new(CONFIG_FILE);
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_client_ids_never_collide() {
        assert_ne!(DemoConfig::default().client_id, DemoConfig::default().client_id);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg: DemoConfig = toml::from_str("channel = \"orders\"").unwrap();
        assert_eq!(cfg.channel, "orders");
        assert_eq!(cfg.cluster_id, "demo-cluster");
        assert_eq!(cfg.durable_name, "main");
        assert!(cfg.client_id.starts_with("demo-"));
    }
}
